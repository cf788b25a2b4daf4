//! Terminal formatting for operator messages

use colored::Colorize;

pub(crate) fn success(message: &str) -> String {
    format!("✅ {}", message.green().bold())
}

pub(crate) fn warning(message: &str) -> String {
    format!("⚠️  {}", message.yellow().bold())
}

pub(crate) fn info(message: &str) -> String {
    format!("ℹ️  {}", message.blue())
}

/// Titled list of key/value lines
pub(crate) fn key_value_box<'a>(
    title: &str,
    items: impl IntoIterator<Item = (&'a str, String)>,
) -> String {
    let mut result = format!("{}", title.bold().underline());
    for (key, value) in items {
        result.push_str(&format!("\n  {}: {}", key.bold(), value));
    }
    result
}
