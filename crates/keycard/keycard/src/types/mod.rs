mod application_info;
mod pairing_info;

pub use application_info::{ApplicationInfo, Version};
pub use pairing_info::PairingInfo;

use iso7816_tlv::ber::{Tag, Tlv, Value};

use crate::Error;

pub(crate) fn get_primitive_value(tag: &Tag, tlv: &Tlv) -> Result<Vec<u8>, Error> {
    if tag != tlv.tag() {
        return Err(Error::InvalidData("Invalid tag"));
    }
    match tlv.value() {
        Value::Primitive(bytes) => Ok(bytes.to_vec()),
        _ => Err(Error::InvalidData("Invalid value type")),
    }
}
