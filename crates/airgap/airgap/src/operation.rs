//! Signing operation run against an authenticated card.

use nexum_keycard::CommandChannel;
use tracing::info;

use crate::request::SignRequest;
use crate::signature::{EthSignature, assemble};
use crate::{Error, Result};

impl SignRequest {
    /// Sign this request on `channel`.
    ///
    /// The channel must have an open secure channel and a verified PIN.
    pub fn sign_with<C: CommandChannel + ?Sized>(&self, channel: &mut C) -> Result<EthSignature> {
        let hash = self.signing_hash()?;
        if !self.derivation_path.is_known() {
            return Err(Error::UnknownDerivationPath);
        }
        let path = self.derivation_path.to_derivation_path()?;

        info!(
            path = %self.derivation_path,
            data_type = ?self.data_type,
            chain_id = ?self.chain_id,
            %hash,
            "Signing request"
        );
        let raw = channel.sign(&hash.0, &path)?;

        assemble(
            &raw,
            &hash,
            Some(self.data_type),
            self.chain_id,
            self.request_id,
        )
    }
}

/// Session operation signing `request` and producing the `ur:eth-signature/...` response
pub fn signing_operation<C>(request: SignRequest) -> impl FnOnce(&mut C) -> Result<String>
where
    C: CommandChannel + 'static,
{
    move |channel: &mut C| request.sign_with(channel)?.to_ur()
}
