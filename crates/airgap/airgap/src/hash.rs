//! Hash the card signs for each request kind.

use alloy_dyn_abi::TypedData;
use alloy_primitives::{B256, eip191_hash_message, keccak256};

use crate::request::{DataType, SignRequest};
use crate::{Error, Result};

/// Signing hash of `sign_data` interpreted according to `data_type`.
///
/// Transactions are hashed as-is: legacy payloads are the RLP of the unsigned
/// EIP-155 transaction, typed payloads carry their EIP-2718 type prefix.
pub fn signing_hash(data_type: DataType, sign_data: &[u8]) -> Result<B256> {
    match data_type {
        DataType::LegacyTx | DataType::Eip1559Tx => Ok(keccak256(sign_data)),
        DataType::PersonalMessage => Ok(eip191_hash_message(sign_data)),
        DataType::TypedData => {
            let typed_data: TypedData = serde_json::from_slice(sign_data)
                .map_err(|e| Error::TypedData(e.to_string()))?;
            typed_data
                .eip712_signing_hash()
                .map_err(|e| Error::TypedData(e.to_string()))
        }
    }
}

impl SignRequest {
    /// Hash the card must sign for this request
    pub fn signing_hash(&self) -> Result<B256> {
        signing_hash(self.data_type, &self.sign_data)
    }
}
