use ethers::types::{Address, Bytes, U256};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;

use crate::core::errors::BridgeError;
use crate::protocol::SignKind;

/// `eth_sendTransaction` parameter object. Quantities stay as the page sent
/// them (0x-prefixed hex) until the wallet core builds the transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas_price: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
}

fn quantity(field: &str, raw: &str) -> Result<U256, BridgeError> {
    let digits = raw.strip_prefix("0x").unwrap_or(raw);
    if digits.is_empty() {
        return Ok(U256::zero());
    }
    U256::from_str_radix(digits, 16)
        .map_err(|e| BridgeError::InvalidInput(format!("invalid {field} {raw:?}: {e}")))
}

impl TransactionParams {
    pub fn to_address(&self) -> Result<Option<Address>, BridgeError> {
        self.to
            .as_deref()
            .map(|to| {
                Address::from_str(to)
                    .map_err(|e| BridgeError::InvalidInput(format!("invalid recipient {to:?}: {e}")))
            })
            .transpose()
    }

    pub fn from_address(&self) -> Result<Option<Address>, BridgeError> {
        self.from
            .as_deref()
            .map(|from| {
                Address::from_str(from)
                    .map_err(|e| BridgeError::InvalidInput(format!("invalid sender {from:?}: {e}")))
            })
            .transpose()
    }

    /// Value in wei; absent means zero.
    pub fn value_wei(&self) -> Result<U256, BridgeError> {
        self.value.as_deref().map_or(Ok(U256::zero()), |v| quantity("value", v))
    }

    pub fn gas_limit(&self) -> Result<Option<U256>, BridgeError> {
        self.gas.as_deref().map(|g| quantity("gas", g)).transpose()
    }

    pub fn gas_price_wei(&self) -> Result<Option<U256>, BridgeError> {
        self.gas_price.as_deref().map(|g| quantity("gasPrice", g)).transpose()
    }

    pub fn nonce_value(&self) -> Result<Option<U256>, BridgeError> {
        self.nonce.as_deref().map(|n| quantity("nonce", n)).transpose()
    }

    pub fn calldata(&self) -> Result<Option<Bytes>, BridgeError> {
        self.data
            .as_deref()
            .map(|data| {
                let digits = data.strip_prefix("0x").unwrap_or(data);
                hex::decode(digits)
                    .map(Bytes::from)
                    .map_err(|e| BridgeError::InvalidInput(format!("invalid data: {e}")))
            })
            .transpose()
    }

    /// Checks every field parses; a transaction with neither recipient nor
    /// calldata does nothing and is refused.
    pub fn validate(&self) -> Result<(), BridgeError> {
        let to = self.to_address()?;
        self.from_address()?;
        self.value_wei()?;
        self.gas_limit()?;
        self.gas_price_wei()?;
        self.nonce_value()?;
        let data = self.calldata()?;
        if to.is_none() && data.map_or(true, |d| d.is_empty()) {
            return Err(BridgeError::InvalidInput(
                "transaction needs a recipient or contract data".into(),
            ));
        }
        Ok(())
    }
}

/// What a signing request asks the wallet to sign.
#[derive(Debug, Clone, PartialEq)]
pub enum SigningPayload {
    Message(Vec<u8>),
    TypedData(Value),
    Transaction(TransactionParams),
}

fn looks_like_address(value: &Value) -> bool {
    value.as_str().map_or(false, |s| s.len() == 42 && Address::from_str(s).is_ok())
}

/// Hex input is signed as raw bytes, anything else as UTF-8 text.
fn message_bytes(value: &Value) -> Result<Vec<u8>, BridgeError> {
    let raw = value
        .as_str()
        .ok_or_else(|| BridgeError::InvalidInput("message must be a string".into()))?;
    match raw.strip_prefix("0x") {
        Some(digits) => hex::decode(digits)
            .map_err(|e| BridgeError::InvalidInput(format!("invalid hex message: {e}"))),
        None => Ok(raw.as_bytes().to_vec()),
    }
}

fn typed_data_document(value: &Value) -> Option<Value> {
    let doc = match value {
        Value::String(raw) => serde_json::from_str::<Value>(raw).ok()?,
        other => other.clone(),
    };
    doc.get("types").is_some().then_some(doc)
}

impl SigningPayload {
    /// Extracts the payload from positional params.
    ///
    /// `personal_sign` takes `[message, address]`; callers that swap the two
    /// are tolerated. `eth_sign` takes `[address, message]`. Typed data may be
    /// an object or a JSON string in either position.
    pub fn from_params(kind: SignKind, params: &[Value]) -> Result<Self, BridgeError> {
        let missing = || BridgeError::InvalidInput("missing signing parameters".into());
        match kind {
            SignKind::PersonalMessage => {
                let first = params.first().ok_or_else(missing)?;
                let message = match params.get(1) {
                    Some(second) if looks_like_address(first) && !looks_like_address(second) => {
                        second
                    }
                    _ => first,
                };
                Ok(SigningPayload::Message(message_bytes(message)?))
            }
            SignKind::EthSign => {
                let message = params.get(1).ok_or_else(missing)?;
                Ok(SigningPayload::Message(message_bytes(message)?))
            }
            SignKind::TypedData => params
                .iter()
                .find_map(typed_data_document)
                .map(SigningPayload::TypedData)
                .ok_or_else(|| BridgeError::InvalidInput("typed data document not found".into())),
            SignKind::SendTransaction => {
                let raw = params.first().ok_or_else(missing)?;
                let tx: TransactionParams = serde_json::from_value(raw.clone())
                    .map_err(|e| BridgeError::InvalidInput(format!("invalid transaction: {e}")))?;
                tx.validate()?;
                Ok(SigningPayload::Transaction(tx))
            }
        }
    }
}
