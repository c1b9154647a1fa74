use ethers::utils::format_ether;
use std::fmt;

use crate::background::Confirmation;
use crate::core::errors::BridgeError;
use crate::protocol::{Method, MethodClass};
use crate::wallet::SigningPayload;

/// What the user is asked to approve. Every prompt names the requesting
/// origin; transactions also show recipient and value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Prompt {
    Connect {
        origin: String,
    },
    SignMessage {
        origin: String,
        message: String,
    },
    SignTypedData {
        origin: String,
        primary_type: Option<String>,
        domain: Option<String>,
    },
    SendTransaction {
        origin: String,
        to: Option<String>,
        /// Value in ether, decimal.
        value: String,
        has_data: bool,
    },
}

impl Prompt {
    pub fn describe(confirmation: &Confirmation) -> Result<Prompt, BridgeError> {
        let origin = confirmation.origin().to_string();
        let signature = match confirmation {
            Confirmation::Authorization(_) => return Ok(Prompt::Connect { origin }),
            Confirmation::Signature(s) => s,
        };
        let MethodClass::Signing(kind) = Method::parse(&signature.request.method).class() else {
            return Err(BridgeError::InvalidInput(format!(
                "{} is not a signing method",
                signature.request.method
            )));
        };
        Ok(match SigningPayload::from_params(kind, &signature.request.params)? {
            SigningPayload::Message(bytes) => {
                let message = match String::from_utf8(bytes) {
                    Ok(text) => text,
                    Err(raw) => format!("0x{}", hex::encode(raw.into_bytes())),
                };
                Prompt::SignMessage { origin, message }
            }
            SigningPayload::TypedData(doc) => Prompt::SignTypedData {
                origin,
                primary_type: doc.get("primaryType").and_then(|v| v.as_str()).map(str::to_string),
                domain: doc
                    .get("domain")
                    .and_then(|d| d.get("name"))
                    .and_then(|v| v.as_str())
                    .map(str::to_string),
            },
            SigningPayload::Transaction(tx) => Prompt::SendTransaction {
                origin,
                to: tx.to.clone(),
                value: format_ether(tx.value_wei()?),
                has_data: tx.calldata()?.map_or(false, |d| !d.is_empty()),
            },
        })
    }

    pub fn origin(&self) -> &str {
        match self {
            Prompt::Connect { origin }
            | Prompt::SignMessage { origin, .. }
            | Prompt::SignTypedData { origin, .. }
            | Prompt::SendTransaction { origin, .. } => origin,
        }
    }
}

impl fmt::Display for Prompt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Prompt::Connect { origin } => write!(f, "{origin} wants to see your account address"),
            Prompt::SignMessage { origin, message } => {
                write!(f, "{origin} asks you to sign: {message}")
            }
            Prompt::SignTypedData { origin, primary_type, domain } => write!(
                f,
                "{origin} asks you to sign {} data for {}",
                primary_type.as_deref().unwrap_or("typed"),
                domain.as_deref().unwrap_or("an unnamed domain")
            ),
            Prompt::SendTransaction { origin, to, value, has_data } => {
                let target = to.as_deref().unwrap_or("a new contract");
                write!(f, "{origin} wants to send {value} to {target}")?;
                if *has_data {
                    write!(f, " with contract data")?;
                }
                Ok(())
            }
        }
    }
}
