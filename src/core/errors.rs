use thiserror::Error;

use crate::protocol::RpcError;

/// Internal error type shared by the coordinator, the confirmation UI and the
/// collaborators they call into.
///
/// Page code never sees this type: every value crosses the page boundary as a
/// [`RpcError`] through the `From` conversion below.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// No wallet material exists (nothing to disclose or sign with).
    #[error("no wallet found")]
    NoWallet,

    /// A wallet exists but no live session is available.
    #[error("wallet is locked")]
    Locked,

    /// Wrong unlock password.
    #[error("invalid password")]
    InvalidPassword,

    /// Malformed or semantically invalid request parameters.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A JSON-RPC error that must reach the page verbatim.
    #[error("rpc error: {0}")]
    Rpc(RpcError),

    /// Durable store failures.
    #[error("storage error: {0}")]
    Storage(String),

    /// Serialization/deserialization errors.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP / chain node transport failures.
    #[error("transport error: {0}")]
    Transport(String),

    /// Signing or broadcast failures inside the wallet core.
    #[error("signing failed: {0}")]
    Signing(String),

    /// Configuration errors.
    #[error("configuration error: {0}")]
    Config(String),

    /// The other end of a cross-context channel went away.
    #[error("channel closed: {0}")]
    ChannelClosed(&'static str),
}

impl From<RpcError> for BridgeError {
    fn from(err: RpcError) -> Self {
        BridgeError::Rpc(err)
    }
}

impl From<sqlx::Error> for BridgeError {
    fn from(err: sqlx::Error) -> Self {
        BridgeError::Storage(err.to_string())
    }
}

impl From<reqwest::Error> for BridgeError {
    fn from(err: reqwest::Error) -> Self {
        BridgeError::Transport(err.to_string())
    }
}

impl From<BridgeError> for RpcError {
    fn from(err: BridgeError) -> Self {
        match err {
            BridgeError::NoWallet => RpcError::no_wallet(),
            BridgeError::InvalidInput(msg) => RpcError::invalid_params(msg),
            BridgeError::Rpc(e) => e,
            locked @ (BridgeError::Locked | BridgeError::InvalidPassword) => {
                RpcError::internal_error_with(locked.to_string())
            }
            other => {
                // raw transport/store details stay in the log, not in the page
                tracing::error!(error = %other, "internal failure surfaced as -32603");
                RpcError::internal_error()
            }
        }
    }
}
