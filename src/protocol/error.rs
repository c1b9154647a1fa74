//! Provider JSON-RPC error bindings
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::{borrow::Cow, fmt};

/// Error object carried in `RESPONSE` and `POPUP_RESPONSE` messages.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: ErrorCode,
    /// error message
    pub message: Cow<'static, str>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl RpcError {
    /// New [`RpcError`] with the default message of the given [`ErrorCode`].
    pub const fn new(code: ErrorCode) -> Self {
        Self { message: Cow::Borrowed(code.message()), code, data: None }
    }

    /// New [`RpcError`] with a custom message.
    pub fn with_message<M>(code: ErrorCode, message: M) -> Self
    where
        M: Into<String>,
    {
        Self { code, message: message.into().into(), data: None }
    }

    pub const fn no_wallet() -> Self {
        Self::new(ErrorCode::NoWallet)
    }

    pub const fn user_rejected() -> Self {
        Self::new(ErrorCode::UserRejected)
    }

    pub const fn internal_error() -> Self {
        Self::new(ErrorCode::InternalError)
    }

    pub fn invalid_params<M>(message: M) -> Self
    where
        M: Into<String>,
    {
        Self::with_message(ErrorCode::InvalidParams, message)
    }

    pub fn internal_error_with<M>(message: M) -> Self
    where
        M: Into<String>,
    {
        Self::with_message(ErrorCode::InternalError, message)
    }

    /// Switch target is not in the network registry.
    pub fn unrecognized_chain(chain_id: u64) -> Self {
        Self::with_message(
            ErrorCode::UnrecognizedChain,
            format!("Unrecognized chain ID 0x{chain_id:x}. Try adding the chain using wallet_addEthereumChain first."),
        )
    }

    /// Another confirmation is already occupying every queue position.
    pub fn resource_unavailable<M>(message: M) -> Self
    where
        M: Into<String>,
    {
        Self::with_message(ErrorCode::ResourceUnavailable, message)
    }
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.code.message(), self.code.code(), self.message)
    }
}

impl std::error::Error for RpcError {}

/// Error codes understood by EIP-1193 clients.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// No wallet has been created or imported yet.
    NoWallet,
    /// A request of the same kind is already pending.
    ResourceUnavailable,
    /// invalid method parameter
    InvalidParams,
    /// internal call error
    InternalError,
    /// The user declined the request, see EIP-1193.
    UserRejected,
    /// The requested chain has not been added, see EIP-3326.
    UnrecognizedChain,
    /// Any other code, usually relayed verbatim from a chain node.
    Server(i64),
}

impl ErrorCode {
    /// Returns the error code as `i64`
    pub const fn code(&self) -> i64 {
        match *self {
            Self::NoWallet => -32001,
            Self::ResourceUnavailable => -32002,
            Self::InvalidParams => -32602,
            Self::InternalError => -32603,
            Self::UserRejected => 4001,
            Self::UnrecognizedChain => 4902,
            Self::Server(c) => c,
        }
    }

    /// Returns the message associated with the error
    pub const fn message(&self) -> &'static str {
        match *self {
            Self::NoWallet => "No wallet found. Please create or import a wallet first.",
            Self::ResourceUnavailable => "Request already pending",
            Self::InvalidParams => "Invalid params",
            Self::InternalError => "Internal error",
            Self::UserRejected => "User rejected the request.",
            Self::UnrecognizedChain => "Unrecognized chain ID",
            Self::Server(_) => "Server error",
        }
    }
}

impl Serialize for ErrorCode {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_i64(self.code())
    }
}

impl<'a> Deserialize<'a> for ErrorCode {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'a>,
    {
        i64::deserialize(deserializer).map(Into::into)
    }
}

impl From<i64> for ErrorCode {
    fn from(code: i64) -> Self {
        match code {
            -32001 => Self::NoWallet,
            -32002 => Self::ResourceUnavailable,
            -32602 => Self::InvalidParams,
            -32603 => Self::InternalError,
            4001 => Self::UserRejected,
            4902 => Self::UnrecognizedChain,
            _ => Self::Server(code),
        }
    }
}
