//! Wire protocol shared by every execution context.

pub mod error;
pub mod message;
pub mod method;

pub use error::{ErrorCode, RpcError};
pub use message::{
    into_outcome, DocumentId, PageMessage, ProviderEvent, ProviderInfo, Request, RequestId,
    RequestKey, RequestOrigin, RuntimeMessage, TabId, TabMessage,
};
pub use method::{DisclosureKind, InfoKind, Method, MethodClass, MutationKind, SignKind};

use crate::core::errors::BridgeError;

/// Formats a chain id the way `eth_chainId` reports it.
pub fn to_hex_quantity(value: u64) -> String {
    format!("0x{value:x}")
}

/// Parses a `0x`-prefixed hex quantity such as a chain id.
pub fn parse_hex_quantity(raw: &str) -> Result<u64, BridgeError> {
    let digits = raw
        .strip_prefix("0x")
        .or_else(|| raw.strip_prefix("0X"))
        .ok_or_else(|| BridgeError::InvalidInput(format!("expected 0x-prefixed quantity, got {raw:?}")))?;
    if digits.is_empty() || (digits.len() > 1 && digits.starts_with('0')) {
        return Err(BridgeError::InvalidInput(format!("non-canonical quantity {raw:?}")));
    }
    u64::from_str_radix(digits, 16)
        .map_err(|e| BridgeError::InvalidInput(format!("invalid quantity {raw:?}: {e}")))
}
