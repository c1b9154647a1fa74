//! Typed registry of provider methods.
//!
//! Every wire method name maps to exactly one [`MethodClass`]; the background
//! coordinator matches on the class, so adding a method forces a decision
//! about how it is handled.

use std::fmt;

/// How a cached-info request is answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InfoKind {
    /// `eth_chainId`, hex quantity.
    ChainId,
    /// `net_version`, decimal string.
    NetVersion,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisclosureKind {
    /// `eth_requestAccounts`: prompts when the origin is not authorized.
    Request,
    /// `eth_accounts`: never prompts, empty list when not authorized.
    Silent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignKind {
    PersonalMessage,
    /// Legacy `eth_sign`, raw data first then address.
    EthSign,
    TypedData,
    SendTransaction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
    SwitchChain,
    AddChain,
}

/// Dispatch class of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodClass {
    /// Forwarded to the selected network's node.
    DirectRpc,
    /// Answered from the network registry without a node round-trip.
    CachedInfo(InfoKind),
    /// Reveals the wallet address.
    Disclosure(DisclosureKind),
    /// Always needs an explicit confirmation.
    Signing(SignKind),
    /// Changes the selected or known networks.
    NetworkMutation(MutationKind),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Method {
    RequestAccounts,
    Accounts,
    ChainId,
    NetVersion,
    PersonalSign,
    EthSign,
    SignTypedData,
    SignTypedDataV3,
    SignTypedDataV4,
    SendTransaction,
    SwitchEthereumChain,
    AddEthereumChain,
    /// Anything else is passed through to the node.
    Other(String),
}

impl Method {
    pub fn parse(name: &str) -> Self {
        match name {
            "eth_requestAccounts" => Method::RequestAccounts,
            "eth_accounts" => Method::Accounts,
            "eth_chainId" => Method::ChainId,
            "net_version" => Method::NetVersion,
            "personal_sign" => Method::PersonalSign,
            "eth_sign" => Method::EthSign,
            "eth_signTypedData" => Method::SignTypedData,
            "eth_signTypedData_v3" => Method::SignTypedDataV3,
            "eth_signTypedData_v4" => Method::SignTypedDataV4,
            "eth_sendTransaction" => Method::SendTransaction,
            "wallet_switchEthereumChain" => Method::SwitchEthereumChain,
            "wallet_addEthereumChain" => Method::AddEthereumChain,
            other => Method::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Method::RequestAccounts => "eth_requestAccounts",
            Method::Accounts => "eth_accounts",
            Method::ChainId => "eth_chainId",
            Method::NetVersion => "net_version",
            Method::PersonalSign => "personal_sign",
            Method::EthSign => "eth_sign",
            Method::SignTypedData => "eth_signTypedData",
            Method::SignTypedDataV3 => "eth_signTypedData_v3",
            Method::SignTypedDataV4 => "eth_signTypedData_v4",
            Method::SendTransaction => "eth_sendTransaction",
            Method::SwitchEthereumChain => "wallet_switchEthereumChain",
            Method::AddEthereumChain => "wallet_addEthereumChain",
            Method::Other(name) => name,
        }
    }

    pub fn class(&self) -> MethodClass {
        match self {
            Method::RequestAccounts => MethodClass::Disclosure(DisclosureKind::Request),
            Method::Accounts => MethodClass::Disclosure(DisclosureKind::Silent),
            Method::ChainId => MethodClass::CachedInfo(InfoKind::ChainId),
            Method::NetVersion => MethodClass::CachedInfo(InfoKind::NetVersion),
            Method::PersonalSign => MethodClass::Signing(SignKind::PersonalMessage),
            Method::EthSign => MethodClass::Signing(SignKind::EthSign),
            Method::SignTypedData | Method::SignTypedDataV3 | Method::SignTypedDataV4 => {
                MethodClass::Signing(SignKind::TypedData)
            }
            Method::SendTransaction => MethodClass::Signing(SignKind::SendTransaction),
            Method::SwitchEthereumChain => MethodClass::NetworkMutation(MutationKind::SwitchChain),
            Method::AddEthereumChain => MethodClass::NetworkMutation(MutationKind::AddChain),
            Method::Other(_) => MethodClass::DirectRpc,
        }
    }
}

impl From<&str> for Method {
    fn from(name: &str) -> Self {
        Method::parse(name)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
