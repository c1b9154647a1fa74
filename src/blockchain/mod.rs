pub mod mock;
pub mod network;
pub mod rpc;
pub mod traits;

pub use mock::MockChainRpc;
pub use network::{AddChainParams, NetworkConfig, NetworkRegistry, SwitchChainParams};
pub use rpc::HttpChainRpc;
pub use traits::ChainRpc;
