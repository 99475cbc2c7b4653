mod rpc;
mod source;

pub use rpc::{RateLimitConfig, RetryConfig, RpcClient, RpcClientConfig, RpcError};
pub use source::RpcChainSource;
