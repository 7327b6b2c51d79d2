pub mod client;
pub mod decode;
pub mod models;
pub mod source;

pub use client::{ChainClient, EvmRpcClient};
pub use models::TransferEvent;
pub use source::{ChainWatcher, EventSink, EventSource, PushEventSource};
