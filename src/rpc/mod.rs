//! Coordinator↔Agent RPC contract (§4.3): the six operations, their numeric wire codes,
//! the in-process service implementation, and the CLI process-boundary adapter.

pub mod cli;
pub mod codes;
pub mod contract;
pub mod service;

pub use codes::RpcCode;
pub use contract::{AgentCoordinatorRpc, ExecutorBudget, WuOperationState};
pub use service::CoordinatorRpcService;
