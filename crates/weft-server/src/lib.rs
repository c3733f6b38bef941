pub mod api;
pub mod bridge;
pub mod http;
pub mod ingress;
pub mod registry;
pub mod server;

pub use registry::{WorkerRegistry, WorkerSession};
pub use server::{build_router, start, AppState, ServerConfig, ServerHandle};
