//! HTTP API for threadloom

mod handlers;
mod sse;
mod types;

pub use handlers::create_router;

use crate::runtime::ExecutionBridge;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub bridge: ExecutionBridge,
}

impl AppState {
    pub fn new(bridge: ExecutionBridge) -> Self {
        Self { bridge }
    }
}
