//! Shared state for the web listeners.
//!
//! The runtime does its own locking, so [`AppState`] is a pair of `Arc`s and
//! clones freely into every request.

use std::sync::Arc;

use relish_runtime::Runtime;

use crate::config::WebConfig;

#[derive(Clone)]
pub struct AppState {
    pub runtime: Arc<Runtime>,
    pub config: Arc<WebConfig>,
}

impl AppState {
    pub fn new(runtime: Arc<Runtime>, config: WebConfig) -> Self {
        AppState {
            runtime,
            config: Arc::new(config),
        }
    }
}
