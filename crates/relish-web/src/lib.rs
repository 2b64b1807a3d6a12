//! HTTP front end for Relish programs.
//!
//! Request paths are resolved to multi-methods by walking the package tree
//! ([`routing`]), request data is bound to parameters ([`binding`]), and the
//! handler's result tuple is rendered by its leading directive
//! ([`response`]), possibly through an HTML [`template`]. Each request runs
//! on its own interpreter thread inside a transaction.

pub mod binding;
pub mod config;
pub mod error;
pub mod handlers;
pub mod response;
pub mod router;
pub mod routing;
pub mod server;
pub mod state;
pub mod template;

pub use config::WebConfig;
pub use error::WebError;
pub use router::{build_app_router, build_explore_router, build_share_router};
pub use server::serve;
pub use state::AppState;
