//! HTTP handlers.
//!
//! [`app`] serves the application port through a single fallback that
//! routes by path. [`explore`] serves the JSON introspection API.

pub mod app;
pub mod explore;
