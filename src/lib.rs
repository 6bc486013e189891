//! Flowgate - reverse-proxy bootstrap and stack orchestration
//!
//! This library backs two binaries:
//! - `flowgate` bootstraps the frontend container's reverse proxy: it
//!   resolves parameters from the environment, renders the nginx
//!   configuration from a template, derives the access-log policy,
//!   validates the rendered config, and supervises the proxy process with
//!   graceful-drain signal handling.
//! - `flowgate-stack` orchestrates the two-container deployment: isolated
//!   network, backend container, health wait, frontend container, health
//!   wait, with idempotent restarts and optional cleanup-on-exit.

pub mod config;
pub mod docker;
pub mod error;
pub mod health;
pub mod lifecycle;
pub mod logpolicy;
pub mod supervisor;
pub mod template;
pub mod validate;

pub const PKG_NAME: &str = env!("CARGO_PKG_NAME");
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
