//! HTTP command API.
//!
//! A thin layer over the session registry: every handler resolves the account,
//! checks the session can act, validates the request and forwards it to the
//! account's connection.

pub mod error;
pub mod routes;
pub mod server;

pub use server::{AppState, build_app, build_registry, start_gateway};
