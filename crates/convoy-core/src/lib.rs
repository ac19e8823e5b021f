//! Core domain of the Convoy webhook delivery gateway.
//!
//! Everything here is storage- and transport-agnostic: the HTTP surface
//! lives in `convoy-api`, the dispatch engine in `convoy-worker` and the
//! repository back-ends in `convoy-db`.

pub mod auth;
pub mod cache;
pub mod config;
pub mod error;
pub mod limiter;
pub mod repository;
pub mod services;
pub mod signature;
pub mod types;

#[cfg(test)]
pub(crate) mod testutil;
