//! edgesim - a local emulator for edge-compute request/response lifecycles.
//!
//! edgesim runs the four lifecycle stages of a CDN edge (viewer-request,
//! origin-request, origin-response, viewer-response) on your machine. User
//! hooks bound to those stages can rewrite or short-circuit requests and edit
//! responses, an on-disk edge cache answers repeat requests, and origins are
//! served from a local directory or proxied to an HTTP base URL.
//!
//! # Features
//! - Path-pattern routing to per-behavior hook sets, with a `*` fallback
//! - Viewer and origin stages bracketing an edge cache with TTL clamping
//! - Declarative hooks in YAML, JSON or TOML, plus hooks registered in code
//! - Local directory and HTTP origins with custom headers and origin paths
//! - Live configuration reload; requests wait while a new generation is built
//! - `PURGE` to empty the cache, JSON error bodies for every failure
//! - Structured tracing via `tracing`
//!
//! # Quick Example
//! ```no_run
//! use std::sync::Arc;
//!
//! use edgesim::{
//!     adapters::{FileCacheStore, HookLoader, HttpClientAdapter, OriginResolverFactory},
//!     core::{EdgeRequest, Router},
//! };
//!
//! # #[tokio::main] async fn main() -> eyre::Result<()> {
//! let config = edgesim::config::loader::load_config("edgesim.yaml").await?;
//! let router = Router::new(
//!     Arc::new(FileCacheStore::open(&config.cache.dir, &config.cache.namespace)?),
//!     Arc::new(HookLoader::new()),
//!     Arc::new(OriginResolverFactory::new(Arc::new(HttpClientAdapter::new()?))),
//! );
//! router.rebuild(&config).await?;
//! let response = router.handle(EdgeRequest::new("GET", "/index.html")).await?;
//! println!("{}", response.status);
//! # Ok(()) }
//! ```
//!
//! # Architecture
//! The crate separates **ports** (traits) from **adapters** (implementations) while keeping
//! the lifecycle, routing and cache policy inside `core`. `core` only talks to hooks,
//! origins and the cache through the traits in `ports`.
//!
//! # Error Handling
//! Domain failures are `thiserror` enums (`EdgeError`, `HookError`, `CacheStoreError`,
//! `RouterError`); every `EdgeError` maps to an HTTP status and a `{code, message}` body.
//! Application plumbing returns `eyre::Result<T>` with context attached via `WrapErr`.
//!
//! # Concurrency & Data Structures
//! Shared maps use `scc::HashMap`. The routing table is swapped as a whole behind a
//! `tokio::sync::RwLock`, so in-flight requests keep the generation they started with.
pub mod config;
pub mod ports;
pub mod tracing_setup;
pub mod utils;

pub mod adapters;
pub mod core;

// Re-export the specific types needed by the binary crate
pub use crate::{
    adapters::{FileCacheStore, HookLoader, HttpClientAdapter, HttpHandler},
    core::{EdgeError, Router},
    ports::http_client::HttpClient,
    utils::GracefulShutdown,
};
