pub mod config_providers;
pub mod file_cache_store;
pub mod hook_loader;
pub mod http_client;
pub mod http_handler;
pub mod origin_resolver;

/// Re-export commonly used types from adapters
pub use config_providers::FileConfigProvider;
pub use file_cache_store::FileCacheStore;
pub use hook_loader::{DeclarativeHook, HookLoader};
pub use http_client::HttpClientAdapter;
pub use http_handler::HttpHandler;
pub use origin_resolver::{OriginResolver, OriginResolverFactory};
