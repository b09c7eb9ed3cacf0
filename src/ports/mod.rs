pub mod cache_store;
pub mod config_provider;
pub mod hook;
pub mod http_client;
pub mod origin;
