use std::{
    net::SocketAddr,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use arc_swap::ArcSwap;
use axum::{
    extract::{ConnectInfo, Request},
    routing::any,
};
use clap::Parser;
use color_eyre::{
    Result,
    eyre::{Context, eyre},
};
use edgesim::{
    adapters::{
        FileCacheStore, FileConfigProvider, HookLoader, HttpClientAdapter, HttpHandler,
        OriginResolverFactory,
    },
    config::{SimulatorConfig, SimulatorConfigValidator, loader::load_config},
    core::Router,
    ports::config_provider::ConfigProvider,
    tracing_setup,
    utils::GracefulShutdown,
};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

const DEFAULT_CONFIG: &str = "edgesim.yaml";

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    #[clap(subcommand)]
    command: Option<Commands>,

    #[clap(short, long, default_value = DEFAULT_CONFIG)]
    config: String,
}

#[derive(Parser, Debug)]
enum Commands {
    /// Validate configuration file
    Validate {
        /// Configuration file to validate
        #[clap(short, long, default_value = DEFAULT_CONFIG)]
        config: String,
    },
    /// Initialize a new configuration file
    Init {
        /// Output path for the new config file
        #[clap(short, long, default_value = DEFAULT_CONFIG)]
        config: String,
    },
    /// Start the emulator (default)
    Serve {
        /// Configuration file to use
        #[clap(short, long, default_value = DEFAULT_CONFIG)]
        config: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();

    let config_path = match args.command {
        Some(Commands::Validate { config }) => return validate_config_command(&config).await,
        Some(Commands::Init { config }) => return init_config_command(&config).await,
        Some(Commands::Serve { config }) => config,
        None => args.config,
    };

    serve(&config_path).await
}

async fn serve(config_path: &str) -> Result<()> {
    let provider = rustls::crypto::aws_lc_rs::default_provider();
    if let Err(e) = rustls::crypto::CryptoProvider::install_default(provider) {
        tracing::warn!(
            "CryptoProvider::install_default for aws-lc-rs reported an error: {:?}",
            e
        );
    }

    tracing_setup::init_tracing().map_err(|e| eyre!("Failed to initialize tracing: {}", e))?;

    tracing::info!("Loading initial configuration from {config_path}");

    let config_provider = Arc::new(
        FileConfigProvider::new(config_path).context("Failed to create config provider")?,
    );
    let initial_config = config_provider
        .load_config()
        .await
        .with_context(|| format!("Failed to load initial config from {config_path}"))?;
    SimulatorConfigValidator::validate(&initial_config)
        .map_err(|e| eyre!("Invalid configuration in {config_path}: {e}"))?;
    let config_holder = Arc::new(ArcSwap::from_pointee(initial_config));

    // Relative hook files are resolved next to the configuration file.
    let config_dir = match Path::new(config_path).parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let hook_loader = HookLoader::new().with_base_dir(config_dir);
    watch_hook_files(&config_provider, &hook_loader, &config_holder.load());

    let (cache_dir, cache_namespace) = {
        let config = config_holder.load();
        (config.cache.dir.clone(), config.cache.namespace.clone())
    };
    let cache = FileCacheStore::open(&cache_dir, &cache_namespace)
        .with_context(|| format!("Failed to open edge cache at {cache_dir}"))?;
    let http_client =
        Arc::new(HttpClientAdapter::new().context("Failed to create HTTP client adapter")?);

    let router = Arc::new(Router::new(
        Arc::new(cache),
        Arc::new(hook_loader.clone()),
        Arc::new(OriginResolverFactory::new(http_client)),
    ));
    let generation = router
        .rebuild(&config_holder.load_full())
        .await
        .context("Failed to build the initial routing table")?;
    tracing::info!(
        "Routing table generation {} ready with patterns {:?}",
        generation,
        router.patterns().await
    );

    // Config watcher task
    let debounce_duration = Duration::from_secs(2);
    let mut notify_rx = config_provider.watch()?;
    let watcher_provider = config_provider.clone();
    let watcher_config = config_holder.clone();
    let watcher_router = router.clone();

    tokio::spawn(async move {
        tracing::info!("Config watcher task started.");
        let mut last_reload_attempt_time = tokio::time::Instant::now();
        last_reload_attempt_time = last_reload_attempt_time
            .checked_sub(debounce_duration)
            .unwrap_or(last_reload_attempt_time);

        while notify_rx.recv().await.is_some() {
            if last_reload_attempt_time.elapsed() < debounce_duration {
                tracing::info!("Debouncing config reload event. Still within cooldown period.");
                while notify_rx.try_recv().is_ok() {}
                continue;
            }
            last_reload_attempt_time = tokio::time::Instant::now();

            tracing::info!(
                "Attempting to reload configuration from {}",
                watcher_provider.path().display()
            );

            match watcher_provider.load_config().await {
                Ok(new_config) => {
                    if let Err(e) = SimulatorConfigValidator::validate(&new_config) {
                        tracing::error!(
                            "Reloaded configuration is invalid: {}. Keeping old configuration.",
                            e
                        );
                        continue;
                    }
                    match watcher_router.rebuild(&new_config).await {
                        Ok(generation) => {
                            watch_hook_files(&watcher_provider, &hook_loader, &new_config);
                            watcher_config.store(Arc::new(new_config));
                            tracing::info!("Routing table generation {} published.", generation);
                        }
                        Err(e) => tracing::error!(
                            "Failed to rebuild routing table: {}. Keeping old configuration.",
                            e
                        ),
                    }
                }
                Err(e) => {
                    tracing::error!(
                        "Failed to reload configuration: {}. Keeping old configuration.",
                        e
                    );
                }
            }
            while notify_rx.try_recv().is_ok() {}
        }
        tracing::info!("Config watcher task is shutting down.");
    });

    let graceful_shutdown = GracefulShutdown::new();
    let signal_handler_shutdown = graceful_shutdown.clone();
    tokio::spawn(async move {
        signal_handler_shutdown.run_signal_handler().await;
    });

    let addr: SocketAddr = config_holder
        .load()
        .listen_addr
        .parse()
        .context("Failed to parse listen address")?;

    {
        let config = config_holder.load();
        tracing::info!(
            "Starting edgesim for distribution {} on {} (cache enabled: {})",
            config.distribution.id,
            config.listen_addr,
            config.cache.enabled
        );
        println!(
            "edgesim listening on http://{} (distribution: {}, cache: {})",
            config.listen_addr,
            config.distribution.id,
            if config.cache.enabled { "on" } else { "off" }
        );
    }

    let http_handler = Arc::new(HttpHandler::new(router.clone()));
    let make_request_route = |handler: Arc<HttpHandler>| {
        any(
            move |ConnectInfo(client_addr): ConnectInfo<SocketAddr>, req: Request| {
                let handler = handler.clone();
                async move { handler.handle_request(req, Some(client_addr)).await }
            },
        )
    };

    let app = axum::Router::new()
        .route("/{*path}", make_request_route(http_handler.clone()))
        .route("/", make_request_route(http_handler))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()));

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;

    let server_result = tokio::select! {
        result = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>()
        ) => {
            result.context("Server error")
        },
        shutdown_reason = graceful_shutdown.wait() => {
            tracing::info!("Shutdown signal received: {:?}", shutdown_reason);
            Ok(())
        }
    };

    if let Err(e) = router.close().await {
        tracing::warn!("Failed to close edge cache: {}", e);
    }
    tracing::info!("Graceful shutdown completed");

    server_result
}

/// Register every hook file referenced by `config` with the watcher.
fn watch_hook_files(provider: &FileConfigProvider, loader: &HookLoader, config: &SimulatorConfig) {
    for location in config.hook_files() {
        let path = loader.resolve_path(location);
        if let Err(e) = provider.watch_file(&path) {
            tracing::warn!("Cannot watch hook file {}: {}", path.display(), e);
        }
    }
}

/// Validate configuration file and exit
async fn validate_config_command(config_path: &str) -> Result<()> {
    println!("🔍 Validating configuration file: {config_path}");

    if !Path::new(config_path).exists() {
        eprintln!("❌ Error: Configuration file '{config_path}' not found");
        std::process::exit(1);
    }

    let config = match load_config(config_path).await {
        Ok(config) => {
            println!("✅ Configuration parsing: OK");
            config
        }
        Err(e) => {
            eprintln!("❌ Configuration parsing failed:");
            eprintln!("   {e}");
            std::process::exit(1);
        }
    };

    match SimulatorConfigValidator::validate(&config) {
        Ok(()) => {
            println!("✅ Configuration validation: OK");
            println!();
            println!("📋 Configuration Summary:");
            println!("   • Listen Address: {}", config.listen_addr);
            println!("   • Distribution: {}", config.distribution.id);
            println!("   • Origins: {}", config.distribution.origins.len());
            println!(
                "   • Cache Behaviors: {}",
                config.distribution.behaviors.len() + 1
            );
            println!("   • Functions: {}", config.functions.len());
            println!("   • Edge Cache Enabled: {}", config.cache.enabled);
            println!();
            println!("🎉 Configuration is valid and ready to use!");
            Ok(())
        }
        Err(e) => {
            eprintln!("❌ Configuration validation failed:");
            eprintln!("{e}");
            println!();
            println!("💡 Common fixes:");
            println!("   • Ensure every target_origin_id names a declared origin");
            println!("   • Check that path patterns only use '*' and '?' wildcards");
            println!("   • Verify event_type is one of viewer-request, origin-request, origin-response, viewer-response");
            println!("   • Point origin_overrides at a local directory or an http(s) URL");
            std::process::exit(1);
        }
    }
}

/// Initialize a new configuration file
async fn init_config_command(config_path: &str) -> Result<()> {
    let path = Path::new(config_path);
    if path.exists() {
        eprintln!("❌ Error: Configuration file '{config_path}' already exists");
        std::process::exit(1);
    }

    let default_config = r#"# edgesim configuration

# The address the emulator listens on
listen_addr: "127.0.0.1:3000"

distribution:
  id: "EDGESIMDIST"
  domain_name: "localhost"
  origins:
    - id: "site"
      domain_name: "example-bucket.s3.amazonaws.com"
    - id: "api"
      domain_name: "api.example.com"
      origin_path: "/v1"
  default_behavior:
    target_origin_id: "site"
    default_ttl: 86400
  behaviors:
    - path_pattern: "/api/*"
      target_origin_id: "api"
      default_ttl: 0
      allowed_methods: ["GET", "HEAD", "OPTIONS", "PUT", "POST", "PATCH", "DELETE"]

# Physical location of each origin: a local directory or a base URL
origin_overrides:
  site: "./public"
  api: "http://localhost:8080"

# Edge functions bound to lifecycle stages
functions:
  - name: "security-headers"
    handler: "hooks/security-headers.yaml"
    events:
      - event_type: "viewer-response"
        path_pattern: "*"

cache:
  enabled: true
  dir: ".edgesim/cache"
  namespace: "edge-cache"
"#;

    tokio::fs::write(path, default_config)
        .await
        .context("Failed to write config file")?;
    println!("✅ Created default configuration at: {config_path}");
    println!("   Run 'edgesim serve --config {config_path}' to start the emulator");
    Ok(())
}
