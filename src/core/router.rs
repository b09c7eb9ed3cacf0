//! Path-based routing of requests to hook sets.
//!
//! The router owns one generation of hook sets at a time. A rebuild takes the
//! write side of the gate for its whole duration, so requests arriving
//! mid-rebuild wait and then see the new generation. Requests already holding
//! an `Arc<HookSet>` finish against the generation they were routed with.
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::RwLock;

use crate::{
    config::models::{SimulatorConfig, WILDCARD_PATTERN},
    core::{
        error::{EdgeError, EdgeResult},
        event::{EdgeRequest, EdgeResponse},
        hook_set::HookSet,
        lifecycle::{Lifecycle, LifecycleOptions},
        origin::OriginDescriptor,
        pattern::PathPattern,
    },
    ports::{
        cache_store::{CacheStore, CacheStoreResult},
        hook::{HookError, HookSource},
        origin::{Origin, OriginFactory},
    },
};

/// Reasons a rebuild can fail; the previous generation stays active.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum RouterError {
    #[error("invalid path pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("function '{function}': {source}")]
    HookLoad {
        function: String,
        #[source]
        source: HookError,
    },

    #[error("function '{function}': {source}")]
    HookBinding {
        function: String,
        #[source]
        source: EdgeError,
    },
}

/// One published set of hook sets plus the options they run with.
#[derive(Debug)]
struct Generation {
    number: u64,
    hook_sets: Vec<Arc<HookSet>>,
    options: LifecycleOptions,
}

impl Generation {
    fn empty() -> Self {
        Self {
            number: 0,
            hook_sets: Vec::new(),
            options: LifecycleOptions::default(),
        }
    }

    fn route(&self, path: &str) -> Option<Arc<HookSet>> {
        self.hook_sets
            .iter()
            .filter(|set| !set.pattern().is_wildcard())
            .find(|set| set.matches(path))
            .or_else(|| {
                self.hook_sets
                    .iter()
                    .find(|set| set.pattern().is_wildcard())
            })
            .cloned()
    }
}

/// A pattern discovered while scanning the configuration, before loading hooks.
struct Draft {
    pattern: String,
    origin_id: Option<String>,
}

pub struct Router {
    cache: Arc<dyn CacheStore>,
    hooks: Arc<dyn HookSource>,
    origins: Arc<dyn OriginFactory>,
    current: RwLock<Arc<Generation>>,
}

impl Router {
    /// Create a router with no hook sets; call [`Router::rebuild`] before serving.
    pub fn new(
        cache: Arc<dyn CacheStore>,
        hooks: Arc<dyn HookSource>,
        origins: Arc<dyn OriginFactory>,
    ) -> Self {
        Self {
            cache,
            hooks,
            origins,
            current: RwLock::new(Arc::new(Generation::empty())),
        }
    }

    /// Replace every hook set from `config`.
    ///
    /// Returns the new generation number. On error nothing is published.
    pub async fn rebuild(&self, config: &SimulatorConfig) -> Result<u64, RouterError> {
        let mut current = self.current.write().await;
        tracing::info!("Rebuilding routes (generation {})", current.number + 1);

        self.hooks.invalidate().await;

        let mut hook_sets: Vec<HookSet> = Vec::new();
        for draft in drafts(config) {
            let origin = self.origin_for(config, draft.origin_id.as_deref());
            let policy = config
                .behavior(&draft.pattern)
                .map(|b| b.policy())
                .unwrap_or_default();
            let pattern =
                PathPattern::new(&draft.pattern).map_err(|source| RouterError::InvalidPattern {
                    pattern: draft.pattern.clone(),
                    source,
                })?;
            let name = draft.origin_id.unwrap_or_else(|| draft.pattern.clone());
            hook_sets.push(HookSet::new(pattern, name, origin, policy));
        }

        for function in &config.functions {
            for binding in &function.events {
                let Some(set) = hook_sets
                    .iter_mut()
                    .find(|set| set.pattern().as_str() == binding.path_pattern.trim())
                else {
                    continue;
                };

                let hook = self
                    .hooks
                    .load(&function.handler, binding.event_type)
                    .await
                    .map_err(|source| RouterError::HookLoad {
                        function: function.name.clone(),
                        source,
                    })?;

                if let Some(existing) = set
                    .request_hook(binding.event_type)
                    .map(|b| (b.is_passthrough(), b.function_name.clone()))
                    .or_else(|| {
                        set.response_hook(binding.event_type)
                            .map(|b| (b.is_passthrough(), b.function_name.clone()))
                    })
                    .filter(|(passthrough, _)| !passthrough)
                    .map(|(_, name)| name)
                {
                    tracing::warn!(
                        "{} on '{}' is bound by both '{}' and '{}'; the latter wins",
                        binding.event_type,
                        binding.path_pattern,
                        existing,
                        function.name
                    );
                }

                set.set_hook(
                    binding.event_type,
                    function.name.clone(),
                    function.handler.clone(),
                    hook,
                )
                .map_err(|source| RouterError::HookBinding {
                    function: function.name.clone(),
                    source,
                })?;
            }
        }

        for set in &hook_sets {
            tracing::debug!(
                "Hook set '{}' -> {} origin, stages {:?}",
                set.pattern().as_str(),
                set.origin().kind(),
                set.configured_stages()
            );
        }

        let next = Generation {
            number: current.number + 1,
            hook_sets: hook_sets.into_iter().map(Arc::new).collect(),
            options: LifecycleOptions {
                cache_enabled: config.cache.enabled,
                distribution_id: config.distribution.id.clone(),
                distribution_domain_name: config.distribution.domain_name.clone(),
            },
        };
        tracing::info!(
            "Published generation {} with {} hook sets",
            next.number,
            next.hook_sets.len()
        );
        let number = next.number;
        *current = Arc::new(next);
        Ok(number)
    }

    /// Hook set for `path`: first matching explicit pattern, else the wildcard.
    pub async fn route(&self, path: &str) -> Option<Arc<HookSet>> {
        self.current.read().await.route(path)
    }

    /// Route and run one request through its hook set's lifecycle.
    pub async fn handle(&self, request: EdgeRequest) -> EdgeResult<EdgeResponse> {
        let generation = self.current.read().await.clone();
        let hook_set = generation.route(&request.uri).ok_or_else(|| {
            EdgeError::NotFound(format!("No hook set matches {}", request.uri))
        })?;

        Lifecycle::new(&hook_set, self.cache.as_ref(), &generation.options)
            .run(request)
            .await
    }

    pub async fn generation(&self) -> u64 {
        self.current.read().await.number
    }

    /// Patterns of the current generation in routing order.
    pub async fn patterns(&self) -> Vec<String> {
        self.current
            .read()
            .await
            .hook_sets
            .iter()
            .map(|set| set.pattern().as_str().to_string())
            .collect()
    }

    pub fn cache(&self) -> &Arc<dyn CacheStore> {
        &self.cache
    }

    pub async fn purge(&self) -> CacheStoreResult<()> {
        self.cache.purge().await
    }

    pub async fn close(&self) -> CacheStoreResult<()> {
        self.cache.close().await
    }

    fn origin_for(&self, config: &SimulatorConfig, origin_id: Option<&str>) -> Arc<dyn Origin> {
        let Some(origin_id) = origin_id else {
            return self.origins.create(None, None);
        };

        let base = config.origin_overrides.get(origin_id).cloned();
        let descriptor = match config.origin(origin_id) {
            Some(origin) => OriginDescriptor::new(
                &origin.id,
                &origin.domain_name,
                &origin.origin_path,
                origin.custom_headers.clone(),
                base.as_deref(),
            ),
            None => {
                tracing::warn!("Origin '{}' is not declared by the distribution", origin_id);
                OriginDescriptor::new(
                    origin_id,
                    "",
                    "",
                    Default::default(),
                    base.as_deref(),
                )
            }
        };
        self.origins.create(Some(descriptor), base)
    }
}

/// Distinct patterns in routing order: function bindings first, then
/// behaviors no function binds, then the wildcard if still missing.
fn drafts(config: &SimulatorConfig) -> Vec<Draft> {
    let mut drafts: Vec<Draft> = Vec::new();

    let behavior_origin = |pattern: &str| {
        config
            .behavior(pattern)
            .and_then(|b| b.target_origin_id.clone())
            .or_else(|| config.distribution.default_behavior.target_origin_id.clone())
    };

    for function in &config.functions {
        for binding in &function.events {
            let pattern = binding.path_pattern.trim();
            match drafts.iter_mut().find(|d| d.pattern == pattern) {
                Some(draft) => {
                    if draft.origin_id.is_none() {
                        draft.origin_id = binding.origin_id.clone();
                    }
                }
                None => drafts.push(Draft {
                    pattern: pattern.to_string(),
                    origin_id: binding.origin_id.clone(),
                }),
            }
        }
    }
    for draft in &mut drafts {
        if draft.origin_id.is_none() {
            draft.origin_id = behavior_origin(&draft.pattern);
        }
    }

    for behavior in &config.distribution.behaviors {
        let pattern = behavior.path_pattern.trim();
        if !drafts.iter().any(|d| d.pattern == pattern) {
            drafts.push(Draft {
                pattern: pattern.to_string(),
                origin_id: behavior_origin(pattern),
            });
        }
    }

    if !drafts.iter().any(|d| d.pattern == WILDCARD_PATTERN) {
        drafts.push(Draft {
            pattern: WILDCARD_PATTERN.to_string(),
            origin_id: config.distribution.default_behavior.target_origin_id.clone(),
        });
    }

    drafts
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tempfile::TempDir;

    use super::*;
    use crate::{
        adapters::{FileCacheStore, HookLoader, HttpClientAdapter, OriginResolverFactory},
        config::models::{BehaviorConfig, CacheConfig, EventBindingConfig, OriginConfig},
        core::{event::Stage, lifecycle::X_CACHE, origin::OriginKind},
        ports::hook::{RequestOutcome, callback_request_hook, callback_response_hook},
    };

    struct Fixture {
        _cache_dir: TempDir,
        site: TempDir,
        loader: HookLoader,
        router: Router,
    }

    async fn fixture() -> Fixture {
        let cache_dir = TempDir::new().unwrap();
        let site = TempDir::new().unwrap();
        std::fs::create_dir_all(site.path().join("images")).unwrap();
        std::fs::write(site.path().join("images/foo.png"), [0x89u8, b'P', b'N', b'G']).unwrap();
        std::fs::write(site.path().join("index.html"), "<h1>home</h1>").unwrap();

        let loader = HookLoader::new();
        loader
            .register_response(
                "tag",
                callback_response_hook(|event, ctx, callback| {
                    let response = event
                        .response
                        .map(|r| r.with_header("X-Hook-Set", ctx.function_name.clone()));
                    callback.done(response.ok_or(HookError::NoResult));
                }),
            )
            .await;
        loader
            .register_request(
                "deny",
                callback_request_hook(|_event, _ctx, callback| {
                    callback.done(Ok(RequestOutcome::Respond(
                        EdgeResponse::new(403).with_body("denied"),
                    )));
                }),
            )
            .await;

        let cache = FileCacheStore::open(cache_dir.path(), "edge-cache").unwrap();
        let router = Router::new(
            Arc::new(cache),
            Arc::new(loader.clone()),
            Arc::new(OriginResolverFactory::new(Arc::new(
                HttpClientAdapter::new().unwrap(),
            ))),
        );

        Fixture {
            _cache_dir: cache_dir,
            site,
            loader,
            router,
        }
    }

    fn config(site: &TempDir) -> SimulatorConfig {
        SimulatorConfig::builder()
            .origin(
                OriginConfig::new("site", "example.com"),
                site.path().to_str(),
            )
            .default_behavior(BehaviorConfig {
                target_origin_id: Some("site".into()),
                ..BehaviorConfig::default()
            })
            .behavior(BehaviorConfig {
                min_ttl: 60,
                max_ttl: 300,
                ..BehaviorConfig::for_pattern("/images/*")
            })
            .function(
                "images",
                "builtin:tag",
                vec![EventBindingConfig::new(Stage::ViewerResponse, "/images/*")],
            )
            .function(
                "site",
                "builtin:tag",
                vec![EventBindingConfig::new(Stage::ViewerResponse, "*")],
            )
            .cache(CacheConfig::default())
            .build()
    }

    #[tokio::test]
    async fn test_routes_prefer_explicit_patterns() {
        let f = fixture().await;
        f.router.rebuild(&config(&f.site)).await.unwrap();

        let images = f.router.route("/images/foo.png").await.unwrap();
        assert_eq!(images.pattern().as_str(), "/images/*");
        assert_eq!(images.policy().max_ttl, 300);
        assert_eq!(images.origin().kind(), OriginKind::File);

        let fallback = f.router.route("/about?x=1").await.unwrap();
        assert!(fallback.pattern().is_wildcard());
        assert_eq!(f.router.patterns().await, vec!["/images/*", "*"]);
    }

    #[tokio::test]
    async fn test_handle_runs_matching_hook_set() {
        let f = fixture().await;
        f.router.rebuild(&config(&f.site)).await.unwrap();

        let response = f
            .router
            .handle(EdgeRequest::new("GET", "/images/foo.png"))
            .await
            .unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.headers.get("x-hook-set"), Some("images"));
        assert_eq!(response.headers.get(X_CACHE), Some("Miss"));
        assert_eq!(response.body_bytes().unwrap(), vec![0x89, b'P', b'N', b'G']);

        let response = f
            .router
            .handle(EdgeRequest::new("GET", "/images/foo.png"))
            .await
            .unwrap();
        assert_eq!(response.headers.get(X_CACHE), Some("Hit"));

        let response = f
            .router
            .handle(EdgeRequest::new("GET", "/index.html"))
            .await
            .unwrap();
        assert_eq!(response.headers.get("x-hook-set"), Some("site"));
        assert_eq!(response.body, "<h1>home</h1>");
    }

    #[tokio::test]
    async fn test_wildcard_is_created_when_unconfigured() {
        let f = fixture().await;
        let config = SimulatorConfig::builder()
            .function(
                "deny",
                "builtin:deny",
                vec![EventBindingConfig::new(Stage::ViewerRequest, "/admin/*")],
            )
            .build();
        f.router.rebuild(&config).await.unwrap();

        assert_eq!(f.router.patterns().await, vec!["/admin/*", "*"]);

        let response = f
            .router
            .handle(EdgeRequest::new("GET", "/admin/users"))
            .await
            .unwrap();
        assert_eq!(response.status, 403);
        assert!(!response.headers.contains(X_CACHE));

        // The auto-created wildcard has no origin at all.
        let response = f
            .router
            .handle(EdgeRequest::new("GET", "/elsewhere"))
            .await
            .unwrap();
        assert_eq!(response.status, 404);
    }

    #[tokio::test]
    async fn test_unbound_behaviors_get_passthrough_sets() {
        let f = fixture().await;
        let mut config = config(&f.site);
        config
            .distribution
            .behaviors
            .push(BehaviorConfig::for_pattern("/static/*"));
        f.router.rebuild(&config).await.unwrap();

        assert_eq!(
            f.router.patterns().await,
            vec!["/images/*", "*", "/static/*"]
        );
        let set = f.router.route("/static/app.js").await.unwrap();
        assert!(set.configured_stages().is_empty());
        assert_eq!(set.origin().kind(), OriginKind::File);
    }

    #[tokio::test]
    async fn test_failed_rebuild_keeps_previous_generation() {
        let f = fixture().await;
        assert_eq!(f.router.rebuild(&config(&f.site)).await.unwrap(), 1);

        let broken = SimulatorConfig::builder()
            .function(
                "missing",
                "builtin:missing",
                vec![EventBindingConfig::new(Stage::ViewerRequest, "*")],
            )
            .build();
        let err = f.router.rebuild(&broken).await.unwrap_err();
        assert!(matches!(err, RouterError::HookLoad { .. }));

        assert_eq!(f.router.generation().await, 1);
        assert_eq!(f.router.patterns().await, vec!["/images/*", "*"]);
    }

    #[tokio::test]
    async fn test_in_flight_hook_sets_survive_rebuild() {
        let f = fixture().await;
        f.router.rebuild(&config(&f.site)).await.unwrap();
        let routed = f.router.route("/images/foo.png").await.unwrap();

        let reduced = SimulatorConfig::builder().build();
        assert_eq!(f.router.rebuild(&reduced).await.unwrap(), 2);

        assert_eq!(routed.pattern().as_str(), "/images/*");
        assert_eq!(routed.configured_stages(), vec![Stage::ViewerResponse]);
        let fresh = f.router.route("/images/foo.png").await.unwrap();
        assert!(fresh.pattern().is_wildcard());
    }

    #[tokio::test]
    async fn test_requests_wait_for_rebuild() {
        let f = fixture().await;
        let router = Arc::new(f.router);
        router.rebuild(&config(&f.site)).await.unwrap();

        let gate = router.current.write().await;
        let waiting = tokio::spawn({
            let router = router.clone();
            async move { router.route("/images/foo.png").await.is_some() }
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiting.is_finished());

        drop(gate);
        assert!(waiting.await.unwrap());
        assert_eq!(f.loader.cached_modules(), 0);
    }

    #[tokio::test]
    async fn test_no_hook_sets_is_not_found() {
        let f = fixture().await;
        let err = f
            .router
            .handle(EdgeRequest::new("GET", "/"))
            .await
            .unwrap_err();
        assert!(matches!(err, EdgeError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_purge_clears_cached_responses() {
        let f = fixture().await;
        f.router.rebuild(&config(&f.site)).await.unwrap();

        f.router
            .handle(EdgeRequest::new("GET", "/index.html"))
            .await
            .unwrap();
        assert!(f.router.cache().lookup("/index.html").await.unwrap().is_some());

        f.router.purge().await.unwrap();
        assert!(f.router.cache().lookup("/index.html").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_head_does_not_replace_cached_get_body() {
        let app = axum::Router::new().route(
            "/page",
            axum::routing::get(|| async { "full page body" }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let f = fixture().await;
        let config = SimulatorConfig::builder()
            .origin(
                OriginConfig::new("api", "api.example.com"),
                Some(format!("http://{addr}").as_str()),
            )
            .default_behavior(BehaviorConfig {
                target_origin_id: Some("api".into()),
                ..BehaviorConfig::default()
            })
            .build();
        f.router.rebuild(&config).await.unwrap();

        let head = f
            .router
            .handle(EdgeRequest::new("HEAD", "/page"))
            .await
            .unwrap();
        assert_eq!(head.status, 200);
        assert_eq!(head.headers.get(X_CACHE), Some("Miss"));
        assert!(f.router.cache().lookup("/page").await.unwrap().is_none());

        let get = f
            .router
            .handle(EdgeRequest::new("GET", "/page"))
            .await
            .unwrap();
        assert_eq!(get.headers.get(X_CACHE), Some("Miss"));
        assert_eq!(get.body, "full page body");

        let get = f
            .router
            .handle(EdgeRequest::new("GET", "/page"))
            .await
            .unwrap();
        assert_eq!(get.headers.get(X_CACHE), Some("Hit"));
        assert_eq!(get.body, "full page body");

        // A HEAD may still be answered from the GET entry.
        let head = f
            .router
            .handle(EdgeRequest::new("HEAD", "/page"))
            .await
            .unwrap();
        assert_eq!(head.headers.get(X_CACHE), Some("Hit"));
    }
}
