//! Four-stage request lifecycle.
//!
//! [`Lifecycle::run`] drives one request through a single [`HookSet`]:
//!
//! ```text
//! viewer-request ──respond──────────────────────────────────────┐
//!      │ continue                                               │
//!  cache lookup ──hit (X-Cache: Hit)────────────────────────────┤
//!      │ miss                                                   │
//! origin-request ──respond──┐                                   │
//!      │ continue           │                                   │
//!  origin fetch             │                                   │
//!      │                    │                                   │
//! origin-response           │                                   │
//!      │                    │                                   │
//!  cache store ◄────────────┘                                   │
//!      │                                                        │
//! viewer-response (X-Cache: Miss) ◄─────────────────────────────┘
//! ```
//!
//! A short-circuit never skips viewer-response.
use tracing::Instrument;

use crate::{
    core::{
        error::{EdgeError, EdgeResult},
        event::{EdgeRequest, EdgeResponse, Event, EventConfig, Stage},
        hook_set::HookSet,
    },
    ports::{cache_store::CacheStore, hook::RequestOutcome},
    tracing_setup::create_stage_span,
};

/// Header injected on every response that went through the cache check.
pub const X_CACHE: &str = "X-Cache";
pub const CACHE_HIT: &str = "Hit";
pub const CACHE_MISS: &str = "Miss";

/// Per-router settings shared by every lifecycle run.
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// Operator override; `false` skips cache lookup and store.
    pub cache_enabled: bool,
    pub distribution_id: String,
    pub distribution_domain_name: String,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            cache_enabled: true,
            distribution_id: "EDGESIMDIST".to_string(),
            distribution_domain_name: "localhost".to_string(),
        }
    }
}

/// Whether a request stage let the pipeline carry on or produced a response.
enum Step {
    Continue(Event),
    Respond(Event),
}

/// Orchestrates one request through a hook set.
pub struct Lifecycle<'a> {
    hook_set: &'a HookSet,
    cache: &'a dyn CacheStore,
    options: &'a LifecycleOptions,
}

impl<'a> Lifecycle<'a> {
    pub fn new(
        hook_set: &'a HookSet,
        cache: &'a dyn CacheStore,
        options: &'a LifecycleOptions,
    ) -> Self {
        Self {
            hook_set,
            cache,
            options,
        }
    }

    /// Run the full pipeline and return the response for the client.
    pub async fn run(&self, request: EdgeRequest) -> EdgeResult<EdgeResponse> {
        let request_id = uuid::Uuid::new_v4().to_string();
        let span = tracing::info_span!(
            "lifecycle",
            request.id = %request_id,
            http.method = %request.method,
            http.path = %request.uri,
            hook_set = %self.hook_set.pattern().as_str(),
            cache = tracing::field::Empty,
        );
        self.run_pipeline(request, request_id)
            .instrument(span)
            .await
    }

    async fn run_pipeline(
        &self,
        mut request: EdgeRequest,
        request_id: String,
    ) -> EdgeResult<EdgeResponse> {
        request.origin = self.hook_set.origin().descriptor().cloned();
        let policy = self.hook_set.policy();

        if !policy.allows(&request.method) {
            tracing::info!("Rejecting {} request: method not allowed", request.method);
            return Err(EdgeError::MethodNotAllowed {
                method: request.method,
            });
        }

        let event = Event::new(
            EventConfig {
                event_type: Stage::ViewerRequest,
                distribution_id: self.options.distribution_id.clone(),
                distribution_domain_name: self.options.distribution_domain_name.clone(),
                request_id,
            },
            request,
        );

        let event = match self.request_stage(Stage::ViewerRequest, event).await? {
            Step::Respond(event) => {
                tracing::debug!("viewer-request short-circuited; skipping cache and origin");
                return self.viewer_response(event).await;
            }
            Step::Continue(event) => event,
        };

        let cache_key = event.request.uri_with_query();
        let cacheable = self.options.cache_enabled && policy.caches(&event.request.method);

        if cacheable {
            if let Some(entry) = self.cache.lookup(&cache_key).await? {
                tracing::Span::current().record("cache", CACHE_HIT);
                tracing::debug!("Cache hit for {}", cache_key);
                let mut event = event;
                let mut response = entry.to_response();
                response.headers.set(X_CACHE, CACHE_HIT);
                event.response = Some(response);
                let mut response = self.viewer_response(event).await?;
                response.headers.set(X_CACHE, CACHE_HIT);
                return Ok(response);
            }
            tracing::Span::current().record("cache", CACHE_MISS);
        }

        let event = match self.request_stage(Stage::OriginRequest, event).await? {
            Step::Respond(event) => {
                tracing::debug!("origin-request short-circuited; skipping origin fetch");
                event
            }
            Step::Continue(mut event) => {
                let origin = self.hook_set.origin();
                tracing::debug!(origin = %origin.kind(), "Fetching {} from origin", event.request.uri);
                event.response = Some(origin.fetch(&event.request).await);
                self.response_stage(Stage::OriginResponse, event).await?
            }
        };

        // HEAD responses carry no body; they may read a GET entry but never write one.
        let storable = cacheable && !event.request.method.eq_ignore_ascii_case("HEAD");
        if storable
            && let Some(response) = event.response.as_ref().filter(|r| r.is_success())
        {
            let entry = self.cache.store(&cache_key, response, policy).await?;
            tracing::debug!("Stored {} until {}", cache_key, entry.expire.to_rfc3339());
        }

        let mut response = self.viewer_response(event).await?;
        response.headers.set(X_CACHE, CACHE_MISS);
        Ok(response)
    }

    async fn request_stage(&self, stage: Stage, event: Event) -> EdgeResult<Step> {
        let binding = self.hook_set.request_hook(stage).ok_or_else(|| {
            EdgeError::InternalServerError(format!("{stage} is not a request stage"))
        })?;
        let ctx = binding.context(stage, &event.config.request_id);
        let event = event.at_stage(stage);
        let config = event.config.clone();
        let request = event.request.clone();

        let span = create_stage_span(stage.direction(), stage.as_str(), &binding.function_name);
        span.in_scope(|| {
            tracing::info!(
                "{} {} -> {}",
                stage.direction(),
                stage,
                binding.function_name
            )
        });
        let outcome = binding
            .handler
            .on_request(event, &ctx)
            .instrument(span.clone())
            .await
            .map_err(|e| EdgeError::hook(stage, e.to_string()))?;
        span.record(
            "outcome",
            if outcome.is_response() {
                "respond"
            } else {
                "continue"
            },
        );

        Ok(match outcome {
            RequestOutcome::Continue(request) => Step::Continue(Event {
                config,
                request,
                response: None,
            }),
            RequestOutcome::Respond(response) => Step::Respond(Event {
                config,
                request,
                response: Some(response),
            }),
        })
    }

    async fn response_stage(&self, stage: Stage, event: Event) -> EdgeResult<Event> {
        let binding = self.hook_set.response_hook(stage).ok_or_else(|| {
            EdgeError::InternalServerError(format!("{stage} is not a response stage"))
        })?;
        if event.response.is_none() {
            return Err(EdgeError::InternalServerError(format!(
                "no response available for {stage}"
            )));
        }
        let ctx = binding.context(stage, &event.config.request_id);
        let event = event.at_stage(stage);
        let config = event.config.clone();
        let request = event.request.clone();

        let span = create_stage_span(stage.direction(), stage.as_str(), &binding.function_name);
        span.in_scope(|| {
            tracing::info!(
                "{} {} -> {}",
                stage.direction(),
                stage,
                binding.function_name
            )
        });
        let response = binding
            .handler
            .on_response(event, &ctx)
            .instrument(span.clone())
            .await
            .map_err(|e| EdgeError::hook(stage, e.to_string()))?;
        span.record("outcome", response.status);

        Ok(Event {
            config,
            request,
            response: Some(response),
        })
    }

    async fn viewer_response(&self, event: Event) -> EdgeResult<EdgeResponse> {
        self.response_stage(Stage::ViewerResponse, event)
            .await?
            .response
            .ok_or_else(|| EdgeError::InternalServerError("missing final response".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use async_trait::async_trait;
    use tempfile::TempDir;

    use super::*;
    use crate::{
        adapters::FileCacheStore,
        core::{
            origin::{OriginDescriptor, OriginKind},
            pattern::PathPattern,
            policy::CachePolicy,
        },
        ports::{
            cache_store::{CacheEntry, CacheStoreResult},
            hook::{
                Hook, HookContext, HookError, HookResult, RequestHook, ResponseHook,
                callback_request_hook,
            },
            origin::Origin,
        },
    };

    /// Origin that counts fetches and echoes the URI.
    struct CountingOrigin {
        fetches: AtomicUsize,
        descriptor: OriginDescriptor,
    }

    impl CountingOrigin {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                fetches: AtomicUsize::new(0),
                descriptor: OriginDescriptor::new(
                    "site",
                    "example.com",
                    "",
                    Default::default(),
                    Some("http://example.com"),
                ),
            })
        }
    }

    #[async_trait]
    impl Origin for CountingOrigin {
        fn kind(&self) -> OriginKind {
            OriginKind::Http
        }

        fn descriptor(&self) -> Option<&OriginDescriptor> {
            Some(&self.descriptor)
        }

        async fn fetch(&self, request: &EdgeRequest) -> EdgeResponse {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            EdgeResponse::ok(format!("origin:{}", request.uri))
                .with_header("Cache-Control", "max-age=120")
        }
    }

    /// Cache wrapper counting lookups and stores.
    struct CountingCache {
        inner: FileCacheStore,
        lookups: AtomicUsize,
        stores: AtomicUsize,
    }

    #[async_trait]
    impl CacheStore for CountingCache {
        async fn lookup(&self, uri: &str) -> CacheStoreResult<Option<CacheEntry>> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            self.inner.lookup(uri).await
        }

        async fn store(
            &self,
            uri: &str,
            response: &EdgeResponse,
            policy: &CachePolicy,
        ) -> CacheStoreResult<CacheEntry> {
            self.stores.fetch_add(1, Ordering::SeqCst);
            self.inner.store(uri, response, policy).await
        }

        async fn purge(&self) -> CacheStoreResult<()> {
            self.inner.purge().await
        }

        async fn close(&self) -> CacheStoreResult<()> {
            self.inner.close().await
        }
    }

    /// Request hook that answers directly.
    struct Responder;

    #[async_trait]
    impl RequestHook for Responder {
        async fn on_request(
            &self,
            _event: Event,
            _ctx: &HookContext,
        ) -> HookResult<RequestOutcome> {
            Ok(RequestOutcome::Respond(
                EdgeResponse::new(403).with_body("denied"),
            ))
        }
    }

    /// Response hook tagging the body with its stage and counting calls.
    #[derive(Default)]
    struct Tagger {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ResponseHook for Tagger {
        async fn on_response(&self, event: Event, ctx: &HookContext) -> HookResult<EdgeResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut response = event.response.ok_or(HookError::NoResult)?;
            response.body = format!("{}|{}", response.body, ctx.stage);
            Ok(response)
        }
    }

    struct Failing;

    #[async_trait]
    impl RequestHook for Failing {
        async fn on_request(
            &self,
            _event: Event,
            _ctx: &HookContext,
        ) -> HookResult<RequestOutcome> {
            Err(HookError::Failed("exploded".into()))
        }
    }

    struct Fixture {
        _dir: TempDir,
        cache: CountingCache,
        origin: Arc<CountingOrigin>,
        options: LifecycleOptions,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let inner = FileCacheStore::open(dir.path(), "test").unwrap();
            Self {
                _dir: dir,
                cache: CountingCache {
                    inner,
                    lookups: AtomicUsize::new(0),
                    stores: AtomicUsize::new(0),
                },
                origin: CountingOrigin::new(),
                options: LifecycleOptions::default(),
            }
        }

        fn hook_set(&self) -> HookSet {
            HookSet::new(
                PathPattern::new("*").unwrap(),
                "site",
                self.origin.clone(),
                CachePolicy::default(),
            )
        }

        fn fetches(&self) -> usize {
            self.origin.fetches.load(Ordering::SeqCst)
        }
    }

    #[tokio::test]
    async fn test_disallowed_method_fails_before_any_hook() {
        let fx = Fixture::new();
        let tagger = Arc::new(Tagger::default());
        let set = fx
            .hook_set()
            .with_hook(
                Stage::ViewerResponse,
                "tagger",
                "builtin:tagger",
                Hook::Response(tagger.clone()),
            )
            .unwrap();

        let err = Lifecycle::new(&set, &fx.cache, &fx.options)
            .run(EdgeRequest::new("POST", "/form"))
            .await
            .unwrap_err();

        assert_eq!(
            err,
            EdgeError::MethodNotAllowed {
                method: "POST".into()
            }
        );
        assert_eq!(tagger.calls.load(Ordering::SeqCst), 0);
        assert_eq!(fx.cache.lookups.load(Ordering::SeqCst), 0);
        assert_eq!(fx.fetches(), 0);
    }

    #[tokio::test]
    async fn test_viewer_request_short_circuit_skips_cache_and_origin() {
        let fx = Fixture::new();
        let tagger = Arc::new(Tagger::default());
        let set = fx
            .hook_set()
            .with_hook(
                Stage::ViewerRequest,
                "deny",
                "builtin:deny",
                Hook::Request(Arc::new(Responder)),
            )
            .unwrap()
            .with_hook(
                Stage::ViewerResponse,
                "tagger",
                "builtin:tagger",
                Hook::Response(tagger.clone()),
            )
            .unwrap();

        let response = Lifecycle::new(&set, &fx.cache, &fx.options)
            .run(EdgeRequest::new("GET", "/secret"))
            .await
            .unwrap();

        assert_eq!(response.status, 403);
        assert_eq!(response.body, "denied|viewer-response");
        assert!(!response.headers.contains(X_CACHE));
        assert_eq!(tagger.calls.load(Ordering::SeqCst), 1);
        assert_eq!(fx.cache.lookups.load(Ordering::SeqCst), 0);
        assert_eq!(fx.cache.stores.load(Ordering::SeqCst), 0);
        assert_eq!(fx.fetches(), 0);
    }

    #[tokio::test]
    async fn test_miss_then_hit() {
        let fx = Fixture::new();
        let set = fx.hook_set();
        let lifecycle = Lifecycle::new(&set, &fx.cache, &fx.options);

        let first = lifecycle.run(EdgeRequest::new("GET", "/a.txt")).await.unwrap();
        assert_eq!(first.headers.get(X_CACHE), Some(CACHE_MISS));
        assert_eq!(first.body, "origin:/a.txt");
        assert_eq!(fx.cache.stores.load(Ordering::SeqCst), 1);

        let second = lifecycle.run(EdgeRequest::new("GET", "/a.txt")).await.unwrap();
        assert_eq!(second.headers.get(X_CACHE), Some(CACHE_HIT));
        assert_eq!(second.body, "origin:/a.txt");
        assert_eq!(fx.fetches(), 1);
    }

    #[tokio::test]
    async fn test_origin_response_runs_only_after_fetch() {
        let fx = Fixture::new();
        let origin_tagger = Arc::new(Tagger::default());
        let set = fx
            .hook_set()
            .with_hook(
                Stage::OriginResponse,
                "tagger",
                "builtin:tagger",
                Hook::Response(origin_tagger.clone()),
            )
            .unwrap();

        let response = Lifecycle::new(&set, &fx.cache, &fx.options)
            .run(EdgeRequest::new("GET", "/x"))
            .await
            .unwrap();
        assert_eq!(response.body, "origin:/x|origin-response");
        assert_eq!(origin_tagger.calls.load(Ordering::SeqCst), 1);

        // Cached copy already carries the origin-response transform.
        let response = Lifecycle::new(&set, &fx.cache, &fx.options)
            .run(EdgeRequest::new("GET", "/x"))
            .await
            .unwrap();
        assert_eq!(response.body, "origin:/x|origin-response");
        assert_eq!(origin_tagger.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_origin_request_short_circuit_skips_fetch_but_is_cached() {
        let fx = Fixture::new();
        let origin_tagger = Arc::new(Tagger::default());
        let generated = callback_request_hook(|_event, _ctx, callback| {
            callback.done(Ok(RequestOutcome::Respond(EdgeResponse::ok("generated"))));
        });
        let set = fx
            .hook_set()
            .with_hook(
                Stage::OriginRequest,
                "gen",
                "builtin:gen",
                Hook::Request(generated),
            )
            .unwrap()
            .with_hook(
                Stage::OriginResponse,
                "tagger",
                "builtin:tagger",
                Hook::Response(origin_tagger.clone()),
            )
            .unwrap();

        let response = Lifecycle::new(&set, &fx.cache, &fx.options)
            .run(EdgeRequest::new("GET", "/gen"))
            .await
            .unwrap();

        assert_eq!(response.body, "generated");
        assert_eq!(response.headers.get(X_CACHE), Some(CACHE_MISS));
        assert_eq!(fx.fetches(), 0);
        assert_eq!(origin_tagger.calls.load(Ordering::SeqCst), 0);
        assert_eq!(fx.cache.stores.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_operator_override_disables_cache() {
        let mut fx = Fixture::new();
        fx.options.cache_enabled = false;
        let set = fx.hook_set();
        let lifecycle = Lifecycle::new(&set, &fx.cache, &fx.options);

        lifecycle.run(EdgeRequest::new("GET", "/a")).await.unwrap();
        let response = lifecycle.run(EdgeRequest::new("GET", "/a")).await.unwrap();

        assert_eq!(response.headers.get(X_CACHE), Some(CACHE_MISS));
        assert_eq!(fx.cache.lookups.load(Ordering::SeqCst), 0);
        assert_eq!(fx.cache.stores.load(Ordering::SeqCst), 0);
        assert_eq!(fx.fetches(), 2);
    }

    #[tokio::test]
    async fn test_uncached_method_goes_to_origin() {
        let fx = Fixture::new();
        let set = HookSet::new(
            PathPattern::new("*").unwrap(),
            "site",
            fx.origin.clone(),
            CachePolicy {
                allowed_methods: vec!["GET".into(), "POST".into()],
                ..CachePolicy::default()
            },
        );

        let response = Lifecycle::new(&set, &fx.cache, &fx.options)
            .run(EdgeRequest::new("POST", "/submit"))
            .await
            .unwrap();

        assert_eq!(response.headers.get(X_CACHE), Some(CACHE_MISS));
        assert_eq!(fx.cache.lookups.load(Ordering::SeqCst), 0);
        assert_eq!(fx.fetches(), 1);
    }

    #[tokio::test]
    async fn test_head_reads_but_never_writes_the_cache() {
        let fx = Fixture::new();
        let set = fx.hook_set();
        let lifecycle = Lifecycle::new(&set, &fx.cache, &fx.options);

        let head = lifecycle.run(EdgeRequest::new("HEAD", "/doc")).await.unwrap();
        assert_eq!(head.headers.get(X_CACHE), Some(CACHE_MISS));
        assert_eq!(fx.cache.stores.load(Ordering::SeqCst), 0);

        lifecycle.run(EdgeRequest::new("GET", "/doc")).await.unwrap();
        assert_eq!(fx.cache.stores.load(Ordering::SeqCst), 1);

        let head = lifecycle.run(EdgeRequest::new("HEAD", "/doc")).await.unwrap();
        assert_eq!(head.headers.get(X_CACHE), Some(CACHE_HIT));
        assert_eq!(fx.fetches(), 2);
    }

    #[tokio::test]
    async fn test_origin_descriptor_is_attached() {
        let fx = Fixture::new();
        let seen = Arc::new(std::sync::Mutex::new(None));
        let seen_in_hook = seen.clone();
        let inspector = callback_request_hook(move |event, _ctx, callback| {
            *seen_in_hook.lock().unwrap() = event.request.origin.clone();
            callback.done(Ok(RequestOutcome::Continue(event.request)));
        });
        let set = fx
            .hook_set()
            .with_hook(
                Stage::ViewerRequest,
                "inspect",
                "builtin:inspect",
                Hook::Request(inspector),
            )
            .unwrap();

        Lifecycle::new(&set, &fx.cache, &fx.options)
            .run(EdgeRequest::new("GET", "/"))
            .await
            .unwrap();

        let origin = seen.lock().unwrap().clone().unwrap();
        assert_eq!(origin.domain_name, "example.com");
    }

    #[tokio::test]
    async fn test_hook_errors_propagate() {
        let fx = Fixture::new();
        let set = fx
            .hook_set()
            .with_hook(
                Stage::ViewerRequest,
                "bad",
                "builtin:bad",
                Hook::Request(Arc::new(Failing)),
            )
            .unwrap();

        let err = Lifecycle::new(&set, &fx.cache, &fx.options)
            .run(EdgeRequest::new("GET", "/"))
            .await
            .unwrap_err();

        assert_eq!(err, EdgeError::hook(Stage::ViewerRequest, "exploded"));
        assert_eq!(fx.fetches(), 0);
    }

    #[tokio::test]
    async fn test_query_string_is_part_of_cache_key() {
        let fx = Fixture::new();
        let set = fx.hook_set();
        let lifecycle = Lifecycle::new(&set, &fx.cache, &fx.options);

        lifecycle
            .run(EdgeRequest::new("GET", "/q").with_querystring("a=1"))
            .await
            .unwrap();
        let response = lifecycle
            .run(EdgeRequest::new("GET", "/q").with_querystring("a=2"))
            .await
            .unwrap();

        assert_eq!(response.headers.get(X_CACHE), Some(CACHE_MISS));
        assert_eq!(fx.fetches(), 2);
    }
}
