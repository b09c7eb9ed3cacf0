use std::{marker::PhantomData, sync::Arc};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::oneshot;

use crate::core::event::{EdgeRequest, EdgeResponse, Event, Stage};

/// Error type for hook execution
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum HookError {
    /// The hook reported a failure
    #[error("{0}")]
    Failed(String),

    /// A callback-style hook finished without invoking its callback
    #[error("hook completed without producing a result")]
    NoResult,

    /// The hook could not be loaded from its location
    #[error("failed to load hook from '{location}': {message}")]
    Load { location: String, message: String },
}

/// Result type for hook execution
pub type HookResult<T> = Result<T, HookError>;

/// What a request-stage hook hands back.
///
/// Deserialization tries the response shape first: anything carrying a
/// `status` is a response and short-circuits the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestOutcome {
    Respond(EdgeResponse),
    Continue(EdgeRequest),
}

impl RequestOutcome {
    pub fn is_response(&self) -> bool {
        matches!(self, RequestOutcome::Respond(_))
    }
}

/// Per-invocation context handed to hooks.
#[derive(Debug, Clone)]
pub struct HookContext {
    pub function_name: String,
    pub location: String,
    pub request_id: String,
    pub stage: Stage,
}

/// Hook consuming a request event (viewer-request, origin-request).
#[async_trait]
pub trait RequestHook: Send + Sync + 'static {
    async fn on_request(&self, event: Event, ctx: &HookContext) -> HookResult<RequestOutcome>;
}

/// Hook consuming a response event (origin-response, viewer-response).
#[async_trait]
pub trait ResponseHook: Send + Sync + 'static {
    async fn on_response(&self, event: Event, ctx: &HookContext) -> HookResult<EdgeResponse>;
}

/// A loaded hook in one of its two capability shapes.
#[derive(Clone)]
pub enum Hook {
    Request(Arc<dyn RequestHook>),
    Response(Arc<dyn ResponseHook>),
}

impl Hook {
    pub fn shape(&self) -> &'static str {
        match self {
            Hook::Request(_) => "request",
            Hook::Response(_) => "response",
        }
    }
}

impl std::fmt::Debug for Hook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Hook::{}", self.shape())
    }
}

/// Source of hooks by location, consulted when the router rebuilds.
#[async_trait]
pub trait HookSource: Send + Sync + 'static {
    /// Load the handler at `location` in the shape `stage` requires
    async fn load(&self, location: &str, stage: Stage) -> HookResult<Hook>;

    /// Drop anything cached from earlier loads
    async fn invalidate(&self);
}

/// Identity hook used for unconfigured slots.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughHook;

#[async_trait]
impl RequestHook for PassthroughHook {
    async fn on_request(&self, event: Event, _ctx: &HookContext) -> HookResult<RequestOutcome> {
        Ok(RequestOutcome::Continue(event.request))
    }
}

#[async_trait]
impl ResponseHook for PassthroughHook {
    async fn on_response(&self, event: Event, _ctx: &HookContext) -> HookResult<EdgeResponse> {
        event.response.ok_or(HookError::NoResult)
    }
}

/// Completion handle for callback-style hooks: call [`Callback::done`] exactly once.
pub struct Callback<T> {
    tx: oneshot::Sender<HookResult<T>>,
}

impl<T> Callback<T> {
    pub fn done(self, result: HookResult<T>) {
        // Receiver gone means the pipeline already gave up on this hook.
        let _ = self.tx.send(result);
    }
}

/// Adapts a `(event, context, callback)` function into an async hook.
pub struct CallbackHook<F, T> {
    handler: F,
    _result: PhantomData<fn() -> T>,
}

impl<F, T> CallbackHook<F, T> {
    async fn invoke(&self, event: Event, ctx: &HookContext) -> HookResult<T>
    where
        F: Fn(Event, HookContext, Callback<T>),
    {
        let (tx, rx) = oneshot::channel();
        (self.handler)(event, ctx.clone(), Callback { tx });
        rx.await.map_err(|_| HookError::NoResult)?
    }
}

#[async_trait]
impl<F> RequestHook for CallbackHook<F, RequestOutcome>
where
    F: Fn(Event, HookContext, Callback<RequestOutcome>) + Send + Sync + 'static,
{
    async fn on_request(&self, event: Event, ctx: &HookContext) -> HookResult<RequestOutcome> {
        self.invoke(event, ctx).await
    }
}

#[async_trait]
impl<F> ResponseHook for CallbackHook<F, EdgeResponse>
where
    F: Fn(Event, HookContext, Callback<EdgeResponse>) + Send + Sync + 'static,
{
    async fn on_response(&self, event: Event, ctx: &HookContext) -> HookResult<EdgeResponse> {
        self.invoke(event, ctx).await
    }
}

/// Wrap a callback-style request handler.
pub fn callback_request_hook<F>(handler: F) -> Arc<dyn RequestHook>
where
    F: Fn(Event, HookContext, Callback<RequestOutcome>) + Send + Sync + 'static,
{
    Arc::new(CallbackHook {
        handler,
        _result: PhantomData,
    })
}

/// Wrap a callback-style response handler.
pub fn callback_response_hook<F>(handler: F) -> Arc<dyn ResponseHook>
where
    F: Fn(Event, HookContext, Callback<EdgeResponse>) + Send + Sync + 'static,
{
    Arc::new(CallbackHook {
        handler,
        _result: PhantomData,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::event::EventConfig;

    fn event() -> Event {
        Event::new(
            EventConfig {
                event_type: Stage::ViewerRequest,
                distribution_id: "EDFDVBD6EXAMPLE".into(),
                distribution_domain_name: "d111111abcdef8.cloudfront.net".into(),
                request_id: "req-1".into(),
            },
            EdgeRequest::new("GET", "/index.html"),
        )
    }

    fn ctx() -> HookContext {
        HookContext {
            function_name: "test".into(),
            location: "builtin:test".into(),
            request_id: "req-1".into(),
            stage: Stage::ViewerRequest,
        }
    }

    #[test]
    fn test_outcome_classification_by_shape() {
        let respond: RequestOutcome =
            serde_json::from_str(r#"{"status": 302, "headers": {}}"#).unwrap();
        assert!(respond.is_response());

        let cont: RequestOutcome =
            serde_json::from_str(r#"{"method": "GET", "uri": "/a"}"#).unwrap();
        assert!(!cont.is_response());
    }

    #[tokio::test]
    async fn test_passthrough_keeps_request() {
        let outcome = RequestHook::on_request(&PassthroughHook, event(), &ctx())
            .await
            .unwrap();
        assert_eq!(
            outcome,
            RequestOutcome::Continue(EdgeRequest::new("GET", "/index.html"))
        );
    }

    #[tokio::test]
    async fn test_passthrough_response_requires_response() {
        let result = ResponseHook::on_response(&PassthroughHook, event(), &ctx()).await;
        assert!(matches!(result, Err(HookError::NoResult)));
    }

    #[tokio::test]
    async fn test_callback_hook_is_normalized() {
        let hook = callback_request_hook(|event, _ctx, callback| {
            tokio::spawn(async move {
                let mut request = event.request;
                request.uri = "/rewritten".into();
                callback.done(Ok(RequestOutcome::Continue(request)));
            });
        });

        match hook.on_request(event(), &ctx()).await.unwrap() {
            RequestOutcome::Continue(request) => assert_eq!(request.uri, "/rewritten"),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_callback_errors_propagate() {
        let hook = callback_response_hook(|_event, _ctx, callback| {
            callback.done(Err(HookError::Failed("boom".into())));
        });
        let err = hook.on_response(event(), &ctx()).await.unwrap_err();
        assert_eq!(err.to_string(), "boom");
    }

    #[tokio::test]
    async fn test_dropped_callback_is_no_result() {
        let hook = callback_response_hook(|_event, _ctx, _callback| {});
        let err = hook.on_response(event(), &ctx()).await.unwrap_err();
        assert!(matches!(err, HookError::NoResult));
    }
}
