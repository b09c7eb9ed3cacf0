//! Routing bucket: path pattern, origin, cache policy and four hook slots.
use std::sync::Arc;

use crate::{
    core::{
        error::{EdgeError, EdgeResult},
        event::Stage,
        pattern::PathPattern,
        policy::CachePolicy,
    },
    ports::{
        hook::{Hook, HookContext, PassthroughHook, RequestHook, ResponseHook},
        origin::Origin,
    },
};

const PASSTHROUGH_NAME: &str = "passthrough";
const PASSTHROUGH_LOCATION: &str = "builtin:passthrough";

/// A handler bound into a slot together with where it came from.
pub struct HookBinding<H: ?Sized> {
    pub function_name: String,
    pub location: String,
    pub handler: Arc<H>,
}

impl<H: ?Sized> Clone for HookBinding<H> {
    fn clone(&self) -> Self {
        Self {
            function_name: self.function_name.clone(),
            location: self.location.clone(),
            handler: self.handler.clone(),
        }
    }
}

impl<H: ?Sized> HookBinding<H> {
    pub fn context(&self, stage: Stage, request_id: &str) -> HookContext {
        HookContext {
            function_name: self.function_name.clone(),
            location: self.location.clone(),
            request_id: request_id.to_string(),
            stage,
        }
    }

    pub fn is_passthrough(&self) -> bool {
        self.location == PASSTHROUGH_LOCATION
    }
}

fn passthrough_request() -> HookBinding<dyn RequestHook> {
    HookBinding {
        function_name: PASSTHROUGH_NAME.to_string(),
        location: PASSTHROUGH_LOCATION.to_string(),
        handler: Arc::new(PassthroughHook),
    }
}

fn passthrough_response() -> HookBinding<dyn ResponseHook> {
    HookBinding {
        function_name: PASSTHROUGH_NAME.to_string(),
        location: PASSTHROUGH_LOCATION.to_string(),
        handler: Arc::new(PassthroughHook),
    }
}

/// The hooks, routing predicate and cache policy for one path pattern.
///
/// Hook sets are immutable once the router publishes them; a reload builds
/// fresh ones instead of mutating these.
pub struct HookSet {
    pattern: PathPattern,
    name: String,
    origin: Arc<dyn Origin>,
    policy: CachePolicy,
    viewer_request: HookBinding<dyn RequestHook>,
    origin_request: HookBinding<dyn RequestHook>,
    origin_response: HookBinding<dyn ResponseHook>,
    viewer_response: HookBinding<dyn ResponseHook>,
}

impl HookSet {
    /// Build a hook set with passthrough handlers in every slot.
    pub fn new(
        pattern: PathPattern,
        name: impl Into<String>,
        origin: Arc<dyn Origin>,
        policy: CachePolicy,
    ) -> Self {
        Self {
            pattern,
            name: name.into(),
            origin,
            policy,
            viewer_request: passthrough_request(),
            origin_request: passthrough_request(),
            origin_response: passthrough_response(),
            viewer_response: passthrough_response(),
        }
    }

    /// Bind `hook` into the slot for `stage`; the hook's shape must fit the stage.
    pub fn set_hook(
        &mut self,
        stage: Stage,
        function_name: impl Into<String>,
        location: impl Into<String>,
        hook: Hook,
    ) -> EdgeResult<()> {
        let function_name = function_name.into();
        let location = location.into();
        match (stage, hook) {
            (Stage::ViewerRequest, Hook::Request(handler)) => {
                self.viewer_request = HookBinding {
                    function_name,
                    location,
                    handler,
                };
            }
            (Stage::OriginRequest, Hook::Request(handler)) => {
                self.origin_request = HookBinding {
                    function_name,
                    location,
                    handler,
                };
            }
            (Stage::OriginResponse, Hook::Response(handler)) => {
                self.origin_response = HookBinding {
                    function_name,
                    location,
                    handler,
                };
            }
            (Stage::ViewerResponse, Hook::Response(handler)) => {
                self.viewer_response = HookBinding {
                    function_name,
                    location,
                    handler,
                };
            }
            (stage, hook) => {
                return Err(EdgeError::InternalServerError(format!(
                    "{} hook from '{}' cannot serve the {} stage",
                    hook.shape(),
                    location,
                    stage
                )));
            }
        }
        Ok(())
    }

    /// Chaining form of [`HookSet::set_hook`].
    pub fn with_hook(
        mut self,
        stage: Stage,
        function_name: impl Into<String>,
        location: impl Into<String>,
        hook: Hook,
    ) -> EdgeResult<Self> {
        self.set_hook(stage, function_name, location, hook)?;
        Ok(self)
    }

    pub fn pattern(&self) -> &PathPattern {
        &self.pattern
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn origin(&self) -> &Arc<dyn Origin> {
        &self.origin
    }

    pub fn policy(&self) -> &CachePolicy {
        &self.policy
    }

    pub fn matches(&self, path: &str) -> bool {
        self.pattern.matches(path)
    }

    pub fn request_hook(&self, stage: Stage) -> Option<&HookBinding<dyn RequestHook>> {
        match stage {
            Stage::ViewerRequest => Some(&self.viewer_request),
            Stage::OriginRequest => Some(&self.origin_request),
            _ => None,
        }
    }

    pub fn response_hook(&self, stage: Stage) -> Option<&HookBinding<dyn ResponseHook>> {
        match stage {
            Stage::OriginResponse => Some(&self.origin_response),
            Stage::ViewerResponse => Some(&self.viewer_response),
            _ => None,
        }
    }

    /// Stages whose slot holds something other than the passthrough handler.
    pub fn configured_stages(&self) -> Vec<Stage> {
        Stage::ALL
            .into_iter()
            .filter(|stage| {
                self.request_hook(*stage)
                    .map(|b| !b.is_passthrough())
                    .or_else(|| self.response_hook(*stage).map(|b| !b.is_passthrough()))
                    .unwrap_or(false)
            })
            .collect()
    }
}

impl std::fmt::Debug for HookSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookSet")
            .field("pattern", &self.pattern.as_str())
            .field("name", &self.name)
            .field("origin", &self.origin.kind())
            .field("policy", &self.policy)
            .field("configured_stages", &self.configured_stages())
            .finish()
    }
}
