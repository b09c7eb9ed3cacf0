use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use config::{Config, File, FileFormat};
use regex::Regex;
use serde::Deserialize;

use crate::{
    core::event::{EdgeHeaders, EdgeRequest, EdgeResponse, Event, RequestBody, Stage},
    ports::hook::{
        Hook, HookContext, HookError, HookResult, HookSource, PassthroughHook, RequestHook,
        RequestOutcome, ResponseHook,
    },
};

/// Prefix for handlers registered in code rather than loaded from disk.
pub const BUILTIN_PREFIX: &str = "builtin:";

/// Resolves hook locations into handlers and caches what it loaded.
///
/// Two kinds of location are understood:
/// * `builtin:<name>` for handlers registered with [`HookLoader::register_request`]
///   or [`HookLoader::register_response`] (`builtin:passthrough` is always present)
/// * a `.json`, `.yaml`, `.yml` or `.toml` file holding a declarative hook
///
/// Declarative hooks are parsed once per location and reused until
/// [`HookLoader::invalidate`] is called, which the router does on every reload.
#[derive(Clone, Default)]
pub struct HookLoader {
    base_dir: Option<PathBuf>,
    request_builtins: Arc<scc::HashMap<String, Arc<dyn RequestHook>>>,
    response_builtins: Arc<scc::HashMap<String, Arc<dyn ResponseHook>>>,
    modules: Arc<scc::HashMap<PathBuf, Arc<DeclarativeHook>>>,
}

impl HookLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve relative file locations against `dir` instead of the working directory.
    pub fn with_base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = Some(dir.into());
        self
    }

    pub async fn register_request(&self, name: impl Into<String>, hook: Arc<dyn RequestHook>) {
        let _ = self.request_builtins.upsert_async(name.into(), hook).await;
    }

    pub async fn register_response(&self, name: impl Into<String>, hook: Arc<dyn ResponseHook>) {
        let _ = self.response_builtins.upsert_async(name.into(), hook).await;
    }

    /// Load the handler at `location` in the shape `stage` requires.
    pub async fn load(&self, location: &str, stage: Stage) -> HookResult<Hook> {
        let load_error = |message: String| HookError::Load {
            location: location.to_string(),
            message,
        };

        if let Some(name) = location.strip_prefix(BUILTIN_PREFIX) {
            return self.builtin(name, stage).await.ok_or_else(|| {
                load_error(format!("no {} handler registered as '{name}'", stage.direction()))
            });
        }

        let path = self.resolve_path(location);
        let module = match self.modules.get_async(&path).await {
            Some(entry) => entry.get().clone(),
            None => {
                let module = Arc::new(DeclarativeHook::from_file(&path).map_err(load_error)?);
                tracing::debug!("Loaded declarative hook from {}", path.display());
                let _ = self.modules.upsert_async(path, module.clone()).await;
                module
            }
        };

        Ok(if stage.is_request_stage() {
            Hook::Request(module)
        } else {
            Hook::Response(module)
        })
    }

    /// Forget every cached module so the next load re-reads it from disk.
    pub async fn invalidate(&self) {
        self.modules.clear_async().await;
        tracing::debug!("Hook module cache invalidated");
    }

    pub fn cached_modules(&self) -> usize {
        self.modules.len()
    }

    async fn builtin(&self, name: &str, stage: Stage) -> Option<Hook> {
        if name == "passthrough" {
            return Some(if stage.is_request_stage() {
                Hook::Request(Arc::new(PassthroughHook))
            } else {
                Hook::Response(Arc::new(PassthroughHook))
            });
        }

        if stage.is_request_stage() {
            self.request_builtins
                .get_async(name)
                .await
                .map(|entry| Hook::Request(entry.get().clone()))
        } else {
            self.response_builtins
                .get_async(name)
                .await
                .map(|entry| Hook::Response(entry.get().clone()))
        }
    }

    /// Filesystem path a non-builtin location is read from.
    pub fn resolve_path(&self, location: &str) -> PathBuf {
        let path = Path::new(location);
        match &self.base_dir {
            Some(base) if path.is_relative() => base.join(path),
            _ => path.to_path_buf(),
        }
    }
}

#[async_trait]
impl HookSource for HookLoader {
    async fn load(&self, location: &str, stage: Stage) -> HookResult<Hook> {
        HookLoader::load(self, location, stage).await
    }

    async fn invalidate(&self) {
        HookLoader::invalidate(self).await;
    }
}

/// Header edits applied by a declarative hook.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct HeaderActions {
    #[serde(default)]
    pub add: BTreeMap<String, String>,
    #[serde(default)]
    pub remove: Vec<String>,
}

impl HeaderActions {
    fn apply(&self, headers: &mut EdgeHeaders) {
        for name in &self.remove {
            headers.remove(name);
        }
        for (name, value) in &self.add {
            headers.set(name, value.clone());
        }
    }
}

/// Whole-body replacement; `set_json` wins over `set_text`.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct BodyActions {
    #[serde(default)]
    pub set_text: Option<String>,
    #[serde(default)]
    pub set_json: Option<serde_json::Value>,
}

impl BodyActions {
    fn replacement(&self) -> Option<String> {
        match (&self.set_json, &self.set_text) {
            (Some(json), _) => Some(json.to_string()),
            (None, Some(text)) => Some(text.clone()),
            (None, None) => None,
        }
    }
}

/// Canned response produced instead of continuing the pipeline.
#[derive(Debug, Deserialize, Clone)]
pub struct RespondAction {
    pub status: u16,
    #[serde(default)]
    pub status_description: Option<String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: Option<String>,
}

impl RespondAction {
    fn to_response(&self) -> EdgeResponse {
        let mut response = EdgeResponse::new(self.status);
        if let Some(description) = &self.status_description {
            response.status_description = description.clone();
        }
        for (name, value) in &self.headers {
            response.headers.set(name, value.clone());
        }
        if let Some(body) = &self.body {
            response = response.with_body(body.clone());
        }
        response
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct HeaderCondition {
    pub name: String,
    #[serde(default)]
    pub value_matches: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ConditionSpec {
    #[serde(default)]
    pub path_matches: Option<String>,
    #[serde(default)]
    pub method_is: Option<String>,
    #[serde(default)]
    pub has_header: Option<HeaderCondition>,
}

/// On-disk shape of a declarative hook.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct HookSpec {
    #[serde(default)]
    pub condition: Option<ConditionSpec>,
    #[serde(default)]
    pub rewrite_uri: Option<String>,
    #[serde(default)]
    pub headers: HeaderActions,
    #[serde(default)]
    pub body: Option<BodyActions>,
    #[serde(default)]
    pub respond: Option<RespondAction>,
}

#[derive(Debug)]
struct Condition {
    path: Option<Regex>,
    method: Option<String>,
    header: Option<(String, Option<Regex>)>,
}

impl Condition {
    fn compile(spec: &ConditionSpec) -> Result<Self, regex::Error> {
        let header = match &spec.has_header {
            Some(h) => Some((
                h.name.clone(),
                h.value_matches.as_deref().map(Regex::new).transpose()?,
            )),
            None => None,
        };
        Ok(Self {
            path: spec.path_matches.as_deref().map(Regex::new).transpose()?,
            method: spec.method_is.as_ref().map(|m| m.to_ascii_uppercase()),
            header,
        })
    }

    fn matches(&self, request: &EdgeRequest) -> bool {
        if let Some(path) = &self.path
            && !path.is_match(&request.uri)
        {
            return false;
        }
        if let Some(method) = &self.method
            && !request.method.eq_ignore_ascii_case(method)
        {
            return false;
        }
        match &self.header {
            Some((name, None)) => request.headers.contains(name),
            Some((name, Some(value))) => request
                .headers
                .get_all(name)
                .iter()
                .any(|entry| value.is_match(&entry.value)),
            None => true,
        }
    }
}

/// Hook driven by a data file rather than code.
///
/// When the condition holds, a request stage either answers with `respond`
/// or continues with the rewritten URI, headers and body. A response stage
/// replaces the response with `respond` or edits its headers and body.
#[derive(Debug)]
pub struct DeclarativeHook {
    spec: HookSpec,
    condition: Option<Condition>,
}

impl DeclarativeHook {
    pub fn new(spec: HookSpec) -> Result<Self, regex::Error> {
        let condition = spec.condition.as_ref().map(Condition::compile).transpose()?;
        Ok(Self { spec, condition })
    }

    pub fn from_file(path: &Path) -> Result<Self, String> {
        let format = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => FileFormat::Json,
            Some("yaml") | Some("yml") => FileFormat::Yaml,
            Some("toml") => FileFormat::Toml,
            other => {
                return Err(format!(
                    "unsupported hook module type '{}'",
                    other.unwrap_or_default()
                ));
            }
        };
        if !path.is_file() {
            return Err(format!("{} does not exist", path.display()));
        }

        let spec: HookSpec = Config::builder()
            .add_source(File::from(path).format(format))
            .build()
            .and_then(Config::try_deserialize)
            .map_err(|e| e.to_string())?;

        Self::new(spec).map_err(|e| format!("invalid condition: {e}"))
    }

    fn applies_to(&self, request: &EdgeRequest) -> bool {
        self.condition
            .as_ref()
            .is_none_or(|condition| condition.matches(request))
    }
}

#[async_trait]
impl RequestHook for DeclarativeHook {
    async fn on_request(&self, event: Event, ctx: &HookContext) -> HookResult<RequestOutcome> {
        let mut request = event.request;
        if !self.applies_to(&request) {
            return Ok(RequestOutcome::Continue(request));
        }

        if let Some(respond) = &self.spec.respond {
            tracing::debug!(
                "Hook {} answered {} with {}",
                ctx.function_name,
                request.uri,
                respond.status
            );
            return Ok(RequestOutcome::Respond(respond.to_response()));
        }

        if let Some(uri) = &self.spec.rewrite_uri {
            request.uri = uri.clone();
        }
        self.spec.headers.apply(&mut request.headers);
        if let Some(body) = self.spec.body.as_ref().and_then(BodyActions::replacement) {
            request.body = Some(RequestBody {
                data: body,
                ..RequestBody::default()
            });
        }
        Ok(RequestOutcome::Continue(request))
    }
}

#[async_trait]
impl ResponseHook for DeclarativeHook {
    async fn on_response(&self, event: Event, _ctx: &HookContext) -> HookResult<EdgeResponse> {
        let mut response = event.response.ok_or(HookError::NoResult)?;
        if !self.applies_to(&event.request) {
            return Ok(response);
        }

        if let Some(respond) = &self.spec.respond {
            return Ok(respond.to_response());
        }

        self.spec.headers.apply(&mut response.headers);
        if let Some(body) = self.spec.body.as_ref().and_then(BodyActions::replacement) {
            response = response.with_body(body);
        }
        Ok(response)
    }
}
