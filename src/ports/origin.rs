use std::sync::Arc;

use async_trait::async_trait;

use crate::core::{
    event::{EdgeRequest, EdgeResponse},
    origin::{OriginDescriptor, OriginKind},
};

/// Origin defines the port for fetching a resource when no hook or cache answers.
///
/// Implementations never fail: resolution errors are rendered as ordinary
/// responses so later stages can observe and transform them.
#[async_trait]
pub trait Origin: Send + Sync + 'static {
    /// The resolved kind of this origin
    fn kind(&self) -> OriginKind;

    /// Descriptor attached to events routed to this origin, if any
    fn descriptor(&self) -> Option<&OriginDescriptor>;

    /// Fetch the resource addressed by `request`
    async fn fetch(&self, request: &EdgeRequest) -> EdgeResponse;
}

/// Builds origins for hook sets from a descriptor and a physical location.
pub trait OriginFactory: Send + Sync + 'static {
    fn create(
        &self,
        descriptor: Option<OriginDescriptor>,
        base: Option<String>,
    ) -> Arc<dyn Origin>;
}
