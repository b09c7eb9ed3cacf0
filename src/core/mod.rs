pub mod error;
pub mod event;
pub mod hook_set;
pub mod lifecycle;
pub mod origin;
pub mod pattern;
pub mod policy;
pub mod router;

pub use error::{EdgeError, EdgeResult};
pub use event::{EdgeHeaders, EdgeRequest, EdgeResponse, Event, EventConfig, Stage};
pub use hook_set::HookSet;
pub use lifecycle::{Lifecycle, LifecycleOptions};
pub use origin::{OriginDescriptor, OriginKind};
pub use policy::CachePolicy;
pub use router::{Router, RouterError};
