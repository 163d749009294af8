//! Container image specifications and lifecycle tracking.

mod lifecycle;
mod spec;

pub use lifecycle::{ensure_image, DeployedAgentRecord, LifecycleManager};
pub use spec::{ContainerImage, ImagePullPolicy};
