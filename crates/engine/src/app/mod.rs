mod input;
mod loop_runner;
mod metrics;
mod scene;

pub use input::{InputAction, InputSnapshot};
pub use loop_runner::{
    run_app, run_app_with_metrics, AppError, Frame, FrameSource, LoopConfig, LoopSummary,
};
pub use metrics::{LoopMetricsSnapshot, MetricsHandle};
pub use scene::{
    Aabb, EntityId, EntityIdAllocator, Faction, Scene, SceneCommand, Transform, Vec3,
};
