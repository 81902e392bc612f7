pub mod graph;
pub mod lifecycle;
pub mod scheduling;

pub use graph::{GraphConfig, GraphError, GraphMetrics, GraphSnapshot, PipelineGraph, RunningGraph};
pub use lifecycle::{
    ControllerConfig, LifecycleError, PipelineController, PipelineState, ShutdownReport,
};
pub use scheduling::{request_realtime, SchedulingError};
