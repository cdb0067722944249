pub mod dispatcher;
pub mod mirror_service;
pub mod pipeline;
pub mod scheduler;

pub use dispatcher::ChangeDispatcher;
pub use mirror_service::{build_device, MirrorService};
pub use pipeline::{AcquisitionPipeline, PauseGate, PipelineSettings, PipelineStatsSnapshot, ResumeGuard};
pub use scheduler::{Job, JobContext, ScheduleOptions, Scheduler};
