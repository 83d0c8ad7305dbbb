//! The durable, visibility-timeout Queue and the generic Stage Runner that
//! drives a [`StageProcessor`] against it.

pub mod payloads;
pub mod pipeline;
pub mod stage_queue;
pub mod stage_runner;

pub use pipeline::PipelineEvent;
pub use stage_queue::{DbStageQueue, Lease, Queue};
pub use stage_runner::{
    Outcome, StageContext, StageProcessor, StageRunner, StageRunnerConfig, StageRunnerError,
};
