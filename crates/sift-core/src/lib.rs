//! sift-core — research task model, SSE framing, event normalization and
//! progress projection. All other sift crates depend on this one.

pub mod config;
pub mod error;
pub mod event;
pub mod projector;
pub mod retry;
pub mod sse;
pub mod task;

pub use error::ResearchError;
pub use event::{EventBody, NormalizedEvent, Payload, TaskContext};
pub use projector::TaskProjector;
pub use sse::{Frame, FrameParser, SseBlock};
pub use task::{
    EventKind, ProgressEvent, ProgressSummary, QueueInfo, ResearchTask, TaskId, TaskStatus,
    TaskSummary,
};
