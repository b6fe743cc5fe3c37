//! sift-services — stores, the stream relay, and the task lifecycle.

pub mod chat;
pub mod lifecycle;
pub mod queue;
pub mod relay;
pub mod store;
pub mod upstream;
pub mod writer;

pub use chat::{Chat, ChatStore, MemoryChatStore, Visibility};
pub use lifecycle::{CreateTaskRequest, CreatedTask, Resolved, StreamTarget, TaskLifecycle};
pub use queue::{DetachedRelayQueue, HttpWorkerQueue, Placement, QueueJob, WorkerQueue};
pub use relay::{Attached, ConnectedRelay, RelayOutcome, RelayRejected, RelayState, StreamRelay};
pub use store::{MemoryTaskStore, StoreError, TaskStore};
pub use upstream::{UpstreamBody, UpstreamClient};
pub use writer::{TaskWriter, WriteQueues};
