//! libsift — client side of research tasks: the HTTP API port and the
//! polling progress tracker built on it.

pub mod api;
pub mod status;
pub mod tracker;

pub use api::{CreatedTask, HttpResearchApi, ResearchApi, TaskSnapshot};
pub use status::{observe, Observed};
pub use tracker::{Callbacks, ClientStatus, ProgressTracker, TrackerView};
