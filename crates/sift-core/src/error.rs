//! Error taxonomy shared by the relay, the lifecycle creator and the client.

/// Every failure a research task can surface.
///
/// Variants carry plain strings so the error can be cloned into client
/// state and replayed to callbacks.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResearchError {
    /// Malformed or missing input (prompt, chat id, task id).
    #[error("{0}")]
    Validation(String),

    /// The caller is authenticated but does not own the referenced chat.
    #[error("{0}")]
    Forbidden(String),

    /// Missing task, or a task the caller does not own. Both look identical.
    #[error("Research task not found")]
    NotFound,

    /// No caller identity was supplied.
    #[error("Unauthorized")]
    Unauthorized,

    /// The upstream stream could not be established within the retry budget.
    #[error("Failed to connect to research backend: {message}")]
    UpstreamConnect { attempts: u32, message: String },

    /// The upstream answered, but not with a usable event stream.
    #[error("{message}")]
    UpstreamProtocol {
        status: u16,
        message: String,
        details: String,
    },

    /// Reading or decoding failed after the stream was established.
    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    /// Handing the task to the worker queue failed.
    #[error("Failed to queue research task: {0}")]
    Queue(String),

    /// A Task Store write or read failed.
    #[error("persistence failed: {0}")]
    Persistence(String),

    /// Client-side network failure while polling a snapshot.
    #[error("{0}")]
    PollingTransport(String),

    /// The task reached `failed`; the message comes from its latest error event.
    #[error("{0}")]
    TaskFailed(String),

    /// The task reached `cancelled`.
    #[error("{0}")]
    TaskCancelled(String),
}

impl ResearchError {
    /// HTTP status code a server boundary should answer with.
    pub fn http_status(&self) -> u16 {
        match self {
            ResearchError::Validation(_) => 400,
            ResearchError::Unauthorized => 401,
            ResearchError::Forbidden(_) => 403,
            ResearchError::NotFound => 404,
            ResearchError::UpstreamProtocol { status, .. } if *status >= 400 => *status,
            ResearchError::UpstreamConnect { .. }
            | ResearchError::UpstreamProtocol { .. }
            | ResearchError::Queue(_) => 502,
            ResearchError::StreamInterrupted(_)
            | ResearchError::Persistence(_)
            | ResearchError::PollingTransport(_)
            | ResearchError::TaskFailed(_)
            | ResearchError::TaskCancelled(_) => 500,
        }
    }

    /// Connection-establishment failures are the only retryable kind.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ResearchError::UpstreamConnect { .. })
    }
}
