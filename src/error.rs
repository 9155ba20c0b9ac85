use std::sync::Arc;

use thiserror::Error;

/// Error produced by running a task through a [`crate::Ctx`].
///
/// Failures are cached on the context entry for the lifetime of that entry,
/// so the error must be cloneable; the underlying `anyhow::Error` is wrapped
/// in an `Arc` and every caller of the same `(task, input)` pair receives
/// the same error until TTL eviction.
#[derive(Debug, Error, Clone)]
pub enum TaskError {
    #[error("task cancelled")]
    Cancelled,

    #[error(transparent)]
    Failed(#[from] Arc<anyhow::Error>),
}

impl From<anyhow::Error> for TaskError {
    fn from(e: anyhow::Error) -> Self {
        TaskError::Failed(Arc::new(e))
    }
}

impl TaskError {
    /// Whether this error is the cooperative-cancellation signal rather than
    /// a failure from the task's own body.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, TaskError::Cancelled)
    }
}

/// A loader failure with separate client-facing and server-side messages.
///
/// Loaders may return this through `anyhow` to control what the client sees;
/// the orchestrator recovers it with a downcast. Errors of any other type
/// fall back to a generic client message and a logged warning.
#[derive(Debug, Error)]
#[error("{client}")]
pub struct LoaderError {
    client: String,
    server: Option<anyhow::Error>,
}

impl LoaderError {
    pub fn new(client: impl Into<String>, server: impl Into<anyhow::Error>) -> Self {
        Self {
            client: client.into(),
            server: Some(server.into()),
        }
    }

    /// A client-facing message with no underlying server error to log.
    pub fn message(client: impl Into<String>) -> Self {
        Self {
            client: client.into(),
            server: None,
        }
    }

    pub fn client_message(&self) -> &str {
        &self.client
    }

    pub fn server_error(&self) -> Option<&anyhow::Error> {
        self.server.as_ref()
    }
}

#[derive(Debug, Error)]
pub enum RouteError {
    #[error("Pattern '{0}' is already registered")]
    DuplicatePattern(String),
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Task '{0}' is already declared")]
    DuplicateTask(String),

    #[error("Unknown task '{0}' in dependency declaration")]
    UnknownTask(String),

    #[error("Task dependency cycle involving '{0}'")]
    Cycle(String),
}

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("Couldn't write route manifest.\n{0}")]
    Io(#[from] std::io::Error),

    #[error("Couldn't serialize route manifest.\n{0}")]
    Serialize(#[from] serde_json::Error),
}
