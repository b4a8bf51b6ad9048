use serde::Serialize;
use thiserror::Error;

/// Error that concerns a single queue. It is recorded and reported, but it never aborts a cycle.
#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum QueueError {
    /// The queue could not be turned into a descriptor, it is missing from the ranking.
    #[error("Queue {queue} was not resolved: {message}")]
    Resolution { queue: String, message: String },
    /// The CE of the queue could not be contacted, a fallback load was used.
    #[error("CE {ce_name} of queue {queue} could not be probed: {message}")]
    Probe {
        queue: String,
        ce_name: String,
        message: String,
    },
    /// The queue lacks data required by the scoring strategy.
    #[error("Queue {queue} could not be scored: {message}")]
    Scoring { queue: String, message: String },
}

impl QueueError {
    pub fn queue(&self) -> &str {
        match self {
            QueueError::Resolution { queue, .. }
            | QueueError::Probe { queue, .. }
            | QueueError::Scoring { queue, .. } => queue,
        }
    }

    pub fn is_probe(&self) -> bool {
        matches!(self, QueueError::Probe { .. })
    }
}
