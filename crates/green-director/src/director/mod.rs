//! This module implements the green site director: a periodic process that ranks the execution
//! queues of a grid community by their energy efficiency, carbon intensity and current load, and
//! hands the resulting order to the pilot submission machinery.
//!
//! A single cycle resolves queues from the site catalog, annotates them with site metrics,
//! probes their computing elements (CEs) and scores them with a pluggable strategy.
pub mod catalog;
pub mod ce;
pub mod cycle;
pub mod descriptor;
pub mod error;
pub mod metrics;
pub mod output;
pub mod placement;
pub mod probe;
pub mod report;
pub mod resolver;
pub mod scoring;
pub mod simulated;

/// Result of calls into external collaborators (catalog, CEs, submission).
pub type DirectorResult<T> = anyhow::Result<T>;

pub use cycle::{Collaborators, CycleReport, Director};
pub use descriptor::QueueDescriptor;
pub use error::QueueError;
pub use scoring::{RankedQueue, RankedQueueList};
