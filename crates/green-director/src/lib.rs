pub mod common;
pub mod director;

#[cfg(test)]
pub(crate) mod tests;

pub type Error = crate::common::error::DirectorError;
pub type Result<T> = std::result::Result<T, Error>;

pub type Map<K, V> = std::collections::HashMap<K, V>;

/// Insertion-ordered map, used wherever the resolution order of queues matters.
pub type OrderedMap<K, V> = indexmap::IndexMap<K, V>;

pub const DIRECTOR_VERSION: &str = env!("CARGO_PKG_VERSION");
