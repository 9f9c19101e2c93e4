//! Per-shard response assembled while executing a write request.

use crate::error::ShardWriteError;

/// Failure of one item, surfaced to the client.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Failure {
    pub id: String,
    pub message: String,
    pub version_conflict: bool,
}

/// Response of one shard write request. Entries are appended in input
/// order; `locations` carries the caller-assigned item indices and
/// `failures` is aligned with it.
#[derive(Debug, Default)]
pub struct ShardResponse {
    locations: Vec<i32>,
    failures: Vec<Option<Failure>>,
    failure: Option<ShardWriteError>,
}

impl ShardResponse {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successful (or successfully skipped) item.
    pub fn add_success(&mut self, location: i32) {
        self.locations.push(location);
        self.failures.push(None);
    }

    /// Record a per-item failure.
    pub fn add_failure(&mut self, location: i32, failure: Failure) {
        self.locations.push(location);
        self.failures.push(Some(failure));
    }

    /// Record a batch-level failure; the first one wins.
    pub fn set_failure(&mut self, error: ShardWriteError) {
        if self.failure.is_none() {
            self.failure = Some(error);
        }
    }

    pub fn failure(&self) -> Option<&ShardWriteError> {
        self.failure.as_ref()
    }

    pub fn locations(&self) -> &[i32] {
        &self.locations
    }

    pub fn failures(&self) -> &[Option<Failure>] {
        &self.failures
    }

    /// Number of entries that completed without a per-item failure.
    pub fn successful_writes(&self) -> usize {
        self.failures.iter().filter(|f| f.is_none()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_keep_input_order_and_alignment() {
        let mut response = ShardResponse::new();
        response.add_success(0);
        response.add_failure(
            1,
            Failure {
                id: "b".to_string(),
                message: "boom".to_string(),
                version_conflict: false,
            },
        );
        response.add_success(2);
        assert_eq!(response.locations(), [0, 1, 2]);
        assert_eq!(response.failures().len(), 3);
        assert_eq!(response.successful_writes(), 2);
    }

    #[test]
    fn first_batch_failure_wins() {
        let mut response = ShardResponse::new();
        response.set_failure(ShardWriteError::Interrupted);
        response.set_failure(ShardWriteError::DocumentMissing { id: "x".to_string() });
        assert!(matches!(response.failure(), Some(ShardWriteError::Interrupted)));
    }
}
