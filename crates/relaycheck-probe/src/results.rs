//! Result buckets filled from classified probes.

use relaycheck_core::{Endpoint, FailureReason, ProbeOutcome};

use crate::classifier::Classified;

#[derive(Debug, Clone, PartialEq)]
pub struct FailedEndpoint {
    pub endpoint: Endpoint,
    pub reason: FailureReason,
}

impl FailedEndpoint {
    /// Whether the failure was reused from a previous run.
    pub fn is_cached(&self) -> bool {
        self.reason == FailureReason::CachedFailure
    }
}

/// Valid, incompatible and failed endpoints of one run.
///
/// Buckets are unordered with respect to the input.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultBuckets {
    pub valid: Vec<Endpoint>,
    pub incompatible: Vec<Endpoint>,
    pub failed: Vec<FailedEndpoint>,
    /// Incompatible endpoints also copied into `valid`.
    retained: usize,
}

impl ResultBuckets {
    /// Place a classified endpoint in its bucket. With `keep_incompatible`,
    /// incompatible endpoints are also copied into `valid`.
    pub fn record(&mut self, classified: Classified, keep_incompatible: bool) {
        let Classified { endpoint, outcome } = classified;
        match outcome {
            ProbeOutcome::Valid { .. } => self.valid.push(endpoint),
            ProbeOutcome::Incompatible => {
                if keep_incompatible {
                    self.valid.push(endpoint.clone());
                    self.retained += 1;
                }
                self.incompatible.push(endpoint);
            }
            ProbeOutcome::Failed(reason) => self.failed.push(FailedEndpoint { endpoint, reason }),
        }
    }

    /// Number of distinct endpoints recorded.
    pub fn total(&self) -> usize {
        self.valid.len() - self.retained + self.incompatible.len() + self.failed.len()
    }

    pub fn into_valid(self) -> Vec<Endpoint> {
        self.valid
    }
}
