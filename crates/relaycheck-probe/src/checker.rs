//! One full check invocation.
//!
//! ```text
//! endpoints ──► BoundedScheduler ──► Classifier::classify (per endpoint)
//!                                        │
//!                      ResultBuckets ◄───┘
//!                           │
//!                           ├──► report_failures (Notifier)
//!                           └──► output list
//! ```

use std::sync::Arc;

use tracing::{error, info};

use relaycheck_core::{Endpoint, FailureReason, ProbeOutcome, ProbeSettings};
use relaycheck_state::ResultCache;

use crate::classifier::{Classified, Classifier};
use crate::error::ProbeResult;
use crate::node::{BuiltinProducer, NodeProducer};
use crate::pool::BoundedScheduler;
use crate::report::{Notifier, TelegramNotifier, report_failures};
use crate::results::{FailedEndpoint, ResultBuckets};
use crate::transport::{HyperTransport, Transport};

/// Outcome of a run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CheckReport {
    pub buckets: ResultBuckets,
    /// Whether a failure notification was delivered.
    pub notified: bool,
}

impl CheckReport {
    /// The list handed back to the caller: valid endpoints, plus
    /// incompatible ones when they are retained.
    pub fn into_output(self) -> Vec<Endpoint> {
        self.buckets.into_valid()
    }
}

pub struct Checker {
    classifier: Arc<Classifier>,
    notifier: Option<Arc<dyn Notifier>>,
}

impl Checker {
    pub fn new(classifier: Classifier) -> Self {
        Self {
            classifier: Arc::new(classifier),
            notifier: None,
        }
    }

    /// Wire the default stack for `settings`: hyper transport with webpki
    /// roots, the built-in node producer, the optional result cache and a
    /// Telegram notifier when a bot token and chat id are configured.
    ///
    /// Fails when the TLS client cannot be built.
    pub fn from_settings(
        settings: ProbeSettings,
        cache: Option<Arc<dyn ResultCache>>,
    ) -> ProbeResult<Self> {
        let transport: Arc<dyn Transport> = Arc::new(HyperTransport::with_webpki_roots()?);
        let producer: Arc<dyn NodeProducer> = Arc::new(BuiltinProducer);
        let telegram = settings.telegram.clone();

        let mut classifier = Classifier::new(Arc::new(settings), producer, transport.clone());
        if let Some(cache) = cache {
            classifier = classifier.with_cache(cache);
        }

        let mut checker = Self::new(classifier);
        if let Some(target) = telegram {
            checker = checker.with_notifier(Arc::new(TelegramNotifier::new(target, transport)));
        }
        Ok(checker)
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn settings(&self) -> &ProbeSettings {
        self.classifier.settings()
    }

    /// Probe every endpoint with bounded concurrency, sort the results into
    /// buckets and report failures.
    pub async fn run(&self, endpoints: Vec<Endpoint>) -> CheckReport {
        let settings = self.classifier.settings();
        let scheduler = BoundedScheduler::new(settings.concurrency);
        info!(
            endpoints = endpoints.len(),
            concurrency = scheduler.limit(),
            "starting check"
        );

        let tasks = endpoints.iter().cloned().map(|endpoint| {
            let classifier = self.classifier.clone();
            move || async move { classifier.classify(endpoint).await }
        });
        let batch = scheduler.run_all(tasks).await;

        let mut buckets = ResultBuckets::default();
        for (_, classified) in batch.completed {
            buckets.record(classified, settings.keep_incompatible);
        }
        for index in batch.failed {
            let endpoint = endpoints[index].clone();
            error!(endpoint = %endpoint.name(), "probe task aborted");
            buckets.record(
                Classified {
                    endpoint,
                    outcome: ProbeOutcome::Failed(FailureReason::Transport(
                        "probe task aborted".to_string(),
                    )),
                },
                settings.keep_incompatible,
            );
        }

        info!(
            valid = buckets.valid.len(),
            incompatible = buckets.incompatible.len(),
            failed = buckets.failed.len(),
            "check finished"
        );

        let notified = match &self.notifier {
            Some(notifier) => {
                report_failures(notifier.as_ref(), &settings.source_name, &buckets.failed).await
            }
            None => false,
        };

        CheckReport { buckets, notified }
    }
}

/// Failed endpoints as `[type] name: reason` lines.
pub fn describe_failures(failed: &[FailedEndpoint]) -> Vec<String> {
    failed
        .iter()
        .map(|f| format!("{}: {}", f.endpoint, f.reason))
        .collect()
}
