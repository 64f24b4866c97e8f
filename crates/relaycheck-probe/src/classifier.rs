//! Probe classifier: runs one endpoint through the full probe.
//!
//! Consults the result cache, converts the descriptor into a dialable
//! node, issues the request through the node, checks the status against
//! the accepted pattern and records the result. Every failure is absorbed
//! here and turned into a `Failed` outcome; nothing propagates to the
//! scheduler.

use std::sync::Arc;

use http::header::USER_AGENT;
use tokio::time::Instant;
use tracing::{error, info, warn};

use relaycheck_core::{Endpoint, FailureReason, ProbeOutcome, ProbeSettings};
use relaycheck_state::{CacheEntry, ResultCache};

use crate::cache_key::build_cache_key;
use crate::error::{ProbeError, ProbeResult};
use crate::node::NodeProducer;
use crate::requester::{Requester, RetryPolicy};
use crate::transport::{ProbeRequest, Transport};

/// An endpoint together with the outcome of its probe.
///
/// Valid endpoints carry the `_latency` annotation (and the latency-prefixed
/// name when display is enabled).
#[derive(Debug, Clone, PartialEq)]
pub struct Classified {
    pub endpoint: Endpoint,
    pub outcome: ProbeOutcome,
}

enum Probed {
    Incompatible,
    Responded { status: u16, latency: String },
}

pub struct Classifier {
    settings: Arc<ProbeSettings>,
    producer: Arc<dyn NodeProducer>,
    requester: Requester,
    cache: Option<Arc<dyn ResultCache>>,
}

impl Classifier {
    pub fn new(
        settings: Arc<ProbeSettings>,
        producer: Arc<dyn NodeProducer>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let policy = RetryPolicy {
            retries: settings.retries,
            retry_delay: settings.retry_delay,
        };
        Self {
            settings,
            producer,
            requester: Requester::new(transport, policy),
            cache: None,
        }
    }

    /// Attach a result cache. It is only consulted when caching is enabled
    /// in the settings.
    pub fn with_cache(mut self, cache: Arc<dyn ResultCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn settings(&self) -> &ProbeSettings {
        &self.settings
    }

    fn active_cache(&self) -> Option<&dyn ResultCache> {
        if self.settings.cache {
            self.cache.as_deref()
        } else {
            None
        }
    }

    /// Probe a single endpoint and classify it.
    pub async fn classify(&self, endpoint: Endpoint) -> Classified {
        let cache = self.active_cache();
        let key = build_cache_key(cache.is_some(), &self.settings, &endpoint);

        if let (Some(cache), Some(key)) = (cache, key.as_deref()) {
            match cache.get(key) {
                Ok(Some(CacheEntry {
                    latency: Some(latency),
                })) => {
                    info!(endpoint = %endpoint.name(), %latency, "using cached success");
                    return self.accept(endpoint, latency, true);
                }
                Ok(Some(_)) if !self.settings.disable_failed_cache => {
                    info!(endpoint = %endpoint.name(), "using cached failure");
                    return Classified {
                        endpoint,
                        outcome: ProbeOutcome::Failed(FailureReason::CachedFailure),
                    };
                }
                Ok(Some(_)) => {
                    info!(endpoint = %endpoint.name(), "ignoring cached failure");
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(endpoint = %endpoint.name(), error = %e, "cache lookup failed");
                }
            }
        }

        match self.probe(&endpoint).await {
            Ok(Probed::Incompatible) => {
                info!(endpoint = %endpoint.name(), kind = %endpoint.kind(), "protocol not supported");
                Classified {
                    endpoint,
                    outcome: ProbeOutcome::Incompatible,
                }
            }
            Ok(Probed::Responded { status, latency }) => {
                info!(endpoint = %endpoint.name(), status, %latency, "probe answered");
                if self.settings.status.is_match(&status.to_string()) {
                    self.store(key.as_deref(), &endpoint, CacheEntry::success(latency.clone()));
                    self.accept(endpoint, latency, false)
                } else {
                    self.store(key.as_deref(), &endpoint, CacheEntry::failure());
                    Classified {
                        endpoint,
                        outcome: ProbeOutcome::Failed(FailureReason::UnexpectedStatus(status)),
                    }
                }
            }
            Err(e) => {
                error!(endpoint = %endpoint.name(), error = %e, "probe failed");
                self.store(key.as_deref(), &endpoint, CacheEntry::failure());
                let reason = match e {
                    ProbeError::Descriptor(msg) => FailureReason::Conversion(msg),
                    ProbeError::Exhausted { source, .. } => {
                        FailureReason::Transport(source.to_string())
                    }
                    other => FailureReason::Transport(other.to_string()),
                };
                Classified {
                    endpoint,
                    outcome: ProbeOutcome::Failed(reason),
                }
            }
        }
    }

    async fn probe(&self, endpoint: &Endpoint) -> ProbeResult<Probed> {
        let Some(node) = self.producer.produce(endpoint)? else {
            return Ok(Probed::Incompatible);
        };

        let request = ProbeRequest::new(
            self.settings.method.to_http(),
            self.settings.url.clone(),
            self.settings.timeout,
        )
        .header(USER_AGENT, self.settings.user_agent.clone())
        .via(Some(node));

        let started = Instant::now();
        let response = self.requester.request(&request).await?;
        let latency = started.elapsed().as_millis().to_string();

        Ok(Probed::Responded {
            status: response.status.as_u16(),
            latency,
        })
    }

    fn accept(&self, mut endpoint: Endpoint, latency: String, cached: bool) -> Classified {
        endpoint.annotate_latency(&latency, self.settings.show_latency);
        Classified {
            endpoint,
            outcome: ProbeOutcome::Valid { latency, cached },
        }
    }

    fn store(&self, key: Option<&str>, endpoint: &Endpoint, entry: CacheEntry) {
        let (Some(cache), Some(key)) = (self.active_cache(), key) else {
            return;
        };
        if let Err(e) = cache.set(key, &entry) {
            warn!(endpoint = %endpoint.name(), error = %e, "cache write failed");
        } else {
            info!(endpoint = %endpoint.name(), success = entry.is_success(), "cached probe result");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::node::BuiltinProducer;
    use crate::transport::ProbeResponse;
    use async_trait::async_trait;
    use http::StatusCode;
    use relaycheck_core::CheckConfig;
    use relaycheck_state::CacheStore;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Answers every request with a fixed status after `delay`, or fails.
    struct ScriptedTransport {
        status: Option<u16>,
        delay: Duration,
        calls: AtomicUsize,
    }

    impl ScriptedTransport {
        fn answering(status: u16, delay_ms: u64) -> Arc<Self> {
            Arc::new(Self {
                status: Some(status),
                delay: Duration::from_millis(delay_ms),
                calls: AtomicUsize::new(0),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                status: None,
                delay: Duration::ZERO,
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn send(&self, request: ProbeRequest) -> Result<ProbeResponse, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            assert!(request.node.is_some(), "probe must be routed through the node");
            tokio::time::sleep(self.delay).await;
            match self.status {
                Some(status) => Ok(ProbeResponse {
                    status: StatusCode::from_u16(status).unwrap(),
                    body: Default::default(),
                }),
                None => Err(TransportError::Proxy("refused".into())),
            }
        }
    }

    fn settings(edit: impl FnOnce(&mut CheckConfig)) -> Arc<ProbeSettings> {
        let mut config = CheckConfig {
            retries: 0,
            ..Default::default()
        };
        edit(&mut config);
        Arc::new(config.validate().unwrap())
    }

    fn http_endpoint(name: &str) -> Endpoint {
        serde_json::from_value(json!({
            "name": name, "type": "http", "server": "10.0.0.1", "port": 3128
        }))
        .unwrap()
    }

    fn classifier(settings: Arc<ProbeSettings>, transport: Arc<ScriptedTransport>) -> Classifier {
        Classifier::new(settings, Arc::new(BuiltinProducer), transport)
    }

    fn memory_cache() -> Arc<CacheStore> {
        Arc::new(CacheStore::open_in_memory(Duration::from_secs(3600)).unwrap())
    }

    #[tokio::test(start_paused = true)]
    async fn accepted_status_is_valid_with_latency() {
        let transport = ScriptedTransport::answering(204, 120);
        let classifier = classifier(settings(|_| {}), transport.clone());

        let result = classifier.classify(http_endpoint("hk")).await;
        assert_eq!(
            result.outcome,
            ProbeOutcome::Valid {
                latency: "120".into(),
                cached: false
            }
        );
        assert_eq!(result.endpoint.name(), "hk");
        assert_eq!(result.endpoint.latency(), Some("120"));
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn show_latency_prefixes_name() {
        let transport = ScriptedTransport::answering(204, 35);
        let classifier = classifier(settings(|c| c.show_latency = true), transport);

        let result = classifier.classify(http_endpoint("hk")).await;
        assert_eq!(result.endpoint.name(), "[35] hk");
    }

    #[tokio::test]
    async fn unexpected_status_fails_without_retry() {
        let transport = ScriptedTransport::answering(200, 0);
        let classifier = classifier(settings(|c| c.retries = 3), transport.clone());

        let result = classifier.classify(http_endpoint("x")).await;
        assert_eq!(
            result.outcome,
            ProbeOutcome::Failed(FailureReason::UnexpectedStatus(200))
        );
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn status_pattern_is_a_regex() {
        let transport = ScriptedTransport::answering(200, 0);
        let classifier = classifier(settings(|c| c.status = "^2\\d\\d$".into()), transport);
        assert!(classifier.classify(http_endpoint("x")).await.outcome.is_valid());
    }

    #[tokio::test]
    async fn unsupported_protocol_is_incompatible() {
        let transport = ScriptedTransport::answering(204, 0);
        let classifier = classifier(settings(|_| {}), transport.clone());
        let ep: Endpoint =
            serde_json::from_value(json!({ "name": "v", "type": "vmess", "server": "h", "port": 1 }))
                .unwrap();

        let result = classifier.classify(ep).await;
        assert_eq!(result.outcome, ProbeOutcome::Incompatible);
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn malformed_descriptor_fails() {
        let transport = ScriptedTransport::answering(204, 0);
        let classifier = classifier(settings(|_| {}), transport.clone());
        let ep: Endpoint =
            serde_json::from_value(json!({ "name": "broken", "type": "http" })).unwrap();

        let result = classifier.classify(ep).await;
        assert!(matches!(
            result.outcome,
            ProbeOutcome::Failed(FailureReason::Conversion(_))
        ));
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn transport_failure_is_contained() {
        let transport = ScriptedTransport::failing();
        let classifier = classifier(settings(|_| {}), transport);
        let result = classifier.classify(http_endpoint("dead")).await;
        assert!(matches!(
            result.outcome,
            ProbeOutcome::Failed(FailureReason::Transport(_))
        ));
        assert_eq!(result.endpoint.latency(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn cached_success_skips_network() {
        let cache = memory_cache();
        let settings = settings(|c| c.cache = true);

        let first = classifier(settings.clone(), ScriptedTransport::answering(204, 80))
            .with_cache(cache.clone());
        first.classify(http_endpoint("a")).await;
        assert_eq!(cache.len().unwrap(), 1);

        let transport = ScriptedTransport::answering(204, 5);
        let second = classifier(settings, transport.clone()).with_cache(cache);
        // Renamed endpoint hits the same entry.
        let result = second.classify(http_endpoint("renamed")).await;
        assert_eq!(
            result.outcome,
            ProbeOutcome::Valid {
                latency: "80".into(),
                cached: true
            }
        );
        assert_eq!(result.endpoint.latency(), Some("80"));
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn cached_failure_short_circuits() {
        let cache = memory_cache();
        let settings = settings(|c| c.cache = true);

        classifier(settings.clone(), ScriptedTransport::failing())
            .with_cache(cache.clone())
            .classify(http_endpoint("a"))
            .await;

        let transport = ScriptedTransport::answering(204, 0);
        let result = classifier(settings, transport.clone())
            .with_cache(cache)
            .classify(http_endpoint("a"))
            .await;
        assert_eq!(
            result.outcome,
            ProbeOutcome::Failed(FailureReason::CachedFailure)
        );
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn disabled_failed_cache_reprobes() {
        let cache = memory_cache();
        let settings = settings(|c| {
            c.cache = true;
            c.disable_failed_cache = true;
        });

        classifier(settings.clone(), ScriptedTransport::failing())
            .with_cache(cache.clone())
            .classify(http_endpoint("a"))
            .await;

        let transport = ScriptedTransport::answering(204, 0);
        let result = classifier(settings.clone(), transport.clone())
            .with_cache(cache.clone())
            .classify(http_endpoint("a"))
            .await;
        assert!(result.outcome.is_valid());
        assert_eq!(transport.calls(), 1);

        // The fresh success replaced the failure marker.
        let key = build_cache_key(true, &settings, &http_endpoint("a")).unwrap();
        assert!(cache.get(&key).unwrap().unwrap().is_success());
        assert_eq!(cache.len().unwrap(), 1);
    }

    #[tokio::test]
    async fn cache_ignored_when_disabled() {
        let cache = memory_cache();
        let transport = ScriptedTransport::answering(204, 0);
        let classifier = classifier(settings(|_| {}), transport.clone()).with_cache(cache.clone());

        classifier.classify(http_endpoint("a")).await;
        classifier.classify(http_endpoint("a")).await;
        assert_eq!(transport.calls(), 2);
        assert!(cache.is_empty().unwrap());
    }

    #[tokio::test]
    async fn incompatible_is_not_cached() {
        let cache = memory_cache();
        let classifier = classifier(
            settings(|c| c.cache = true),
            ScriptedTransport::answering(204, 0),
        )
        .with_cache(cache.clone());
        let ep: Endpoint =
            serde_json::from_value(json!({ "name": "s", "type": "ss", "server": "h", "port": 1 }))
                .unwrap();
        classifier.classify(ep).await;
        assert!(cache.is_empty().unwrap());
    }
}
