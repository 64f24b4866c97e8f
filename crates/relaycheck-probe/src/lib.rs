//! relaycheck-probe — reachability probing through proxy endpoints.
//!
//! Each endpoint descriptor is converted into a dialable node, a test URL
//! is fetched through it, and the response status decides whether the
//! endpoint is usable. Probes run with bounded concurrency; results may be
//! cached across runs and failures are reported to Telegram.
//!
//! # Architecture
//!
//! ```text
//! Checker
//!   ├── BoundedScheduler (admission window over a JoinSet)
//!   │   └── Classifier::classify() per endpoint
//!   │       ├── build_cache_key() → ResultCache lookup
//!   │       ├── NodeProducer::produce() → DialNode
//!   │       └── Requester (linear backoff) → Transport::send()
//!   ├── ResultBuckets (valid / incompatible / failed)
//!   └── Notifier (Telegram failure summary)
//! ```
//!
//! Probe failures never propagate: every endpoint ends up in exactly one
//! bucket. Only invalid settings and a failed TLS setup abort a run before
//! anything is scheduled.

pub mod cache_key;
pub mod checker;
pub mod classifier;
pub mod error;
pub mod node;
pub mod pool;
pub mod report;
pub mod requester;
pub mod results;
pub mod transport;
mod tunnel;

pub use cache_key::build_cache_key;
pub use checker::{CheckReport, Checker, describe_failures};
pub use classifier::{Classified, Classifier};
pub use error::{ProbeError, ProbeResult, TransportError};
pub use node::{BuiltinProducer, Credentials, DialNode, NodeProducer, ProxyServer};
pub use pool::{BatchReport, BoundedScheduler};
pub use report::{Notifier, TelegramNotifier, failure_message, report_failures};
pub use requester::{Requester, RetryPolicy};
pub use results::{FailedEndpoint, ResultBuckets};
pub use transport::{HyperTransport, ProbeRequest, ProbeResponse, TlsConfig, Transport};
