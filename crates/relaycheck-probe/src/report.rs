//! Failure reporting.
//!
//! After a run, endpoints in the failed bucket are summarised in a single
//! Telegram message. Delivery is attempted once; a failed delivery is
//! logged and otherwise ignored.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use http::header::CONTENT_TYPE;
use http::{HeaderValue, Method, Uri};
use tracing::{info, warn};

use relaycheck_core::TelegramTarget;

use crate::error::{ProbeError, ProbeResult};
use crate::requester::{Requester, RetryPolicy};
use crate::results::FailedEndpoint;
use crate::transport::{ProbeRequest, Transport};

pub const TELEGRAM_API: &str = "https://api.telegram.org";
const NOTIFY_TIMEOUT: Duration = Duration::from_millis(5000);

/// Delivers a text notification.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, text: &str) -> ProbeResult<()>;
}

/// Sends messages through the Telegram Bot API.
pub struct TelegramNotifier {
    target: TelegramTarget,
    requester: Requester,
    api_base: String,
}

impl TelegramNotifier {
    pub fn new(target: TelegramTarget, transport: Arc<dyn Transport>) -> Self {
        Self {
            target,
            requester: Requester::new(transport, RetryPolicy::no_retries()),
            api_base: TELEGRAM_API.to_string(),
        }
    }

    /// Override the API base URL (for testing).
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn notify(&self, text: &str) -> ProbeResult<()> {
        let uri: Uri = format!(
            "{}/bot{}/sendMessage",
            self.api_base.trim_end_matches('/'),
            self.target.bot_token
        )
        .parse()
        .map_err(|e| ProbeError::Notify(format!("invalid telegram url: {e}")))?;

        let body = serde_json::json!({
            "chat_id": self.target.chat_id,
            "text": text,
            "parse_mode": "MarkdownV2",
        });
        let request = ProbeRequest::new(Method::POST, uri, NOTIFY_TIMEOUT)
            .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
            .body(body.to_string());

        let response = self.requester.request(&request).await?;
        if !response.status.is_success() {
            return Err(ProbeError::Notify(format!(
                "telegram responded {}: {}",
                response.status,
                String::from_utf8_lossy(&response.body)
            )));
        }
        Ok(())
    }
}

/// Characters that must be escaped in MarkdownV2 text.
const MARKDOWN_SPECIAL: &[char] = &[
    '_', '*', '[', ']', '(', ')', '~', '`', '>', '#', '+', '-', '=', '|', '{', '}', '.', '!', '\\',
];

fn escape_markdown(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if MARKDOWN_SPECIAL.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Inside inline code only backtick and backslash need escaping.
fn escape_code(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if c == '`' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Render the failure summary.
pub fn failure_message(source_name: &str, failed: &[FailedEndpoint]) -> String {
    let title = if source_name.is_empty() {
        "Node check:".to_string()
    } else {
        format!("`{}` node check:", escape_code(source_name))
    };

    let lines = failed.iter().map(|f| {
        let cached = if f.is_cached() { " \\(cached\\)" } else { "" };
        format!(
            "❌ \\[{}\\] `{}`{cached}",
            escape_markdown(f.endpoint.kind()),
            escape_code(f.endpoint.name())
        )
    });

    std::iter::once(title)
        .chain(lines)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Send the failure summary if there is anything to report.
///
/// Returns whether a notification was delivered.
pub async fn report_failures(
    notifier: &dyn Notifier,
    source_name: &str,
    failed: &[FailedEndpoint],
) -> bool {
    if failed.is_empty() {
        return false;
    }
    let text = failure_message(source_name, failed);
    match notifier.notify(&text).await {
        Ok(()) => {
            info!(failed = failed.len(), "failure notification sent");
            true
        }
        Err(e) => {
            warn!(error = %e, "failure notification not delivered");
            false
        }
    }
}
