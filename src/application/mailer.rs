//! Outbound email seam. The HTTP client for the hosted provider lives in
//! `infra::email`; tests substitute a recording fake.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

/// One rendered message ready for the provider.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutboundMessage {
    pub from: String,
    pub to: String,
    pub reply_to: Option<String>,
    pub subject: String,
    pub html_body: String,
    pub headers: Vec<(String, String)>,
    pub metadata: BTreeMap<String, String>,
}

/// Per-message result reported by the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderReceipt {
    pub to: String,
    pub message_id: Option<String>,
    pub error_code: i64,
    pub message: String,
}

impl ProviderReceipt {
    pub fn accepted(&self) -> bool {
        self.error_code == 0 && self.message_id.is_some()
    }
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("email provider unreachable: {0}")]
    Transport(String),
    #[error("email provider rejected the request with status {status}: {message}")]
    Rejected { status: u16, message: String },
    #[error("email provider response could not be decoded: {0}")]
    Decode(String),
}

#[async_trait]
pub trait EmailProvider: Send + Sync {
    async fn send(&self, message: &OutboundMessage) -> Result<ProviderReceipt, ProviderError>;

    /// Receipts are returned in the order of `messages`.
    async fn send_batch(
        &self,
        messages: &[OutboundMessage],
    ) -> Result<Vec<ProviderReceipt>, ProviderError>;
}

/// `Name <address>` with quotes around names containing specials.
pub fn format_mailbox(name: &str, address: &str) -> String {
    let name = name.trim();
    if name.is_empty() {
        return address.to_string();
    }
    if name
        .chars()
        .any(|c| matches!(c, ',' | ';' | ':' | '<' | '>' | '@' | '"' | '(' | ')'))
    {
        let escaped = name.replace('\\', "\\\\").replace('"', "\\\"");
        format!("\"{escaped}\" <{address}>")
    } else {
        format!("{name} <{address}>")
    }
}
