//! Hosted email API client (Postmark wire format).

use std::time::Instant;

use async_trait::async_trait;
use metrics::histogram;
use reqwest::{Client, StatusCode, Url};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::application::mailer::{EmailProvider, OutboundMessage, ProviderError, ProviderReceipt};
use crate::config::EmailSettings;
use crate::infra::error::InfraError;

const SERVER_TOKEN_HEADER: &str = "X-Postmark-Server-Token";

/// Token the provider accepts without delivering anything.
const SANDBOX_TOKEN: &str = "POSTMARK_API_TEST";

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct WireHeader<'a> {
    name: &'a str,
    value: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct WireMessage<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    html_body: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_to: Option<&'a str>,
    message_stream: &'a str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    headers: Vec<WireHeader<'a>>,
    #[serde(skip_serializing_if = "std::collections::BTreeMap::is_empty")]
    metadata: &'a std::collections::BTreeMap<String, String>,
}

impl<'a> WireMessage<'a> {
    fn new(message: &'a OutboundMessage, stream: &'a str) -> Self {
        Self {
            from: &message.from,
            to: &message.to,
            subject: &message.subject,
            html_body: &message.html_body,
            reply_to: message.reply_to.as_deref(),
            message_stream: stream,
            headers: message
                .headers
                .iter()
                .map(|(name, value)| WireHeader { name, value })
                .collect(),
            metadata: &message.metadata,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WireReceipt {
    #[serde(default)]
    to: Option<String>,
    #[serde(rename = "MessageID", default)]
    message_id: Option<String>,
    #[serde(default)]
    error_code: i64,
    #[serde(default)]
    message: String,
}

impl WireReceipt {
    fn into_receipt(self, fallback_to: &str) -> ProviderReceipt {
        ProviderReceipt {
            to: self.to.unwrap_or_else(|| fallback_to.to_string()),
            message_id: self.message_id.filter(|id| !id.is_empty()),
            error_code: self.error_code,
            message: self.message,
        }
    }
}

/// Sends single messages on the transactional stream and batches on the
/// broadcast stream.
#[derive(Clone)]
pub struct PostmarkClient {
    client: Client,
    base: Url,
    server_token: String,
    transactional_stream: String,
    broadcast_stream: String,
}

impl PostmarkClient {
    pub fn from_settings(settings: &EmailSettings) -> Result<Self, InfraError> {
        let client = Client::builder()
            .user_agent(concat!("quire/", env!("CARGO_PKG_VERSION")))
            .timeout(settings.request_timeout)
            .build()
            .map_err(InfraError::email_client)?;

        let server_token = match settings.server_token.as_deref() {
            Some(token) => token.to_string(),
            None if settings.sandbox => {
                tracing::warn!(
                    target = "quire::infra::email",
                    "email sandbox enabled; messages go to the provider test stream"
                );
                SANDBOX_TOKEN.to_string()
            }
            None => {
                return Err(InfraError::Setting {
                    key: "email.server_token",
                });
            }
        };

        Ok(Self {
            client,
            base: settings.base_url.clone(),
            server_token,
            transactional_stream: settings.transactional_stream.clone(),
            broadcast_stream: settings.broadcast_stream.clone(),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, ProviderError> {
        self.base
            .join(path)
            .map_err(|err| ProviderError::Transport(err.to_string()))
    }

    async fn post<B: Serialize + ?Sized>(
        &self,
        path: &str,
        endpoint: &'static str,
        body: &B,
    ) -> Result<Vec<u8>, ProviderError> {
        let url = self.endpoint(path)?;
        let started = Instant::now();
        let result = self
            .client
            .post(url)
            .header(SERVER_TOKEN_HEADER, &self.server_token)
            .header(reqwest::header::ACCEPT, "application/json")
            .json(body)
            .send()
            .await;
        histogram!("quire_provider_request_ms", "endpoint" => endpoint)
            .record(started.elapsed().as_secs_f64() * 1000.0);

        let response = result.map_err(|err| ProviderError::Transport(err.to_string()))?;
        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|err| ProviderError::Transport(err.to_string()))?;

        debug!(
            target = "quire::infra::email",
            endpoint,
            status = status.as_u16(),
            "email provider responded"
        );

        if !status.is_success() {
            return Err(rejection(status, &bytes));
        }
        Ok(bytes.to_vec())
    }
}

fn rejection(status: StatusCode, body: &[u8]) -> ProviderError {
    let message = serde_json::from_slice::<WireReceipt>(body)
        .map(|receipt| receipt.message)
        .unwrap_or_else(|_| String::from_utf8_lossy(body).into_owned());
    ProviderError::Rejected {
        status: status.as_u16(),
        message,
    }
}

fn decode_batch(
    body: &[u8],
    messages: &[OutboundMessage],
) -> Result<Vec<ProviderReceipt>, ProviderError> {
    let receipts: Vec<WireReceipt> =
        serde_json::from_slice(body).map_err(|err| ProviderError::Decode(err.to_string()))?;
    if receipts.len() != messages.len() {
        return Err(ProviderError::Decode(format!(
            "expected {} receipts, got {}",
            messages.len(),
            receipts.len()
        )));
    }
    Ok(receipts
        .into_iter()
        .zip(messages)
        .map(|(receipt, message)| receipt.into_receipt(&message.to))
        .collect())
}

#[async_trait]
impl EmailProvider for PostmarkClient {
    async fn send(&self, message: &OutboundMessage) -> Result<ProviderReceipt, ProviderError> {
        let wire = WireMessage::new(message, &self.transactional_stream);
        let body = self.post("email", "single", &wire).await?;
        let receipt: WireReceipt =
            serde_json::from_slice(&body).map_err(|err| ProviderError::Decode(err.to_string()))?;
        Ok(receipt.into_receipt(&message.to))
    }

    async fn send_batch(
        &self,
        messages: &[OutboundMessage],
    ) -> Result<Vec<ProviderReceipt>, ProviderError> {
        if messages.is_empty() {
            return Ok(Vec::new());
        }
        let wire: Vec<WireMessage<'_>> = messages
            .iter()
            .map(|message| WireMessage::new(message, &self.broadcast_stream))
            .collect();
        let body = self.post("email/batch", "batch", &wire).await?;
        decode_batch(&body, messages)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    fn message(to: &str) -> OutboundMessage {
        let mut metadata = BTreeMap::new();
        metadata.insert("email_id".to_string(), "e-1".to_string());
        OutboundMessage {
            from: "Quire <news@quire.test>".to_string(),
            to: to.to_string(),
            reply_to: None,
            subject: "Issue 1".to_string(),
            html_body: "<p>hi</p>".to_string(),
            headers: vec![("List-Unsubscribe".to_string(), "<https://u>".to_string())],
            metadata,
        }
    }

    fn settings(server_token: Option<&str>, sandbox: bool) -> EmailSettings {
        EmailSettings {
            base_url: Url::parse("https://api.postmarkapp.com").unwrap(),
            server_token: server_token.map(str::to_string),
            sandbox,
            webhook_token: None,
            broadcast_stream: "broadcast".to_string(),
            transactional_stream: "outbound".to_string(),
            batch_size: std::num::NonZeroU32::new(500).unwrap(),
            request_timeout: std::time::Duration::from_secs(5),
        }
    }

    #[test]
    fn missing_server_token_is_refused_outside_sandbox() {
        let err = PostmarkClient::from_settings(&settings(None, false))
            .err()
            .expect("token required");
        assert!(matches!(
            err,
            InfraError::Setting {
                key: "email.server_token"
            }
        ));

        let sandboxed = PostmarkClient::from_settings(&settings(None, true)).unwrap();
        assert_eq!(sandboxed.server_token, SANDBOX_TOKEN);

        let live = PostmarkClient::from_settings(&settings(Some("live-token"), false)).unwrap();
        assert_eq!(live.server_token, "live-token");
    }

    #[test]
    fn wire_message_uses_provider_field_names() {
        let outbound = message("a@quire.test");
        let value = serde_json::to_value(WireMessage::new(&outbound, "broadcast")).unwrap();

        assert_eq!(value["To"], "a@quire.test");
        assert_eq!(value["HtmlBody"], "<p>hi</p>");
        assert_eq!(value["MessageStream"], "broadcast");
        assert_eq!(value["Headers"][0]["Name"], "List-Unsubscribe");
        assert_eq!(value["Metadata"]["email_id"], "e-1");
        assert!(value.get("ReplyTo").is_none());
    }

    #[test]
    fn batch_receipts_keep_message_order() {
        let messages = vec![message("a@quire.test"), message("b@quire.test")];
        let body = br#"[
            {"ErrorCode":0,"Message":"OK","MessageID":"m-1","To":"a@quire.test"},
            {"ErrorCode":300,"Message":"Invalid email request"}
        ]"#;

        let receipts = decode_batch(body, &messages).unwrap();
        assert!(receipts[0].accepted());
        assert_eq!(receipts[0].message_id.as_deref(), Some("m-1"));
        assert!(!receipts[1].accepted());
        assert_eq!(receipts[1].to, "b@quire.test");
        assert_eq!(receipts[1].error_code, 300);
    }

    #[test]
    fn short_batch_response_is_a_decode_error() {
        let messages = vec![message("a@quire.test"), message("b@quire.test")];
        let body = br#"[{"ErrorCode":0,"Message":"OK","MessageID":"m-1"}]"#;
        assert!(matches!(
            decode_batch(body, &messages),
            Err(ProviderError::Decode(_))
        ));
    }

    #[test]
    fn rejection_prefers_provider_message() {
        let err = rejection(
            StatusCode::UNAUTHORIZED,
            br#"{"ErrorCode":10,"Message":"Bad or missing API token"}"#,
        );
        match err {
            ProviderError::Rejected { status, message } => {
                assert_eq!(status, 401);
                assert_eq!(message, "Bad or missing API token");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
