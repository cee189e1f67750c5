//! Document extraction collaborator: buffer in, structured JSON out.
//!
//! `AnthropicExtractor` talks to the Messages API directly over `reqwest`,
//! sending the document as a base64 `document`/`image` block.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::config::ExtractionConfig;
use crate::error::ExtractionError;
use crate::skills::AiUsage;

const MESSAGES_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 4000;

/// USD per million tokens.
const INPUT_COST_PER_MTOK: Decimal = dec!(3);
const OUTPUT_COST_PER_MTOK: Decimal = dec!(15);

/// What kind of document is being extracted; picks the schema and prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    Invoice,
    Contract,
    /// Let the extraction service decide.
    Auto,
}

impl DocumentKind {
    /// Infer the kind from a file name.
    pub fn from_name(name: &str) -> Self {
        let lower = name.to_lowercase();
        if lower.contains("invoice") || lower.contains("statement") {
            Self::Invoice
        } else if lower.contains("contract") || lower.contains("agreement") {
            Self::Contract
        } else {
            Self::Auto
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Invoice => "invoice",
            Self::Contract => "contract",
            Self::Auto => "auto",
        }
    }

    /// JSON template the service must fill in.
    pub fn schema(&self) -> serde_json::Value {
        match self {
            Self::Invoice => serde_json::json!({
                "source_file": "",
                "document_type": "invoice",
                "property_name": null,
                "property_address": null,
                "vendor_name": null,
                "vendor_account_number": null,
                "billing_period": { "start_date": null, "end_date": null },
                "invoice": {
                    "invoice_number": null,
                    "invoice_date": null,
                    "due_date": null,
                    "amount_due": null,
                    "subtotal": null,
                    "line_items": []
                }
            }),
            Self::Contract => serde_json::json!({
                "source_file": "",
                "document_type": "contract",
                "property_name": null,
                "vendor_name": null,
                "contract": {
                    "effective_date": null,
                    "expiration_date": null,
                    "initial_term_years": null,
                    "monthly_total": null,
                    "clauses": {},
                    "service_schedules": []
                }
            }),
            Self::Auto => serde_json::json!({
                "source_file": "",
                "document_type": null,
                "property_name": null,
                "vendor_name": null
            }),
        }
    }

    pub fn prompt(&self) -> String {
        let schema = serde_json::to_string_pretty(&self.schema()).unwrap_or_default();
        let mut prompt = format!(
            "Extract all information from this waste management document into structured JSON.\n\n\
             Return ONLY valid JSON in this exact format:\n{schema}\n\n\
             CRITICAL REQUIREMENTS:\n\
             - Property name is CRITICAL - extract carefully from any location in document\n\
             - Extract ALL amounts as strings without $ or commas (e.g., \"1250.00\")\n\
             - Extract ALL dates in YYYY-MM-DD format\n\
             - If a field cannot be found, use null\n\
             - For line_items, include date, description, category, quantity, extended_amount"
        );
        if *self == Self::Invoice {
            prompt.push_str(
                "\n\nLine item categories must be one of: base, extra_pickup, contamination, \
                 overage, fuel_surcharge, franchise_fee, admin, env_charge, rental, disposal, bulk",
            );
        }
        prompt
    }
}

/// One document to extract.
#[derive(Debug, Clone)]
pub struct ExtractionRequest {
    pub document_name: String,
    pub media_type: String,
    pub content: Vec<u8>,
    pub kind: DocumentKind,
}

/// Structured record plus what it cost to produce.
#[derive(Debug, Clone)]
pub struct ExtractionResponse {
    pub record: serde_json::Value,
    pub usage: AiUsage,
}

/// Narrow boundary to a text/vision extraction service.
#[async_trait]
pub trait DocumentExtractor: Send + Sync {
    /// Extract one document. Must return `ExtractionError::Cancelled` promptly
    /// once `cancel` fires.
    async fn extract(
        &self,
        request: ExtractionRequest,
        cancel: &CancellationToken,
    ) -> Result<ExtractionResponse, ExtractionError>;
}

/// Anthropic Messages API extractor.
pub struct AnthropicExtractor {
    api_key: SecretString,
    model: String,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    usage: MessagesUsage,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
struct MessagesUsage {
    input_tokens: u64,
    output_tokens: u64,
}

impl AnthropicExtractor {
    pub fn new(config: &ExtractionConfig) -> Self {
        Self {
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            client: reqwest::Client::new(),
        }
    }

    fn request_body(&self, request: &ExtractionRequest) -> Result<serde_json::Value, ExtractionError> {
        let block_type = match request.media_type.as_str() {
            "application/pdf" => "document",
            image if image.starts_with("image/") => "image",
            other => {
                return Err(ExtractionError::RequestFailed {
                    document: request.document_name.clone(),
                    reason: format!("media type {other} cannot be sent for extraction"),
                });
            }
        };
        Ok(serde_json::json!({
            "model": self.model,
            "max_tokens": MAX_TOKENS,
            "messages": [{
                "role": "user",
                "content": [
                    {
                        "type": block_type,
                        "source": {
                            "type": "base64",
                            "media_type": request.media_type,
                            "data": BASE64.encode(&request.content),
                        }
                    },
                    { "type": "text", "text": request.kind.prompt() }
                ]
            }]
        }))
    }

    async fn call(&self, request: &ExtractionRequest) -> Result<ExtractionResponse, ExtractionError> {
        let document = request.document_name.clone();
        let failed = |reason: String| ExtractionError::RequestFailed {
            document: document.clone(),
            reason,
        };

        let resp = self
            .client
            .post(MESSAGES_URL)
            .header("x-api-key", self.api_key.expose_secret())
            .header("anthropic-version", API_VERSION)
            .json(&self.request_body(request)?)
            .send()
            .await
            .map_err(|e| failed(e.to_string()))?;

        let status = resp.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = resp
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(std::time::Duration::from_secs);
            return Err(ExtractionError::RateLimited { retry_after });
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(failed(format!("HTTP {status}: {body}")));
        }

        let parsed: MessagesResponse = resp.json().await.map_err(|e| {
            ExtractionError::InvalidResponse {
                document: document.clone(),
                reason: e.to_string(),
            }
        })?;

        let text = parsed
            .content
            .iter()
            .find(|block| block.kind == "text")
            .and_then(|block| block.text.as_deref())
            .ok_or_else(|| ExtractionError::InvalidResponse {
                document: document.clone(),
                reason: "no text block in response".to_string(),
            })?;

        let mut record: serde_json::Value =
            serde_json::from_str(strip_code_fences(text)).map_err(|e| {
                ExtractionError::InvalidResponse {
                    document: document.clone(),
                    reason: format!("reply is not JSON: {e}"),
                }
            })?;
        if let Some(obj) = record.as_object_mut() {
            obj.insert("source_file".to_string(), serde_json::json!(document));
        }

        Ok(ExtractionResponse {
            record,
            usage: usage_cost(parsed.usage.input_tokens, parsed.usage.output_tokens),
        })
    }
}

#[async_trait]
impl DocumentExtractor for AnthropicExtractor {
    async fn extract(
        &self,
        request: ExtractionRequest,
        cancel: &CancellationToken,
    ) -> Result<ExtractionResponse, ExtractionError> {
        tracing::debug!(
            document = %request.document_name,
            kind = request.kind.as_str(),
            bytes = request.content.len(),
            "Extracting document"
        );
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ExtractionError::Cancelled {
                document: request.document_name.clone(),
            }),
            result = self.call(&request) => result,
        }
    }
}

/// Token counts priced at the extractor's per-million rates.
pub fn usage_cost(input_tokens: u64, output_tokens: u64) -> AiUsage {
    let million = Decimal::from(1_000_000u64);
    AiUsage {
        input_tokens,
        output_tokens,
        cost_usd: (Decimal::from(input_tokens) * INPUT_COST_PER_MTOK
            + Decimal::from(output_tokens) * OUTPUT_COST_PER_MTOK)
            / million,
    }
}

/// Strip a Markdown code fence around a JSON reply, if present.
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let body = if let Some(start) = trimmed.find("```json") {
        &trimmed[start + "```json".len()..]
    } else if let Some(start) = trimmed.find("```") {
        &trimmed[start + 3..]
    } else {
        return trimmed;
    };
    match body.find("```") {
        Some(end) => body[..end].trim(),
        None => body.trim(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_from_name() {
        assert_eq!(DocumentKind::from_name("March_Invoice.pdf"), DocumentKind::Invoice);
        assert_eq!(DocumentKind::from_name("statement-04.png"), DocumentKind::Invoice);
        assert_eq!(DocumentKind::from_name("Service Agreement.pdf"), DocumentKind::Contract);
        assert_eq!(DocumentKind::from_name("scan001.jpg"), DocumentKind::Auto);
    }

    #[test]
    fn strips_fences() {
        assert_eq!(strip_code_fences("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fences("Here:\n```\n[1]\n```\nthanks"), "[1]");
        assert_eq!(strip_code_fences("  {\"b\":2} "), "{\"b\":2}");
    }

    #[test]
    fn prices_tokens() {
        let usage = usage_cost(1_000_000, 100_000);
        assert_eq!(usage.cost_usd, dec!(4.5));
        assert_eq!(usage.input_tokens, 1_000_000);
    }

    #[test]
    fn invoice_prompt_lists_categories() {
        assert!(DocumentKind::Invoice.prompt().contains("fuel_surcharge"));
        assert!(!DocumentKind::Contract.prompt().contains("fuel_surcharge"));
        assert!(DocumentKind::Contract.prompt().contains("expiration_date"));
    }

    #[test]
    fn only_pdf_and_images_are_sent() {
        let extractor = AnthropicExtractor::new(&ExtractionConfig {
            api_key: SecretString::from("sk-test".to_string()),
            model: "test-model".to_string(),
        });
        let request = |media_type: &str| ExtractionRequest {
            document_name: "a".to_string(),
            media_type: media_type.to_string(),
            content: vec![1],
            kind: DocumentKind::Auto,
        };
        let block = |media_type: &str| {
            extractor.request_body(&request(media_type)).unwrap()["messages"][0]["content"][0]["type"]
                .clone()
        };
        assert_eq!(block("application/pdf"), "document");
        assert_eq!(block("image/png"), "image");
        assert!(matches!(
            extractor.request_body(&request("text/csv")),
            Err(ExtractionError::RequestFailed { .. })
        ));
    }

    #[tokio::test]
    async fn cancelled_before_call_returns_cancelled() {
        let extractor = AnthropicExtractor::new(&ExtractionConfig {
            api_key: SecretString::from("sk-test".to_string()),
            model: "test-model".to_string(),
        });
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = extractor
            .extract(
                ExtractionRequest {
                    document_name: "a.pdf".to_string(),
                    media_type: "application/pdf".to_string(),
                    content: vec![1, 2, 3],
                    kind: DocumentKind::Auto,
                },
                &cancel,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractionError::Cancelled { .. }));
    }
}
