//! PDF/PPTX/image → markdown via the Mistral OCR API, grounded on
//! `ai-client`'s own "thin reqwest wrapper per provider" idiom
//! (`openai/client.rs`) rather than pulling in a heavier SDK crate.

use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};

#[async_trait]
pub trait OcrAdapter: Send + Sync {
    async fn extract_markdown(&self, bytes: &[u8], mime_type: &str) -> anyhow::Result<String>;
}

const MISTRAL_OCR_URL: &str = "https://api.mistral.ai/v1/ocr";

pub struct MistralOcrAdapter {
    http: reqwest::Client,
    api_key: String,
}

impl MistralOcrAdapter {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: api_key.into(),
        }
    }
}

#[derive(Serialize)]
struct OcrRequest<'a> {
    model: &'a str,
    document: OcrDocument,
}

#[derive(Serialize)]
struct OcrDocument {
    #[serde(rename = "type")]
    kind: &'static str,
    document_url: String,
}

#[derive(Deserialize)]
struct OcrResponse {
    pages: Vec<OcrPage>,
}

#[derive(Deserialize)]
struct OcrPage {
    markdown: String,
}

#[async_trait]
impl OcrAdapter for MistralOcrAdapter {
    async fn extract_markdown(&self, bytes: &[u8], mime_type: &str) -> anyhow::Result<String> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
        let request = OcrRequest {
            model: "mistral-ocr-latest",
            document: OcrDocument {
                kind: "document_url",
                document_url: format!("data:{mime_type};base64,{encoded}"),
            },
        };

        let resp = self
            .http
            .post(MISTRAL_OCR_URL)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("mistral OCR error ({status}): {body}");
        }

        let parsed: OcrResponse = resp.json().await?;
        Ok(parsed
            .pages
            .into_iter()
            .map(|p| p.markdown)
            .collect::<Vec<_>>()
            .join("\n\n"))
    }
}

/// Test double that never calls out to the network.
pub struct NoopOcrAdapter;

#[async_trait]
impl OcrAdapter for NoopOcrAdapter {
    async fn extract_markdown(&self, _bytes: &[u8], _mime_type: &str) -> anyhow::Result<String> {
        Ok(String::new())
    }
}
