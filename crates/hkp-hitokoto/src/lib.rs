//! Hitokoto HTTP adapter.
//!
//! One GET per call against `{api_url}?c={letter}`; retries belong to the core.

use std::time::Duration;

use async_trait::async_trait;
use hkp_core::{errors::Error, fetch::SentenceSource, sentence::Category, sentence::Sentence, Result};
use tracing::debug;

#[derive(Clone, Debug)]
pub struct HitokotoClient {
    api_url: String,
    http: reqwest::Client,
}

impl HitokotoClient {
    pub fn new(api_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .user_agent(concat!("hkp/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Config(format!("http client build error: {e}")))?;
        Ok(Self {
            api_url: api_url.into(),
            http,
        })
    }
}

#[async_trait]
impl SentenceSource for HitokotoClient {
    async fn fetch(&self, category: Option<Category>) -> Result<Sentence> {
        let mut req = self.http.get(&self.api_url).query(&[("encode", "json")]);
        if let Some(c) = category.filter(|c| *c != Category::Unclassified) {
            req = req.query(&[("c", c.code())]);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| Error::TransientFetch(format!("hitokoto request error: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::TransientFetch(format!(
                "hitokoto returned {status}: {}",
                body.chars().take(200).collect::<String>()
            )));
        }

        let body = resp
            .text()
            .await
            .map_err(|e| Error::TransientFetch(format!("hitokoto body read error: {e}")))?;

        let sentence = parse_sentence(&body)?;
        debug!(id = sentence.id, category = %sentence.category, "fetched sentence");
        Ok(sentence)
    }
}

/// Decode one API payload. Anything undecodable is permanent.
pub fn parse_sentence(body: &str) -> Result<Sentence> {
    let sentence: Sentence = serde_json::from_str(body)
        .map_err(|e| Error::MalformedResponse(format!("hitokoto json error: {e}")))?;
    if sentence.text.trim().is_empty() {
        return Err(Error::MalformedResponse(
            "hitokoto returned empty text".to_string(),
        ));
    }
    Ok(sentence)
}
