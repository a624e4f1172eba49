use crate::boosts::Boost;
use crate::config;
use crate::error::{ExtractionError, ParseError};

use percent_encoding::percent_decode_str;
use reqwest::redirect::Policy;
use serde_json::Value;
use std::time::Duration;
use tracing::{info, warn};

/// Fills in a boost's boostagram from inline data or, for RSS payments,
/// from the `x-rss-payment` header served at the URL in the comment.
#[derive(Clone, Debug)]
pub struct BoostagramExtractor {
    client: reqwest::Client,
    header: String,
    marker: String,
}

impl BoostagramExtractor {
    pub fn new(cfg: &config::RssPayment) -> Result<Self, reqwest::Error> {
        // Redirects are not followed: the header lives on the first response.
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .redirect(Policy::none())
            .build()?;

        Ok(Self {
            client,
            header: cfg.header.to_lowercase(),
            marker: cfg.marker.clone(),
        })
    }

    /// Leaves inline boostagrams alone. Fallback failures are logged and
    /// the boost keeps a null boostagram.
    pub async fn resolve(&self, boost: &mut Boost) {
        if boost.boostagram.is_some() {
            return;
        }

        let url = match extract_rss_payment_url(boost.comment(), &self.marker) {
            Some(url) => url.to_string(),
            None => return,
        };

        info!(identifier = %boost.identifier, %url, "found rss payment url in comment");

        match self.fetch_rss_payment(&url).await {
            Ok(boostagram) => boost.boostagram = boostagram,
            Err(err) => {
                warn!(identifier = %boost.identifier, %url, "failed to fetch rss payment boostagram: {}", err);
                boost.boostagram = None;
            }
        }
    }

    pub async fn fetch_rss_payment(&self, url: &str) -> Result<Option<Value>, ExtractionError> {
        let resp = self.client.head(url).send().await?;

        let raw = resp
            .headers()
            .get(self.header.as_str())
            .and_then(|value| value.to_str().ok())
            .filter(|value| !value.is_empty())
            .ok_or_else(|| ExtractionError::MissingHeader(self.header.clone()))?;

        decode_rss_payment_header(&self.header, raw)
    }
}

/// Finds the first http(s) URL after the marker, e.g. the URL in
/// `"rss::payment::stream https://example.com/ep1 thanks!"`.
pub fn extract_rss_payment_url<'a>(comment: &'a str, marker: &str) -> Option<&'a str> {
    let idx = comment.find(marker)?;

    comment[idx..]
        .split_whitespace()
        .find(|part| part.starts_with("http://") || part.starts_with("https://"))
}

/// The header value is form-style percent-encoded JSON (`+` for spaces).
pub fn decode_rss_payment_header(header: &str, raw: &str) -> Result<Option<Value>, ExtractionError> {
    let unplussed = raw.replace('+', " ");

    let decoded = percent_decode_str(&unplussed)
        .decode_utf8()
        .map_err(|e| ExtractionError::Decode {
            header: header.to_string(),
            reason: e.to_string(),
        })?;

    let value: Value = serde_json::from_str(&decoded).map_err(|e| ExtractionError::Decode {
        header: header.to_string(),
        reason: e.to_string(),
    })?;

    Ok(match value {
        Value::Null => None,
        other => Some(other),
    })
}

/// Decodes a TLV record delivered as a JSON string (device-reported webhooks).
pub fn boostagram_from_tlv(tlv: &str) -> Result<Value, ParseError> {
    let value: Value = serde_json::from_str(tlv).map_err(ParseError::Tlv)?;

    if !value.is_object() {
        return Err(ParseError::Tlv(serde::de::Error::custom("tlv boostagram is not an object")));
    }

    Ok(value)
}
