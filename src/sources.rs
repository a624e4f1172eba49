use crate::boosts::Boost;
use crate::error::ParseError;
use crate::extractor::boostagram_from_tlv;

use chrono::{DateTime, SecondsFormat};
use serde::Deserialize;
use serde_json::Value;
use std::fmt;

/// Helipad action code for a boost. Streams, auto-boosts etc. are ignored.
pub const HELIPAD_BOOST_ACTION: i64 = 2;

/// The upstream shapes a boost can arrive in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    /// Custodial wallet invoices, pushed by a trusted caller or pulled from the provider API.
    CustodialPull,
    /// Svix-signed provider webhooks.
    SignedPush,
    /// Helipad node webhooks.
    DeviceReported,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::CustodialPull => write!(f, "custodial"),
            SourceKind::SignedPush => write!(f, "signed-push"),
            SourceKind::DeviceReported => write!(f, "helipad"),
        }
    }
}

/// Result of mapping a native payload into the canonical model.
#[derive(Debug, Clone, PartialEq)]
pub enum Normalized {
    Boost(Boost),
    Ignored,
}

/// The parts of a Helipad webhook a boost is built from. Display fields
/// such as `sender` and `podcast` are also carried in `tlv` and are skipped.
#[derive(Deserialize, Debug, Clone)]
pub struct HelipadWebhook {
    pub index: i64,
    #[serde(default)]
    pub time: i64,
    #[serde(default)]
    pub value_msat: i64,
    #[serde(default)]
    pub action: i64,
    #[serde(default)]
    pub tlv: String,
    #[serde(default)]
    pub payment_info: Option<Value>,
}

impl HelipadWebhook {
    /// Sent payments carry `payment_info`; only received boosts are kept.
    pub fn is_received_boost(&self) -> bool {
        self.action == HELIPAD_BOOST_ACTION && self.payment_info.is_none()
    }

    pub fn into_boost(self) -> Result<Normalized, ParseError> {
        if !self.is_received_boost() {
            return Ok(Normalized::Ignored);
        }

        let boostagram = boostagram_from_tlv(&self.tlv)?;
        let sats = self.value_msat as f64 / 1000.0;

        let created_at = DateTime::from_timestamp(self.time, 0)
            .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Secs, true))
            .unwrap_or_default();

        Ok(Normalized::Boost(Boost {
            amount: sats,
            boostagram: Some(boostagram),
            comment: None,
            created_at,
            creation_date: self.time as f64,
            description: None,
            identifier: format!("helipad-{}", self.index),
            payer_name: None,
            value: sats,
        }))
    }
}

/// Decodes a raw request body of the given shape into a canonical boost.
pub fn normalize(kind: SourceKind, body: &[u8]) -> Result<Normalized, ParseError> {
    match kind {
        SourceKind::CustodialPull | SourceKind::SignedPush => {
            let boost: Boost = serde_json::from_slice(body)?;
            Ok(Normalized::Boost(boost))
        }
        SourceKind::DeviceReported => {
            let webhook: HelipadWebhook = serde_json::from_slice(body)?;
            webhook.into_boost()
        }
    }
}
