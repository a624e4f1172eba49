use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// One persisted payment record.
///
/// Field order is the serialization order, and that serialization is the
/// content of the published event, so do not reorder fields.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Boost {
	#[serde(default, deserialize_with = "lenient_f64")]
	pub amount: f64,
	#[serde(default)]
	pub boostagram: Option<Value>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub comment: Option<String>,
	#[serde(default, deserialize_with = "lenient_string")]
	pub created_at: String,
	#[serde(default, deserialize_with = "lenient_f64")]
	pub creation_date: f64,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub description: Option<String>,
	pub identifier: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub payer_name: Option<String>,
	#[serde(default, deserialize_with = "lenient_f64")]
	pub value: f64,
}

impl Boost {
	/// Typed view of the boostagram blob. A missing blob yields the default.
	pub fn parsed_boostagram(&self) -> Boostagram {
		self.boostagram.as_ref().map(Boostagram::from_value).unwrap_or_default()
	}

	pub fn comment(&self) -> &str {
		self.comment.as_deref().unwrap_or_default()
	}
}

/// Structured boost metadata.
///
/// Senders disagree about field types (`action` may be `2` or `"boost"`,
/// `feedID` may be a number or a numeric string), so every field decodes
/// leniently and falls back to its default instead of failing the record.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct Boostagram {
	#[serde(deserialize_with = "lenient_string")]
	pub action: String,
	#[serde(deserialize_with = "lenient_string")]
	pub podcast: String,
	#[serde(deserialize_with = "lenient_string")]
	pub episode: String,
	#[serde(deserialize_with = "lenient_string")]
	pub app_name: String,
	#[serde(deserialize_with = "lenient_string")]
	pub sender_name: String,
	#[serde(deserialize_with = "lenient_string")]
	pub message: String,
	#[serde(deserialize_with = "lenient_i64")]
	pub value_msat_total: i64,
	#[serde(rename = "feedID", deserialize_with = "lenient_opt_i64")]
	pub feed_id: Option<i64>,
	#[serde(rename = "itemID", deserialize_with = "lenient_opt_i64")]
	pub item_id: Option<i64>,
	#[serde(deserialize_with = "lenient_string")]
	pub guid: String,
	#[serde(deserialize_with = "lenient_string")]
	pub episode_guid: String,

	// splitkit
	#[serde(rename = "blockGuid", deserialize_with = "lenient_string")]
	pub block_guid: String,
	#[serde(rename = "eventGuid", deserialize_with = "lenient_string")]
	pub event_guid: String,

	#[serde(deserialize_with = "lenient_string")]
	pub remote_feed_guid: String,
	#[serde(deserialize_with = "lenient_string")]
	pub remote_item_guid: String,
}

impl Boostagram {
	/// Anything that is not a JSON object decodes to the empty boostagram.
	pub fn from_value(value: &Value) -> Self {
		Boostagram::deserialize(value).unwrap_or_default()
	}

	pub fn is_boost(&self) -> bool {
		self.action.eq_ignore_ascii_case("boost")
	}
}

fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
	D: Deserializer<'de>,
{
	Ok(match Value::deserialize(deserializer)? {
		Value::String(s) => s,
		Value::Number(n) => n.to_string(),
		Value::Bool(b) => b.to_string(),
		_ => String::new(),
	})
}

fn lenient_i64<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
	D: Deserializer<'de>,
{
	Ok(as_i64(&Value::deserialize(deserializer)?).unwrap_or_default())
}

fn lenient_opt_i64<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
	D: Deserializer<'de>,
{
	Ok(as_i64(&Value::deserialize(deserializer)?))
}

fn lenient_f64<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
	D: Deserializer<'de>,
{
	Ok(match Value::deserialize(deserializer)? {
		Value::Number(n) => n.as_f64().unwrap_or_default(),
		Value::String(s) => s.trim().parse().unwrap_or_default(),
		_ => 0.0,
	})
}

fn as_i64(value: &Value) -> Option<i64> {
	match value {
		Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
		Value::String(s) => {
			let s = s.trim();
			s.parse::<i64>().ok().or_else(|| s.parse::<f64>().ok().map(|f| f as i64))
		}
		_ => None,
	}
}
