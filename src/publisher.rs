use crate::boosts::{Boost, Boostagram};
use crate::error::PublishError;

use async_trait::async_trait;
use futures::future::join_all;
use futures::{SinkExt, StreamExt};
use nostr::{Event, EventBuilder, Keys, Kind, Tag};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout_at, Instant};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

/// Boosts are published as NIP-78 application specific data.
pub const BOOST_EVENT_KIND: Kind = Kind::ApplicationSpecificData;

/// Sends one signed event to one relay, then disconnects.
#[async_trait]
pub trait RelayClient: Send + Sync {
    async fn send(&self, relay: &str, event: &Event) -> Result<(), PublishError>;
}

/// Opens a fresh websocket per relay and waits for the relay's `OK`.
/// The socket is owned by the send future, so a send cut off by the
/// publish deadline closes the connection when it is dropped.
#[derive(Clone, Debug, Default)]
pub struct NostrRelayClient;

#[async_trait]
impl RelayClient for NostrRelayClient {
    async fn send(&self, relay: &str, event: &Event) -> Result<(), PublishError> {
        let (ws_stream, _) = connect_async(relay)
            .await
            .map_err(|e| PublishError::Connect(e.to_string()))?;

        let (mut write, mut read) = ws_stream.split();

        let message = serde_json::to_string(&("EVENT", event))?;
        write
            .send(Message::Text(message.into()))
            .await
            .map_err(|e| PublishError::Connect(e.to_string()))?;

        let event_id = event.id.to_hex();
        let result = loop {
            match read.next().await {
                Some(Ok(Message::Text(text))) => {
                    if let Some(accepted) = relay_ok(&text, &event_id) {
                        break accepted;
                    }
                    debug!(%relay, "ignoring relay message: {}", text.as_str());
                }
                Some(Ok(Message::Close(_))) | None => {
                    break Err(PublishError::Rejected("relay closed the connection".to_string()));
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => break Err(PublishError::Rejected(e.to_string())),
            }
        };

        let _ = write.send(Message::Close(None)).await;
        result
    }
}

/// Reads a `["OK", <event id>, <accepted>, <message>]` answer for `event_id`.
/// Anything else, such as a NOTICE, is `None`.
fn relay_ok(text: &str, event_id: &str) -> Option<Result<(), PublishError>> {
    let message: Vec<Value> = serde_json::from_str(text).ok()?;

    match message.as_slice() {
        [kind, id, accepted, rest @ ..] if kind == "OK" && id == event_id => {
            if accepted.as_bool()? {
                Some(Ok(()))
            } else {
                let reason = rest.first().and_then(Value::as_str).unwrap_or("rejected");
                Some(Err(PublishError::Rejected(reason.to_string())))
            }
        }
        _ => None,
    }
}

#[derive(Debug)]
pub struct RelayOutcome {
    pub relay: String,
    pub result: Result<(), PublishError>,
}

#[derive(Debug)]
pub struct PublishReport {
    pub event_id: String,
    pub dedup_id: String,
    pub outcomes: Vec<RelayOutcome>,
}

impl PublishReport {
    pub fn successes(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_ok()).count()
    }

    pub fn failures(&self) -> usize {
        self.outcomes.len() - self.successes()
    }
}

/// A reference tag pair: `k` carries the kind, `i` the namespaced id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceTag {
    pub kind: &'static str,
    pub id: String,
}

/// The exact bytes that become the event content.
pub fn canonical_content(boost: &Boost) -> Result<String, PublishError> {
    Ok(serde_json::to_string(boost)?)
}

/// Hex sha256 of the content, used as the `d` tag.
pub fn dedup_id(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}

pub fn reference_tags(bg: &Boostagram) -> Vec<ReferenceTag> {
    let sources: [(&'static str, &str); 6] = [
        ("podcast:guid", &bg.guid),
        ("podcast:item:guid", &bg.episode_guid),
        ("podcast:remote:guid", &bg.remote_feed_guid),
        ("podcast:remote:item:guid", &bg.remote_item_guid),
        ("thesplitkit:block:guid", &bg.block_guid),
        ("thesplitkit:event:guid", &bg.event_guid),
    ];

    sources
        .into_iter()
        .filter(|(_, value)| !value.is_empty())
        .map(|(kind, value)| ReferenceTag {
            kind,
            id: format!("{}:{}", kind, value),
        })
        .collect()
}

pub struct EventPublisher {
    keys: Keys,
    relays: Vec<String>,
    client: Arc<dyn RelayClient>,
    timeout: Duration,
}

impl EventPublisher {
    pub fn new(keys: Keys, relays: Vec<String>, client: Arc<dyn RelayClient>, timeout: Duration) -> Self {
        Self {
            keys,
            relays,
            client,
            timeout,
        }
    }

    pub fn relays(&self) -> &[String] {
        &self.relays
    }

    pub fn build_event(&self, boost: &Boost) -> Result<Event, PublishError> {
        let content = canonical_content(boost)?;
        let hash = dedup_id(&content);

        let mut tags = vec![Tag::identifier(hash)];

        for reference in reference_tags(&boost.parsed_boostagram()) {
            tags.push(custom_tag("i", reference.id)?);
            tags.push(custom_tag("k", reference.kind.to_string())?);
        }

        EventBuilder::new(BOOST_EVENT_KIND, content)
            .tags(tags)
            .sign_with_keys(&self.keys)
            .map_err(|e| PublishError::Event(e.to_string()))
    }

    /// Relay failures end up in the report. Only building the event can fail.
    pub async fn publish(&self, boost: &Boost) -> Result<PublishReport, PublishError> {
        let event = self.build_event(boost)?;
        let dedup = dedup_id(&event.content);
        let deadline = Instant::now() + self.timeout;

        let attempts = self.relays.iter().map(|relay| {
            let event = &event;
            async move {
                let result = match timeout_at(deadline, self.client.send(relay, event)).await {
                    Ok(result) => result,
                    Err(_) => Err(PublishError::Timeout),
                };

                match &result {
                    Ok(()) => info!(%relay, identifier = %boost.identifier, "published boost"),
                    Err(err) => warn!(%relay, identifier = %boost.identifier, "failed to publish boost: {}", err),
                }

                RelayOutcome {
                    relay: relay.clone(),
                    result,
                }
            }
        });

        let outcomes = join_all(attempts).await;

        Ok(PublishReport {
            event_id: event.id.to_hex(),
            dedup_id: dedup,
            outcomes,
        })
    }
}

fn custom_tag(name: &str, value: String) -> Result<Tag, PublishError> {
    Tag::parse([name.to_string(), value]).map_err(|e| PublishError::Event(e.to_string()))
}
