#![allow(dead_code)]

use async_trait::async_trait;
use boostboard::alby::AlbyClient;
use boostboard::boosts::Boost;
use boostboard::config::{self, Config, RssPayment};
use boostboard::error::{PublishError, StoreError};
use boostboard::extractor::BoostagramExtractor;
use boostboard::pipeline::IngestionPipeline;
use boostboard::publisher::{EventPublisher, RelayClient};
use boostboard::server::{AppState, Server};
use boostboard::sources::SourceKind;
use boostboard::store::{BoostQuery, BoostStore, MemoryBoostStore, Upserted};
use boostboard::token::{Credential, MemoryTokenStore, OAuthClient, TokenManager};
use boostboard::verifier::{BearerVerifier, SvixVerifier};
use nostr::{Event, Keys};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use wiremock::MockServer;

pub const WEBHOOK_SECRET: &str = "whsec_MfKQ9r8GKYqrTwjUPD8ILPZIo2LaLaSw";
pub const HELIPAD_TOKEN: &str = "helipad-token";
pub const CUSTODIAL_TOKEN: &str = "custodial-token";
pub const RELAYS: [&str; 3] = ["wss://relay.one", "wss://relay.two", "wss://relay.three"];

/// Accepts every event except on the relays listed as failing.
#[derive(Default)]
pub struct RecordingRelays {
    failing: HashSet<String>,
    sent: Mutex<Vec<(String, Event)>>,
}

impl RecordingRelays {
    pub fn failing(relays: &[&str]) -> Self {
        Self {
            failing: relays.iter().map(|relay| relay.to_string()).collect(),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn sent(&self) -> Vec<(String, Event)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl RelayClient for RecordingRelays {
    async fn send(&self, relay: &str, event: &Event) -> Result<(), PublishError> {
        if self.failing.contains(relay) {
            return Err(PublishError::Connect(format!("{} is down", relay)));
        }

        self.sent.lock().unwrap().push((relay.to_string(), event.clone()));
        Ok(())
    }
}

pub struct BrokenStore;

#[async_trait]
impl BoostStore for BrokenStore {
    async fn upsert(&self, _boost: &Boost) -> Result<Upserted, StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }

    async fn list(&self, _query: &BoostQuery) -> Result<Vec<Boost>, StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }
}

#[derive(Default)]
pub struct Options {
    pub failing_relays: Vec<&'static str>,
    pub broken_store: bool,
    pub access_token: Option<&'static str>,
}

pub struct TestApp {
    pub addr: String,
    pub store: Arc<MemoryBoostStore>,
    pub relays: Arc<RecordingRelays>,
    pub tokens: Arc<TokenManager>,
    pub provider: MockServer,
    pub client: reqwest::Client,
}

impl TestApp {
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.addr, path)
    }
}

fn test_config(provider: &MockServer) -> Config {
    let mut config = config::parse_config(&format!(
        r#"
        [database]
        url = "postgres://localhost/unused"

        [nostr]
        nsec = "unused"

        [alby]
        client_id = "client"
        client_secret = "shh"
        refresh_token = "bootstrap"
        webhook_secret = "{secret}"
        token_url = "{uri}/oauth/token"
        api_url = "{uri}"

        [helipad]
        token = "{helipad}"

        [custodial]
        token = "{custodial}"
        "#,
        secret = WEBHOOK_SECRET,
        uri = provider.uri(),
        helipad = HELIPAD_TOKEN,
        custodial = CUSTODIAL_TOKEN,
    ))
    .unwrap();

    config.server.host = "127.0.0.1".to_string();
    config.server.port = 0;
    config
}

pub async fn spawn_app() -> TestApp {
    spawn_app_with(Options::default()).await
}

pub async fn spawn_app_with(options: Options) -> TestApp {
    let provider = MockServer::start().await;
    let config = test_config(&provider);

    let memory = Arc::new(MemoryBoostStore::new());
    let store: Arc<dyn BoostStore> = if options.broken_store {
        Arc::new(BrokenStore)
    } else {
        memory.clone() as Arc<dyn BoostStore>
    };

    let relays = Arc::new(RecordingRelays::failing(&options.failing_relays));
    let publisher = EventPublisher::new(
        Keys::generate(),
        RELAYS.iter().map(|relay| relay.to_string()).collect(),
        relays.clone(),
        Duration::from_secs(2),
    );

    let extractor = BoostagramExtractor::new(&RssPayment::default()).unwrap();

    let pipeline = IngestionPipeline::new(extractor, store, Arc::new(publisher))
        .with_verifier(SourceKind::SignedPush, SvixVerifier::new(WEBHOOK_SECRET).unwrap())
        .with_verifier(SourceKind::DeviceReported, BearerVerifier::new(HELIPAD_TOKEN))
        .with_verifier(SourceKind::CustodialPull, BearerVerifier::new(CUSTODIAL_TOKEN));

    let token_store = match options.access_token {
        Some(access_token) => MemoryTokenStore::with_credential(Credential {
            access_token: access_token.to_string(),
            refresh_token: "refresh-1".to_string(),
            ..Default::default()
        }),
        None => MemoryTokenStore::new(),
    };

    let tokens = Arc::new(TokenManager::new(
        Box::new(token_store),
        OAuthClient::new(&config.alby),
        &config.alby.refresh_token,
    ));

    let state = AppState {
        pipeline: Arc::new(pipeline),
        tokens: tokens.clone(),
        alby: AlbyClient::new(&config.alby),
        admin: Some(Arc::new(BearerVerifier::new(CUSTODIAL_TOKEN))),
    };

    let server = Server::new(&config, state).await.unwrap();
    let port = server.port();
    tokio::spawn(server.run());

    TestApp {
        addr: format!("http://{}:{}", config.server.host, port),
        store: memory,
        relays,
        tokens,
        provider,
        client: reqwest::Client::new(),
    }
}

/// The `d` tag value relays deduplicate on.
pub fn d_tag(event: &Event) -> Option<String> {
    event
        .tags
        .iter()
        .map(|tag| tag.as_slice())
        .find(|values| values.first().map(String::as_str) == Some("d"))
        .and_then(|values| values.get(1).cloned())
}

pub fn helipad_boost(index: i64, action: i64) -> serde_json::Value {
    serde_json::json!({
        "index": index,
        "time": 1712433600,
        "value_msat": 21000,
        "value_msat_total": 25000,
        "action": action,
        "sender": "alice",
        "app": "Fountain",
        "message": "great show",
        "podcast": "Show",
        "episode": "Ep 1",
        "tlv": "{\"action\":\"boost\",\"podcast\":\"Show\",\"guid\":\"feed-guid\",\"episode_guid\":\"item-guid\",\"value_msat_total\":25000}",
        "remote_podcast": null,
        "remote_episode": null,
        "reply_sent": false,
        "payment_info": null
    })
}

pub fn invoice(identifier: &str, creation_date: i64) -> serde_json::Value {
    serde_json::json!({
        "amount": 100,
        "boostagram": {"action": "boost", "podcast": "Show", "guid": "feed-guid"},
        "comment": null,
        "created_at": "2024-04-06T20:00:00.000Z",
        "creation_date": creation_date,
        "identifier": identifier,
        "payer_name": "bob",
        "value": 100,
        "state": "SETTLED"
    })
}
