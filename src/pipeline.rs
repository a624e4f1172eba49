use crate::alby::{AlbyClient, INCOMING_PAGE_SIZE};
use crate::boosts::Boost;
use crate::error::{AuthError, IngestError};
use crate::extractor::BoostagramExtractor;
use crate::publisher::{EventPublisher, PublishReport};
use crate::sources::{normalize, Normalized, SourceKind};
use crate::store::{BoostStore, Upserted};
use crate::token::TokenManager;
use crate::verifier::WebhookVerifier;

use axum::http::HeaderMap;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Upper bound on provider pages walked by one sync.
pub const MAX_SYNC_PAGES: u32 = 10;

#[derive(Debug)]
pub enum Ingested {
    Stored {
        identifier: String,
        upserted: Upserted,
        report: Option<PublishReport>,
    },
    Ignored,
}

#[derive(Serialize, Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncSummary {
    pub fetched: usize,
    pub inserted: usize,
    pub duplicates: usize,
}

/// verify -> normalize -> extract -> persist -> publish, for every source shape.
pub struct IngestionPipeline {
    verifiers: HashMap<SourceKind, Box<dyn WebhookVerifier>>,
    extractor: BoostagramExtractor,
    store: Arc<dyn BoostStore>,
    publisher: Arc<EventPublisher>,
}

impl IngestionPipeline {
    pub fn new(extractor: BoostagramExtractor, store: Arc<dyn BoostStore>, publisher: Arc<EventPublisher>) -> Self {
        Self {
            verifiers: HashMap::new(),
            extractor,
            store,
            publisher,
        }
    }

    /// Sources without a verifier reject every request.
    pub fn with_verifier(mut self, kind: SourceKind, verifier: impl WebhookVerifier + 'static) -> Self {
        self.verifiers.insert(kind, Box::new(verifier));
        self
    }

    pub fn verifier(&self, kind: SourceKind) -> Result<&dyn WebhookVerifier, AuthError> {
        self.verifiers
            .get(&kind)
            .map(|verifier| verifier.as_ref())
            .ok_or(AuthError::Forbidden)
    }

    pub fn store(&self) -> &Arc<dyn BoostStore> {
        &self.store
    }

    pub async fn ingest(&self, kind: SourceKind, headers: &HeaderMap, body: &[u8]) -> Result<Ingested, IngestError> {
        self.verifier(kind)?.verify(body, headers)?;

        debug!(source = %kind, "incoming webhook {}", String::from_utf8_lossy(body));

        match normalize(kind, body)? {
            Normalized::Ignored => {
                debug!(source = %kind, "ignoring non-boost event");
                Ok(Ingested::Ignored)
            }
            Normalized::Boost(boost) => self.process(boost).await,
        }
    }

    /// The stages after authentication. Publishing problems are logged only.
    pub async fn process(&self, mut boost: Boost) -> Result<Ingested, IngestError> {
        self.extractor.resolve(&mut boost).await;

        let upserted = self.store.upsert(&boost).await.map_err(|err| {
            error!(identifier = %boost.identifier, "failed to save boost: {}", err);
            err
        })?;

        if upserted == Upserted::AlreadyPresent {
            info!(identifier = %boost.identifier, "boost already stored");
        }

        let report = match self.publisher.publish(&boost).await {
            Ok(report) => {
                info!(
                    identifier = %boost.identifier,
                    event_id = %report.event_id,
                    successes = report.successes(),
                    failures = report.failures(),
                    "published boost to relays"
                );
                Some(report)
            }
            Err(err) => {
                error!(identifier = %boost.identifier, "failed to publish boost: {}", err);
                None
            }
        };

        Ok(Ingested::Stored {
            identifier: boost.identifier,
            upserted,
            report,
        })
    }

    /// Pulls incoming invoices from the custodial provider and runs each
    /// through [`process`](Self::process). Stops at the first page that is
    /// short or holds nothing new.
    pub async fn sync(&self, tokens: &TokenManager, alby: &AlbyClient) -> Result<SyncSummary, IngestError> {
        let mut summary = SyncSummary::default();

        for page in 1..=MAX_SYNC_PAGES {
            let boosts = tokens
                .with_token(|token| async move { alby.incoming_invoices(&token, page).await })
                .await?;

            let fetched = boosts.len();
            let mut inserted = 0;

            for boost in boosts {
                if let Ingested::Stored { upserted, .. } = self.process(boost).await? {
                    match upserted {
                        Upserted::Inserted => inserted += 1,
                        Upserted::AlreadyPresent => summary.duplicates += 1,
                    }
                }
            }

            summary.fetched += fetched;
            summary.inserted += inserted;

            if fetched < INCOMING_PAGE_SIZE as usize || inserted == 0 {
                break;
            }
        }

        info!(
            fetched = summary.fetched,
            inserted = summary.inserted,
            duplicates = summary.duplicates,
            "sync finished"
        );

        Ok(summary)
    }
}
