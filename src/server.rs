use crate::alby::AlbyClient;
use crate::config::Config;
use crate::error::{AuthError, IngestError};
use crate::extractor::BoostagramExtractor;
use crate::pipeline::{IngestionPipeline, SyncSummary};
use crate::publisher::{EventPublisher, NostrRelayClient};
use crate::sources::SourceKind;
use crate::store::{BoostQuery, PgBoostStore};
use crate::token::{KvTokenStore, MemoryTokenStore, OAuthClient, TokenManager, TokenStore};
use crate::verifier::{BearerVerifier, SvixVerifier, WebhookVerifier};

use anyhow::{Context, Result};
use axum::body::Bytes;
use axum::extract::rejection::BytesRejection;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use nostr::Keys;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

/// Shared by all request handlers.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<IngestionPipeline>,
    pub tokens: Arc<TokenManager>,
    pub alby: AlbyClient,
    /// Guards the sync and refresh routes.
    pub admin: Option<Arc<BearerVerifier>>,
}

impl AppState {
    /// Wires the production collaborators: Postgres, the nostr relays,
    /// the provider OAuth endpoints and one verifier per configured source.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let store = PgBoostStore::connect(&config.database)
            .await
            .context("Failed to connect to database")?;
        store.ensure_schema().await.context("Failed to create invoices table")?;

        let keys = Keys::parse(&config.nostr.nsec).context("Invalid nostr nsec")?;
        let publisher = EventPublisher::new(
            keys,
            config.nostr.relays.clone(),
            Arc::new(NostrRelayClient),
            Duration::from_secs(config.nostr.timeout_secs),
        );

        let extractor = BoostagramExtractor::new(&config.rss_payment).context("Failed to build HTTP client")?;

        let mut pipeline = IngestionPipeline::new(extractor, Arc::new(store), Arc::new(publisher)).with_verifier(
            SourceKind::SignedPush,
            SvixVerifier::new(&config.alby.webhook_secret).context("Invalid webhook secret")?,
        );

        if let Some(helipad) = &config.helipad {
            pipeline = pipeline.with_verifier(SourceKind::DeviceReported, BearerVerifier::new(&helipad.token));
        } else {
            warn!("no [helipad] token configured, helipad webhooks will be rejected");
        }

        let mut admin = None;
        if let Some(custodial) = &config.custodial {
            pipeline = pipeline.with_verifier(SourceKind::CustodialPull, BearerVerifier::new(&custodial.token));
            admin = Some(Arc::new(BearerVerifier::new(&custodial.token)));
        } else {
            warn!("no [custodial] token configured, pushed invoices and sync will be rejected");
        }

        let token_store: Box<dyn TokenStore> = match &config.kv {
            Some(kv) => Box::new(KvTokenStore::new(kv)),
            None => {
                info!("no [kv] configured, caching credentials in memory");
                Box::new(MemoryTokenStore::new())
            }
        };
        let tokens = TokenManager::new(token_store, OAuthClient::new(&config.alby), &config.alby.refresh_token);

        Ok(Self {
            pipeline: Arc::new(pipeline),
            tokens: Arc::new(tokens),
            alby: AlbyClient::new(&config.alby),
            admin,
        })
    }
}

pub fn app(state: AppState) -> Router {
    let trace_layer = TraceLayer::new_for_http().make_span_with(|request: &axum::extract::Request| {
        let uri = request.uri().to_string();
        tracing::info_span!("request", method = %request.method(), uri)
    });

    let cors_layer = CorsLayer::new()
        .allow_origin(Any)
        .allow_headers(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS]);

    Router::new()
        .route("/health", get(health_check))
        .route("/api/webhook", post(signed_push_webhook))
        .route("/api/helipad", post(helipad_webhook))
        .route("/api/boost", post(custodial_boost))
        .route("/api/sync", post(sync))
        .route("/api/refresh-token", post(refresh_token))
        .route("/api/callback", get(oauth_callback))
        .route("/api/boosts", get(list_boosts))
        .layer(cors_layer)
        .layer(trace_layer)
        .with_state(state)
}

pub struct Server {
    router: Router,
    listener: TcpListener,
}

impl Server {
    pub async fn new(config: &Config, state: AppState) -> Result<Self> {
        let listener = TcpListener::bind(format!("{}:{}", config.server.host, config.server.port))
            .await
            .with_context(|| format!("Failed to bind to port {}", config.server.port))?;

        Ok(Self {
            router: app(state),
            listener,
        })
    }

    pub fn port(&self) -> u16 {
        self.listener.local_addr().map(|addr| addr.port()).unwrap_or_default()
    }

    pub async fn run(self) -> Result<()> {
        info!("Server listening on {}", self.listener.local_addr()?);
        axum::serve(self.listener, self.router).await?;
        Ok(())
    }
}

async fn health_check() -> StatusCode {
    StatusCode::OK
}

async fn ingest(state: &AppState, kind: SourceKind, headers: &HeaderMap, body: Result<Bytes, BytesRejection>) -> Response {
    let body = match body {
        Ok(body) => body,
        Err(rejection) => {
            warn!(source = %kind, "unable to read webhook payload: {}", rejection);
            return IngestError::from(AuthError::BadRequest(rejection.body_text())).into_response();
        }
    };

    match state.pipeline.ingest(kind, headers, &body).await {
        Ok(_) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => {
            warn!(source = %kind, "rejected webhook: {}", err);
            err.into_response()
        }
    }
}

async fn signed_push_webhook(State(state): State<AppState>, headers: HeaderMap, body: Result<Bytes, BytesRejection>) -> Response {
    ingest(&state, SourceKind::SignedPush, &headers, body).await
}

async fn helipad_webhook(State(state): State<AppState>, headers: HeaderMap, body: Result<Bytes, BytesRejection>) -> Response {
    ingest(&state, SourceKind::DeviceReported, &headers, body).await
}

async fn custodial_boost(State(state): State<AppState>, headers: HeaderMap, body: Result<Bytes, BytesRejection>) -> Response {
    ingest(&state, SourceKind::CustodialPull, &headers, body).await
}

fn authorize_admin(state: &AppState, headers: &HeaderMap) -> Result<(), IngestError> {
    match &state.admin {
        Some(verifier) => Ok(verifier.verify(&[], headers)?),
        None => Err(AuthError::Forbidden.into()),
    }
}

async fn sync(State(state): State<AppState>, headers: HeaderMap) -> Result<Json<SyncSummary>, IngestError> {
    authorize_admin(&state, &headers)?;

    let summary = state.pipeline.sync(&state.tokens, &state.alby).await.map_err(|err| {
        error!("sync failed: {}", err);
        err
    })?;

    Ok(Json(summary))
}

async fn refresh_token(State(state): State<AppState>, headers: HeaderMap) -> Result<&'static str, IngestError> {
    authorize_admin(&state, &headers)?;

    state.tokens.refresh_current().await.map_err(|err| {
        error!("token refresh failed: {}", err);
        IngestError::from(err)
    })?;

    Ok("OK")
}

#[derive(Deserialize, Debug)]
struct CallbackParams {
    code: Option<String>,
}

async fn oauth_callback(State(state): State<AppState>, Query(params): Query<CallbackParams>) -> Response {
    let code = match params.code.filter(|code| !code.is_empty()) {
        Some(code) => code,
        None => return StatusCode::BAD_REQUEST.into_response(),
    };

    match state.tokens.exchange_code(&code).await {
        Ok(_) => (StatusCode::OK, "Authorized").into_response(),
        Err(err) => {
            error!("authorization code exchange failed: {}", err);
            IngestError::from(err).into_response()
        }
    }
}

async fn list_boosts(State(state): State<AppState>, Query(query): Query<BoostQuery>) -> Response {
    match state.pipeline.store().list(&query).await {
        Ok(boosts) => Json(boosts).into_response(),
        Err(err) => {
            error!("failed to list boosts: {}", err);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
