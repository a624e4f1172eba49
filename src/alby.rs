use crate::boosts::Boost;
use crate::config;
use crate::error::TokenError;

/// The provider reports a rejected token in the response body rather than
/// through a dedicated status code, so this substring is the signal.
pub const INVALID_TOKEN_MARKER: &str = "invalid token";

pub const INCOMING_PAGE_SIZE: u32 = 50;

#[derive(Clone, Debug)]
pub struct AlbyClient {
    client: reqwest::Client,
    api_url: String,
}

impl AlbyClient {
    pub fn new(cfg: &config::Alby) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url: cfg.api_url.trim_end_matches('/').to_string(),
        }
    }

    /// One page of settled incoming invoices, newest first.
    pub async fn incoming_invoices(&self, access_token: &str, page: u32) -> Result<Vec<Boost>, TokenError> {
        let resp = self
            .client
            .get(format!("{}/invoices/incoming", self.api_url))
            .bearer_auth(access_token)
            .query(&[("page", page), ("items", INCOMING_PAGE_SIZE)])
            .send()
            .await?;

        let status = resp.status();
        let body = resp.text().await?;

        if !status.is_success() {
            // a successful page can contain the marker in a boost comment
            if is_invalid_token(&body) {
                return Err(TokenError::InvalidToken);
            }

            return Err(TokenError::Api {
                status: status.as_u16(),
                body,
            });
        }

        Ok(serde_json::from_str(&body)?)
    }
}

fn is_invalid_token(body: &str) -> bool {
    body.to_lowercase().contains(INVALID_TOKEN_MARKER)
}
