use anyhow::{Context, Result};
use serde_derive::Deserialize;
use std::fs;
use toml;

pub const DEFAULT_CONFIG_PATH: &str = "./config.toml";

#[derive(Deserialize, Debug, Clone)]
pub struct Config {
    #[serde(default)]
    pub server: Server,
    pub database: Database,
    pub nostr: Nostr,
    pub alby: Alby,
    pub helipad: Option<Helipad>,
    pub custodial: Option<Custodial>,
    pub kv: Option<Kv>,
    #[serde(default)]
    pub rss_payment: RssPayment,
}

#[derive(Deserialize, Debug, Clone)]
pub struct Server {
    pub host: String,
    pub port: u16,
}

impl Default for Server {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
pub struct Database {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

#[derive(Deserialize, Debug, Clone)]
pub struct Nostr {
    pub nsec: String,
    #[serde(default = "default_relays")]
    pub relays: Vec<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Deserialize, Debug, Clone)]
pub struct Alby {
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
    #[serde(default)]
    pub redirect_uri: String,
    pub webhook_secret: String,
    #[serde(default = "default_token_url")]
    pub token_url: String,
    #[serde(default = "default_api_url")]
    pub api_url: String,
}

#[derive(Deserialize, Debug, Clone)]
pub struct Helipad {
    pub token: String,
}

#[derive(Deserialize, Debug, Clone)]
pub struct Custodial {
    pub token: String,
}

#[derive(Deserialize, Debug, Clone)]
pub struct Kv {
    pub url: String,
    pub token: String,
}

#[derive(Deserialize, Debug, Clone)]
pub struct RssPayment {
    #[serde(default = "default_rss_header")]
    pub header: String,
    #[serde(default = "default_rss_marker")]
    pub marker: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for RssPayment {
    fn default() -> Self {
        Self {
            header: default_rss_header(),
            marker: default_rss_marker(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_max_connections() -> u32 {
    5
}

fn default_relays() -> Vec<String> {
    vec![
        "wss://relay.damus.io".to_string(),
        "wss://nos.lol".to_string(),
        "wss://relay.primal.net".to_string(),
        "wss://nos.social".to_string(),
    ]
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_token_url() -> String {
    "https://api.getalby.com/oauth/token".to_string()
}

fn default_api_url() -> String {
    "https://api.getalby.com".to_string()
}

fn default_rss_header() -> String {
    "x-rss-payment".to_string()
}

fn default_rss_marker() -> String {
    "rss::payment::".to_string()
}

/// Reads the config from `BOOSTBOARD_CONFIG`, or `./config.toml` when unset.
pub fn load_config() -> Result<Config> {
    let filename = std::env::var("BOOSTBOARD_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    load_config_from(&filename)
}

pub fn load_config_from(filename: &str) -> Result<Config> {
    let contents = fs::read_to_string(filename)
        .with_context(|| format!("Unable to read config file {}", filename))?;

    parse_config(&contents)
        .with_context(|| format!("Unable to parse config file {}", filename))
}

pub fn parse_config(contents: &str) -> Result<Config> {
    let cfg: Config = toml::from_str(contents)?;
    Ok(cfg)
}
