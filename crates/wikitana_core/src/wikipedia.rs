use std::env;
use std::thread::sleep;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use reqwest::StatusCode;
use reqwest::blocking::Client;
use serde_json::Value;
use time::Date;

use crate::page::Page;
use crate::wikitext::parse_article;

pub const DEFAULT_USER_AGENT: &str = "wikitana/0.1 (https://github.com/wikitana/wikitana)";

/// Anything that can resolve a title to candidate pages.
///
/// Zero results means "not found"; more than one means the title was
/// ambiguous and the caller decides whether that is fatal.
pub trait PageSource {
    fn resolve(&mut self, title: &str) -> Result<Vec<Page>>;
}

#[derive(Debug, Clone)]
pub struct WikipediaClientConfig {
    pub language: String,
    pub user_agent: String,
    pub timeout_ms: u64,
    pub rate_limit_ms: u64,
    pub max_retries: usize,
    pub retry_delay_ms: u64,
}

impl WikipediaClientConfig {
    pub fn from_env(language: &str) -> Self {
        Self {
            language: language.to_string(),
            user_agent: env_value("WIKI_USER_AGENT", DEFAULT_USER_AGENT),
            timeout_ms: env_value_u64("WIKI_HTTP_TIMEOUT_MS", 30_000),
            rate_limit_ms: env_value_u64("WIKI_RATE_LIMIT_READ", 100),
            max_retries: env_value_usize("WIKI_HTTP_RETRIES", 2),
            retry_delay_ms: env_value_u64("WIKI_HTTP_RETRY_DELAY_MS", 350),
        }
    }
}

/// Read-side client for the MediaWiki Action API and the Wikimedia REST
/// feed, with request pacing and bounded retries.
pub struct WikipediaClient {
    client: Client,
    config: WikipediaClientConfig,
    last_request_at: Option<Instant>,
    request_count: usize,
}

impl WikipediaClient {
    pub fn from_env(language: &str) -> Result<Self> {
        Self::new(WikipediaClientConfig::from_env(language))
    }

    pub fn new(config: WikipediaClientConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .context("failed to build Wikipedia HTTP client")?;
        Ok(Self {
            client,
            config,
            last_request_at: None,
            request_count: 0,
        })
    }

    pub fn language(&self) -> &str {
        &self.config.language
    }

    pub fn request_count(&self) -> usize {
        self.request_count
    }

    /// Today's (or the given day's) featured article title, if the feed
    /// carries one.
    pub fn featured(&mut self, date: Date) -> Result<Option<String>> {
        let url = feed_url(&self.config.language, date);
        let payload = self.request_json(&url, &[])?;
        Ok(featured_title(&payload))
    }

    fn action_api_url(&self) -> String {
        format!("https://{}.wikipedia.org/w/api.php", self.config.language)
    }

    fn request_json(&mut self, url: &str, params: &[(&str, String)]) -> Result<Value> {
        let pairs: Vec<(String, String)> = params
            .iter()
            .filter(|(_, value)| !value.is_empty())
            .map(|(key, value)| ((*key).to_string(), value.clone()))
            .collect();

        for attempt in 0..=self.config.max_retries {
            self.apply_rate_limit();
            let mut request = self
                .client
                .get(url)
                .header("User-Agent", self.config.user_agent.clone());
            if !pairs.is_empty() {
                request = request.query(&pairs);
            }

            match request.send() {
                Ok(response) => {
                    let status = response.status();
                    if !status.is_success() {
                        if attempt < self.config.max_retries && is_retryable_status(status) {
                            self.wait_before_retry(attempt);
                            continue;
                        }
                        bail!("Wikipedia API request failed with HTTP {status}");
                    }

                    let payload: Value = response
                        .json()
                        .context("failed to decode Wikipedia API JSON response")?;
                    if let Some(error) = payload.get("error") {
                        let code = error
                            .get("code")
                            .and_then(Value::as_str)
                            .unwrap_or("unknown_error");
                        let info = error
                            .get("info")
                            .and_then(Value::as_str)
                            .unwrap_or("unknown info");
                        bail!("Wikipedia API error [{code}]: {info}");
                    }
                    return Ok(payload);
                }
                Err(error) => {
                    if attempt < self.config.max_retries && is_retryable_error(&error) {
                        self.wait_before_retry(attempt);
                        continue;
                    }
                    return Err(error).context("failed to call the Wikipedia API");
                }
            }
        }

        bail!("Wikipedia API request exhausted retry budget")
    }

    fn apply_rate_limit(&mut self) {
        let delay = Duration::from_millis(self.config.rate_limit_ms);
        if let Some(last) = self.last_request_at {
            let elapsed = last.elapsed();
            if elapsed < delay {
                sleep(delay - elapsed);
            }
        }
        self.last_request_at = Some(Instant::now());
        self.request_count += 1;
    }

    fn wait_before_retry(&self, attempt: usize) {
        let delay = self
            .config
            .retry_delay_ms
            .saturating_mul(attempt as u64 + 1);
        sleep(Duration::from_millis(delay));
    }
}

impl PageSource for WikipediaClient {
    fn resolve(&mut self, title: &str) -> Result<Vec<Page>> {
        let params = [
            ("action", "query".to_string()),
            ("prop", "revisions".to_string()),
            ("rvprop", "content|ids".to_string()),
            ("rvslots", "main".to_string()),
            ("redirects", "1".to_string()),
            ("titles", title.to_string()),
            ("format", "json".to_string()),
            ("formatversion", "2".to_string()),
        ];
        let url = self.action_api_url();
        let payload = self.request_json(&url, &params)?;
        Ok(pages_from_query(&payload, &self.config.language))
    }
}

/// Extract every present page (with revision wikitext) from an
/// `action=query` response.
fn pages_from_query(payload: &Value, language: &str) -> Vec<Page> {
    let Some(entries) = payload
        .get("query")
        .and_then(|query| query.get("pages"))
        .and_then(Value::as_array)
    else {
        return Vec::new();
    };

    let mut pages = Vec::new();
    for entry in entries {
        if entry.get("missing").is_some_and(truthy) || entry.get("invalid").is_some_and(truthy) {
            continue;
        }
        let Some(id) = entry.get("pageid").and_then(Value::as_i64) else {
            continue;
        };
        let Some(title) = entry.get("title").and_then(Value::as_str) else {
            continue;
        };
        let Some(wikitext) = entry
            .get("revisions")
            .and_then(Value::as_array)
            .and_then(|revisions| revisions.first())
            .and_then(|revision| revision.get("slots"))
            .and_then(|slots| slots.get("main"))
            .and_then(|main| main.get("content"))
            .and_then(Value::as_str)
        else {
            continue;
        };
        pages.push(parse_article(id, title, language, wikitext));
    }
    pages
}

// formatversion=2 encodes flags as booleans, older proxies as empty strings
fn truthy(value: &Value) -> bool {
    !matches!(value, Value::Bool(false) | Value::Null)
}

fn feed_url(language: &str, date: Date) -> String {
    format!(
        "https://{language}.wikipedia.org/api/rest_v1/feed/featured/{:04}/{:02}/{:02}",
        date.year(),
        u8::from(date.month()),
        date.day()
    )
}

/// The featured-article title from a `feed/featured` payload, with the
/// URL-form underscores decoded.
fn featured_title(payload: &Value) -> Option<String> {
    let title = payload
        .get("tfa")
        .and_then(|tfa| tfa.get("title"))
        .and_then(Value::as_str)?;
    let title = title.replace('_', " ").trim().to_string();
    if title.is_empty() { None } else { Some(title) }
}

fn env_value(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_value_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_value_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<usize>().ok())
        .unwrap_or(default)
}

fn is_retryable_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::REQUEST_TIMEOUT
            | StatusCode::TOO_MANY_REQUESTS
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

fn is_retryable_error(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect() || error.is_request()
}
