//! Shared HTTP plumbing for strategies

use crate::{
    constants::{REQUEST_TIMEOUT_SECS, USER_AGENT},
    error::TransportError,
};
use rand::seq::SliceRandom;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Response};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::str::FromStr;
use std::time::Duration;

const BROWSER_USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:125.0) Gecko/20100101 Firefox/125.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_4_1) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4.1 Safari/605.1.15",
];

const ACCEPT_VALUES: &[&str] = &["application/json, text/plain, */*", "application/json", "*/*"];

const ACCEPT_LANGUAGES: &[&str] = &["en-US,en;q=0.9", "en-GB,en;q=0.9", "en-US,en;q=0.5"];

const CACHE_CONTROLS: &[&str] = &["no-cache", "max-age=0"];

/// Builds the client shared by all strategies
pub fn build_client(timeout: Duration) -> Result<Client, TransportError> {
    Client::builder()
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .build()
        .map_err(TransportError::NetworkError)
}

/// Client with the default request timeout
pub fn default_client() -> Result<Client, TransportError> {
    build_client(Duration::from_secs(REQUEST_TIMEOUT_SECS))
}

/// Browser-like headers, randomized per request so consecutive calls do not
/// share a fingerprint
pub fn randomized_headers(origin: &str) -> HeaderMap {
    let mut rng = rand::thread_rng();
    let pick = |values: &[&'static str], rng: &mut rand::rngs::ThreadRng| -> &'static str {
        values.choose(rng).copied().unwrap_or(values[0])
    };

    let entries = [
        ("user-agent", pick(BROWSER_USER_AGENTS, &mut rng)),
        ("accept", pick(ACCEPT_VALUES, &mut rng)),
        ("accept-language", pick(ACCEPT_LANGUAGES, &mut rng)),
        ("cache-control", pick(CACHE_CONTROLS, &mut rng)),
        ("dnt", "1"),
        ("sec-fetch-dest", "empty"),
        ("sec-fetch-mode", "cors"),
        ("sec-fetch-site", "same-site"),
    ];

    let mut headers = HeaderMap::with_capacity(entries.len() + 2);
    for (name, value) in entries {
        headers.insert(HeaderName::from_static(name), HeaderValue::from_static(value));
    }
    if let Ok(origin_value) = HeaderValue::from_str(origin) {
        headers.insert(reqwest::header::ORIGIN, origin_value);
    }
    if let Ok(referer) = HeaderValue::from_str(&format!("{origin}/")) {
        headers.insert(reqwest::header::REFERER, referer);
    }
    headers
}

/// Turns a non-success response into a [`TransportError::Status`]
pub async fn ensure_success(response: Response) -> Result<Response, TransportError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(TransportError::Status {
        status: status.as_u16(),
        body: truncate(&body, 300),
    })
}

/// Checks the status and decodes the JSON body
pub async fn read_json<T: DeserializeOwned>(
    response: Response,
    upstream: &str,
) -> Result<T, TransportError> {
    let response = ensure_success(response).await?;
    let text = response.text().await.map_err(TransportError::NetworkError)?;

    serde_json::from_str(&text).map_err(|e| {
        TransportError::InvalidResponse(format!(
            "Failed to parse {upstream} response: {e}. Response: {}",
            truncate(&text, 300)
        ))
    })
}

/// Parses a price given either as a JSON number or a numeric string
///
/// Numbers go through their textual form, so `1.97` stays exactly `1.97`.
pub fn parse_price(value: &Value) -> Option<Decimal> {
    let text = match value {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.trim().to_string(),
        _ => return None,
    };

    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .ok()
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}…", &text[..idx]),
        None => text.to_string(),
    }
}
