//! Replay-context extraction.
//!
//! Reads the originating request of a captured result and keeps just enough
//! of it to reissue the same query with explicit pagination later.

use regex::Regex;
use reqwest::header::{HeaderMap, AUTHORIZATION, COOKIE};
use serde_json::Value;
use std::sync::LazyLock;
use url::{form_urlencoded, Url};

/// Form field carrying the JSON action list.
pub const MESSAGE_FIELD: &str = "message";
/// Opaque context token forwarded unchanged on replay.
pub const CONTEXT_FIELD: &str = "context";
/// Opaque request token forwarded unchanged on replay.
pub const TOKEN_FIELD: &str = "token";

static TRAILING_PAGINATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\s+(LIMIT|OFFSET)\s+\d+\s*$").expect("pagination clause regex")
});

/// Protocol-specific replay information.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplayContext {
    Query(QueryReplay),
    Locator(LocatorReplay),
}

/// Everything needed to resubmit an enveloped query with LIMIT/OFFSET.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryReplay {
    /// URL the original action list was posted to.
    pub endpoint: String,
    /// The original action object, reused verbatim apart from its params.
    pub action: Value,
    /// Query text with any trailing LIMIT/OFFSET clause removed.
    pub base_query: String,
    pub namespace: Option<String>,
    pub context_token: Option<String>,
    pub request_token: Option<String>,
    pub cookie: Option<String>,
}

/// Next-page locator of a tabular result plus the credential to follow it.
#[derive(Debug, Clone, PartialEq)]
pub struct LocatorReplay {
    /// Absolute URL of the next page.
    pub next_locator: String,
    pub authorization: Option<String>,
    pub cookie: Option<String>,
}

/// Extract a query replay context from a form-encoded action request body.
///
/// Returns `None` unless the body carries an action with a `queryText` param.
pub fn extract_query_replay(url: &str, headers: &HeaderMap, body: &[u8]) -> Option<QueryReplay> {
    let mut message = None;
    let mut context_token = None;
    let mut request_token = None;

    for (key, value) in form_urlencoded::parse(body) {
        match key.as_ref() {
            MESSAGE_FIELD => message = Some(value.into_owned()),
            CONTEXT_FIELD => context_token = Some(value.into_owned()),
            TOKEN_FIELD => request_token = Some(value.into_owned()),
            _ => {}
        }
    }

    let message: Value = serde_json::from_str(&message?).ok()?;
    let action = message
        .get("actions")?
        .as_array()?
        .iter()
        .find(|action| query_text(action).is_some())?
        .clone();

    let base_query = strip_pagination(query_text(&action)?);
    let namespace = action
        .pointer("/params/auxiliaryNamespace")
        .and_then(Value::as_str)
        .map(str::to_owned);

    Some(QueryReplay {
        endpoint: url.to_string(),
        action,
        base_query,
        namespace,
        context_token,
        request_token,
        cookie: header_string(headers, COOKIE.as_str()),
    })
}

/// Build a locator replay context from a tabular page's `nextRecordsUrl`.
///
/// Relative locators are resolved against the originating request URL.
pub fn locator_replay(request_url: &str, headers: &HeaderMap, next: &str) -> Option<LocatorReplay> {
    let next_locator = resolve_locator(request_url, next)?;
    Some(LocatorReplay {
        next_locator,
        authorization: header_string(headers, AUTHORIZATION.as_str()),
        cookie: header_string(headers, COOKIE.as_str()),
    })
}

/// Resolve a possibly relative locator against `base`.
pub fn resolve_locator(base: &str, locator: &str) -> Option<String> {
    let base = Url::parse(base).ok()?;
    base.join(locator).ok().map(String::from)
}

/// Remove trailing `LIMIT n` / `OFFSET n` clauses, in any order.
pub fn strip_pagination(query: &str) -> String {
    let mut text = query.trim().trim_end_matches(';').trim_end().to_string();
    loop {
        let stripped = TRAILING_PAGINATION.replace(&text, "").into_owned();
        if stripped == text {
            return text;
        }
        text = stripped;
    }
}

fn query_text(action: &Value) -> Option<&str> {
    action.pointer("/params/queryText").and_then(Value::as_str)
}

fn header_string(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
}
