//! Response classification.
//!
//! Decides, for one observed exchange, whether it is a page of a paginated
//! result (merge into an accumulator), a complete result on its own, or noise.

pub mod gate;
pub mod shapes;

use regex::Regex;
use serde_json::Value;
use thiserror::Error;
use url::Url;

use crate::config::ProtocolConfig;
use crate::model::{CapturedResult, Protocol, RowTotal};
use crate::replay::{extract_query_replay, locator_replay, ReplayContext};
use crate::transport::Exchange;

pub use gate::{endpoint_family, GateRegistry, GateState, PreflightGate};
pub use shapes::{EnvelopedPage, TabularPage};

/// Errors raised while classifying an exchange. Never surfaced to the host.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("Malformed {protocol} page from '{url}': {source}")]
    MalformedPage {
        protocol: &'static str,
        url: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Unparseable request URL '{0}'")]
    InvalidUrl(String),
}

/// Why an exchange was not captured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    NotAResultSet,
    Preflight,
    ContinuationLocator,
    UnarmedBackground,
    OrphanContinuation,
}

/// One page destined for the accumulator store.
#[derive(Debug, Clone)]
pub struct PageMerge {
    pub query_id: String,
    pub rows: Vec<Value>,
    pub declared_total: Option<u64>,
    pub columns: Vec<Value>,
    pub replay: Option<ReplayContext>,
}

#[derive(Debug, Clone)]
pub enum Classification {
    Ignore(IgnoreReason),
    Merge(PageMerge),
    SelfContained(CapturedResult),
}

/// URL-level rules that separate real results from look-alikes.
#[derive(Debug, Clone)]
pub struct ProtocolRules {
    preflight_param: String,
    query_id_param: String,
    locator: Regex,
    background: Regex,
}

impl ProtocolRules {
    pub fn from_config(config: &ProtocolConfig) -> Result<Self, regex::Error> {
        Ok(Self {
            preflight_param: config.preflight_param.clone(),
            query_id_param: config.query_id_param.clone(),
            locator: Regex::new(&config.locator_pattern)?,
            background: Regex::new(&config.background_pattern)?,
        })
    }

    /// Metadata-only preflight: `?<preflight_param>=true`.
    pub fn is_preflight(&self, url: &Url) -> bool {
        url.query_pairs()
            .any(|(key, value)| key == self.preflight_param.as_str() && value.eq_ignore_ascii_case("true"))
    }

    /// URL of the shape the reconstructor follows for next pages.
    pub fn is_locator(&self, url: &Url) -> bool {
        self.locator.is_match(url.path())
    }

    pub fn is_background(&self, url: &Url) -> bool {
        self.background.is_match(url.path())
    }

    /// Query id carried in the request URL by continuation pages.
    pub fn query_id_from_url(&self, url: &Url) -> Option<String> {
        url.query_pairs()
            .find(|(key, value)| key == self.query_id_param.as_str() && !value.is_empty())
            .map(|(_, value)| value.into_owned())
    }
}

/// Stateful classifier: holds the preflight gates between exchanges.
#[derive(Debug)]
pub struct ResponseClassifier {
    rules: ProtocolRules,
    gates: GateRegistry,
}

impl ResponseClassifier {
    pub fn new(rules: ProtocolRules) -> Self {
        Self {
            rules,
            gates: GateRegistry::default(),
        }
    }

    pub fn gates(&self) -> &GateRegistry {
        &self.gates
    }

    pub fn classify(&mut self, exchange: &Exchange) -> Result<Classification, CaptureError> {
        let url = Url::parse(&exchange.url)
            .map_err(|_| CaptureError::InvalidUrl(exchange.url.clone()))?;

        if let Some(page) = shapes::enveloped_page(&exchange.response) {
            let page = page.map_err(|source| CaptureError::MalformedPage {
                protocol: Protocol::Enveloped.as_str(),
                url: exchange.url.clone(),
                source,
            })?;
            return Ok(self.classify_enveloped(exchange, &url, page));
        }

        self.classify_tabular(exchange, &url)
    }

    fn classify_enveloped(&self, exchange: &Exchange, url: &Url, page: EnvelopedPage) -> Classification {
        let query_id = page
            .query_id()
            .map(str::to_owned)
            .or_else(|| self.rules.query_id_from_url(url));
        let declared_total = page.declared_total();

        if let Some(returned) = page.returned_count {
            if returned != page.rows.len() as u64 {
                tracing::debug!(
                    returned_count = returned,
                    rows = page.rows.len(),
                    "Page returnedCount disagrees with its rows"
                );
            }
        }

        let columns = page.columns.unwrap_or_default();
        let rows = page.rows;

        match query_id {
            Some(query_id) => {
                let replay = extract_query_replay(
                    &exchange.url,
                    &exchange.request_headers,
                    &exchange.request_body,
                )
                .map(ReplayContext::Query);
                Classification::Merge(PageMerge {
                    query_id,
                    rows,
                    declared_total,
                    columns,
                    replay,
                })
            }
            None if !columns.is_empty() => {
                let total = rows.len() as u64;
                Classification::SelfContained(CapturedResult {
                    query_id: None,
                    protocol: Protocol::Enveloped,
                    rows,
                    columns,
                    total_rows: RowTotal::Known(total),
                    limited: false,
                    replay: None,
                })
            }
            None => Classification::Ignore(IgnoreReason::OrphanContinuation),
        }
    }

    fn classify_tabular(&mut self, exchange: &Exchange, url: &Url) -> Result<Classification, CaptureError> {
        let family = endpoint_family(url);
        let background = self.rules.is_background(url);

        if self.rules.is_preflight(url) {
            if background {
                self.gates.arm(&family);
            }
            return Ok(Classification::Ignore(IgnoreReason::Preflight));
        }

        if self.rules.is_locator(url) {
            return Ok(Classification::Ignore(IgnoreReason::ContinuationLocator));
        }

        let Some(page) = shapes::tabular_page(&exchange.response) else {
            return Ok(Classification::Ignore(IgnoreReason::NotAResultSet));
        };
        let page = page.map_err(|source| CaptureError::MalformedPage {
            protocol: Protocol::Tabular.as_str(),
            url: exchange.url.clone(),
            source,
        })?;

        if background && !self.gates.try_consume(&family) {
            return Ok(Classification::Ignore(IgnoreReason::UnarmedBackground));
        }

        let replay = match (&page.next_records_url, page.done) {
            (Some(next), false) => {
                locator_replay(&exchange.url, &exchange.request_headers, next).map(ReplayContext::Locator)
            }
            _ => None,
        };

        let columns = shapes::record_columns(&page.records);
        let total_rows = RowTotal::Known(page.total_size).raise(page.records.len() as u64);

        Ok(Classification::SelfContained(CapturedResult {
            query_id: None,
            protocol: Protocol::Tabular,
            rows: page.records,
            columns,
            total_rows,
            limited: !page.done,
            replay,
        }))
    }
}
