//! Continuation-locator variant: follow `nextRecordsUrl` with the captured
//! authorization until the server reports the result complete.

use reqwest::header::{HeaderValue, ACCEPT, AUTHORIZATION, COOKIE};
use serde_json::Value;

use crate::classify::shapes::{self, TabularPage};
use crate::model::CapturedResult;
use crate::reconstruct::{
    check_status, finished, FetchError, FetchOutcome, FetchProgress, ProgressSink, Termination,
};
use crate::replay::{resolve_locator, LocatorReplay};
use crate::transport::{intercept::parse_json_body, HttpRequest, Transport};

pub(super) async fn run(
    transport: &dyn Transport,
    context: &LocatorReplay,
    source: &CapturedResult,
    progress: &dyn ProgressSink,
) -> Result<FetchOutcome, FetchError> {
    let authorization = context.authorization.as_deref().ok_or_else(|| {
        FetchError::Protocol("no authorization credential was captured".to_string())
    })?;

    let mut rows = source.rows.clone();
    let mut columns = source.columns.clone();
    let mut total = source.total_rows;
    let mut pages = 0;
    let mut next = context.next_locator.clone();

    loop {
        tracing::debug!(locator = %next, fetched = rows.len(), "Following locator");
        let request = build_request(&next, authorization, context.cookie.as_deref())?;
        let response = transport.send(request).await?;
        check_status(&response)?;
        let page = parse_page(&response.body)?;
        pages += 1;

        total = total.raise(page.total_size);
        if columns.is_empty() {
            columns = shapes::record_columns(&page.records);
        }

        let page_rows = page.records.len();
        let start = rows.len();
        rows.extend(page.records);
        progress.on_page(
            &FetchProgress {
                pages,
                fetched_rows: rows.len(),
                total,
            },
            &rows[start..],
        );

        let termination = if total.is_reached_by(rows.len()) {
            Some(Termination::TotalReached)
        } else if page_rows == 0 {
            Some(Termination::EmptyPage)
        } else if page.done {
            Some(Termination::ServerDone)
        } else {
            None
        };

        let following = match (termination, page.next_records_url) {
            (None, Some(locator)) => resolve_locator(&next, &locator),
            _ => None,
        };

        match following {
            Some(locator) => next = locator,
            None => {
                return Ok(FetchOutcome {
                    result: finished(source, rows, columns, total),
                    pages,
                    termination: termination.unwrap_or(Termination::ServerDone),
                })
            }
        }
    }
}

fn build_request(url: &str, authorization: &str, cookie: Option<&str>) -> Result<HttpRequest, FetchError> {
    let mut request = HttpRequest::get(url.to_string());
    let value = HeaderValue::from_str(authorization)
        .map_err(|_| FetchError::Protocol("captured authorization is not a valid header".to_string()))?;
    request.headers.insert(AUTHORIZATION, value);
    request
        .headers
        .insert(ACCEPT, HeaderValue::from_static("application/json"));
    if let Some(cookie) = cookie {
        if let Ok(value) = HeaderValue::from_str(cookie) {
            request.headers.insert(COOKIE, value);
        }
    }
    Ok(request)
}

fn parse_page(body: &[u8]) -> Result<TabularPage, FetchError> {
    let value: Value = parse_json_body(body)
        .ok_or_else(|| FetchError::Parse("response is not JSON".to_string()))?;
    match shapes::tabular_page(&value) {
        Some(Ok(page)) => Ok(page),
        Some(Err(err)) => Err(FetchError::Parse(err.to_string())),
        None => Err(FetchError::Parse("response is not a record page".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_carries_credentials() {
        let request = build_request("https://host/q/01g-2000", "Bearer abc", Some("sid=1")).unwrap();
        assert_eq!(request.method, reqwest::Method::GET);
        assert_eq!(request.headers.get(AUTHORIZATION).unwrap(), "Bearer abc");
        assert_eq!(request.headers.get(COOKIE).unwrap(), "sid=1");
    }

    #[test]
    fn record_page_required() {
        assert_eq!(parse_page(b"[]").unwrap_err().category(), "parse");
        let page = parse_page(br#"{"totalSize":3,"done":true,"records":[{"Id":"1"}]}"#).unwrap();
        assert!(page.done);
        assert_eq!(page.records.len(), 1);
    }
}
