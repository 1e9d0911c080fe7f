//! Query-resubmission variant: reissue the captured action with
//! `LIMIT <batch> OFFSET <n>` appended to its query text.

use reqwest::header::{HeaderValue, ACCEPT, CONTENT_TYPE, COOKIE};
use serde_json::{json, Value};
use url::form_urlencoded;

use crate::classify::shapes::{self, EnvelopedPage};
use crate::model::CapturedResult;
use crate::reconstruct::{
    check_status, finished, FetchError, FetchOutcome, FetchProgress, ProgressSink, Termination,
};
use crate::replay::{QueryReplay, CONTEXT_FIELD, MESSAGE_FIELD, TOKEN_FIELD};
use crate::transport::{intercept::parse_json_body, HttpRequest, Transport};

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded;charset=UTF-8";

pub(super) async fn run(
    transport: &dyn Transport,
    batch_size: usize,
    context: &QueryReplay,
    source: &CapturedResult,
    offset: usize,
    progress: &dyn ProgressSink,
) -> Result<FetchOutcome, FetchError> {
    let (Some(context_token), Some(request_token)) =
        (context.context_token.as_deref(), context.request_token.as_deref())
    else {
        return Err(FetchError::Protocol(
            "correlation tokens were not captured".to_string(),
        ));
    };

    let keep = offset.min(source.rows.len());
    let mut rows: Vec<Value> = source.rows[..keep].to_vec();
    let mut columns = source.columns.clone();
    let mut total = source.total_rows;
    let mut pages = 0;

    loop {
        let query = paged_query(&context.base_query, batch_size, rows.len());
        let request = build_request(context, context_token, request_token, &query, batch_size)?;
        tracing::debug!(offset = rows.len(), batch_size, "Requesting page");

        let response = transport.send(request).await?;
        check_status(&response)?;
        let page = parse_page(&response.body)?;
        pages += 1;

        if let Some(declared) = page.declared_total() {
            total = total.raise(declared);
        }
        if columns.is_empty() {
            if let Some(page_columns) = page.columns.clone() {
                columns = page_columns;
            }
        }

        let page_rows = page.rows.len();
        let start = rows.len();
        rows.extend(page.rows);
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
        } else if page_rows < batch_size {
            Some(Termination::ShortPage)
        } else {
            None
        };

        if let Some(termination) = termination {
            return Ok(FetchOutcome {
                result: finished(source, rows, columns, total),
                pages,
                termination,
            });
        }
    }
}

pub(super) fn paged_query(base_query: &str, batch_size: usize, offset: usize) -> String {
    format!("{} LIMIT {} OFFSET {}", base_query, batch_size, offset)
}

fn build_request(
    context: &QueryReplay,
    context_token: &str,
    request_token: &str,
    query: &str,
    batch_size: usize,
) -> Result<HttpRequest, FetchError> {
    let mut action = context.action.clone();
    let params = action
        .get_mut("params")
        .and_then(Value::as_object_mut)
        .ok_or_else(|| FetchError::Protocol("captured action has no params".to_string()))?;
    params.insert("queryText".to_string(), Value::String(query.to_string()));
    params.insert("rowLimit".to_string(), json!(batch_size));
    if let Some(namespace) = &context.namespace {
        params.insert("auxiliaryNamespace".to_string(), Value::String(namespace.clone()));
    }

    let message = json!({ "actions": [action] });
    let body = form_urlencoded::Serializer::new(String::new())
        .append_pair(MESSAGE_FIELD, &message.to_string())
        .append_pair(CONTEXT_FIELD, context_token)
        .append_pair(TOKEN_FIELD, request_token)
        .finish();

    let mut request = HttpRequest::post(context.endpoint.clone(), body);
    request
        .headers
        .insert(CONTENT_TYPE, HeaderValue::from_static(FORM_CONTENT_TYPE));
    request.headers.insert(ACCEPT, HeaderValue::from_static("*/*"));
    if let Some(cookie) = &context.cookie {
        let value = HeaderValue::from_str(cookie)
            .map_err(|_| FetchError::Protocol("captured cookie is not a valid header".to_string()))?;
        request.headers.insert(COOKIE, value);
    }

    Ok(request)
}

fn parse_page(body: &[u8]) -> Result<EnvelopedPage, FetchError> {
    let value = parse_json_body(body)
        .ok_or_else(|| FetchError::Parse("response is not JSON".to_string()))?;

    match shapes::enveloped_page(&value) {
        Some(Ok(page)) => Ok(page),
        Some(Err(err)) => Err(FetchError::Parse(err.to_string())),
        None => match shapes::action_failure(&value) {
            Some(message) => Err(FetchError::Server {
                status: 200,
                message,
            }),
            None => Err(FetchError::Parse("no query action in response".to_string())),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> QueryReplay {
        QueryReplay {
            endpoint: "https://host/app/action".to_string(),
            action: json!({
                "id": "12;a",
                "descriptor": "apex://Runner/ACTION$query",
                "callingDescriptor": "UNKNOWN",
                "params": {"queryText": "SELECT Id FROM Case LIMIT 2000", "rowLimit": 2000}
            }),
            base_query: "SELECT Id FROM Case".to_string(),
            namespace: Some("".to_string()),
            context_token: Some("ctx".to_string()),
            request_token: Some("tok".to_string()),
            cookie: Some("sid=1".to_string()),
        }
    }

    #[test]
    fn paged_query_appends_clause() {
        assert_eq!(
            paged_query("SELECT Id FROM Case", 100, 300),
            "SELECT Id FROM Case LIMIT 100 OFFSET 300"
        );
    }

    #[test]
    fn request_reuses_action_and_tokens() {
        let context = context();
        let query = paged_query(&context.base_query, 50, 100);
        let request = build_request(&context, "ctx", "tok", &query, 50).unwrap();

        assert_eq!(request.url, "https://host/app/action");
        assert_eq!(request.headers.get(COOKIE).unwrap(), "sid=1");

        let form: Vec<(String, String)> = form_urlencoded::parse(&request.body)
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        let message: Value = serde_json::from_str(&form[0].1).unwrap();
        let action = &message["actions"][0];

        assert_eq!(form[1], ("context".to_string(), "ctx".to_string()));
        assert_eq!(form[2], ("token".to_string(), "tok".to_string()));
        assert_eq!(action["descriptor"], "apex://Runner/ACTION$query");
        assert_eq!(action["id"], "12;a");
        assert_eq!(action["params"]["queryText"], "SELECT Id FROM Case LIMIT 50 OFFSET 100");
        assert_eq!(action["params"]["rowLimit"], 50);
    }

    #[test]
    fn failed_action_is_server_error() {
        let body = br#"{"actions":[{"state":"ERROR","error":[{"message":"MALFORMED_QUERY"}]}]}"#;
        let err = parse_page(body).unwrap_err();
        assert_eq!(err.category(), "server");
    }

    #[test]
    fn garbage_is_parse_error() {
        assert_eq!(parse_page(b"<html>").unwrap_err().category(), "parse");
        assert_eq!(parse_page(b"{\"ok\":true}").unwrap_err().category(), "parse");
    }
}
