//! Wire shapes of the two recognized result protocols.

use serde::Deserialize;
use serde_json::Value;

/// Key tabular records use for per-record type metadata.
const RECORD_ATTRIBUTES: &str = "attributes";

/// `returnValue` of an enveloped query action.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvelopedPage {
    pub rows: Vec<Value>,
    #[serde(default)]
    pub columns: Option<Vec<Value>>,
    #[serde(default)]
    pub returned_count: Option<u64>,
    #[serde(default)]
    pub status: Option<PageStatus>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageStatus {
    #[serde(default)]
    pub query_id: Option<String>,
    #[serde(default)]
    pub total_count: Option<u64>,
}

impl EnvelopedPage {
    pub fn query_id(&self) -> Option<&str> {
        self.status
            .as_ref()
            .and_then(|s| s.query_id.as_deref())
            .filter(|id| !id.is_empty())
    }

    pub fn declared_total(&self) -> Option<u64> {
        self.status.as_ref().and_then(|s| s.total_count)
    }
}

/// A tabular query page.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TabularPage {
    pub total_size: u64,
    pub done: bool,
    pub records: Vec<Value>,
    #[serde(default)]
    pub next_records_url: Option<String>,
}

/// Locate the query action inside an action envelope.
///
/// `None` means the body is not an enveloped result at all; `Some(Err)` means
/// it looked like one but the `returnValue` did not deserialize.
pub fn enveloped_page(body: &Value) -> Option<Result<EnvelopedPage, serde_json::Error>> {
    let action = body
        .get("actions")?
        .as_array()?
        .iter()
        .find(|action| action.pointer("/returnValue/rows").is_some())?;

    Some(EnvelopedPage::deserialize(&action["returnValue"]))
}

/// The failure message of the first action whose `state` is not `SUCCESS`.
pub fn action_failure(body: &Value) -> Option<String> {
    let actions = body.get("actions")?.as_array()?;
    actions.iter().find_map(|action| {
        let state = action.get("state").and_then(Value::as_str)?;
        if state == "SUCCESS" {
            return None;
        }
        let message = action
            .pointer("/error/0/message")
            .and_then(Value::as_str)
            .unwrap_or("no error message");
        Some(format!("action state {}: {}", state, message))
    })
}

/// Recognize a tabular page by its three mandatory keys.
pub fn tabular_page(body: &Value) -> Option<Result<TabularPage, serde_json::Error>> {
    let object = body.as_object()?;
    let looks_tabular = ["totalSize", "done", "records"]
        .iter()
        .all(|key| object.contains_key(*key));
    if !looks_tabular {
        return None;
    }
    Some(TabularPage::deserialize(body))
}

/// Column names of a tabular result, taken from its first record.
pub fn record_columns(records: &[Value]) -> Vec<Value> {
    records
        .first()
        .and_then(Value::as_object)
        .map(|record| {
            record
                .keys()
                .filter(|key| key.as_str() != RECORD_ATTRIBUTES)
                .map(|key| Value::String(key.clone()))
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn finds_query_action_among_others() {
        let body = json!({
            "actions": [
                {"id": "1", "state": "SUCCESS", "returnValue": {"ok": true}},
                {"id": "2", "state": "SUCCESS", "returnValue": {
                    "rows": [{"Id": "a"}],
                    "returnedCount": 1,
                    "status": {"queryId": "Q9", "totalCount": 4}
                }}
            ]
        });

        let page = enveloped_page(&body).unwrap().unwrap();
        assert_eq!(page.rows.len(), 1);
        assert_eq!(page.query_id(), Some("Q9"));
        assert_eq!(page.declared_total(), Some(4));
        assert!(page.columns.is_none());
    }

    #[test]
    fn malformed_rows_are_an_error() {
        let body = json!({"actions": [{"returnValue": {"rows": "nope"}}]});
        assert!(enveloped_page(&body).unwrap().is_err());
    }

    #[test]
    fn reports_failed_action() {
        let body = json!({"actions": [{"state": "ERROR", "error": [{"message": "bad query"}]}]});
        assert_eq!(action_failure(&body).unwrap(), "action state ERROR: bad query");
        assert!(action_failure(&json!({"actions": [{"state": "SUCCESS"}]})).is_none());
    }

    #[test]
    fn tabular_columns_skip_attributes() {
        let body = json!({
            "totalSize": 1,
            "done": true,
            "records": [{"attributes": {"type": "Account"}, "Id": "001", "Name": "Acme"}]
        });
        let page = tabular_page(&body).unwrap().unwrap();
        assert_eq!(record_columns(&page.records), vec![json!("Id"), json!("Name")]);
    }

    #[test]
    fn partial_tabular_keys_are_not_tabular() {
        assert!(tabular_page(&json!({"records": [], "done": true})).is_none());
    }
}
