use serde_json::{Map, Value};
use thiserror::Error;

use crate::capture::sink::ResultFormatter;

#[derive(Debug, Error)]
pub enum FormatError {
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Failed to flush output: {0}")]
    Flush(String),

    #[error("Output is not valid UTF-8")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// Keys tried, in order, to name an object-shaped column descriptor.
const COLUMN_NAME_KEYS: [&str; 4] = ["fieldName", "name", "label", "key"];

/// Delimited-text formatter. Object rows are projected onto the columns,
/// array rows are written positionally.
pub struct DelimitedFormatter {
    delimiter: u8,
}

impl DelimitedFormatter {
    pub fn new(delimiter: u8) -> Self {
        Self { delimiter }
    }
}

impl Default for DelimitedFormatter {
    fn default() -> Self {
        Self::new(b',')
    }
}

impl ResultFormatter for DelimitedFormatter {
    fn format(&self, rows: &[Value], columns: &[Value]) -> Result<String, FormatError> {
        let headers: Vec<String> = columns.iter().map(column_name).collect();
        let mut writer = csv::WriterBuilder::new()
            .delimiter(self.delimiter)
            .flexible(true)
            .from_writer(Vec::new());

        if !headers.is_empty() {
            writer.write_record(&headers)?;
        }

        for row in rows {
            let record: Vec<String> = match row {
                Value::Object(fields) => headers.iter().map(|h| cell(lookup(fields, h))).collect(),
                Value::Array(items) => items.iter().map(|v| cell(Some(v))).collect(),
                other => vec![cell(Some(other))],
            };
            writer.write_record(&record)?;
        }

        let bytes = writer
            .into_inner()
            .map_err(|e| FormatError::Flush(e.to_string()))?;
        Ok(String::from_utf8(bytes)?)
    }
}

fn column_name(column: &Value) -> String {
    match column {
        Value::String(name) => name.clone(),
        Value::Object(fields) => COLUMN_NAME_KEYS
            .iter()
            .find_map(|key| fields.get(*key).and_then(Value::as_str))
            .map(str::to_owned)
            .unwrap_or_else(|| column.to_string()),
        other => other.to_string(),
    }
}

/// Exact key first, then a dotted path into nested objects (`Owner.Name`).
fn lookup<'a>(fields: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    if let Some(value) = fields.get(key) {
        return Some(value);
    }
    let mut parts = key.split('.');
    let mut current = fields.get(parts.next()?)?;
    for part in parts {
        current = current.get(part)?;
    }
    Some(current)
}

fn cell(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(text)) => text.clone(),
        Some(other) => other.to_string(),
    }
}
