// ABOUTME: Data structures for change pages and table lists returned by the web service
// ABOUTME: Parses the JSON envelope and normalises record values to optional strings

use serde_json::{Map, Value};

use crate::error::SyncError;

const STATUS_KEY: &str = "status";
const COUNT_KEY: &str = "count";
const TOTAL_COUNT_KEY: &str = "total_count";
const OFFSET_KEY: &str = "offset";
const DATA_KEY: &str = "data";

const STATUS_SUCCESS: &str = "success";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageStatus {
    Success,
    Failure,
}

/// One row's worth of changes, keyed by remote field name.
///
/// Field order is the order the server sent them in.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ChangeRecord {
    fields: Map<String, Value>,
}

impl ChangeRecord {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self { fields }
    }

    /// Build a record from string pairs, keeping their order.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let fields = pairs
            .into_iter()
            .map(|(k, v)| (k.into(), Value::String(v.into())))
            .collect();
        Self { fields }
    }

    pub fn field_names(&self) -> Vec<String> {
        self.fields.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Value of `field` as text to bind; `None` stands for SQL NULL.
    ///
    /// A field missing from the record is a malformed payload, since the
    /// statement for the page was built from the first record's fields.
    pub fn value(&self, field: &str) -> Result<Option<String>, SyncError> {
        match self.fields.get(field) {
            None => Err(SyncError::malformed(format!(
                "record is missing field '{}'",
                field
            ))),
            Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(Value::Number(n)) => Ok(Some(n.to_string())),
            Some(Value::Bool(b)) => Ok(Some(b.to_string())),
            Some(other) => Ok(Some(other.to_string())),
        }
    }
}

/// A response unit from the change feed.
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub status: PageStatus,
    /// Records in this page.
    pub count: usize,
    /// Records available for this table, change type and watermark.
    pub total_count: usize,
    /// Records already fetched before this page.
    pub offset: usize,
    pub records: Vec<ChangeRecord>,
}

impl Page {
    pub fn success(offset: usize, total_count: usize, records: Vec<ChangeRecord>) -> Self {
        Self {
            status: PageStatus::Success,
            count: records.len(),
            total_count,
            offset,
            records,
        }
    }

    pub fn failure() -> Self {
        Self {
            status: PageStatus::Failure,
            count: 0,
            total_count: 0,
            offset: 0,
            records: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == PageStatus::Success
    }

    /// Whether more records remain after this page.
    pub fn has_more(&self) -> bool {
        self.offset + self.count < self.total_count
    }

    /// Interpret a decoded response body.
    ///
    /// Any status other than `success` is a failure page and the remaining
    /// keys are not looked at. Paging keys are mandatory on success.
    pub fn from_json(body: &Value) -> Result<Self, SyncError> {
        let envelope = body
            .as_object()
            .ok_or_else(|| SyncError::malformed("page is not a JSON object"))?;

        if read_status(envelope)? != STATUS_SUCCESS {
            return Ok(Page::failure());
        }

        let count = read_count(envelope, COUNT_KEY)?;
        let total_count = read_count(envelope, TOTAL_COUNT_KEY)?;
        let offset = read_count(envelope, OFFSET_KEY)?;

        let records = match envelope.get(DATA_KEY) {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(rows)) => rows
                .iter()
                .enumerate()
                .map(|(i, row)| match row {
                    Value::Object(fields) => Ok(ChangeRecord::new(fields.clone())),
                    _ => Err(SyncError::malformed(format!(
                        "data[{}] is not a JSON object",
                        i
                    ))),
                })
                .collect::<Result<Vec<_>, _>>()?,
            Some(_) => return Err(SyncError::malformed("'data' is not an array")),
        };

        Ok(Page {
            status: PageStatus::Success,
            count,
            total_count,
            offset,
            records,
        })
    }
}

/// Parse a `table_names` response into the ordered list of tables.
///
/// A non-success status yields an empty list, as does a zero count.
pub fn parse_table_list(body: &Value) -> Result<Vec<String>, SyncError> {
    let envelope = body
        .as_object()
        .ok_or_else(|| SyncError::malformed("table list is not a JSON object"))?;

    if read_status(envelope)? != STATUS_SUCCESS {
        return Ok(Vec::new());
    }
    if read_count(envelope, COUNT_KEY)? == 0 {
        return Ok(Vec::new());
    }

    let names = envelope
        .get(DATA_KEY)
        .and_then(Value::as_array)
        .ok_or_else(|| SyncError::malformed("table list has no 'data' array"))?;

    names
        .iter()
        .map(|name| {
            name.as_str()
                .map(str::to_string)
                .ok_or_else(|| SyncError::malformed(format!("table name {} is not a string", name)))
        })
        .collect()
}

fn read_status(envelope: &Map<String, Value>) -> Result<&str, SyncError> {
    envelope
        .get(STATUS_KEY)
        .and_then(Value::as_str)
        .ok_or_else(|| SyncError::malformed("missing 'status'"))
}

// The service is loose about number encoding, so numeric strings are accepted.
fn read_count(envelope: &Map<String, Value>, key: &str) -> Result<usize, SyncError> {
    let value = envelope
        .get(key)
        .ok_or_else(|| SyncError::malformed(format!("missing '{}'", key)))?;

    let parsed = match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    };

    parsed
        .and_then(|n| usize::try_from(n).ok())
        .ok_or_else(|| SyncError::malformed(format!("'{}' is not a count: {}", key, value)))
}
