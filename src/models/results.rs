use crate::error::{ExtractError, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

const ERROR_KEY: &str = "error";
const FILENAME_KEY: &str = "filename";

/// One row of extracted values for one input file.
///
/// Values are held as strings whatever type the schema declared; `null` arrives as an
/// empty string and other JSON values keep their JSON text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Map<String, Value>", into = "Map<String, Value>")]
pub struct ResultRecord {
    values: IndexMap<String, String>,
    error: Option<String>,
}

fn value_to_cell(value: Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s,
        other => other.to_string(),
    }
}

impl From<Map<String, Value>> for ResultRecord {
    fn from(map: Map<String, Value>) -> Self {
        let mut values = IndexMap::with_capacity(map.len());
        let mut error = None;
        for (key, value) in map {
            if key == ERROR_KEY {
                error = Some(value_to_cell(value)).filter(|e| !e.is_empty());
            } else {
                values.insert(key, value_to_cell(value));
            }
        }
        Self { values, error }
    }
}

impl From<ResultRecord> for Map<String, Value> {
    fn from(record: ResultRecord) -> Self {
        let mut map: Map<String, Value> = record
            .values
            .into_iter()
            .map(|(k, v)| (k, Value::String(v)))
            .collect();
        if let Some(error) = record.error {
            map.insert(ERROR_KEY.to_string(), Value::String(error));
        }
        map
    }
}

impl ResultRecord {
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            values: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            error: None,
        }
    }

    pub fn get(&self, column: &str) -> Option<&str> {
        self.values.get(column).map(String::as_str)
    }

    pub fn filename(&self) -> Option<&str> {
        self.get(FILENAME_KEY)
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn values(&self) -> &IndexMap<String, String> {
        &self.values
    }

    fn set(&mut self, column: &str, value: String) {
        match self.values.get_mut(column) {
            Some(cell) => *cell = value,
            None => {
                self.values.insert(column.to_string(), value);
            }
        }
    }
}

/// Records returned by one processing run, plus whether the user changed any of them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultSet {
    records: Vec<ResultRecord>,
    dirty: bool,
}

impl ResultSet {
    pub fn new(records: Vec<ResultRecord>) -> Self {
        Self {
            records,
            dirty: false,
        }
    }

    pub fn records(&self) -> &[ResultRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_saved(&mut self) {
        self.dirty = false;
    }

    /// Table columns: keys of the first record, `error` excluded.
    pub fn columns(&self) -> Vec<String> {
        self.records
            .first()
            .map(|r| r.columns().map(str::to_string).collect())
            .unwrap_or_default()
    }

    pub fn failed_count(&self) -> usize {
        self.records.iter().filter(|r| r.error().is_some()).count()
    }

    /// Changes exactly one cell and marks the set dirty.
    pub fn edit_cell(&mut self, row: usize, column: &str, value: impl Into<String>) -> Result<()> {
        if !self.columns().iter().any(|c| c == column) {
            return Err(ExtractError::Validation(format!(
                "Unknown column '{}'",
                column
            )));
        }
        let record = self.records.get_mut(row).ok_or_else(|| {
            ExtractError::Validation(format!("No result row {}", row + 1))
        })?;
        record.set(column, value.into());
        self.dirty = true;
        Ok(())
    }
}
