use anyhow::{Context, Result};
use serde_json::Value;

/// A single observed value in a dataset column
#[derive(Debug, Clone, PartialEq)]
pub enum DataValue {
    Text(String),
    Number(f64),
    Missing,
}

impl DataValue {
    /// Label used when grouping by this value.
    pub fn label(&self) -> String {
        match self {
            DataValue::Text(s) => s.clone(),
            DataValue::Number(n) => {
                if n.fract() == 0.0 && n.abs() < 1e15 {
                    format!("{}", *n as i64)
                } else {
                    format!("{}", n)
                }
            }
            DataValue::Missing => "<missing>".to_string(),
        }
    }

    /// Numeric view; `None` for text and missing values.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            DataValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, DataValue::Missing)
    }
}

/// Column-oriented dataset fed to the aggregation collaborator
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    names: Vec<String>,
    columns: Vec<Vec<DataValue>>,
    rows: usize,
}

impl Dataset {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a named column. Columns must share one length.
    pub fn push_column(&mut self, name: impl Into<String>, values: Vec<DataValue>) {
        if self.names.is_empty() {
            self.rows = values.len();
        }
        self.names.push(name.into());
        self.columns.push(values);
    }

    pub fn len(&self) -> usize {
        self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    pub fn column(&self, name: &str) -> Option<&[DataValue]> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|i| self.columns[i].as_slice())
    }

    pub fn column_names(&self) -> &[String] {
        &self.names
    }

    /// Parse a dataset from a JSON array of row objects.
    ///
    /// `null` and absent fields become missing values.
    pub fn from_json(content: &str) -> Result<Self> {
        let rows: Vec<serde_json::Map<String, Value>> =
            serde_json::from_str(content).context("Dataset must be a JSON array of objects")?;

        let mut names: Vec<String> = Vec::new();
        for row in &rows {
            for key in row.keys() {
                if !names.contains(key) {
                    names.push(key.clone());
                }
            }
        }

        let mut dataset = Dataset::new();
        for name in &names {
            let values: Vec<DataValue> = rows
                .iter()
                .map(|row| match row.get(name) {
                    None | Some(Value::Null) => DataValue::Missing,
                    Some(Value::Number(n)) => match n.as_f64() {
                        Some(v) => DataValue::Number(v),
                        None => DataValue::Missing,
                    },
                    Some(Value::String(s)) => DataValue::Text(s.clone()),
                    Some(Value::Bool(b)) => DataValue::Text(b.to_string()),
                    Some(other) => DataValue::Text(other.to_string()),
                })
                .collect();
            dataset.push_column(name.clone(), values);
        }
        dataset.rows = rows.len();

        Ok(dataset)
    }
}
