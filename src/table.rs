use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::RuleTag;

/// Hard input errors surfaced to the caller
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("unknown column: {0}")]
    UnknownColumn(String),
    #[error("unknown aggregation function: {0}")]
    UnknownAggFunc(String),
    #[error("aggregation function requires a values column")]
    ValuesRequired,
    #[error("at least one grouping column is required")]
    EmptyGrouping,
    #[error("grid shape mismatch: value grid {values:?} vs outcome grid {outcome:?}")]
    ShapeMismatch {
        values: (usize, usize),
        outcome: (usize, usize),
    },
    #[error("invalid model: {0}")]
    InvalidModel(String),
}

/// Grouping specifier for one table axis
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupSpec {
    None,
    Single(String),
    Hierarchy(Vec<String>),
}

impl GroupSpec {
    /// Flatten to the ordered list of grouping columns.
    pub fn columns(&self) -> Vec<&str> {
        match self {
            GroupSpec::None => Vec::new(),
            GroupSpec::Single(name) => vec![name.as_str()],
            GroupSpec::Hierarchy(names) => names.iter().map(String::as_str).collect(),
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, GroupSpec::None)
    }

    /// Build from a caller-supplied column list.
    pub fn from_columns(columns: &[String]) -> Self {
        match columns {
            [] => GroupSpec::None,
            [one] => GroupSpec::Single(one.clone()),
            many => GroupSpec::Hierarchy(many.to_vec()),
        }
    }
}

/// Recognized aggregation functions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggFunc {
    Count,
    Sum,
    Mean,
    Median,
    Std,
}

impl AggFunc {
    pub fn as_str(&self) -> &'static str {
        match self {
            AggFunc::Count => "count",
            AggFunc::Sum => "sum",
            AggFunc::Mean => "mean",
            AggFunc::Median => "median",
            AggFunc::Std => "std",
        }
    }

    /// Apply to the non-missing contributor values of a cell.
    pub fn apply(&self, vals: &[f64]) -> f64 {
        match self {
            AggFunc::Count => vals.len() as f64,
            AggFunc::Sum => vals.iter().sum(),
            AggFunc::Mean => {
                if vals.is_empty() {
                    f64::NAN
                } else {
                    vals.iter().sum::<f64>() / vals.len() as f64
                }
            }
            AggFunc::Median => {
                if vals.is_empty() {
                    return f64::NAN;
                }
                let mut sorted = vals.to_vec();
                sorted.sort_by(|a, b| a.total_cmp(b));
                let mid = sorted.len() / 2;
                if sorted.len() % 2 == 0 {
                    (sorted[mid - 1] + sorted[mid]) / 2.0
                } else {
                    sorted[mid]
                }
            }
            AggFunc::Std => {
                if vals.is_empty() {
                    return f64::NAN;
                }
                let mean = vals.iter().sum::<f64>() / vals.len() as f64;
                let var =
                    vals.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / vals.len() as f64;
                var.sqrt()
            }
        }
    }
}

impl FromStr for AggFunc {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "count" | "freq" => Ok(AggFunc::Count),
            "sum" => Ok(AggFunc::Sum),
            "mean" => Ok(AggFunc::Mean),
            "median" => Ok(AggFunc::Median),
            "std" => Ok(AggFunc::Std),
            other => Err(EngineError::UnknownAggFunc(other.to_string())),
        }
    }
}

impl fmt::Display for AggFunc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One result column: an optional aggregation function (sub-column
/// group) plus the column-label tuple
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub func: Option<AggFunc>,
    pub labels: Vec<String>,
}

impl Column {
    /// Flat display name, e.g. `mean|north|female`.
    pub fn name(&self) -> String {
        let mut parts: Vec<String> = Vec::new();
        if let Some(func) = self.func {
            parts.push(func.as_str().to_string());
        }
        parts.extend(self.labels.iter().cloned());
        parts.join("|")
    }
}

/// One result cell: the displayed value plus the raw values that fed it
///
/// `value: None` is the explicit missing marker. A `None` contributor
/// is a raw value that was itself missing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Cell {
    pub value: Option<f64>,
    pub contributors: Vec<Option<f64>>,
}

impl Cell {
    pub fn new(value: f64, contributors: Vec<Option<f64>>) -> Self {
        Self {
            value: Some(value),
            contributors,
        }
    }

    /// Number of contributing records, missing values included.
    pub fn count(&self) -> usize {
        self.contributors.len()
    }

    pub fn has_missing(&self) -> bool {
        self.contributors.iter().any(Option::is_none)
    }

    /// Non-missing contributor values.
    pub fn present(&self) -> Vec<f64> {
        self.contributors.iter().filter_map(|v| *v).collect()
    }
}

/// An n-dimensional aggregation result with per-cell contributor sets
#[derive(Debug, Clone)]
pub struct AggregatedTable {
    /// Ordered row-label tuples; hierarchies are multi-entry tuples.
    pub row_labels: Vec<Vec<String>>,
    pub columns: Vec<Column>,
    /// Row-major value grid, same order as `row_labels` x `columns`.
    pub cells: Vec<Vec<Cell>>,
    /// Label of margin rows/columns when margins were requested.
    pub margins_label: Option<String>,
    /// False for frequency tables whose contributors are unit weights;
    /// value-distribution rules only apply when true.
    pub value_backed: bool,
}

impl AggregatedTable {
    pub fn shape(&self) -> (usize, usize) {
        (self.row_labels.len(), self.columns.len())
    }

    pub fn is_margin_row(&self, row: usize) -> bool {
        match &self.margins_label {
            Some(label) => self.row_labels[row].first() == Some(label),
            None => false,
        }
    }

    pub fn is_margin_col(&self, col: usize) -> bool {
        match &self.margins_label {
            Some(label) => self.columns[col].labels.first() == Some(label),
            None => false,
        }
    }

    /// Render as delimited text. Suppressed cells are empty fields.
    pub fn to_csv(&self) -> String {
        let mut out = String::new();
        let row_levels = self.row_labels.first().map_or(1, Vec::len);

        // header: one field per row-label level, then column names
        let mut header: Vec<String> = vec![String::new(); row_levels];
        for column in &self.columns {
            header.push(column.name());
        }
        out.push_str(&csv_row(&header));

        for (labels, cells) in self.row_labels.iter().zip(&self.cells) {
            let mut fields: Vec<String> = labels.clone();
            for cell in cells {
                fields.push(match cell.value {
                    Some(v) => format_number(v),
                    None => String::new(),
                });
            }
            out.push_str(&csv_row(&fields));
        }
        out
    }
}

fn format_number(v: f64) -> String {
    if v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        format!("{}", v)
    }
}

fn csv_row(fields: &[String]) -> String {
    let escaped: Vec<String> = fields
        .iter()
        .map(|f| {
            if f.contains(',') || f.contains('"') || f.contains('\n') {
                format!("\"{}\"", f.replace('"', "\"\""))
            } else {
                f.clone()
            }
        })
        .collect();
    format!("{}\n", escaped.join(","))
}

/// Per-cell rule annotations, always shaped like the value grid
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeGrid {
    cells: Vec<Vec<BTreeSet<RuleTag>>>,
    /// Tracked separately so the shape survives losing every row.
    cols: usize,
}

impl OutcomeGrid {
    pub fn new(rows: usize, cols: usize) -> Self {
        Self {
            cells: vec![vec![BTreeSet::new(); cols]; rows],
            cols,
        }
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.cells.len(), self.cols)
    }

    pub fn tags(&self, row: usize, col: usize) -> &BTreeSet<RuleTag> {
        &self.cells[row][col]
    }

    pub fn tags_mut(&mut self, row: usize, col: usize) -> &mut BTreeSet<RuleTag> {
        &mut self.cells[row][col]
    }

    pub fn is_ok(&self, row: usize, col: usize) -> bool {
        self.cells[row][col].is_empty()
    }

    pub fn iter_cells(&self) -> impl Iterator<Item = (usize, usize, &BTreeSet<RuleTag>)> {
        self.cells.iter().enumerate().flat_map(|(row, cols)| {
            cols.iter()
                .enumerate()
                .map(move |(col, tags)| (row, col, tags))
        })
    }

    pub fn drop_row(&mut self, row: usize) {
        self.cells.remove(row);
    }

    pub fn drop_col(&mut self, col: usize) {
        for row in &mut self.cells {
            row.remove(col);
        }
        self.cols -= 1;
    }

    /// Human-readable grid: `ok` or a `; `-joined tag list per cell.
    pub fn render(&self) -> Vec<Vec<String>> {
        self.cells
            .iter()
            .map(|row| {
                row.iter()
                    .map(|tags| {
                        if tags.is_empty() {
                            "ok".to_string()
                        } else {
                            tags.iter()
                                .map(|t| t.as_str())
                                .collect::<Vec<_>>()
                                .join("; ")
                        }
                    })
                    .collect()
            })
            .collect()
    }

    /// Error unless this grid matches the table's shape.
    pub fn check_aligned(&self, table: &AggregatedTable) -> Result<(), EngineError> {
        if self.shape() != table.shape() {
            return Err(EngineError::ShapeMismatch {
                values: table.shape(),
                outcome: self.shape(),
            });
        }
        Ok(())
    }
}
