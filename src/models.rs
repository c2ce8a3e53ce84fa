use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::table::{AggregatedTable, OutcomeGrid};

/// Disclosure status of an output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Pass,
    Fail,
    Review,
}

impl Status {
    /// Derive a status from a set of triggered rules.
    ///
    /// Empty => pass. Only ambiguity flags (missing/negative) => review.
    /// Any hard rule (threshold/nk/p-ratio/degenerate) => fail.
    pub fn from_tags<'a>(tags: impl IntoIterator<Item = &'a RuleTag>) -> Self {
        let mut status = Status::Pass;
        for tag in tags {
            match tag {
                RuleTag::Missing | RuleTag::Negative => {
                    if status == Status::Pass {
                        status = Status::Review;
                    }
                }
                _ => status = Status::Fail,
            }
        }
        status
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Pass => "pass",
            Status::Fail => "fail",
            Status::Review => "review",
        }
    }
}

/// Kind of output held by a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    Table,
    Regression,
    Custom,
}

impl OutputKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputKind::Table => "table",
            OutputKind::Regression => "regression",
            OutputKind::Custom => "custom",
        }
    }
}

/// A disclosure rule that can trigger on a cell
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RuleTag {
    #[serde(rename = "threshold")]
    Threshold,
    #[serde(rename = "p-ratio")]
    PRatio,
    #[serde(rename = "nk-rule")]
    NkRule,
    #[serde(rename = "missing")]
    Missing,
    #[serde(rename = "negative")]
    Negative,
    #[serde(rename = "degenerate")]
    Degenerate,
}

impl RuleTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleTag::Threshold => "threshold",
            RuleTag::PRatio => "p-ratio",
            RuleTag::NkRule => "nk-rule",
            RuleTag::Missing => "missing",
            RuleTag::Negative => "negative",
            RuleTag::Degenerate => "degenerate",
        }
    }
}

/// (row, column) coordinate into a table grid
pub type Coord = (usize, usize);

/// Aggregate view of the disclosure checks run on one table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisclosureSummary {
    pub status: Status,
    /// Whether suppression was applied to the released table.
    pub suppressed: bool,
    /// Per-rule count of affected cells.
    pub counts: BTreeMap<RuleTag, usize>,
    /// Per-rule coordinates of affected cells.
    pub cells: BTreeMap<RuleTag, Vec<Coord>>,
}

impl DisclosureSummary {
    /// Build a summary from an outcome grid.
    pub fn from_outcome(outcome: &OutcomeGrid, suppressed: bool) -> Self {
        let mut counts: BTreeMap<RuleTag, usize> = BTreeMap::new();
        let mut cells: BTreeMap<RuleTag, Vec<Coord>> = BTreeMap::new();
        let mut status = Status::Pass;

        for (row, col, tags) in outcome.iter_cells() {
            for tag in tags {
                *counts.entry(*tag).or_insert(0) += 1;
                cells.entry(*tag).or_default().push((row, col));
            }
            let cell_status = Status::from_tags(tags.iter());
            status = match (status, cell_status) {
                (_, Status::Fail) | (Status::Fail, _) => Status::Fail,
                (_, Status::Review) | (Status::Review, _) => Status::Review,
                _ => Status::Pass,
            };
        }

        Self {
            status,
            suppressed,
            counts,
            cells,
        }
    }

    /// One-line human summary, e.g. `fail; threshold: 4 cells suppressed`.
    pub fn describe(&self) -> String {
        if self.counts.is_empty() {
            return self.status.as_str().to_string();
        }
        let action = if self.suppressed {
            "suppressed"
        } else {
            "may need suppressing"
        };
        let parts: Vec<String> = self
            .counts
            .iter()
            .map(|(tag, n)| format!("{}: {} cells {}", tag.as_str(), n, action))
            .collect();
        format!("{}; {}", self.status.as_str(), parts.join("; "))
    }
}

/// Result of the residual degrees-of-freedom gate on a fitted model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelCheckResult {
    pub status: Status,
    /// Residual degrees of freedom: observations minus parameters.
    pub dof: i64,
    /// Threshold the dof was compared against.
    pub threshold: u32,
}

impl ModelCheckResult {
    pub fn describe(&self) -> String {
        match self.status {
            Status::Pass => format!("pass; dof={} >= {}", self.dof, self.threshold),
            _ => format!("fail; dof={} < {}", self.dof, self.threshold),
        }
    }
}

/// An exportable artifact attached to a record
#[derive(Debug, Clone)]
pub enum Artifact {
    /// A checked table, exported as delimited text.
    Table(AggregatedTable),
    /// Textual sections, e.g. a model summary. Exported as one file.
    Text(Vec<String>),
    /// An externally-produced file registered via `custom_output`.
    File(PathBuf),
}

/// A single checked output together with its audit metadata
#[derive(Debug, Clone)]
pub struct OutputRecord {
    pub uid: String,
    pub status: Status,
    pub kind: OutputKind,
    /// Literal command text that produced the output.
    pub command: String,
    /// One-line summary of the checks.
    pub summary: String,
    pub disclosure: Option<DisclosureSummary>,
    pub outcome: Option<OutcomeGrid>,
    pub model_check: Option<ModelCheckResult>,
    pub artifacts: Vec<Artifact>,
    pub timestamp: DateTime<Utc>,
    pub comments: Vec<String>,
    /// Researcher justification for releasing a non-pass output.
    /// Empty until supplied.
    pub exception: String,
}

impl OutputRecord {
    pub fn new(status: Status, kind: OutputKind, command: impl Into<String>) -> Self {
        Self {
            uid: String::new(),
            status,
            kind,
            command: command.into(),
            summary: status.as_str().to_string(),
            disclosure: None,
            outcome: None,
            model_check: None,
            artifacts: Vec::new(),
            timestamp: Utc::now(),
            comments: Vec::new(),
            exception: String::new(),
        }
    }

    /// Whether export requires an exception that has not been supplied.
    pub fn needs_exception(&self) -> bool {
        self.status != Status::Pass && self.exception.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_from_tags() {
        assert_eq!(Status::from_tags([].iter()), Status::Pass);
        assert_eq!(
            Status::from_tags([RuleTag::Missing].iter()),
            Status::Review
        );
        assert_eq!(
            Status::from_tags([RuleTag::Negative, RuleTag::Missing].iter()),
            Status::Review
        );
        assert_eq!(
            Status::from_tags([RuleTag::Threshold].iter()),
            Status::Fail
        );
        // a hard rule dominates ambiguity flags
        assert_eq!(
            Status::from_tags([RuleTag::Missing, RuleTag::NkRule].iter()),
            Status::Fail
        );
    }

    #[test]
    fn test_needs_exception() {
        let mut record = OutputRecord::new(Status::Fail, OutputKind::Table, "crosstab");
        assert!(record.needs_exception());
        record.exception = "aggregates previously approved".to_string();
        assert!(!record.needs_exception());

        let record = OutputRecord::new(Status::Pass, OutputKind::Table, "crosstab");
        assert!(!record.needs_exception());
    }

    #[test]
    fn test_model_check_describe() {
        let check = ModelCheckResult {
            status: Status::Pass,
            dof: 807,
            threshold: 10,
        };
        assert_eq!(check.describe(), "pass; dof=807 >= 10");
    }
}
