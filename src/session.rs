use std::path::{Path, PathBuf};

use anyhow::Result;
use tracing::info;

use crate::adapters::{Aggregator, FittedModel, SimpleAggregator, TableQuery};
use crate::config::Policy;
use crate::data::Dataset;
use crate::ledger::finalise::{self, ExceptionPrompt, FinaliseReport, ManifestFormat};
use crate::ledger::Ledger;
use crate::models::{Artifact, DisclosureSummary, OutputKind, OutputRecord};
use crate::regression;
use crate::rules::RuleEvaluator;
use crate::suppressions::SuppressionEngine;
use crate::survival::SurvivalTable;
use crate::table::AggregatedTable;

/// One researcher session: runs checks, accumulates the ledger,
/// finalises into a release directory.
pub struct Session {
    policy: Policy,
    /// When set, unsafe cells are redacted in the released tables;
    /// otherwise tables pass through annotated but intact.
    suppress: bool,
    ledger: Ledger,
    aggregator: Box<dyn Aggregator>,
}

impl Session {
    pub fn new(policy: Policy, suppress: bool) -> Self {
        Self::with_aggregator(policy, suppress, Box::new(SimpleAggregator))
    }

    pub fn with_aggregator(policy: Policy, suppress: bool, aggregator: Box<dyn Aggregator>) -> Self {
        info!(suppress, "session started");
        Self {
            policy,
            suppress,
            ledger: Ledger::new(),
            aggregator,
        }
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Toggle redaction for subsequent checks; already-recorded
    /// outputs are unaffected.
    pub fn set_suppress(&mut self, suppress: bool) {
        info!(suppress, "suppression toggled");
        self.suppress = suppress;
    }

    /// Tabulate, check, optionally suppress, and record. Returns the
    /// minted uid and the table as it would be released.
    pub fn crosstab(
        &mut self,
        data: &Dataset,
        query: &TableQuery,
    ) -> Result<(String, AggregatedTable)> {
        let mut table = self.aggregator.tabulate(data, query)?;
        let mut outcome = RuleEvaluator::new(&self.policy).evaluate(&table);

        if self.suppress {
            SuppressionEngine::new(&self.policy).suppress_and_align(&mut table, &mut outcome)?;
        }

        let summary = DisclosureSummary::from_outcome(&outcome, self.suppress);
        let mut record = OutputRecord::new(summary.status, OutputKind::Table, query.describe());
        record.summary = summary.describe();
        record.disclosure = Some(summary);
        record.outcome = Some(outcome);
        record.artifacts.push(Artifact::Table(table.clone()));

        let uid = self.ledger.add(record);
        Ok((uid, table))
    }

    /// Gate a fitted model on residual degrees of freedom and record
    /// its summary for export.
    pub fn check_model(&mut self, model: &FittedModel, command: &str) -> Result<String> {
        let check = regression::check_model(model, &self.policy)?;

        let mut record = OutputRecord::new(check.status, OutputKind::Regression, command);
        record.summary = check.describe();
        record.model_check = Some(check);
        record.artifacts.push(Artifact::Text(model.summary.clone()));

        Ok(self.ledger.add(record))
    }

    /// Check a survival-function table and record it.
    pub fn survival(
        &mut self,
        survival: &SurvivalTable,
        command: &str,
    ) -> (String, AggregatedTable) {
        let outcome = survival.check(&self.policy);
        let mut table = survival.to_table();
        if self.suppress {
            for (row, col, tags) in outcome.iter_cells() {
                if !tags.is_empty() {
                    table.cells[row][col].value = None;
                }
            }
        }

        let summary = DisclosureSummary::from_outcome(&outcome, self.suppress);
        let mut record = OutputRecord::new(summary.status, OutputKind::Table, command);
        record.summary = summary.describe();
        record.disclosure = Some(summary);
        record.outcome = Some(outcome);
        record.artifacts.push(Artifact::Table(table.clone()));

        (self.ledger.add(record), table)
    }

    pub fn custom_output(&mut self, path: PathBuf, comment: &str) -> String {
        self.ledger.custom_output(path, comment)
    }

    pub fn rename_output(&mut self, uid: &str, new_uid: &str) -> Result<()> {
        Ok(self.ledger.rename(uid, new_uid)?)
    }

    pub fn remove_output(&mut self, uid: &str) -> Result<()> {
        self.ledger.remove(uid)?;
        Ok(())
    }

    pub fn add_comments(&mut self, uid: &str, comment: &str) -> Result<()> {
        Ok(self.ledger.add_comment(uid, comment)?)
    }

    pub fn add_exception(&mut self, uid: &str, reason: &str) -> Result<()> {
        Ok(self.ledger.add_exception(uid, reason)?)
    }

    /// One line per recorded output.
    pub fn print_outputs(&self) -> String {
        self.ledger
            .records()
            .iter()
            .map(|r| format!("{}\t{}\t{}\t{}\n", r.uid, r.kind.as_str(), r.summary, r.command))
            .collect()
    }

    pub fn finalise(
        &self,
        target: &Path,
        format: ManifestFormat,
        prompt: &dyn ExceptionPrompt,
    ) -> Result<FinaliseReport> {
        finalise::finalise(&self.ledger, target, format, prompt)
    }
}
