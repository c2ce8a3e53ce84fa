use std::collections::BTreeSet;

use tracing::{debug, info};

use crate::config::Policy;
use crate::models::{DisclosureSummary, RuleTag};
use crate::table::{AggregatedTable, Cell, OutcomeGrid};

/// Applies the disclosure rule set to every cell of a table
pub struct RuleEvaluator<'a> {
    policy: &'a Policy,
}

impl<'a> RuleEvaluator<'a> {
    pub fn new(policy: &'a Policy) -> Self {
        Self { policy }
    }

    /// Score every cell, producing the annotation grid.
    ///
    /// Multi-function sub-columns carry the same underlying contributor
    /// set and therefore receive identical annotations.
    pub fn evaluate(&self, table: &AggregatedTable) -> OutcomeGrid {
        let (rows, cols) = table.shape();
        let mut outcome = OutcomeGrid::new(rows, cols);

        for row in 0..rows {
            for col in 0..cols {
                let tags = self.evaluate_cell(&table.cells[row][col], table.value_backed);
                if !tags.is_empty() {
                    debug!(row, col, ?tags, "cell triggered");
                }
                *outcome.tags_mut(row, col) = tags;
            }
        }

        info!(
            triggered = outcome.iter_cells().filter(|(_, _, t)| !t.is_empty()).count(),
            cells = rows * cols,
            "rule evaluation complete"
        );

        outcome
    }

    /// Evaluate + summarize in one step (no suppression applied here).
    pub fn check(&self, table: &AggregatedTable) -> (OutcomeGrid, DisclosureSummary) {
        let outcome = self.evaluate(table);
        let summary = DisclosureSummary::from_outcome(&outcome, false);
        (outcome, summary)
    }

    /// Score a single cell.
    ///
    /// Frequency tables carry synthetic unit contributors; only the
    /// threshold rule is meaningful for them.
    pub fn evaluate_cell(&self, cell: &Cell, value_backed: bool) -> BTreeSet<RuleTag> {
        let mut tags = BTreeSet::new();

        // An incomplete contributor set makes every numeric verdict
        // unreliable; hand the cell to a human instead.
        if value_backed && self.policy.check_missing_values && cell.has_missing() {
            tags.insert(RuleTag::Missing);
            return tags;
        }

        // missing contributors do not count towards the threshold
        let vals = cell.present();
        if (vals.len() as u32) < self.policy.safe_threshold {
            tags.insert(RuleTag::Threshold);
        }

        if !value_backed {
            return tags;
        }

        if vals.iter().any(|v| *v < 0.0) {
            tags.insert(RuleTag::Negative);
        }

        if self.is_degenerate(&vals) {
            tags.insert(RuleTag::Degenerate);
        }

        let mut magnitudes: Vec<f64> = vals.iter().map(|v| v.abs()).collect();
        magnitudes.sort_by(|a, b| b.total_cmp(a));

        if self.nk_triggered(&magnitudes) {
            tags.insert(RuleTag::NkRule);
        }
        if self.p_ratio_triggered(&magnitudes) {
            tags.insert(RuleTag::PRatio);
        }

        tags
    }

    /// All contributors identical: the aggregate reveals the exact
    /// underlying value.
    fn is_degenerate(&self, vals: &[f64]) -> bool {
        let Some(first) = vals.first() else {
            return false;
        };
        if !vals.iter().all(|v| v == first) {
            return false;
        }
        if *first == 0.0 && !self.policy.zeros_are_disclosive {
            return false;
        }
        true
    }

    /// Dominance: top-n share of the cell total at or above k.
    fn nk_triggered(&self, magnitudes: &[f64]) -> bool {
        if magnitudes.is_empty() {
            return false;
        }
        let total: f64 = magnitudes.iter().sum();
        if total == 0.0 {
            // all-zero cell: disclosive only when configured so
            return self.policy.zeros_are_disclosive;
        }
        let top: f64 = magnitudes.iter().take(self.policy.safe_nk_n).sum();
        top / total >= self.policy.safe_nk_k
    }

    /// Second-ranking ratio: the runner-up is close enough to the
    /// largest contributor to estimate it.
    fn p_ratio_triggered(&self, magnitudes: &[f64]) -> bool {
        if magnitudes.len() < 2 || magnitudes[0] == 0.0 {
            return false;
        }
        magnitudes[1] / magnitudes[0] > self.policy.safe_pratio_p
    }
}
