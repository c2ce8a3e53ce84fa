use tracing::{debug, info};

use crate::config::Policy;
use crate::rules::RuleEvaluator;
use crate::table::{AggFunc, AggregatedTable, Column, EngineError, OutcomeGrid};

/// Turns rule outcomes into redactions and keeps the value grid and
/// the outcome grid aligned when redaction reshapes the table.
///
/// Margin policy: margins are recomputed from surviving contributors
/// and re-evaluated, so every displayed total stays derivable from
/// displayed cells only.
pub struct SuppressionEngine<'a> {
    policy: &'a Policy,
}

impl<'a> SuppressionEngine<'a> {
    pub fn new(policy: &'a Policy) -> Self {
        Self { policy }
    }

    /// Redact every non-ok cell, drop axis members left fully
    /// redacted, recompute margins from surviving contributors, and
    /// re-evaluate the recomputed margins.
    ///
    /// Postcondition: the grids share shape.
    pub fn suppress_and_align(
        &self,
        table: &mut AggregatedTable,
        outcome: &mut OutcomeGrid,
    ) -> Result<(), EngineError> {
        outcome.check_aligned(table)?;

        let prior_rows = table.row_labels.clone();
        let prior_columns = table.columns.clone();

        redact(table, outcome);
        drop_redacted_members(table);
        reconcile(table, outcome, &prior_rows, &prior_columns);
        self.recompute_margins(table, outcome);

        outcome.check_aligned(table)?;
        Ok(())
    }

    /// Rebuild each margin cell from the surviving (non-suppressed)
    /// member cells, then re-run the rules on it; altering which
    /// contributors feed a margin can newly trigger or clear a rule.
    fn recompute_margins(&self, table: &mut AggregatedTable, outcome: &mut OutcomeGrid) {
        if table.margins_label.is_none() {
            return;
        }
        let (rows, cols) = table.shape();
        let evaluator = RuleEvaluator::new(self.policy);
        let value_backed = table.value_backed;

        let mut recomputed = 0usize;
        for row in 0..rows {
            for col in 0..cols {
                let margin_row = table.is_margin_row(row);
                let margin_col = table.is_margin_col(col);
                if !margin_row && !margin_col {
                    continue;
                }

                let func = table.columns[col].func.unwrap_or(AggFunc::Count);
                let members = margin_members(table, row, col, margin_row, margin_col);

                let mut contributors: Vec<Option<f64>> = Vec::new();
                for (r, c) in members {
                    if outcome.is_ok(r, c) {
                        contributors.extend(table.cells[r][c].contributors.iter().cloned());
                    }
                }

                let cell = &mut table.cells[row][col];
                cell.contributors = contributors;
                let present = cell.present();
                cell.value = if value_backed && present.is_empty() {
                    None
                } else {
                    Some(func.apply(&present))
                };

                let tags = evaluator.evaluate_cell(cell, value_backed);
                if !tags.is_empty() {
                    cell.value = None;
                }
                *outcome.tags_mut(row, col) = tags;
                recomputed += 1;
            }
        }

        info!(recomputed, "margins recomputed from surviving contributors");
    }
}

/// Body cells feeding one margin cell. Column margins union their own
/// function's sub-column group only.
fn margin_members(
    table: &AggregatedTable,
    row: usize,
    col: usize,
    margin_row: bool,
    margin_col: bool,
) -> Vec<(usize, usize)> {
    let (rows, cols) = table.shape();
    let func = table.columns[col].func;
    let mut members = Vec::new();
    match (margin_row, margin_col) {
        (true, true) => {
            for r in (0..rows).filter(|&r| !table.is_margin_row(r)) {
                for c in (0..cols).filter(|&c| !table.is_margin_col(c)) {
                    if table.columns[c].func == func {
                        members.push((r, c));
                    }
                }
            }
        }
        (false, true) => {
            for c in (0..cols).filter(|&c| !table.is_margin_col(c)) {
                if table.columns[c].func == func {
                    members.push((row, c));
                }
            }
        }
        (true, false) => {
            for r in (0..rows).filter(|&r| !table.is_margin_row(r)) {
                members.push((r, col));
            }
        }
        (false, false) => {}
    }
    members
}

/// Replace the value of every non-ok cell with the missing marker.
fn redact(table: &mut AggregatedTable, outcome: &OutcomeGrid) {
    let mut suppressed = 0usize;
    for (row, col, tags) in outcome.iter_cells() {
        if !tags.is_empty() {
            table.cells[row][col].value = None;
            suppressed += 1;
        }
    }
    debug!(suppressed, "cells redacted");
}

/// Drop non-margin rows/columns whose every body cell was redacted,
/// the way a re-rendering aggregation collaborator silently would.
fn drop_redacted_members(table: &mut AggregatedTable) {
    let body_cols: Vec<usize> = (0..table.columns.len())
        .filter(|&c| !table.is_margin_col(c))
        .collect();
    let mut row = 0;
    while row < table.row_labels.len() {
        let dead = !table.is_margin_row(row)
            && !body_cols.is_empty()
            && body_cols.iter().all(|&c| table.cells[row][c].value.is_none());
        if dead {
            debug!(labels = ?table.row_labels[row], "dropping fully-redacted row");
            table.row_labels.remove(row);
            table.cells.remove(row);
        } else {
            row += 1;
        }
    }

    let body_rows: Vec<usize> = (0..table.row_labels.len())
        .filter(|&r| !table.is_margin_row(r))
        .collect();
    let mut col = 0;
    while col < table.columns.len() {
        let dead = !table.is_margin_col(col)
            && !body_rows.is_empty()
            && body_rows.iter().all(|&r| table.cells[r][col].value.is_none());
        if dead {
            debug!(column = %table.columns[col].name(), "dropping fully-redacted column");
            table.columns.remove(col);
            for cells in &mut table.cells {
                cells.remove(col);
            }
        } else {
            col += 1;
        }
    }
}

/// Detect axis members the collaborator dropped by comparing label
/// sets, and drop the matching outcome rows/columns to restore
/// alignment.
pub fn reconcile(
    table: &AggregatedTable,
    outcome: &mut OutcomeGrid,
    prior_rows: &[Vec<String>],
    prior_columns: &[Column],
) {
    for (idx, labels) in prior_rows.iter().enumerate().rev() {
        if !table.row_labels.contains(labels) {
            debug!(?labels, "row dropped by collaborator");
            outcome.drop_row(idx);
        }
    }
    for (idx, column) in prior_columns.iter().enumerate().rev() {
        if !table.columns.contains(column) {
            debug!(column = %column.name(), "column dropped by collaborator");
            outcome.drop_col(idx);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RuleTag;
    use crate::table::Cell;

    fn cell(contributors: &[f64]) -> Cell {
        let contributors: Vec<Option<f64>> = contributors.iter().map(|v| Some(*v)).collect();
        let present: Vec<f64> = contributors.iter().filter_map(|v| *v).collect();
        Cell::new(AggFunc::Sum.apply(&present), contributors)
    }

    fn lenient_policy() -> Policy {
        // only the threshold rule bites, at 3 contributors
        Policy {
            safe_threshold: 3,
            safe_nk_k: 1.1,
            safe_pratio_p: 1.1,
            zeros_are_disclosive: false,
            ..Policy::default()
        }
    }

    fn two_by_two(margins: bool) -> AggregatedTable {
        // row "a" is entirely below threshold; b/x is safe
        let mut table = AggregatedTable {
            row_labels: vec![vec!["a".into()], vec!["b".into()]],
            columns: vec![
                Column {
                    func: Some(AggFunc::Sum),
                    labels: vec!["x".into()],
                },
                Column {
                    func: Some(AggFunc::Sum),
                    labels: vec!["y".into()],
                },
            ],
            cells: vec![
                vec![cell(&[1.0]), cell(&[2.0])],
                vec![cell(&[5.0, 6.0, 7.0]), cell(&[3.0, 4.0])],
            ],
            margins_label: None,
            value_backed: true,
        };
        if margins {
            table.margins_label = Some("All".to_string());
            // hand-built margins over the full data
            table.columns.push(Column {
                func: Some(AggFunc::Sum),
                labels: vec!["All".into()],
            });
            table.cells[0].push(cell(&[1.0, 2.0]));
            table.cells[1].push(cell(&[5.0, 6.0, 7.0, 3.0, 4.0]));
            table.row_labels.push(vec!["All".into()]);
            table.cells.push(vec![
                cell(&[1.0, 5.0, 6.0, 7.0]),
                cell(&[2.0, 3.0, 4.0]),
                cell(&[1.0, 2.0, 5.0, 6.0, 7.0, 3.0, 4.0]),
            ]);
        }
        table
    }

    #[test]
    fn test_redaction_keeps_shapes_aligned() {
        let policy = lenient_policy();
        let mut table = two_by_two(false);
        let mut outcome = RuleEvaluator::new(&policy).evaluate(&table);

        SuppressionEngine::new(&policy)
            .suppress_and_align(&mut table, &mut outcome)
            .unwrap();

        assert_eq!(table.shape(), outcome.shape());
        // row "a" became entirely missing and was dropped from both
        // grids; column "y" (a/y and b/y both redacted) went with it
        assert_eq!(table.row_labels, vec![vec!["b".to_string()]]);
        assert_eq!(table.columns[0].labels, vec!["x".to_string()]);
        assert_eq!(outcome.shape(), (1, 1));
        // b/x survives untouched
        assert_eq!(table.cells[0][0].value, Some(18.0));
    }

    #[test]
    fn test_fully_unsafe_table_suppresses_to_empty() {
        let policy = lenient_policy();
        // every cell is below threshold, so every row is dropped; the
        // grids must still agree on the remaining column count
        let mut table = AggregatedTable {
            row_labels: vec![vec!["a".into()]],
            columns: vec![Column {
                func: Some(AggFunc::Sum),
                labels: vec!["x".into()],
            }],
            cells: vec![vec![cell(&[1.0])]],
            margins_label: None,
            value_backed: true,
        };
        let mut outcome = RuleEvaluator::new(&policy).evaluate(&table);

        SuppressionEngine::new(&policy)
            .suppress_and_align(&mut table, &mut outcome)
            .unwrap();

        assert_eq!(table.shape(), outcome.shape());
        assert_eq!(table.shape().0, 0);
        // renders as a header-only table
        assert_eq!(table.to_csv().lines().count(), 1);
    }

    #[test]
    fn test_margins_recomputed_from_survivors() {
        let policy = lenient_policy();
        let mut table = two_by_two(true);
        let mut outcome = RuleEvaluator::new(&policy).evaluate(&table);

        SuppressionEngine::new(&policy)
            .suppress_and_align(&mut table, &mut outcome)
            .unwrap();

        assert_eq!(table.shape(), outcome.shape());
        // row "a" and column "y" dropped; margins now cover survivors
        assert_eq!(
            table.row_labels,
            vec![vec!["b".to_string()], vec!["All".to_string()]]
        );
        assert_eq!(table.shape(), (2, 2));
        // b row margin: only b/x survived (b/y suppressed) => 18
        assert_eq!(table.cells[0][1].value, Some(18.0));
        // column margin for x: only b/x => 18
        assert_eq!(table.cells[1][0].value, Some(18.0));
        // grand total = union of surviving body cells
        assert_eq!(table.cells[1][1].value, Some(18.0));
    }

    #[test]
    fn test_recomputed_margin_can_newly_trigger() {
        let policy = lenient_policy();
        // margin is safe over the full data (4 contributors) but falls
        // below threshold once the suppressed cell is excluded
        let mut table = AggregatedTable {
            row_labels: vec![vec!["a".into()], vec!["All".into()]],
            columns: vec![Column {
                func: Some(AggFunc::Sum),
                labels: vec!["x".into()],
            }],
            cells: vec![
                vec![cell(&[1.0, 2.0])],
                vec![cell(&[1.0, 2.0, 9.0, 9.0])],
            ],
            margins_label: Some("All".to_string()),
            value_backed: true,
        };
        // second body row's contributors feed only the margin here, so
        // craft the outcome directly: body cell a/x triggered
        let mut outcome = OutcomeGrid::new(2, 1);
        outcome.tags_mut(0, 0).insert(RuleTag::Threshold);

        SuppressionEngine::new(&policy)
            .suppress_and_align(&mut table, &mut outcome)
            .unwrap();

        // a/x dropped, margin recomputed over zero survivors and
        // re-triggered, so it reads as missing
        assert_eq!(table.shape(), outcome.shape());
        let (rows, _) = table.shape();
        assert_eq!(rows, 1);
        assert_eq!(table.cells[0][0].value, None);
        assert!(!outcome.is_ok(0, 0));
    }

    #[test]
    fn test_reconcile_detects_collaborator_drop() {
        let policy = lenient_policy();
        let full = two_by_two(false);
        let mut outcome = RuleEvaluator::new(&policy).evaluate(&full);

        // collaborator re-rendered without row "a"
        let mut reshaped = full.clone();
        reshaped.row_labels.remove(0);
        reshaped.cells.remove(0);

        reconcile(
            &reshaped,
            &mut outcome,
            &full.row_labels,
            &full.columns,
        );
        assert_eq!(outcome.shape(), reshaped.shape());
    }
}
