use std::collections::BTreeMap;

use tracing::{debug, info};

use crate::data::{DataValue, Dataset};
use crate::table::{AggFunc, AggregatedTable, Cell, Column, EngineError, GroupSpec};

/// A tabulation request resolved at the adapter boundary
#[derive(Debug, Clone)]
pub struct TableQuery {
    pub index: GroupSpec,
    pub columns: GroupSpec,
    /// Column whose values are aggregated; `None` yields a frequency
    /// table.
    pub values: Option<String>,
    /// Requested aggregation functions; one sub-column group each.
    pub funcs: Vec<AggFunc>,
    pub margins: bool,
    pub margins_label: String,
}

impl TableQuery {
    /// Frequency crosstab of `index` by `columns`.
    pub fn frequency(index: GroupSpec, columns: GroupSpec) -> Self {
        Self {
            index,
            columns,
            values: None,
            funcs: Vec::new(),
            margins: false,
            margins_label: "All".to_string(),
        }
    }

    /// Aggregate `values` with `funcs`, grouped by `index` x `columns`.
    pub fn aggregated(
        index: GroupSpec,
        columns: GroupSpec,
        values: impl Into<String>,
        funcs: Vec<AggFunc>,
    ) -> Self {
        Self {
            index,
            columns,
            values: Some(values.into()),
            funcs,
            margins: false,
            margins_label: "All".to_string(),
        }
    }

    pub fn with_margins(mut self) -> Self {
        self.margins = true;
        self
    }

    /// Command text recorded in the ledger, e.g.
    /// `crosstab region x sex values=income funcs=mean aggregated`.
    pub fn describe(&self) -> String {
        let mut parts = vec!["crosstab".to_string()];
        if !self.index.is_none() {
            parts.push(self.index.columns().join(","));
        }
        if !self.columns.is_none() {
            parts.push("x".to_string());
            parts.push(self.columns.columns().join(","));
        }
        match &self.values {
            Some(values) => {
                parts.push(format!("values={}", values));
                let funcs: Vec<&str> = self.funcs.iter().map(AggFunc::as_str).collect();
                parts.push(format!("funcs={}", funcs.join(",")));
            }
            None => parts.push("freq".to_string()),
        }
        if self.margins {
            parts.push("margins".to_string());
        }
        parts.join(" ")
    }
}

/// External tabulation collaborator.
///
/// Implementations must return, for every output cell, both the
/// displayed value and the raw contributing values; the disclosure
/// rules score the contributor distribution, not the aggregate.
pub trait Aggregator {
    fn tabulate(&self, data: &Dataset, query: &TableQuery) -> Result<AggregatedTable, EngineError>;
}

/// Reference in-crate aggregator used by tests and the CLI
#[derive(Debug, Clone, Copy, Default)]
pub struct SimpleAggregator;

impl Aggregator for SimpleAggregator {
    fn tabulate(&self, data: &Dataset, query: &TableQuery) -> Result<AggregatedTable, EngineError> {
        debug!(?query, "tabulate()");

        let index_cols = resolve_axis(data, &query.index)?;
        let column_cols = resolve_axis(data, &query.columns)?;
        if index_cols.is_empty() && column_cols.is_empty() {
            return Err(EngineError::EmptyGrouping);
        }

        let funcs: Vec<AggFunc> = if query.values.is_some() {
            if query.funcs.is_empty() {
                return Err(EngineError::ValuesRequired);
            }
            query.funcs.clone()
        } else {
            if !query.funcs.is_empty() {
                return Err(EngineError::ValuesRequired);
            }
            vec![AggFunc::Count]
        };
        let value_backed = query.values.is_some();

        let value_col: Option<&[DataValue]> = match &query.values {
            Some(name) => Some(
                data.column(name)
                    .ok_or_else(|| EngineError::UnknownColumn(name.clone()))?,
            ),
            None => None,
        };

        // group contributors by (row labels, column labels)
        let mut groups: BTreeMap<(Vec<String>, Vec<String>), Vec<Option<f64>>> = BTreeMap::new();
        for record in 0..data.len() {
            let row_key: Vec<String> = index_cols.iter().map(|c| c[record].label()).collect();
            let col_key: Vec<String> = column_cols.iter().map(|c| c[record].label()).collect();
            // text or missing in the values column is a missing
            // contributor
            let contribution = match value_col {
                Some(col) => col[record].as_number(),
                None => Some(1.0),
            };
            groups
                .entry((row_key, col_key))
                .or_default()
                .push(contribution);
        }

        let mut row_keys: Vec<Vec<String>> = Vec::new();
        let mut col_keys: Vec<Vec<String>> = Vec::new();
        for (row_key, col_key) in groups.keys() {
            if !row_keys.contains(row_key) {
                row_keys.push(row_key.clone());
            }
            if !col_keys.contains(col_key) {
                col_keys.push(col_key.clone());
            }
        }
        row_keys.sort();
        col_keys.sort();

        let mut table = build_grid(&row_keys, &col_keys, &groups, &funcs, value_backed);
        if query.margins {
            add_margins(&mut table, &query.margins_label, index_cols.len());
        }

        info!(
            rows = table.row_labels.len(),
            cols = table.columns.len(),
            value_backed,
            "tabulation complete"
        );

        Ok(table)
    }
}

fn resolve_axis<'a>(
    data: &'a Dataset,
    spec: &GroupSpec,
) -> Result<Vec<&'a [DataValue]>, EngineError> {
    spec.columns()
        .into_iter()
        .map(|name| {
            data.column(name)
                .ok_or_else(|| EngineError::UnknownColumn(name.to_string()))
        })
        .collect()
}

fn build_grid(
    row_keys: &[Vec<String>],
    col_keys: &[Vec<String>],
    groups: &BTreeMap<(Vec<String>, Vec<String>), Vec<Option<f64>>>,
    funcs: &[AggFunc],
    value_backed: bool,
) -> AggregatedTable {
    let mut columns: Vec<Column> = Vec::new();
    for func in funcs {
        for col_key in col_keys {
            columns.push(Column {
                func: Some(*func),
                labels: col_key.clone(),
            });
        }
    }

    let mut cells: Vec<Vec<Cell>> = Vec::with_capacity(row_keys.len());
    for row_key in row_keys {
        let mut row: Vec<Cell> = Vec::with_capacity(columns.len());
        for func in funcs {
            for col_key in col_keys {
                let contributors = groups
                    .get(&(row_key.clone(), col_key.clone()))
                    .cloned()
                    .unwrap_or_default();
                row.push(make_cell(*func, contributors, value_backed));
            }
        }
        cells.push(row);
    }

    AggregatedTable {
        row_labels: row_keys.to_vec(),
        columns,
        cells,
        margins_label: None,
        value_backed,
    }
}

fn make_cell(func: AggFunc, contributors: Vec<Option<f64>>, value_backed: bool) -> Cell {
    let present: Vec<f64> = contributors.iter().filter_map(|v| *v).collect();
    let value = if value_backed && present.is_empty() {
        None
    } else {
        Some(func.apply(&present))
    };
    Cell {
        value,
        contributors,
    }
}

/// Append a margin row and, per sub-column group, a margin column.
/// Margin contributors are the concatenation of their members'.
fn add_margins(table: &mut AggregatedTable, label: &str, row_levels: usize) {
    let value_backed = table.value_backed;
    let old_columns = std::mem::take(&mut table.columns);
    let old_cells = std::mem::take(&mut table.cells);

    // contiguous runs of columns sharing one function form a group
    let mut groups: Vec<(AggFunc, Vec<usize>)> = Vec::new();
    for (idx, column) in old_columns.iter().enumerate() {
        let func = column.func.unwrap_or(AggFunc::Count);
        match groups.last_mut() {
            Some((last, idxs)) if *last == func => idxs.push(idx),
            _ => groups.push((func, vec![idx])),
        }
    }

    let col_levels = old_columns
        .first()
        .map_or(1, |column| column.labels.len().max(1));
    let mut margin_col_labels = vec![label.to_string()];
    margin_col_labels.resize(col_levels, String::new());

    // each group gets a trailing margin column
    let mut new_columns: Vec<Column> = Vec::new();
    for (func, idxs) in &groups {
        for &idx in idxs {
            new_columns.push(old_columns[idx].clone());
        }
        new_columns.push(Column {
            func: Some(*func),
            labels: margin_col_labels.clone(),
        });
    }

    let mut new_cells: Vec<Vec<Cell>> = Vec::with_capacity(old_cells.len() + 1);
    for row in &old_cells {
        let mut new_row: Vec<Cell> = Vec::with_capacity(new_columns.len());
        for (func, idxs) in &groups {
            let mut union: Vec<Option<f64>> = Vec::new();
            for &idx in idxs {
                new_row.push(row[idx].clone());
                union.extend(row[idx].contributors.iter().cloned());
            }
            new_row.push(make_cell(*func, union, value_backed));
        }
        new_cells.push(new_row);
    }

    // margin row: column-wise union over all data rows
    let mut margin_row_labels = vec![label.to_string()];
    margin_row_labels.resize(row_levels.max(1), String::new());
    let mut margin_row: Vec<Cell> = Vec::with_capacity(new_columns.len());
    for (col, column) in new_columns.iter().enumerate() {
        let func = column.func.unwrap_or(AggFunc::Count);
        let mut union: Vec<Option<f64>> = Vec::new();
        for row in &new_cells {
            union.extend(row[col].contributors.iter().cloned());
        }
        margin_row.push(make_cell(func, union, value_backed));
    }
    new_cells.push(margin_row);
    table.row_labels.push(margin_row_labels);

    table.columns = new_columns;
    table.cells = new_cells;
    table.margins_label = Some(label.to_string());

    debug!(
        rows = table.row_labels.len(),
        cols = table.columns.len(),
        "margins added"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::DataValue;

    fn sample_data() -> Dataset {
        let mut data = Dataset::new();
        let regions = ["north", "north", "south", "south", "south"];
        let sexes = ["f", "m", "f", "m", "m"];
        let incomes = [100.0, 200.0, 50.0, 60.0, 70.0];
        data.push_column(
            "region",
            regions
                .iter()
                .map(|r| DataValue::Text(r.to_string()))
                .collect(),
        );
        data.push_column(
            "sex",
            sexes.iter().map(|s| DataValue::Text(s.to_string())).collect(),
        );
        data.push_column(
            "income",
            incomes.iter().map(|v| DataValue::Number(*v)).collect(),
        );
        data
    }

    #[test]
    fn test_frequency_crosstab() {
        let data = sample_data();
        let query = TableQuery::frequency(
            GroupSpec::Single("region".to_string()),
            GroupSpec::Single("sex".to_string()),
        );
        let table = SimpleAggregator.tabulate(&data, &query).unwrap();

        assert_eq!(table.shape(), (2, 2));
        assert!(!table.value_backed);
        assert_eq!(table.row_labels, vec![vec!["north"], vec!["south"]]);
        // north/f = 1, south/m = 2
        assert_eq!(table.cells[0][0].value, Some(1.0));
        assert_eq!(table.cells[1][1].value, Some(2.0));
    }

    #[test]
    fn test_aggregated_table_with_contributors() {
        let data = sample_data();
        let query = TableQuery::aggregated(
            GroupSpec::Single("region".to_string()),
            GroupSpec::Single("sex".to_string()),
            "income",
            vec![AggFunc::Mean],
        );
        let table = SimpleAggregator.tabulate(&data, &query).unwrap();

        assert!(table.value_backed);
        // south/m mean of 60, 70
        assert_eq!(table.cells[1][1].value, Some(65.0));
        assert_eq!(table.cells[1][1].contributors, vec![Some(60.0), Some(70.0)]);
    }

    #[test]
    fn test_multi_func_sub_columns() {
        let data = sample_data();
        let query = TableQuery::aggregated(
            GroupSpec::Single("region".to_string()),
            GroupSpec::Single("sex".to_string()),
            "income",
            vec![AggFunc::Mean, AggFunc::Sum],
        );
        let table = SimpleAggregator.tabulate(&data, &query).unwrap();

        assert_eq!(table.columns.len(), 4);
        assert_eq!(table.columns[0].func, Some(AggFunc::Mean));
        assert_eq!(table.columns[2].func, Some(AggFunc::Sum));
        // same contributor set behind each function's sub-column
        assert_eq!(
            table.cells[1][1].contributors,
            table.cells[1][3].contributors
        );
        assert_eq!(table.cells[1][3].value, Some(130.0));
    }

    #[test]
    fn test_margins() {
        let data = sample_data();
        let query = TableQuery::aggregated(
            GroupSpec::Single("region".to_string()),
            GroupSpec::Single("sex".to_string()),
            "income",
            vec![AggFunc::Sum],
        )
        .with_margins();
        let table = SimpleAggregator.tabulate(&data, &query).unwrap();

        assert_eq!(table.shape(), (3, 3));
        assert!(table.is_margin_row(2));
        assert!(table.is_margin_col(2));
        // row margin for north: 100 + 200
        assert_eq!(table.cells[0][2].value, Some(300.0));
        // column margin for f: 100 + 50
        assert_eq!(table.cells[2][0].value, Some(150.0));
        // grand total
        assert_eq!(table.cells[2][2].value, Some(480.0));
        assert_eq!(table.cells[2][2].contributors.len(), 5);
    }

    #[test]
    fn test_missing_contributors_captured() {
        let mut data = Dataset::new();
        data.push_column(
            "group",
            vec![
                DataValue::Text("a".to_string()),
                DataValue::Text("a".to_string()),
            ],
        );
        data.push_column("v", vec![DataValue::Number(5.0), DataValue::Missing]);
        let query = TableQuery::aggregated(
            GroupSpec::Single("group".to_string()),
            GroupSpec::None,
            "v",
            vec![AggFunc::Sum],
        );
        let table = SimpleAggregator.tabulate(&data, &query).unwrap();
        assert_eq!(table.cells[0][0].contributors, vec![Some(5.0), None]);
        assert_eq!(table.cells[0][0].value, Some(5.0));
    }

    #[test]
    fn test_input_errors() {
        let data = sample_data();

        let query = TableQuery::frequency(
            GroupSpec::Single("area".to_string()),
            GroupSpec::None,
        );
        assert!(matches!(
            SimpleAggregator.tabulate(&data, &query),
            Err(EngineError::UnknownColumn(_))
        ));

        let query = TableQuery::frequency(GroupSpec::None, GroupSpec::None);
        assert!(matches!(
            SimpleAggregator.tabulate(&data, &query),
            Err(EngineError::EmptyGrouping)
        ));

        let mut query = TableQuery::frequency(
            GroupSpec::Single("region".to_string()),
            GroupSpec::None,
        );
        query.funcs.push(AggFunc::Mean); // funcs without values column
        assert!(matches!(
            SimpleAggregator.tabulate(&data, &query),
            Err(EngineError::ValuesRequired)
        ));
    }
}
