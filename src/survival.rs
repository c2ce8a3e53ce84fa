use tracing::debug;

use crate::config::Policy;
use crate::models::RuleTag;
use crate::table::{AggregatedTable, Cell, Column, OutcomeGrid};

/// A survival-function estimate, one entry per event time
#[derive(Debug, Clone)]
pub struct SurvivalTable {
    pub time: Vec<f64>,
    pub surv_prob: Vec<f64>,
    pub surv_prob_se: Vec<f64>,
    pub num_at_risk: Vec<f64>,
    pub num_events: Vec<f64>,
}

impl SurvivalTable {
    pub fn len(&self) -> usize {
        self.time.len()
    }

    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }

    /// At-risk decrement since the previous interval (deaths plus
    /// censorings). The first interval has none.
    fn decrements(&self) -> Vec<Option<f64>> {
        (0..self.len())
            .map(|i| {
                if i == 0 {
                    None
                } else {
                    Some(self.num_at_risk[i - 1] - self.num_at_risk[i])
                }
            })
            .collect()
    }

    /// Flag every interval whose at-risk decrement is below the
    /// survival threshold: too few leavers identifies individuals.
    pub fn check(&self, policy: &Policy) -> OutcomeGrid {
        let mut outcome = OutcomeGrid::new(self.len(), 4);
        for (row, decrement) in self.decrements().into_iter().enumerate() {
            let unsafe_interval = match decrement {
                Some(d) => d < policy.survival_safe_threshold as f64,
                None => false,
            };
            if unsafe_interval {
                debug!(row, "survival interval below threshold");
                for col in 0..4 {
                    outcome.tags_mut(row, col).insert(RuleTag::Threshold);
                }
            }
        }
        outcome
    }

    /// Render as a displayable table, one row per interval.
    pub fn to_table(&self) -> AggregatedTable {
        let names = ["Surv prob", "Surv prob SE", "num at risk", "num events"];
        let columns = names
            .iter()
            .map(|name| Column {
                func: None,
                labels: vec![name.to_string()],
            })
            .collect();
        let cells = (0..self.len())
            .map(|i| {
                vec![
                    Cell::new(self.surv_prob[i], Vec::new()),
                    Cell::new(self.surv_prob_se[i], Vec::new()),
                    Cell::new(self.num_at_risk[i], Vec::new()),
                    Cell::new(self.num_events[i], Vec::new()),
                ]
            })
            .collect();
        AggregatedTable {
            row_labels: self.time.iter().map(|t| vec![format!("{}", t)]).collect(),
            columns,
            cells,
            margins_label: None,
            value_backed: false,
        }
    }

    /// Pool intervals until each pooled decrement reaches the
    /// threshold, recomputing survival probabilities over the pooled
    /// counts. Safe to display even when the raw table is not.
    pub fn rounded(&self, policy: &Policy) -> SurvivalTable {
        let threshold = policy.survival_safe_threshold as f64;
        let decrements = self.decrements();

        let mut at_risk: Vec<f64> = Vec::with_capacity(self.len());
        let mut events: Vec<f64> = Vec::with_capacity(self.len());
        let mut pooled_leavers = 0.0;
        let mut pooled_events = 0.0;

        for i in 0..self.len() {
            if i == 0 {
                at_risk.push(self.num_at_risk[0]);
                events.push(self.num_events[0]);
                continue;
            }
            pooled_leavers += decrements[i].unwrap_or(0.0);
            pooled_events += self.num_events[i];
            if pooled_leavers < threshold {
                at_risk.push(at_risk[i - 1]);
                events.push(0.0);
            } else {
                at_risk.push(self.num_at_risk[i]);
                events.push(pooled_events);
                pooled_leavers = 0.0;
                pooled_events = 0.0;
            }
        }

        let mut surv_prob: Vec<f64> = Vec::with_capacity(self.len());
        for i in 0..self.len() {
            if i == 0 {
                surv_prob.push(self.surv_prob[0]);
                continue;
            }
            let prob = if at_risk[i] > 0.0 {
                (at_risk[i] - events[i]) / at_risk[i] * surv_prob[i - 1]
            } else {
                0.0
            };
            surv_prob.push(prob);
        }

        SurvivalTable {
            time: self.time.clone(),
            surv_prob,
            surv_prob_se: self.surv_prob_se.clone(),
            num_at_risk: at_risk,
            num_events: events,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SurvivalTable {
        SurvivalTable {
            time: vec![1.0, 2.0, 3.0],
            surv_prob: vec![0.95, 0.90, 0.85],
            surv_prob_se: vec![0.01, 0.02, 0.03],
            num_at_risk: vec![100.0, 80.0, 75.0],
            num_events: vec![5.0, 4.0, 3.0],
        }
    }

    #[test]
    fn test_check_flags_small_decrements() {
        let policy = Policy::default(); // survival threshold 10
        let outcome = sample().check(&policy);

        // first interval has no decrement, second drops by 20 (safe),
        // third drops by 5 (unsafe)
        assert!(outcome.is_ok(0, 0));
        assert!(outcome.is_ok(1, 0));
        assert!(!outcome.is_ok(2, 0));
        assert!(!outcome.is_ok(2, 3));
    }

    #[test]
    fn test_to_table_shape() {
        let table = sample().to_table();
        assert_eq!(table.shape(), (3, 4));
        assert_eq!(table.row_labels[0], vec!["1".to_string()]);
        assert_eq!(table.cells[1][2].value, Some(80.0));
    }

    #[test]
    fn test_rounded_pools_small_intervals() {
        let policy = Policy::default();
        let rounded = sample().rounded(&policy);

        // third interval's decrement (5) is pooled, so its at-risk
        // count repeats the previous interval and no events show
        assert_eq!(rounded.num_at_risk, vec![100.0, 80.0, 80.0]);
        assert_eq!(rounded.num_events[2], 0.0);
        // survival probability recomputed from pooled counts
        assert!((rounded.surv_prob[1] - (76.0 / 80.0) * 0.95).abs() < 1e-12);
    }
}
