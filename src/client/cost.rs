//! Pricing and cost estimates.

use serde::{Deserialize, Serialize};

use crate::config::Operation;

/// Billable usage of one call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// Prompt tokens.
    pub input_tokens: u64,
    /// Completion tokens.
    pub output_tokens: u64,
    /// Rows, keywords or pages billed.
    pub rows: u64,
}

impl Usage {
    /// Token usage.
    pub fn tokens(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
            rows: 0,
        }
    }

    /// Row usage.
    pub fn rows(rows: u64) -> Self {
        Self {
            rows,
            ..Self::default()
        }
    }

    /// Input plus output tokens.
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens.saturating_add(self.output_tokens)
    }
}

/// How a provider prices a call.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CostModel {
    /// Priced per million tokens.
    PerToken {
        /// USD per million input tokens.
        input_per_million: f64,
        /// USD per million output tokens.
        output_per_million: f64,
    },
    /// Priced per row with a fixed base charge per call.
    PerRow {
        /// USD per row.
        per_row: f64,
        /// USD per call.
        base: f64,
    },
    /// Flat price per call.
    PerRequest {
        /// USD per call.
        per_request: f64,
    },
}

/// One line of a cost breakdown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostLine {
    /// What is billed.
    pub label: String,
    /// Billed quantity.
    pub quantity: u64,
    /// USD per unit.
    pub unit_cost: f64,
    /// USD for the line.
    pub amount: f64,
}

impl CostLine {
    #[allow(clippy::cast_precision_loss)]
    fn new(label: &str, quantity: u64, unit_cost: f64) -> Self {
        Self {
            label: label.to_string(),
            quantity,
            unit_cost,
            amount: quantity as f64 * unit_cost,
        }
    }
}

impl CostModel {
    /// Cost of one call with `usage`.
    pub fn cost(&self, usage: &Usage) -> f64 {
        self.breakdown(usage, 1).iter().map(|line| line.amount).sum()
    }

    /// Itemized cost of `calls` calls totalling `usage`.
    pub fn breakdown(&self, usage: &Usage, calls: usize) -> Vec<CostLine> {
        let calls = u64::try_from(calls).unwrap_or(u64::MAX);
        match *self {
            CostModel::PerToken {
                input_per_million,
                output_per_million,
            } => vec![
                CostLine::new("input_tokens", usage.input_tokens, input_per_million / 1_000_000.0),
                CostLine::new("output_tokens", usage.output_tokens, output_per_million / 1_000_000.0),
            ],
            CostModel::PerRow { per_row, base } => {
                let mut lines = vec![CostLine::new("rows", usage.rows, per_row)];
                if base > 0.0 {
                    lines.push(CostLine::new("calls", calls, base));
                }
                lines
            }
            CostModel::PerRequest { per_request } => {
                vec![CostLine::new("calls", calls, per_request)]
            }
        }
    }
}

/// Expected cost of an operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostEstimate {
    /// Operation estimated.
    pub operation: Operation,
    /// Provider that would serve it.
    pub provider: String,
    /// Items to process.
    pub item_count: usize,
    /// Expected tokens, zero for non-LLM providers.
    pub estimated_tokens: u64,
    /// Expected USD.
    pub estimated_dollars: f64,
    /// Itemized cost.
    pub breakdown: Vec<CostLine>,
}

impl CostEstimate {
    pub(crate) fn new(
        operation: Operation,
        provider: &str,
        item_count: usize,
        model: &CostModel,
        usage: &Usage,
        calls: usize,
    ) -> Self {
        let breakdown = model.breakdown(usage, calls);
        Self {
            operation,
            provider: provider.to_string(),
            item_count,
            estimated_tokens: usage.total_tokens(),
            estimated_dollars: breakdown.iter().map(|line| line.amount).sum(),
            breakdown,
        }
    }
}
