//! Engine configuration.

use crate::handlers::Handlers;

/// Per-token pricing used to compute exchange cost.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CostRates {
    /// USD per input token.
    pub input_rate: f64,
    /// USD per output token.
    pub output_rate: f64,
}

impl Default for CostRates {
    fn default() -> Self {
        Self {
            input_rate: 3e-6,
            output_rate: 15e-6,
        }
    }
}

impl CostRates {
    /// The cost of a completed exchange in USD.
    pub fn cost_usd(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        input_tokens as f64 * self.input_rate + output_tokens as f64 * self.output_rate
    }
}

/// Configuration for the engine.
#[derive(Default)]
pub struct EngineConfig {
    /// Per-token pricing for exchange metrics.
    pub cost: CostRates,

    /// Handler tables bound to the bus during `initialize()`.
    pub handlers: Vec<Handlers>,
}

impl EngineConfig {
    /// Create a configuration with default pricing and no handlers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the cost rates.
    #[must_use]
    pub fn with_cost(mut self, cost: CostRates) -> Self {
        self.cost = cost;
        self
    }

    /// Add a handler table to auto-bind at initialization.
    #[must_use]
    pub fn with_handlers(mut self, handlers: Handlers) -> Self {
        self.handlers.push(handlers);
        self
    }
}
