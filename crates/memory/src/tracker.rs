//! Cumulative token usage and cost tracking.
//!
//! Totals are monotonically non-decreasing across a session's lifetime;
//! cost is accumulated per recorded call at that call's model rate.

use crate::pricing::PricingTable;

/// Tracks token usage and dollar cost across a session.
pub struct UsageTracker {
    pricing: PricingTable,
    total_input_tokens: u64,
    total_output_tokens: u64,
    total_cost_usd: f64,
    compression_savings: u64,
    compression_cost: u64,
}

impl UsageTracker {
    pub fn new() -> Self {
        Self {
            pricing: PricingTable::with_defaults(),
            total_input_tokens: 0,
            total_output_tokens: 0,
            total_cost_usd: 0.0,
            compression_savings: 0,
            compression_cost: 0,
        }
    }

    /// Record usage from one LLM response.
    pub fn record(&mut self, input_tokens: u64, output_tokens: u64, model: &str) {
        self.total_input_tokens += input_tokens;
        self.total_output_tokens += output_tokens;
        self.total_cost_usd += self
            .pricing
            .compute_cost(model, input_tokens, output_tokens);
    }

    /// Record tokens saved by a compression pass.
    pub fn add_compression_savings(&mut self, saved: u64) {
        self.compression_savings += saved;
    }

    /// Record tokens spent producing a summary.
    pub fn add_compression_cost(&mut self, cost: u64) {
        self.compression_cost += cost;
    }

    pub fn total_input_tokens(&self) -> u64 {
        self.total_input_tokens
    }

    pub fn total_output_tokens(&self) -> u64 {
        self.total_output_tokens
    }

    pub fn total_cost_usd(&self) -> f64 {
        self.total_cost_usd
    }

    pub fn compression_savings(&self) -> u64 {
        self.compression_savings
    }

    pub fn compression_cost(&self) -> u64 {
        self.compression_cost
    }

    /// Net tokens saved after the summaries' own cost.
    pub fn net_savings(&self) -> i64 {
        self.compression_savings as i64 - self.compression_cost as i64
    }

    /// Restore totals from a persisted session (resume path).
    pub fn restore(&mut self, input_tokens: u64, output_tokens: u64, cost_usd: f64) {
        self.total_input_tokens = input_tokens;
        self.total_output_tokens = output_tokens;
        self.total_cost_usd = cost_usd;
    }

    /// Clear all counters.
    pub fn reset(&mut self) {
        self.total_input_tokens = 0;
        self.total_output_tokens = 0;
        self.total_cost_usd = 0.0;
        self.compression_savings = 0;
        self.compression_cost = 0;
    }
}

impl Default for UsageTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn totals_accumulate_monotonically() {
        let mut tracker = UsageTracker::new();
        tracker.record(100, 50, "openai/gpt-4o");
        tracker.record(200, 80, "openai/gpt-4o");
        assert_eq!(tracker.total_input_tokens(), 300);
        assert_eq!(tracker.total_output_tokens(), 130);
        assert!(tracker.total_cost_usd() > 0.0);
    }

    #[test]
    fn cost_uses_model_rate() {
        let mut tracker = UsageTracker::new();
        tracker.record(1_000_000, 0, "openai/gpt-4o");
        assert!((tracker.total_cost_usd() - 2.5).abs() < 1e-10);
    }

    #[test]
    fn net_savings_subtracts_summary_cost() {
        let mut tracker = UsageTracker::new();
        tracker.add_compression_savings(5000);
        tracker.add_compression_cost(1200);
        assert_eq!(tracker.net_savings(), 3800);
    }

    #[test]
    fn reset_zeroes_everything() {
        let mut tracker = UsageTracker::new();
        tracker.record(10, 10, "m");
        tracker.add_compression_savings(5);
        tracker.reset();
        assert_eq!(tracker.total_input_tokens(), 0);
        assert_eq!(tracker.compression_savings(), 0);
        assert_eq!(tracker.total_cost_usd(), 0.0);
    }
}
