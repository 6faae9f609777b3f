//! Built-in pricing table for common LLM models.
//!
//! Prices are in USD per 1 million tokens. Lookup supports exact names,
//! provider-prefixed names, and version-suffixed names; models not in the
//! table fall back to a default rate so cost totals never silently read
//! zero.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Per-million-token pricing for a model.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ModelPricing {
    /// Price per 1M input tokens in USD.
    pub input_per_m: f64,
    /// Price per 1M output tokens in USD.
    pub output_per_m: f64,
}

impl ModelPricing {
    pub fn new(input_per_m: f64, output_per_m: f64) -> Self {
        Self {
            input_per_m,
            output_per_m,
        }
    }

    /// Compute cost for the given token counts.
    pub fn cost(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        (input_tokens as f64 * self.input_per_m + output_tokens as f64 * self.output_per_m)
            / 1_000_000.0
    }
}

/// Pricing table with built-in defaults and a fallback rate.
pub struct PricingTable {
    prices: HashMap<String, ModelPricing>,
    fallback: ModelPricing,
}

impl PricingTable {
    /// Create a pricing table with built-in model prices.
    pub fn with_defaults() -> Self {
        let mut prices = HashMap::new();

        // ── Anthropic ──────────────────────────────────────────────
        prices.insert(
            "anthropic/claude-sonnet-4".into(),
            ModelPricing::new(3.0, 15.0),
        );
        prices.insert(
            "anthropic/claude-opus-4".into(),
            ModelPricing::new(15.0, 75.0),
        );
        prices.insert(
            "anthropic/claude-3.5-sonnet".into(),
            ModelPricing::new(3.0, 15.0),
        );
        prices.insert(
            "anthropic/claude-3.5-haiku".into(),
            ModelPricing::new(0.8, 4.0),
        );

        // ── OpenAI ─────────────────────────────────────────────────
        prices.insert("openai/gpt-4o".into(), ModelPricing::new(2.5, 10.0));
        prices.insert("openai/gpt-4o-mini".into(), ModelPricing::new(0.15, 0.6));
        prices.insert("openai/o1".into(), ModelPricing::new(15.0, 60.0));
        prices.insert("openai/o3-mini".into(), ModelPricing::new(1.1, 4.4));

        // ── Google ─────────────────────────────────────────────────
        prices.insert(
            "google/gemini-2.0-flash".into(),
            ModelPricing::new(0.1, 0.4),
        );
        prices.insert("google/gemini-1.5-pro".into(), ModelPricing::new(1.25, 5.0));

        // ── DeepSeek ───────────────────────────────────────────────
        prices.insert("deepseek/deepseek-v3".into(), ModelPricing::new(0.27, 1.1));
        prices.insert("deepseek/deepseek-r1".into(), ModelPricing::new(0.55, 2.19));

        Self {
            prices,
            // Unknown models are billed at a mid-range default rate.
            fallback: ModelPricing::new(0.55, 2.19),
        }
    }

    /// Look up pricing for a model, applying flexible matching:
    /// exact → provider-prefixed → longest bare-name prefix → fallback.
    pub fn lookup(&self, model: &str) -> ModelPricing {
        if let Some(p) = self.prices.get(model) {
            return *p;
        }

        let prefixed = [
            format!("openai/{model}"),
            format!("anthropic/{model}"),
            format!("google/{model}"),
            format!("deepseek/{model}"),
        ];
        for name in &prefixed {
            if let Some(p) = self.prices.get(name.as_str()) {
                return *p;
            }
        }

        // Version-suffixed responses (e.g. "gpt-4o-mini-2024-07-18")
        // match the longest key whose bare name is a prefix.
        let model_lower = model.to_lowercase();
        let bare_model = model_lower.rsplit('/').next().unwrap_or(&model_lower);

        let mut best: Option<(usize, ModelPricing)> = None;
        for (key, pricing) in &self.prices {
            let bare_key = key.rsplit('/').next().unwrap_or(key);
            if bare_model.starts_with(&bare_key.to_lowercase())
                && best.map_or(true, |(len, _)| bare_key.len() > len)
            {
                best = Some((bare_key.len(), *pricing));
            }
        }

        best.map(|(_, p)| p).unwrap_or(self.fallback)
    }

    /// Compute cost for a model call.
    pub fn compute_cost(&self, model: &str, input_tokens: u64, output_tokens: u64) -> f64 {
        self.lookup(model).cost(input_tokens, output_tokens)
    }
}

impl Default for PricingTable {
    fn default() -> Self {
        Self::with_defaults()
    }
}
