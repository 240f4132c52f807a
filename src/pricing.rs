use serde::{Deserialize, Serialize};

/// Per-model cost rates, matched by substring against served model ids so
/// dated variants (`gpt-4o-2024-08-06`) hit their base entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelPricing {
    pub model_pattern: String,
    pub input_cost_per_million: f64,
    pub output_cost_per_million: f64,
}

impl ModelPricing {
    /// Cost in micro-dollars; integer math so accumulation never drifts.
    #[must_use]
    pub fn estimate_cost_micros(&self, input_tokens: u64, output_tokens: u64) -> i64 {
        let input_rate = micros_per_million(self.input_cost_per_million);
        let output_rate = micros_per_million(self.output_cost_per_million);

        let total = i128::from(input_tokens) * i128::from(input_rate) / 1_000_000
            + i128::from(output_tokens) * i128::from(output_rate) / 1_000_000;
        i64::try_from(total).unwrap_or(i64::MAX)
    }
}

fn micros_per_million(cost_per_million: f64) -> i64 {
    let scaled = (cost_per_million * 1_000_000.0).round();
    format!("{scaled:.0}").parse().unwrap_or_default()
}

#[must_use]
pub fn default_pricing() -> Vec<ModelPricing> {
    let entry = |pattern: &str, input: f64, output: f64| ModelPricing {
        model_pattern: pattern.into(),
        input_cost_per_million: input,
        output_cost_per_million: output,
    };

    vec![
        entry("gpt-4o-mini", 0.15, 0.6),
        entry("gpt-4o", 2.5, 10.0),
        entry("gpt-4.1-mini", 0.4, 1.6),
        entry("gpt-4.1", 2.0, 8.0),
        entry("o1-mini", 1.1, 4.4),
        entry("o1", 15.0, 60.0),
        entry("o3-mini", 1.1, 4.4),
        entry("o4-mini", 1.1, 4.4),
        entry("gemini-2.0-flash-lite", 0.075, 0.3),
        entry("gemini-2.0-flash", 0.1, 0.4),
        entry("gemini-1.5-pro", 1.25, 5.0),
        entry("gemini-2.5-pro", 1.25, 10.0),
        entry("claude-sonnet-4", 3.0, 15.0),
        entry("claude-3-5-sonnet", 3.0, 15.0),
        entry("claude-3-5-haiku", 0.8, 4.0),
    ]
}

#[must_use]
pub fn lookup_pricing<'a>(model: &str, table: &'a [ModelPricing]) -> Option<&'a ModelPricing> {
    table
        .iter()
        .find(|pricing| model.contains(&pricing.model_pattern))
}
