//! Static model pricing for cost estimation
//!
//! Prices are USD per million tokens, `[input, output]`. Unknown models use
//! a conservative default so an unpriced model over-reports rather than
//! under-reports.

const PRICING: &[(&str, [f64; 2])] = &[
    ("deepseek-chat", [0.14, 0.28]),
    ("deepseek-reasoner", [0.55, 2.19]),
    ("gpt-4o", [2.50, 10.00]),
    ("gpt-4o-mini", [0.15, 0.60]),
    ("gpt-4.1", [2.00, 8.00]),
    ("gpt-4.1-mini", [0.40, 1.60]),
    ("gpt-4.1-nano", [0.10, 0.40]),
    ("o3-mini", [1.10, 4.40]),
    ("anthropic/claude-sonnet-4", [3.00, 15.00]),
    ("anthropic/claude-haiku-4.5", [0.80, 4.00]),
    ("google/gemini-2.5-flash-preview", [0.15, 0.60]),
    ("google/gemini-2.0-flash-001", [0.10, 0.40]),
    ("meta-llama/llama-4-maverick", [0.20, 0.60]),
    ("qwen/qwen3-235b-a22b", [0.20, 0.60]),
];

const DEFAULT_PRICES: [f64; 2] = [1.0, 3.0];

/// Estimate the cost in USD of one API call.
#[must_use]
pub fn estimate_cost(model: &str, input_tokens: i64, output_tokens: i64) -> f64 {
    let prices = PRICING
        .iter()
        .find(|(name, _)| *name == model)
        .map_or(DEFAULT_PRICES, |(_, p)| *p);
    (input_tokens as f64 * prices[0] + output_tokens as f64 * prices[1]) / 1_000_000.0
}
