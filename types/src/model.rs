//! Model metadata and token/cost accounting.

use serde::{Deserialize, Serialize};

/// Static capabilities and pricing for a model.
///
/// Prices are dollars per million tokens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub context_window: u32,
    pub max_tokens: u32,
    pub supports_images: bool,
    pub input_price: f64,
    pub output_price: f64,
    #[serde(default)]
    pub cache_writes_price: f64,
    #[serde(default)]
    pub cache_reads_price: f64,
}

impl Default for ModelInfo {
    fn default() -> Self {
        Self {
            context_window: 128_000,
            max_tokens: 8_192,
            supports_images: false,
            input_price: 0.0,
            output_price: 0.0,
            cache_writes_price: 0.0,
            cache_reads_price: 0.0,
        }
    }
}

/// A model identifier plus its static info.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Model {
    pub id: String,
    pub info: ModelInfo,
}

/// Token usage reported by a provider for one request.
///
/// Cache fields stay `None` when the vendor does not report them
/// separately; cost math treats `None` as zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ApiUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub cache_read_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub cache_write_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub total_cost: Option<f64>,
}

impl ApiUsage {
    /// Total tokens counted against the context window.
    #[must_use]
    pub fn total_tokens(&self) -> u32 {
        self.input_tokens
            .saturating_add(self.output_tokens)
            .saturating_add(self.cache_read_tokens.unwrap_or(0))
            .saturating_add(self.cache_write_tokens.unwrap_or(0))
    }

    /// Merge another usage record into this one (summing token counts).
    pub fn accumulate(&mut self, other: &ApiUsage) {
        self.input_tokens = self.input_tokens.saturating_add(other.input_tokens);
        self.output_tokens = self.output_tokens.saturating_add(other.output_tokens);
        if other.cache_read_tokens.is_some() {
            self.cache_read_tokens = Some(
                self.cache_read_tokens
                    .unwrap_or(0)
                    .saturating_add(other.cache_read_tokens.unwrap_or(0)),
            );
        }
        if other.cache_write_tokens.is_some() {
            self.cache_write_tokens = Some(
                self.cache_write_tokens
                    .unwrap_or(0)
                    .saturating_add(other.cache_write_tokens.unwrap_or(0)),
            );
        }
        if other.total_cost.is_some() {
            self.total_cost =
                Some(self.total_cost.unwrap_or(0.0) + other.total_cost.unwrap_or(0.0));
        }
    }
}

/// Dollar cost of a request given a model's pricing.
///
/// Missing cache counts are treated as zero.
#[must_use]
pub fn calculate_api_cost(info: &ModelInfo, usage: &ApiUsage) -> f64 {
    let per_million = |tokens: u32, price: f64| f64::from(tokens) / 1_000_000.0 * price;
    per_million(usage.input_tokens, info.input_price)
        + per_million(usage.output_tokens, info.output_price)
        + per_million(usage.cache_write_tokens.unwrap_or(0), info.cache_writes_price)
        + per_million(usage.cache_read_tokens.unwrap_or(0), info.cache_reads_price)
}

#[cfg(test)]
mod tests {
    use super::{ApiUsage, ModelInfo, calculate_api_cost};

    fn info() -> ModelInfo {
        ModelInfo {
            context_window: 200_000,
            max_tokens: 8_192,
            supports_images: true,
            input_price: 3.0,
            output_price: 15.0,
            cache_writes_price: 3.75,
            cache_reads_price: 0.3,
        }
    }

    #[test]
    fn cost_treats_missing_cache_fields_as_zero() {
        let usage = ApiUsage {
            input_tokens: 1_000_000,
            output_tokens: 0,
            ..Default::default()
        };
        let cost = calculate_api_cost(&info(), &usage);
        assert!((cost - 3.0).abs() < 1e-9);
    }

    #[test]
    fn cost_includes_cache_tokens_when_present() {
        let usage = ApiUsage {
            input_tokens: 0,
            output_tokens: 0,
            cache_read_tokens: Some(1_000_000),
            cache_write_tokens: Some(1_000_000),
            total_cost: None,
        };
        let cost = calculate_api_cost(&info(), &usage);
        assert!((cost - (3.75 + 0.3)).abs() < 1e-9);
    }

    #[test]
    fn total_tokens_sums_all_counters() {
        let usage = ApiUsage {
            input_tokens: 10,
            output_tokens: 20,
            cache_read_tokens: Some(5),
            cache_write_tokens: None,
            total_cost: None,
        };
        assert_eq!(usage.total_tokens(), 35);
    }

    #[test]
    fn accumulate_preserves_none_cache_fields() {
        let mut total = ApiUsage::default();
        total.accumulate(&ApiUsage {
            input_tokens: 1,
            output_tokens: 2,
            ..Default::default()
        });
        assert_eq!(total.cache_read_tokens, None);
        assert_eq!(total.cache_write_tokens, None);

        total.accumulate(&ApiUsage {
            input_tokens: 0,
            output_tokens: 0,
            cache_read_tokens: Some(7),
            cache_write_tokens: None,
            total_cost: Some(0.5),
        });
        assert_eq!(total.cache_read_tokens, Some(7));
        assert_eq!(total.total_cost, Some(0.5));
    }
}
