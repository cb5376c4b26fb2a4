//! Cost model
//!
//! Static price table for the AI services. Text services are priced per
//! 1K tokens (separate input and output rates) and the image service per
//! generated image. Estimation never fails: any lookup miss falls back to a
//! default rate.

use casefile_core::ServiceKind;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Flat rate per 1K total tokens used when a service cannot be priced
pub const FALLBACK_RATE_PER_1K: f64 = 0.02;

/// Per-image rate used when the image model is unknown
pub const DEFAULT_IMAGE_RATE: f64 = 0.055;

/// Storyteller model whose rates apply to unknown storyteller models
pub const DEFAULT_STORYTELLER_MODEL: &str = "gpt-4";

/// Logic model whose rates apply to unknown logic models
pub const DEFAULT_LOGIC_MODEL: &str = "claude-sonnet-4-20250514";

/// Prefix some clients put in front of image model ids
const IMAGE_MODEL_PREFIX: &str = "fal-ai/";

/// Input and output price per 1K tokens
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TokenRate {
    pub input: f64,
    pub output: f64,
}

impl TokenRate {
    pub const fn new(input: f64, output: f64) -> Self {
        Self { input, output }
    }

    fn is_valid(&self) -> bool {
        self.input.is_finite() && self.output.is_finite() && self.input >= 0.0 && self.output >= 0.0
    }
}

/// Price overrides merged over the built-in table (the `pricing` config section)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PricingOverrides {
    /// Storyteller model -> rate per 1K tokens
    pub storyteller: HashMap<String, TokenRate>,
    /// Logic model -> rate per 1K tokens
    pub logic: HashMap<String, TokenRate>,
    /// Image model -> rate per image
    pub image: HashMap<String, f64>,
}

impl PricingOverrides {
    /// Names of overrides with negative or non-finite prices
    pub fn invalid_entries(&self) -> Vec<String> {
        let mut invalid: Vec<String> = self
            .storyteller
            .iter()
            .chain(self.logic.iter())
            .filter(|(_, rate)| !rate.is_valid())
            .map(|(model, _)| model.clone())
            .collect();
        invalid.extend(
            self.image
                .iter()
                .filter(|(_, rate)| !(rate.is_finite() && **rate >= 0.0))
                .map(|(model, _)| model.clone()),
        );
        invalid.sort();
        invalid
    }
}

/// Price table for all services
#[derive(Debug, Clone)]
pub struct CostModel {
    storyteller: HashMap<String, TokenRate>,
    logic: HashMap<String, TokenRate>,
    image: HashMap<String, f64>,
}

impl Default for CostModel {
    fn default() -> Self {
        Self::new()
    }
}

impl CostModel {
    /// Built-in prices
    pub fn new() -> Self {
        let mut storyteller = HashMap::new();
        storyteller.insert("gpt-4.1".to_string(), TokenRate::new(0.01, 0.03));
        storyteller.insert("gpt-4".to_string(), TokenRate::new(0.01, 0.03));
        storyteller.insert("gpt-3.5-turbo".to_string(), TokenRate::new(0.001, 0.002));

        let mut logic = HashMap::new();
        logic.insert("claude-sonnet-4-20250514".to_string(), TokenRate::new(0.015, 0.075));
        logic.insert("claude-3.5-sonnet".to_string(), TokenRate::new(0.003, 0.015));
        logic.insert("claude-3-haiku".to_string(), TokenRate::new(0.00025, 0.00125));

        let mut image = HashMap::new();
        image.insert("flux/dev".to_string(), DEFAULT_IMAGE_RATE);
        image.insert("flux/schnell".to_string(), 0.03);

        Self {
            storyteller,
            logic,
            image,
        }
    }

    /// Built-in prices with overrides applied on top
    pub fn with_overrides(overrides: &PricingOverrides) -> Self {
        let mut model = Self::new();
        model.storyteller.extend(overrides.storyteller.clone());
        model.logic.extend(overrides.logic.clone());
        model.image.extend(
            overrides
                .image
                .iter()
                .map(|(name, rate)| (strip_image_prefix(name).to_string(), *rate)),
        );
        model
    }

    /// Estimated cost of one call
    ///
    /// Token-priced services use `model` (or the service default model when
    /// `model` is unknown or absent). The image service charges one image.
    pub fn cost(&self, service: ServiceKind, model: Option<&str>, input_tokens: u64, output_tokens: u64) -> f64 {
        let cost = match service {
            ServiceKind::Image => self.image_rate(model),
            ServiceKind::Storyteller | ServiceKind::Logic => match self.token_rate(service, model) {
                Some(rate) => {
                    (input_tokens as f64 / 1000.0) * rate.input + (output_tokens as f64 / 1000.0) * rate.output
                }
                None => flat_rate(input_tokens, output_tokens),
            },
        };

        if cost.is_finite() && cost >= 0.0 {
            cost
        } else {
            tracing::debug!(service = %service, ?model, "Unusable price, using flat fallback rate");
            flat_rate(input_tokens, output_tokens)
        }
    }

    /// Estimated cost for a service given by name
    ///
    /// Names that are not a known service are priced at the flat fallback rate.
    pub fn cost_by_name(&self, service: &str, model: Option<&str>, input_tokens: u64, output_tokens: u64) -> f64 {
        match service.parse::<ServiceKind>() {
            Ok(kind) => self.cost(kind, model, input_tokens, output_tokens),
            Err(_) => flat_rate(input_tokens, output_tokens),
        }
    }

    /// Token rate for a text service, falling back to its default model
    pub fn token_rate(&self, service: ServiceKind, model: Option<&str>) -> Option<TokenRate> {
        let (table, default_model) = match service {
            ServiceKind::Storyteller => (&self.storyteller, DEFAULT_STORYTELLER_MODEL),
            ServiceKind::Logic => (&self.logic, DEFAULT_LOGIC_MODEL),
            ServiceKind::Image => return None,
        };
        model
            .and_then(|name| table.get(name))
            .or_else(|| table.get(default_model))
            .copied()
            .filter(TokenRate::is_valid)
    }

    /// Per-image rate, falling back to `DEFAULT_IMAGE_RATE`
    pub fn image_rate(&self, model: Option<&str>) -> f64 {
        model
            .and_then(|name| self.image.get(strip_image_prefix(name)))
            .copied()
            .filter(|rate| rate.is_finite() && *rate >= 0.0)
            .unwrap_or(DEFAULT_IMAGE_RATE)
    }
}

fn flat_rate(input_tokens: u64, output_tokens: u64) -> f64 {
    (input_tokens + output_tokens) as f64 / 1000.0 * FALLBACK_RATE_PER_1K
}

fn strip_image_prefix(model: &str) -> &str {
    model.strip_prefix(IMAGE_MODEL_PREFIX).unwrap_or(model)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-12
    }

    #[test]
    fn test_known_text_models() {
        let model = CostModel::new();
        // 1000 in at 0.01 + 500 out at 0.03
        assert!(approx(
            model.cost(ServiceKind::Storyteller, Some("gpt-4.1"), 1000, 500),
            0.025
        ));
        assert!(approx(
            model.cost(ServiceKind::Logic, Some("claude-3-haiku"), 2000, 2000),
            0.003
        ));
    }

    #[test]
    fn test_unknown_model_uses_service_default() {
        let model = CostModel::new();
        assert!(approx(
            model.cost(ServiceKind::Storyteller, Some("gpt-99"), 1000, 1000),
            model.cost(ServiceKind::Storyteller, Some("gpt-4"), 1000, 1000)
        ));
        assert!(approx(
            model.cost(ServiceKind::Logic, None, 1000, 0),
            0.015
        ));
    }

    #[test]
    fn test_image_pricing() {
        let model = CostModel::new();
        assert!(approx(model.cost(ServiceKind::Image, Some("fal-ai/flux/schnell"), 0, 0), 0.03));
        assert!(approx(model.cost(ServiceKind::Image, Some("flux/dev"), 0, 0), 0.055));
        assert!(approx(model.cost(ServiceKind::Image, Some("flux/unknown"), 0, 0), DEFAULT_IMAGE_RATE));
        assert!(approx(model.cost(ServiceKind::Image, None, 0, 0), DEFAULT_IMAGE_RATE));
    }

    #[test]
    fn test_unknown_service_uses_flat_rate() {
        let model = CostModel::new();
        assert!(approx(model.cost_by_name("unknown", Some("x"), 600, 400), 0.02));
        assert!(approx(model.cost_by_name("unknown", None, 0, 0), 0.0));
        assert!(approx(
            model.cost_by_name("openai", Some("gpt-4.1"), 1000, 0),
            0.01
        ));
    }

    #[test]
    fn test_overrides_merge_over_builtins() {
        let mut overrides = PricingOverrides::default();
        overrides
            .storyteller
            .insert("gpt-4.1".to_string(), TokenRate::new(0.002, 0.008));
        overrides.image.insert("fal-ai/flux/pro".to_string(), 0.05);

        let model = CostModel::with_overrides(&overrides);
        assert!(approx(
            model.cost(ServiceKind::Storyteller, Some("gpt-4.1"), 1000, 1000),
            0.01
        ));
        assert!(approx(model.image_rate(Some("flux/pro")), 0.05));
        // Untouched entries survive
        assert!(approx(model.image_rate(Some("flux/schnell")), 0.03));
    }

    #[test]
    fn test_bad_prices_never_produce_negative_cost() {
        let mut overrides = PricingOverrides::default();
        overrides
            .logic
            .insert("claude-sonnet-4-20250514".to_string(), TokenRate::new(-1.0, f64::NAN));
        overrides.image.insert("flux/dev".to_string(), -3.0);
        assert_eq!(
            overrides.invalid_entries(),
            vec!["claude-sonnet-4-20250514".to_string(), "flux/dev".to_string()]
        );

        let model = CostModel::with_overrides(&overrides);
        let cost = model.cost(ServiceKind::Logic, Some("claude-sonnet-4-20250514"), 500, 500);
        assert!(approx(cost, 0.02));
        assert!(approx(model.image_rate(Some("flux/dev")), DEFAULT_IMAGE_RATE));
    }
}
