use std::collections::{HashMap, HashSet};

use taskgate_adaptor_core::PriceData;
use taskgate_common::QUOTA_PER_UNIT;

/// Model and group price tables. The effective price of a request is
/// `model_price * group_ratio * product(other_ratios != 1.0)` unless the
/// model is flat-priced, in which case the other ratios are ignored.
#[derive(Debug, Clone)]
pub struct PricingTable {
    model_prices: HashMap<String, f64>,
    group_ratios: HashMap<String, f64>,
    flat_price_models: HashSet<String>,
    default_model_price: f64,
}

impl PricingTable {
    pub fn new(default_model_price: f64) -> Self {
        Self {
            model_prices: HashMap::new(),
            group_ratios: HashMap::new(),
            flat_price_models: HashSet::new(),
            default_model_price,
        }
    }

    pub fn set_model_price(&mut self, model: &str, price: f64) {
        self.model_prices.insert(model.to_string(), price);
    }

    pub fn set_group_ratio(&mut self, group: &str, ratio: f64) {
        self.group_ratios.insert(group.to_string(), ratio);
    }

    /// Marks a model as flat-priced; per-dimension multipliers do not apply.
    pub fn set_flat_price(&mut self, model: &str) {
        self.flat_price_models.insert(model.to_string());
    }

    pub fn model_price(&self, model: &str) -> f64 {
        self.model_prices
            .get(model)
            .copied()
            .unwrap_or(self.default_model_price)
    }

    pub fn group_ratio(&self, group: &str) -> f64 {
        self.group_ratios.get(group).copied().unwrap_or(1.0)
    }

    /// Effective ratio and quota units for one request. The quota returned
    /// here is the amount reserved, charged, and recorded; there is no
    /// re-pricing later in the task's life.
    pub fn quota_for(&self, model: &str, group: &str, price_data: &PriceData) -> (f64, i64) {
        let mut ratio = self.model_price(model) * self.group_ratio(group);
        if !self.flat_price_models.contains(model) {
            ratio *= price_data.ratio_product();
        }
        let quota = (ratio * QUOTA_PER_UNIT).round() as i64;
        (ratio, quota)
    }
}

impl Default for PricingTable {
    fn default() -> Self {
        let mut table = Self::new(0.1);
        table.set_model_price("sora-2", 0.1);
        table.set_model_price("sora-2-pro", 0.3);
        table.set_model_price("veo3-fast", 0.15);
        table.set_model_price("gpt-4o-mini", 0.01);
        table.set_model_price("dall-e-3", 0.04);
        table.set_flat_price("dall-e-3");
        table
    }
}
