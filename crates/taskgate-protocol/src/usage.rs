use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: i64,
    #[serde(default)]
    pub completion_tokens: i64,
    #[serde(default)]
    pub total_tokens: i64,
}

impl Usage {
    pub fn is_zero(&self) -> bool {
        self.prompt_tokens == 0 && self.completion_tokens == 0 && self.total_tokens == 0
    }

    /// Defensive backfill for providers that omit usage: count each requested
    /// item as one completion unit so billing never sees an all-zero row.
    pub fn backfill_from_item_count(&mut self, items: i64) {
        if self.is_zero() && items > 0 {
            self.completion_tokens = items;
            self.total_tokens = items;
        } else if self.total_tokens == 0 {
            self.total_tokens = self.prompt_tokens + self.completion_tokens;
        }
    }
}
