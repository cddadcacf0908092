use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// History keeps only the most recent entries; oldest are evicted first.
pub const MAX_HISTORY_ENTRIES: usize = 100;

/// Immutable record of one completed check cycle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CheckEntry {
    pub timestamp: DateTime<Utc>,
    pub total_products: usize,
    pub new_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_product_ids: Option<Vec<String>>,
}

impl CheckEntry {
    pub fn new(total_products: usize, new_count: usize, new_product_ids: Option<Vec<String>>) -> Self {
        Self {
            timestamp: Utc::now(),
            total_products,
            new_count,
            new_product_ids,
        }
    }
}
