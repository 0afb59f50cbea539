use crate::domain::stock::StoredStock;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// The single best current pick, with the day it was drawn from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub as_of_date: NaiveDate,
    /// Set when today had no qualifying rows and yesterday's were used.
    pub fallback: bool,
    #[serde(flatten)]
    pub stock: StoredStock,
}
