use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Declared yield unit of a recipe.
///
/// Mass and volume yields scale sub-recipe edges by `edge / yield_quantity`;
/// a `batches` yield treats the edge quantity as the batch multiplier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize)]
#[strum(ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum YieldUnit {
    #[strum(to_string = "grams", serialize = "g", serialize = "gram")]
    Grams,
    #[strum(to_string = "mLs", serialize = "ml", serialize = "milliliters")]
    Milliliters,
    #[strum(to_string = "batches", serialize = "batch")]
    Batches,
}

impl YieldUnit {
    /// Parses a stored unit label. Unknown labels yield `None`.
    pub fn parse(raw: &str) -> Option<Self> {
        raw.trim().parse().ok()
    }

    /// True for mass and volume units.
    pub fn is_measure(&self) -> bool {
        matches!(self, YieldUnit::Grams | YieldUnit::Milliliters)
    }
}
