//! # Price Sets
//!
//! The per-grade price table held by every station and by the enterprise.
//!
//! ## Why Integers?
//! Prices are whole currency units per unit of volume. The network never
//! carries fractional prices, so there is no rounding policy to agree on
//! between tiers.
//!
//! ## Replace, Never Patch
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  current: {grade93: 1290, grade95: 1350}                                │
//! │  update:  {grade93: 1300}                                               │
//! │                        │                                                │
//! │                        ▼  merged()                                      │
//! │  next:    {grade93: 1300, grade95: 1350}   (a NEW value)                │
//! │                                                                         │
//! │  The holder swaps `current` for `next` in one assignment, so a reader   │
//! │  sees either the old table or the new one, never a half-applied mix.    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::types::FuelGrade;

/// Mapping of fuel grade to non-negative integer price.
///
/// Serialized as a plain JSON object: `{"grade93": 1290, "diesel": 1120}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PriceSet(BTreeMap<FuelGrade, u64>);

impl PriceSet {
    /// An empty table.
    pub fn new() -> Self {
        PriceSet(BTreeMap::new())
    }

    /// Builds a table from `(grade, price)` pairs.
    pub fn from_pairs<G, I>(pairs: I) -> Self
    where
        G: Into<FuelGrade>,
        I: IntoIterator<Item = (G, u64)>,
    {
        PriceSet(pairs.into_iter().map(|(g, p)| (g.into(), p)).collect())
    }

    /// The network's factory prices, used until an enterprise push arrives.
    pub fn standard() -> Self {
        PriceSet::from_pairs([
            ("grade93", 1290),
            ("grade95", 1350),
            ("grade97", 1400),
            ("diesel", 1120),
        ])
    }

    /// Price for one grade, if listed.
    pub fn get(&self, grade: &FuelGrade) -> Option<u64> {
        self.0.get(grade).copied()
    }

    /// Price for one grade, or [`CoreError::MissingPrice`].
    pub fn price_of(&self, grade: &FuelGrade) -> CoreResult<u64> {
        self.get(grade)
            .ok_or_else(|| CoreError::MissingPrice(grade.clone()))
    }

    /// Returns a new table with `update` laid over `self` key by key.
    ///
    /// Grades absent from `update` keep their current price; grades only in
    /// `update` are added.
    pub fn merged(&self, update: &PriceSet) -> PriceSet {
        let mut next = self.0.clone();
        for (grade, price) in &update.0 {
            next.insert(grade.clone(), *price);
        }
        PriceSet(next)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn grades(&self) -> impl Iterator<Item = &FuelGrade> {
        self.0.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&FuelGrade, u64)> {
        self.0.iter().map(|(g, p)| (g, *p))
    }
}

impl<G: Into<FuelGrade>> FromIterator<(G, u64)> for PriceSet {
    fn from_iter<I: IntoIterator<Item = (G, u64)>>(iter: I) -> Self {
        PriceSet::from_pairs(iter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_partial_update() {
        let current = PriceSet::from_pairs([("grade93", 1290), ("grade95", 1350)]);
        let update = PriceSet::from_pairs([("grade93", 1300)]);

        let merged = current.merged(&update);

        assert_eq!(
            merged,
            PriceSet::from_pairs([("grade93", 1300), ("grade95", 1350)])
        );
        // The source table is untouched.
        assert_eq!(current.get(&"grade93".into()), Some(1290));
    }

    #[test]
    fn test_merge_adds_new_grades() {
        let current = PriceSet::from_pairs([("grade93", 1290)]);
        let merged = current.merged(&PriceSet::from_pairs([("diesel", 1120)]));
        assert_eq!(merged.len(), 2);
        assert_eq!(merged.get(&"diesel".into()), Some(1120));
    }

    #[test]
    fn test_price_of_missing_grade() {
        let prices = PriceSet::standard();
        assert_eq!(prices.price_of(&"grade95".into()).unwrap(), 1350);
        assert!(matches!(
            prices.price_of(&"kerosene".into()),
            Err(CoreError::MissingPrice(_))
        ));
    }

    #[test]
    fn test_json_shape() {
        let prices = PriceSet::from_pairs([("grade93", 1290), ("diesel", 1120)]);
        let json = serde_json::to_string(&prices).unwrap();
        assert_eq!(json, r#"{"diesel":1120,"grade93":1290}"#);

        let back: PriceSet = serde_json::from_str(&json).unwrap();
        assert_eq!(back, prices);
    }

    #[test]
    fn test_negative_price_rejected() {
        assert!(serde_json::from_str::<PriceSet>(r#"{"grade93":-5}"#).is_err());
    }
}
