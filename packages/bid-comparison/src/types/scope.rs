//! Cross-contractor scope items produced by normalization.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How one contractor treats a normalized scope item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    Included,
    Excluded,
    NotMentioned,
}

/// One contractor's position on a scope item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractorEntry {
    pub status: EntryStatus,

    #[serde(default)]
    pub price: Option<f64>,

    #[serde(default)]
    pub original_description: Option<String>,

    /// The extracted item this entry resolves to
    #[serde(default)]
    pub item_id: Option<Uuid>,
}

impl ContractorEntry {
    /// Entry for a contractor that never mentions the item.
    pub fn not_mentioned() -> Self {
        Self {
            status: EntryStatus::NotMentioned,
            price: None,
            original_description: None,
            item_id: None,
        }
    }
}

/// A scope item matched across every contractor in a comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedScopeItem {
    pub id: Uuid,
    pub normalized_description: String,
    pub category: String,

    /// Entries keyed by contractor id, in bid order
    pub contractors: IndexMap<Uuid, ContractorEntry>,

    pub is_scope_gap: bool,

    #[serde(default)]
    pub gap_notes: Option<String>,
}

impl NormalizedScopeItem {
    /// Create an empty group.
    pub fn new(description: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            normalized_description: description.into(),
            category: category.into(),
            contractors: IndexMap::new(),
            is_scope_gap: false,
            gap_notes: None,
        }
    }

    /// Add or replace a contractor entry.
    pub fn with_entry(mut self, contractor_id: Uuid, entry: ContractorEntry) -> Self {
        self.contractors.insert(contractor_id, entry);
        self
    }

    /// A group is a gap unless every contractor includes it.
    pub fn compute_scope_gap(&self) -> bool {
        self.contractors.is_empty()
            || self
                .contractors
                .values()
                .any(|e| e.status != EntryStatus::Included)
    }

    /// Recompute `is_scope_gap` from the entries.
    pub fn refresh_gap(&mut self) {
        self.is_scope_gap = self.compute_scope_gap();
        if !self.is_scope_gap {
            self.gap_notes = None;
        }
    }

    /// Contractors that do not include this item.
    pub fn missing_contractors(&self) -> Vec<Uuid> {
        self.contractors
            .iter()
            .filter(|(_, e)| e.status != EntryStatus::Included)
            .map(|(id, _)| *id)
            .collect()
    }

    /// Estimated value of the item, averaged over contractors that price it.
    pub fn estimated_value(&self) -> Option<f64> {
        let prices: Vec<f64> = self
            .contractors
            .values()
            .filter(|e| e.status == EntryStatus::Included)
            .filter_map(|e| e.price)
            .filter(|p| *p > 0.0)
            .collect();

        if prices.is_empty() {
            None
        } else {
            Some(prices.iter().sum::<f64>() / prices.len() as f64)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn included(price: f64) -> ContractorEntry {
        ContractorEntry {
            status: EntryStatus::Included,
            price: Some(price),
            original_description: None,
            item_id: Some(Uuid::new_v4()),
        }
    }

    #[test]
    fn test_excluded_contractor_makes_gap() {
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let mut item = NormalizedScopeItem::new("Fire caulking", "firestopping")
            .with_entry(a, included(1200.0))
            .with_entry(
                b,
                ContractorEntry {
                    status: EntryStatus::Excluded,
                    ..ContractorEntry::not_mentioned()
                },
            )
            .with_entry(c, included(1500.0));
        item.refresh_gap();

        assert!(item.is_scope_gap);
        assert_eq!(item.missing_contractors(), vec![b]);
        assert_eq!(item.estimated_value(), Some(1350.0));
    }

    #[test]
    fn test_all_included_is_not_gap() {
        let mut item = NormalizedScopeItem::new("Taping", "finishes")
            .with_entry(Uuid::new_v4(), included(10.0))
            .with_entry(Uuid::new_v4(), included(12.0))
            .with_entry(Uuid::new_v4(), included(11.0));
        item.gap_notes = Some("stale".into());
        item.refresh_gap();

        assert!(!item.is_scope_gap);
        assert!(item.gap_notes.is_none());
    }
}
