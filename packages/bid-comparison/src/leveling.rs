//! Leveling engine.
//!
//! Recomputes comparable contractor totals from reviewer-chosen baseline
//! quantities. Pure arithmetic over (items, baselines): no completion calls,
//! no hidden state, identical output for identical input.
//!
//! For every non-exclusion item:
//!
//! ```text
//! baseline for description (else normalized category) with quantity > 0
//!   and item has unit price  ->  baseline.quantity * unit_price
//! otherwise                  ->  total_price
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{LevelingError, LevelingResult};
use crate::traits::store::BidStore;
use crate::types::document::{DocumentStatus, ExtractedItem};

/// A reviewer-chosen reference quantity for one normalized item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemBaseline {
    pub item_key: String,
    pub contractor_id: Uuid,
    pub quantity: f64,

    #[serde(default)]
    pub unit: Option<String>,

    pub set_at: DateTime<Utc>,
}

impl ItemBaseline {
    pub fn new(item_key: impl Into<String>, contractor_id: Uuid, quantity: f64) -> Self {
        Self {
            item_key: item_key.into(),
            contractor_id,
            quantity,
            unit: None,
            set_at: Utc::now(),
        }
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    /// Quantity if it can be multiplied against; non-positive counts as absent.
    pub fn usable_quantity(&self) -> Option<f64> {
        (self.quantity.is_finite() && self.quantity > 0.0).then_some(self.quantity)
    }
}

fn normalize_key(key: &str) -> String {
    key.trim().to_lowercase()
}

/// At most one baseline per normalized item key, plus a version stamp
/// for optimistic saves.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BaselineSet {
    baselines: BTreeMap<String, ItemBaseline>,
    version: u64,
}

impl BaselineSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Version this set was loaded at.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn with_version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }

    /// Insert, overwriting any baseline for the same key.
    pub fn insert(&mut self, baseline: ItemBaseline) -> Option<ItemBaseline> {
        self.baselines
            .insert(normalize_key(&baseline.item_key), baseline)
    }

    pub fn with_baseline(mut self, baseline: ItemBaseline) -> Self {
        self.insert(baseline);
        self
    }

    pub fn remove(&mut self, item_key: &str) -> Option<ItemBaseline> {
        self.baselines.remove(&normalize_key(item_key))
    }

    pub fn get(&self, item_key: &str) -> Option<&ItemBaseline> {
        self.baselines.get(&normalize_key(item_key))
    }

    pub fn len(&self) -> usize {
        self.baselines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.baselines.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ItemBaseline> {
        self.baselines.values()
    }

    /// Usable baseline quantity for an item: matched by description first,
    /// then by normalized category.
    pub fn quantity_for(&self, item: &ExtractedItem) -> Option<f64> {
        let by_description = self
            .get(&item.description)
            .and_then(ItemBaseline::usable_quantity);

        by_description.or_else(|| {
            item.normalized_category
                .as_deref()
                .and_then(|category| self.get(category))
                .and_then(ItemBaseline::usable_quantity)
        })
    }
}

/// One contractor's items as input to leveling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractorBid {
    pub contractor_id: Uuid,
    pub contractor_name: String,
    pub items: Vec<ExtractedItem>,
}

/// Derived totals for one contractor. Never the source of truth.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractorLeveledTotals {
    pub contractor_id: Uuid,
    pub contractor_name: String,
    pub as_bid_total: f64,
    pub leveled_total: f64,
    pub difference: f64,
    pub percent_difference: f64,

    /// Items whose contribution came from a baseline
    pub leveled_items: usize,
}

/// Totals for every contractor plus ranking comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelingReport {
    pub totals: Vec<ContractorLeveledTotals>,

    /// Contractor ids ascending by as-bid total
    pub as_bid_ranking: Vec<Uuid>,

    /// Contractor ids ascending by leveled total
    pub leveled_ranking: Vec<Uuid>,

    /// Leveling reordered the contractors
    pub ranking_changed: bool,
}

impl LevelingReport {
    pub fn totals_for(&self, contractor_id: Uuid) -> Option<&ContractorLeveledTotals> {
        self.totals.iter().find(|t| t.contractor_id == contractor_id)
    }
}

/// Leveled contribution of one item.
pub fn leveled_contribution(item: &ExtractedItem, baselines: &BaselineSet) -> f64 {
    match (baselines.quantity_for(item), item.unit_price) {
        (Some(quantity), Some(unit_price)) => quantity * unit_price,
        _ => item.total_price,
    }
}

/// Level one contractor's non-exclusion items.
pub fn level_contractor(bid: &ContractorBid, baselines: &BaselineSet) -> ContractorLeveledTotals {
    let mut as_bid_total = 0.0;
    let mut leveled_total = 0.0;
    let mut leveled_items = 0;

    for item in bid.items.iter().filter(|i| !i.is_exclusion) {
        as_bid_total += item.total_price;
        if baselines.quantity_for(item).is_some() && item.unit_price.is_some() {
            leveled_items += 1;
        }
        leveled_total += leveled_contribution(item, baselines);
    }

    let difference = leveled_total - as_bid_total;
    let percent_difference = if as_bid_total == 0.0 {
        0.0
    } else {
        difference / as_bid_total * 100.0
    };

    ContractorLeveledTotals {
        contractor_id: bid.contractor_id,
        contractor_name: bid.contractor_name.clone(),
        as_bid_total,
        leveled_total,
        difference,
        percent_difference,
        leveled_items,
    }
}

fn ranking(totals: &[ContractorLeveledTotals], key: fn(&ContractorLeveledTotals) -> f64) -> Vec<Uuid> {
    let mut ordered: Vec<&ContractorLeveledTotals> = totals.iter().collect();
    // Stable sort: ties keep bid order
    ordered.sort_by(|a, b| {
        key(a)
            .partial_cmp(&key(b))
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    ordered.into_iter().map(|t| t.contractor_id).collect()
}

/// Level every contractor and compare rankings.
pub fn level(bids: &[ContractorBid], baselines: &BaselineSet) -> LevelingReport {
    let totals: Vec<ContractorLeveledTotals> = bids
        .iter()
        .map(|bid| level_contractor(bid, baselines))
        .collect();

    let as_bid_ranking = ranking(&totals, |t| t.as_bid_total);
    let leveled_ranking = ranking(&totals, |t| t.leveled_total);
    let ranking_changed = as_bid_ranking != leveled_ranking;

    LevelingReport {
        totals,
        as_bid_ranking,
        leveled_ranking,
        ranking_changed,
    }
}

/// Reject missing, non-finite and non-positive baseline quantities.
pub fn validate_baseline(item_key: &str, quantity: Option<f64>) -> LevelingResult<f64> {
    if item_key.trim().is_empty() {
        return Err(LevelingError::InvalidBaseline {
            item_key: item_key.to_string(),
            reason: "item key is empty".into(),
        });
    }

    match quantity {
        Some(q) if q.is_finite() && q > 0.0 => Ok(q),
        Some(q) => Err(LevelingError::InvalidBaseline {
            item_key: item_key.to_string(),
            reason: format!("quantity must be greater than zero, got {}", q),
        }),
        None => Err(LevelingError::InvalidBaseline {
            item_key: item_key.to_string(),
            reason: "quantity is required".into(),
        }),
    }
}

/// Baseline edit entry points over a store.
pub struct LevelingService<S> {
    store: S,
}

impl<S: BidStore> LevelingService<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Set (or overwrite) the baseline for an item and recompute totals.
    ///
    /// Saves against the version just loaded; use
    /// [`set_baseline_at`](Self::set_baseline_at) to guard a reviewer's view.
    pub async fn set_baseline(
        &self,
        project_id: Uuid,
        item_key: &str,
        contractor_id: Uuid,
        quantity: Option<f64>,
        unit: Option<String>,
    ) -> LevelingResult<LevelingReport> {
        let current = self.store.load_baselines(project_id).await?;
        self.set_baseline_at(
            project_id,
            item_key,
            contractor_id,
            quantity,
            unit,
            current.version(),
        )
        .await
    }

    /// Set a baseline only if the stored set is still at `expected_version`.
    pub async fn set_baseline_at(
        &self,
        project_id: Uuid,
        item_key: &str,
        contractor_id: Uuid,
        quantity: Option<f64>,
        unit: Option<String>,
        expected_version: u64,
    ) -> LevelingResult<LevelingReport> {
        let quantity = validate_baseline(item_key, quantity)?;

        let mut baselines = self.store.load_baselines(project_id).await?;
        let mut baseline = ItemBaseline::new(item_key.trim(), contractor_id, quantity);
        baseline.unit = unit;
        baselines.insert(baseline);

        let version = self
            .store
            .save_baselines(project_id, &baselines, expected_version)
            .await?;

        info!(
            %project_id,
            item_key,
            %contractor_id,
            quantity,
            version,
            "Baseline set"
        );

        self.recompute_with(project_id, &baselines.with_version(version))
            .await
    }

    /// Remove the baseline for an item and recompute totals.
    pub async fn clear_baseline(
        &self,
        project_id: Uuid,
        item_key: &str,
    ) -> LevelingResult<LevelingReport> {
        let mut baselines = self.store.load_baselines(project_id).await?;
        let expected = baselines.version();

        if baselines.remove(item_key).is_none() {
            debug!(%project_id, item_key, "No baseline to clear");
            return self.recompute_with(project_id, &baselines).await;
        }

        let version = self
            .store
            .save_baselines(project_id, &baselines, expected)
            .await?;

        info!(%project_id, item_key, version, "Baseline cleared");

        self.recompute_with(project_id, &baselines.with_version(version))
            .await
    }

    /// Recompute totals from the stored baselines.
    pub async fn recompute(&self, project_id: Uuid) -> LevelingResult<LevelingReport> {
        let baselines = self.store.load_baselines(project_id).await?;
        self.recompute_with(project_id, &baselines).await
    }

    async fn recompute_with(
        &self,
        project_id: Uuid,
        baselines: &BaselineSet,
    ) -> LevelingResult<LevelingReport> {
        let bids = self.load_bids(project_id).await?;
        let report = level(&bids, baselines);

        self.store
            .save_leveled_totals(project_id, &report.totals)
            .await?;

        if report.ranking_changed {
            info!(%project_id, "Leveling changed contractor ranking");
        }

        Ok(report)
    }

    async fn load_bids(&self, project_id: Uuid) -> LevelingResult<Vec<ContractorBid>> {
        let documents = self.store.list_documents(project_id).await?;
        let mut bids = Vec::with_capacity(documents.len());

        for document in documents
            .into_iter()
            .filter(|d| d.status == DocumentStatus::Processed)
        {
            let items = self.store.list_items(document.id).await?;
            bids.push(ContractorBid {
                contractor_id: document.contractor_id(),
                contractor_name: document.contractor_name,
                items,
            });
        }

        Ok(bids)
    }
}
