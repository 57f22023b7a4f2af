//! Normalization stage: match scope items across contractors.
//!
//! The model groups items by meaning. Its answer is never trusted as-is:
//! [`reconcile`] enforces that every extracted item lands in exactly one
//! group, applies exclusion markers, fills in contractors the model left
//! out and recomputes gaps. When the response cannot be decoded the stage
//! falls back to [`literal_match`].

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{ComparisonError, Result};
use crate::leveling::ContractorBid;
use crate::pipeline::decode::{decode_response, lenient_amount};
use crate::pipeline::markers::is_exclusion_marker;
use crate::pipeline::prompts::{format_normalization_messages, PromptAugmentation};
use crate::traits::completion::{Completion, CompletionOptions};
use crate::types::config::PipelineConfig;
use crate::types::document::ExtractedItem;
use crate::types::scope::{ContractorEntry, EntryStatus, NormalizedScopeItem};

// ============================================================================
// Model input
// ============================================================================

/// What the model sees of each item.
#[derive(Debug, Clone, Serialize)]
pub struct ItemRef {
    pub id: Uuid,
    pub description: String,
    pub price: f64,
    pub category: String,
    pub is_exclusion: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ContractorItems {
    pub contractor_id: Uuid,
    pub contractor_name: String,
    pub items: Vec<ItemRef>,
}

/// Normalization request payload.
#[derive(Debug, Clone, Serialize)]
pub struct NormalizationInput {
    pub contractors: Vec<ContractorItems>,
}

impl NormalizationInput {
    pub fn from_bids(bids: &[ContractorBid]) -> Self {
        Self {
            contractors: bids
                .iter()
                .map(|bid| ContractorItems {
                    contractor_id: bid.contractor_id,
                    contractor_name: bid.contractor_name.clone(),
                    items: bid
                        .items
                        .iter()
                        .map(|item| ItemRef {
                            id: item.id,
                            description: item.description.clone(),
                            price: item.total_price,
                            category: item.category.clone(),
                            is_exclusion: item.is_exclusion,
                        })
                        .collect(),
                })
                .collect(),
        }
    }
}

// ============================================================================
// Model output
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AINormalizationResponse {
    #[serde(default)]
    pub normalized_items: Vec<AIScopeGroup>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AIScopeGroup {
    #[serde(default)]
    pub normalized_description: String,

    #[serde(default)]
    pub category: Option<String>,

    #[serde(default)]
    pub contractors: Vec<AIContractorEntry>,

    #[serde(default)]
    pub gap_notes: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AIContractorEntry {
    #[serde(default)]
    pub contractor_id: Option<String>,

    #[serde(default)]
    pub status: Option<String>,

    #[serde(default, deserialize_with = "lenient_amount")]
    pub price: Option<f64>,

    #[serde(default)]
    pub original_description: Option<String>,

    #[serde(default)]
    pub item_id: Option<String>,
}

fn parse_status(raw: Option<&str>) -> EntryStatus {
    let normalized = raw
        .unwrap_or_default()
        .trim()
        .to_lowercase()
        .replace([' ', '-'], "_");
    match normalized.as_str() {
        "included" | "include" => EntryStatus::Included,
        "excluded" | "exclude" | "exclusion" => EntryStatus::Excluded,
        _ => EntryStatus::NotMentioned,
    }
}

fn parse_id(raw: Option<&str>) -> Option<Uuid> {
    raw.and_then(|s| Uuid::parse_str(s.trim()).ok())
}

// ============================================================================
// Reconciliation
// ============================================================================

/// Whether an item counts as excluded scope when matched.
///
/// A zero total is a missing price, not an exclusion. Markers only apply to
/// unpriced lines the extraction did not flag as included.
pub fn treated_as_exclusion(item: &ExtractedItem) -> bool {
    if item.is_exclusion {
        return true;
    }
    if item.is_inclusion || item.total_price > 0.0 {
        return false;
    }
    is_exclusion_marker(&item.description)
        || item.raw_text.as_deref().is_some_and(|t| is_exclusion_marker(t))
}

fn entry_for_item(item: &ExtractedItem, claimed: EntryStatus) -> ContractorEntry {
    let excluded = treated_as_exclusion(item)
        || (claimed == EntryStatus::Excluded && !item.is_inclusion);
    let status = if excluded {
        EntryStatus::Excluded
    } else {
        EntryStatus::Included
    };
    ContractorEntry {
        status,
        price: Some(item.total_price),
        original_description: Some(item.description.clone()),
        item_id: Some(item.id),
    }
}

fn normalize_text(text: &str) -> String {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Finalize groups: fill absent contractors, recompute gaps, write notes.
fn finalize(groups: &mut [NormalizedScopeItem], bids: &[ContractorBid]) {
    let names: HashMap<Uuid, &str> = bids
        .iter()
        .map(|b| (b.contractor_id, b.contractor_name.as_str()))
        .collect();

    for group in groups.iter_mut() {
        let mut ordered = IndexMap::with_capacity(bids.len());
        for bid in bids {
            let entry = group
                .contractors
                .shift_remove(&bid.contractor_id)
                .unwrap_or_else(ContractorEntry::not_mentioned);
            ordered.insert(bid.contractor_id, entry);
        }
        group.contractors = ordered;
        group.refresh_gap();

        let has_notes = group
            .gap_notes
            .as_deref()
            .is_some_and(|n| !n.trim().is_empty());
        if group.is_scope_gap && !has_notes {
            let missing: Vec<String> = group
                .contractors
                .iter()
                .filter(|(_, e)| e.status != EntryStatus::Included)
                .map(|(id, e)| {
                    let name = names.get(id).copied().unwrap_or("unknown contractor");
                    match e.status {
                        EntryStatus::Excluded => format!("{} (excluded)", name),
                        _ => format!("{} (not mentioned)", name),
                    }
                })
                .collect();
            group.gap_notes = Some(format!("Not included by: {}", missing.join(", ")));
        }
    }
}

fn singleton_group(owner: Uuid, item: &ExtractedItem) -> NormalizedScopeItem {
    NormalizedScopeItem::new(item.description.clone(), item.category.clone())
        .with_entry(owner, entry_for_item(item, EntryStatus::Included))
}

/// Merge a model response with the extracted items.
///
/// Item ids must exist, belong to the entry's contractor and be unused;
/// otherwise the entry is resolved by original description among that
/// contractor's unused items. Items nobody referenced become their own
/// groups. Groups with no linked item and no exclusion are dropped.
pub fn reconcile(bids: &[ContractorBid], response: AINormalizationResponse) -> Vec<NormalizedScopeItem> {
    let owners: HashMap<Uuid, (Uuid, &ExtractedItem)> = bids
        .iter()
        .flat_map(|b| b.items.iter().map(move |i| (i.id, (b.contractor_id, i))))
        .collect();
    let contractors: HashSet<Uuid> = bids.iter().map(|b| b.contractor_id).collect();
    let mut used: HashSet<Uuid> = HashSet::new();
    let mut groups = Vec::with_capacity(response.normalized_items.len());

    for raw_group in response.normalized_items {
        let mut group = NormalizedScopeItem::new(
            raw_group.normalized_description.trim(),
            raw_group
                .category
                .as_deref()
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .unwrap_or("general"),
        );
        group.gap_notes = raw_group.gap_notes.filter(|n| !n.trim().is_empty());

        for raw_entry in raw_group.contractors {
            let Some(contractor_id) =
                parse_id(raw_entry.contractor_id.as_deref()).filter(|id| contractors.contains(id))
            else {
                debug!(contractor = ?raw_entry.contractor_id, "Dropping entry for unknown contractor");
                continue;
            };
            if group.contractors.contains_key(&contractor_id) {
                continue;
            }

            let claimed = parse_status(raw_entry.status.as_deref());
            let linked = parse_id(raw_entry.item_id.as_deref())
                .and_then(|id| owners.get(&id))
                .filter(|(owner, item)| *owner == contractor_id && !used.contains(&item.id))
                .map(|(_, item)| *item)
                .or_else(|| {
                    let wanted = normalize_text(raw_entry.original_description.as_deref()?);
                    bids.iter()
                        .find(|b| b.contractor_id == contractor_id)?
                        .items
                        .iter()
                        .find(|i| !used.contains(&i.id) && normalize_text(&i.description) == wanted)
                });

            let entry = match linked {
                Some(item) => {
                    used.insert(item.id);
                    entry_for_item(item, claimed)
                }
                None if claimed == EntryStatus::Excluded => ContractorEntry {
                    status: EntryStatus::Excluded,
                    price: None,
                    original_description: raw_entry.original_description,
                    item_id: None,
                },
                None => ContractorEntry {
                    original_description: raw_entry.original_description,
                    ..ContractorEntry::not_mentioned()
                },
            };
            group.contractors.insert(contractor_id, entry);
        }

        let keep = group
            .contractors
            .values()
            .any(|e| e.item_id.is_some() || e.status == EntryStatus::Excluded);
        if !keep {
            debug!(description = %group.normalized_description, "Dropping group with no linked items");
            continue;
        }

        if group.normalized_description.is_empty() {
            if let Some(desc) = group
                .contractors
                .values()
                .find_map(|e| e.original_description.clone())
            {
                group.normalized_description = desc;
            }
        }
        groups.push(group);
    }

    for bid in bids {
        for item in &bid.items {
            if !used.contains(&item.id) {
                debug!(item_id = %item.id, "Item not matched by model, adding own group");
                groups.push(singleton_group(bid.contractor_id, item));
            }
        }
    }

    finalize(&mut groups, bids);
    groups
}

/// Deterministic grouping by normalized description.
///
/// The n-th occurrence of a description within one bid joins the n-th
/// group for that description, so every item lands in exactly one group.
pub fn literal_match(bids: &[ContractorBid]) -> Vec<NormalizedScopeItem> {
    let mut groups: IndexMap<(String, usize), NormalizedScopeItem> = IndexMap::new();

    for bid in bids {
        let mut seen: HashMap<String, usize> = HashMap::new();
        for item in &bid.items {
            let key = normalize_text(&item.description);
            let occurrence = seen.entry(key.clone()).or_insert(0);
            let slot = (key, *occurrence);
            *occurrence += 1;

            groups
                .entry(slot)
                .or_insert_with(|| {
                    NormalizedScopeItem::new(item.description.clone(), item.category.clone())
                })
                .contractors
                .insert(bid.contractor_id, entry_for_item(item, EntryStatus::Included));
        }
    }

    let mut groups: Vec<NormalizedScopeItem> = groups.into_values().collect();
    finalize(&mut groups, bids);
    groups
}

/// `non-gap groups / total extracted items` (0 with no items).
pub fn match_rate(groups: &[NormalizedScopeItem], total_items: usize) -> f64 {
    if total_items == 0 {
        return 0.0;
    }
    let common = groups.iter().filter(|g| !g.is_scope_gap).count();
    common as f64 / total_items as f64
}

/// Result of the normalization stage.
#[derive(Debug, Clone, Default)]
pub struct NormalizationOutcome {
    pub items: Vec<NormalizedScopeItem>,
    pub total_items: usize,
    pub match_rate: f64,
    pub scope_gaps_count: usize,
    pub common_items_count: usize,
    /// The model response was unusable and literal matching ran instead
    pub used_fallback: bool,
    pub duration_ms: u64,
}

impl NormalizationOutcome {
    fn from_groups(items: Vec<NormalizedScopeItem>, total_items: usize, used_fallback: bool) -> Self {
        let scope_gaps_count = items.iter().filter(|g| g.is_scope_gap).count();
        Self {
            match_rate: match_rate(&items, total_items),
            common_items_count: items.len() - scope_gaps_count,
            scope_gaps_count,
            total_items,
            items,
            used_fallback,
            duration_ms: 0,
        }
    }

    /// Normalized description per extracted item id.
    pub fn labels(&self) -> HashMap<Uuid, String> {
        self.items
            .iter()
            .flat_map(|g| {
                g.contractors
                    .values()
                    .filter_map(|e| e.item_id)
                    .map(|id| (id, g.normalized_description.clone()))
            })
            .collect()
    }
}

/// Run the normalization stage.
///
/// Completion failures propagate; an undecodable response falls back to
/// literal matching.
pub async fn normalize_scope<C: Completion + ?Sized>(
    completion: &C,
    config: &PipelineConfig,
    trade_type: &str,
    bids: &[ContractorBid],
    augmentation: &PromptAugmentation,
) -> Result<NormalizationOutcome> {
    let start = Instant::now();
    let total_items: usize = bids.iter().map(|b| b.items.len()).sum();

    if total_items == 0 {
        info!("No extracted items to normalize");
        return Ok(NormalizationOutcome::default());
    }

    let input = serde_json::to_string_pretty(&NormalizationInput::from_bids(bids))
        .map_err(|e| ComparisonError::Decode {
            stage: "normalization",
            reason: format!("failed to encode input: {}", e),
        })?;
    let messages = format_normalization_messages(trade_type, &input, augmentation);
    let options = CompletionOptions::json(config.temperature, config.analysis_max_tokens);

    let text = completion.complete(&messages, &options).await?;

    let mut outcome = match decode_response::<AINormalizationResponse>("normalization", &text) {
        Ok(response) => NormalizationOutcome::from_groups(reconcile(bids, response), total_items, false),
        Err(e) => {
            warn!(error = %e, "Normalization response unusable, falling back to literal matching");
            NormalizationOutcome::from_groups(literal_match(bids), total_items, true)
        }
    };
    outcome.duration_ms = start.elapsed().as_millis() as u64;

    info!(
        groups = outcome.items.len(),
        scope_gaps = outcome.scope_gaps_count,
        match_rate = outcome.match_rate,
        fallback = outcome.used_fallback,
        "Normalization complete"
    );

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::recommend::{compute_price_analysis, summarize_contractors};

    fn bid(name: &str, items: &[(&str, f64)]) -> ContractorBid {
        let contractor_id = Uuid::new_v4();
        ContractorBid {
            contractor_id,
            contractor_name: name.to_string(),
            items: items
                .iter()
                .map(|(d, p)| ExtractedItem::new(contractor_id, *d, *p))
                .collect(),
        }
    }

    fn assert_each_item_once(bids: &[ContractorBid], groups: &[NormalizedScopeItem]) {
        let linked: Vec<Uuid> = groups
            .iter()
            .flat_map(|g| g.contractors.values().filter_map(|e| e.item_id))
            .collect();
        let unique: HashSet<Uuid> = linked.iter().copied().collect();
        assert_eq!(linked.len(), unique.len(), "an item is linked twice");
        for bid in bids {
            for item in &bid.items {
                assert!(unique.contains(&item.id), "item {} not linked", item.description);
            }
        }
    }

    #[test]
    fn test_literal_match_groups_and_gaps() {
        let bids = vec![
            bid("A", &[("Hang board", 100.0), ("Taping", 50.0)]),
            bid("B", &[("hang  board", 90.0), ("Fire caulking - NIC", 0.0)]),
        ];
        let groups = literal_match(&bids);

        assert_eq!(groups.len(), 3);
        assert!(!groups[0].is_scope_gap);
        assert!(groups[1].is_scope_gap);
        assert_eq!(
            groups[2].contractors[&bids[1].contractor_id].status,
            EntryStatus::Excluded
        );
        assert!(groups[1].gap_notes.as_deref().unwrap().contains("B (not mentioned)"));
        assert_each_item_once(&bids, &groups);
        assert_eq!(match_rate(&groups, 4), 0.25);
    }

    #[test]
    fn test_unpriced_inclusion_is_not_a_gap() {
        let mut bids = vec![
            bid("A", &[("Hang board", 100_000.0), ("Cleanup", 2_000.0)]),
            bid("B", &[("Hang board", 100_000.0), ("Cleanup", 0.0)]),
        ];
        bids[1].items[1].is_inclusion = true;
        let (a, b) = (bids[0].contractor_id, bids[1].contractor_id);

        let groups = literal_match(&bids);
        let cleanup = &groups[1];
        assert_eq!(cleanup.contractors[&b].status, EntryStatus::Included);
        assert!(!cleanup.is_scope_gap);

        let summaries = summarize_contractors(&bids, &groups);
        let analysis = compute_price_analysis(&summaries, &groups);
        let true_cost = |id| analysis.estimate_for(id).unwrap().estimated_true_cost;
        assert_eq!(true_cost(a), 102_000.0);
        assert_eq!(true_cost(b), 100_000.0);
    }

    #[test]
    fn test_marker_ignored_on_priced_line() {
        let bids = vec![
            bid("A", &[("Taping", 8_000.0)]),
            bid("B", &[("Taping TBD", 9_000.0), ("Sanding TBD", 0.0)]),
        ];
        let b = bids[1].contractor_id;
        assert!(!treated_as_exclusion(&bids[1].items[0]));
        assert!(treated_as_exclusion(&bids[1].items[1]));

        let groups = literal_match(&bids);
        let sanding = groups
            .iter()
            .find(|g| g.contractors.get(&b).is_some_and(|e| e.item_id == Some(bids[1].items[1].id)))
            .unwrap();
        assert_eq!(sanding.contractors[&b].status, EntryStatus::Excluded);
    }

    #[test]
    fn test_reconcile_repairs_model_output() {
        let bids = vec![
            bid("A", &[("Hang board", 100.0), ("Cleanup", 20.0)]),
            bid("B", &[("Board installation", 90.0), ("Permits TBD", 0.0)]),
        ];
        let (a, b) = (bids[0].contractor_id, bids[1].contractor_id);
        let (a_hang, b_hang) = (bids[0].items[0].id, bids[1].items[0].id);
        let b_permits = bids[1].items[1].id;

        let json = format!(
            r#"{{"normalized_items": [
                {{"normalized_description": "Drywall hanging", "category": "board", "contractors": [
                    {{"contractor_id": "{a}", "status": "included", "item_id": "{a_hang}", "price": 1}},
                    {{"contractor_id": "{b}", "status": "included", "item_id": "{b_hang}"}}
                ]}},
                {{"normalized_description": "Duplicate", "contractors": [
                    {{"contractor_id": "{a}", "status": "included", "item_id": "{a_hang}"}}
                ]}},
                {{"normalized_description": "Permits", "contractors": [
                    {{"contractor_id": "{b}", "status": "included", "item_id": "{b_permits}"}},
                    {{"contractor_id": "{unknown}", "status": "included"}}
                ]}}
            ]}}"#,
            unknown = Uuid::new_v4()
        );
        let response: AINormalizationResponse = decode_response("normalization", &json).unwrap();
        let groups = reconcile(&bids, response);

        // Hanging, permits, then cleanup as its own group; the duplicate group is dropped.
        assert_eq!(groups.len(), 3);
        assert_eq!(groups[0].normalized_description, "Drywall hanging");
        assert!(!groups[0].is_scope_gap);
        assert_eq!(groups[0].contractors[&a].price, Some(100.0));

        assert_eq!(groups[1].contractors[&b].status, EntryStatus::Excluded);
        assert_eq!(groups[1].contractors[&a].status, EntryStatus::NotMentioned);
        assert!(groups[1].is_scope_gap);

        assert_eq!(groups[2].normalized_description, "Cleanup");
        assert_each_item_once(&bids, &groups);
    }

    #[test]
    fn test_reconcile_resolves_by_description() {
        let bids = vec![bid("A", &[("Corner bead", 40.0)])];
        let a = bids[0].contractor_id;
        let json = format!(
            r#"{{"normalized_items": [{{"normalized_description": "Corner bead", "contractors": [
                {{"contractor_id": "{a}", "status": "included", "item_id": "not-a-uuid", "original_description": "corner  bead"}}
            ]}}]}}"#
        );
        let groups = reconcile(&bids, decode_response("normalization", &json).unwrap());
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].contractors[&a].item_id, Some(bids[0].items[0].id));
    }

    #[test]
    fn test_match_rate_seven_of_ten() {
        let mut groups: Vec<NormalizedScopeItem> = (0..7)
            .map(|i| NormalizedScopeItem::new(format!("common {}", i), "general"))
            .collect();
        let mut gap = NormalizedScopeItem::new("gap", "general");
        gap.is_scope_gap = true;
        groups.push(gap);

        assert_eq!(match_rate(&groups, 10), 0.7);
        assert_eq!(match_rate(&groups, 0), 0.0);
    }

    #[tokio::test]
    async fn test_malformed_response_uses_literal_fallback() {
        let mock = crate::testing::MockCompletion::new().then_respond("{\"normalized_items\": \"oops\"}");
        let bids = vec![bid("A", &[("Hang board", 100.0)]), bid("B", &[("Hang board", 90.0)])];

        let outcome = normalize_scope(
            &mock,
            &PipelineConfig::default(),
            "drywall",
            &bids,
            &PromptAugmentation::default(),
        )
        .await
        .unwrap();

        assert!(outcome.used_fallback);
        assert_eq!(outcome.items.len(), 1);
        assert_eq!(outcome.common_items_count, 1);
        assert_eq!(outcome.match_rate, 0.5);
    }
}
