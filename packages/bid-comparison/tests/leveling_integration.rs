//! Baseline edits over a completed comparison.

use bid_comparison::{
    AnalysisRequest, BaselineStore, BidDocument, ComparisonPipeline, LevelingError,
    LevelingService, MemoryStore, MockCompletion,
};
use serde_json::json;
use uuid::Uuid;

fn board(quantity: f64, unit_price: f64) -> String {
    json!({
        "items": [
            {
                "description": "Hang board",
                "quantity": quantity, "unit": "SF", "unit_price": unit_price,
                "total_price": quantity * unit_price,
                "confidence_score": 0.9
            },
            {
                "description": "Cleanup",
                "total_price": 1000,
                "confidence_score": 0.9
            }
        ]
    })
    .to_string()
}

struct Compared {
    project: Uuid,
    full: Uuid,
    short: Uuid,
    service: LevelingService<MemoryStore>,
}

/// "Full Scope" bids 10,000 SF at $2.00; "Short Count" bids 8,000 SF at $2.20.
async fn compared() -> Compared {
    let project = Uuid::new_v4();
    let store = MemoryStore::new();
    let full = BidDocument::new(project, "Full Scope").with_text("FULL SCOPE BID");
    let short = BidDocument::new(project, "Short Count").with_text("SHORT COUNT BID");
    let (full_id, short_id) = (full.id, short.id);
    store.insert_document(full);
    store.insert_document(short);

    let mock = MockCompletion::new()
        .respond_when("FULL SCOPE BID", board(10_000.0, 2.0))
        .respond_when("SHORT COUNT BID", board(8_000.0, 2.2))
        .respond_when("Match scope items across", "not json")
        .respond_when("Recommend a contractor", "not json");

    let pipeline = ComparisonPipeline::new(store, mock);
    pipeline
        .run(&AnalysisRequest::new(project, "drywall"))
        .await
        .unwrap();

    Compared {
        project,
        full: full_id,
        short: short_id,
        service: LevelingService::new(pipeline.into_store()),
    }
}

#[tokio::test]
async fn baseline_quantity_changes_ranking() {
    let c = compared().await;

    let before = c.service.recompute(c.project).await.unwrap();
    assert_eq!(before.as_bid_ranking, vec![c.short, c.full]);
    assert!(!before.ranking_changed);

    let report = c
        .service
        .set_baseline(c.project, "Hang board", c.full, Some(10_000.0), Some("SF".into()))
        .await
        .unwrap();

    let short = report.totals_for(c.short).unwrap();
    assert!((short.as_bid_total - 18_600.0).abs() < 1e-6);
    assert!((short.leveled_total - 23_000.0).abs() < 1e-6);
    assert_eq!(short.leveled_items, 1);

    let full = report.totals_for(c.full).unwrap();
    assert!((full.leveled_total - full.as_bid_total).abs() < 1e-6);

    assert_eq!(report.leveled_ranking, vec![c.full, c.short]);
    assert!(report.ranking_changed);

    // Totals are persisted for the summary view
    let stored = c.service.store().leveled_totals(c.project);
    assert_eq!(stored, report.totals);
}

#[tokio::test]
async fn clearing_restores_as_bid_totals() {
    let c = compared().await;
    c.service
        .set_baseline(c.project, "Hang board", c.full, Some(10_000.0), None)
        .await
        .unwrap();

    let report = c.service.clear_baseline(c.project, "hang board").await.unwrap();
    assert!(!report.ranking_changed);
    for totals in &report.totals {
        assert_eq!(totals.leveled_total, totals.as_bid_total);
        assert_eq!(totals.leveled_items, 0);
    }
    assert!(c
        .service
        .store()
        .load_baselines(c.project)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn stale_editor_gets_a_version_conflict() {
    let c = compared().await;

    // Both reviewers loaded version 0
    c.service
        .set_baseline_at(c.project, "Hang board", c.full, Some(10_000.0), None, 0)
        .await
        .unwrap();
    let err = c
        .service
        .set_baseline_at(c.project, "Hang board", c.short, Some(8_000.0), None, 0)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        LevelingError::VersionConflict {
            expected: 0,
            found: 1
        }
    ));
    let stored = c.service.store().load_baselines(c.project).await.unwrap();
    assert_eq!(stored.get("hang board").unwrap().contractor_id, c.full);
}

#[tokio::test]
async fn invalid_quantities_are_rejected_without_saving() {
    let c = compared().await;

    for quantity in [None, Some(0.0), Some(-5.0), Some(f64::NAN)] {
        let err = c
            .service
            .set_baseline(c.project, "Hang board", c.full, quantity, None)
            .await
            .unwrap_err();
        assert!(matches!(err, LevelingError::InvalidBaseline { .. }));
    }

    let stored = c.service.store().load_baselines(c.project).await.unwrap();
    assert_eq!(stored.version(), 0);
}
