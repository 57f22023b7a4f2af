//! End-to-end pipeline runs against the in-memory store and a scripted model.

use bid_comparison::testing::MetricsCall;
use bid_comparison::{
    AnalysisRequest, BidDocument, ComparisonError, ComparisonPipeline, ComparisonStatus,
    ComparisonStore, DocumentStatus, DocumentStore, EntryStatus, MemoryStore, MockCompletion,
    PipelineConfig, RecommendationSource, RecordingMetrics,
};
use serde_json::json;
use uuid::Uuid;

const ACME_TEXT: &str = "BID REF A-101\nAcme Interiors\nHang and finish gypsum board 12,000 SF $200,000\nFire caulking $45,000\nTotal $245,000";
const BUDGET_TEXT: &str = "BID REF B-202\nBudget Walls\nHang and finish gypsum board $218,500\nFire caulking - by others\nTotal $218,500";
const CROWN_TEXT: &str = "BID REF C-303\nCrown Drywall\nHang and finish gypsum board $227,200\nFire caulking $40,000\nTotal $267,200";

fn acme_extraction() -> String {
    json!({
        "contractor_name": "Acme Interiors",
        "base_bid_total": 245000,
        "items": [
            {
                "description": "Hang and finish gypsum board",
                "quantity": 12000, "unit": "SF",
                "total_price": 200000, "category": "drywall",
                "confidence_score": 0.95
            },
            {
                "description": "Fire caulking",
                "total_price": "$45,000", "category": "firestopping",
                "confidence_score": 0.9
            }
        ]
    })
    .to_string()
}

fn budget_extraction() -> String {
    json!({
        "contractor_name": "Budget Walls",
        "base_bid_total": 218500,
        "items": [
            {
                "description": "Hang and finish gypsum board",
                "total_price": 218500, "category": "drywall",
                "confidence_score": 0.9
            },
            {
                "description": "Fire caulking",
                "total_price": 42000, "category": "firestopping",
                "is_exclusion": true,
                "raw_text": "Fire caulking - by others",
                "confidence_score": 0.85
            }
        ],
        "exclusions": ["Fire caulking"]
    })
    .to_string()
}

fn crown_extraction() -> String {
    json!({
        "contractor_name": "Crown Drywall",
        "base_bid_total": 267200,
        "items": [
            {
                "description": "Hang and finish gypsum board",
                "total_price": 227200, "category": "drywall",
                "confidence_score": 0.9
            },
            {
                "description": "Fire caulking",
                "total_price": 40000, "category": "firestopping",
                "confidence_score": 0.9
            }
        ]
    })
    .to_string()
}

struct Project {
    id: Uuid,
    acme: Uuid,
    budget: Uuid,
    crown: Uuid,
    store: MemoryStore,
}

fn three_bids() -> Project {
    let id = Uuid::new_v4();
    let store = MemoryStore::new();
    let acme = BidDocument::new(id, "acme.pdf").with_text(ACME_TEXT);
    let budget = BidDocument::new(id, "budget.pdf").with_text(BUDGET_TEXT);
    let crown = BidDocument::new(id, "crown.pdf").with_text(CROWN_TEXT);
    let (a, b, c) = (acme.id, budget.id, crown.id);
    store.insert_document(acme);
    store.insert_document(budget);
    store.insert_document(crown);
    Project {
        id,
        acme: a,
        budget: b,
        crown: c,
        store,
    }
}

fn extracting_mock() -> MockCompletion {
    MockCompletion::new()
        .respond_when("BID REF A-101", acme_extraction())
        .respond_when("BID REF B-202", budget_extraction())
        .respond_when("BID REF C-303", crown_extraction())
}

fn model_groups(p: &Project) -> String {
    json!({
        "normalized_items": [
            {
                "normalized_description": "Gypsum board, hang and finish",
                "category": "drywall",
                "contractors": [
                    {"contractor_id": p.acme.to_string(), "status": "included", "original_description": "Hang and finish gypsum board"},
                    {"contractor_id": p.budget.to_string(), "status": "included", "original_description": "Hang and finish gypsum board"},
                    {"contractor_id": p.crown.to_string(), "status": "included", "original_description": "Hang and finish gypsum board"}
                ]
            },
            {
                "normalized_description": "Firestopping",
                "category": "firestopping",
                "contractors": [
                    {"contractor_id": p.acme.to_string(), "status": "included", "original_description": "Fire caulking"},
                    {"contractor_id": p.budget.to_string(), "status": "excluded", "original_description": "Fire caulking"},
                    {"contractor_id": p.crown.to_string(), "status": "included", "original_description": "Fire caulking"}
                ]
            }
        ]
    })
    .to_string()
}

fn model_pick(contractor: Uuid) -> String {
    json!({
        "recommended_contractor_id": contractor.to_string(),
        "confidence": "high",
        "reasoning": "Lowest cost once Budget Walls' firestopping exclusion is priced in.",
        "key_factors": [{"name": "Complete scope", "detail": "Includes firestopping"}],
        "warnings": []
    })
    .to_string()
}

#[tokio::test]
async fn lowest_true_cost_wins_over_lowest_base_bid() {
    let p = three_bids();
    let mock = extracting_mock()
        .respond_when("Match scope items across", model_groups(&p))
        .respond_when("Recommend a contractor", model_pick(p.acme));

    let pipeline = ComparisonPipeline::new(p.store, mock.clone());
    let result = pipeline
        .run(&AnalysisRequest::new(p.id, "drywall"))
        .await
        .unwrap();

    assert_eq!(result.status, ComparisonStatus::Complete);
    assert_eq!(mock.call_count(), 5);
    assert_eq!(result.contractors.len(), 3);
    assert_eq!(result.price_low, 218_500.0);
    assert_eq!(result.price_high, 267_200.0);
    assert_eq!(result.total_items, 6);
    assert_eq!(result.scope_gaps_count, 1);
    assert_eq!(result.common_items_count, 1);

    let recommendation = result.recommendation.as_ref().unwrap();
    assert_eq!(recommendation.recommended_contractor_id, Some(p.acme));
    assert_eq!(recommendation.source, RecommendationSource::Model);

    let analysis = &recommendation.price_analysis;
    assert_eq!(analysis.lowest_base_bid, 218_500.0);
    assert_eq!(analysis.lowest_base_bid_contractor, Some(p.budget));
    let budget = analysis.estimate_for(p.budget).unwrap();
    assert_eq!(budget.estimated_adds, 42_000.0);
    assert_eq!(budget.estimated_true_cost, 260_500.0);
    assert_eq!(
        analysis.estimate_for(p.acme).unwrap().estimated_true_cost,
        245_000.0
    );

    // Persisted state
    let store = pipeline.store();
    let stored = store.get_comparison(p.id).await.unwrap().unwrap();
    assert_eq!(stored, result);

    let groups = store.list_scope_items(p.id).await.unwrap();
    assert_eq!(groups.len(), 2);
    let fire = groups
        .iter()
        .find(|g| g.normalized_description == "Firestopping")
        .unwrap();
    assert!(fire.is_scope_gap);
    assert_eq!(fire.contractors[&p.budget].status, EntryStatus::Excluded);

    let acme_items = store.list_items(p.acme).await.unwrap();
    assert!(acme_items.iter().all(|i| i.normalized_category.is_some()));

    let budget_doc = store.get_document(p.budget).await.unwrap().unwrap();
    assert_eq!(budget_doc.status, DocumentStatus::Processed);
    assert_eq!(budget_doc.contractor_name, "Budget Walls");
    assert_eq!(budget_doc.base_bid_total, Some(218_500.0));
}

#[tokio::test]
async fn model_picking_a_costlier_low_bidder_is_overridden() {
    let p = three_bids();
    let mock = extracting_mock()
        .respond_when("Match scope items across", model_groups(&p))
        .respond_when("Recommend a contractor", model_pick(p.budget));

    let pipeline = ComparisonPipeline::new(p.store, mock);
    let result = pipeline
        .run(&AnalysisRequest::new(p.id, "drywall"))
        .await
        .unwrap();

    let recommendation = result.recommendation.unwrap();
    assert_eq!(recommendation.recommended_contractor_id, Some(p.acme));
    assert_eq!(recommendation.source, RecommendationSource::Deterministic);
}

#[tokio::test]
async fn malformed_model_output_falls_back_to_local_logic() {
    let p = three_bids();
    let metrics = RecordingMetrics::new();
    let mock = extracting_mock()
        .respond_when("Match scope items across", "I could not match these bids.")
        .respond_when("Recommend a contractor", "{\"recommended_contractor_id\": ");

    let pipeline = ComparisonPipeline::new(p.store, mock).with_metrics(metrics.clone());
    let result = pipeline
        .run(&AnalysisRequest::new(p.id, "drywall"))
        .await
        .unwrap();

    // Literal matching still pairs identical descriptions
    assert_eq!(result.scope_gaps_count, 1);
    assert_eq!(result.common_items_count, 1);
    assert!((result.match_rate - 1.0 / 6.0).abs() < 1e-9);

    let recommendation = result.recommendation.unwrap();
    assert_eq!(recommendation.source, RecommendationSource::Deterministic);
    assert_eq!(recommendation.recommended_contractor_id, Some(p.acme));

    let calls = metrics.calls();
    assert!(calls.iter().any(|c| matches!(c, MetricsCall::Normalization(_, m) if m.used_fallback)));
    assert!(calls.iter().any(|c| matches!(c, MetricsCall::Recommendation(_, m) if m.used_fallback)));
}

#[tokio::test]
async fn one_bad_document_does_not_sink_the_comparison() {
    let p = three_bids();
    let scanned = BidDocument::new(p.id, "scan.pdf");
    let scanned_id = scanned.id;
    p.store.insert_document(scanned);

    let metrics = RecordingMetrics::new();
    let mock = extracting_mock()
        .respond_when("Match scope items across", "not json")
        .respond_when("Recommend a contractor", "not json");

    let pipeline = ComparisonPipeline::new(p.store, mock).with_metrics(metrics.clone());
    let result = pipeline
        .run(&AnalysisRequest::new(p.id, "drywall"))
        .await
        .unwrap();

    assert_eq!(result.status, ComparisonStatus::Complete);
    assert_eq!(result.contractors.len(), 3);

    let failed = pipeline
        .store()
        .get_document(scanned_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(failed.status, DocumentStatus::Error);
    assert!(failed.error_message.unwrap().contains("no text"));

    let extraction = metrics.extraction().unwrap();
    assert_eq!(extraction.documents_total, 4);
    assert_eq!(extraction.documents_failed, 1);
    assert_eq!(extraction.total_items, 6);
}

#[tokio::test]
async fn undecodable_extraction_marks_only_that_document() {
    let p = three_bids();
    let mock = MockCompletion::new()
        .respond_when("BID REF A-101", acme_extraction())
        .respond_when("BID REF B-202", "Sorry, I can't read this bid.")
        .respond_when("BID REF C-303", crown_extraction())
        .respond_when("Match scope items across", "not json")
        .respond_when("Recommend a contractor", "not json");

    let pipeline = ComparisonPipeline::new(p.store, mock);
    let result = pipeline
        .run(&AnalysisRequest::new(p.id, "drywall"))
        .await
        .unwrap();

    assert_eq!(result.contractors.len(), 2);
    let budget = pipeline
        .store()
        .get_document(p.budget)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(budget.status, DocumentStatus::Error);
    assert!(pipeline.store().list_items(p.budget).await.unwrap().is_empty());
}

#[tokio::test]
async fn every_document_failing_is_an_error() {
    let project = Uuid::new_v4();
    let store = MemoryStore::new();
    store.insert_document(BidDocument::new(project, "a.pdf"));
    store.insert_document(BidDocument::new(project, "b.pdf"));

    let pipeline = ComparisonPipeline::new(store, MockCompletion::new());
    let err = pipeline
        .run(&AnalysisRequest::new(project, "drywall"))
        .await
        .unwrap_err();

    assert!(matches!(err, ComparisonError::Precondition(ref m) if m.contains("all 2")));
    let stored = pipeline.store().get_comparison(project).await.unwrap().unwrap();
    assert_eq!(stored.status, ComparisonStatus::Error);
}

#[tokio::test]
async fn exhausted_completion_in_normalization_fails_the_comparison() {
    let p = three_bids();
    // No rule for normalization: the empty queue answers with a
    // non-retryable failure
    let pipeline = ComparisonPipeline::new(p.store, extracting_mock());
    let err = pipeline
        .run(&AnalysisRequest::new(p.id, "drywall"))
        .await
        .unwrap_err();

    assert!(matches!(err, ComparisonError::Completion(_)));
    let stored = pipeline.store().get_comparison(p.id).await.unwrap().unwrap();
    assert_eq!(stored.status, ComparisonStatus::Error);
    assert!(stored.error_message.is_some());
}

#[tokio::test]
async fn failing_metrics_sink_is_ignored() {
    let p = three_bids();
    let metrics = RecordingMetrics::failing();
    let mock = extracting_mock()
        .respond_when("Match scope items across", model_groups(&p))
        .respond_when("Recommend a contractor", model_pick(p.acme));

    let pipeline = ComparisonPipeline::new(p.store, mock).with_metrics(metrics.clone());
    let result = pipeline
        .run(&AnalysisRequest::new(p.id, "drywall"))
        .await
        .unwrap();

    assert_eq!(result.status, ComparisonStatus::Complete);
    let calls = metrics.calls();
    assert_eq!(calls.len(), 4);
    assert_eq!(calls.last(), Some(&MetricsCall::Flush));
}

#[tokio::test]
async fn concurrent_extraction_matches_sequential() {
    let p = three_bids();
    let mock = extracting_mock()
        .respond_when("Match scope items across", "not json")
        .respond_when("Recommend a contractor", "not json");

    let pipeline = ComparisonPipeline::new(p.store, mock)
        .with_config(PipelineConfig::default().with_concurrency(3));
    let result = pipeline
        .run(&AnalysisRequest::new(p.id, "drywall"))
        .await
        .unwrap();

    // Contractor order follows upload order regardless of completion order
    let ids: Vec<Uuid> = result.contractors.iter().map(|c| c.contractor_id).collect();
    assert_eq!(ids, vec![p.acme, p.budget, p.crown]);
    assert_eq!(
        result.recommendation.unwrap().recommended_contractor_id,
        Some(p.acme)
    );
}
