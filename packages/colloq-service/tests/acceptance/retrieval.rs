use std::time::Duration;

use colloq_service::{Degradation, StageOutcome};
use colloq_testkit::Harness;

use super::{FEES, HOUSING};

async fn indexed() -> Harness {
	let harness = Harness::new();

	super::ingest(&harness, "fees.md", FEES).await;
	super::ingest(&harness, "housing.md", HOUSING).await;

	harness
}

#[tokio::test]
async fn hybrid_search_returns_ranked_candidates_within_the_overfetch_limit() {
	let harness = indexed().await;
	let outcome = harness.service.retrieve("When are tuition fees due?", 1, 0.1).await;
	let rows = match outcome {
		StageOutcome::Ok(rows) => rows,
		other => panic!("Expected hybrid results, got {other:?}."),
	};

	assert!(!rows.is_empty());
	assert!(rows.len() <= 2, "Limit is overfetch_factor * k.");
	assert!(rows[0].chunk.content.to_lowercase().contains("tuition"));
	assert!(rows.iter().all(|row| row.vector_score >= 0.1 && row.keyword_score.is_some()));
	assert!(rows.windows(2).all(|pair| pair[0].combined_score >= pair[1].combined_score));
	assert_eq!(harness.index.vector_calls(), 0);
}

#[tokio::test]
async fn hybrid_failure_degrades_to_vector_search_limited_to_k() {
	let harness = indexed().await;

	harness.index.set_fail_hybrid(true);

	let outcome = harness.service.retrieve("tuition payment plan", 1, -1.0).await;
	let (value, reason) = match outcome {
		StageOutcome::Degraded { value, reason } => (value, reason),
		other => panic!("Expected a degraded outcome, got {other:?}."),
	};

	assert!(matches!(reason, Degradation::RetrievalDegraded { .. }));
	assert_eq!(value.len(), 1);
	assert_eq!(value[0].keyword_score, None);
	assert_eq!(harness.index.vector_calls(), 1);
}

#[tokio::test]
async fn hybrid_timeout_degrades_to_vector_search() {
	let harness = Harness::builder().config(|cfg| cfg.retrieval.timeout_ms = 50).build();

	super::ingest(&harness, "fees.md", FEES).await;
	harness.index.set_hybrid_delay(Duration::from_secs(2));

	let outcome = harness.service.retrieve("tuition refunds", 2, 0.0).await;

	assert!(matches!(outcome.degradation(), Some(Degradation::RetrievalDegraded { .. })));
	assert_eq!(harness.index.vector_calls(), 1);
}

#[tokio::test]
async fn failing_fallback_yields_an_empty_degraded_outcome() {
	let harness = indexed().await;

	harness.index.set_fail_hybrid(true);
	harness.index.set_fail_vector(true);

	let outcome = harness.service.retrieve("tuition", 3, 0.1).await;
	let value = match outcome {
		StageOutcome::Degraded { value, .. } => value,
		other => panic!("Expected a degraded outcome, got {other:?}."),
	};

	assert!(value.is_empty());
}

#[tokio::test]
async fn query_embedding_failure_skips_the_index() {
	let harness = indexed().await;

	harness.embedding.set_fail(true);

	let outcome = harness.service.retrieve("tuition", 3, 0.1).await;
	let (value, reason) = match outcome {
		StageOutcome::Degraded { value, reason } => (value, reason),
		other => panic!("Expected a degraded outcome, got {other:?}."),
	};

	assert!(value.is_empty());
	assert!(matches!(reason, Degradation::EmbeddingFailure { .. }));
	assert_eq!(harness.index.hybrid_calls(), 0);
}

#[tokio::test]
async fn empty_index_is_a_normal_empty_outcome() {
	let harness = Harness::new();
	let outcome = harness.service.retrieve("tuition", 3, 0.1).await;

	assert!(outcome.is_empty());
	assert_eq!(harness.index.hybrid_calls(), 1);
}

#[tokio::test]
async fn threshold_is_reapplied_to_every_row() {
	let harness = indexed().await;
	let (rows, degradation) =
		harness.service.retrieve("campus housing lottery", 5, 0.5).await.into_parts();

	assert!(degradation.is_none());
	assert!(rows.iter().all(|row| row.vector_score >= 0.5));
}
