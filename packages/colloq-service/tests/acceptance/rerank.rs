use std::time::Duration;

use colloq_providers::rerank::RerankHit;
use colloq_service::{Degradation, RankedIndex, StageOutcome};
use colloq_testkit::{Harness, fakes::RerankScript};

use super::{FEES, HOUSING};

fn docs(count: usize) -> Vec<String> {
	(0..count).map(|idx| format!("Document number {idx}.")).collect()
}

fn indices(ranked: &[RankedIndex]) -> Vec<usize> {
	ranked.iter().map(|ranked| ranked.index).collect()
}

#[tokio::test]
async fn provider_order_is_sorted_by_score_and_cut_to_top_n() {
	let harness = Harness::new();
	let outcome = harness.service.rerank("tuition", &docs(4), 3).await;
	let ranked = match outcome {
		StageOutcome::Ok(ranked) => ranked,
		other => panic!("Expected reranked results, got {other:?}."),
	};

	assert_eq!(indices(&ranked), vec![3, 2, 1]);
	assert!(ranked.windows(2).all(|pair| pair[0].score >= pair[1].score));
}

#[tokio::test]
async fn invalid_and_duplicate_indices_are_dropped() {
	let harness = Harness::builder()
		.rerank(RerankScript::Hits(vec![
			RerankHit { index: 9, relevance_score: 0.99 },
			RerankHit { index: 1, relevance_score: 0.8 },
			RerankHit { index: 1, relevance_score: 0.7 },
			RerankHit { index: 0, relevance_score: 0.2 },
		]))
		.build();
	let (ranked, degradation) = harness.service.rerank("q", &docs(3), 3).await.into_parts();

	assert!(degradation.is_none());
	assert_eq!(ranked, vec![
		RankedIndex { index: 1, score: 0.8 },
		RankedIndex { index: 0, score: 0.2 },
	]);
}

#[tokio::test]
async fn provider_failure_keeps_original_order_with_zero_scores() {
	let harness = Harness::builder().rerank(RerankScript::Fail).build();
	let outcome = harness.service.rerank("q", &docs(5), 2).await;
	let (ranked, reason) = match outcome {
		StageOutcome::Degraded { value, reason } => (value, reason),
		other => panic!("Expected a degraded outcome, got {other:?}."),
	};

	assert!(matches!(reason, Degradation::RerankDegraded { .. }));
	assert_eq!(ranked, vec![
		RankedIndex { index: 0, score: 0.0 },
		RankedIndex { index: 1, score: 0.0 },
	]);
}

#[tokio::test]
async fn unusable_results_and_timeouts_degrade_to_identity() {
	let harness = Harness::builder()
		.rerank(RerankScript::Hits(vec![RerankHit { index: 42, relevance_score: 0.9 }]))
		.build();
	let outcome = harness.service.rerank("q", &docs(2), 2).await;

	assert!(outcome.is_degraded());

	let harness = Harness::builder()
		.rerank(RerankScript::Delay(Duration::from_secs(2)))
		.config(|cfg| cfg.providers.rerank.timeout_ms = 50)
		.build();
	let (ranked, degradation) = harness.service.rerank("q", &docs(2), 2).await.into_parts();

	assert!(matches!(degradation, Some(Degradation::RerankDegraded { .. })));
	assert_eq!(indices(&ranked), vec![0, 1]);
}

#[tokio::test]
async fn disabled_rerank_is_identity_without_a_provider_call() {
	let harness = Harness::builder().config(|cfg| cfg.rerank.enabled = false).build();
	let outcome = harness.service.rerank("q", &docs(3), 2).await;

	assert_eq!(outcome, StageOutcome::Ok(vec![
		RankedIndex { index: 0, score: 0.0 },
		RankedIndex { index: 1, score: 0.0 },
	]));
	assert!(harness.rerank.batch_sizes().is_empty());
}

#[tokio::test]
async fn input_is_capped_at_the_provider_batch_limit() {
	let harness =
		Harness::builder().config(|cfg| cfg.providers.rerank.max_documents = 2).build();
	let (ranked, _) = harness.service.rerank("q", &docs(5), 5).await.into_parts();

	assert_eq!(harness.rerank.batch_sizes(), vec![2]);
	assert!(ranked.iter().all(|ranked| ranked.index < 2));
}

#[tokio::test]
async fn empty_input_is_empty() {
	let harness = Harness::new();

	assert!(harness.service.rerank("q", &[], 3).await.is_empty());
	assert!(harness.rerank.batch_sizes().is_empty());
}

#[tokio::test]
async fn rag_search_attaches_candidates_to_ranks() {
	let harness = Harness::new();

	super::ingest(&harness, "fees.md", FEES).await;
	super::ingest(&harness, "housing.md", HOUSING).await;

	let search = harness.service.rag_search("tuition fees", 2).await;

	assert!(search.degradations.is_empty());
	assert!(!search.results.is_empty() && search.results.len() <= 2);

	for (idx, result) in search.results.iter().enumerate() {
		assert_eq!(result.rank, idx + 1);
		assert!(!result.candidate.chunk.content.is_empty());
	}

	assert!(
		search
			.results
			.windows(2)
			.all(|pair| pair[0].relevance_score >= pair[1].relevance_score)
	);
}

#[tokio::test]
async fn rag_search_reports_stage_degradations() {
	let harness = Harness::builder()
		.rerank(RerankScript::Fail)
		.config(|cfg| cfg.retrieval.similarity_threshold = -1.0)
		.build();

	super::ingest(&harness, "fees.md", FEES).await;
	harness.index.set_fail_hybrid(true);

	let search = harness.service.rag_search("tuition", 2).await;

	assert_eq!(search.degradations.len(), 2);
	assert!(matches!(search.degradations[0], Degradation::RetrievalDegraded { .. }));
	assert!(matches!(search.degradations[1], Degradation::RerankDegraded { .. }));
	assert!(search.results.iter().all(|result| result.relevance_score == 0.0));
}
