use std::{collections::HashSet, time::Duration};

use serde::Serialize;

use crate::{ColloqService, Degradation, StageOutcome};
use colloq_providers::rerank::RerankHit;
use colloq_storage::models::Candidate;

/// Position of an input document after reranking.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct RankedIndex {
	pub index: usize,
	pub score: f32,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RankedResult {
	pub candidate: Candidate,
	pub relevance_score: f32,
	/// 1-based position in the final ordering.
	pub rank: usize,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct RagSearch {
	pub results: Vec<RankedResult>,
	pub degradations: Vec<Degradation>,
}

impl ColloqService {
	/// Orders `candidates` by relevance to `query`. Never fails: on any provider problem the
	/// first `top_n` inputs come back in their original order.
	pub async fn rerank(
		&self,
		query: &str,
		candidates: &[String],
		top_n: usize,
	) -> StageOutcome<Vec<RankedIndex>> {
		if candidates.is_empty() || top_n == 0 {
			return StageOutcome::Empty;
		}
		if !self.cfg.rerank.enabled {
			return StageOutcome::Ok(identity(candidates.len(), top_n));
		}

		let cfg = &self.cfg.providers.rerank;
		let docs = &candidates[..candidates.len().min(cfg.max_documents as usize)];
		let call = self.providers.rerank.rerank(cfg, query, docs, top_n.min(docs.len()));
		let timeout = Duration::from_millis(cfg.timeout_ms);
		let message = match tokio::time::timeout(timeout, call).await {
			Ok(Ok(hits)) => {
				let ranked = sanitize(hits, docs.len(), top_n);

				if !ranked.is_empty() {
					return StageOutcome::Ok(ranked);
				}

				"Rerank provider returned no usable results.".to_string()
			},
			Ok(Err(err)) => err.to_string(),
			Err(_) => format!("Rerank timed out after {} ms.", cfg.timeout_ms),
		};

		tracing::warn!(error = %message, "Rerank failed. Keeping retrieval order.");

		StageOutcome::Degraded {
			value: identity(candidates.len(), top_n),
			reason: Degradation::RerankDegraded { message },
		}
	}

	/// Retrieval followed by rerank, returning at most `k` results.
	pub async fn rag_search(&self, query: &str, k: u32) -> RagSearch {
		let threshold = self.cfg.retrieval.similarity_threshold;
		let (candidates, retrieval_degradation) =
			self.retrieve(query, k, threshold).await.into_parts();
		let mut degradations: Vec<Degradation> = retrieval_degradation.into_iter().collect();

		if candidates.is_empty() {
			return RagSearch { results: Vec::new(), degradations };
		}

		let docs: Vec<String> =
			candidates.iter().map(|candidate| candidate.chunk.content.clone()).collect();
		let (ranked, rerank_degradation) = self.rerank(query, &docs, k as usize).await.into_parts();

		degradations.extend(rerank_degradation);

		let results = ranked
			.into_iter()
			.filter_map(|hit| candidates.get(hit.index).map(|candidate| (candidate, hit.score)))
			.take(k as usize)
			.enumerate()
			.map(|(idx, (candidate, relevance_score))| RankedResult {
				candidate: candidate.clone(),
				relevance_score,
				rank: idx + 1,
			})
			.collect();

		RagSearch { results, degradations }
	}
}

fn identity(len: usize, top_n: usize) -> Vec<RankedIndex> {
	(0..len.min(top_n)).map(|index| RankedIndex { index, score: 0.0 }).collect()
}

fn sanitize(hits: Vec<RerankHit>, len: usize, top_n: usize) -> Vec<RankedIndex> {
	let mut seen = HashSet::new();
	let mut ranked: Vec<RankedIndex> = hits
		.into_iter()
		.filter(|hit| hit.index < len && hit.relevance_score.is_finite())
		.filter(|hit| seen.insert(hit.index))
		.map(|hit| RankedIndex { index: hit.index, score: hit.relevance_score })
		.collect();

	ranked.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.index.cmp(&b.index)));
	ranked.truncate(top_n);

	ranked
}
