use std::time::Duration;

use crate::{ColloqService, Degradation, StageOutcome};
use colloq_storage::models::{Candidate, HybridQuery, VectorQuery};

impl ColloqService {
	/// Hybrid vector + keyword search, falling back to vector-only search when the primary
	/// path fails or times out. Returns at most `overfetch_factor * k` candidates.
	pub async fn retrieve(
		&self,
		query: &str,
		k: u32,
		similarity_threshold: f32,
	) -> StageOutcome<Vec<Candidate>> {
		let cfg = &self.cfg.retrieval;
		let limit = k.saturating_mul(cfg.overfetch_factor);

		if limit == 0 {
			return StageOutcome::Empty;
		}

		let embedding = match self.embed_query(query).await {
			Ok(embedding) => embedding,
			Err(reason) => {
				tracing::warn!(error = %reason, "Query embedding failed. Returning no candidates.");

				return StageOutcome::Degraded { value: Vec::new(), reason };
			},
		};
		let timeout = Duration::from_millis(cfg.timeout_ms);
		let hybrid = HybridQuery {
			embedding,
			query_text: query.to_string(),
			similarity_threshold,
			limit,
			vector_weight: cfg.vector_weight,
			keyword_weight: cfg.keyword_weight,
		};
		let primary = match tokio::time::timeout(timeout, self.stores.index.hybrid_search(&hybrid))
			.await
		{
			Ok(Ok(rows)) => Ok(rows),
			Ok(Err(err)) => Err(err.to_string()),
			Err(_) => Err(format!("Hybrid search timed out after {} ms.", cfg.timeout_ms)),
		};

		match primary {
			Ok(rows) => finish(rows, similarity_threshold, limit as usize, None),
			Err(message) => {
				tracing::warn!(
					error = %message,
					"Hybrid search failed. Falling back to vector search."
				);

				let reason = Degradation::RetrievalDegraded { message };
				let fallback =
					VectorQuery { embedding: hybrid.embedding, similarity_threshold, limit: k };

				match tokio::time::timeout(timeout, self.stores.index.vector_search(&fallback))
					.await
				{
					Ok(Ok(rows)) => finish(rows, similarity_threshold, k as usize, Some(reason)),
					Ok(Err(err)) => {
						tracing::warn!(error = %err, "Vector fallback failed.");

						StageOutcome::Degraded { value: Vec::new(), reason }
					},
					Err(_) => {
						tracing::warn!("Vector fallback timed out.");

						StageOutcome::Degraded { value: Vec::new(), reason }
					},
				}
			},
		}
	}

	async fn embed_query(&self, query: &str) -> Result<Vec<f32>, Degradation> {
		let cfg = &self.cfg.providers.embedding;
		let texts = [query.to_string()];
		let vectors = self
			.providers
			.embedding
			.embed(cfg, &texts)
			.await
			.map_err(|err| Degradation::EmbeddingFailure { message: err.to_string() })?;
		let embedding = vectors.into_iter().next().ok_or_else(|| Degradation::EmbeddingFailure {
			message: "Embedding provider returned no vectors.".to_string(),
		})?;

		if embedding.len() != self.cfg.storage.index.vector_dim as usize {
			return Err(Degradation::EmbeddingFailure {
				message: format!(
					"Query embedding has {} dimensions, expected {}.",
					embedding.len(),
					self.cfg.storage.index.vector_dim
				),
			});
		}

		Ok(embedding)
	}
}

fn finish(
	mut rows: Vec<Candidate>,
	similarity_threshold: f32,
	limit: usize,
	degraded: Option<Degradation>,
) -> StageOutcome<Vec<Candidate>> {
	rows.retain(|row| row.vector_score >= similarity_threshold);
	rows.truncate(limit);

	match degraded {
		Some(reason) => StageOutcome::Degraded { value: rows, reason },
		None if rows.is_empty() => StageOutcome::Empty,
		None => StageOutcome::Ok(rows),
	}
}
