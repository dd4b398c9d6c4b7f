use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::{ColloqService, Degradation, Error, Result};
use colloq_chunking::{Chunk, ChunkingConfig};
use colloq_storage::models::{ChunkMetadata, NewChunk};

/// How ingestion treats a source that already has chunks.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestMode {
	/// Leave the source untouched if any chunk exists.
	#[default]
	SkipExisting,
	/// Delete the source's chunks and ingest from scratch.
	Force,
	/// Write only the sequence numbers that are still missing.
	Resume,
}

/// Caller-supplied metadata. Present fields override what enrichment derives.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct SourceMetadata {
	pub source_name: Option<String>,
	pub year: Option<i32>,
	pub department: Option<String>,
	pub keywords: Option<String>,
	pub extra: Value,
}

#[derive(Clone, Debug, Deserialize)]
pub struct IngestRequest {
	pub source_id: String,
	pub raw_text: String,
	#[serde(default)]
	pub metadata: SourceMetadata,
	#[serde(default)]
	pub mode: IngestMode,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
	pub source_id: String,
	pub chunks_written: u32,
	/// Chunks already present in the index, left as they were.
	pub chunks_existing: u32,
	pub chunks_failed: u32,
	pub skipped: bool,
}

impl ColloqService {
	pub async fn ingest(&self, req: IngestRequest) -> Result<IngestReport> {
		let source_id = req.source_id.trim().to_string();

		if source_id.is_empty() {
			return Err(Error::InvalidRequest {
				message: "source_id must be non-empty.".to_string(),
			});
		}

		let mut report = IngestReport { source_id: source_id.clone(), ..Default::default() };
		let index = &self.stores.index;
		let existing: HashSet<i32> = match req.mode {
			IngestMode::SkipExisting => {
				if index.has_source(&source_id).await? {
					tracing::info!(source_id = %source_id, "Source already indexed. Skipping.");

					report.skipped = true;

					return Ok(report);
				}

				HashSet::new()
			},
			IngestMode::Force => {
				let deleted = index.delete_source(&source_id).await?;

				tracing::info!(source_id = %source_id, deleted, "Cleared source before re-ingest.");

				HashSet::new()
			},
			IngestMode::Resume => index.sequence_numbers(&source_id).await?.into_iter().collect(),
		};
		let chunks = colloq_chunking::split_text(&req.raw_text, &ChunkingConfig {
			max_chars: self.cfg.chunking.max_chars,
			overlap_chars: self.cfg.chunking.overlap_chars,
		});
		let metadata = self.source_metadata(&source_id, &req.raw_text, req.metadata);

		for chunk in chunks {
			if existing.contains(&chunk.chunk_index) {
				report.chunks_existing += 1;

				continue;
			}

			match self.index_chunk(&source_id, &chunk, &metadata).await {
				Ok(true) => report.chunks_written += 1,
				Ok(false) => report.chunks_existing += 1,
				Err(reason) => {
					tracing::warn!(
						source_id = %source_id,
						sequence_no = chunk.chunk_index,
						error = %reason,
						"Skipping chunk."
					);

					report.chunks_failed += 1;
				},
			}
		}

		tracing::info!(
			source_id = %source_id,
			written = report.chunks_written,
			existing = report.chunks_existing,
			failed = report.chunks_failed,
			"Source ingested."
		);

		Ok(report)
	}

	fn source_metadata(
		&self,
		source_id: &str,
		raw_text: &str,
		explicit: SourceMetadata,
	) -> ChunkMetadata {
		let source_name = explicit
			.source_name
			.filter(|name| !name.trim().is_empty())
			.unwrap_or_else(|| source_id.to_string());
		let derived = colloq_chunking::enrich(
			&source_name,
			raw_text,
			&self.cfg.indexer.departments,
			self.cfg.indexer.max_keywords as usize,
		);

		ChunkMetadata {
			year: explicit.year.or(derived.year),
			department: explicit.department.or(derived.department),
			keywords: explicit.keywords.unwrap_or(derived.keywords),
			extra: explicit.extra,
			source_name,
		}
	}

	async fn index_chunk(
		&self,
		source_id: &str,
		chunk: &Chunk,
		metadata: &ChunkMetadata,
	) -> std::result::Result<bool, Degradation> {
		let embedding_cfg = &self.cfg.providers.embedding;
		let vectors = self
			.providers
			.embedding
			.embed(embedding_cfg, std::slice::from_ref(&chunk.text))
			.await
			.map_err(|err| Degradation::EmbeddingFailure { message: err.to_string() })?;
		let Some(embedding) = vectors.into_iter().next() else {
			return Err(Degradation::EmbeddingFailure {
				message: "Embedding provider returned no vectors.".to_string(),
			});
		};

		if embedding.len() != self.cfg.storage.index.vector_dim as usize {
			return Err(Degradation::EmbeddingFailure {
				message: format!(
					"Embedding has {} dimensions, expected {}.",
					embedding.len(),
					self.cfg.storage.index.vector_dim
				),
			});
		}

		let new_chunk = NewChunk {
			chunk_id: chunk_id(source_id, chunk.chunk_index, &chunk.text),
			source_id: source_id.to_string(),
			sequence_no: chunk.chunk_index,
			content: chunk.text.clone(),
			content_hash: blake3::hash(chunk.text.as_bytes()).to_hex().to_string(),
			embedding,
			metadata: metadata.clone(),
		};

		self.stores
			.index
			.insert_chunk(&new_chunk)
			.await
			.map_err(|err| Degradation::IndexUnavailable { message: err.to_string() })
	}
}

/// Content-addressed chunk id: the same source, position and text always map to the same id.
pub fn chunk_id(source_id: &str, sequence_no: i32, content: &str) -> Uuid {
	let mut hasher = blake3::Hasher::new();

	hasher.update(source_id.as_bytes());
	hasher.update(&[0]);
	hasher.update(&sequence_no.to_le_bytes());
	hasher.update(&[0]);
	hasher.update(content.as_bytes());

	Uuid::new_v5(&Uuid::NAMESPACE_OID, hasher.finalize().as_bytes())
}
