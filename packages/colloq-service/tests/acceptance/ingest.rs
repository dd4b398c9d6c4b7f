use colloq_chunking::ChunkingConfig;
use colloq_service::{Error, IngestMode, IngestRequest, SourceMetadata, ingest::chunk_id};
use colloq_testkit::{Harness, fakes::HashEmbedding};

use super::{FEES, HOUSING};

fn request(source_id: &str, raw_text: &str, mode: IngestMode) -> IngestRequest {
	IngestRequest {
		source_id: source_id.to_string(),
		raw_text: raw_text.to_string(),
		metadata: SourceMetadata::default(),
		mode,
	}
}

fn expected_chunks(harness: &Harness, raw_text: &str) -> usize {
	let cfg = &harness.service.cfg.chunking;

	colloq_chunking::split_text(raw_text, &ChunkingConfig {
		max_chars: cfg.max_chars,
		overlap_chars: cfg.overlap_chars,
	})
	.len()
}

#[tokio::test]
async fn ingest_writes_enriched_content_addressed_chunks() {
	let harness = Harness::new();
	let source_id = "finance/tuition_2024.md";
	let report = super::ingest(&harness, source_id, FEES).await;
	let chunks = harness.index.source_chunks(source_id);

	assert!(!report.skipped);
	assert_eq!(report.chunks_written as usize, expected_chunks(&harness, FEES));
	assert_eq!(report.chunks_failed, 0);
	assert_eq!(chunks.len(), report.chunks_written as usize);

	for (idx, chunk) in chunks.iter().enumerate() {
		assert_eq!(chunk.sequence_no, idx as i32);
		assert_eq!(chunk.chunk_id, chunk_id(source_id, chunk.sequence_no, &chunk.content));
		assert_eq!(chunk.embedding.len(), Harness::DIM as usize);
		assert_eq!(chunk.metadata.source_name, source_id);
		assert_eq!(chunk.metadata.year, Some(2024));
		assert_eq!(chunk.metadata.department.as_deref(), Some("finance"));
		assert!(chunk.metadata.keywords.split(' ').any(|term| term == "tuition"));
		assert!(chunk.content.chars().count() <= harness.service.cfg.chunking.max_chars as usize);
	}
}

#[tokio::test]
async fn explicit_metadata_overrides_enrichment() {
	let harness = Harness::new();
	let report = harness
		.service
		.ingest(IngestRequest {
			source_id: "finance/tuition_2024.md".to_string(),
			raw_text: FEES.to_string(),
			metadata: SourceMetadata {
				source_name: Some("Fee handbook".to_string()),
				year: Some(2019),
				department: Some("bursar".to_string()),
				keywords: Some("fees handbook".to_string()),
				extra: serde_json::json!({ "owner": "bursar office" }),
			},
			mode: IngestMode::SkipExisting,
		})
		.await
		.expect("Ingest failed.");

	assert!(report.chunks_written > 0);

	for chunk in harness.index.source_chunks("finance/tuition_2024.md") {
		assert_eq!(chunk.metadata.source_name, "Fee handbook");
		assert_eq!(chunk.metadata.year, Some(2019));
		assert_eq!(chunk.metadata.department.as_deref(), Some("bursar"));
		assert_eq!(chunk.metadata.keywords, "fees handbook");
		assert_eq!(chunk.metadata.extra["owner"], "bursar office");
	}
}

#[tokio::test]
async fn skip_existing_leaves_indexed_sources_alone() {
	let harness = Harness::new();

	super::ingest(&harness, "housing.md", HOUSING).await;

	let calls = harness.embedding.calls();
	let report = super::ingest(&harness, "housing.md", "Completely different text.").await;

	assert!(report.skipped);
	assert_eq!(report.chunks_written, 0);
	assert_eq!(harness.embedding.calls(), calls);
	assert!(harness.index.source_chunks("housing.md")[0].content.contains("Campus housing"));
}

#[tokio::test]
async fn force_replaces_every_chunk_of_the_source() {
	let harness = Harness::new();

	super::ingest(&harness, "housing.md", HOUSING).await;
	super::ingest(&harness, "fees.md", FEES).await;

	let report = harness
		.service
		.ingest(request("housing.md", "Housing moved to a new portal.", IngestMode::Force))
		.await
		.expect("Ingest failed.");
	let chunks = harness.index.source_chunks("housing.md");

	assert_eq!(report.chunks_written, 1);
	assert_eq!(chunks.len(), 1);
	assert_eq!(chunks[0].content, "Housing moved to a new portal.");
	assert_eq!(harness.index.source_chunks("fees.md").len(), expected_chunks(&harness, FEES));
}

#[tokio::test]
async fn embedding_failures_skip_chunks_and_resume_fills_the_gaps() {
	let harness = Harness::new();
	let total = expected_chunks(&harness, FEES);

	assert!(total > 1, "Fixture must span several chunks.");

	harness.embedding.fail_when_contains(Some("Refunds"));

	let first = super::ingest(&harness, "fees.md", FEES).await;

	assert!(first.chunks_failed >= 1);
	assert_eq!((first.chunks_written + first.chunks_failed) as usize, total);

	harness.embedding.fail_when_contains(None);

	let resumed = harness
		.service
		.ingest(request("fees.md", FEES, IngestMode::Resume))
		.await
		.expect("Ingest failed.");

	assert_eq!(resumed.chunks_written, first.chunks_failed);
	assert_eq!(resumed.chunks_existing, first.chunks_written);
	assert_eq!(resumed.chunks_failed, 0);
	assert_eq!(harness.index.source_chunks("fees.md").len(), total);
}

#[tokio::test]
async fn dimension_mismatch_and_write_failures_are_counted_not_raised() {
	let harness = Harness::builder().embedding(HashEmbedding::new(8)).build();
	let report = super::ingest(&harness, "fees.md", FEES).await;

	assert_eq!(report.chunks_written, 0);
	assert_eq!(report.chunks_failed as usize, expected_chunks(&harness, FEES));

	let harness = Harness::new();

	harness.index.set_fail_writes(true);

	let report = super::ingest(&harness, "fees.md", FEES).await;

	assert_eq!(report.chunks_written, 0);
	assert_eq!(report.chunks_failed as usize, expected_chunks(&harness, FEES));
	assert!(harness.index.chunks().is_empty());
}

#[tokio::test]
async fn blank_source_id_is_rejected() {
	let harness = Harness::new();
	let err = harness
		.service
		.ingest(request("  ", FEES, IngestMode::Force))
		.await
		.expect_err("Blank source_id must be rejected.");

	assert!(matches!(err, Error::InvalidRequest { .. }));
}
