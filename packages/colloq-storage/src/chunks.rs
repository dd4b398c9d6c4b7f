use sqlx::PgExecutor;

use crate::{
	Error, Result,
	models::{Candidate, CandidateRow, HybridQuery, NewChunk, VectorQuery},
};

/// Returns `true` when the row was written and `false` when `(source_id, sequence_no)` or the
/// chunk id already existed.
pub async fn insert_chunk<'e, E>(executor: E, chunk: &NewChunk) -> Result<bool>
where
	E: PgExecutor<'e>,
{
	let vec_text = vector_to_pg(&chunk.embedding);
	let metadata = serde_json::to_value(&chunk.metadata)
		.map_err(|err| Error::InvalidArgument(format!("Chunk metadata is not JSON: {err}.")))?;
	let result = sqlx::query(
		"\
INSERT INTO document_chunks (
\tchunk_id,
\tsource_id,
\tsequence_no,
\tcontent,
\tcontent_hash,
\tkeywords,
\tmetadata,
\tembedding
)
VALUES ($1,$2,$3,$4,$5,$6,$7,$8::text::vector)
ON CONFLICT DO NOTHING",
	)
	.bind(chunk.chunk_id)
	.bind(chunk.source_id.as_str())
	.bind(chunk.sequence_no)
	.bind(chunk.content.as_str())
	.bind(chunk.content_hash.as_str())
	.bind(chunk.metadata.keywords.as_str())
	.bind(metadata)
	.bind(vec_text.as_str())
	.execute(executor)
	.await?;

	Ok(result.rows_affected() > 0)
}

pub async fn has_source<'e, E>(executor: E, source_id: &str) -> Result<bool>
where
	E: PgExecutor<'e>,
{
	let exists: bool = sqlx::query_scalar(
		"SELECT EXISTS (SELECT 1 FROM document_chunks WHERE source_id = $1)",
	)
	.bind(source_id)
	.fetch_one(executor)
	.await?;

	Ok(exists)
}

pub async fn sequence_numbers<'e, E>(executor: E, source_id: &str) -> Result<Vec<i32>>
where
	E: PgExecutor<'e>,
{
	let rows: Vec<i32> = sqlx::query_scalar(
		"SELECT sequence_no FROM document_chunks WHERE source_id = $1 ORDER BY sequence_no",
	)
	.bind(source_id)
	.fetch_all(executor)
	.await?;

	Ok(rows)
}

pub async fn delete_source<'e, E>(executor: E, source_id: &str) -> Result<u64>
where
	E: PgExecutor<'e>,
{
	let result = sqlx::query("DELETE FROM document_chunks WHERE source_id = $1")
		.bind(source_id)
		.execute(executor)
		.await?;

	Ok(result.rows_affected())
}

/// Scores every chunk by cosine similarity and full-text rank in one statement.
///
/// `ts_rank_cd` uses normalization 32 (`rank / (rank + 1)`) so the keyword score stays in
/// `[0, 1)` next to the similarity.
pub async fn hybrid_search<'e, E>(executor: E, query: &HybridQuery) -> Result<Vec<Candidate>>
where
	E: PgExecutor<'e>,
{
	let vec_text = vector_to_pg(&query.embedding);
	let rows = sqlx::query_as::<_, CandidateRow>(
		"\
WITH scored AS (
\tSELECT
\t\tchunk_id,
\t\tsource_id,
\t\tsequence_no,
\t\tcontent,
\t\tmetadata,
\t\t(1 - (embedding <=> $1::text::vector))::real AS vector_score,
\t\tts_rank_cd(search_tsv, websearch_to_tsquery('english', $2), 32)::real AS keyword_score
\tFROM document_chunks
)
SELECT
\tchunk_id,
\tsource_id,
\tsequence_no,
\tcontent,
\tmetadata,
\tvector_score,
\tkeyword_score,
\t($4::real * vector_score + $5::real * keyword_score)::real AS combined_score
FROM scored
WHERE vector_score >= $3::real
ORDER BY combined_score DESC, chunk_id
LIMIT $6",
	)
	.bind(vec_text.as_str())
	.bind(query.query_text.as_str())
	.bind(query.similarity_threshold)
	.bind(query.vector_weight)
	.bind(query.keyword_weight)
	.bind(i64::from(query.limit))
	.fetch_all(executor)
	.await?;

	Ok(rows.into_iter().map(Candidate::from).collect())
}

pub async fn vector_search<'e, E>(executor: E, query: &VectorQuery) -> Result<Vec<Candidate>>
where
	E: PgExecutor<'e>,
{
	let vec_text = vector_to_pg(&query.embedding);
	let rows = sqlx::query_as::<_, CandidateRow>(
		"\
SELECT
\tchunk_id,
\tsource_id,
\tsequence_no,
\tcontent,
\tmetadata,
\t(1 - (embedding <=> $1::text::vector))::real AS vector_score,
\tNULL::real AS keyword_score,
\t(1 - (embedding <=> $1::text::vector))::real AS combined_score
FROM document_chunks
WHERE (1 - (embedding <=> $1::text::vector)) >= $2::real
ORDER BY embedding <=> $1::text::vector, chunk_id
LIMIT $3",
	)
	.bind(vec_text.as_str())
	.bind(query.similarity_threshold)
	.bind(i64::from(query.limit))
	.fetch_all(executor)
	.await?;

	Ok(rows.into_iter().map(Candidate::from).collect())
}

pub fn vector_to_pg(vec: &[f32]) -> String {
	let mut out = String::with_capacity(vec.len() * 8);

	out.push('[');

	for (i, value) in vec.iter().enumerate() {
		if i > 0 {
			out.push(',');
		}

		out.push_str(&value.to_string());
	}

	out.push(']');

	out
}
