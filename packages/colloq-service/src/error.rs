use serde::Serialize;
use uuid::Uuid;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("Invalid request: {message}")]
	InvalidRequest { message: String },
	#[error("Session {session_id} is already generating.")]
	AlreadyGenerating { session_id: Uuid },
	#[error("Not found: {message}")]
	NotFound { message: String },
	#[error("Index unavailable: {message}")]
	IndexUnavailable { message: String },
	#[error("Embedding failure: {message}")]
	EmbeddingFailure { message: String },
	#[error("Stream generation failed: {message}")]
	StreamGenerationFailure { message: String },
	#[error("Persistence failure: {message}")]
	PersistenceFailure { message: String },
}
impl From<colloq_storage::Error> for Error {
	fn from(err: colloq_storage::Error) -> Self {
		match err {
			colloq_storage::Error::Sqlx(inner) =>
				Self::IndexUnavailable { message: inner.to_string() },
			colloq_storage::Error::InvalidArgument(message) => Self::InvalidRequest { message },
			colloq_storage::Error::NotFound(message) => Self::NotFound { message },
		}
	}
}

/// Which optional context block a degradation refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextBlock {
	Web,
	Rag,
	Memory,
	History,
}

/// A failure that a stage absorbed. The stage still produced a usable (possibly empty) value.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Degradation {
	#[error("Index unavailable: {message}")]
	IndexUnavailable { message: String },
	#[error("Embedding failure: {message}")]
	EmbeddingFailure { message: String },
	#[error("Retrieval degraded: {message}")]
	RetrievalDegraded { message: String },
	#[error("Rerank degraded: {message}")]
	RerankDegraded { message: String },
	#[error("Context source {block:?} unavailable: {message}")]
	ContextSourceUnavailable { block: ContextBlock, message: String },
}
