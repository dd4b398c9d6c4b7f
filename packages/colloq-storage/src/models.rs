use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::types::Json;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::Error;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
	pub source_name: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub year: Option<i32>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub department: Option<String>,
	#[serde(default)]
	pub keywords: String,
	/// Caller-supplied fields carried through untouched.
	#[serde(default, skip_serializing_if = "Value::is_null")]
	pub extra: Value,
}

/// A chunk ready to be written, embedding included.
#[derive(Clone, Debug)]
pub struct NewChunk {
	pub chunk_id: Uuid,
	pub source_id: String,
	pub sequence_no: i32,
	pub content: String,
	pub content_hash: String,
	pub embedding: Vec<f32>,
	pub metadata: ChunkMetadata,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StoredChunk {
	pub chunk_id: Uuid,
	pub source_id: String,
	pub sequence_no: i32,
	pub content: String,
	pub metadata: ChunkMetadata,
}

/// A retrieval hit. `keyword_score` is absent when the hit came from the vector-only path.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Candidate {
	pub chunk: StoredChunk,
	pub vector_score: f32,
	pub keyword_score: Option<f32>,
	pub combined_score: f32,
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct CandidateRow {
	pub(crate) chunk_id: Uuid,
	pub(crate) source_id: String,
	pub(crate) sequence_no: i32,
	pub(crate) content: String,
	pub(crate) metadata: Json<ChunkMetadata>,
	pub(crate) vector_score: f32,
	pub(crate) keyword_score: Option<f32>,
	pub(crate) combined_score: f32,
}
impl From<CandidateRow> for Candidate {
	fn from(row: CandidateRow) -> Self {
		Self {
			chunk: StoredChunk {
				chunk_id: row.chunk_id,
				source_id: row.source_id,
				sequence_no: row.sequence_no,
				content: row.content,
				metadata: row.metadata.0,
			},
			vector_score: row.vector_score,
			keyword_score: row.keyword_score,
			combined_score: row.combined_score,
		}
	}
}

#[derive(Clone, Debug)]
pub struct HybridQuery {
	pub embedding: Vec<f32>,
	pub query_text: String,
	pub similarity_threshold: f32,
	pub limit: u32,
	pub vector_weight: f32,
	pub keyword_weight: f32,
}

#[derive(Clone, Debug)]
pub struct VectorQuery {
	pub embedding: Vec<f32>,
	pub similarity_threshold: f32,
	pub limit: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
	User,
	Assistant,
	System,
}
impl TurnRole {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::User => "user",
			Self::Assistant => "assistant",
			Self::System => "system",
		}
	}
}
impl fmt::Display for TurnRole {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}
impl FromStr for TurnRole {
	type Err = Error;

	fn from_str(raw: &str) -> Result<Self, Self::Err> {
		match raw {
			"user" => Ok(Self::User),
			"assistant" => Ok(Self::Assistant),
			"system" => Ok(Self::System),
			other => Err(Error::InvalidArgument(format!("Unknown turn role {other:?}."))),
		}
	}
}

#[derive(Clone, Debug, PartialEq)]
pub struct ChatTurn {
	pub turn_id: Uuid,
	pub session_id: Uuid,
	pub role: TurnRole,
	pub content: String,
	pub attachments: Option<Value>,
	pub created_at: OffsetDateTime,
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct ChatTurnRow {
	pub(crate) turn_id: Uuid,
	pub(crate) session_id: Uuid,
	pub(crate) role: String,
	pub(crate) content: String,
	pub(crate) attachments: Option<Value>,
	pub(crate) created_at: OffsetDateTime,
}
impl TryFrom<ChatTurnRow> for ChatTurn {
	type Error = Error;

	fn try_from(row: ChatTurnRow) -> Result<Self, Self::Error> {
		Ok(Self {
			turn_id: row.turn_id,
			session_id: row.session_id,
			role: row.role.parse()?,
			content: row.content,
			attachments: row.attachments,
			created_at: row.created_at,
		})
	}
}

#[derive(Clone, Debug, PartialEq, Eq, sqlx::FromRow)]
pub struct MemoryItem {
	pub memory_id: Uuid,
	pub user_id: String,
	pub content: String,
	pub category: String,
	pub active: bool,
}
