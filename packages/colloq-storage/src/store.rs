use std::{future::Future, pin::Pin};

use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
	Result, chunks,
	db::Db,
	memory,
	models::{Candidate, ChatTurn, HybridQuery, NewChunk, VectorQuery},
	turns,
};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Chunk persistence and search over the document index.
pub trait IndexStore
where
	Self: Send + Sync,
{
	fn has_source<'a>(&'a self, source_id: &'a str) -> BoxFuture<'a, Result<bool>>;

	fn sequence_numbers<'a>(&'a self, source_id: &'a str) -> BoxFuture<'a, Result<Vec<i32>>>;

	fn delete_source<'a>(&'a self, source_id: &'a str) -> BoxFuture<'a, Result<u64>>;

	fn insert_chunk<'a>(&'a self, chunk: &'a NewChunk) -> BoxFuture<'a, Result<bool>>;

	fn hybrid_search<'a>(
		&'a self,
		query: &'a HybridQuery,
	) -> BoxFuture<'a, Result<Vec<Candidate>>>;

	fn vector_search<'a>(
		&'a self,
		query: &'a VectorQuery,
	) -> BoxFuture<'a, Result<Vec<Candidate>>>;
}

/// Conversation persistence.
pub trait TurnStore
where
	Self: Send + Sync,
{
	fn save_turn<'a>(&'a self, turn: &'a ChatTurn) -> BoxFuture<'a, Result<()>>;

	fn touch_session<'a>(
		&'a self,
		session_id: Uuid,
		user_id: &'a str,
		now: OffsetDateTime,
	) -> BoxFuture<'a, Result<()>>;

	fn recent_turns<'a>(
		&'a self,
		session_id: Uuid,
		limit: u32,
	) -> BoxFuture<'a, Result<Vec<ChatTurn>>>;

	fn set_title<'a>(&'a self, session_id: Uuid, title: &'a str) -> BoxFuture<'a, Result<()>>;
}

/// Read-only access to a user's long-term memory.
pub trait MemoryStore
where
	Self: Send + Sync,
{
	/// Returns at most `limit` active items rendered as text, or an empty string.
	fn memory_summary<'a>(
		&'a self,
		user_id: &'a str,
		limit: u32,
	) -> BoxFuture<'a, Result<String>>;
}

impl IndexStore for Db {
	fn has_source<'a>(&'a self, source_id: &'a str) -> BoxFuture<'a, Result<bool>> {
		Box::pin(chunks::has_source(&self.pool, source_id))
	}

	fn sequence_numbers<'a>(&'a self, source_id: &'a str) -> BoxFuture<'a, Result<Vec<i32>>> {
		Box::pin(chunks::sequence_numbers(&self.pool, source_id))
	}

	fn delete_source<'a>(&'a self, source_id: &'a str) -> BoxFuture<'a, Result<u64>> {
		Box::pin(chunks::delete_source(&self.pool, source_id))
	}

	fn insert_chunk<'a>(&'a self, chunk: &'a NewChunk) -> BoxFuture<'a, Result<bool>> {
		Box::pin(chunks::insert_chunk(&self.pool, chunk))
	}

	fn hybrid_search<'a>(
		&'a self,
		query: &'a HybridQuery,
	) -> BoxFuture<'a, Result<Vec<Candidate>>> {
		Box::pin(chunks::hybrid_search(&self.pool, query))
	}

	fn vector_search<'a>(
		&'a self,
		query: &'a VectorQuery,
	) -> BoxFuture<'a, Result<Vec<Candidate>>> {
		Box::pin(chunks::vector_search(&self.pool, query))
	}
}

impl TurnStore for Db {
	fn save_turn<'a>(&'a self, turn: &'a ChatTurn) -> BoxFuture<'a, Result<()>> {
		Box::pin(turns::insert_turn(&self.pool, turn))
	}

	fn touch_session<'a>(
		&'a self,
		session_id: Uuid,
		user_id: &'a str,
		now: OffsetDateTime,
	) -> BoxFuture<'a, Result<()>> {
		Box::pin(turns::touch_session(&self.pool, session_id, user_id, now))
	}

	fn recent_turns<'a>(
		&'a self,
		session_id: Uuid,
		limit: u32,
	) -> BoxFuture<'a, Result<Vec<ChatTurn>>> {
		Box::pin(turns::recent_turns(&self.pool, session_id, limit))
	}

	fn set_title<'a>(&'a self, session_id: Uuid, title: &'a str) -> BoxFuture<'a, Result<()>> {
		Box::pin(turns::set_title(&self.pool, session_id, title))
	}
}

impl MemoryStore for Db {
	fn memory_summary<'a>(
		&'a self,
		user_id: &'a str,
		limit: u32,
	) -> BoxFuture<'a, Result<String>> {
		Box::pin(async move {
			let items = memory::active_memories(&self.pool, user_id, limit).await?;

			Ok(memory::summarize(&items))
		})
	}
}
