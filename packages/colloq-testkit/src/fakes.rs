//! In-memory stores and scripted providers for driving `ColloqService` without a network.

use std::{
	collections::HashMap,
	sync::{
		Arc, Mutex, MutexGuard,
		atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
	},
	time::Duration,
};

use futures_util::stream::{self, StreamExt};
use time::OffsetDateTime;
use tokio::sync::Semaphore;
use uuid::Uuid;

use colloq_config::{
	EmbeddingProviderConfig, LlmProviderConfig, RerankProviderConfig, WebSearchProviderConfig,
};
use colloq_providers::{rerank::RerankHit, web_search::WebResult};
use colloq_service::{
	BoxFuture, ChatMessage, ChatProvider, EmbeddingProvider, RerankProvider, TokenStream,
	WebSearchProvider,
};
use colloq_storage::{
	IndexStore, MemoryStore, TurnStore,
	models::{Candidate, ChatTurn, HybridQuery, NewChunk, StoredChunk, VectorQuery},
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
	mutex.lock().unwrap_or_else(|err| err.into_inner())
}

fn unavailable() -> colloq_storage::Error {
	colloq_storage::Error::Sqlx(sqlx::Error::PoolTimedOut)
}

fn provider_error(message: &str) -> colloq_providers::Error {
	colloq_providers::Error::InvalidResponse { message: message.to_string() }
}

fn terms(text: &str) -> Vec<String> {
	text.split(|c: char| !c.is_alphanumeric())
		.filter(|term| term.chars().count() >= 3)
		.map(str::to_lowercase)
		.collect()
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
	let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
	let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
	let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();

	if norm_a == 0.0 || norm_b == 0.0 {
		return 0.0;
	}

	dot / (norm_a * norm_b)
}

fn stored(chunk: &NewChunk) -> StoredChunk {
	StoredChunk {
		chunk_id: chunk.chunk_id,
		source_id: chunk.source_id.clone(),
		sequence_no: chunk.sequence_no,
		content: chunk.content.clone(),
		metadata: chunk.metadata.clone(),
	}
}

/// Document index over a `Vec`, scoring with cosine similarity and query-term overlap.
#[derive(Default)]
pub struct MemoryIndex {
	chunks: Mutex<Vec<NewChunk>>,
	fail_hybrid: AtomicBool,
	fail_vector: AtomicBool,
	fail_writes: AtomicBool,
	hybrid_delay_ms: AtomicU64,
	hybrid_calls: AtomicUsize,
	vector_calls: AtomicUsize,
}
impl MemoryIndex {
	pub fn chunks(&self) -> Vec<NewChunk> {
		lock(&self.chunks).clone()
	}

	pub fn source_chunks(&self, source_id: &str) -> Vec<NewChunk> {
		let mut chunks: Vec<NewChunk> =
			self.chunks().into_iter().filter(|chunk| chunk.source_id == source_id).collect();

		chunks.sort_by_key(|chunk| chunk.sequence_no);

		chunks
	}

	pub fn set_fail_hybrid(&self, fail: bool) {
		self.fail_hybrid.store(fail, Ordering::SeqCst);
	}

	pub fn set_fail_vector(&self, fail: bool) {
		self.fail_vector.store(fail, Ordering::SeqCst);
	}

	pub fn set_fail_writes(&self, fail: bool) {
		self.fail_writes.store(fail, Ordering::SeqCst);
	}

	pub fn set_hybrid_delay(&self, delay: Duration) {
		self.hybrid_delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
	}

	pub fn hybrid_calls(&self) -> usize {
		self.hybrid_calls.load(Ordering::SeqCst)
	}

	pub fn vector_calls(&self) -> usize {
		self.vector_calls.load(Ordering::SeqCst)
	}
}
impl IndexStore for MemoryIndex {
	fn has_source<'a>(
		&'a self,
		source_id: &'a str,
	) -> BoxFuture<'a, colloq_storage::Result<bool>> {
		Box::pin(async move { Ok(lock(&self.chunks).iter().any(|c| c.source_id == source_id)) })
	}

	fn sequence_numbers<'a>(
		&'a self,
		source_id: &'a str,
	) -> BoxFuture<'a, colloq_storage::Result<Vec<i32>>> {
		Box::pin(async move {
			Ok(self.source_chunks(source_id).into_iter().map(|chunk| chunk.sequence_no).collect())
		})
	}

	fn delete_source<'a>(
		&'a self,
		source_id: &'a str,
	) -> BoxFuture<'a, colloq_storage::Result<u64>> {
		Box::pin(async move {
			let mut chunks = lock(&self.chunks);
			let before = chunks.len();

			chunks.retain(|chunk| chunk.source_id != source_id);

			Ok((before - chunks.len()) as u64)
		})
	}

	fn insert_chunk<'a>(
		&'a self,
		chunk: &'a NewChunk,
	) -> BoxFuture<'a, colloq_storage::Result<bool>> {
		Box::pin(async move {
			if self.fail_writes.load(Ordering::SeqCst) {
				return Err(unavailable());
			}

			let mut chunks = lock(&self.chunks);

			if chunks.iter().any(|existing| {
				existing.source_id == chunk.source_id && existing.sequence_no == chunk.sequence_no
			}) {
				return Ok(false);
			}

			chunks.push(chunk.clone());

			Ok(true)
		})
	}

	fn hybrid_search<'a>(
		&'a self,
		query: &'a HybridQuery,
	) -> BoxFuture<'a, colloq_storage::Result<Vec<Candidate>>> {
		Box::pin(async move {
			self.hybrid_calls.fetch_add(1, Ordering::SeqCst);

			let delay = self.hybrid_delay_ms.load(Ordering::SeqCst);

			if delay > 0 {
				tokio::time::sleep(Duration::from_millis(delay)).await;
			}
			if self.fail_hybrid.load(Ordering::SeqCst) {
				return Err(unavailable());
			}

			let query_terms = terms(&query.query_text);
			let mut hits: Vec<Candidate> = lock(&self.chunks)
				.iter()
				.filter_map(|chunk| {
					let vector_score = cosine(&query.embedding, &chunk.embedding);

					if vector_score < query.similarity_threshold {
						return None;
					}

					let haystack =
						terms(&format!("{} {}", chunk.content, chunk.metadata.keywords));
					let matched =
						query_terms.iter().filter(|term| haystack.contains(term)).count();
					let keyword_score = if query_terms.is_empty() {
						0.0
					} else {
						matched as f32 / query_terms.len() as f32
					};

					Some(Candidate {
						chunk: stored(chunk),
						vector_score,
						keyword_score: Some(keyword_score),
						combined_score: query.vector_weight * vector_score
							+ query.keyword_weight * keyword_score,
					})
				})
				.collect();

			hits.sort_by(|a, b| {
				b.combined_score
					.total_cmp(&a.combined_score)
					.then(a.chunk.chunk_id.cmp(&b.chunk.chunk_id))
			});
			hits.truncate(query.limit as usize);

			Ok(hits)
		})
	}

	fn vector_search<'a>(
		&'a self,
		query: &'a VectorQuery,
	) -> BoxFuture<'a, colloq_storage::Result<Vec<Candidate>>> {
		Box::pin(async move {
			self.vector_calls.fetch_add(1, Ordering::SeqCst);

			if self.fail_vector.load(Ordering::SeqCst) {
				return Err(unavailable());
			}

			let mut hits: Vec<Candidate> = lock(&self.chunks)
				.iter()
				.map(|chunk| (chunk, cosine(&query.embedding, &chunk.embedding)))
				.filter(|(_, score)| *score >= query.similarity_threshold)
				.map(|(chunk, vector_score)| Candidate {
					chunk: stored(chunk),
					vector_score,
					keyword_score: None,
					combined_score: vector_score,
				})
				.collect();

			hits.sort_by(|a, b| b.vector_score.total_cmp(&a.vector_score));
			hits.truncate(query.limit as usize);

			Ok(hits)
		})
	}
}

/// Turn store that records every write.
#[derive(Default)]
pub struct RecordingTurns {
	turns: Mutex<Vec<ChatTurn>>,
	titles: Mutex<HashMap<Uuid, String>>,
	touches: Mutex<Vec<(Uuid, String, OffsetDateTime)>>,
	fail_saves: AtomicBool,
	fail_loads: AtomicBool,
}
impl RecordingTurns {
	pub fn turns(&self, session_id: Uuid) -> Vec<ChatTurn> {
		lock(&self.turns).iter().filter(|turn| turn.session_id == session_id).cloned().collect()
	}

	pub fn title(&self, session_id: Uuid) -> Option<String> {
		lock(&self.titles).get(&session_id).cloned()
	}

	pub fn touches(&self, session_id: Uuid) -> usize {
		lock(&self.touches).iter().filter(|(id, _, _)| *id == session_id).count()
	}

	/// Seeds a prior exchange without going through the coordinator.
	pub fn seed(&self, turn: ChatTurn) {
		lock(&self.turns).push(turn);
	}

	pub fn set_fail_saves(&self, fail: bool) {
		self.fail_saves.store(fail, Ordering::SeqCst);
	}

	pub fn set_fail_loads(&self, fail: bool) {
		self.fail_loads.store(fail, Ordering::SeqCst);
	}
}
impl TurnStore for RecordingTurns {
	fn save_turn<'a>(&'a self, turn: &'a ChatTurn) -> BoxFuture<'a, colloq_storage::Result<()>> {
		Box::pin(async move {
			if self.fail_saves.load(Ordering::SeqCst) {
				return Err(unavailable());
			}

			lock(&self.turns).push(turn.clone());

			Ok(())
		})
	}

	fn touch_session<'a>(
		&'a self,
		session_id: Uuid,
		user_id: &'a str,
		now: OffsetDateTime,
	) -> BoxFuture<'a, colloq_storage::Result<()>> {
		Box::pin(async move {
			if self.fail_saves.load(Ordering::SeqCst) {
				return Err(unavailable());
			}

			lock(&self.touches).push((session_id, user_id.to_string(), now));

			Ok(())
		})
	}

	fn recent_turns<'a>(
		&'a self,
		session_id: Uuid,
		limit: u32,
	) -> BoxFuture<'a, colloq_storage::Result<Vec<ChatTurn>>> {
		Box::pin(async move {
			if self.fail_loads.load(Ordering::SeqCst) {
				return Err(unavailable());
			}

			let turns = self.turns(session_id);
			let skip = turns.len().saturating_sub(limit as usize);

			Ok(turns.into_iter().skip(skip).collect())
		})
	}

	fn set_title<'a>(
		&'a self,
		session_id: Uuid,
		title: &'a str,
	) -> BoxFuture<'a, colloq_storage::Result<()>> {
		Box::pin(async move {
			lock(&self.titles).insert(session_id, title.to_string());

			Ok(())
		})
	}
}

/// Memory collaborator returning a fixed summary.
#[derive(Default)]
pub struct StaticMemory {
	summary: String,
	fail: AtomicBool,
	requests: Mutex<Vec<(String, u32)>>,
}
impl StaticMemory {
	pub fn new(summary: impl Into<String>) -> Self {
		Self { summary: summary.into(), ..Default::default() }
	}

	pub fn set_fail(&self, fail: bool) {
		self.fail.store(fail, Ordering::SeqCst);
	}

	pub fn requests(&self) -> Vec<(String, u32)> {
		lock(&self.requests).clone()
	}
}
impl MemoryStore for StaticMemory {
	fn memory_summary<'a>(
		&'a self,
		user_id: &'a str,
		limit: u32,
	) -> BoxFuture<'a, colloq_storage::Result<String>> {
		Box::pin(async move {
			lock(&self.requests).push((user_id.to_string(), limit));

			if self.fail.load(Ordering::SeqCst) {
				return Err(unavailable());
			}

			Ok(self.summary.clone())
		})
	}
}

/// Bag-of-words embedding: every term is hashed into one of `dim` buckets, so texts sharing
/// terms have positive cosine similarity.
pub struct HashEmbedding {
	dim: usize,
	fail: AtomicBool,
	fail_when_contains: Mutex<Option<String>>,
	calls: AtomicUsize,
}
impl HashEmbedding {
	pub fn new(dim: usize) -> Self {
		Self {
			dim,
			fail: AtomicBool::new(false),
			fail_when_contains: Mutex::new(None),
			calls: AtomicUsize::new(0),
		}
	}

	pub fn vector(&self, text: &str) -> Vec<f32> {
		let mut vector = vec![0.0; self.dim];

		for term in terms(text) {
			let hash = term
				.bytes()
				.fold(0xcbf2_9ce4_8422_2325_u64, |acc, byte| {
					(acc ^ u64::from(byte)).wrapping_mul(0x0100_0000_01b3)
				});

			vector[(hash % self.dim as u64) as usize] += 1.0;
		}

		vector
	}

	pub fn set_fail(&self, fail: bool) {
		self.fail.store(fail, Ordering::SeqCst);
	}

	/// Fails any batch containing a text with `needle` in it. `None` clears the trigger.
	pub fn fail_when_contains(&self, needle: Option<&str>) {
		*lock(&self.fail_when_contains) = needle.map(str::to_string);
	}

	pub fn calls(&self) -> usize {
		self.calls.load(Ordering::SeqCst)
	}
}
impl EmbeddingProvider for HashEmbedding {
	fn embed<'a>(
		&'a self,
		_cfg: &'a EmbeddingProviderConfig,
		texts: &'a [String],
	) -> BoxFuture<'a, colloq_providers::Result<Vec<Vec<f32>>>> {
		Box::pin(async move {
			self.calls.fetch_add(1, Ordering::SeqCst);

			if self.fail.load(Ordering::SeqCst) {
				return Err(provider_error("Embedding service unavailable."));
			}
			if let Some(needle) = lock(&self.fail_when_contains).as_deref()
				&& texts.iter().any(|text| text.contains(needle))
			{
				return Err(provider_error("Embedding rejected the input."));
			}

			Ok(texts.iter().map(|text| self.vector(text)).collect())
		})
	}
}

/// How `ScriptedRerank` answers.
#[derive(Clone, Debug)]
pub enum RerankScript {
	/// Scores documents in reverse input order.
	Reverse,
	Hits(Vec<RerankHit>),
	Fail,
	Delay(Duration),
}

pub struct ScriptedRerank {
	script: RerankScript,
	batch_sizes: Mutex<Vec<usize>>,
}
impl ScriptedRerank {
	pub fn new(script: RerankScript) -> Self {
		Self { script, batch_sizes: Mutex::new(Vec::new()) }
	}

	/// Number of documents received per call.
	pub fn batch_sizes(&self) -> Vec<usize> {
		lock(&self.batch_sizes).clone()
	}
}
impl RerankProvider for ScriptedRerank {
	fn rerank<'a>(
		&'a self,
		_cfg: &'a RerankProviderConfig,
		_query: &'a str,
		docs: &'a [String],
		top_n: usize,
	) -> BoxFuture<'a, colloq_providers::Result<Vec<RerankHit>>> {
		Box::pin(async move {
			lock(&self.batch_sizes).push(docs.len());

			match &self.script {
				RerankScript::Reverse => Ok((0..docs.len())
					.rev()
					.enumerate()
					.take(top_n)
					.map(|(rank, index)| RerankHit {
						index,
						relevance_score: 1.0 - rank as f32 * 0.1,
					})
					.collect()),
				RerankScript::Hits(hits) => Ok(hits.clone()),
				RerankScript::Fail => Err(provider_error("Rerank service unavailable.")),
				RerankScript::Delay(delay) => {
					tokio::time::sleep(*delay).await;

					Ok(Vec::new())
				},
			}
		})
	}
}

#[derive(Default)]
pub struct StaticWebSearch {
	results: Vec<WebResult>,
	fail: AtomicBool,
	calls: AtomicUsize,
}
impl StaticWebSearch {
	pub fn new(results: Vec<WebResult>) -> Self {
		Self { results, ..Default::default() }
	}

	pub fn set_fail(&self, fail: bool) {
		self.fail.store(fail, Ordering::SeqCst);
	}

	pub fn calls(&self) -> usize {
		self.calls.load(Ordering::SeqCst)
	}
}
impl WebSearchProvider for StaticWebSearch {
	fn search<'a>(
		&'a self,
		_cfg: &'a WebSearchProviderConfig,
		_query: &'a str,
		max_results: usize,
	) -> BoxFuture<'a, colloq_providers::Result<Vec<WebResult>>> {
		Box::pin(async move {
			self.calls.fetch_add(1, Ordering::SeqCst);

			if self.fail.load(Ordering::SeqCst) {
				return Err(provider_error("Web search unavailable."));
			}

			Ok(self.results.iter().take(max_results).cloned().collect())
		})
	}
}

/// Chat model that replays a fixed token script.
pub struct ScriptedChat {
	tokens: Vec<String>,
	fail_after: Option<usize>,
	fail_to_connect: bool,
	panic_on_stream: bool,
	gate: Option<Arc<Semaphore>>,
	title: Option<String>,
	prompts: Mutex<Vec<Vec<ChatMessage>>>,
	completions: AtomicUsize,
}
impl ScriptedChat {
	pub fn new<I, S>(tokens: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		Self {
			tokens: tokens.into_iter().map(Into::into).collect(),
			fail_after: None,
			fail_to_connect: false,
			panic_on_stream: false,
			gate: None,
			title: Some("Scripted title".to_string()),
			prompts: Mutex::new(Vec::new()),
			completions: AtomicUsize::new(0),
		}
	}

	/// Emits the first `count` tokens, then a stream error.
	pub fn failing_after(mut self, count: usize) -> Self {
		self.fail_after = Some(count);

		self
	}

	pub fn failing_to_connect(mut self) -> Self {
		self.fail_to_connect = true;

		self
	}

	/// Panics inside the generation task when a stream is opened.
	pub fn panicking(mut self) -> Self {
		self.panic_on_stream = true;

		self
	}

	/// Every stream item waits for one permit from `gate`.
	pub fn gated(mut self, gate: Arc<Semaphore>) -> Self {
		self.gate = Some(gate);

		self
	}

	/// Reply for non-streamed completions. `None` makes them fail.
	pub fn with_title(mut self, title: Option<&str>) -> Self {
		self.title = title.map(str::to_string);

		self
	}

	pub fn prompts(&self) -> Vec<Vec<ChatMessage>> {
		lock(&self.prompts).clone()
	}

	pub fn completions(&self) -> usize {
		self.completions.load(Ordering::SeqCst)
	}
}
impl ChatProvider for ScriptedChat {
	fn stream<'a>(
		&'a self,
		_cfg: &'a LlmProviderConfig,
		messages: &'a [ChatMessage],
	) -> BoxFuture<'a, colloq_providers::Result<TokenStream>> {
		Box::pin(async move {
			lock(&self.prompts).push(messages.to_vec());

			if self.fail_to_connect {
				return Err(provider_error("Chat service unavailable."));
			}
			if self.panic_on_stream {
				panic!("Scripted chat panicked.");
			}

			let mut items: Vec<colloq_providers::Result<String>> =
				self.tokens.iter().cloned().map(Ok).collect();

			if let Some(count) = self.fail_after {
				items.truncate(count);
				items.push(Err(provider_error("Model stream interrupted.")));
			}

			let gate = self.gate.clone();
			let tokens: TokenStream = Box::pin(stream::iter(items).then(move |item| {
				let gate = gate.clone();

				async move {
					if let Some(gate) = gate
						&& let Ok(permit) = gate.acquire().await
					{
						permit.forget();
					}

					item
				}
			}));

			Ok(tokens)
		})
	}

	fn complete<'a>(
		&'a self,
		_cfg: &'a LlmProviderConfig,
		_messages: &'a [ChatMessage],
	) -> BoxFuture<'a, colloq_providers::Result<String>> {
		Box::pin(async move {
			self.completions.fetch_add(1, Ordering::SeqCst);

			self.title.clone().ok_or_else(|| provider_error("Completion failed."))
		})
	}
}
