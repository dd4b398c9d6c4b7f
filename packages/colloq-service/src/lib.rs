pub mod chat;
pub mod context;
pub mod ingest;
pub mod outcome;
pub mod rerank;
pub mod retrieval;
pub mod stream;
pub mod title;

mod error;

pub use chat::{TurnRequest, TurnStart};
pub use colloq_providers::chat::{ChatMessage, ChatRole, TokenStream};
pub use colloq_storage::BoxFuture;
pub use context::{AssembleRequest, AssembledPrompt, ContextFlags, ContextReport};
pub use error::{ContextBlock, Degradation, Error, Result};
pub use ingest::{IngestMode, IngestReport, IngestRequest, SourceMetadata};
pub use outcome::StageOutcome;
pub use rerank::{RagSearch, RankedIndex, RankedResult};
pub use stream::{
	Attachment, SessionSnapshot, StreamCoordinator, StreamEvent, StreamStatus, TurnHandle,
	TurnJob, TurnOutcome, TurnReservation,
};

use std::sync::Arc;

use colloq_config::{
	Config, EmbeddingProviderConfig, LlmProviderConfig, RerankProviderConfig,
	WebSearchProviderConfig,
};
use colloq_providers::{
	chat as chat_provider, embedding,
	rerank::{self as rerank_provider, RerankHit},
	web_search::{self, WebResult},
};
use colloq_storage::{IndexStore, MemoryStore, TurnStore, db::Db};

pub trait EmbeddingProvider
where
	Self: Send + Sync,
{
	fn embed<'a>(
		&'a self,
		cfg: &'a EmbeddingProviderConfig,
		texts: &'a [String],
	) -> BoxFuture<'a, colloq_providers::Result<Vec<Vec<f32>>>>;
}

pub trait RerankProvider
where
	Self: Send + Sync,
{
	fn rerank<'a>(
		&'a self,
		cfg: &'a RerankProviderConfig,
		query: &'a str,
		docs: &'a [String],
		top_n: usize,
	) -> BoxFuture<'a, colloq_providers::Result<Vec<RerankHit>>>;
}

pub trait WebSearchProvider
where
	Self: Send + Sync,
{
	fn search<'a>(
		&'a self,
		cfg: &'a WebSearchProviderConfig,
		query: &'a str,
		max_results: usize,
	) -> BoxFuture<'a, colloq_providers::Result<Vec<WebResult>>>;
}

pub trait ChatProvider
where
	Self: Send + Sync,
{
	fn stream<'a>(
		&'a self,
		cfg: &'a LlmProviderConfig,
		messages: &'a [ChatMessage],
	) -> BoxFuture<'a, colloq_providers::Result<TokenStream>>;

	fn complete<'a>(
		&'a self,
		cfg: &'a LlmProviderConfig,
		messages: &'a [ChatMessage],
	) -> BoxFuture<'a, colloq_providers::Result<String>>;
}

#[derive(Clone)]
pub struct Providers {
	pub embedding: Arc<dyn EmbeddingProvider>,
	pub rerank: Arc<dyn RerankProvider>,
	pub web_search: Arc<dyn WebSearchProvider>,
	pub chat: Arc<dyn ChatProvider>,
}
impl Providers {
	pub fn new(
		embedding: Arc<dyn EmbeddingProvider>,
		rerank: Arc<dyn RerankProvider>,
		web_search: Arc<dyn WebSearchProvider>,
		chat: Arc<dyn ChatProvider>,
	) -> Self {
		Self { embedding, rerank, web_search, chat }
	}
}
impl Default for Providers {
	fn default() -> Self {
		let provider = Arc::new(DefaultProviders);

		Self {
			embedding: provider.clone(),
			rerank: provider.clone(),
			web_search: provider.clone(),
			chat: provider,
		}
	}
}

#[derive(Clone)]
pub struct Stores {
	pub index: Arc<dyn IndexStore>,
	pub turns: Arc<dyn TurnStore>,
	pub memory: Arc<dyn MemoryStore>,
}
impl Stores {
	pub fn new(
		index: Arc<dyn IndexStore>,
		turns: Arc<dyn TurnStore>,
		memory: Arc<dyn MemoryStore>,
	) -> Self {
		Self { index, turns, memory }
	}

	pub fn from_db(db: Db) -> Self {
		let db = Arc::new(db);

		Self { index: db.clone(), turns: db.clone(), memory: db }
	}
}

/// Shared entry point for ingestion, search and chat turns. Cloning is cheap and every clone
/// drives the same stream coordinator.
#[derive(Clone)]
pub struct ColloqService {
	pub cfg: Arc<Config>,
	pub stores: Stores,
	pub providers: Providers,
	pub coordinator: StreamCoordinator,
}
impl ColloqService {
	pub fn new(cfg: Config, stores: Stores) -> Self {
		Self::with_providers(cfg, stores, Providers::default())
	}

	pub fn with_providers(cfg: Config, stores: Stores, providers: Providers) -> Self {
		let coordinator = StreamCoordinator::new(
			stores.turns.clone(),
			providers.chat.clone(),
			cfg.providers.chat.clone(),
			cfg.streaming.clone(),
		);

		Self { cfg: Arc::new(cfg), stores, providers, coordinator }
	}
}

struct DefaultProviders;

impl EmbeddingProvider for DefaultProviders {
	fn embed<'a>(
		&'a self,
		cfg: &'a EmbeddingProviderConfig,
		texts: &'a [String],
	) -> BoxFuture<'a, colloq_providers::Result<Vec<Vec<f32>>>> {
		Box::pin(embedding::embed(cfg, texts))
	}
}

impl RerankProvider for DefaultProviders {
	fn rerank<'a>(
		&'a self,
		cfg: &'a RerankProviderConfig,
		query: &'a str,
		docs: &'a [String],
		top_n: usize,
	) -> BoxFuture<'a, colloq_providers::Result<Vec<RerankHit>>> {
		Box::pin(rerank_provider::rerank(cfg, query, docs, top_n))
	}
}

impl WebSearchProvider for DefaultProviders {
	fn search<'a>(
		&'a self,
		cfg: &'a WebSearchProviderConfig,
		query: &'a str,
		max_results: usize,
	) -> BoxFuture<'a, colloq_providers::Result<Vec<WebResult>>> {
		Box::pin(web_search::search(cfg, query, max_results))
	}
}

impl ChatProvider for DefaultProviders {
	fn stream<'a>(
		&'a self,
		cfg: &'a LlmProviderConfig,
		messages: &'a [ChatMessage],
	) -> BoxFuture<'a, colloq_providers::Result<TokenStream>> {
		Box::pin(chat_provider::stream_chat(cfg, messages))
	}

	fn complete<'a>(
		&'a self,
		cfg: &'a LlmProviderConfig,
		messages: &'a [ChatMessage],
	) -> BoxFuture<'a, colloq_providers::Result<String>> {
		Box::pin(chat_provider::complete(cfg, messages))
	}
}

/// Cuts `text` to at most `max_chars` characters on a char boundary.
pub(crate) fn truncate_chars(text: &str, max_chars: usize) -> &str {
	match text.char_indices().nth(max_chars) {
		Some((idx, _)) => &text[..idx],
		None => text,
	}
}
