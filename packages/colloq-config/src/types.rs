use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::{Map, Value};

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
	pub service: Service,
	pub storage: Storage,
	pub providers: Providers,
	pub chunking: Chunking,
	#[serde(default)]
	pub indexer: Indexer,
	pub retrieval: Retrieval,
	#[serde(default)]
	pub rerank: Rerank,
	pub context: Context,
	#[serde(default)]
	pub streaming: Streaming,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Service {
	pub http_bind: String,
	pub log_level: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Storage {
	pub postgres: Postgres,
	pub index: Index,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Postgres {
	pub dsn: String,
	pub pool_max_conns: u32,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Index {
	pub vector_dim: u32,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Providers {
	pub embedding: EmbeddingProviderConfig,
	pub rerank: RerankProviderConfig,
	pub web_search: WebSearchProviderConfig,
	pub chat: LlmProviderConfig,
}

#[derive(Clone, Debug, Deserialize)]
pub struct EmbeddingProviderConfig {
	pub provider_id: String,
	pub api_base: String,
	pub api_key: String,
	pub path: String,
	pub model: String,
	pub dimensions: u32,
	pub timeout_ms: u64,
	#[serde(default)]
	pub default_headers: Map<String, Value>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct RerankProviderConfig {
	pub provider_id: String,
	pub api_base: String,
	pub api_key: String,
	pub path: String,
	pub model: String,
	pub timeout_ms: u64,
	/// Provider-side batch limit. Candidates beyond it are never sent.
	#[serde(default = "default_rerank_max_documents")]
	pub max_documents: u32,
	#[serde(default)]
	pub default_headers: Map<String, Value>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct WebSearchProviderConfig {
	pub provider_id: String,
	pub api_base: String,
	pub api_key: String,
	pub path: String,
	pub timeout_ms: u64,
	#[serde(default)]
	pub default_headers: Map<String, Value>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct LlmProviderConfig {
	pub provider_id: String,
	pub api_base: String,
	pub api_key: String,
	pub path: String,
	pub model: String,
	pub temperature: f32,
	/// Applies to connection setup for streamed calls and to the whole request otherwise.
	pub timeout_ms: u64,
	#[serde(default)]
	pub default_headers: Map<String, Value>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Chunking {
	pub max_chars: u32,
	pub overlap_chars: u32,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Indexer {
	/// Department label mapped to the substrings that identify it in a source name or text.
	pub departments: BTreeMap<String, Vec<String>>,
	pub max_keywords: u32,
}
impl Default for Indexer {
	fn default() -> Self {
		Self { departments: BTreeMap::new(), max_keywords: 12 }
	}
}

#[derive(Clone, Debug, Deserialize)]
pub struct Retrieval {
	pub top_k: u32,
	pub similarity_threshold: f32,
	#[serde(default = "default_overfetch_factor")]
	pub overfetch_factor: u32,
	#[serde(default = "default_vector_weight")]
	pub vector_weight: f32,
	#[serde(default = "default_keyword_weight")]
	pub keyword_weight: f32,
	pub timeout_ms: u64,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Rerank {
	pub enabled: bool,
}
impl Default for Rerank {
	fn default() -> Self {
		Self { enabled: true }
	}
}

#[derive(Clone, Debug, Deserialize)]
pub struct Context {
	pub persona: String,
	#[serde(default = "default_context_header")]
	pub header: String,
	pub max_web_results: u32,
	pub max_web_chars: u32,
	pub max_chunk_chars: u32,
	pub max_memory_items: u32,
	pub max_memory_chars: u32,
	pub max_history_turns: u32,
	pub max_prompt_chars: u32,
	#[serde(default = "default_source_timeout_ms")]
	pub web_timeout_ms: u64,
	#[serde(default = "default_source_timeout_ms")]
	pub memory_timeout_ms: u64,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Streaming {
	pub title_generation: bool,
	pub title_max_chars: u32,
	/// Finished session slots without a subscriber are dropped after this many seconds.
	pub finished_ttl_secs: u64,
}
impl Default for Streaming {
	fn default() -> Self {
		Self { title_generation: true, title_max_chars: 60, finished_ttl_secs: 900 }
	}
}

fn default_rerank_max_documents() -> u32 {
	100
}

fn default_overfetch_factor() -> u32 {
	4
}

fn default_vector_weight() -> f32 {
	0.7
}

fn default_keyword_weight() -> f32 {
	0.3
}

fn default_context_header() -> String {
	"Answer the question using the following context. If the context is insufficient, say that \
	 you don't know."
		.to_string()
}

fn default_source_timeout_ms() -> u64 {
	8_000
}
