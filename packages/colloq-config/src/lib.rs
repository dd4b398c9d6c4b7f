mod error;
mod types;

pub use error::{Error, Result};
pub use types::{
	Chunking, Config, Context, EmbeddingProviderConfig, Index, Indexer, LlmProviderConfig,
	Postgres, Providers, Rerank, RerankProviderConfig, Retrieval, Service, Storage, Streaming,
	WebSearchProviderConfig,
};

use std::{fs, path::Path};

pub fn load(path: &Path) -> Result<Config> {
	let raw = fs::read_to_string(path)
		.map_err(|err| Error::ReadConfig { path: path.to_path_buf(), source: err })?;
	let mut cfg: Config = toml::from_str(&raw)
		.map_err(|err| Error::ParseConfig { path: path.to_path_buf(), source: err })?;

	normalize(&mut cfg);

	validate(&cfg)?;

	Ok(cfg)
}

pub fn validate(cfg: &Config) -> Result<()> {
	if cfg.service.http_bind.trim().is_empty() {
		return Err(Error::Validation {
			message: "service.http_bind must be non-empty.".to_string(),
		});
	}
	if cfg.storage.postgres.pool_max_conns == 0 {
		return Err(Error::Validation {
			message: "storage.postgres.pool_max_conns must be greater than zero.".to_string(),
		});
	}
	if cfg.providers.embedding.dimensions == 0 {
		return Err(Error::Validation {
			message: "providers.embedding.dimensions must be greater than zero.".to_string(),
		});
	}
	if cfg.providers.embedding.dimensions != cfg.storage.index.vector_dim {
		return Err(Error::Validation {
			message: "providers.embedding.dimensions must match storage.index.vector_dim."
				.to_string(),
		});
	}
	if cfg.providers.rerank.max_documents == 0 {
		return Err(Error::Validation {
			message: "providers.rerank.max_documents must be greater than zero.".to_string(),
		});
	}
	if cfg.chunking.max_chars == 0 {
		return Err(Error::Validation {
			message: "chunking.max_chars must be greater than zero.".to_string(),
		});
	}
	if cfg.chunking.overlap_chars >= cfg.chunking.max_chars {
		return Err(Error::Validation {
			message: "chunking.overlap_chars must be less than chunking.max_chars.".to_string(),
		});
	}
	if cfg.retrieval.top_k == 0 {
		return Err(Error::Validation {
			message: "retrieval.top_k must be greater than zero.".to_string(),
		});
	}
	if cfg.retrieval.overfetch_factor == 0 {
		return Err(Error::Validation {
			message: "retrieval.overfetch_factor must be greater than zero.".to_string(),
		});
	}

	for (label, value) in [
		("retrieval.similarity_threshold", cfg.retrieval.similarity_threshold),
		("retrieval.vector_weight", cfg.retrieval.vector_weight),
		("retrieval.keyword_weight", cfg.retrieval.keyword_weight),
	] {
		if !value.is_finite() {
			return Err(Error::Validation { message: format!("{label} must be a finite number.") });
		}
	}

	if !(-1.0..=1.0).contains(&cfg.retrieval.similarity_threshold) {
		return Err(Error::Validation {
			message: "retrieval.similarity_threshold must be in the range -1.0-1.0.".to_string(),
		});
	}
	if cfg.retrieval.vector_weight < 0.0 || cfg.retrieval.keyword_weight < 0.0 {
		return Err(Error::Validation {
			message: "retrieval weights must be zero or greater.".to_string(),
		});
	}
	if cfg.retrieval.vector_weight + cfg.retrieval.keyword_weight <= 0.0 {
		return Err(Error::Validation {
			message: "retrieval.vector_weight and retrieval.keyword_weight must not both be zero."
				.to_string(),
		});
	}
	if cfg.context.persona.trim().is_empty() {
		return Err(Error::Validation {
			message: "context.persona must be non-empty.".to_string(),
		});
	}
	if cfg.context.header.trim().is_empty() {
		return Err(Error::Validation { message: "context.header must be non-empty.".to_string() });
	}

	for (label, value) in [
		("context.max_chunk_chars", cfg.context.max_chunk_chars),
		("context.max_web_chars", cfg.context.max_web_chars),
		("context.max_memory_chars", cfg.context.max_memory_chars),
		("context.max_prompt_chars", cfg.context.max_prompt_chars),
	] {
		if value == 0 {
			return Err(Error::Validation {
				message: format!("{label} must be greater than zero."),
			});
		}
	}

	if cfg.streaming.title_generation && cfg.streaming.title_max_chars == 0 {
		return Err(Error::Validation {
			message: "streaming.title_max_chars must be greater than zero when title generation \
				is enabled."
				.to_string(),
		});
	}

	for (label, key) in [
		("embedding", &cfg.providers.embedding.api_key),
		("rerank", &cfg.providers.rerank.api_key),
		("web_search", &cfg.providers.web_search.api_key),
		("chat", &cfg.providers.chat.api_key),
	] {
		if key.trim().is_empty() {
			return Err(Error::Validation {
				message: format!("Provider {label} api_key must be non-empty."),
			});
		}
	}

	Ok(())
}

fn normalize(cfg: &mut Config) {
	cfg.context.persona = cfg.context.persona.trim().to_string();
	cfg.context.header = cfg.context.header.trim().to_string();

	for api_base in [
		&mut cfg.providers.embedding.api_base,
		&mut cfg.providers.rerank.api_base,
		&mut cfg.providers.web_search.api_base,
		&mut cfg.providers.chat.api_base,
	] {
		let trimmed = api_base.trim_end_matches('/').to_string();

		*api_base = trimmed;
	}

	cfg.indexer.departments.retain(|label, needles| {
		needles.retain(|needle| !needle.trim().is_empty());

		!label.trim().is_empty() && !needles.is_empty()
	});
}
