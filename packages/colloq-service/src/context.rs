use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

use crate::{ChatMessage, ChatRole, ColloqService, ContextBlock, Degradation, truncate_chars};
use colloq_providers::web_search::WebResult;

/// Which optional blocks a turn asks for.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextFlags {
	pub web_search: bool,
	pub rag: bool,
	pub memory: bool,
}

#[derive(Clone, Debug)]
pub struct AssembleRequest {
	pub user_id: String,
	pub query: String,
	/// Prior turns, oldest first.
	pub history: Vec<ChatMessage>,
	pub flags: ContextFlags,
	pub now: OffsetDateTime,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ContextReport {
	pub web_results: usize,
	pub rag_chunks: usize,
	pub memory_included: bool,
	pub history_turns: usize,
	pub dropped_history_turns: usize,
	pub dropped_rag_chunks: usize,
	pub dropped_web: bool,
	pub dropped_memory: bool,
	pub degradations: Vec<Degradation>,
}

#[derive(Clone, Debug)]
pub struct AssembledPrompt {
	pub system_instruction: String,
	pub history: Vec<ChatMessage>,
	pub user_message: String,
	pub report: ContextReport,
}
impl AssembledPrompt {
	/// System instruction, history, then the user message, ready for the chat provider.
	pub fn messages(&self) -> Vec<ChatMessage> {
		let mut messages = Vec::with_capacity(self.history.len() + 2);

		messages.push(ChatMessage::new(ChatRole::System, self.system_instruction.clone()));
		messages.extend(self.history.iter().cloned());
		messages.push(ChatMessage::new(ChatRole::User, self.user_message.clone()));

		messages
	}
}

#[derive(Clone, Debug, PartialEq)]
struct RagSnippet {
	source_name: String,
	part: i32,
	content: String,
}

#[derive(Clone, Debug, Default, PartialEq)]
struct Blocks {
	web: Vec<WebResult>,
	/// Ranked best first; overflow trims from the end.
	rag: Vec<RagSnippet>,
	memory: Option<String>,
}
impl Blocks {
	fn is_empty(&self) -> bool {
		self.web.is_empty() && self.rag.is_empty() && self.memory.is_none()
	}
}

impl ColloqService {
	pub async fn assemble(&self, req: AssembleRequest) -> AssembledPrompt {
		let cfg = &self.cfg.context;
		let mut report = ContextReport::default();
		let (web, rag, memory) = tokio::join!(
			self.web_block(&req.query, req.flags.web_search),
			self.rag_block(&req.query, req.flags.rag),
			self.memory_block(&req.user_id, req.flags.memory),
		);
		let mut blocks = Blocks::default();

		match web {
			Ok(results) => blocks.web = results,
			Err(reason) => report.degradations.push(reason),
		}

		let (rag, rag_degradations) = rag;

		blocks.rag = rag;

		report.degradations.extend(rag_degradations);

		match memory {
			Ok(summary) => blocks.memory = summary,
			Err(reason) => report.degradations.push(reason),
		}

		let system_instruction = system_instruction(&cfg.persona, req.now);
		let skip = req.history.len().saturating_sub(cfg.max_history_turns as usize);
		let mut history: Vec<ChatMessage> = req.history.into_iter().skip(skip).collect();
		let mut user_message = compose(&cfg.header, &req.query, &blocks);

		loop {
			let total = char_len(&system_instruction)
				+ history.iter().map(|message| char_len(&message.content)).sum::<usize>()
				+ char_len(&user_message);

			if total <= cfg.max_prompt_chars as usize {
				break;
			}

			if !history.is_empty() {
				history.remove(0);

				report.dropped_history_turns += 1;
			} else if blocks.rag.pop().is_some() {
				report.dropped_rag_chunks += 1;
			} else if !blocks.web.is_empty() {
				blocks.web.clear();

				report.dropped_web = true;
			} else if blocks.memory.take().is_some() {
				report.dropped_memory = true;
			} else {
				break;
			}

			user_message = compose(&cfg.header, &req.query, &blocks);
		}

		if report.dropped_history_turns > 0
			|| report.dropped_rag_chunks > 0
			|| report.dropped_web
			|| report.dropped_memory
		{
			tracing::info!(
				dropped_history_turns = report.dropped_history_turns,
				dropped_rag_chunks = report.dropped_rag_chunks,
				dropped_web = report.dropped_web,
				dropped_memory = report.dropped_memory,
				"Prompt trimmed to fit the character ceiling."
			);
		}

		report.web_results = blocks.web.len();
		report.rag_chunks = blocks.rag.len();
		report.memory_included = blocks.memory.is_some();
		report.history_turns = history.len();

		AssembledPrompt { system_instruction, history, user_message, report }
	}

	async fn web_block(&self, query: &str, enabled: bool) -> Result<Vec<WebResult>, Degradation> {
		if !enabled {
			return Ok(Vec::new());
		}

		let cfg = &self.cfg.context;
		let provider_cfg = &self.cfg.providers.web_search;
		let max_results = cfg.max_web_results as usize;
		let call = self.providers.web_search.search(provider_cfg, query, max_results);
		let message = match tokio::time::timeout(Duration::from_millis(cfg.web_timeout_ms), call)
			.await
		{
			Ok(Ok(results)) =>
				return Ok(results
					.into_iter()
					.take(max_results)
					.map(|result| WebResult {
						content: truncate_chars(&result.content, cfg.max_web_chars as usize)
							.to_string(),
						..result
					})
					.collect()),
			Ok(Err(err)) => err.to_string(),
			Err(_) => format!("Web search timed out after {} ms.", cfg.web_timeout_ms),
		};

		tracing::warn!(error = %message, "Web search unavailable. Continuing without it.");

		Err(Degradation::ContextSourceUnavailable { block: ContextBlock::Web, message })
	}

	async fn rag_block(&self, query: &str, enabled: bool) -> (Vec<RagSnippet>, Vec<Degradation>) {
		if !enabled {
			return (Vec::new(), Vec::new());
		}

		let max_chars = self.cfg.context.max_chunk_chars as usize;
		let search = self.rag_search(query, self.cfg.retrieval.top_k).await;
		let snippets = search
			.results
			.into_iter()
			.map(|result| {
				let chunk = result.candidate.chunk;

				RagSnippet {
					source_name: chunk.metadata.source_name,
					part: chunk.sequence_no + 1,
					content: truncate_chars(&chunk.content, max_chars).to_string(),
				}
			})
			.collect();

		(snippets, search.degradations)
	}

	async fn memory_block(
		&self,
		user_id: &str,
		enabled: bool,
	) -> Result<Option<String>, Degradation> {
		if !enabled {
			return Ok(None);
		}

		let cfg = &self.cfg.context;
		let call = self.stores.memory.memory_summary(user_id, cfg.max_memory_items);
		let message =
			match tokio::time::timeout(Duration::from_millis(cfg.memory_timeout_ms), call).await {
				Ok(Ok(summary)) => {
					let summary = truncate_chars(summary.trim(), cfg.max_memory_chars as usize);

					return Ok((!summary.is_empty()).then(|| summary.to_string()));
				},
				Ok(Err(err)) => err.to_string(),
				Err(_) => format!("Memory lookup timed out after {} ms.", cfg.memory_timeout_ms),
			};

		tracing::warn!(error = %message, "Memory unavailable. Continuing without it.");

		Err(Degradation::ContextSourceUnavailable { block: ContextBlock::Memory, message })
	}
}

fn system_instruction(persona: &str, now: OffsetDateTime) -> String {
	let timestamp = now.format(&Rfc3339).unwrap_or_else(|_| now.unix_timestamp().to_string());

	format!("{persona}\n\nCurrent time: {timestamp}")
}

/// Renders the user message. With no blocks the query goes out unchanged.
fn compose(header: &str, query: &str, blocks: &Blocks) -> String {
	if blocks.is_empty() {
		return query.to_string();
	}

	let mut sections = vec![header.to_string()];

	if !blocks.web.is_empty() {
		let mut section = String::from("Web results:");

		for result in &blocks.web {
			section
				.push_str(&format!("\n- {} ({})\n  {}", result.title, result.url, result.content));
		}

		sections.push(section);
	}
	if !blocks.rag.is_empty() {
		let mut section = String::from("Documents:");

		for (idx, snippet) in blocks.rag.iter().enumerate() {
			section.push_str(&format!(
				"\n[{}] {} (part {})\n{}",
				idx + 1,
				snippet.source_name,
				snippet.part,
				snippet.content
			));
		}

		sections.push(section);
	}
	if let Some(memory) = &blocks.memory {
		sections.push(format!("Memory:\n{memory}"));
	}

	sections.push(format!("Question: {query}"));

	sections.join("\n\n")
}

fn char_len(text: &str) -> usize {
	text.chars().count()
}
