use time::OffsetDateTime;

use colloq_providers::web_search::WebResult;
use colloq_service::{
	AssembleRequest, ChatMessage, ChatRole, ContextBlock, ContextFlags, Degradation,
};
use colloq_testkit::{
	Harness,
	fakes::{StaticMemory, StaticWebSearch},
};

use super::FEES;

const QUERY: &str = "When is tuition due?";

fn request(flags: ContextFlags, history: Vec<ChatMessage>) -> AssembleRequest {
	AssembleRequest {
		user_id: "u-1".to_string(),
		query: QUERY.to_string(),
		history,
		flags,
		now: OffsetDateTime::now_utc(),
	}
}

fn all_blocks() -> ContextFlags {
	ContextFlags { web_search: true, rag: true, memory: true }
}

fn web_results() -> Vec<WebResult> {
	(0..4)
		.map(|idx| WebResult {
			title: format!("Result {idx}"),
			url: format!("https://example.edu/{idx}"),
			content: "x".repeat(500),
		})
		.collect()
}

fn history(turns: usize, chars: usize) -> Vec<ChatMessage> {
	(0..turns)
		.map(|idx| {
			let role = if idx % 2 == 0 { ChatRole::User } else { ChatRole::Assistant };

			ChatMessage::new(role, format!("{idx}:{}", "h".repeat(chars)))
		})
		.collect()
}

async fn full_harness(max_prompt_chars: u32) -> Harness {
	let harness = Harness::builder()
		.web(StaticWebSearch::new(web_results()))
		.memory(StaticMemory::new("- [profile] Studies part time."))
		.config(|cfg| {
			cfg.retrieval.similarity_threshold = -1.0;
			cfg.context.max_prompt_chars = max_prompt_chars;
		})
		.build();

	super::ingest(&harness, "fees.md", FEES).await;

	harness
}

#[tokio::test]
async fn no_blocks_sends_the_bare_query() {
	let harness = full_harness(20_000).await;
	let prompt = harness.service.assemble(request(ContextFlags::default(), Vec::new())).await;

	assert_eq!(prompt.user_message, QUERY);
	assert!(
		prompt.system_instruction.starts_with("You are a campus assistant.\n\nCurrent time: ")
	);
	assert_eq!(harness.web.calls(), 0);
	assert!(harness.memory.requests().is_empty());
	assert_eq!(harness.index.hybrid_calls(), 0);
}

#[tokio::test]
async fn every_block_is_rendered_in_order_with_limits() {
	let harness = full_harness(20_000).await;
	let prompt = harness.service.assemble(request(all_blocks(), Vec::new())).await;
	let message = &prompt.user_message;
	let web = message.find("Web results:").expect("Web block missing.");
	let docs = message.find("Documents:\n[1] fees.md (part ").expect("Documents missing.");
	let memory = message.find("Memory:\n- [profile] Studies part time.").expect("No memory.");

	assert!(message.starts_with("Use the context below."));
	assert!(web < docs && docs < memory);
	assert!(message.ends_with(&format!("Question: {QUERY}")));
	assert_eq!(prompt.report.web_results, 2);
	assert!(!message.contains("Result 2"));
	assert!(!message.contains(&"x".repeat(201)));
	assert!(prompt.report.rag_chunks > 0);
	assert!(prompt.report.memory_included);
	assert!(prompt.report.degradations.is_empty());
	assert_eq!(harness.memory.requests(), vec![("u-1".to_string(), 5)]);
}

#[tokio::test]
async fn failing_sources_are_reported_and_skipped() {
	let harness = full_harness(20_000).await;

	harness.web.set_fail(true);
	harness.memory.set_fail(true);

	let prompt = harness.service.assemble(request(all_blocks(), Vec::new())).await;
	let blocks: Vec<ContextBlock> = prompt
		.report
		.degradations
		.iter()
		.filter_map(|reason| match reason {
			Degradation::ContextSourceUnavailable { block, .. } => Some(*block),
			_ => None,
		})
		.collect();

	assert_eq!(blocks, vec![ContextBlock::Web, ContextBlock::Memory]);
	assert!(!prompt.user_message.contains("Web results:"));
	assert!(!prompt.user_message.contains("Memory:"));
	assert!(prompt.user_message.contains("Documents:"));
}

#[tokio::test]
async fn memory_is_cut_to_the_character_budget() {
	let harness = Harness::builder()
		.memory(StaticMemory::new("m".repeat(1_000)))
		.config(|cfg| cfg.context.max_memory_chars = 40)
		.build();
	let flags = ContextFlags { memory: true, ..Default::default() };
	let prompt = harness.service.assemble(request(flags, Vec::new())).await;

	assert!(prompt.user_message.contains(&format!("Memory:\n{}\n\n", "m".repeat(40))));
	assert!(!prompt.user_message.contains(&"m".repeat(41)));
}

#[tokio::test]
async fn history_keeps_the_most_recent_turns_oldest_first() {
	let harness = Harness::new();
	let prompt =
		harness.service.assemble(request(ContextFlags::default(), history(10, 5))).await;

	assert_eq!(prompt.history.len(), 6);
	assert!(prompt.history[0].content.starts_with("4:"));
	assert!(prompt.history[5].content.starts_with("9:"));

	let messages = prompt.messages();

	assert_eq!(messages.len(), 8);
	assert_eq!(messages[0].role, ChatRole::System);
	assert_eq!(messages[7], ChatMessage::new(ChatRole::User, QUERY));
}

#[tokio::test]
async fn overflow_drops_history_before_any_context_block() {
	let harness = full_harness(2_000).await;
	let prompt = harness.service.assemble(request(all_blocks(), history(4, 500))).await;

	assert!(prompt.report.dropped_history_turns > 0);
	assert_eq!(prompt.report.dropped_rag_chunks, 0);
	assert!(!prompt.report.dropped_web && !prompt.report.dropped_memory);
	assert!(prompt.user_message.contains("Documents:"));
}

#[tokio::test]
async fn tiny_ceiling_strips_everything_but_persona_and_question() {
	let harness = full_harness(10).await;
	let prompt = harness.service.assemble(request(all_blocks(), history(3, 50))).await;

	assert!(prompt.history.is_empty());
	assert_eq!(prompt.user_message, QUERY);
	assert!(prompt.system_instruction.starts_with("You are a campus assistant."));
	assert_eq!(prompt.report.dropped_history_turns, 3);
	assert!(prompt.report.dropped_rag_chunks > 0);
	assert!(prompt.report.dropped_web && prompt.report.dropped_memory);
}
