use uuid::Uuid;

use crate::{ChatMessage, ChatProvider, ChatRole, truncate_chars};
use colloq_config::LlmProviderConfig;
use colloq_storage::TurnStore;

const EXCERPT_CHARS: usize = 1_000;

/// Names a session from its first exchange. Failures are logged and leave the title unset.
pub(crate) async fn generate_title(
	turns: &dyn TurnStore,
	chat: &dyn ChatProvider,
	cfg: &LlmProviderConfig,
	max_chars: usize,
	session_id: Uuid,
	user_message: &str,
	reply: &str,
) -> Option<String> {
	let messages = [
		ChatMessage::new(
			ChatRole::System,
			format!(
				"Write a short title of at most {max_chars} characters for this conversation. \
				Reply with the title only."
			),
		),
		ChatMessage::new(
			ChatRole::User,
			format!(
				"User: {}\nAssistant: {}",
				truncate_chars(user_message, EXCERPT_CHARS),
				truncate_chars(reply, EXCERPT_CHARS)
			),
		),
	];
	let raw = match chat.complete(cfg, &messages).await {
		Ok(raw) => raw,
		Err(err) => {
			tracing::warn!(session_id = %session_id, error = %err, "Title generation failed.");

			return None;
		},
	};
	let title = clean_title(&raw, max_chars)?;

	if let Err(err) = turns.set_title(session_id, &title).await {
		tracing::warn!(session_id = %session_id, error = %err, "Failed to store session title.");

		return None;
	}

	tracing::debug!(session_id = %session_id, title = %title, "Session titled.");

	Some(title)
}

/// First non-empty line, stripped of wrapping quotes and a trailing period, cut to `max_chars`.
pub fn clean_title(raw: &str, max_chars: usize) -> Option<String> {
	let line = raw.lines().map(str::trim).find(|line| !line.is_empty())?;
	let line = line.trim_matches(|c: char| matches!(c, '"' | '\'' | '`' | '*' | '#'));
	let line = line.trim().trim_end_matches('.').trim_end();
	let title = truncate_chars(line, max_chars).trim_end();

	(!title.is_empty()).then(|| title.to_string())
}
