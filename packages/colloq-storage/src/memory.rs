use sqlx::PgExecutor;

use crate::{Result, models::MemoryItem};

pub async fn active_memories<'e, E>(
	executor: E,
	user_id: &str,
	limit: u32,
) -> Result<Vec<MemoryItem>>
where
	E: PgExecutor<'e>,
{
	let rows = sqlx::query_as::<_, MemoryItem>(
		"\
SELECT memory_id, user_id, content, category, active
FROM memory_items
WHERE user_id = $1 AND active
ORDER BY created_at DESC, memory_id
LIMIT $2",
	)
	.bind(user_id)
	.bind(i64::from(limit))
	.fetch_all(executor)
	.await?;

	Ok(rows)
}

/// Renders memories as one `- [category] content` line each. Empty input renders as an empty
/// string.
pub fn summarize(items: &[MemoryItem]) -> String {
	items
		.iter()
		.filter(|item| !item.content.trim().is_empty())
		.map(|item| format!("- [{}] {}", item.category, item.content.trim()))
		.collect::<Vec<_>>()
		.join("\n")
}
