use sqlx::PgExecutor;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
	Result,
	models::{ChatTurn, ChatTurnRow},
};

pub async fn insert_turn<'e, E>(executor: E, turn: &ChatTurn) -> Result<()>
where
	E: PgExecutor<'e>,
{
	sqlx::query(
		"\
INSERT INTO chat_turns (turn_id, session_id, role, content, attachments, created_at)
VALUES ($1,$2,$3,$4,$5,$6)",
	)
	.bind(turn.turn_id)
	.bind(turn.session_id)
	.bind(turn.role.as_str())
	.bind(turn.content.as_str())
	.bind(turn.attachments.clone())
	.bind(turn.created_at)
	.execute(executor)
	.await?;

	Ok(())
}

/// Creates the session row on first use and bumps `updated_at` afterwards.
pub async fn touch_session<'e, E>(
	executor: E,
	session_id: Uuid,
	user_id: &str,
	now: OffsetDateTime,
) -> Result<()>
where
	E: PgExecutor<'e>,
{
	sqlx::query(
		"\
INSERT INTO chat_sessions (session_id, user_id, created_at, updated_at)
VALUES ($1,$2,$3,$3)
ON CONFLICT (session_id) DO UPDATE SET updated_at = EXCLUDED.updated_at",
	)
	.bind(session_id)
	.bind(user_id)
	.bind(now)
	.execute(executor)
	.await?;

	Ok(())
}

/// Returns up to `limit` most recent turns, oldest first.
pub async fn recent_turns<'e, E>(
	executor: E,
	session_id: Uuid,
	limit: u32,
) -> Result<Vec<ChatTurn>>
where
	E: PgExecutor<'e>,
{
	let mut rows = sqlx::query_as::<_, ChatTurnRow>(
		"\
SELECT turn_id, session_id, role, content, attachments, created_at
FROM chat_turns
WHERE session_id = $1
ORDER BY created_at DESC, turn_id DESC
LIMIT $2",
	)
	.bind(session_id)
	.bind(i64::from(limit))
	.fetch_all(executor)
	.await?;

	rows.reverse();

	rows.into_iter().map(ChatTurn::try_from).collect()
}

pub async fn set_title<'e, E>(executor: E, session_id: Uuid, title: &str) -> Result<()>
where
	E: PgExecutor<'e>,
{
	sqlx::query("UPDATE chat_sessions SET title = $2 WHERE session_id = $1")
		.bind(session_id)
		.bind(title)
		.execute(executor)
		.await?;

	Ok(())
}

pub async fn session_title<'e, E>(executor: E, session_id: Uuid) -> Result<Option<String>>
where
	E: PgExecutor<'e>,
{
	let title: Option<Option<String>> =
		sqlx::query_scalar("SELECT title FROM chat_sessions WHERE session_id = $1")
			.bind(session_id)
			.fetch_optional(executor)
			.await?;

	Ok(title.flatten())
}
