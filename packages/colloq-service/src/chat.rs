use serde::Deserialize;
use serde_json::Value;
use time::OffsetDateTime;
use tokio::{sync::mpsc::UnboundedReceiver, task::JoinHandle};
use uuid::Uuid;

use crate::{
	AssembleRequest, ChatMessage, ChatRole, ColloqService, ContextFlags, Error, Result,
	StreamEvent, TurnJob, TurnOutcome,
};
use colloq_storage::models::{ChatTurn, TurnRole};

#[derive(Clone, Debug, Deserialize)]
pub struct TurnRequest {
	pub user_id: String,
	pub session_id: Uuid,
	pub message: String,
	#[serde(default)]
	pub attachments: Option<Value>,
	#[serde(flatten)]
	pub flags: ContextFlags,
}

/// A turn that has claimed its session. `events` is already subscribed, so no token is missed.
#[derive(Debug)]
pub struct TurnStart {
	pub session_id: Uuid,
	pub turn_id: Uuid,
	pub events: UnboundedReceiver<StreamEvent>,
	pub task: JoinHandle<Result<TurnOutcome>>,
}

impl ColloqService {
	/// Claims the session, then assembles context and streams the reply in the background.
	pub fn start_chat_turn(&self, req: TurnRequest) -> Result<TurnStart> {
		if req.user_id.trim().is_empty() {
			return Err(Error::InvalidRequest { message: "user_id must be non-empty.".to_string() });
		}
		if req.message.trim().is_empty() {
			return Err(Error::InvalidRequest { message: "message must be non-empty.".to_string() });
		}

		let reservation = self.coordinator.reserve(req.session_id)?;
		let Some(events) = self.coordinator.attach_subscriber(req.session_id).events else {
			return Err(Error::StreamGenerationFailure {
				message: "Reserved session is not generating.".to_string(),
			});
		};
		let (session_id, turn_id) = (reservation.session_id(), reservation.turn_id());
		let service = self.clone();
		let task = tokio::spawn(async move {
			let (history, first_turn) = service.load_history(req.session_id).await;
			let prompt = service
				.assemble(AssembleRequest {
					user_id: req.user_id.clone(),
					query: req.message.clone(),
					history,
					flags: req.flags,
					now: OffsetDateTime::now_utc(),
				})
				.await;

			tracing::debug!(
				session_id = %req.session_id,
				report = ?prompt.report,
				"Context assembled."
			);

			let job = TurnJob {
				user_id: req.user_id,
				user_message: req.message,
				attachments: req.attachments,
				prompt: prompt.messages(),
				first_turn,
			};

			reservation.launch(job).join().await
		});

		Ok(TurnStart { session_id, turn_id, events, task })
	}

	/// Prior turns as chat messages, and whether the session is new. A failed lookup yields no
	/// history and is never treated as a new session.
	async fn load_history(&self, session_id: Uuid) -> (Vec<ChatMessage>, bool) {
		let limit = self.cfg.context.max_history_turns.max(1);

		match self.stores.turns.recent_turns(session_id, limit).await {
			Ok(turns) => {
				let first_turn = turns.is_empty();
				let history = turns
					.into_iter()
					.take(self.cfg.context.max_history_turns as usize)
					.map(history_message)
					.collect();

				(history, first_turn)
			},
			Err(err) => {
				tracing::warn!(
					session_id = %session_id,
					error = %err,
					"Failed to load history. Continuing without it."
				);

				(Vec::new(), false)
			},
		}
	}
}

fn history_message(turn: ChatTurn) -> ChatMessage {
	let role = match turn.role {
		TurnRole::User => ChatRole::User,
		TurnRole::Assistant => ChatRole::Assistant,
		TurnRole::System => ChatRole::System,
	};

	ChatMessage::new(role, turn.content)
}
