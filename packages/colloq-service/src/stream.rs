use std::{
	collections::HashMap,
	sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use futures_util::StreamExt;
use serde::Serialize;
use serde_json::Value;
use time::{Duration, OffsetDateTime, format_description::well_known::Rfc3339};
use tokio::{
	sync::mpsc::{self, UnboundedReceiver, UnboundedSender},
	task::JoinHandle,
};
use uuid::Uuid;

use crate::{ChatMessage, ChatProvider, Error, Result, title};
use colloq_config::{LlmProviderConfig, Streaming};
use colloq_storage::{
	TurnStore,
	models::{ChatTurn, TurnRole},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamStatus {
	Idle,
	Generating,
	Completed,
	Failed,
}

#[derive(Clone, Debug, PartialEq)]
pub enum StreamEvent {
	Token { text: String, timestamp: OffsetDateTime },
	Done,
	Error { message: String },
}

#[derive(Clone, Debug, PartialEq)]
pub struct SessionSnapshot {
	pub session_id: Uuid,
	pub turn_id: Option<Uuid>,
	pub status: StreamStatus,
	pub accumulated_text: String,
	pub updated_at: OffsetDateTime,
}

/// Result of attaching to a session. `events` is present only while the session is generating.
#[derive(Debug)]
pub struct Attachment {
	pub snapshot: SessionSnapshot,
	pub events: Option<UnboundedReceiver<StreamEvent>>,
}

/// Everything a spawned generation needs besides the session itself.
#[derive(Clone, Debug)]
pub struct TurnJob {
	pub user_id: String,
	pub user_message: String,
	pub attachments: Option<Value>,
	/// Full message list sent to the model.
	pub prompt: Vec<ChatMessage>,
	/// Set when the session had no prior turns. Completion then spawns title generation.
	pub first_turn: bool,
}

#[derive(Debug)]
pub struct TurnOutcome {
	pub status: StreamStatus,
	/// Complete model output on success, whatever arrived before the failure otherwise.
	pub text: String,
	pub title_task: Option<JoinHandle<()>>,
}

#[derive(Debug)]
pub struct TurnHandle {
	pub session_id: Uuid,
	pub turn_id: Uuid,
	pub task: JoinHandle<TurnOutcome>,
}
impl TurnHandle {
	pub async fn join(self) -> Result<TurnOutcome> {
		self.task.await.map_err(|err| Error::StreamGenerationFailure { message: err.to_string() })
	}
}

/// A claimed session. Launching hands it to a generation task; dropping it unlaunched puts the
/// session back the way it was.
pub struct TurnReservation {
	coordinator: StreamCoordinator,
	session_id: Uuid,
	turn_id: Uuid,
	restore: Option<Restore>,
}
impl TurnReservation {
	pub fn session_id(&self) -> Uuid {
		self.session_id
	}

	pub fn turn_id(&self) -> Uuid {
		self.turn_id
	}

	pub fn launch(mut self, job: TurnJob) -> TurnHandle {
		self.restore = None;

		let coordinator = self.coordinator.clone();
		let (session_id, turn_id) = (self.session_id, self.turn_id);
		let guard = TurnGuard { coordinator: coordinator.clone(), session_id, turn_id };
		let task = tokio::spawn(async move {
			let outcome = coordinator.run_turn(session_id, turn_id, job).await;

			drop(guard);

			outcome
		});

		TurnHandle { session_id, turn_id, task }
	}
}
impl Drop for TurnReservation {
	fn drop(&mut self) {
		let Some(restore) = self.restore.take() else {
			return;
		};
		let mut sessions = self.coordinator.sessions();
		let owned = sessions
			.get(&self.session_id)
			.is_some_and(|slot| slot.turn_id == Some(self.turn_id));

		if !owned {
			return;
		}

		match restore {
			Restore::Remove => {
				sessions.remove(&self.session_id);
			},
			Restore::Previous(previous) =>
				if let Some(slot) = sessions.get_mut(&self.session_id) {
					slot.status = previous.status;
					slot.turn_id = previous.turn_id;
					slot.accumulated_text = previous.accumulated_text;
					slot.subscriber = previous.subscriber;
					slot.updated_at = previous.updated_at;
				},
		}

		tracing::debug!(session_id = %self.session_id, "Released unlaunched reservation.");
	}
}

/// Owns the per-session generation state. Clones share one registry.
#[derive(Clone)]
pub struct StreamCoordinator {
	inner: Arc<Inner>,
}
impl StreamCoordinator {
	pub fn new(
		turns: Arc<dyn TurnStore>,
		chat: Arc<dyn ChatProvider>,
		chat_cfg: LlmProviderConfig,
		streaming: Streaming,
	) -> Self {
		Self {
			inner: Arc::new(Inner {
				sessions: Mutex::new(HashMap::new()),
				turns,
				chat,
				chat_cfg,
				streaming,
			}),
		}
	}

	/// Claims `session_id` for a new generation.
	pub fn reserve(&self, session_id: Uuid) -> Result<TurnReservation> {
		let now = OffsetDateTime::now_utc();
		let ttl = finished_ttl(self.inner.streaming.finished_ttl_secs);
		let mut sessions = self.sessions();

		sessions.retain(|id, slot| *id == session_id || !slot.expired(now, ttl));

		let turn_id = Uuid::new_v4();
		let restore = match sessions.get_mut(&session_id) {
			Some(slot) if slot.status == StreamStatus::Generating =>
				return Err(Error::AlreadyGenerating { session_id }),
			Some(slot) => {
				let previous = SlotState {
					status: slot.status,
					turn_id: slot.turn_id,
					accumulated_text: std::mem::take(&mut slot.accumulated_text),
					subscriber: slot.subscriber.take(),
					updated_at: slot.updated_at,
				};

				slot.status = StreamStatus::Generating;
				slot.turn_id = Some(turn_id);
				slot.updated_at = now;

				Restore::Previous(previous)
			},
			None => {
				sessions.insert(session_id, SessionSlot {
					status: StreamStatus::Generating,
					turn_id: Some(turn_id),
					accumulated_text: String::new(),
					subscriber: None,
					updated_at: now,
				});

				Restore::Remove
			},
		};

		drop(sessions);

		Ok(TurnReservation {
			coordinator: self.clone(),
			session_id,
			turn_id,
			restore: Some(restore),
		})
	}

	pub fn start_turn(&self, session_id: Uuid, job: TurnJob) -> Result<TurnHandle> {
		Ok(self.reserve(session_id)?.launch(job))
	}

	/// Routes subsequent events of a generating session to a fresh channel, replacing any
	/// previous subscriber.
	pub fn attach_subscriber(&self, session_id: Uuid) -> Attachment {
		let mut sessions = self.sessions();
		let Some(slot) = sessions.get_mut(&session_id) else {
			return Attachment { snapshot: SessionSnapshot::idle(session_id), events: None };
		};
		let events = if slot.status == StreamStatus::Generating {
			let (tx, rx) = mpsc::unbounded_channel();

			slot.subscriber = Some(tx);

			Some(rx)
		} else {
			None
		};

		Attachment { snapshot: slot.snapshot(session_id), events }
	}

	/// Stops delivery to the current subscriber. Generation keeps running.
	pub fn detach_subscriber(&self, session_id: Uuid) {
		if let Some(slot) = self.sessions().get_mut(&session_id) {
			slot.subscriber = None;
		}
	}

	pub fn snapshot(&self, session_id: Uuid) -> SessionSnapshot {
		self.sessions()
			.get(&session_id)
			.map(|slot| slot.snapshot(session_id))
			.unwrap_or_else(|| SessionSnapshot::idle(session_id))
	}

	fn sessions(&self) -> MutexGuard<'_, HashMap<Uuid, SessionSlot>> {
		self.inner.sessions.lock().unwrap_or_else(PoisonError::into_inner)
	}

	async fn run_turn(&self, session_id: Uuid, turn_id: Uuid, job: TurnJob) -> TurnOutcome {
		let inner = &self.inner;
		let user_turn = ChatTurn {
			turn_id: Uuid::new_v4(),
			session_id,
			role: TurnRole::User,
			content: job.user_message.clone(),
			attachments: job.attachments.clone(),
			created_at: OffsetDateTime::now_utc(),
		};

		if let Err(err) = inner.turns.save_turn(&user_turn).await {
			log_persistence_failure(session_id, "user turn", &err);
		}

		let mut text = String::new();
		let generated = self.generate(session_id, turn_id, &job.prompt, &mut text).await;

		if let Err(message) = generated {
			tracing::warn!(session_id = %session_id, error = %message, "Generation failed.");

			self.finish(session_id, turn_id, StreamStatus::Failed, StreamEvent::Error { message });

			return TurnOutcome { status: StreamStatus::Failed, text, title_task: None };
		}

		if !text.trim().is_empty() {
			let assistant_turn = ChatTurn {
				turn_id,
				session_id,
				role: TurnRole::Assistant,
				content: text.clone(),
				attachments: None,
				created_at: OffsetDateTime::now_utc(),
			};

			if let Err(err) = inner.turns.save_turn(&assistant_turn).await {
				log_persistence_failure(session_id, "assistant turn", &err);
			}
		}
		if let Err(err) =
			inner.turns.touch_session(session_id, &job.user_id, OffsetDateTime::now_utc()).await
		{
			log_persistence_failure(session_id, "session", &err);
		}

		self.finish(session_id, turn_id, StreamStatus::Completed, StreamEvent::Done);

		tracing::info!(session_id = %session_id, turn_id = %turn_id, "Turn completed.");

		let title_task = (job.first_turn
			&& inner.streaming.title_generation
			&& !text.trim().is_empty())
		.then(|| {
			let inner = self.inner.clone();
			let reply = text.clone();

			tokio::spawn(async move {
				title::generate_title(
					inner.turns.as_ref(),
					inner.chat.as_ref(),
					&inner.chat_cfg,
					inner.streaming.title_max_chars as usize,
					session_id,
					&job.user_message,
					&reply,
				)
				.await;
			})
		});

		TurnOutcome { status: StreamStatus::Completed, text, title_task }
	}

	async fn generate(
		&self,
		session_id: Uuid,
		turn_id: Uuid,
		prompt: &[ChatMessage],
		text: &mut String,
	) -> std::result::Result<(), String> {
		let inner = &self.inner;
		let mut tokens =
			inner.chat.stream(&inner.chat_cfg, prompt).await.map_err(|err| err.to_string())?;

		while let Some(token) = tokens.next().await {
			let token = token.map_err(|err| err.to_string())?;

			if token.is_empty() {
				continue;
			}

			text.push_str(&token);

			self.publish_token(session_id, turn_id, token);
		}

		Ok(())
	}

	fn publish_token(&self, session_id: Uuid, turn_id: Uuid, token: String) {
		let mut sessions = self.sessions();
		let Some(slot) = sessions.get_mut(&session_id).filter(|slot| slot.turn_id == Some(turn_id))
		else {
			return;
		};
		let timestamp = OffsetDateTime::now_utc();

		slot.accumulated_text.push_str(&token);
		slot.updated_at = timestamp;
		slot.send(session_id, StreamEvent::Token { text: token, timestamp });
	}

	/// Fails a turn whose task stopped before finishing. No-op once the turn has finished.
	fn abandon(&self, session_id: Uuid, turn_id: Uuid) {
		let mut sessions = self.sessions();
		let Some(slot) = sessions.get_mut(&session_id).filter(|slot| {
			slot.turn_id == Some(turn_id) && slot.status == StreamStatus::Generating
		}) else {
			return;
		};

		tracing::error!(
			session_id = %session_id,
			turn_id = %turn_id,
			"Generation task ended before finishing."
		);

		slot.status = StreamStatus::Failed;
		slot.updated_at = OffsetDateTime::now_utc();
		slot.send(session_id, StreamEvent::Error {
			message: "Generation ended unexpectedly.".to_string(),
		});
	}

	fn finish(&self, session_id: Uuid, turn_id: Uuid, status: StreamStatus, event: StreamEvent) {
		let mut sessions = self.sessions();
		let Some(slot) = sessions.get_mut(&session_id).filter(|slot| slot.turn_id == Some(turn_id))
		else {
			return;
		};

		slot.status = status;
		slot.updated_at = OffsetDateTime::now_utc();
		slot.send(session_id, event);
	}
}

/// SSE `data:` payloads for one event, in order.
pub fn sse_frames(event: &StreamEvent) -> Vec<String> {
	match event {
		StreamEvent::Token { text, timestamp } => {
			let timestamp = timestamp
				.format(&Rfc3339)
				.unwrap_or_else(|_| timestamp.unix_timestamp().to_string());

			vec![serde_json::json!({ "token": text, "timestamp": timestamp }).to_string()]
		},
		StreamEvent::Done =>
			vec![serde_json::json!({ "done": true }).to_string(), "[DONE]".to_string()],
		StreamEvent::Error { message } =>
			vec![serde_json::json!({ "error": message }).to_string(), "[DONE]".to_string()],
	}
}

struct Inner {
	sessions: Mutex<HashMap<Uuid, SessionSlot>>,
	turns: Arc<dyn TurnStore>,
	chat: Arc<dyn ChatProvider>,
	chat_cfg: LlmProviderConfig,
	streaming: Streaming,
}

struct SessionSlot {
	status: StreamStatus,
	turn_id: Option<Uuid>,
	accumulated_text: String,
	subscriber: Option<UnboundedSender<StreamEvent>>,
	updated_at: OffsetDateTime,
}
impl SessionSlot {
	fn snapshot(&self, session_id: Uuid) -> SessionSnapshot {
		SessionSnapshot {
			session_id,
			turn_id: self.turn_id,
			status: self.status,
			accumulated_text: self.accumulated_text.clone(),
			updated_at: self.updated_at,
		}
	}

	fn send(&mut self, session_id: Uuid, event: StreamEvent) {
		let Some(subscriber) = &self.subscriber else {
			return;
		};

		if subscriber.send(event).is_err() {
			tracing::debug!(session_id = %session_id, "Subscriber went away. Detaching.");

			self.subscriber = None;
		}
	}

	fn expired(&self, now: OffsetDateTime, ttl: Duration) -> bool {
		let listening = self.subscriber.as_ref().is_some_and(|tx| !tx.is_closed());

		self.status != StreamStatus::Generating && !listening && now - self.updated_at > ttl
	}
}

impl SessionSnapshot {
	fn idle(session_id: Uuid) -> Self {
		Self {
			session_id,
			turn_id: None,
			status: StreamStatus::Idle,
			accumulated_text: String::new(),
			updated_at: OffsetDateTime::now_utc(),
		}
	}
}

/// Fails the turn if its task panics or is aborted before finishing, polled or not.
struct TurnGuard {
	coordinator: StreamCoordinator,
	session_id: Uuid,
	turn_id: Uuid,
}
impl Drop for TurnGuard {
	fn drop(&mut self) {
		self.coordinator.abandon(self.session_id, self.turn_id);
	}
}

struct SlotState {
	status: StreamStatus,
	turn_id: Option<Uuid>,
	accumulated_text: String,
	subscriber: Option<UnboundedSender<StreamEvent>>,
	updated_at: OffsetDateTime,
}

enum Restore {
	Remove,
	Previous(SlotState),
}

fn finished_ttl(secs: u64) -> Duration {
	Duration::seconds(i64::try_from(secs).unwrap_or(i64::MAX))
}

fn log_persistence_failure(session_id: Uuid, what: &str, err: &colloq_storage::Error) {
	let err = Error::PersistenceFailure { message: err.to_string() };

	tracing::warn!(session_id = %session_id, what, error = %err, "Failed to persist.");
}
