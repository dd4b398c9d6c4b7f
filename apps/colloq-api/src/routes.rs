use std::convert::Infallible;

use axum::{
	Json, Router,
	extract::{Path, State},
	http::StatusCode,
	response::{
		IntoResponse, Response,
		sse::{Event, KeepAlive, KeepAliveStream, Sse},
	},
	routing::{get, post},
};
use futures_util::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use tokio::sync::mpsc::UnboundedReceiver;
use uuid::Uuid;

use crate::state::AppState;
use colloq_service::{
	ContextFlags, Error, IngestReport, IngestRequest, RagSearch, StreamEvent, StreamStatus,
	TurnRequest, stream::sse_frames,
};

type EventStream = Sse<KeepAliveStream<BoxStream<'static, Result<Event, Infallible>>>>;

pub fn router(state: AppState) -> Router {
	Router::new()
		.route("/health", get(health))
		.route("/v1/sessions/{session_id}/turns", post(start_turn))
		.route("/v1/sessions/{session_id}/stream", get(attach_stream).delete(detach_stream))
		.route("/v1/sessions/{session_id}/state", get(session_state))
		.route("/v1/index/ingest", post(ingest))
		.route("/v1/search", post(search))
		.with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct TurnBody {
	pub user_id: String,
	pub message: String,
	#[serde(default)]
	pub attachments: Option<Value>,
	#[serde(flatten)]
	pub flags: ContextFlags,
}

#[derive(Debug, Deserialize)]
pub struct SearchBody {
	pub query: String,
	pub k: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct SessionState {
	pub session_id: Uuid,
	pub status: StreamStatus,
	pub turn_id: Option<Uuid>,
	pub accumulated_text: String,
	#[serde(with = "time::serde::rfc3339")]
	pub updated_at: OffsetDateTime,
}

async fn health() -> StatusCode {
	StatusCode::OK
}

async fn start_turn(
	State(state): State<AppState>,
	Path(session_id): Path<Uuid>,
	Json(body): Json<TurnBody>,
) -> Result<EventStream, ApiError> {
	let start = state.service.start_chat_turn(TurnRequest {
		user_id: body.user_id,
		session_id,
		message: body.message,
		attachments: body.attachments,
		flags: body.flags,
	})?;

	tracing::info!(session_id = %start.session_id, turn_id = %start.turn_id, "Turn started.");

	Ok(event_stream(start.events))
}

async fn attach_stream(
	State(state): State<AppState>,
	Path(session_id): Path<Uuid>,
) -> Result<EventStream, ApiError> {
	let attachment = state.service.coordinator.attach_subscriber(session_id);
	let Some(events) = attachment.events else {
		return Err(ApiError::new(
			StatusCode::NOT_FOUND,
			"not_generating",
			format!("Session {session_id} is not generating."),
		));
	};

	Ok(event_stream(events))
}

async fn detach_stream(State(state): State<AppState>, Path(session_id): Path<Uuid>) -> StatusCode {
	state.service.coordinator.detach_subscriber(session_id);

	StatusCode::NO_CONTENT
}

async fn session_state(
	State(state): State<AppState>,
	Path(session_id): Path<Uuid>,
) -> Json<SessionState> {
	let snapshot = state.service.coordinator.snapshot(session_id);

	Json(SessionState {
		session_id,
		status: snapshot.status,
		turn_id: snapshot.turn_id,
		accumulated_text: snapshot.accumulated_text,
		updated_at: snapshot.updated_at,
	})
}

async fn ingest(
	State(state): State<AppState>,
	Json(payload): Json<IngestRequest>,
) -> Result<Json<IngestReport>, ApiError> {
	let report = state.service.ingest(payload).await?;

	Ok(Json(report))
}

async fn search(
	State(state): State<AppState>,
	Json(payload): Json<SearchBody>,
) -> Result<Json<RagSearch>, ApiError> {
	if payload.query.trim().is_empty() {
		let message = "query must be non-empty.".to_string();

		return Err(Error::InvalidRequest { message }.into());
	}

	let k = payload.k.unwrap_or(state.service.cfg.retrieval.top_k);

	if k == 0 {
		let message = "k must be greater than zero.".to_string();

		return Err(Error::InvalidRequest { message }.into());
	}

	Ok(Json(state.service.rag_search(&payload.query, k).await))
}

/// Frames a subscription as SSE and ends it after the terminal event. Dropping the response
/// drops the receiver, which detaches the subscriber on the next send.
fn event_stream(events: UnboundedReceiver<StreamEvent>) -> EventStream {
	let frames = stream::unfold(Some(events), |events| async move {
		let mut events = events?;
		let event = events.recv().await?;
		let terminal = matches!(event, StreamEvent::Done | StreamEvent::Error { .. });

		Some((event, (!terminal).then_some(events)))
	})
	.flat_map(|event| stream::iter(sse_frames(&event)))
	.map(|data| Ok(Event::default().data(data)));

	Sse::new(frames.boxed()).keep_alive(KeepAlive::default())
}

#[derive(Debug, Serialize)]
struct ErrorBody {
	error_code: String,
	message: String,
}

#[derive(Debug)]
pub struct ApiError {
	status: StatusCode,
	error_code: String,
	message: String,
}
impl ApiError {
	fn new(status: StatusCode, error_code: impl Into<String>, message: impl Into<String>) -> Self {
		Self { status, error_code: error_code.into(), message: message.into() }
	}
}

impl From<Error> for ApiError {
	fn from(err: Error) -> Self {
		let (status, code) = match &err {
			Error::InvalidRequest { .. } => (StatusCode::BAD_REQUEST, "invalid_request"),
			Error::AlreadyGenerating { .. } => (StatusCode::CONFLICT, "already_generating"),
			Error::NotFound { .. } => (StatusCode::NOT_FOUND, "not_found"),
			Error::IndexUnavailable { .. } =>
				(StatusCode::SERVICE_UNAVAILABLE, "index_unavailable"),
			Error::EmbeddingFailure { .. } => (StatusCode::BAD_GATEWAY, "embedding_failure"),
			Error::StreamGenerationFailure { .. } =>
				(StatusCode::INTERNAL_SERVER_ERROR, "stream_generation_failure"),
			Error::PersistenceFailure { .. } =>
				(StatusCode::INTERNAL_SERVER_ERROR, "persistence_failure"),
		};

		if status.is_server_error() {
			tracing::error!(error = %err, "Request failed.");
		}

		Self::new(status, code, err.to_string())
	}
}

impl IntoResponse for ApiError {
	fn into_response(self) -> Response {
		let body = ErrorBody { error_code: self.error_code, message: self.message };

		(self.status, Json(body)).into_response()
	}
}
