use std::{pin::Pin, time::Duration};

use futures_util::stream::{self, Stream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Error, Result};
use colloq_config::LlmProviderConfig;

pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
	System,
	User,
	Assistant,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
	pub role: ChatRole,
	pub content: String,
}
impl ChatMessage {
	pub fn new(role: ChatRole, content: impl Into<String>) -> Self {
		Self { role, content: content.into() }
	}
}

#[derive(Deserialize)]
struct StreamChunk {
	#[serde(default)]
	choices: Vec<StreamChoice>,
	error: Option<Value>,
}

#[derive(Deserialize)]
struct StreamChoice {
	delta: StreamDelta,
	finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct StreamDelta {
	content: Option<String>,
}

/// One meaningful `data:` line of a chat stream.
#[derive(Debug, PartialEq, Eq)]
enum Frame {
	Token(String),
	/// A choice carrying a `finish_reason`, with any final content.
	Finish(Option<String>),
	Done,
}

/// Opens a streamed chat completion and yields content deltas in arrival order.
///
/// The configured timeout bounds connection setup only; a long generation is never cut off.
pub async fn stream_chat(
	cfg: &LlmProviderConfig,
	messages: &[ChatMessage],
) -> Result<TokenStream> {
	let client =
		Client::builder().connect_timeout(Duration::from_millis(cfg.timeout_ms)).build()?;
	let url = format!("{}{}", cfg.api_base, cfg.path);
	let body = serde_json::json!({
		"model": cfg.model,
		"temperature": cfg.temperature,
		"messages": messages,
		"stream": true,
	});
	let res = client
		.post(url)
		.headers(crate::auth_headers(&cfg.api_key, &cfg.default_headers)?)
		.json(&body)
		.send()
		.await?;
	let res = crate::check_status(res).await?;

	Ok(Box::pin(token_stream(stream_lines(res.bytes_stream()))))
}

/// Runs a single non-streamed chat completion and returns the first choice's content.
pub async fn complete(cfg: &LlmProviderConfig, messages: &[ChatMessage]) -> Result<String> {
	let client = crate::client(cfg.timeout_ms)?;
	let url = format!("{}{}", cfg.api_base, cfg.path);
	let body = serde_json::json!({
		"model": cfg.model,
		"temperature": cfg.temperature,
		"messages": messages,
	});
	let res = client
		.post(url)
		.headers(crate::auth_headers(&cfg.api_key, &cfg.default_headers)?)
		.json(&body)
		.send()
		.await?;
	let json: Value = crate::check_status(res).await?.json().await?;

	parse_completion(&json)
}

fn parse_completion(json: &Value) -> Result<String> {
	json.get("choices")
		.and_then(|v| v.as_array())
		.and_then(|arr| arr.first())
		.and_then(|choice| choice.get("message"))
		.and_then(|msg| msg.get("content"))
		.and_then(|c| c.as_str())
		.map(str::to_string)
		.ok_or_else(|| Error::InvalidResponse {
			message: "Chat completion response is missing message content.".to_string(),
		})
}

/// Returns `None` for lines that carry nothing: blanks, comments and role-only deltas. An `error`
/// object sent inside the stream is an error.
fn parse_stream_line(line: &str) -> Option<Result<Frame>> {
	let data = line.trim().strip_prefix("data:")?.trim();

	if data.is_empty() {
		return None;
	}
	if data == "[DONE]" {
		return Some(Ok(Frame::Done));
	}

	let chunk = match serde_json::from_str::<StreamChunk>(data) {
		Ok(chunk) => chunk,
		Err(err) => return Some(Err(Error::SerdeJson(err))),
	};

	if let Some(error) = chunk.error {
		let message = error
			.get("message")
			.and_then(Value::as_str)
			.map(str::to_string)
			.unwrap_or_else(|| error.to_string());

		return Some(Err(Error::InvalidResponse {
			message: format!("Chat stream reported an error: {message}"),
		}));
	}

	let choice = chunk.choices.into_iter().next()?;
	let content = choice.delta.content.filter(|content| !content.is_empty());

	match (content, choice.finish_reason) {
		(content, Some(_)) => Some(Ok(Frame::Finish(content))),
		(Some(content), None) => Some(Ok(Frame::Token(content))),
		(None, None) => None,
	}
}

/// Turns stream lines into content tokens. The stream succeeds only once `[DONE]` or a
/// `finish_reason` has been seen; a connection that closes before either yields an error.
fn token_stream(
	lines: impl Stream<Item = Result<String>> + Send + 'static,
) -> impl Stream<Item = Result<String>> + Send {
	let state = (Box::pin(lines), false, false);

	stream::unfold(state, |(mut lines, mut finished, over)| async move {
		if over {
			return None;
		}

		loop {
			let line = match lines.next().await {
				Some(Ok(line)) => line,
				Some(Err(err)) => return Some((Err(err), (lines, finished, true))),
				None if finished => return None,
				None => {
					let err = Error::InvalidResponse {
						message: "Chat stream ended before completion.".to_string(),
					};

					return Some((Err(err), (lines, finished, true)));
				},
			};

			match parse_stream_line(&line) {
				None => continue,
				Some(Err(err)) => return Some((Err(err), (lines, finished, true))),
				Some(Ok(Frame::Token(token))) => return Some((Ok(token), (lines, finished, false))),
				Some(Ok(Frame::Finish(content))) => {
					finished = true;

					if let Some(token) = content {
						return Some((Ok(token), (lines, finished, false)));
					}
				},
				Some(Ok(Frame::Done)) => return None,
			}
		}
	})
}

/// Re-frames a byte stream into complete lines. Bytes are buffered until a newline so multi-byte
/// characters split across network chunks decode intact.
fn stream_lines<B>(
	bytes: impl Stream<Item = reqwest::Result<B>> + Send + 'static,
) -> impl Stream<Item = Result<String>> + Send
where
	B: AsRef<[u8]>,
{
	let state = (Box::pin(bytes), Vec::<u8>::new(), false);

	stream::unfold(state, |(mut bytes, mut buffer, mut ended)| async move {
		loop {
			if let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
				let line: Vec<u8> = buffer.drain(..=pos).collect();
				let line = String::from_utf8_lossy(&line[..pos]).into_owned();

				if line.trim().is_empty() {
					continue;
				}

				return Some((Ok(line), (bytes, buffer, ended)));
			}
			if ended {
				if buffer.iter().all(u8::is_ascii_whitespace) {
					return None;
				}

				let rest = String::from_utf8_lossy(&std::mem::take(&mut buffer)).into_owned();

				return Some((Ok(rest), (bytes, buffer, ended)));
			}

			match bytes.next().await {
				Some(Ok(chunk)) => buffer.extend_from_slice(chunk.as_ref()),
				Some(Err(err)) => return Some((Err(Error::Reqwest(err)), (bytes, buffer, true))),
				None => ended = true,
			}
		}
	})
}
