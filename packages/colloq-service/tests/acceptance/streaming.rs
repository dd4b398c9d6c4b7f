use std::{sync::Arc, time::Duration};

use tokio::sync::{Semaphore, mpsc::UnboundedReceiver};
use uuid::Uuid;

use colloq_service::{Error, StreamCoordinator, StreamEvent, StreamStatus, TurnOutcome};
use colloq_storage::models::TurnRole;
use colloq_testkit::{Harness, fakes::ScriptedChat};

use super::{collect, job, tokens};

fn gated_harness() -> (Harness, Arc<Semaphore>) {
	let gate = Arc::new(Semaphore::new(0));
	let harness = Harness::builder()
		.chat(ScriptedChat::new(["Hello", ", ", "world."]).gated(gate.clone()))
		.build();

	(harness, gate)
}

/// Reserves, subscribes, then launches, so no event can be missed.
async fn run_subscribed(
	coordinator: &StreamCoordinator,
	session_id: Uuid,
	first_turn: bool,
) -> (TurnOutcome, Vec<StreamEvent>) {
	let reservation = coordinator.reserve(session_id).expect("Reserve failed.");
	let mut events = subscribe(coordinator, session_id);
	let outcome = reservation.launch(job("When is tuition due?", first_turn)).join().await;
	let outcome = outcome.expect("Turn task panicked.");

	(outcome, collect(&mut events).await)
}

fn subscribe(coordinator: &StreamCoordinator, session_id: Uuid) -> UnboundedReceiver<StreamEvent> {
	coordinator.attach_subscriber(session_id).events.expect("Session is not generating.")
}

async fn next_event(events: &mut UnboundedReceiver<StreamEvent>) -> Option<StreamEvent> {
	tokio::time::timeout(Duration::from_secs(5), events.recv())
		.await
		.expect("Timed out waiting for a stream event.")
}

#[tokio::test]
async fn tokens_arrive_in_order_and_both_turns_persist() {
	let harness = Harness::new();
	let coordinator = &harness.service.coordinator;
	let session_id = Uuid::new_v4();
	let reservation = coordinator.reserve(session_id).expect("Reserve failed.");
	let turn_id = reservation.turn_id();
	let mut events = subscribe(coordinator, session_id);
	let outcome = reservation
		.launch(job("When is tuition due?", false))
		.join()
		.await
		.expect("Turn task panicked.");
	let events = collect(&mut events).await;

	assert_eq!(tokens(&events), vec!["Hello", ", ", "world."]);
	assert_eq!(events.last(), Some(&StreamEvent::Done));
	assert_eq!(outcome.status, StreamStatus::Completed);
	assert_eq!(outcome.text, "Hello, world.");
	assert!(outcome.title_task.is_none());

	let turns = harness.turns.turns(session_id);

	assert_eq!(turns.len(), 2);
	assert_eq!(turns[0].role, TurnRole::User);
	assert_eq!(turns[0].content, "When is tuition due?");
	assert_eq!(turns[1].role, TurnRole::Assistant);
	assert_eq!(turns[1].turn_id, turn_id);
	assert_eq!(turns[1].content, "Hello, world.");
	assert_eq!(harness.turns.touches(session_id), 1);

	let snapshot = coordinator.snapshot(session_id);

	assert_eq!(snapshot.status, StreamStatus::Completed);
	assert_eq!(snapshot.turn_id, Some(turn_id));
	assert_eq!(snapshot.accumulated_text, "Hello, world.");
	assert_eq!(harness.chat.completions(), 0);
}

#[tokio::test]
async fn second_turn_is_rejected_while_generating() {
	let (harness, gate) = gated_harness();
	let coordinator = &harness.service.coordinator;
	let session_id = Uuid::new_v4();
	let handle = coordinator.start_turn(session_id, job("first", false)).expect("Start failed.");

	match coordinator.start_turn(session_id, job("second", false)) {
		Err(Error::AlreadyGenerating { session_id: busy }) => assert_eq!(busy, session_id),
		other => panic!("Expected AlreadyGenerating, got {other:?}."),
	}

	let other_session = coordinator.reserve(Uuid::new_v4()).expect("Other sessions stay free.");

	drop(other_session);
	gate.add_permits(3);

	let outcome = handle.join().await.expect("Turn task panicked.");

	assert_eq!(outcome.status, StreamStatus::Completed);
	assert_eq!(harness.chat.prompts().len(), 1);
	assert!(coordinator.reserve(session_id).is_ok());
}

#[tokio::test]
async fn dropped_reservation_puts_the_session_back() {
	let harness = Harness::new();
	let coordinator = &harness.service.coordinator;
	let fresh = Uuid::new_v4();

	drop(coordinator.reserve(fresh).expect("Reserve failed."));

	let snapshot = coordinator.snapshot(fresh);

	assert_eq!(snapshot.status, StreamStatus::Idle);
	assert_eq!(snapshot.turn_id, None);

	let finished = Uuid::new_v4();
	let (outcome, _) = run_subscribed(coordinator, finished, false).await;
	let before = coordinator.snapshot(finished);

	assert_eq!(outcome.status, StreamStatus::Completed);

	let reservation = coordinator.reserve(finished).expect("Reserve failed.");

	assert_eq!(coordinator.snapshot(finished).status, StreamStatus::Generating);
	assert_eq!(coordinator.snapshot(finished).accumulated_text, "");

	drop(reservation);

	let after = coordinator.snapshot(finished);

	assert_eq!(after.status, StreamStatus::Completed);
	assert_eq!(after.turn_id, before.turn_id);
	assert_eq!(after.accumulated_text, "Hello, world.");
	assert!(coordinator.attach_subscriber(finished).events.is_none());
	assert_eq!(harness.chat.prompts().len(), 1);
}

#[tokio::test]
async fn mid_stream_failure_marks_the_turn_failed() {
	let chat = ScriptedChat::new(["Hello", ", ", "world."]).failing_after(1);
	let harness = Harness::builder().chat(chat).build();
	let coordinator = &harness.service.coordinator;
	let session_id = Uuid::new_v4();
	let (outcome, events) = run_subscribed(coordinator, session_id, true).await;

	assert_eq!(tokens(&events), vec!["Hello"]);
	assert!(matches!(events.last(), Some(StreamEvent::Error { .. })));
	assert_eq!(outcome.status, StreamStatus::Failed);
	assert_eq!(outcome.text, "Hello");
	assert!(outcome.title_task.is_none());

	let turns = harness.turns.turns(session_id);

	assert_eq!(turns.len(), 1);
	assert_eq!(turns[0].role, TurnRole::User);
	assert_eq!(harness.turns.touches(session_id), 0);
	assert_eq!(coordinator.snapshot(session_id).status, StreamStatus::Failed);
}

#[tokio::test]
async fn connection_failure_emits_a_single_error_event() {
	let harness =
		Harness::builder().chat(ScriptedChat::new(["unused"]).failing_to_connect()).build();
	let session_id = Uuid::new_v4();
	let (outcome, events) = run_subscribed(&harness.service.coordinator, session_id, false).await;

	assert_eq!(outcome.status, StreamStatus::Failed);
	assert_eq!(events.len(), 1);
	assert!(matches!(&events[0], StreamEvent::Error { message } if !message.is_empty()));
}

#[tokio::test]
async fn panicking_generation_fails_the_turn_and_frees_the_session() {
	let harness = Harness::builder().chat(ScriptedChat::new(["Hello"]).panicking()).build();
	let coordinator = &harness.service.coordinator;
	let session_id = Uuid::new_v4();
	let reservation = coordinator.reserve(session_id).expect("Reserve failed.");
	let mut events = subscribe(coordinator, session_id);

	match reservation.launch(job("hi", false)).join().await {
		Err(Error::StreamGenerationFailure { .. }) => {},
		other => panic!("Expected StreamGenerationFailure, got {other:?}."),
	}

	assert!(matches!(next_event(&mut events).await, Some(StreamEvent::Error { .. })));
	assert_eq!(coordinator.snapshot(session_id).status, StreamStatus::Failed);
	assert_eq!(harness.turns.turns(session_id).len(), 1);
	assert_eq!(harness.turns.touches(session_id), 0);
	assert!(coordinator.reserve(session_id).is_ok());
}

#[tokio::test]
async fn aborted_generation_fails_the_turn() {
	let (harness, _gate) = gated_harness();
	let coordinator = &harness.service.coordinator;
	let session_id = Uuid::new_v4();
	let reservation = coordinator.reserve(session_id).expect("Reserve failed.");
	let mut events = subscribe(coordinator, session_id);
	let handle = reservation.launch(job("hi", false));

	handle.task.abort();

	assert!(matches!(next_event(&mut events).await, Some(StreamEvent::Error { .. })));
	assert_eq!(coordinator.snapshot(session_id).status, StreamStatus::Failed);
	assert!(harness.turns.turns(session_id).iter().all(|turn| turn.role == TurnRole::User));
	assert!(coordinator.reserve(session_id).is_ok());
}

#[tokio::test]
async fn new_turn_closes_the_previous_subscriber() {
	let (harness, gate) = gated_harness();
	let coordinator = &harness.service.coordinator;
	let session_id = Uuid::new_v4();
	let reservation = coordinator.reserve(session_id).expect("Reserve failed.");
	let mut first = subscribe(coordinator, session_id);
	let handle = reservation.launch(job("first", false));

	gate.add_permits(3);
	handle.join().await.expect("Turn task panicked.");

	assert_eq!(collect(&mut first).await.last(), Some(&StreamEvent::Done));

	let handle = coordinator.start_turn(session_id, job("second", false)).expect("Start failed.");

	assert_eq!(next_event(&mut first).await, None);

	let mut second = subscribe(coordinator, session_id);

	gate.add_permits(3);
	handle.join().await.expect("Turn task panicked.");

	assert_eq!(tokens(&collect(&mut second).await), vec!["Hello", ", ", "world."]);
}

#[tokio::test]
async fn detaching_does_not_cancel_generation() {
	let (harness, gate) = gated_harness();
	let coordinator = &harness.service.coordinator;
	let session_id = Uuid::new_v4();
	let reservation = coordinator.reserve(session_id).expect("Reserve failed.");
	let mut events = subscribe(coordinator, session_id);
	let handle = reservation.launch(job("hi", false));

	gate.add_permits(1);

	assert!(matches!(next_event(&mut events).await, Some(StreamEvent::Token { .. })));

	coordinator.detach_subscriber(session_id);
	gate.add_permits(2);

	let outcome = handle.join().await.expect("Turn task panicked.");

	assert_eq!(outcome.status, StreamStatus::Completed);
	assert_eq!(outcome.text, "Hello, world.");
	assert!(collect(&mut events).await.is_empty());

	let attachment = coordinator.attach_subscriber(session_id);
	let turns = harness.turns.turns(session_id);

	assert!(attachment.events.is_none());
	assert_eq!(attachment.snapshot.status, StreamStatus::Completed);
	assert_eq!(turns.len(), 2);
	assert_eq!(attachment.snapshot.accumulated_text, turns[1].content);
}

#[tokio::test]
async fn reattaching_replaces_the_previous_subscriber() {
	let (harness, gate) = gated_harness();
	let coordinator = &harness.service.coordinator;
	let session_id = Uuid::new_v4();
	let reservation = coordinator.reserve(session_id).expect("Reserve failed.");
	let mut first = subscribe(coordinator, session_id);
	let handle = reservation.launch(job("hi", false));

	gate.add_permits(1);

	assert!(matches!(next_event(&mut first).await, Some(StreamEvent::Token { .. })));

	let attachment = coordinator.attach_subscriber(session_id);

	assert_eq!(attachment.snapshot.status, StreamStatus::Generating);
	assert_eq!(attachment.snapshot.accumulated_text, "Hello");

	let mut second = attachment.events.expect("Session is not generating.");

	gate.add_permits(2);
	handle.join().await.expect("Turn task panicked.");

	let replayed = collect(&mut second).await;

	assert!(collect(&mut first).await.is_empty());
	assert_eq!(tokens(&replayed), vec![", ", "world."]);
	assert_eq!(replayed.last(), Some(&StreamEvent::Done));
}

#[tokio::test]
async fn closed_subscriber_is_dropped_and_generation_finishes() {
	let harness = Harness::new();
	let coordinator = &harness.service.coordinator;
	let session_id = Uuid::new_v4();
	let reservation = coordinator.reserve(session_id).expect("Reserve failed.");

	drop(subscribe(coordinator, session_id));

	let outcome = reservation.launch(job("hi", false)).join().await.expect("Turn task panicked.");

	assert_eq!(outcome.status, StreamStatus::Completed);
	assert_eq!(harness.turns.turns(session_id).len(), 2);
	assert_eq!(coordinator.snapshot(session_id).accumulated_text, "Hello, world.");
}

#[tokio::test]
async fn concurrent_sessions_never_share_tokens() {
	let harness = Harness::new();
	let coordinator = &harness.service.coordinator;
	let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
	let reservation_a = coordinator.reserve(a).expect("Reserve failed.");
	let reservation_b = coordinator.reserve(b).expect("Reserve failed.");
	let mut events_a = subscribe(coordinator, a);
	let mut events_b = subscribe(coordinator, b);
	let handle_a = reservation_a.launch(job("about fees", false));
	let handle_b = reservation_b.launch(job("about housing", false));
	let (outcome_a, outcome_b) = tokio::join!(handle_a.join(), handle_b.join());

	assert_eq!(outcome_a.expect("Turn task panicked.").status, StreamStatus::Completed);
	assert_eq!(outcome_b.expect("Turn task panicked.").status, StreamStatus::Completed);

	for events in [collect(&mut events_a).await, collect(&mut events_b).await] {
		assert_eq!(tokens(&events), vec!["Hello", ", ", "world."]);
		assert_eq!(events.iter().filter(|event| **event == StreamEvent::Done).count(), 1);
	}

	assert_eq!(harness.turns.turns(a)[0].content, "about fees");
	assert_eq!(harness.turns.turns(b)[0].content, "about housing");
}

#[tokio::test]
async fn blank_output_is_not_persisted_or_titled() {
	let harness = Harness::builder().chat(ScriptedChat::new(["  ", ""])).build();
	let session_id = Uuid::new_v4();
	let (outcome, events) = run_subscribed(&harness.service.coordinator, session_id, true).await;

	assert_eq!(outcome.status, StreamStatus::Completed);
	assert!(outcome.title_task.is_none());
	assert_eq!(tokens(&events), vec!["  "]);

	let turns = harness.turns.turns(session_id);

	assert_eq!(turns.len(), 1);
	assert_eq!(turns[0].role, TurnRole::User);
	assert_eq!(harness.chat.completions(), 0);
}

#[tokio::test]
async fn persistence_failures_do_not_fail_the_turn() {
	let harness = Harness::new();

	harness.turns.set_fail_saves(true);

	let session_id = Uuid::new_v4();
	let (outcome, events) = run_subscribed(&harness.service.coordinator, session_id, false).await;

	assert_eq!(outcome.status, StreamStatus::Completed);
	assert_eq!(events.last(), Some(&StreamEvent::Done));
	assert!(harness.turns.turns(session_id).is_empty());
	assert_eq!(harness.turns.touches(session_id), 0);
}

#[tokio::test]
async fn first_turn_gets_a_title() {
	let chat =
		ScriptedChat::new(["Tuition is due in March."]).with_title(Some("\"Tuition deadline.\""));
	let harness = Harness::builder().chat(chat).build();
	let session_id = Uuid::new_v4();
	let (outcome, _) = run_subscribed(&harness.service.coordinator, session_id, true).await;

	outcome.title_task.expect("No title task.").await.expect("Title task panicked.");

	assert_eq!(harness.turns.title(session_id).as_deref(), Some("Tuition deadline"));
	assert_eq!(harness.chat.completions(), 1);

	let later = Uuid::new_v4();
	let (outcome, _) = run_subscribed(&harness.service.coordinator, later, false).await;

	assert!(outcome.title_task.is_none());
	assert_eq!(harness.turns.title(later), None);
}

#[tokio::test]
async fn title_failures_and_disabled_titles_leave_no_title() {
	let harness = Harness::builder().chat(ScriptedChat::new(["Reply."]).with_title(None)).build();
	let session_id = Uuid::new_v4();
	let (outcome, _) = run_subscribed(&harness.service.coordinator, session_id, true).await;

	assert_eq!(outcome.status, StreamStatus::Completed);

	outcome.title_task.expect("No title task.").await.expect("Title task panicked.");

	assert_eq!(harness.turns.title(session_id), None);

	let harness = Harness::builder().config(|cfg| cfg.streaming.title_generation = false).build();
	let session_id = Uuid::new_v4();
	let (outcome, _) = run_subscribed(&harness.service.coordinator, session_id, true).await;

	assert!(outcome.title_task.is_none());
	assert_eq!(harness.chat.completions(), 0);
}

#[tokio::test]
async fn finished_sessions_are_pruned_unless_someone_listens() {
	let harness = Harness::builder().config(|cfg| cfg.streaming.finished_ttl_secs = 0).build();
	let coordinator = &harness.service.coordinator;
	let (abandoned, watched) = (Uuid::new_v4(), Uuid::new_v4());

	run_subscribed(coordinator, abandoned, false).await;

	let reservation = coordinator.reserve(watched).expect("Reserve failed.");
	let _listener = subscribe(coordinator, watched);

	reservation.launch(job("hi", false)).join().await.expect("Turn task panicked.");
	tokio::time::sleep(Duration::from_millis(20)).await;
	drop(coordinator.reserve(Uuid::new_v4()).expect("Reserve failed."));

	assert_eq!(coordinator.snapshot(abandoned).status, StreamStatus::Idle);
	assert_eq!(coordinator.snapshot(abandoned).turn_id, None);
	assert_eq!(coordinator.snapshot(watched).status, StreamStatus::Completed);
}
