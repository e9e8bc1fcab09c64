//! Replay of recorded event streams through the reconciler
//!
//! A fixture is a JSONL file. Each line is either a [`Delta`] record, a chat
//! payload record (`{"type": "text", ...}`) or a workflow envelope
//! (`{"event": "ai_chunk", ...}`). A reader task parses lines into a mailbox;
//! the replay loop drains it into a [`DeltaSink`].

use anyhow::{Context, Result};
use bough_engine::{Conversation, ReconcileEvent, Session, SlotDispatcher};
use bough_log::{Decoded, Delta, Status, payload};
use serde_json::Value;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::LinesStream;
use tokio_util::sync::CancellationToken;

/// Mailbox capacity between the reader task and the replay loop
const MAILBOX_SIZE: usize = 64;

/// One parsed fixture line
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Deltas(Vec<Delta>),
    /// The whole run ended; close every open segment with this status
    Finished(Status),
}

/// Where replayed deltas go
pub trait DeltaSink {
    /// Apply one delta
    fn apply(&mut self, delta: &Delta) -> bough_engine::Result<ReconcileEvent>;

    /// Close every open segment with `status`, returning how many were closed
    fn finish(&mut self, status: Status) -> usize;
}

impl DeltaSink for Session {
    fn apply(&mut self, delta: &Delta) -> bough_engine::Result<ReconcileEvent> {
        self.apply_delta(delta)
    }

    fn finish(&mut self, status: Status) -> usize {
        self.active_mut()
            .and_then(|c: &mut Conversation| c.finalize(status))
            .map_or(0, |_| 1)
    }
}

impl DeltaSink for SlotDispatcher {
    fn apply(&mut self, delta: &Delta) -> bough_engine::Result<ReconcileEvent> {
        self.dispatch(delta)
    }

    fn finish(&mut self, status: Status) -> usize {
        self.finish_all(status).len()
    }
}

/// Counters reported after a replay
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplayStats {
    pub deltas: usize,
    pub committed: usize,
    pub rejected: usize,
    pub canceled: bool,
}

/// Parse one fixture line. `Ok(None)` means the line carries nothing to apply.
pub fn parse_line(line: &str, default_slot: &str) -> bough_log::Result<Option<StreamEvent>> {
    let value: Value = serde_json::from_str(line)?;
    if value.get("slot").is_some() && value.get("role").is_some() {
        let delta: Delta = serde_json::from_value(value)?;
        return Ok(Some(StreamEvent::Deltas(vec![delta])));
    }
    if value.get("event").is_some() {
        return Ok(match payload::decode_workflow(line)? {
            Decoded::Deltas(deltas) => Some(StreamEvent::Deltas(deltas)),
            Decoded::Finished(status) => Some(StreamEvent::Finished(status)),
            Decoded::Ignored => None,
        });
    }
    let deltas = bough_log::Payload::from_value(value)?.into_deltas(default_slot, false);
    Ok(Some(StreamEvent::Deltas(deltas)))
}

/// Spawn a task reading `path` into a mailbox until EOF or cancellation
pub async fn spawn_reader(
    path: PathBuf,
    default_slot: String,
    token: CancellationToken,
) -> Result<mpsc::Receiver<StreamEvent>> {
    let file = tokio::fs::File::open(&path)
        .await
        .with_context(|| format!("opening {}", path.display()))?;
    let (tx, rx) = mpsc::channel(MAILBOX_SIZE);

    tokio::spawn(async move {
        let mut lines = LinesStream::new(BufReader::new(file).lines());
        let mut n = 0;
        loop {
            let line = tokio::select! {
                _ = token.cancelled() => break,
                line = lines.next() => line,
            };
            n += 1;
            let line = match line {
                None => break,
                Some(Ok(line)) => line,
                Some(Err(e)) => {
                    tracing::warn!("{}:{}: read failed: {}", path.display(), n, e);
                    break;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            match parse_line(&line, &default_slot) {
                Ok(Some(event)) => {
                    if tx.send(event).await.is_err() {
                        break;
                    }
                }
                Ok(None) => {}
                Err(e) if e.is_skippable() => {
                    tracing::debug!("{}:{}: skipping: {}", path.display(), n, e);
                }
                Err(e) => tracing::warn!("{}:{}: {}", path.display(), n, e),
            }
        }
    });

    Ok(rx)
}

/// Drain `rx` into `sink`.
///
/// End of input closes open segments as completed; cancellation (or reaching
/// `cancel_after` deltas) closes them as canceled.
pub async fn run<S: DeltaSink>(
    sink: &mut S,
    mut rx: mpsc::Receiver<StreamEvent>,
    token: CancellationToken,
    cancel_after: Option<usize>,
) -> ReplayStats {
    let mut stats = ReplayStats::default();

    loop {
        let event = tokio::select! {
            biased;
            _ = token.cancelled() => {
                stats.canceled = true;
                stats.committed += sink.finish(Status::Canceled);
                break;
            }
            event = rx.recv() => event,
        };

        match event {
            None => {
                stats.committed += sink.finish(Status::Completed);
                break;
            }
            Some(StreamEvent::Finished(status)) => {
                stats.committed += sink.finish(status);
            }
            Some(StreamEvent::Deltas(deltas)) => {
                for delta in &deltas {
                    if cancel_after.is_some_and(|limit| stats.deltas >= limit) {
                        token.cancel();
                        break;
                    }
                    stats.deltas += 1;
                    match sink.apply(delta) {
                        Ok(event) if event.is_terminal() => stats.committed += 1,
                        Ok(_) => {}
                        Err(_) => stats.rejected += 1,
                    }
                }
            }
        }
    }

    tracing::debug!("replay finished: {:?}", stats);
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use bough_engine::{BranchPointId, ConversationConfig};
    use bough_log::{DeltaKind, Message};

    async fn replay_into<S: DeltaSink>(sink: &mut S, fixture: &str, cancel_after: Option<usize>) -> ReplayStats {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fixture.jsonl");
        tokio::fs::write(&path, fixture).await.unwrap();
        let token = CancellationToken::new();
        let rx = spawn_reader(path.clone(), "c1".to_string(), token.clone())
            .await
            .unwrap();
        run(sink, rx, token, cancel_after).await
    }

    fn session() -> Session {
        let mut session = Session::new(ConversationConfig::default());
        session.open("c1", &[Message::user("u1", None, "q", 1)]);
        session
    }

    #[test]
    fn test_parse_delta_line() {
        let event = parse_line(r#"{"slot":"n1","role":"user","fragment":"hi","terminal":true}"#, "c1")
            .unwrap()
            .unwrap();
        let StreamEvent::Deltas(deltas) = event else {
            panic!("expected deltas");
        };
        assert_eq!(deltas[0].slot, "n1");
        assert!(deltas[0].terminal);
    }

    #[test]
    fn test_parse_payload_line_uses_default_slot() {
        let event = parse_line(r#"{"type":"thinking","data":"hmm"}"#, "c1").unwrap();
        let Some(StreamEvent::Deltas(deltas)) = event else {
            panic!("expected deltas");
        };
        assert_eq!(deltas[0].slot, "c1");
        assert_eq!(deltas[0].kind, DeltaKind::Thinking);
    }

    #[test]
    fn test_parse_workflow_lines() {
        let done = parse_line(r#"{"event":"workflow","workflow":{"status":"completed"}}"#, "c1").unwrap();
        assert_eq!(done, Some(StreamEvent::Finished(Status::Completed)));
        let node = parse_line(r#"{"event":"node","node":{"id":"n1"}}"#, "c1").unwrap();
        assert_eq!(node, None);
        assert!(parse_line(r#"{"type":"ping"}"#, "c1").unwrap_err().is_skippable());
    }

    #[tokio::test]
    async fn test_replay_chat_payloads() {
        let mut session = session();
        let fixture = concat!(
            "{\"type\":\"thinking\",\"data\":\"let me see\",\"message_id\":\"a1\"}\n",
            "{\"type\":\"text\",\"data\":\"Hel\",\"message_id\":\"a1\"}\n",
            "{\"type\":\"heartbeat\"}\n",
            "{\"type\":\"text\",\"data\":\"lo\",\"message_id\":\"a1\"}\n",
            "{\"type\":\"file_used\",\"data\":[{\"file_name\":\"kb.md\"}]}\n",
            "{\"type\":\"token\",\"total_token\":12,\"completion_tokens\":4,\"prompt_tokens\":8}\n",
        );
        let stats = replay_into(&mut session, fixture, None).await;
        assert_eq!(stats.deltas, 5);
        assert_eq!(stats.committed, 1);
        assert_eq!(stats.rejected, 0);

        let conversation = session.active().unwrap();
        assert!(!conversation.is_streaming());
        let reply = conversation.path().turns()[0].alternative.clone().unwrap();
        assert_eq!(reply.id(), "a1");
        assert_eq!(reply.text().unwrap().content, "Hello");
        assert_eq!(reply.thinking().unwrap().content, "let me see");
        assert_eq!(reply.references().count(), 1);
        assert_eq!(reply.usage().map(|u| u.total_tokens), Some(12));
    }

    #[tokio::test]
    async fn test_cancel_after_commits_partial_reply() {
        let mut session = session();
        let fixture = "{\"type\":\"text\",\"data\":\"a\"}\n".repeat(5);
        let stats = replay_into(&mut session, &fixture, Some(2)).await;
        assert!(stats.canceled);
        assert_eq!(stats.deltas, 2);

        let reply = session.active().unwrap().path().turns()[0]
            .alternative
            .clone()
            .unwrap();
        assert_eq!(reply.status(), Status::Canceled);
        assert_eq!(reply.text().unwrap().content, "aa");
    }

    #[tokio::test]
    async fn test_replay_workflow_slots() {
        let mut slots = SlotDispatcher::default().with_auto_open(true);
        let chunk = |node: &str, kind: &str, data: &str| {
            let result = serde_json::json!({ "type": kind, "data": data }).to_string();
            let envelope = serde_json::json!({
                "event": "ai_chunk",
                "ai_chunk": { "id": node, "result": result },
            });
            format!("{envelope}\n")
        };
        let mut fixture = String::new();
        fixture.push_str("{\"slot\":\"n1\",\"role\":\"user\",\"fragment\":\"q1\",\"terminal\":true}\n");
        fixture.push_str("{\"slot\":\"n2\",\"role\":\"user\",\"fragment\":\"q2\",\"terminal\":true}\n");
        fixture.push_str(&chunk("n1", "text", "A"));
        fixture.push_str(&chunk("n2", "text", "X"));
        fixture.push_str(&chunk("n1", "text", "B"));
        fixture.push_str("{\"event\":\"workflow\",\"workflow\":{\"status\":\"failed\"}}\n");

        let stats = replay_into(&mut slots, &fixture, None).await;
        assert_eq!(stats.committed, 4);
        assert!(slots.streaming_slots().is_empty());

        let reply = slots.slot("n1").unwrap().path().turns()[0]
            .alternative
            .clone()
            .unwrap();
        assert_eq!(reply.text().unwrap().content, "AB");
        assert_eq!(reply.status(), Status::Failed);
    }

    #[tokio::test]
    async fn test_rejected_deltas_are_counted() {
        let mut session = session();
        let fixture = concat!(
            "{\"slot\":\"other\",\"role\":\"assistant\",\"fragment\":\"x\"}\n",
            "{\"slot\":\"c1\",\"role\":\"assistant\",\"fragment\":\"ok\",\"terminal\":true}\n",
        );
        let stats = replay_into(&mut session, fixture, None).await;
        assert_eq!(stats.rejected, 1);
        assert_eq!(stats.committed, 1);
        let path = session.active().unwrap().path();
        assert_eq!(
            path.depth_of(&BranchPointId::Assistant("u1".into())),
            Some(0)
        );
    }
}
