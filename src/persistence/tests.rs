use std::sync::Arc;

use super::MessageStore;
use crate::connection::scripted::wait_until;
use crate::message::Message;
use crate::sink::{Sink, SinkKind};

fn msg(session: &str, seq: u64) -> Arc<Message> {
    Arc::new(Message::new(session, "cam/01", seq, format!("{{\"frame\":{seq}}}").into_bytes()))
}

#[tokio::test]
async fn test_store_and_load_in_sequence_order() {
    let dir = tempfile::tempdir().unwrap();
    let store = MessageStore::open(dir.path(), None).unwrap();
    let sink = store.sink_for("camA").unwrap();
    assert_eq!(sink.kind(), SinkKind::ExternalStore);
    assert!(sink.may_block());

    for seq in [1, 2, 3, 10] {
        sink.write(msg("camA", seq)).await.unwrap();
    }
    sink.flush().await.unwrap();

    let loaded = store.load_messages("camA").unwrap();
    let seqs: Vec<u64> = loaded.iter().map(|m| m.sequence_number).collect();
    assert_eq!(seqs, vec![1, 2, 3, 10]);
    assert_eq!(loaded[0].payload["frame"], 1);
    assert_eq!(loaded[0].format, "json");
    assert_eq!(loaded[0].session_id, "camA");
}

#[tokio::test]
async fn test_store_sessions_are_isolated() {
    let dir = tempfile::tempdir().unwrap();
    let store = MessageStore::open(dir.path(), None).unwrap();
    let a = store.sink_for("camA").unwrap();
    let b = store.sink_for("camB").unwrap();

    a.write(msg("camA", 1)).await.unwrap();
    b.write(msg("camB", 1)).await.unwrap();
    b.write(msg("camB", 2)).await.unwrap();

    assert_eq!(store.load_messages("camA").unwrap().len(), 1);
    assert_eq!(store.load_messages("camB").unwrap().len(), 2);
    assert!(store.load_messages("unknown").unwrap().is_empty());
}

#[tokio::test]
async fn test_store_retention_cap() {
    let dir = tempfile::tempdir().unwrap();
    let store = MessageStore::open(dir.path(), Some(3)).unwrap();
    let sink = store.sink_for("camA").unwrap();

    for seq in 1..=10 {
        sink.write(msg("camA", seq)).await.unwrap();
    }

    let seqs: Vec<u64> = store
        .load_messages("camA")
        .unwrap()
        .iter()
        .map(|m| m.sequence_number)
        .collect();
    assert_eq!(seqs, vec![8, 9, 10]);
}

#[tokio::test]
async fn test_new_run_replaces_previous_history() {
    let dir = tempfile::tempdir().unwrap();
    let store = MessageStore::open(dir.path(), None).unwrap();

    let first = store.sink_for("camA").unwrap();
    for seq in 1..=5 {
        first.write(msg("camA", seq)).await.unwrap();
    }
    drop(first);

    let second = store.sink_for("camA").unwrap();
    second.write(msg("camA", 1)).await.unwrap();

    assert_eq!(store.load_messages("camA").unwrap().len(), 1);
}

#[tokio::test]
async fn test_unused_sink_keeps_previous_history() {
    let dir = tempfile::tempdir().unwrap();
    let store = MessageStore::open(dir.path(), None).unwrap();

    let first = store.sink_for("camA").unwrap();
    first.write(msg("camA", 1)).await.unwrap();
    first.write(msg("camA", 2)).await.unwrap();

    let _idle = store.sink_for("camA").unwrap();
    assert_eq!(store.load_messages("camA").unwrap().len(), 2);
}

#[tokio::test]
async fn test_store_write_lands_after_caller_gives_up() {
    let dir = tempfile::tempdir().unwrap();
    let store = MessageStore::open(dir.path(), None).unwrap();
    let sink = store.sink_for("camA").unwrap();

    // The insert runs on the blocking pool, so dropping the write future
    // neither stalls the runtime nor loses the message.
    let _ = tokio::time::timeout(std::time::Duration::ZERO, sink.write(msg("camA", 1))).await;
    assert!(wait_until(|| store.load_messages("camA").unwrap().len() == 1).await);

    sink.write(msg("camA", 2)).await.unwrap();
    let seqs: Vec<u64> = store
        .load_messages("camA")
        .unwrap()
        .iter()
        .map(|m| m.sequence_number)
        .collect();
    assert_eq!(seqs, vec![1, 2]);
}
