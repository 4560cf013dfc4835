use std::time::Duration;

use autosave_rust::{ChangeContext, ChangeOutcome};

use crate::support::{advance, doc, settle, title, Behavior, Harness};

#[tokio::test(start_paused = true)]
async fn opening_twice_returns_the_same_task() {
    let h = Harness::new();
    let id = doc("doc1");
    h.seed_remote(&id, title("A"));

    let first = h.engine.open(id.clone()).await;
    let second = h.engine.open(id.clone()).await;
    assert_eq!(h.documents.calls(), 1);

    first.process_change(title("B"), &ChangeContext::human("u1"));
    settle().await;
    assert!(second.has_unsaved_changes());
    assert!(h.engine.handle(&id).is_some());
    assert!(h.engine.handle(&doc("doc2")).is_none());
}

#[tokio::test(start_paused = true)]
async fn closed_handle_refuses_changes() {
    let h = Harness::new();
    let id = doc("doc1");
    let handle = h.engine.open_with_baseline(id.clone(), title("A"));

    assert!(h.engine.close(&id).await);
    assert!(handle.is_closed());
    assert!(h.engine.handle(&id).is_none());
    assert!(!h.engine.close(&id).await);

    let outcome = handle.process_change(title("B"), &ChangeContext::human("u1"));
    assert_eq!(outcome, ChangeOutcome::Closed);
    assert!(!handle.force_save(title("B")).await);
}

#[tokio::test(start_paused = true)]
async fn reopening_resumes_a_queued_change() {
    let h = Harness::new();
    let id = doc("doc1");
    let handle = h.engine.open_with_baseline(id.clone(), title("A"));
    handle.process_change(title("B"), &ChangeContext::human("u1"));
    h.engine.close(&id).await;
    assert_eq!(h.revisions.creates(), 0);

    let reopened = h.engine.open_with_baseline(id.clone(), title("A"));
    advance(100).await;
    assert_eq!(h.revisions.creates(), 1);
    assert_eq!(reopened.baseline().snapshot, title("B"));
    assert_eq!(h.engine.queue().latest(&id).unwrap(), None);
}

#[tokio::test(start_paused = true)]
async fn nothing_to_resume_on_a_clean_start() {
    let h = Harness::new();
    assert!(h.engine.resume_pending().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn documents_save_independently() {
    let h = Harness::new();
    h.revisions.set_behavior(Behavior::Delay(Duration::from_secs(5)));
    let first = h.engine.open_with_baseline(doc("doc1"), title("A"));
    let second = h.engine.open_with_baseline(doc("doc2"), title("X"));

    first.process_change(title("B"), &ChangeContext::human("u1"));
    second.process_change(title("Y"), &ChangeContext::human("u2"));
    advance(1_500).await;
    assert!(first.state().is_saving());
    assert!(second.state().is_saving());
    assert_eq!(h.revisions.max_concurrent(), 2);

    advance(5_000).await;
    assert!(!first.has_unsaved_changes());
    assert!(!second.has_unsaved_changes());
    assert_eq!(h.titles(&doc("doc2")), vec!["Y"]);
}

#[tokio::test(start_paused = true)]
async fn shutdown_stops_every_document() {
    let h = Harness::new();
    let first = h.engine.open_with_baseline(doc("doc1"), title("A"));
    let second = h.engine.open_with_baseline(doc("doc2"), title("X"));

    h.engine.shutdown().await;
    assert!(first.is_closed());
    assert!(second.is_closed());
    assert!(h.engine.handle(&doc("doc1")).is_none());
}
