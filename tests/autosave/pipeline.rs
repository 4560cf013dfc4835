use std::time::Duration;

use autosave_rust::{ChangeContext, ChangeOutcome, SaveError, SaveStatus, Snapshot};
use tokio::time::Instant;
use tokio_stream::StreamExt;

use crate::support::{advance, doc, settle, title, Behavior, Harness};

#[tokio::test(start_paused = true)]
async fn edits_become_consecutive_revisions() {
    let h = Harness::new();
    let id = doc("doc1");
    h.revisions.inner.seed(&id, title("A")).unwrap();
    let handle = h.engine.open_with_baseline(id.clone(), title("A"));

    let outcome = handle.process_change(title("B"), &ChangeContext::human("u1"));
    assert!(outcome.is_scheduled());

    advance(999).await;
    assert_eq!(h.revisions.creates(), 0);

    advance(100).await;
    assert_eq!(h.titles(&id), vec!["A", "B"]);
    assert_eq!(handle.baseline().snapshot, title("B"));
    assert_eq!(handle.state().status, SaveStatus::Saved);
    assert!(!handle.has_unsaved_changes());

    // The second edit is classified against the confirmed B.
    advance(100).await;
    let outcome = handle.process_change(title("C"), &ChangeContext::human("u1"));
    match outcome {
        ChangeOutcome::Scheduled(descriptor) => {
            assert!(descriptor.changed_fields.contains("title"));
        }
        other => panic!("expected scheduled, got {:?}", other),
    }

    advance(5_000).await;
    assert_eq!(h.titles(&id), vec!["A", "B", "C"]);
    assert_eq!(h.revisions.creates(), 2);

    let listed = handle.revisions().await.unwrap();
    let versions: Vec<u64> = listed.iter().map(|rev| rev.version).collect();
    assert_eq!(versions, vec![3, 2, 1]);
    assert!(listed[0].is_human_change());
    assert_eq!(
        listed[0].author.as_ref().and_then(|author| author.user_id.as_deref()),
        Some("u1")
    );
}

#[tokio::test(start_paused = true)]
async fn burst_of_edits_saves_only_the_last() {
    let h = Harness::new();
    let id = doc("doc1");
    h.revisions.inner.seed(&id, title("A")).unwrap();
    let handle = h.engine.open_with_baseline(id.clone(), title("A"));

    for value in ["S1", "S2", "S3"] {
        handle.process_change(title(value), &ChangeContext::human("u1"));
        advance(100).await;
    }
    assert_eq!(h.revisions.creates(), 0);

    advance(10_000).await;
    assert_eq!(h.revisions.creates(), 1);
    assert_eq!(h.titles(&id), vec!["A", "S3"]);
    assert_eq!(h.engine.queue().latest(&id).unwrap(), None);
}

#[tokio::test(start_paused = true)]
async fn active_typing_extends_the_delay() {
    let h = Harness::new();
    let id = doc("doc1");
    let handle = h.engine.open_with_baseline(id.clone(), title("A"));

    handle.process_change(title("B"), &ChangeContext::human("u1"));
    advance(500).await;
    handle.process_change(title("BC"), &ChangeContext::human("u1"));

    // Plain debounce would have fired 1000ms after the last edit.
    advance(2_000).await;
    assert_eq!(h.revisions.creates(), 0);

    advance(1_100).await;
    assert_eq!(h.revisions.creates(), 1);
}

#[tokio::test(start_paused = true)]
async fn identical_snapshot_makes_no_network_calls() {
    let h = Harness::new();
    let id = doc("doc1");
    let handle = h.engine.open_with_baseline(id.clone(), title("A"));
    settle().await;

    assert!(handle.force_save(title("A")).await);

    // Only UI state moved.
    let outcome = handle.process_change(
        title("A").with("cursor", 4).with("selection", "0:4"),
        &ChangeContext::human("u1"),
    );
    assert!(matches!(outcome, ChangeOutcome::Ignored(_)));

    advance(10_000).await;
    assert_eq!(h.documents.calls(), 0);
    assert_eq!(h.revisions.creates(), 0);
    assert_eq!(handle.state().status, SaveStatus::Idle);
}

#[tokio::test(start_paused = true)]
async fn editing_back_to_the_baseline_cancels_the_pending_save() {
    let h = Harness::new();
    let id = doc("doc1");
    let handle = h.engine.open_with_baseline(id.clone(), title("A"));

    handle.process_change(title("B"), &ChangeContext::human("u1"));
    settle().await;
    assert!(handle.has_unsaved_changes());

    let outcome = handle.process_change(title("A"), &ChangeContext::human("u1"));
    assert!(matches!(outcome, ChangeOutcome::Ignored(_)));

    advance(10_000).await;
    assert_eq!(h.documents.calls(), 0);
    assert_eq!(h.revisions.creates(), 0);
    assert!(!handle.has_unsaved_changes());
    assert_eq!(h.engine.queue().latest(&id).unwrap(), None);
}

#[tokio::test(start_paused = true)]
async fn revert_is_saved_without_author_and_never_unsaved() {
    let h = Harness::new();
    let id = doc("doc1");
    h.revisions.inner.seed(&id, title("A")).unwrap();
    let handle = h.engine.open_with_baseline(id.clone(), title("A"));

    let outcome = handle.process_change(title("B"), &ChangeContext::revert("doc1:v1"));
    match &outcome {
        ChangeOutcome::Scheduled(descriptor) => assert!(!descriptor.is_human_change),
        other => panic!("expected scheduled, got {:?}", other),
    }
    settle().await;
    assert!(!handle.has_unsaved_changes());
    assert_eq!(h.engine.queue().latest(&id).unwrap(), None);

    advance(1_500).await;
    let history = h.revisions.history(&id);
    assert_eq!(history.len(), 2);
    assert!(history[1].author.is_none());
    assert!(!history[1].is_human_change());
    assert!(!handle.has_unsaved_changes());
}

#[tokio::test(start_paused = true)]
async fn initial_load_seeds_the_baseline_without_saving() {
    let h = Harness::new();
    let id = doc("doc1");
    let handle = h.engine.open_with_baseline(id.clone(), Snapshot::new());

    let outcome = handle.process_change(title("loaded"), &ChangeContext::initial_load());
    assert_eq!(outcome, ChangeOutcome::Seeded);
    settle().await;
    assert_eq!(handle.baseline().snapshot, title("loaded"));

    advance(10_000).await;
    assert_eq!(h.revisions.creates(), 0);
    assert!(!handle.has_unsaved_changes());
}

#[tokio::test(start_paused = true)]
async fn force_save_skips_the_debounce() {
    let h = Harness::new();
    let id = doc("doc1");
    h.revisions.inner.seed(&id, title("A")).unwrap();
    let handle = h.engine.open_with_baseline(id.clone(), title("A"));

    let start = Instant::now();
    assert!(handle.force_save(title("B")).await);
    assert!(start.elapsed() < Duration::from_millis(1_000));
    assert_eq!(h.titles(&id), vec!["A", "B"]);
    assert_eq!(handle.state().status, SaveStatus::Saved);
}

#[tokio::test(start_paused = true)]
async fn force_save_reports_failure() {
    let h = Harness::new();
    h.revisions.set_behavior(Behavior::FailAlways);
    let handle = h.engine.open_with_baseline(doc("doc1"), title("A"));

    assert!(!handle.force_save(title("B")).await);
    assert!(matches!(
        handle.state().last_error,
        Some(SaveError::TransientNetwork(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn edit_during_a_save_is_saved_right_after_it() {
    let h = Harness::new();
    let id = doc("doc1");
    h.revisions.inner.seed(&id, title("A")).unwrap();
    h.revisions.set_behavior(Behavior::Delay(Duration::from_secs(5)));
    let handle = h.engine.open_with_baseline(id.clone(), title("A"));

    handle.process_change(title("B"), &ChangeContext::human("u1"));
    advance(1_500).await;
    assert!(handle.state().is_saving());

    // Debounce for C fires at 4500ms, while B is still in flight.
    handle.process_change(title("C"), &ChangeContext::human("u1"));
    advance(3_500).await;
    assert_eq!(h.revisions.creates(), 1);

    advance(7_000).await;
    assert_eq!(h.revisions.creates(), 2);
    assert_eq!(h.revisions.max_concurrent(), 1);
    assert_eq!(h.titles(&id), vec!["A", "B", "C"]);
    assert!(!handle.has_unsaved_changes());
}

#[tokio::test(start_paused = true)]
async fn invalid_snapshot_is_rejected() {
    let h = Harness::new();
    let handle = h.engine.open_with_baseline(doc("doc1"), title("A"));

    let outcome = handle.process_change(
        Snapshot::new().with("", "no name"),
        &ChangeContext::human("u1"),
    );
    assert!(matches!(
        outcome,
        ChangeOutcome::Rejected(SaveError::Validation(_))
    ));
    settle().await;
    assert_eq!(handle.state().status, SaveStatus::Error);
    assert_eq!(h.revisions.creates(), 0);
}

#[tokio::test(start_paused = true)]
async fn saved_reverts_to_idle_after_display_window() {
    let h = Harness::new();
    let handle = h.engine.open_with_baseline(doc("doc1"), title("A"));
    let mut states = handle.state_stream();
    assert_eq!(states.next().await.unwrap().status, SaveStatus::Idle);

    handle.process_change(title("B"), &ChangeContext::human("u1"));
    advance(1_100).await;
    assert_eq!(handle.state().status, SaveStatus::Saved);
    assert!(handle.state().last_saved_at.is_some());

    advance(3_000).await;
    assert_eq!(handle.state().status, SaveStatus::Idle);
    assert_eq!(states.next().await.unwrap().status, SaveStatus::Idle);
}

#[tokio::test(start_paused = true)]
async fn force_saving_the_baseline_drops_the_superseded_edit() {
    let h = Harness::new();
    let id = doc("doc1");
    h.revisions.inner.seed(&id, title("A")).unwrap();
    let handle = h.engine.open_with_baseline(id.clone(), title("A"));

    handle.process_change(title("B"), &ChangeContext::human("u1"));
    assert!(handle.force_save(title("A")).await);

    advance(10_000).await;
    assert_eq!(h.revisions.creates(), 0);
    assert_eq!(h.documents.calls(), 0);
    assert_eq!(h.titles(&id), vec!["A"]);
    assert_eq!(handle.baseline().snapshot, title("A"));
    assert!(!handle.has_unsaved_changes());
    assert_eq!(h.engine.queue().latest(&id).unwrap(), None);
}

#[tokio::test(start_paused = true)]
async fn force_save_with_only_ui_state_changed_is_a_no_op() {
    let h = Harness::new();
    let id = doc("doc1");
    let handle = h.engine.open_with_baseline(id.clone(), title("A"));

    handle.process_change(title("B"), &ChangeContext::human("u1"));
    assert!(handle.force_save(title("A").with("cursor", 1)).await);

    advance(10_000).await;
    assert_eq!(h.revisions.creates(), 0);
    assert_eq!(handle.baseline().snapshot, title("A"));
}

#[tokio::test(start_paused = true)]
async fn trailing_whitespace_is_not_an_edit_by_default() {
    let h = Harness::new();
    let id = doc("doc1");
    let body = |text: &str| Snapshot::new().with("content", text);
    let handle = h.engine.open_with_baseline(id.clone(), body("hello"));

    let outcome = handle.process_change(body("hello  \n"), &ChangeContext::human("u1"));
    assert!(!outcome.is_scheduled());

    advance(10_000).await;
    assert_eq!(h.revisions.creates(), 0);
    assert!(!handle.has_unsaved_changes());

    // Anything else still counts.
    handle.process_change(body("hello world"), &ChangeContext::human("u1"));
    advance(1_100).await;
    assert_eq!(h.revisions.creates(), 1);
}
