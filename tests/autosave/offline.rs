use autosave_rust::{ChangeContext, ConnectivityMonitor, SaveStatus};

use crate::support::{advance, doc, settle, title, Harness};

#[tokio::test(start_paused = true)]
async fn offline_edit_survives_a_restart() {
    let h = Harness::offline();
    let id = doc("doc1");
    let handle = h.engine.open_with_baseline(id.clone(), title("A"));
    assert_eq!(handle.state().status, SaveStatus::Offline);

    handle.process_change(title("B"), &ChangeContext::human("u1"));
    // Durable before process_change returns.
    let entry = h.engine.queue().latest(&id).unwrap().unwrap();
    assert_eq!(entry.snapshot, title("B"));
    assert!(entry.is_human_change);

    advance(5_000).await;
    assert_eq!(h.revisions.creates(), 0);
    assert_eq!(h.documents.calls(), 0);
    let state = handle.state();
    assert_eq!(state.status, SaveStatus::Offline);
    assert!(state.has_unsaved_changes);
    h.engine.shutdown().await;

    let restarted = h.restart(ConnectivityMonitor::new(false));
    let resumed = restarted.engine.resume_pending().await;
    assert_eq!(resumed.len(), 1);
    let handle = &resumed[0];
    assert_eq!(handle.document_id(), &id);
    settle().await;
    assert!(handle.has_unsaved_changes());
    assert_eq!(handle.baseline().snapshot, title("A"));

    restarted.engine.set_online(true);
    advance(100).await;
    assert_eq!(h.titles(&id), vec!["B"]);
    // Attribution is restored from the queue entry.
    let saved = &h.revisions.history(&id)[0];
    assert_eq!(
        saved.author.as_ref().and_then(|author| author.user_id.as_deref()),
        Some("u1")
    );
    assert_eq!(restarted.engine.queue().latest(&id).unwrap(), None);
    let state = handle.state();
    assert_eq!(state.status, SaveStatus::Saved);
    assert!(!state.has_unsaved_changes);
}

#[tokio::test(start_paused = true)]
async fn reconnect_saves_the_pending_change() {
    let h = Harness::new();
    let id = doc("doc1");
    h.seed_remote(&id, title("A"));
    let handle = h.engine.open(id.clone()).await;

    h.engine.set_online(false);
    settle().await;
    assert_eq!(handle.state().status, SaveStatus::Offline);

    handle.process_change(title("B"), &ChangeContext::human("u1"));
    handle.process_change(title("BC"), &ChangeContext::human("u1"));
    advance(10_000).await;
    assert_eq!(h.revisions.creates(), 0);
    assert_eq!(handle.state().retry_count, 0);

    // Force save does not wait for connectivity.
    assert!(!handle.force_save(title("BC")).await);

    h.connectivity.go_online();
    advance(100).await;
    assert_eq!(h.revisions.creates(), 1);
    assert_eq!(h.titles(&id), vec!["A", "BC"]);
    assert_eq!(handle.state().status, SaveStatus::Saved);
}

#[tokio::test(start_paused = true)]
async fn agent_change_is_not_queued_offline() {
    let h = Harness::offline();
    let id = doc("doc1");
    let handle = h.engine.open_with_baseline(id.clone(), title("A"));

    handle.process_change(title("B"), &ChangeContext::agent("msg-1"));
    settle().await;
    assert_eq!(h.engine.queue().latest(&id).unwrap(), None);
    assert!(!handle.has_unsaved_changes());

    // It is still saved once connectivity returns.
    h.engine.set_online(true);
    advance(2_000).await;
    assert_eq!(h.titles(&id), vec!["B"]);
}

#[cfg(feature = "file-store")]
#[tokio::test(start_paused = true)]
async fn file_backed_queue_survives_a_restart() {
    use std::sync::Arc;

    use autosave_rust::{AutosaveEngine, FileKvStore};

    use crate::support::{CountingDocuments, ScriptedRevisions};

    let dir = tempfile::tempdir().unwrap();
    let documents = CountingDocuments::new();
    let revisions = ScriptedRevisions::new();
    let id = doc("notes/today");

    let engine = AutosaveEngine::new(Arc::new(documents.clone()), Arc::new(revisions.clone()))
        .with_storage(Arc::new(FileKvStore::open(dir.path()).unwrap()))
        .with_connectivity(ConnectivityMonitor::new(false));
    let handle = engine.open_with_baseline(id.clone(), title("draft"));
    handle.process_change(title("draft 2"), &ChangeContext::human("u1"));
    engine.shutdown().await;
    drop(engine);

    let engine = AutosaveEngine::new(Arc::new(documents.clone()), Arc::new(revisions.clone()))
        .with_storage(Arc::new(FileKvStore::open(dir.path()).unwrap()))
        .with_connectivity(ConnectivityMonitor::new(true));
    let resumed = engine.resume_pending().await;
    assert_eq!(resumed.len(), 1);

    advance(100).await;
    assert_eq!(revisions.creates(), 1);
    assert_eq!(
        documents.inner.document(&id).unwrap().snapshot,
        title("draft 2")
    );
    assert_eq!(engine.queue().latest(&id).unwrap(), None);
}
