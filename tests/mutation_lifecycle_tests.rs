//! Integration tests for the mutation lifecycle
//!
//! These tests drive the query client against the in-memory remote:
//! - Folder and note walkthroughs
//! - Atomicity of the speculative apply as seen by subscribers
//! - Exact rollback while unrelated mutations land
//! - Rollback of every mutation type, including a dropped invocation
//! - Overlapping mutations with and without per-key queuing
//! - hasChildren consistency after refreshes

use delnotes_engine::cache::{CacheEvent, CacheStatus, CacheValue, QueryKey};
use delnotes_engine::{
    EngineConfig, EngineError, Folder, FolderTree, InMemoryRemote, MutationKind, Note, QueryClient,
    RemoteServices,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn setup(config: EngineConfig) -> (QueryClient, Arc<InMemoryRemote>) {
    let remote = Arc::new(InMemoryRemote::new());
    remote.seed_folder(Folder::new("r1", "Root", None));
    remote.seed_folder(Folder::new("g1", "Journal", None));
    let client = QueryClient::new(config, RemoteServices::from_shared(remote.clone())).unwrap();
    (client, remote)
}

fn folder_list(client: &QueryClient, key: &QueryKey) -> Vec<Folder> {
    match client.cache().value(key) {
        Some(CacheValue::FolderTree(tree)) => tree.folders,
        Some(CacheValue::FolderList(list)) => list,
        other => panic!("no folder value under {}: {:?}", key, other),
    }
}

fn note_ids(client: &QueryClient, key: &QueryKey) -> Vec<String> {
    client
        .cache()
        .value(key)
        .and_then(|v| v.as_note_list().map(|l| l.iter().map(|n| n.id.clone()).collect()))
        .unwrap_or_default()
}

async fn yield_a_few() {
    for _ in 0..5 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn test_create_folder_under_root_keeps_roots() {
    let (client, remote) = setup(EngineConfig::manual());
    remote.set_next_id(9);
    client.cache().write(&QueryKey::folders(), |_| {
        Some(CacheValue::FolderTree(FolderTree::new(vec![Folder::new("r1", "Root", None)])))
    });
    client.fetch(&QueryKey::children_folders("r1")).await.unwrap();

    let created = client.create_folder(Some("r1"), "Inbox").await.unwrap();
    assert_eq!(created.id, "f9");

    let roots = folder_list(&client, &QueryKey::folders());
    let root_ids: Vec<&str> = roots.iter().map(|f| f.id.as_str()).collect();
    assert_eq!(root_ids, vec!["r1"]);
    assert!(roots[0].has_children);

    // placeholder until the list is refreshed
    let children = folder_list(&client, &QueryKey::children_folders("r1"));
    assert_eq!(children.len(), 1);
    assert!(children[0].id.starts_with("temp-"));
    assert_eq!(children[0].name, "Inbox");
    assert_eq!(client.read(&QueryKey::children_folders("r1")).status, CacheStatus::Stale);

    client.fetch(&QueryKey::children_folders("r1")).await.unwrap();
    let children = folder_list(&client, &QueryKey::children_folders("r1"));
    assert_eq!(children.len(), 1);
    assert_eq!(children[0].id, "f9");
}

#[tokio::test]
async fn test_failed_rename_reverts_both_lists() {
    let (client, remote) = setup(EngineConfig::manual());
    remote.seed_folder(Folder::new("f9", "Inbox", Some("r1".to_string())));
    client.fetch(&QueryKey::folders()).await.unwrap();
    client.fetch(&QueryKey::children_folders("r1")).await.unwrap();
    let roots_before = client.cache().value(&QueryKey::folders());
    let children_before = client.cache().value(&QueryKey::children_folders("r1"));

    let seen = Arc::new(Mutex::new(String::new()));
    let sink = Arc::clone(&seen);
    let observer = client.clone();
    remote.fail_next(1);

    let err = client
        .mutate_with(
            &delnotes_engine::RenameFolder::new(Some("f9".into()), Some("r1".into()), "Work"),
            Box::new(move || {
                let children = folder_list(&observer, &QueryKey::children_folders("r1"));
                *sink.lock().unwrap() = children[0].name.clone();
            }),
        )
        .await
        .unwrap_err();

    assert_eq!(seen.lock().unwrap().as_str(), "Work");
    assert!(matches!(
        err,
        EngineError::RemoteRejected {
            mutation: MutationKind::RenameFolder,
            reason: Some(_)
        }
    ));
    assert_eq!(client.cache().value(&QueryKey::folders()), roots_before);
    assert_eq!(client.cache().value(&QueryKey::children_folders("r1")), children_before);
    assert_eq!(client.read(&QueryKey::children_folders("r1")).status, CacheStatus::Stale);
    assert_eq!(remote.folder("f9").unwrap().name, "Inbox");
}

fn child_flag(client: &QueryClient, parent: &str, id: &str) -> Option<bool> {
    folder_list(client, &QueryKey::children_folders(parent))
        .iter()
        .find(|f| f.id == id)
        .map(|f| f.has_children)
}

async fn nested_setup() -> (QueryClient, Arc<InMemoryRemote>) {
    // r1 > p > c, with all three folder lists cached
    let (client, remote) = setup(EngineConfig::manual());
    remote.seed_folder(Folder::new("p", "Projects", Some("r1".to_string())));
    remote.seed_folder(Folder::new("c", "Current", Some("p".to_string())));
    client.fetch(&QueryKey::folders()).await.unwrap();
    client.fetch(&QueryKey::children_folders("r1")).await.unwrap();
    client.fetch(&QueryKey::children_folders("p")).await.unwrap();
    (client, remote)
}

#[tokio::test]
async fn test_failed_delete_folder_restores_every_list() {
    let (client, remote) = nested_setup().await;
    let keys = [
        QueryKey::folders(),
        QueryKey::children_folders("r1"),
        QueryKey::children_folders("p"),
    ];
    let before: Vec<_> = keys.iter().map(|k| client.cache().value(k)).collect();
    assert_eq!(child_flag(&client, "r1", "p"), Some(true));

    remote.fail_next(1);
    let err = client.delete_folder("c", Some("p")).await.unwrap_err();
    assert!(matches!(err, EngineError::RemoteRejected { mutation: MutationKind::DeleteFolder, .. }));

    let after: Vec<_> = keys.iter().map(|k| client.cache().value(k)).collect();
    assert_eq!(after, before);

    // the flag agrees with the restored children list
    assert_eq!(folder_list(&client, &QueryKey::children_folders("p")).len(), 1);
    assert_eq!(child_flag(&client, "r1", "p"), Some(true));
    assert!(remote.folder("c").is_some());
    for key in &keys {
        assert!(!client.read(key).has_pending_mutations());
    }
}

#[tokio::test]
async fn test_delete_folder_leaves_outer_lists_to_refetch() {
    let (client, _remote) = nested_setup().await;
    let outer_version = client.read(&QueryKey::children_folders("r1")).metadata.version;

    client.delete_folder("c", Some("p")).await.unwrap();

    // only the affected lists were rewritten
    assert!(folder_list(&client, &QueryKey::children_folders("p")).is_empty());
    assert_eq!(client.read(&QueryKey::children_folders("r1")).metadata.version, outer_version);
    assert_eq!(client.read(&QueryKey::children_folders("p")).status, CacheStatus::Stale);

    client.fetch(&QueryKey::children_folders("p")).await.unwrap();
    assert_eq!(child_flag(&client, "r1", "p"), Some(false));
}

#[tokio::test]
async fn test_failed_delete_note_restores_list() {
    let (client, remote) = setup(EngineConfig::manual());
    remote.seed_note(Note::new("n1", "g1", "One", ""));
    remote.seed_note(Note::new("n2", "g1", "Two", ""));
    client.fetch(&QueryKey::notes("g1")).await.unwrap();
    client.fetch(&QueryKey::note("n1")).await.unwrap();
    let list_before = client.cache().value(&QueryKey::notes("g1"));
    let detail_before = client.cache().value(&QueryKey::note("n1"));

    remote.fail_next(1);
    let err = client.delete_note("n1", "g1").await.unwrap_err();
    assert!(matches!(err, EngineError::RemoteRejected { mutation: MutationKind::DeleteNote, .. }));

    assert_eq!(client.cache().value(&QueryKey::notes("g1")), list_before);
    assert_eq!(client.cache().value(&QueryKey::note("n1")), detail_before);
    assert_eq!(client.read(&QueryKey::notes("g1")).status, CacheStatus::Stale);
    assert!(remote.note("n1").is_some());
}

#[tokio::test]
async fn test_failed_create_note_drops_placeholder() {
    let (client, remote) = setup(EngineConfig::manual());
    remote.seed_note(Note::new("n1", "g1", "Old", ""));
    client.fetch(&QueryKey::notes("g1")).await.unwrap();
    let before = client.cache().value(&QueryKey::notes("g1"));

    remote.fail_next(1);
    let err = client.create_note("g1", "New", "body").await.unwrap_err();
    assert!(matches!(err, EngineError::RemoteRejected { mutation: MutationKind::CreateNote, .. }));

    assert_eq!(client.cache().value(&QueryKey::notes("g1")), before);
    assert_eq!(note_ids(&client, &QueryKey::notes("g1")), vec!["n1"]);
    assert_eq!(remote.calls("create_note"), 1);
}

#[tokio::test]
async fn test_subscribers_never_see_half_applied_rename() {
    let (client, remote) = setup(EngineConfig::manual());
    remote.seed_folder(Folder::new("f9", "Inbox", Some("r1".to_string())));
    client.cache().write(&QueryKey::folders(), |_| {
        Some(CacheValue::FolderTree(FolderTree::new(vec![
            Folder::new("r1", "Root", None).with_children(true),
            Folder::new("f9", "Inbox", Some("r1".to_string())),
        ])))
    });
    client.fetch(&QueryKey::children_folders("r1")).await.unwrap();

    let name_in = |client: &QueryClient, key: &QueryKey| {
        folder_list(client, key)
            .into_iter()
            .find(|f| f.id == "f9")
            .map(|f| f.name)
    };

    // (name in roots, name in children) at every notification
    let observations = Arc::new(Mutex::new(Vec::new()));
    for key in [QueryKey::folders(), QueryKey::children_folders("r1")] {
        let sink = Arc::clone(&observations);
        let observer = client.clone();
        client.subscribe(
            &key,
            Arc::new(move |_: &CacheEvent| {
                let roots = name_in(&observer, &QueryKey::folders());
                let children = name_in(&observer, &QueryKey::children_folders("r1"));
                sink.lock().unwrap().push((roots, children));
            }),
        );
    }

    client.rename_folder(Some("f9"), Some("r1"), "Work").await.unwrap();
    remote.fail_next(1);
    client.rename_folder(Some("f9"), Some("r1"), "Later").await.unwrap_err();

    let observations = observations.lock().unwrap();
    assert!(observations.iter().any(|(roots, _)| roots.as_deref() == Some("Later")));
    assert!(observations.iter().all(|(roots, children)| roots == children));
}

#[tokio::test(start_paused = true)]
async fn test_dropped_mutation_rolls_back() {
    let (client, remote) = setup(EngineConfig::manual());
    remote.seed_folder(Folder::new("f9", "Inbox", Some("r1".to_string())));
    let key = QueryKey::children_folders("r1");
    client.subscribe(&key, Arc::new(|_: &CacheEvent| {}));
    client.fetch(&key).await.unwrap();
    let before = client.cache().value(&key);

    remote.set_latency(Duration::from_millis(500));
    let outcome = tokio::time::timeout(
        Duration::from_millis(50),
        client.rename_folder(Some("f9"), Some("r1"), "Work"),
    )
    .await;
    assert!(outcome.is_err());

    let entry = client.read(&key);
    assert_eq!(entry.value, before);
    assert_eq!(entry.status, CacheStatus::Stale);
    assert_eq!(entry.metadata.pending_mutations, 0);
    assert_eq!(client.cache().stats().rollbacks, 1);

    remote.set_latency(Duration::ZERO);
    assert_eq!(client.refresh_stale().await, 1);
    assert_eq!(folder_list(&client, &key)[0].name, "Inbox");
    assert_eq!(remote.folder("f9").unwrap().name, "Inbox");
}

#[tokio::test]
async fn test_delete_only_note() {
    let (client, remote) = setup(EngineConfig::manual());
    remote.seed_note(Note::new("n1", "g1", "Only", "{}"));
    client.fetch(&QueryKey::notes("g1")).await.unwrap();

    let next = client.delete_note("n1", "g1").await.unwrap();

    assert_eq!(next, None);
    assert!(note_ids(&client, &QueryKey::notes("g1")).is_empty());
    assert!(remote.note("n1").is_none());
}

#[tokio::test]
async fn test_create_note_adopts_server_id() {
    let (client, remote) = setup(EngineConfig::manual());
    remote.seed_note(Note::new("n1", "g1", "Old", ""));
    remote.set_next_id(40);
    client.fetch(&QueryKey::notes("g1")).await.unwrap();

    let note = client.create_note("g1", "New", "body").await.unwrap();

    assert_eq!(note.id, "n40");
    assert_eq!(note_ids(&client, &QueryKey::notes("g1")), vec!["n40", "n1"]);
}

#[tokio::test]
async fn test_precondition_failure_skips_remote() {
    let (client, remote) = setup(EngineConfig::manual());
    client.fetch(&QueryKey::folders()).await.unwrap();

    let err = tokio_test::assert_err!(client.rename_folder(None, None, "Work").await);

    assert!(err.is_precondition());
    assert_eq!(remote.calls("rename_folder"), 0);
    assert_eq!(client.read(&QueryKey::folders()).status, CacheStatus::Fresh);
}

#[tokio::test]
async fn test_subscribers_never_see_half_applied_create() {
    let (client, _remote) = setup(EngineConfig::manual());
    client.fetch(&QueryKey::folders()).await.unwrap();
    client.fetch(&QueryKey::children_folders("r1")).await.unwrap();

    // (placeholder visible in children, parent flagged in roots)
    let observations = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&observations);
    let observer = client.clone();
    client.subscribe(
        &QueryKey::children_folders("r1"),
        Arc::new(move |event: &CacheEvent| {
            let has_placeholder = event
                .value
                .as_ref()
                .and_then(CacheValue::as_folder_list)
                .map(|l| l.iter().any(|f| f.name == "Inbox"))
                .unwrap_or(false);
            let flagged = folder_list(&observer, &QueryKey::folders())
                .iter()
                .any(|f| f.id == "r1" && f.has_children);
            sink.lock().unwrap().push((has_placeholder, flagged));
        }),
    );

    client.create_folder(Some("r1"), "Inbox").await.unwrap();

    let observations = observations.lock().unwrap();
    assert!(observations.iter().any(|(placeholder, _)| *placeholder));
    assert!(observations
        .iter()
        .all(|(placeholder, flagged)| !placeholder || *flagged));
}

#[tokio::test(start_paused = true)]
async fn test_rollback_keeps_unrelated_mutation() {
    let (client, remote) = setup(EngineConfig::manual());
    remote.seed_folder(Folder::new("f9", "Inbox", Some("r1".to_string())));
    client.fetch(&QueryKey::children_folders("r1")).await.unwrap();
    client.fetch(&QueryKey::notes("g1")).await.unwrap();
    let children_before = client.cache().value(&QueryKey::children_folders("r1"));

    remote.set_latency(Duration::from_millis(100));
    remote.fail_next(1);
    let slow = client.clone();
    let failing = tokio::spawn(async move { slow.rename_folder(Some("f9"), Some("r1"), "Work").await });
    yield_a_few().await;

    remote.set_latency(Duration::from_millis(10));
    let fast = client.clone();
    let succeeding = tokio::spawn(async move { fast.create_note("g1", "Fresh", "").await });

    let created = succeeding.await.unwrap().unwrap();
    assert!(failing.await.unwrap().is_err());

    assert_eq!(client.cache().value(&QueryKey::children_folders("r1")), children_before);
    assert_eq!(note_ids(&client, &QueryKey::notes("g1")), vec![created.id]);
}

#[tokio::test(start_paused = true)]
async fn test_overlapping_rollback_is_last_writer_wins() {
    let (client, remote) = setup(EngineConfig::manual());
    remote.seed_folder(Folder::new("f9", "Inbox", Some("r1".to_string())));
    client.fetch(&QueryKey::children_folders("r1")).await.unwrap();

    remote.set_latency(Duration::from_millis(100));
    remote.fail_next(1);
    let a = client.clone();
    let first = tokio::spawn(async move { a.rename_folder(Some("f9"), Some("r1"), "Alpha").await });
    yield_a_few().await;

    remote.set_latency(Duration::from_millis(10));
    let b = client.clone();
    let second = tokio::spawn(async move { b.rename_folder(Some("f9"), Some("r1"), "Beta").await });

    assert!(second.await.unwrap().is_ok());
    assert!(first.await.unwrap().is_err());

    // the failed rename restored its own snapshot over the confirmed one
    assert_eq!(folder_list(&client, &QueryKey::children_folders("r1"))[0].name, "Inbox");
    assert_eq!(client.read(&QueryKey::children_folders("r1")).status, CacheStatus::Stale);

    client.fetch(&QueryKey::children_folders("r1")).await.unwrap();
    assert_eq!(folder_list(&client, &QueryKey::children_folders("r1"))[0].name, "Beta");
}

#[tokio::test(start_paused = true)]
async fn test_per_key_queue_serializes_overlapping_renames() {
    let config = EngineConfig::builder()
        .refetch_on_settle(false)
        .serialize_overlapping_mutations(true)
        .build();
    let (client, remote) = setup(config);
    remote.seed_folder(Folder::new("f9", "Inbox", Some("r1".to_string())));
    client.fetch(&QueryKey::children_folders("r1")).await.unwrap();

    remote.set_latency(Duration::from_millis(100));
    remote.fail_next(1);
    let a = client.clone();
    let first = tokio::spawn(async move { a.rename_folder(Some("f9"), Some("r1"), "Alpha").await });
    yield_a_few().await;

    remote.set_latency(Duration::from_millis(10));
    let b = client.clone();
    let second = tokio::spawn(async move { b.rename_folder(Some("f9"), Some("r1"), "Beta").await });

    assert!(first.await.unwrap().is_err());
    assert!(second.await.unwrap().is_ok());

    assert_eq!(folder_list(&client, &QueryKey::children_folders("r1"))[0].name, "Beta");
    assert_eq!(remote.folder("f9").unwrap().name, "Beta");
}

#[tokio::test]
async fn test_reconcile_twice_changes_nothing() {
    let (client, _remote) = setup(EngineConfig::manual());
    client.fetch(&QueryKey::folders()).await.unwrap();
    client.create_folder(None, "Top").await.unwrap();

    let entry = client.read(&QueryKey::folders());
    let affected = vec![QueryKey::folders()];
    client.controller().reconcile(MutationKind::CreateFolder, &affected);
    client.controller().reconcile(MutationKind::CreateFolder, &affected);
    let again = client.read(&QueryKey::folders());

    assert_eq!(again.status, CacheStatus::Stale);
    assert_eq!(again.value, entry.value);
    assert_eq!(again.metadata.version, entry.metadata.version);
    assert_eq!(again.metadata.pending_mutations, 0);
}

#[tokio::test]
async fn test_has_children_follows_children_list() {
    let (client, remote) = setup(EngineConfig::manual());
    remote.seed_folder(Folder::new("a", "A", Some("r1".to_string())));
    client.fetch(&QueryKey::folders()).await.unwrap();
    client.fetch(&QueryKey::children_folders("r1")).await.unwrap();
    client.fetch(&QueryKey::children_folders("a")).await.unwrap();

    let flag = |client: &QueryClient| {
        folder_list(client, &QueryKey::children_folders("r1"))
            .iter()
            .find(|f| f.id == "a")
            .map(|f| f.has_children)
    };
    assert_eq!(flag(&client), Some(false));

    let child = client.create_folder(Some("a"), "Nested").await.unwrap();
    client.fetch(&QueryKey::children_folders("a")).await.unwrap();
    assert_eq!(flag(&client), Some(true));

    client.delete_folder(&child.id, Some("a")).await.unwrap();
    client.fetch(&QueryKey::children_folders("a")).await.unwrap();
    assert_eq!(flag(&client), Some(false));
}

#[tokio::test]
async fn test_delete_folder_clears_its_lists() {
    let (client, remote) = setup(EngineConfig::manual());
    remote.seed_folder(Folder::new("a", "A", Some("r1".to_string())));
    remote.seed_note(Note::new("n1", "a", "t", ""));
    client.fetch(&QueryKey::folders()).await.unwrap();
    client.fetch(&QueryKey::children_folders("r1")).await.unwrap();
    client.fetch(&QueryKey::notes("a")).await.unwrap();

    client.delete_folder("a", Some("r1")).await.unwrap();

    assert!(folder_list(&client, &QueryKey::children_folders("r1")).is_empty());
    assert!(!folder_list(&client, &QueryKey::folders())
        .iter()
        .find(|f| f.id == "r1")
        .unwrap()
        .has_children);
    assert!(note_ids(&client, &QueryKey::notes("a")).is_empty());
    assert!(remote.note("n1").is_none());
}

#[tokio::test]
async fn test_refetch_on_settle_refreshes_subscribed_keys() {
    let config = EngineConfig::builder().refetch_on_settle(true).build();
    let (client, remote) = setup(config);
    client.subscribe(&QueryKey::children_folders("r1"), Arc::new(|_: &CacheEvent| {}));
    client.fetch(&QueryKey::children_folders("r1")).await.unwrap();

    let created = client.create_folder(Some("r1"), "Inbox").await.unwrap();
    for _ in 0..20 {
        if client.read(&QueryKey::children_folders("r1")).status == CacheStatus::Fresh {
            break;
        }
        tokio::task::yield_now().await;
    }

    let children = folder_list(&client, &QueryKey::children_folders("r1"));
    assert_eq!(children.len(), 1);
    assert_eq!(children[0].id, created.id);
    assert_eq!(remote.calls("list_children"), 2);
}

#[tokio::test]
async fn test_disjoint_mutations_run_concurrently() {
    let (client, remote) = setup(EngineConfig::manual());
    for i in 0..5 {
        remote.seed_folder(Folder::new(format!("p{}", i), "P", None));
        client.fetch(&QueryKey::notes(format!("p{}", i))).await.unwrap();
    }

    let creates = (0..5).map(|i| {
        let client = client.clone();
        async move { client.create_note(&format!("p{}", i), "t", "").await }
    });
    let results = futures::future::join_all(creates).await;

    for result in &results {
        tokio_test::assert_ok!(result);
    }
    for i in 0..5 {
        assert_eq!(note_ids(&client, &QueryKey::notes(format!("p{}", i))).len(), 1);
    }
}
