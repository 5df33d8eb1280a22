use chrono::Duration;
use tokio::sync::mpsc;
use treemirror::{Config, Direction, Error, LeafPolicy, MirrorResult, Progress, TreeMirror};

use crate::{
    dataset::{self, DOCS, PROJECT},
    init_log,
    stubs::mem::{Fault, MemTree},
};


async fn mirror(tm: &TreeMirror, src: &MemTree, dst: &MemTree) -> treemirror::Result<MirrorResult> {
    tm.mirror(src, dst, &MemTree::ROOT, &MemTree::ROOT).await
}

fn push() -> TreeMirror {
    TreeMirror::new(Direction::Push)
}

fn failures(res: &MirrorResult) -> Vec<&str> {
    res.failed_paths().map(|p| p.as_str()).collect()
}

#[tokio::test]
async fn into_empty_destination() {
    init_log();
    let src = dataset::mem_tree(DOCS);
    let dst = MemTree::new();

    let res = mirror(&push(), &src, &dst).await.unwrap();

    assert_eq!(res.containers_created, 1);
    assert_eq!(res.containers_reused, 0);
    assert_eq!(res.leaves_transferred, 3);
    assert_eq!(res.bytes_transferred, 25);
    assert!(res.is_success());
    assert_eq!(dst.snapshot(), src.snapshot());
}

#[tokio::test]
async fn existing_container_is_reused() {
    init_log();
    let src = dataset::mem_tree(DOCS);
    let dst = MemTree::new();
    dst.add_dir("docs");

    let res = mirror(&push(), &src, &dst).await.unwrap();

    assert_eq!(res.containers_created, 0);
    assert_eq!(res.containers_reused, 1);
    assert_eq!(res.leaves_transferred, 3);
    assert_eq!(dst.count_named("", "docs"), 1);
    assert_eq!(dst.snapshot(), src.snapshot());
}

#[tokio::test]
async fn second_run_creates_nothing() {
    init_log();
    let src = dataset::mem_tree(PROJECT);
    let dst = MemTree::new();
    let tm = push();

    let first = mirror(&tm, &src, &dst).await.unwrap();
    assert_eq!(first.containers_created, 4);
    dst.clear_mutations();

    let second = mirror(&tm, &src, &dst).await.unwrap();
    assert_eq!(second.containers_created, 0);
    assert_eq!(second.containers_reused, 4);
    assert_eq!(second.leaves_transferred, first.leaves_transferred);

    // leaves are replaced in place, never duplicated
    assert!(dst.mutations().iter().all(|m| m.starts_with("replace ")));
    assert_eq!(dst.count_named("src", "main.c"), 1);
    assert_eq!(dst.snapshot(), src.snapshot());
}

#[tokio::test]
async fn whole_tree_is_mirrored() {
    init_log();
    let src = dataset::mem_tree(PROJECT);
    let dst = MemTree::new();

    let res = mirror(&push(), &src, &dst).await.unwrap();

    assert!(res.is_success());
    assert_eq!(res.leaves_transferred, dataset::files(PROJECT).len());
    assert_eq!(dst.snapshot(), src.snapshot());
    // the empty directory is mirrored too
    assert_eq!(dst.snapshot().get("empty"), Some(&None));
}

#[tokio::test]
async fn containers_are_visited_depth_first_in_listing_order() {
    init_log();
    let src = dataset::mem_tree(PROJECT);
    let dst = MemTree::new();

    mirror(&push(), &src, &dst).await.unwrap();

    assert_eq!(
        dst.mutations(),
        vec![
            "create README.md",
            "create notes.tmp",
            "mkdir src",
            "mkdir assets",
            "mkdir empty",
            "create src/main.c",
            "create src/util.c",
            "create src/draft.tmp",
            "mkdir src/deep",
            "create src/deep/file1.txt",
            "create src/deep/file2.txt",
            "create assets/logo.svg",
        ]
    );
}

#[tokio::test]
async fn failed_leaf_is_reported() {
    init_log();
    let src = dataset::mem_tree(DOCS);
    let dst = MemTree::new();
    src.fail("docs/a.txt", Fault::Read);

    let res = mirror(&push(), &src, &dst).await.unwrap();

    assert_eq!(res.leaves_transferred, 2);
    assert_eq!(failures(&res), vec!["docs/a.txt"]);
    assert!(matches!(res.failures[0].error, Error::Transfer { .. }));

    let snapshot = dst.snapshot();
    assert!(!snapshot.contains_key("docs/a.txt"));
    assert_eq!(snapshot["docs/b.txt"].as_deref(), Some("docs/b.txt"));
    assert_eq!(snapshot["c.txt"].as_deref(), Some("c.txt"));
}

#[tokio::test]
async fn one_failure_among_siblings() {
    init_log();
    const N: usize = 10;
    let src = MemTree::new();
    for i in 0..N {
        src.add_file(&format!("many/f{i}.txt"), &format!("file {i}"), dataset::epoch());
    }
    src.add_file("other/x.txt", "x", dataset::epoch());
    src.add_file("other/sub/y.txt", "y", dataset::epoch());
    let dst = MemTree::new();
    dst.fail("many/f4.txt", Fault::Write);

    let res = mirror(&push(), &src, &dst).await.unwrap();

    assert_eq!(res.leaves_transferred, N - 1 + 2);
    assert_eq!(failures(&res), vec!["many/f4.txt"]);
    let snapshot = dst.snapshot();
    assert!(snapshot.contains_key("many/f3.txt"));
    assert!(snapshot.contains_key("many/f5.txt"));
    assert!(snapshot.contains_key("other/sub/y.txt"));
}

#[tokio::test]
async fn root_listing_failure_is_fatal() {
    init_log();
    let src = dataset::mem_tree(DOCS);
    let dst = MemTree::new();
    src.fail("", Fault::List);

    let err = mirror(&push(), &src, &dst).await.unwrap_err();

    match err {
        Error::List { path, .. } => assert_eq!(path, ""),
        err => panic!("unexpected error {err}"),
    }
    assert!(dst.mutations().is_empty());
}

#[tokio::test]
async fn subtree_listing_failure_is_isolated() {
    init_log();
    let src = dataset::mem_tree(PROJECT);
    let dst = MemTree::new();
    src.fail("src", Fault::List);

    let res = mirror(&push(), &src, &dst).await.unwrap();

    assert_eq!(failures(&res), vec!["src"]);
    assert!(matches!(res.failures[0].error, Error::List { .. }));
    let snapshot = dst.snapshot();
    assert!(!snapshot.contains_key("src/main.c"));
    assert_eq!(
        snapshot["assets/logo.svg"].as_deref(),
        Some("assets/logo.svg")
    );
}

#[tokio::test]
async fn failed_container_skips_its_subtree() {
    init_log();
    let src = dataset::mem_tree(PROJECT);
    let dst = MemTree::new();
    dst.fail("src", Fault::Create);

    let res = mirror(&push(), &src, &dst).await.unwrap();

    assert_eq!(failures(&res), vec!["src"]);
    assert!(matches!(res.failures[0].error, Error::Create { .. }));
    assert!(dst.snapshot().keys().all(|p| !p.starts_with("src")));
    assert!(dst.snapshot().contains_key("assets/logo.svg"));
    assert_eq!(res.containers_created, 2);
}

#[tokio::test]
async fn kind_conflicts_are_failures() {
    init_log();
    let src = dataset::mem_tree(DOCS);
    let dst = MemTree::new();
    dst.add_file("docs", "not a folder", dataset::epoch());
    dst.add_dir("c.txt");

    let res = mirror(&push(), &src, &dst).await.unwrap();

    assert_eq!(res.leaves_transferred, 0);
    assert_eq!(failures(&res), vec!["docs", "c.txt"]);
    assert!(matches!(res.failures[0].error, Error::Create { .. }));
    assert!(matches!(res.failures[1].error, Error::Transfer { .. }));
    assert!(dst.mutations().is_empty());
}

#[tokio::test]
async fn unchanged_leaves_are_skipped() {
    init_log();
    let src = dataset::mem_tree(DOCS);
    let dst = MemTree::new();
    // same as the source
    dst.add_file(
        "docs/a.txt",
        "docs/a.txt",
        dataset::epoch() - Duration::hours(1),
    );
    // same size, older
    dst.add_file("c.txt", "stale", dataset::epoch() - Duration::days(10));

    let tm = push().with_leaf_policy(LeafPolicy::SkipUnchanged);
    let res = mirror(&tm, &src, &dst).await.unwrap();

    assert_eq!(res.leaves_skipped, 1);
    assert_eq!(res.leaves_transferred, 2);
    assert_eq!(
        dst.mutations(),
        vec!["replace c.txt", "create docs/b.txt"]
    );
    assert_eq!(dst.snapshot(), src.snapshot());

    let res = mirror(&tm, &src, &dst).await.unwrap();
    assert_eq!(res.leaves_skipped, 3);
    assert_eq!(res.leaves_transferred, 0);
}

#[tokio::test]
async fn overwrite_replaces_identical_leaves() {
    init_log();
    let src = dataset::mem_tree(DOCS);
    let dst = dataset::mem_tree(DOCS);

    let res = mirror(&push(), &src, &dst).await.unwrap();

    assert_eq!(res.leaves_skipped, 0);
    assert_eq!(res.leaves_transferred, 3);
    assert_eq!(dst.count_named("docs", "a.txt"), 1);
}

#[tokio::test]
async fn ignored_entries_are_not_mirrored() {
    init_log();
    let src = dataset::mem_tree(PROJECT);
    let dst = MemTree::new();
    let config = Config {
        ignore: vec!["*.tmp".into(), "assets".into()],
        ..Config::default()
    };

    let tm = push().with_ignore(config.ignore_patterns().unwrap());
    let res = mirror(&tm, &src, &dst).await.unwrap();

    assert!(res.is_success());
    let snapshot = dst.snapshot();
    assert!(!snapshot.contains_key("notes.tmp"));
    assert!(!snapshot.contains_key("src/draft.tmp"));
    assert!(!snapshot.contains_key("assets"));
    assert!(snapshot.contains_key("src/main.c"));
    assert!(snapshot.contains_key("empty"));
}

#[tokio::test]
async fn auth_error_aborts_the_pass() {
    init_log();
    let src = dataset::mem_tree(PROJECT);
    let dst = MemTree::new();
    dst.fail("src/deep", Fault::Auth);

    let err = mirror(&push(), &src, &dst).await.unwrap_err();

    assert!(err.is_auth());
    let mutations = dst.mutations();
    assert!(!mutations.iter().any(|m| m.contains("deep")));
    assert!(!mutations.iter().any(|m| m.starts_with("create assets")));
}

#[tokio::test]
async fn progress_is_reported() {
    init_log();
    let src = dataset::mem_tree(DOCS);
    let dst = MemTree::new();
    src.fail("docs/b.txt", Fault::Read);

    let (tx, mut rx) = mpsc::unbounded_channel();
    let tm = push().with_progress(tx);
    mirror(&tm, &src, &dst).await.unwrap();
    drop(tm);

    let mut events = Vec::new();
    while let Some(ev) = rx.recv().await {
        events.push(ev);
    }
    assert_eq!(events.len(), 4);
    assert!(matches!(&events[0], Progress::Container { path, created: true } if path == "docs"));
    assert!(matches!(&events[1], Progress::Leaf { path, bytes: 5 } if path == "c.txt"));
    assert!(matches!(&events[2], Progress::Leaf { path, bytes: 10 } if path == "docs/a.txt"));
    assert!(matches!(&events[3], Progress::Failed(f) if f.path == "docs/b.txt"));
}

#[tokio::test]
async fn dropped_progress_receiver_is_ignored() {
    init_log();
    let src = dataset::mem_tree(DOCS);
    let dst = MemTree::new();

    let (tx, rx) = mpsc::unbounded_channel();
    drop(rx);
    let res = mirror(&push().with_progress(tx), &src, &dst).await.unwrap();
    assert_eq!(res.leaves_transferred, 3);
}

#[tokio::test]
async fn very_deep_tree() {
    init_log();
    let src = MemTree::new();
    let bottom = src.add_deep(300, dataset::epoch());
    let dst = MemTree::new();

    let res = mirror(&push(), &src, &dst).await.unwrap();

    assert_eq!(res.containers_created, 300);
    assert_eq!(res.leaves_transferred, 1);
    assert_eq!(dst.snapshot()[&bottom].as_deref(), Some("bottom"));
}

#[tokio::test]
async fn source_is_never_mutated() {
    init_log();
    let src = dataset::mem_tree(PROJECT);
    let before = src.snapshot();
    let dst = MemTree::new();

    mirror(&push(), &src, &dst).await.unwrap();
    mirror(&push(), &src, &dst).await.unwrap();

    assert!(src.mutations().is_empty());
    assert_eq!(src.snapshot(), before);
}
