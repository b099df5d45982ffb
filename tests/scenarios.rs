//! End-to-end checks of the emitted fast-import protocol bytes. The
//! repositories run in dry-run mode, where the child process is `cat` and
//! the captured `log-<name>` file therefore holds the exact byte stream
//! the engine produced.

use std::cell::RefCell;
use std::io::Write as _;
use std::rc::Rc;

use indoc::indoc;
use svn_fast_export::{make_repositories, ProcessCache, RepoError, RepoOptions, Rules};

mod common;

#[test]
fn first_commit_on_fresh_branch() {
    let base = common::scratch_dir();
    let options = common::dry_options(&base);
    let cache = common::new_cache();
    let repo = common::open_repo(&base, "project", &["master"], &options, &cache);

    let mut txn = repo.new_transaction("master", b"/trunk", 1).unwrap();
    txn.set_author(b"a <a@x>");
    txn.set_date_time(1000);
    txn.set_log(b"init");
    {
        let mut file = txn.add_file(b"README", 0o100644, 5).unwrap();
        file.write_all(b"hello").unwrap();
    }
    txn.commit().unwrap();
    drop(txn);
    drop(repo);

    let log = common::read_log(&base, "project");
    let expected: &[u8] = indoc! {b"
        blob
        mark :1048575
        data 5
        hellocommit refs/heads/master
        mark :1
        committer a <a@x> 1000 -0000
        data 5
        init

        M 100644 :1048575 README

        progress SVN r1 branch master = :1

        checkpoint
    "};
    assert_eq!(
        log,
        expected,
        "got:\n{}",
        log.escape_ascii(),
    );
}

#[test]
fn branch_from_earlier_revision() {
    let base = common::scratch_dir();
    let options = common::dry_options(&base);
    let cache = common::new_cache();
    let repo = common::open_repo(&base, "project", &["master"], &options, &cache);

    common::quick_commit(&repo, "master", 1);
    common::quick_commit(&repo, "master", 5);

    // revision 3 is between the two commits; the nearest ancestor is the
    // commit of revision 1, mark 1
    repo.create_branch("feature", 6, "master", 3).unwrap();
    drop(repo);

    let log = common::read_log(&base, "project");
    common::assert_contains(
        &log,
        b"reset refs/heads/feature\nfrom :1\n\n\
          progress SVN r6 branch feature = :1 # from branch master at r3 => r1\n\n",
    );
}

#[test]
fn branch_from_unknown_branch_fails() {
    let base = common::scratch_dir();
    let options = common::dry_options(&base);
    let cache = common::new_cache();
    let repo = common::open_repo(&base, "project", &["master"], &options, &cache);

    let result = repo.create_branch("feature", 2, "nowhere", 1);
    assert!(matches!(
        result,
        Err(RepoError::UnknownSourceBranch { .. }),
    ));
}

#[test]
fn merge_note_emits_one_parent() {
    let base = common::scratch_dir();
    let options = common::dry_options(&base);
    let cache = common::new_cache();
    let repo = common::open_repo(&base, "project", &["master"], &options, &cache);

    common::quick_commit(&repo, "master", 1);
    common::quick_commit(&repo, "master", 5);
    repo.create_branch("feature", 6, "master", 3).unwrap();

    let mut txn = repo.new_transaction("feature", b"/branches/feature", 10).unwrap();
    txn.set_author(b"a <a@x>");
    txn.set_date_time(1010);
    txn.set_log(b"merge");
    txn.note_copy_from_branch("master", 5);
    // a second note resolving to the same mark is recorded once
    txn.note_copy_from_branch("master", 5);
    // merging inside the branch is ignored
    txn.note_copy_from_branch("feature", 6);
    txn.commit().unwrap();
    drop(txn);
    drop(repo);

    let log = common::read_log(&base, "project");
    assert_eq!(common::count_occurrences(&log, b"merge :"), 1);
    common::assert_contains(&log, b"merge :2\n");
    common::assert_contains(&log, b"progress SVN r10 branch feature = :3 # merge from :2\n\n");
}

#[test]
fn delete_branch_resets_to_null_sha() {
    let base = common::scratch_dir();
    let options = common::dry_options(&base);
    let cache = common::new_cache();
    let repo = common::open_repo(&base, "project", &["master"], &options, &cache);

    common::quick_commit(&repo, "master", 1);
    repo.create_branch("feature", 6, "master", 1).unwrap();
    common::quick_commit(&repo, "feature", 10);
    repo.delete_branch("feature", 20).unwrap();
    drop(repo);

    let log = common::read_log(&base, "project");
    // the old tip is backed up before the ref is rewritten
    common::assert_contains(
        &log,
        b"reset refs/backups/r20/heads/feature\nfrom refs/heads/feature\n\n",
    );
    common::assert_contains(
        &log,
        b"reset refs/heads/feature\n\
          from 0000000000000000000000000000000000000000\n\n\
          progress SVN r20 branch feature = :0 # delete\n\n",
    );
}

#[test]
fn delete_all_and_trailing_slash() {
    let base = common::scratch_dir();
    let options = common::dry_options(&base);
    let cache = common::new_cache();
    let repo = common::open_repo(&base, "project", &["master"], &options, &cache);

    {
        let mut txn = repo.new_transaction("master", b"/trunk", 1).unwrap();
        txn.set_author(b"a <a@x>");
        txn.set_date_time(1000);
        txn.set_log(b"prune");
        txn.delete_file(b"some/dir/");
        txn.delete_file(b"other/file");
        txn.commit().unwrap();
    }
    {
        // the empty path wipes the branch; individual deletions are
        // superseded
        let mut txn = repo.new_transaction("master", b"/trunk", 2).unwrap();
        txn.set_author(b"a <a@x>");
        txn.set_date_time(1001);
        txn.set_log(b"wipe");
        txn.delete_file(b"kept/file");
        txn.delete_file(b"");
        txn.commit().unwrap();
    }
    drop(repo);

    let log = common::read_log(&base, "project");
    common::assert_contains(&log, b"D some/dir\nD other/file\n");
    common::assert_contains(&log, b"data 5\nwipe\n\ndeleteall\n");
    assert!(!common::contains(&log, b"D kept/file"));
}

#[test]
fn octopus_merges_are_capped_at_sixteen() {
    let base = common::scratch_dir();
    let options = common::dry_options(&base);
    let cache = common::new_cache();
    let repo = common::open_repo(&base, "project", &["master"], &options, &cache);

    for rev in 1..=20 {
        common::quick_commit(&repo, "master", rev);
    }

    let mut txn = repo.new_transaction("collector", b"/trunk", 30).unwrap();
    txn.set_author(b"a <a@x>");
    txn.set_date_time(2000);
    txn.set_log(b"collect");
    for rev in 1..=20 {
        txn.note_copy_from_branch("master", rev);
    }
    txn.commit().unwrap();
    drop(txn);
    drop(repo);

    let log = common::read_log(&base, "project");
    assert_eq!(common::count_occurrences(&log, b"merge :"), 16);
    common::assert_contains(&log, b"merge :16\n");
    assert!(!common::contains(&log, b"merge :17\n"));
}

#[test]
fn add_metadata_appends_svn_suffix() {
    let base = common::scratch_dir();
    let options = Rc::new(RepoOptions {
        base_dir: base.clone(),
        dry_run: true,
        add_metadata: true,
        ..RepoOptions::default()
    });
    let cache = common::new_cache();
    let repo = common::open_repo(&base, "project", &["master"], &options, &cache);

    let mut txn = repo.new_transaction("master", b"/trunk", 3).unwrap();
    txn.set_author(b"a <a@x>");
    txn.set_date_time(1000);
    txn.set_log(b"fix");
    txn.commit().unwrap();
    drop(txn);
    drop(repo);

    let log = common::read_log(&base, "project");
    common::assert_contains(&log, b"data 33\nfix\n\nsvn path=/trunk; revision=3\n");
}

#[test]
fn annotated_tag_finalization() {
    let base = common::scratch_dir();
    let options = common::dry_options(&base);
    let cache = common::new_cache();
    let repo = common::open_repo(&base, "project", &["master"], &options, &cache);

    common::quick_commit(&repo, "master", 1);

    repo.create_annotated_tag("v1", b"/tags/v1", 7, b"t <t@x>", 2000, b"release");
    // last writer wins, under the short name
    repo.create_annotated_tag("refs/tags/v1", b"/tags/v1", 8, b"t <t@x>", 2100, b"better release");
    repo.create_annotated_tag("v2", b"/tags/v2", 9, b"t <t@x>", 2200, b"next");
    repo.finalize_tags().unwrap();
    drop(repo);

    let log = common::read_log(&base, "project");
    common::assert_contains(
        &log,
        b"progress Creating annotated tag v1 from ref refs/tags/v1\n\
          tag v1\nfrom refs/tags/v1\ntagger t <t@x> 2100 -0000\n\
          data 15\nbetter release\n\n",
    );
    common::assert_contains(
        &log,
        b"tag v2\nfrom refs/heads/v2\ntagger t <t@x> 2200 -0000\ndata 5\nnext\n\n",
    );
    assert!(!common::contains(&log, b"data 8\nrelease"));
}

#[test]
fn prefixing_repository_rewrites_paths() {
    let base = common::scratch_dir();
    std::fs::create_dir_all(base.join("project")).unwrap();

    let rules = Rules::parse(
        r#"
        [[repository]]
        name = "project"
        branches = ["master"]

        [[repository]]
        name = "subproject"
        forward-to = "project"
        prefix = "sub/"
        "#,
    )
    .unwrap();

    let cache = common::new_cache();
    let options = RepoOptions {
        base_dir: base.clone(),
        dry_run: true,
        ..RepoOptions::default()
    };
    let repositories = make_repositories(&rules, options, &cache).unwrap();
    let sub = &repositories["subproject"];

    // a prefixing view has no resume state of its own
    let mut cutoff = u32::MAX;
    assert_eq!(sub.setup_incremental(&mut cutoff).unwrap(), 1);

    let mut txn = sub.new_transaction("master", b"/sub/trunk", 1).unwrap();
    txn.set_author(b"a <a@x>");
    txn.set_date_time(1000);
    txn.set_log(b"add");
    {
        let mut file = txn.add_file(b"x.txt", 0o100644, 2).unwrap();
        file.write_all(b"hi").unwrap();
    }
    txn.delete_file(b"old/dir/");
    txn.commit().unwrap();
    drop(txn);

    // tags forward verbatim to the backing repository
    sub.create_annotated_tag("v1", b"/sub/tags/v1", 2, b"t <t@x>", 2000, b"tagged");
    sub.finalize_tags().unwrap();
    repositories["project"].finalize_tags().unwrap();
    drop(repositories);

    let log = common::read_log(&base, "project");
    common::assert_contains(&log, b"M 100644 :1048575 sub/x.txt\n");
    common::assert_contains(&log, b"D sub/old/dir\n");
    common::assert_contains(&log, b"tag v1\n");
}

#[test]
fn process_cache_evicts_and_restarts() {
    let base = common::scratch_dir();
    let options = common::dry_options(&base);
    let cache = Rc::new(RefCell::new(ProcessCache::with_limit(2)));

    let repo_a = common::open_repo(&base, "a", &["master"], &options, &cache);
    let repo_b = common::open_repo(&base, "b", &["master"], &options, &cache);
    let repo_c = common::open_repo(&base, "c", &["master"], &options, &cache);

    common::quick_commit(&repo_a, "master", 1);
    common::quick_commit(&repo_b, "master", 1);
    common::quick_commit(&repo_c, "master", 1);

    // committing on c pushed a out of the cache: its child got the final
    // checkpoint and exited, while b's is still running
    let log_a = common::read_log(&base, "a");
    assert!(log_a.ends_with(b"checkpoint\n"));
    let log_b = common::read_log(&base, "b");
    assert!(!log_b.ends_with(b"checkpoint\n"));

    // using a again restarts its child, which re-anchors the branch tips
    common::quick_commit(&repo_a, "master", 2);
    drop(repo_a);

    let log_a = common::read_log(&base, "a");
    common::assert_contains(
        &log_a,
        b"reset refs/heads/master\nfrom :1\n\nprogress Branch refs/heads/master reloaded\n",
    );
    common::assert_contains(&log_a, b"progress SVN r2 branch master = :2\n");
}
