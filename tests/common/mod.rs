#![allow(dead_code)]

use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use svn_fast_export::{ProcessCache, RepoOptions, RepoRule, Repository};

/// A fresh scratch directory for one test.
pub fn scratch_dir() -> PathBuf {
    use rand::{Rng as _, SeedableRng as _};

    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let mut rng = rand::rngs::StdRng::from_os_rng();

    loop {
        let mut path = PathBuf::from(env!("CARGO_TARGET_TMPDIR"));
        path.push(format!("repo-test-{:08x}", rng.random::<u32>()));

        match std::fs::create_dir(&path) {
            Ok(()) => return path,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
            Err(e) => panic!("failed to create {path:?}: {e}"),
        }
    }
}

pub fn dry_options(base: &Path) -> Rc<RepoOptions> {
    Rc::new(RepoOptions {
        base_dir: base.to_path_buf(),
        dry_run: true,
        ..RepoOptions::default()
    })
}

pub fn new_cache() -> Rc<RefCell<ProcessCache>> {
    ProcessCache::shared()
}

/// Opens a dry-run repository, creating the directory the child process
/// will run in.
pub fn open_repo(
    base: &Path,
    name: &str,
    branches: &[&str],
    options: &Rc<RepoOptions>,
    cache: &Rc<RefCell<ProcessCache>>,
) -> Repository {
    std::fs::create_dir_all(base.join(name)).unwrap();

    let mut rule = RepoRule::named(name);
    rule.branches = branches.iter().map(|&branch| branch.to_owned()).collect();

    Repository::open(&rule, options, cache).unwrap()
}

/// One minimal commit on `branch`; allocates the repository's next commit
/// mark.
pub fn quick_commit(repo: &Repository, branch: &str, revnum: u32) {
    let mut txn = repo.new_transaction(branch, b"/trunk", revnum).unwrap();
    txn.set_author(b"a <a@x>");
    txn.set_date_time(1000 + u64::from(revnum));
    txn.set_log(format!("r{revnum}").as_bytes());
    txn.commit().unwrap();
}

/// The protocol bytes captured through the dry-run `cat` child.
pub fn read_log(base: &Path, name: &str) -> Vec<u8> {
    std::fs::read(base.join(format!("log-{name}"))).unwrap()
}

pub fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|window| window == needle)
}

pub fn assert_contains(haystack: &[u8], needle: &[u8]) {
    assert!(
        contains(haystack, needle),
        "expected to find \"{}\" in:\n{}",
        needle.escape_ascii(),
        haystack.escape_ascii(),
    );
}

pub fn count_occurrences(haystack: &[u8], needle: &[u8]) -> usize {
    haystack
        .windows(needle.len())
        .filter(|window| *window == needle)
        .count()
}
