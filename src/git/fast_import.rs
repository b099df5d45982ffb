use std::cell::RefCell;
use std::collections::BTreeMap;
use std::io::{BufRead as _, Write as _};
use std::path::PathBuf;
use std::rc::Rc;

use super::process_cache::ProcessCache;
use super::{marks, progress_log, RepoError};
use crate::options::RepoOptions;
use crate::rules::RepoRule;

// Some versions of git fast-import misbehave with larger mark values.
const MAX_MARK: u32 = (1 << 20) - 1;

/// Per-branch commit genealogy: the SVN revisions at which commits were
/// produced on the branch, with the fast-import mark of each. A mark of 0
/// records a branch deletion, after which the next commit restarts the
/// genealogy.
#[derive(Default)]
struct Branch {
    /// SVN revision at which the branch was created in this run;
    /// 0 = not created yet.
    created: u32,
    commits: Vec<u32>,
    marks: Vec<u32>,
}

struct AnnotatedTag {
    supporting_ref: String,
    svnprefix: Vec<u8>,
    author: Vec<u8>,
    log: Vec<u8>,
    datetime: u64,
    revnum: u32,
}

struct FastImportChild {
    process: std::process::Child,
    stdin: std::io::BufWriter<std::process::ChildStdin>,
}

pub(super) struct FastImport {
    name: String,
    options: Rc<RepoOptions>,
    cache: Rc<RefCell<ProcessCache>>,
    branches: BTreeMap<String, Branch>,
    annotated_tags: BTreeMap<String, AnnotatedTag>,
    commit_count: u32,
    outstanding_transactions: u32,
    /// Commit marks count up from 0.
    last_commit_mark: u32,
    /// File marks count down from `MAX_MARK`; reset whenever no
    /// transaction is outstanding, so blob marks of one SVN revision are
    /// never referenced by a later one.
    next_file_mark: u32,
    process_has_started: bool,
    child: Option<FastImportChild>,
}

pub(super) enum AncestorMark {
    /// The source branch was never created.
    NoBranch,
    /// The source branch exists, but every known commit on it is after
    /// the requested revision (or the resolved ledger entry is a deletion
    /// marker).
    NoCommit,
    Mark(u32),
}

impl FastImport {
    pub(super) fn new(
        rule: &RepoRule,
        options: Rc<RepoOptions>,
        cache: Rc<RefCell<ProcessCache>>,
    ) -> Result<Self, RepoError> {
        let mut branches = BTreeMap::new();
        for branch in rule.branches.iter() {
            branches.insert(branch.clone(), Branch::default());
        }
        // the default branch always exists
        branches.entry("master".into()).or_default().created = 1;

        let this = Self {
            name: rule.name.clone(),
            options,
            cache,
            branches,
            annotated_tags: BTreeMap::new(),
            commit_count: 0,
            outstanding_transactions: 0,
            last_commit_mark: 0,
            next_file_mark: MAX_MARK,
            process_has_started: false,
            child: None,
        };

        if !this.options.dry_run {
            let repo_dir = this.repo_dir();
            if !repo_dir.exists() {
                tracing::debug!("creating new repository {}", this.name);

                std::fs::create_dir_all(&repo_dir).map_err(|e| RepoError::CreateDirError {
                    path: repo_dir.clone(),
                    error: e,
                })?;

                let status = std::process::Command::new("git")
                    .arg("--bare")
                    .arg("init")
                    .current_dir(&repo_dir)
                    .stdin(std::process::Stdio::null())
                    .stdout(std::process::Stdio::null())
                    .stderr(std::process::Stdio::inherit())
                    .status()
                    .map_err(|e| RepoError::SpawnError {
                        command: "git --bare init".into(),
                        error: e,
                    })?;
                if !status.success() {
                    return Err(RepoError::GitInitFailed {
                        name: this.name.clone(),
                        status,
                    });
                }

                let marks_path = this.marks_path();
                std::fs::File::create(&marks_path).map_err(|e| RepoError::CreateFileError {
                    path: marks_path,
                    error: e,
                })?;
            }
        }

        Ok(this)
    }

    fn repo_dir(&self) -> PathBuf {
        self.options.base_dir.join(&self.name)
    }

    fn marks_path(&self) -> PathBuf {
        self.repo_dir().join(marks_file_name(&self.name))
    }

    fn log_path(&self) -> PathBuf {
        self.options.base_dir.join(log_file_name(&self.name))
    }

    fn start_fast_import(&mut self) -> Result<(), RepoError> {
        if let Some(child) = &mut self.child {
            let exited = child.process.try_wait().map_or(true, |s| s.is_some());
            if exited {
                // the previous child must have crashed; restarting would
                // desynchronize marks
                return Err(RepoError::FastImportRestarted {
                    name: self.name.clone(),
                });
            }
            return Ok(());
        }
        if self.process_has_started {
            return Err(RepoError::FastImportRestarted {
                name: self.name.clone(),
            });
        }
        self.process_has_started = true;

        let log_path = self.log_path();
        let log_file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .map_err(|e| RepoError::CreateFileError {
                path: log_path.clone(),
                error: e,
            })?;
        let log_file_stderr = log_file.try_clone().map_err(|e| RepoError::CreateFileError {
            path: log_path,
            error: e,
        })?;

        let marks_file = marks_file_name(&self.name);
        let (command_name, mut command) = if self.options.dry_run {
            ("cat", std::process::Command::new("cat"))
        } else {
            let mut command = std::process::Command::new("git");
            command
                .arg("fast-import")
                .arg(format!("--import-marks={marks_file}"))
                .arg(format!("--export-marks={marks_file}"))
                .arg("--force");
            ("git fast-import", command)
        };
        command
            .current_dir(self.repo_dir())
            .stdin(std::process::Stdio::piped())
            .stdout(log_file)
            .stderr(log_file_stderr);

        let mut process = command.spawn().map_err(|e| RepoError::SpawnError {
            command: command_name.into(),
            error: e,
        })?;
        let stdin = process.stdin.take().expect("child stdin was piped");
        self.child = Some(FastImportChild {
            process,
            stdin: std::io::BufWriter::new(stdin),
        });

        self.reload_branches()
    }

    /// Re-anchors a fresh child to the existing branch tips after a
    /// restart.
    fn reload_branches(&mut self) -> Result<(), RepoError> {
        let mut out = Vec::new();
        for (branch, br) in self.branches.iter() {
            match br.marks.last() {
                Some(&mark) if mark != 0 => {
                    let branch_ref = qualify_ref(branch);
                    write!(
                        out,
                        "reset {branch_ref}\nfrom :{mark}\n\n\
                         progress Branch {branch_ref} reloaded\n",
                    )
                    .unwrap();
                }
                _ => {}
            }
        }

        if out.is_empty() {
            return Ok(());
        }
        self.child_write(&out)
    }

    pub(super) fn close_fast_import(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.stdin.write_all(b"checkpoint\n");
            let _ = child.stdin.flush();
            // closing stdin tells the child to finish up
            drop(child.stdin);

            if !wait_for_exit(&mut child.process, std::time::Duration::from_secs(30)) {
                if let Err(e) = child.process.kill() {
                    tracing::warn!(
                        "failed to kill git fast-import for repository {}: {e}",
                        self.name,
                    );
                }
                if !wait_for_exit(&mut child.process, std::time::Duration::from_millis(200)) {
                    tracing::warn!("git fast-import for repository {} did not die", self.name);
                }
            }
        }
        self.process_has_started = false;
    }

    fn child_write(&mut self, data: &[u8]) -> Result<(), RepoError> {
        let Some(child) = &mut self.child else {
            return Err(RepoError::FastImportWriteError {
                name: self.name.clone(),
                error: std::io::ErrorKind::NotConnected.into(),
            });
        };
        child
            .stdin
            .write_all(data)
            .map_err(|e| RepoError::FastImportWriteError {
                name: self.name.clone(),
                error: e,
            })
    }

    fn child_flush(&mut self) -> Result<(), RepoError> {
        let Some(child) = &mut self.child else {
            return Err(RepoError::FastImportWriteError {
                name: self.name.clone(),
                error: std::io::ErrorKind::NotConnected.into(),
            });
        };
        child
            .stdin
            .flush()
            .map_err(|e| RepoError::FastImportWriteError {
                name: self.name.clone(),
                error: e,
            })
    }

    pub(super) fn setup_incremental(&mut self, cutoff: &mut u32) -> Result<u32, RepoError> {
        let log_path = self.log_path();
        if !log_path.exists() {
            return Ok(1);
        }

        let log_file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(&log_path)
            .map_err(|e| RepoError::ReadFileError {
                path: log_path.clone(),
                error: e,
            })?;

        let last_valid_mark = marks::last_valid_mark(&self.marks_path());

        let backup_path = log_backup_path(&log_path);
        let mut reader = std::io::BufReader::new(log_file);
        let mut pos: u64 = 0;
        let mut last_revnum: u32 = 0;
        let mut truncate_at = None;

        let mut line = Vec::new();
        loop {
            line.clear();
            let n = reader
                .read_until(b'\n', &mut line)
                .map_err(|e| RepoError::ReadFileError {
                    path: log_path.clone(),
                    error: e,
                })?;
            if n == 0 {
                break;
            }
            let line_pos = pos;
            pos += n as u64;

            let Some(entry) = progress_log::parse_line(&line) else {
                continue;
            };

            if entry.revnum >= *cutoff {
                truncate_at = Some(line_pos);
                break;
            }

            if entry.revnum < last_revnum {
                tracing::warn!(
                    "{}: revision numbers are not monotonic: got {} and then {}",
                    self.name,
                    last_revnum,
                    entry.revnum,
                );
            }

            if entry.mark > last_valid_mark {
                tracing::warn!(
                    "{}: unknown commit mark found: rewinding -- did you hit Ctrl-C?",
                    self.name,
                );
                *cutoff = entry.revnum;
                truncate_at = Some(line_pos);
                break;
            }

            last_revnum = entry.revnum;

            if self.last_commit_mark < entry.mark {
                self.last_commit_mark = entry.mark;
            }

            let br = self.branches.entry(entry.branch).or_default();
            if br.created == 0 || entry.mark == 0 || br.marks.is_empty() {
                br.created = entry.revnum;
            }
            br.commits.push(entry.revnum);
            br.marks.push(entry.mark);
        }

        if let Some(truncate_pos) = truncate_at {
            // back up the whole log, then drop the tail we are going to
            // re-produce
            let _ = std::fs::remove_file(&backup_path);
            std::fs::copy(&log_path, &backup_path).map_err(|e| RepoError::CopyFileError {
                source_path: log_path.clone(),
                dest_path: backup_path,
                error: e,
            })?;

            tracing::debug!("{}: truncating history to revision {}", self.name, *cutoff);
            let log_file = reader.into_inner();
            log_file
                .set_len(truncate_pos)
                .map_err(|e| RepoError::WriteFileError {
                    path: log_path,
                    error: e,
                })?;

            return Ok(*cutoff);
        }

        let retval = last_revnum + 1;
        if retval == *cutoff {
            // a stale backup would confuse restore_log
            let _ = std::fs::remove_file(&backup_path);
        }
        Ok(retval)
    }

    pub(super) fn restore_log(&self) -> Result<(), RepoError> {
        let log_path = self.log_path();
        let backup_path = log_backup_path(&log_path);
        if !backup_path.exists() {
            return Ok(());
        }

        match std::fs::remove_file(&log_path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(RepoError::RemoveFileError {
                    path: log_path,
                    error: e,
                });
            }
        }
        std::fs::rename(&backup_path, &log_path).map_err(|e| RepoError::RenameError {
            source_path: backup_path,
            dest_path: log_path,
            error: e,
        })
    }

    /// Resolves the mark of the nearest ancestor commit on `branch_from`
    /// at or before `branch_rev`. When a descriptor is supplied, the
    /// resolved revision is appended to it for progress comments.
    fn mark_from(
        &self,
        branch_from: &str,
        branch_rev: u32,
        desc: Option<&mut String>,
    ) -> AncestorMark {
        let Some(br_from) = self.branches.get(branch_from) else {
            return AncestorMark::NoBranch;
        };
        if br_from.created == 0 || br_from.commits.is_empty() {
            return AncestorMark::NoBranch;
        }

        if branch_rev == *br_from.commits.last().unwrap() {
            return mark_or_no_commit(*br_from.marks.last().unwrap());
        }

        let idx = br_from.commits.partition_point(|&rev| rev <= branch_rev);
        if idx == 0 {
            return AncestorMark::NoCommit;
        }

        let closest_commit = br_from.commits[idx - 1];
        if let Some(desc) = desc {
            use std::fmt::Write as _;
            write!(desc, " at r{branch_rev}").unwrap();
            if closest_commit != branch_rev {
                write!(desc, " => r{closest_commit}").unwrap();
            }
        }

        mark_or_no_commit(br_from.marks[idx - 1])
    }

    pub(super) fn create_branch(
        &mut self,
        branch: &str,
        revnum: u32,
        branch_from: &str,
        branch_rev: u32,
    ) -> Result<(), RepoError> {
        self.start_fast_import()?;

        let mut desc = format!("from branch {branch_from}");
        let (mark, from_ref) = match self.mark_from(branch_from, branch_rev, Some(&mut desc)) {
            AncestorMark::NoBranch => {
                tracing::error!(
                    "{} in repository {} is branching from branch {} but the latter doesn't exist, cannot continue",
                    branch,
                    self.name,
                    branch_from,
                );
                return Err(RepoError::UnknownSourceBranch {
                    name: self.name.clone(),
                    branch: branch.into(),
                    branch_from: branch_from.into(),
                });
            }
            AncestorMark::NoCommit => {
                tracing::warn!(
                    "{} in repository {} is branching but no exported commits exist in repository, creating an empty branch",
                    branch,
                    self.name,
                );
                desc.push_str(", deleted/unknown");
                (0, qualify_ref(branch_from))
            }
            AncestorMark::Mark(mark) => (mark, format!(":{mark}")),
        };

        tracing::debug!(
            "creating branch {} from {} (r{} {})",
            branch,
            branch_from,
            branch_rev,
            desc,
        );

        self.reset_branch(branch, revnum, mark, from_ref.as_bytes(), &desc)
    }

    pub(super) fn delete_branch(&mut self, branch: &str, revnum: u32) -> Result<(), RepoError> {
        self.start_fast_import()?;
        self.reset_branch(branch, revnum, 0, &[b'0'; 40], "delete")
    }

    fn reset_branch(
        &mut self,
        branch: &str,
        revnum: u32,
        mark: u32,
        reset_to: &[u8],
        comment: &str,
    ) -> Result<(), RepoError> {
        let branch_ref = qualify_ref(branch);

        let needs_backup = self.branches.get(branch).is_some_and(|br| {
            br.created != 0 && br.created != revnum && br.marks.last().is_some_and(|&m| m != 0)
        });
        if needs_backup {
            // the old tip would otherwise become unreachable
            let backup_ref = format!("refs/backups/r{revnum}{}", &branch_ref[4..]);
            tracing::warn!("backing up branch {} to {}", branch, backup_ref);

            self.child_write(format!("reset {backup_ref}\nfrom {branch_ref}\n\n").as_bytes())?;
        }

        let br = self.branches.entry(branch.to_owned()).or_default();
        br.created = revnum;
        br.commits.push(revnum);
        br.marks.push(mark);

        let mut out = Vec::new();
        write!(out, "reset {branch_ref}\nfrom ").unwrap();
        out.extend_from_slice(reset_to);
        write!(
            out,
            "\n\nprogress SVN r{revnum} branch {branch} = :{mark} # {comment}\n\n",
        )
        .unwrap();
        self.child_write(&out)
    }

    pub(super) fn prepare_transaction(&mut self, branch: &str) -> Result<(), RepoError> {
        self.start_fast_import()?;

        if !self.branches.contains_key(branch) {
            tracing::warn!(
                "{} is not a known branch in repository {}, going to create it automatically",
                branch,
                self.name,
            );
        }

        self.commit_count += 1;
        if self.options.commit_interval != 0 && self.commit_count % self.options.commit_interval == 0
        {
            // persist marks and objects at regular intervals
            self.child_write(b"checkpoint\n")?;
            tracing::debug!("checkpoint ({} commits in {})", self.commit_count, self.name);
        }

        self.outstanding_transactions += 1;
        Ok(())
    }

    fn forget_transaction(&mut self) {
        self.outstanding_transactions -= 1;
        if self.outstanding_transactions == 0 {
            self.next_file_mark = MAX_MARK;
        }
    }

    pub(super) fn create_annotated_tag(
        &mut self,
        ref_name: &str,
        svnprefix: &[u8],
        revnum: u32,
        author: &[u8],
        datetime: u64,
        log: &[u8],
    ) {
        let tag_name = ref_name.strip_prefix("refs/tags/").unwrap_or(ref_name);

        if !self.annotated_tags.contains_key(tag_name) {
            tracing::info!("creating annotated tag {} ({})", tag_name, ref_name);
        } else {
            tracing::info!("re-creating annotated tag {}", tag_name);
        }

        self.annotated_tags.insert(
            tag_name.to_owned(),
            AnnotatedTag {
                supporting_ref: ref_name.to_owned(),
                svnprefix: svnprefix.to_vec(),
                author: author.to_vec(),
                log: log.to_vec(),
                datetime,
                revnum,
            },
        );
    }

    pub(super) fn finalize_tags(&mut self) -> Result<(), RepoError> {
        if self.annotated_tags.is_empty() {
            return Ok(());
        }

        tracing::info!("finalizing tags for {}", self.name);
        self.start_fast_import()?;

        let mut out = Vec::new();
        for (tag_name, tag) in self.annotated_tags.iter() {
            let mut message = tag.log.clone();
            if !message.ends_with(b"\n") {
                message.push(b'\n');
            }
            if self.options.add_metadata {
                append_metadata(&mut message, &tag.svnprefix, tag.revnum);
            }

            let branch_ref = qualify_ref(&tag.supporting_ref);

            write!(
                out,
                "progress Creating annotated tag {tag_name} from ref {branch_ref}\n\
                 tag {tag_name}\nfrom {branch_ref}\ntagger ",
            )
            .unwrap();
            out.extend_from_slice(&tag.author);
            write!(out, " {} -0000\ndata {}\n", tag.datetime, message.len()).unwrap();
            out.extend_from_slice(&message);
            out.push(b'\n');

            tracing::debug!("tag {} from {}", tag_name, branch_ref);
        }

        self.child_write(&out)?;
        self.child_flush()
    }
}

impl Drop for FastImport {
    fn drop(&mut self) {
        debug_assert!(self.outstanding_transactions == 0);
        self.close_fast_import();
    }
}

/// Builder for one commit. Created by `Repository::new_transaction`,
/// populated by the mutators, finalized by exactly one `commit`.
///
/// Dropping a transaction releases its slot in the owning repository;
/// when no transaction is outstanding the file-mark counter resets.
pub struct Transaction {
    repo: Rc<RefCell<FastImport>>,
    prefix: Option<Vec<u8>>,
    branch: String,
    svnprefix: Vec<u8>,
    author: Vec<u8>,
    log: Vec<u8>,
    datetime: u64,
    revnum: u32,
    merges: Vec<u32>,
    deleted_files: Vec<Vec<u8>>,
    modified_files: Vec<u8>,
}

impl Transaction {
    pub(super) fn new(
        repo: Rc<RefCell<FastImport>>,
        prefix: Option<Vec<u8>>,
        branch: &str,
        svnprefix: &[u8],
        revnum: u32,
    ) -> Self {
        Self {
            repo,
            prefix,
            branch: branch.to_owned(),
            svnprefix: svnprefix.to_vec(),
            author: Vec::new(),
            log: Vec::new(),
            datetime: 0,
            revnum,
            merges: Vec::new(),
            deleted_files: Vec::new(),
            modified_files: Vec::new(),
        }
    }

    pub fn set_author(&mut self, author: &[u8]) {
        self.author = author.to_vec();
    }

    pub fn set_date_time(&mut self, datetime: u64) {
        self.datetime = datetime;
    }

    pub fn set_log(&mut self, log: &[u8]) {
        self.log = log.to_vec();
    }

    fn prefixed(&self, path: &[u8]) -> Vec<u8> {
        match self.prefix {
            Some(ref prefix) => {
                let mut full = prefix.clone();
                full.extend_from_slice(path);
                full
            }
            None => path.to_vec(),
        }
    }

    /// Records a file deletion. The empty path deletes everything the
    /// branch contains.
    pub fn delete_file(&mut self, path: &[u8]) {
        let mut path = self.prefixed(path);
        if path.last() == Some(&b'/') {
            path.pop();
        }
        self.deleted_files.push(path);
    }

    /// Declares a file modification and returns the sink for its blob
    /// content. The caller must write exactly `length` bytes before the
    /// next operation on this transaction.
    pub fn add_file(
        &mut self,
        path: &[u8],
        mode: u32,
        length: u64,
    ) -> Result<FileWriter<'_>, RepoError> {
        let path = self.prefixed(path);

        let mut repo = self.repo.borrow_mut();
        let mark = repo.next_file_mark;
        repo.next_file_mark -= 1;
        // the two mark allocations must never meet
        assert!(
            mark > repo.last_commit_mark + 1,
            "file marks ran into commit marks in repository {}",
            repo.name,
        );

        if self.modified_files.is_empty() {
            self.modified_files.reserve(2048);
        }
        write!(self.modified_files, "M {mode:o} :{mark} ").unwrap();
        self.modified_files.extend_from_slice(&path);
        self.modified_files.push(b'\n');

        repo.child_write(format!("blob\nmark :{mark}\ndata {length}\n").as_bytes())?;
        drop(repo);

        Ok(FileWriter { repo: &self.repo })
    }

    /// Notes that this commit copies files from another branch, to be
    /// emitted as a merge parent. Unresolvable sources are warned about
    /// and skipped; the files are assumed to exist.
    pub fn note_copy_from_branch(&mut self, branch_from: &str, branch_rev: u32) {
        if self.branch == branch_from {
            tracing::warn!("cannot merge inside a branch");
            return;
        }

        let repo = self.repo.borrow();
        match repo.mark_from(branch_from, branch_rev, None) {
            AncestorMark::NoBranch => {
                tracing::warn!(
                    "{} is copying from branch {} but the latter doesn't exist, continuing, assuming the files exist",
                    self.branch,
                    branch_from,
                );
            }
            AncestorMark::NoCommit => {
                tracing::warn!(
                    "unknown revision r{}, continuing, assuming the files exist",
                    branch_rev,
                );
            }
            AncestorMark::Mark(mark) => {
                tracing::warn!(
                    "repository {} branch {} has some files copied from {}@r{}",
                    repo.name,
                    self.branch,
                    branch_from,
                    branch_rev,
                );

                if !self.merges.contains(&mark) {
                    self.merges.push(mark);
                    tracing::debug!(
                        "adding {}@r{} :{} as a merge point",
                        branch_from,
                        branch_rev,
                        mark,
                    );
                } else {
                    tracing::debug!("merge point already recorded");
                }
            }
        }
    }

    /// Emits the commit and appends it to the branch ledger.
    pub fn commit(&mut self) -> Result<(), RepoError> {
        let cache = self.repo.borrow().cache.clone();
        ProcessCache::touch(&cache, &self.repo);

        let mut repo = self.repo.borrow_mut();
        let name = repo.name.clone();

        // a single SVN revision can modify multiple branches and produce
        // multiple commits in the same repository, so the commit mark is
        // a separate counter, not the revision number
        repo.last_commit_mark += 1;
        let mark = repo.last_commit_mark;
        assert!(
            mark < repo.next_file_mark - 1,
            "commit marks ran into file marks in repository {name}",
        );

        let mut message = self.log.clone();
        if !message.ends_with(b"\n") {
            message.push(b'\n');
        }
        if repo.options.add_metadata {
            append_metadata(&mut message, &self.svnprefix, self.revnum);
        }

        let mut parentmark = 0;
        let br = repo.branches.entry(self.branch.clone()).or_default();
        if br.created != 0 && !br.marks.is_empty() {
            parentmark = *br.marks.last().unwrap();
        } else {
            tracing::warn!(
                "branch {} in repository {} doesn't exist at revision {}, did you resume from the wrong revision?",
                self.branch,
                name,
                self.revnum,
            );
            br.created = self.revnum;
        }
        br.commits.push(self.revnum);
        br.marks.push(mark);

        let branch_ref = qualify_ref(&self.branch);
        let mut out = Vec::new();
        write!(out, "commit {branch_ref}\nmark :{mark}\ncommitter ").unwrap();
        out.extend_from_slice(&self.author);
        write!(out, " {} -0000\ndata {}\n", self.datetime, message.len()).unwrap();
        out.extend_from_slice(&message);
        out.push(b'\n');

        let mut desc = String::new();
        let mut parents = u32::from(parentmark != 0);
        for &merge in self.merges.iter() {
            if merge == parentmark {
                tracing::debug!("skipping merge mark :{} as it matches the parent", merge);
                continue;
            }

            parents += 1;
            if parents > 16 {
                // git caps octopus merges at 16 parents; drop the extras
                tracing::warn!("too many merge parents");
                break;
            }

            use std::fmt::Write as _;
            write!(desc, " :{merge}").unwrap();
            write!(out, "merge :{merge}\n").unwrap();
        }

        if self.deleted_files.iter().any(|path| path.is_empty()) {
            out.extend_from_slice(b"deleteall\n");
        } else {
            for path in self.deleted_files.iter() {
                out.extend_from_slice(b"D ");
                out.extend_from_slice(path);
                out.push(b'\n');
            }
        }

        out.extend_from_slice(&self.modified_files);

        write!(
            out,
            "\nprogress SVN r{} branch {} = :{}",
            self.revnum, self.branch, mark,
        )
        .unwrap();
        if !desc.is_empty() {
            write!(out, " # merge from{desc}").unwrap();
        }
        out.extend_from_slice(b"\n\n");

        repo.child_write(&out)?;
        repo.child_flush()?;

        tracing::debug!(
            "{} modifications from SVN {} to {}/{}",
            self.deleted_files.len() + self.modified_files.len(),
            self.svnprefix.escape_ascii(),
            name,
            self.branch,
        );

        Ok(())
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        self.repo.borrow_mut().forget_transaction();
    }
}

/// Sink for the blob content declared by `Transaction::add_file`. Writes
/// go straight to the fast-import child; fast-import reads exactly the
/// declared length, so no terminator follows.
pub struct FileWriter<'a> {
    repo: &'a Rc<RefCell<FastImport>>,
}

impl std::io::Write for FileWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut repo = self.repo.borrow_mut();
        match repo.child.as_mut() {
            Some(child) => child.stdin.write(buf),
            None => Err(std::io::ErrorKind::NotConnected.into()),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        let mut repo = self.repo.borrow_mut();
        match repo.child.as_mut() {
            Some(child) => child.stdin.flush(),
            None => Err(std::io::ErrorKind::NotConnected.into()),
        }
    }
}

fn qualify_ref(name: &str) -> String {
    if name.starts_with("refs/") {
        name.to_owned()
    } else {
        format!("refs/heads/{name}")
    }
}

fn marks_file_name(name: &str) -> String {
    format!("marks-{}", name.replace('/', "_"))
}

fn log_file_name(name: &str) -> String {
    format!("log-{}", name.replace('/', "_"))
}

fn log_backup_path(log_path: &std::path::Path) -> PathBuf {
    let mut path = log_path.as_os_str().to_owned();
    path.push(".old");
    PathBuf::from(path)
}

fn append_metadata(message: &mut Vec<u8>, svnprefix: &[u8], revnum: u32) {
    message.extend_from_slice(b"\nsvn path=");
    message.extend_from_slice(svnprefix);
    write!(message, "; revision={revnum}\n").unwrap();
}

fn mark_or_no_commit(mark: u32) -> AncestorMark {
    if mark == 0 {
        AncestorMark::NoCommit
    } else {
        AncestorMark::Mark(mark)
    }
}

fn wait_for_exit(process: &mut std::process::Child, timeout: std::time::Duration) -> bool {
    let deadline = std::time::Instant::now() + timeout;
    loop {
        match process.try_wait() {
            Ok(Some(_)) => return true,
            Ok(None) => {}
            Err(_) => return true,
        }
        if std::time::Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(std::time::Duration::from_millis(10));
    }
}
