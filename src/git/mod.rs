use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use crate::options::RepoOptions;
use crate::rules::{RepoRule, Rules};

mod fast_import;
mod marks;
mod process_cache;
mod progress_log;

pub use fast_import::{FileWriter, Transaction};
pub use process_cache::ProcessCache;

use fast_import::FastImport;

#[derive(Debug)]
pub enum RepoError {
    CreateDirError {
        path: std::path::PathBuf,
        error: std::io::Error,
    },
    CreateFileError {
        path: std::path::PathBuf,
        error: std::io::Error,
    },
    ReadFileError {
        path: std::path::PathBuf,
        error: std::io::Error,
    },
    WriteFileError {
        path: std::path::PathBuf,
        error: std::io::Error,
    },
    RemoveFileError {
        path: std::path::PathBuf,
        error: std::io::Error,
    },
    CopyFileError {
        source_path: std::path::PathBuf,
        dest_path: std::path::PathBuf,
        error: std::io::Error,
    },
    RenameError {
        source_path: std::path::PathBuf,
        dest_path: std::path::PathBuf,
        error: std::io::Error,
    },
    SpawnError {
        command: String,
        error: std::io::Error,
    },
    GitInitFailed {
        name: String,
        status: std::process::ExitStatus,
    },
    FastImportRestarted {
        name: String,
    },
    FastImportWriteError {
        name: String,
        error: std::io::Error,
    },
    UnknownSourceBranch {
        name: String,
        branch: String,
        branch_from: String,
    },
    UnknownForwardTarget {
        name: String,
        target: String,
    },
}

impl std::error::Error for RepoError {}

impl std::fmt::Display for RepoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            Self::CreateDirError {
                ref path,
                ref error,
            } => {
                write!(f, "failed to create directory {path:?}: {error}")
            }
            Self::CreateFileError {
                ref path,
                ref error,
            } => {
                write!(f, "failed to create file {path:?}: {error}")
            }
            Self::ReadFileError {
                ref path,
                ref error,
            } => {
                write!(f, "failed to read file {path:?}: {error}")
            }
            Self::WriteFileError {
                ref path,
                ref error,
            } => {
                write!(f, "failed to write file {path:?}: {error}")
            }
            Self::RemoveFileError {
                ref path,
                ref error,
            } => {
                write!(f, "failed to remove file {path:?}: {error}")
            }
            Self::CopyFileError {
                ref source_path,
                ref dest_path,
                ref error,
            } => {
                write!(
                    f,
                    "failed to copy {source_path:?} to {dest_path:?}: {error}"
                )
            }
            Self::RenameError {
                ref source_path,
                ref dest_path,
                ref error,
            } => {
                write!(
                    f,
                    "failed to rename {source_path:?} to {dest_path:?}: {error}"
                )
            }
            Self::SpawnError {
                ref command,
                ref error,
            } => {
                write!(f, "failed to run \"{command}\": {error}")
            }
            Self::GitInitFailed { ref name, status } => {
                write!(
                    f,
                    "\"git --bare init\" for repository {name} exited with {status}"
                )
            }
            Self::FastImportRestarted { ref name } => {
                write!(
                    f,
                    "git fast-import for repository {name} has been started once and crashed",
                )
            }
            Self::FastImportWriteError {
                ref name,
                ref error,
            } => {
                write!(
                    f,
                    "failed to write to git fast-import for repository {name}: {error}"
                )
            }
            Self::UnknownSourceBranch {
                ref name,
                ref branch,
                ref branch_from,
            } => {
                write!(
                    f,
                    "{branch} in repository {name} is branching from unknown branch {branch_from}",
                )
            }
            Self::UnknownForwardTarget {
                ref name,
                ref target,
            } => {
                write!(f, "no repository with name {target} to forward {name} to")
            }
        }
    }
}

/// Handle to an output repository.
///
/// A handle is either a fast-import repository of its own or a prefixing
/// view into another one: the latter forwards every operation to its
/// backing repository and prepends a path prefix inside transactions.
/// Handles onto the same backing repository share state.
pub struct Repository {
    backing: Rc<RefCell<FastImport>>,
    prefix: Option<Vec<u8>>,
}

impl Repository {
    /// Opens a fast-import repository. Unless `dry_run` is set, a missing
    /// repository directory is created with `git --bare init` and seeded
    /// with an empty marks file.
    pub fn open(
        rule: &RepoRule,
        options: &Rc<RepoOptions>,
        cache: &Rc<RefCell<ProcessCache>>,
    ) -> Result<Self, RepoError> {
        let backing = FastImport::new(rule, Rc::clone(options), Rc::clone(cache))?;
        Ok(Self {
            backing: Rc::new(RefCell::new(backing)),
            prefix: None,
        })
    }

    /// A prefixing view onto the same backing repository. Prefixes
    /// compose when forwarding from an already prefixed handle.
    pub fn forward(&self, prefix: &str) -> Self {
        let mut full_prefix = self.prefix.clone().unwrap_or_default();
        full_prefix.extend_from_slice(prefix.as_bytes());
        Self {
            backing: Rc::clone(&self.backing),
            prefix: Some(full_prefix),
        }
    }

    /// Reconciles the progress log against the marks file and returns the
    /// revision at which to resume. `cutoff` may be lowered when the log
    /// records marks the marks file cannot vouch for. A prefixing view has
    /// no resume state of its own and always reports revision 1.
    pub fn setup_incremental(&self, cutoff: &mut u32) -> Result<u32, RepoError> {
        if self.prefix.is_some() {
            return Ok(1);
        }
        self.backing.borrow_mut().setup_incremental(cutoff)
    }

    /// Rolls the progress log back to its pre-setup contents, if a backup
    /// from `setup_incremental` exists. Called when a run aborts before
    /// producing any new commits.
    pub fn restore_log(&self) -> Result<(), RepoError> {
        if self.prefix.is_some() {
            return Ok(());
        }
        self.backing.borrow().restore_log()
    }

    /// Creates `branch` at `revnum` from the nearest ancestor of
    /// `branch_from` at `branch_rev`. Fails if the source branch is not
    /// known at all; if it merely has no exported commits yet, an empty
    /// branch is created from the textual ref instead.
    pub fn create_branch(
        &self,
        branch: &str,
        revnum: u32,
        branch_from: &str,
        branch_rev: u32,
    ) -> Result<(), RepoError> {
        self.backing
            .borrow_mut()
            .create_branch(branch, revnum, branch_from, branch_rev)
    }

    pub fn delete_branch(&self, branch: &str, revnum: u32) -> Result<(), RepoError> {
        self.backing.borrow_mut().delete_branch(branch, revnum)
    }

    /// Opens a transaction that will produce one commit on `branch` for
    /// SVN revision `revnum`. Several transactions on the same repository
    /// may be outstanding at once (one SVN revision can touch several
    /// branches); each must be committed exactly once.
    pub fn new_transaction(
        &self,
        branch: &str,
        svnprefix: &[u8],
        revnum: u32,
    ) -> Result<Transaction, RepoError> {
        self.backing.borrow_mut().prepare_transaction(branch)?;
        Ok(Transaction::new(
            Rc::clone(&self.backing),
            self.prefix.clone(),
            branch,
            svnprefix,
            revnum,
        ))
    }

    /// Records an annotated tag to be written by `finalize_tags`. Identity
    /// is the tag's short name; a later record overwrites an earlier one.
    pub fn create_annotated_tag(
        &self,
        ref_name: &str,
        svnprefix: &[u8],
        revnum: u32,
        author: &[u8],
        datetime: u64,
        log: &[u8],
    ) {
        self.backing
            .borrow_mut()
            .create_annotated_tag(ref_name, svnprefix, revnum, author, datetime, log);
    }

    /// Writes all recorded annotated tags. A no-op on a prefixing view;
    /// the driver finalizes the backing repository separately.
    pub fn finalize_tags(&self) -> Result<(), RepoError> {
        if self.prefix.is_some() {
            return Ok(());
        }
        self.backing.borrow_mut().finalize_tags()
    }
}

/// Builds the repository set described by `rules`, in rule order. A rule
/// with `forward-to` becomes a prefixing view onto the repository of an
/// earlier rule.
pub fn make_repositories(
    rules: &Rules,
    options: RepoOptions,
    cache: &Rc<RefCell<ProcessCache>>,
) -> Result<BTreeMap<String, Repository>, RepoError> {
    let options = Rc::new(options);

    let mut repositories: BTreeMap<String, Repository> = BTreeMap::new();
    for rule in rules.repositories.iter() {
        let repo = match rule.forward_to {
            None => Repository::open(rule, &options, cache)?,
            Some(ref target) => match repositories.get(target) {
                Some(backing) => backing.forward(&rule.prefix),
                None => {
                    tracing::error!(
                        "no repository with name {} to forward {} to",
                        target,
                        rule.name,
                    );
                    return Err(RepoError::UnknownForwardTarget {
                        name: rule.name.clone(),
                        target: target.clone(),
                    });
                }
            },
        };
        repositories.insert(rule.name.clone(), repo);
    }

    Ok(repositories)
}
