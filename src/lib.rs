#![warn(
    rust_2018_idioms,
    trivial_casts,
    trivial_numeric_casts,
    unreachable_pub,
    unused_qualifications
)]
#![forbid(unsafe_code)]

//! Repository output engine of an SVN-to-Git history conversion tool.
//!
//! Given a stream of logical SVN revisions decomposed into per-branch
//! transactions, this crate produces Git history by driving one
//! `git fast-import` child process per output repository. It keeps
//! per-branch commit genealogies, allocates fast-import marks, supports
//! resuming an interrupted run from the captured progress log, and emits
//! annotated tags in a final batch.
//!
//! The SVN side (log traversal, change extraction, path rules) is an
//! external collaborator: it feeds revisions into [`Repository`] handles
//! built by [`make_repositories`] and commits them through [`Transaction`].

mod git;
mod options;
mod rules;

pub use git::{make_repositories, FileWriter, ProcessCache, RepoError, Repository, Transaction};
pub use options::RepoOptions;
pub use rules::{RepoRule, Rules, RulesError};
