use std::path::PathBuf;

/// Runtime toggles shared by every repository of a run.
pub struct RepoOptions {
    /// Directory against which repository directories and `log-<name>`
    /// files are resolved.
    pub base_dir: PathBuf,
    /// Substitute `cat` for `git fast-import` and skip `git --bare init`,
    /// so the protocol stream is captured instead of imported.
    pub dry_run: bool,
    /// Append an `svn path=...; revision=...` suffix to commit and tag
    /// messages.
    pub add_metadata: bool,
    /// Emit a `checkpoint` every this many transactions (0 disables).
    pub commit_interval: u32,
}

impl Default for RepoOptions {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("."),
            dry_run: false,
            add_metadata: false,
            commit_interval: 10000,
        }
    }
}
