use ignore::gitignore::{Gitignore, GitignoreBuilder};
use std::path::Path;
use tracing::warn;

pub const IGNORE_FILE: &str = ".syncignore";

/// Gitignore-style exclusion rules shared by the walker, the watcher, and
/// the markdown collector. The state directory and the lockfile are always
/// excluded, whether or not a `.syncignore` exists.
pub struct IgnoreSet {
    matcher: Gitignore,
    state_dir_name: String,
}

impl IgnoreSet {
    pub fn load(workdir: &Path, state_dir_name: &str) -> Self {
        let mut builder = GitignoreBuilder::new(workdir);

        let ignore_file = workdir.join(IGNORE_FILE);
        if ignore_file.exists() {
            if let Some(e) = builder.add(&ignore_file) {
                warn!(error = %e, "could not read {}, continuing without it", IGNORE_FILE);
            }
        }
        let _ = builder.add_line(None, &format!("/{}/", state_dir_name));
        let _ = builder.add_line(None, ".sync.lock");
        let _ = builder.add_line(None, IGNORE_FILE);

        let matcher = builder.build().unwrap_or_else(|e| {
            warn!(error = %e, "ignore rules failed to compile, ignoring only the state directory");
            Gitignore::empty()
        });

        Self { matcher, state_dir_name: state_dir_name.to_string() }
    }

    /// `rel` is relative to the working directory.
    pub fn should_ignore(&self, rel: &Path, is_dir: bool) -> bool {
        if rel.starts_with(&self.state_dir_name) {
            return true;
        }
        self.matcher.matched_path_or_any_parents(rel, is_dir).is_ignore()
    }
}
