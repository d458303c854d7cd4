use std::path::{Path, PathBuf};

pub const POINTER_FILE: [&str; 2] = [".stream_reconcile", "active_streams.json"];

#[must_use]
pub fn default_pointer_path(home: &Path) -> PathBuf {
    home.join(POINTER_FILE[0]).join(POINTER_FILE[1])
}
