//! Staging directories for `setup.py` projects

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use log::trace;
use tempfile::TempDir;

/// An exclusively named staging directory, removed on drop unless moved
#[derive(Debug)]
pub struct Chroot {
    dir: TempDir,
}

impl Chroot {
    /// Create a fresh staging directory under `parent`
    pub fn new(parent: &Path, name: &str) -> Result<Self> {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
        let dir = tempfile::Builder::new()
            .prefix(&format!("{name}."))
            .tempdir_in(parent)
            .with_context(|| format!("Failed to create staging directory in {}", parent.display()))?;
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Copy `src` to `dst`, relative to the staging directory
    pub fn copy(&self, src: &Path, dst: impl AsRef<Path>) -> Result<()> {
        let dst = self.prepare(dst.as_ref())?;
        trace!("Staging {} as {}", src.display(), dst.display());
        fs::copy(src, &dst)
            .with_context(|| format!("Failed to copy {} to {}", src.display(), dst.display()))?;
        Ok(())
    }

    /// Write `contents` to `dst`, relative to the staging directory
    pub fn write(&self, contents: impl AsRef<[u8]>, dst: impl AsRef<Path>) -> Result<()> {
        let dst = self.prepare(dst.as_ref())?;
        fs::write(&dst, contents).with_context(|| format!("Failed to write {}", dst.display()))
    }

    /// Move the staged tree to `dest`, replacing whatever is there
    pub fn move_to(self, dest: &Path) -> Result<PathBuf> {
        if dest.exists() {
            fs::remove_dir_all(dest)
                .with_context(|| format!("Failed to remove stale {}", dest.display()))?;
        }
        let staged = self.dir.keep();
        fs::rename(&staged, dest).with_context(|| {
            format!("Failed to move {} to {}", staged.display(), dest.display())
        })?;
        Ok(dest.to_path_buf())
    }

    fn prepare(&self, relative: &Path) -> Result<PathBuf> {
        let dst = self.path().join(relative);
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        Ok(dst)
    }
}
