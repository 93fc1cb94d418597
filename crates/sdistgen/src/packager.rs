//! Running `setup.py` in a staged project

use std::{
    fmt, fs,
    path::{Path, PathBuf},
    process::Command,
};

use anyhow::{Context, Result, bail};
use log::{debug, error, info};

/// Builds or runs staged `setup.py` projects
pub trait Packager: fmt::Debug {
    /// Build a source distribution of the project, returning the archive path
    fn sdist(&self, setup_dir: &Path) -> Result<PathBuf>;

    /// Run `setup.py` with custom arguments, returning whether it succeeded
    fn run_command(&self, setup_dir: &Path, args: &[String]) -> Result<bool>;
}

/// Packager invoking a Python interpreter
#[derive(Debug, Clone)]
pub struct PythonPackager {
    interpreter: String,
}

impl PythonPackager {
    pub fn new(interpreter: impl Into<String>) -> Self {
        Self {
            interpreter: interpreter.into(),
        }
    }

    fn setup_py(&self, setup_dir: &Path, args: &[&str]) -> Result<std::process::Output> {
        debug!(
            "Running {} setup.py {} in {}",
            self.interpreter,
            args.join(" "),
            setup_dir.display()
        );
        Command::new(&self.interpreter)
            .arg("setup.py")
            .args(args)
            .current_dir(setup_dir)
            .output()
            .with_context(|| format!("Failed to run {}", self.interpreter))
    }
}

impl Packager for PythonPackager {
    fn sdist(&self, setup_dir: &Path) -> Result<PathBuf> {
        let dist = setup_dir.join("dist");
        let dist_arg = dist.to_string_lossy().into_owned();
        let output = self.setup_py(setup_dir, &["sdist", "--dist-dir", &dist_arg])?;
        if !output.status.success() {
            bail!(
                "setup.py sdist failed in {}:\n{}",
                setup_dir.display(),
                String::from_utf8_lossy(&output.stderr)
            );
        }

        let mut artifacts = Vec::new();
        for entry in fs::read_dir(&dist)
            .with_context(|| format!("Failed to list {}", dist.display()))?
        {
            let path = entry?.path();
            if path.is_file() {
                artifacts.push(path);
            }
        }
        artifacts.sort();
        match artifacts.as_slice() {
            [artifact] => Ok(artifact.clone()),
            [] => bail!("setup.py sdist produced no artifact in {}", dist.display()),
            _ => bail!(
                "setup.py sdist produced {} artifacts in {}, expected one",
                artifacts.len(),
                dist.display()
            ),
        }
    }

    fn run_command(&self, setup_dir: &Path, args: &[String]) -> Result<bool> {
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        let output = self.setup_py(setup_dir, &args)?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        if !stdout.trim().is_empty() {
            info!("{}", stdout.trim_end());
        }
        if !output.status.success() {
            error!("{}", String::from_utf8_lossy(&output.stderr).trim_end());
        }
        Ok(output.status.success())
    }
}
