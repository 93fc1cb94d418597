//! Layered configuration
//!
//! Settings are resolved from, in increasing precedence: built-in defaults,
//! the user config file (`sdistgen/sdistgen.toml` under the platform config
//! directory), the project config file (`sdistgen.toml` in the build root),
//! `SDISTGEN_*` environment variables and finally command line flags.

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use etcetera::BaseStrategy;
use log::debug;
use serde::Deserialize;

pub const CONFIG_FILE_NAME: &str = "sdistgen.toml";

pub const ENV_DIST_DIR: &str = "SDISTGEN_DIST_DIR";
pub const ENV_PYTHON: &str = "SDISTGEN_PYTHON";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Directory sources and relative paths are resolved against
    pub buildroot: PathBuf,
    /// Build graph manifest
    pub graph: PathBuf,
    /// Where staged projects and sdists are written
    pub dist_dir: PathBuf,
    pub python_interpreter: String,
    /// Also create projects for exported dependencies
    pub recursive: bool,
    /// Custom `setup.py` command line run instead of `sdist`
    pub run: Option<String>,
    /// External namespace classifier command
    pub namespace_classifier: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            buildroot: PathBuf::from("."),
            graph: PathBuf::from("build_graph.toml"),
            dist_dir: PathBuf::from("dist"),
            python_interpreter: "python3".to_owned(),
            recursive: false,
            run: None,
            namespace_classifier: None,
        }
    }
}

/// One config file; unset keys leave lower layers untouched
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ConfigLayer {
    graph: Option<PathBuf>,
    dist_dir: Option<PathBuf>,
    python_interpreter: Option<String>,
    recursive: Option<bool>,
    run: Option<String>,
    namespace_classifier: Option<String>,
}

impl Config {
    /// Load the configuration of a build root
    ///
    /// `project_config` replaces the `sdistgen.toml` of the build root.
    pub fn load(buildroot: &Path, project_config: Option<&Path>) -> Result<Self> {
        let mut config = Self {
            buildroot: buildroot.to_path_buf(),
            ..Self::default()
        };

        if let Some(user_config) = user_config_path() {
            config.merge_file(&user_config, false)?;
        }
        match project_config {
            Some(path) => config.merge_file(path, true)?,
            None => config.merge_file(&buildroot.join(CONFIG_FILE_NAME), false)?,
        }
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Apply `SDISTGEN_*` overrides read through `lookup`
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(dist_dir) = lookup(ENV_DIST_DIR).filter(|v| !v.is_empty()) {
            self.dist_dir = PathBuf::from(dist_dir);
        }
        if let Some(python) = lookup(ENV_PYTHON).filter(|v| !v.is_empty()) {
            self.python_interpreter = python;
        }
    }

    /// Resolve a possibly relative path against the build root
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.buildroot.join(path)
        }
    }

    pub fn graph_path(&self) -> PathBuf {
        self.resolve(&self.graph)
    }

    pub fn dist_path(&self) -> PathBuf {
        self.resolve(&self.dist_dir)
    }

    fn merge_file(&mut self, path: &Path, required: bool) -> Result<()> {
        if !required && !path.is_file() {
            return Ok(());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let layer: ConfigLayer = toml::from_str(&content)
            .with_context(|| format!("Invalid config {}", path.display()))?;
        debug!("Loaded config from {}", path.display());
        self.merge(layer);
        Ok(())
    }

    fn merge(&mut self, layer: ConfigLayer) {
        let ConfigLayer {
            graph,
            dist_dir,
            python_interpreter,
            recursive,
            run,
            namespace_classifier,
        } = layer;
        if let Some(graph) = graph {
            self.graph = graph;
        }
        if let Some(dist_dir) = dist_dir {
            self.dist_dir = dist_dir;
        }
        if let Some(python_interpreter) = python_interpreter {
            self.python_interpreter = python_interpreter;
        }
        if let Some(recursive) = recursive {
            self.recursive = recursive;
        }
        if run.is_some() {
            self.run = run;
        }
        if namespace_classifier.is_some() {
            self.namespace_classifier = namespace_classifier;
        }
    }
}

fn user_config_path() -> Option<PathBuf> {
    let strategy = etcetera::choose_base_strategy().ok()?;
    Some(strategy.config_dir().join("sdistgen").join(CONFIG_FILE_NAME))
}
