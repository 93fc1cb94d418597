//! Target addresses
//!
//! An address names a target by the directory holding its BUILD family (the
//! spec path) and a target name, rendered as `spec/path:name`.

use std::fmt;

use anyhow::{Result, bail};

/// Address of a target in the build graph
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address {
    spec_path: String,
    target_name: String,
}

impl Address {
    pub fn new(spec_path: impl Into<String>, target_name: impl Into<String>) -> Self {
        Self {
            spec_path: spec_path.into(),
            target_name: target_name.into(),
        }
    }

    /// Parse an absolute address spec
    ///
    /// Accepts `path/to:name`, `//path/to:name`, `//:name` and `path/to`, the
    /// latter naming the target after the last path component.
    pub fn parse(spec: &str) -> Result<Self> {
        Self::parse_relative(spec, "")
    }

    /// Parse an address spec, resolving `:name` against `relative_to`
    pub fn parse_relative(spec: &str, relative_to: &str) -> Result<Self> {
        let trimmed = spec.trim();
        if trimmed.is_empty() {
            bail!("Empty address spec");
        }

        let (path, name) = match trimmed.rsplit_once(':') {
            Some(("", name)) => (relative_to, name),
            Some((path, name)) => (path, name),
            None => {
                let path = trimmed.trim_start_matches("//").trim_end_matches('/');
                let name = path.rsplit('/').next().unwrap_or(path);
                (path, name)
            }
        };

        let spec_path = normalize_spec_path(path)
            .map_err(|reason| anyhow::anyhow!("Invalid address '{spec}': {reason}"))?;
        if name.is_empty() || name.contains('/') {
            bail!("Invalid address '{spec}': bad target name '{name}'");
        }

        Ok(Self::new(spec_path, name))
    }

    /// Directory of the BUILD family this target belongs to
    pub fn spec_path(&self) -> &str {
        &self.spec_path
    }

    pub fn target_name(&self) -> &str {
        &self.target_name
    }

    /// Render the address the way users spell it on the command line
    pub fn reference(&self) -> String {
        if self.spec_path.is_empty() {
            format!("//:{}", self.target_name)
        } else {
            format!("{}:{}", self.spec_path, self.target_name)
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.reference())
    }
}

fn normalize_spec_path(path: &str) -> std::result::Result<String, String> {
    let path = path.trim_start_matches("//").trim_end_matches('/');
    if path.starts_with('/') {
        return Err("spec paths are relative to the build root".to_owned());
    }
    for component in path.split('/').filter(|c| !c.is_empty()) {
        if component == "." || component == ".." {
            return Err(format!("'{component}' is not allowed in a spec path"));
        }
    }
    Ok(path
        .split('/')
        .filter(|c| !c.is_empty())
        .collect::<Vec<_>>()
        .join("/"))
}
