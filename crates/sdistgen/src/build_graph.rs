//! Build graph of targets
//!
//! Targets are declared in a TOML manifest, one `[[target]]` table each:
//!
//! ```toml
//! [[target]]
//! address = "src/python/foo:foo"
//! kind = "python_library"
//! sources = ["foo/__init__.py", "foo/main.py"]
//! target_base = "src/python"
//! dependencies = [":util", "3rdparty/python:requests"]
//!
//! [target.provides]
//! name = "foo"
//! version = "1.0.0"
//! binaries = { foo = "src/python/foo:bin" }
//! ```
//!
//! `BuildGraph` is the Python implementation of [`ExportGraph`]: Python and
//! resources targets own files, Python targets with `provides` are exported.

use std::{fs, path::Path, str::FromStr};

use anyhow::{Context, Result, anyhow};
use indexmap::{IndexMap, IndexSet};
use log::debug;
use petgraph::{algo::toposort, graph::DiGraph};
use rustc_hash::FxHashMap;
use serde::Deserialize;

use crate::{
    address::Address,
    dependency_calculator::{DependencyCalculator, ExportGraph},
    setup_py::SetupValue,
};

/// Kind of a target, deciding how it takes part in packaging
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    PythonLibrary,
    PythonTests,
    PythonBinary,
    /// Python sources synthesized from another target by code generation
    Codegen,
    Resources,
    PythonRequirementLibrary,
    /// A locally built native distribution; owns sources like any Python
    /// target but is never packaged as a root
    PythonDistribution,
}

impl TargetKind {
    pub fn is_python(self) -> bool {
        matches!(
            self,
            Self::PythonLibrary
                | Self::PythonTests
                | Self::PythonBinary
                | Self::Codegen
                | Self::PythonDistribution
        )
    }

    pub fn is_resources(self) -> bool {
        matches!(self, Self::Resources)
    }

    pub fn is_requirements(self) -> bool {
        matches!(self, Self::PythonRequirementLibrary)
    }
}

/// The distribution a target provides
#[derive(Debug, Clone, PartialEq)]
pub struct PythonArtifact {
    pub name: String,
    pub version: String,
    pub description: Option<String>,
    /// Additional `setup()` keywords, passed through verbatim
    pub keywords: IndexMap<String, SetupValue>,
    /// Console script name to the binary target providing it
    pub binaries: IndexMap<String, Address>,
}

impl PythonArtifact {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            description: None,
            keywords: IndexMap::new(),
            binaries: IndexMap::new(),
        }
    }

    /// The requirement name dependents declare on this artifact
    pub fn key(&self) -> &str {
        &self.name
    }

    pub fn setup_py_keywords(&self) -> IndexMap<String, SetupValue> {
        let mut keywords = self.keywords.clone();
        keywords.insert("name".to_owned(), SetupValue::from(self.name.as_str()));
        keywords.insert(
            "version".to_owned(),
            SetupValue::from(self.version.as_str()),
        );
        if let Some(description) = &self.description {
            keywords.insert(
                "description".to_owned(),
                SetupValue::from(description.as_str()),
            );
        }
        keywords
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Target {
    pub address: Address,
    pub kind: TargetKind,
    pub dependencies: Vec<Address>,
    /// Source files relative to `target_base`
    pub sources: Vec<String>,
    /// Source root the sources are relative to, relative to the build root
    pub target_base: String,
    pub provides: Option<PythonArtifact>,
    /// The original target this one was synthesized from
    pub derived_from: Option<Address>,
    /// Requirement strings of a requirement library
    pub requirements: Vec<String>,
    /// `module:function` entry point of a binary
    pub entry_point: Option<String>,
}

impl Target {
    pub fn new(address: Address, kind: TargetKind) -> Self {
        let target_base = address.spec_path().to_owned();
        Self {
            address,
            kind,
            dependencies: Vec::new(),
            sources: Vec::new(),
            target_base,
            provides: None,
            derived_from: None,
            requirements: Vec::new(),
            entry_point: None,
        }
    }

    #[must_use]
    pub fn with_dependencies(mut self, dependencies: impl IntoIterator<Item = Address>) -> Self {
        self.dependencies.extend(dependencies);
        self
    }

    #[must_use]
    pub fn with_sources<S: Into<String>>(mut self, sources: impl IntoIterator<Item = S>) -> Self {
        self.sources.extend(sources.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn with_target_base(mut self, target_base: impl Into<String>) -> Self {
        self.target_base = target_base.into();
        self
    }

    #[must_use]
    pub fn with_provides(mut self, provides: PythonArtifact) -> Self {
        self.provides = Some(provides);
        self
    }

    #[must_use]
    pub fn with_requirements<S: Into<String>>(
        mut self,
        requirements: impl IntoIterator<Item = S>,
    ) -> Self {
        self.requirements
            .extend(requirements.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn with_entry_point(mut self, entry_point: impl Into<String>) -> Self {
        self.entry_point = Some(entry_point.into());
        self
    }

    #[must_use]
    pub fn derived_from(mut self, original: Address) -> Self {
        self.derived_from = Some(original);
        self
    }

    pub fn is_original(&self) -> bool {
        self.derived_from.is_none()
    }

    /// A Python target providing a distribution
    pub fn has_provides(&self) -> bool {
        self.kind.is_python() && self.provides.is_some()
    }
}

/// Errors raised while assembling a build graph
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    DuplicateAddress { address: String },
    UnknownDependency { target: String, dependency: String },
    InvalidRequirement {
        target: String,
        requirement: String,
        reason: String,
    },
    InvalidKeyword {
        target: String,
        keyword: String,
        reason: String,
    },
    CyclicDependencies,
}

impl std::fmt::Display for GraphError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DuplicateAddress { address } => {
                write!(f, "Target {address} is declared more than once")
            }
            Self::UnknownDependency { target, dependency } => {
                write!(f, "{target} refers to unknown target {dependency}")
            }
            Self::InvalidRequirement {
                target,
                requirement,
                reason,
            } => write!(f, "{target} declares invalid requirement '{requirement}': {reason}"),
            Self::InvalidKeyword {
                target,
                keyword,
                reason,
            } => write!(f, "{target} declares invalid setup keyword '{keyword}': {reason}"),
            Self::CyclicDependencies => write!(f, "Circular dependency between exported targets"),
        }
    }
}

impl std::error::Error for GraphError {}

/// All targets of a build, indexed by address and by spec path
#[derive(Debug, Default)]
pub struct BuildGraph {
    targets: IndexMap<Address, Target>,
    by_spec_path: FxHashMap<String, Vec<Address>>,
    derived_by_original: FxHashMap<Address, Address>,
}

impl BuildGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load and validate a graph manifest
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read build graph {}", path.display()))?;
        Self::from_str(&content)
            .with_context(|| format!("Invalid build graph {}", path.display()))
    }

    pub fn add_target(&mut self, target: Target) -> Result<(), GraphError> {
        if self.targets.contains_key(&target.address) {
            return Err(GraphError::DuplicateAddress {
                address: target.address.to_string(),
            });
        }

        let address = target.address.clone();
        match &target.derived_from {
            Some(original) => {
                self.derived_by_original
                    .insert(original.clone(), address.clone());
            }
            None => self
                .by_spec_path
                .entry(address.spec_path().to_owned())
                .or_default()
                .push(address.clone()),
        }
        self.targets.insert(address, target);
        Ok(())
    }

    /// Check that every referenced address exists and every requirement parses
    pub fn validate(&self) -> Result<(), GraphError> {
        for target in self.targets.values() {
            let binaries = target
                .provides
                .iter()
                .flat_map(|provides| provides.binaries.values());
            let referenced = target
                .dependencies
                .iter()
                .chain(target.derived_from.iter())
                .chain(binaries);
            for dependency in referenced {
                if !self.targets.contains_key(dependency) {
                    return Err(GraphError::UnknownDependency {
                        target: target.address.to_string(),
                        dependency: dependency.to_string(),
                    });
                }
            }

            for requirement in &target.requirements {
                requirement
                    .parse::<pep508_rs::Requirement>()
                    .map_err(|err| GraphError::InvalidRequirement {
                        target: target.address.to_string(),
                        requirement: requirement.clone(),
                        reason: err.to_string(),
                    })?;
            }
        }
        Ok(())
    }

    pub fn get(&self, address: &Address) -> Option<&Target> {
        self.targets.get(address)
    }

    pub fn target(&self, address: &Address) -> Result<&Target> {
        self.get(address)
            .ok_or_else(|| anyhow!("No target found for address {address}"))
    }

    /// The target synthesized from `original` by code generation, if any
    pub fn derived_by_original(&self, original: &Address) -> Option<&Target> {
        self.derived_by_original
            .get(original)
            .and_then(|derived| self.targets.get(derived))
    }

    /// Sort targets so that every target comes after the targets it depends on
    ///
    /// Ordering considers the full transitive dependencies of each target, so
    /// an exported target reached through intermediate libraries still sorts
    /// before its dependents.
    pub fn sort_targets<'a>(
        &self,
        addresses: impl IntoIterator<Item = &'a Address>,
    ) -> Result<Vec<Address>, GraphError> {
        let addresses: IndexSet<&Address> = addresses.into_iter().collect();
        let mut graph = DiGraph::<&Address, ()>::new();
        let nodes: FxHashMap<&Address, _> = addresses
            .iter()
            .map(|address| (*address, graph.add_node(*address)))
            .collect();

        let calculator = DependencyCalculator::new(self);
        for dependent in &addresses {
            let closure = calculator.closure(dependent);
            for dependency in &addresses {
                if dependency != dependent && closure.contains(*dependency) {
                    // Edges point from a dependency to its dependents.
                    graph.add_edge(nodes[dependency], nodes[dependent], ());
                }
            }
        }

        let sorted = toposort(&graph, None).map_err(|_| GraphError::CyclicDependencies)?;
        let sorted: Vec<Address> = sorted.into_iter().map(|n| graph[n].clone()).collect();
        debug!("Sorted {} targets: {sorted:?}", sorted.len());
        Ok(sorted)
    }
}

impl FromStr for BuildGraph {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> Result<Self> {
        let manifest: RawManifest = toml::from_str(content)?;
        let mut graph = Self::new();
        for raw in manifest.targets {
            graph.add_target(raw.into_target()?)?;
        }
        graph.validate()?;
        Ok(graph)
    }
}

impl ExportGraph for BuildGraph {
    type Node = Address;

    fn requires_export(&self, node: &Address) -> bool {
        self.get(node)
            .is_some_and(|target| target.kind.is_python() || target.kind.is_resources())
    }

    fn is_exported(&self, node: &Address) -> bool {
        self.get(node).is_some_and(Target::has_provides)
    }

    fn dependencies(&self, node: &Address) -> Vec<Address> {
        let Some(target) = self.get(node) else {
            return Vec::new();
        };
        let mut dependencies = target.dependencies.clone();
        if let Some(provides) = target.provides.as_ref().filter(|_| target.has_provides()) {
            dependencies.extend(provides.binaries.values().cloned());
        }
        dependencies
    }

    fn is_original(&self, node: &Address) -> bool {
        self.get(node).is_some_and(Target::is_original)
    }

    fn derived_from(&self, node: &Address) -> Address {
        self.get(node)
            .and_then(|target| target.derived_from.clone())
            .unwrap_or_else(|| node.clone())
    }

    fn spec_path(&self, node: &Address) -> String {
        node.spec_path().to_owned()
    }

    fn targets_in_spec_path(&self, spec_path: &str) -> Vec<Address> {
        self.by_spec_path
            .get(spec_path)
            .cloned()
            .unwrap_or_default()
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawManifest {
    #[serde(default, rename = "target")]
    targets: Vec<RawTarget>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawTarget {
    address: String,
    kind: TargetKind,
    #[serde(default)]
    sources: Vec<String>,
    #[serde(default)]
    dependencies: Vec<String>,
    target_base: Option<String>,
    derived_from: Option<String>,
    #[serde(default)]
    requirements: Vec<String>,
    entry_point: Option<String>,
    provides: Option<RawArtifact>,
}

#[derive(Debug, Deserialize)]
struct RawArtifact {
    name: String,
    version: String,
    description: Option<String>,
    #[serde(default)]
    binaries: IndexMap<String, String>,
    #[serde(flatten)]
    keywords: IndexMap<String, toml::Value>,
}

impl RawTarget {
    fn into_target(self) -> Result<Target> {
        let address = Address::parse(&self.address)?;
        let spec_path = address.spec_path().to_owned();
        let parse = |spec: &str| Address::parse_relative(spec, &spec_path);

        let mut target = Target::new(address, self.kind)
            .with_sources(self.sources)
            .with_requirements(self.requirements);
        if let Some(target_base) = self.target_base {
            target = target.with_target_base(target_base);
        }
        for dependency in &self.dependencies {
            target.dependencies.push(parse(dependency)?);
        }
        if let Some(original) = &self.derived_from {
            target.derived_from = Some(parse(original)?);
        }
        target.entry_point = self.entry_point;

        if let Some(raw) = self.provides {
            let mut artifact = PythonArtifact::new(raw.name, raw.version);
            artifact.description = raw.description;
            for (name, binary) in &raw.binaries {
                artifact.binaries.insert(name.clone(), parse(binary)?);
            }
            for (keyword, value) in raw.keywords {
                let value = SetupValue::try_from(value).map_err(|reason| {
                    GraphError::InvalidKeyword {
                        target: target.address.to_string(),
                        keyword: keyword.clone(),
                        reason,
                    }
                })?;
                artifact.keywords.insert(keyword, value);
            }
            target.provides = Some(artifact);
        }
        Ok(target)
    }
}
