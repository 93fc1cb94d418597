//! `setup.py` rendering
//!
//! Keywords handed to `setuptools.setup()` are modeled as [`SetupValue`]
//! literals and rendered as Python source by [`distutils_repr`].

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
};

use indexmap::IndexSet;

use crate::{
    address::Address,
    build_graph::{BuildGraph, Target, TargetKind},
    package_classifier::PackageSet,
};

/// Directory under the staged tree holding the sources
pub const SOURCE_ROOT: &str = "src";

pub const MANIFEST_IN: &str = "include *.py";

const SETUP_BOILERPLATE: &str = "
# DO NOT EDIT THIS FILE -- AUTOGENERATED BY SDISTGEN
# Target: {setup_target}

from setuptools import setup

setup(**{setup_dict})
";

/// A Python literal passed as a `setup()` keyword
#[derive(Debug, Clone, PartialEq)]
pub enum SetupValue {
    Str(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
    List(Vec<SetupValue>),
    /// Rendered with sorted keys
    Dict(BTreeMap<String, SetupValue>),
}

impl From<&str> for SetupValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_owned())
    }
}

impl From<String> for SetupValue {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl<T: Into<SetupValue>> From<Vec<T>> for SetupValue {
    fn from(values: Vec<T>) -> Self {
        Self::List(values.into_iter().map(Into::into).collect())
    }
}

/// Manifest values convert into literals; non-finite floats have no Python
/// literal form and are rejected
impl TryFrom<toml::Value> for SetupValue {
    type Error = String;

    fn try_from(value: toml::Value) -> Result<Self, Self::Error> {
        Ok(match value {
            toml::Value::String(s) => Self::Str(s),
            toml::Value::Integer(i) => Self::Integer(i),
            toml::Value::Float(f) if !f.is_finite() => {
                return Err(format!("{f} has no Python literal form"));
            }
            toml::Value::Float(f) => Self::Float(f),
            toml::Value::Boolean(b) => Self::Bool(b),
            toml::Value::Datetime(dt) => Self::Str(dt.to_string()),
            toml::Value::Array(values) => Self::List(
                values
                    .into_iter()
                    .map(Self::try_from)
                    .collect::<Result<_, _>>()?,
            ),
            toml::Value::Table(table) => Self::Dict(
                table
                    .into_iter()
                    .map(|(key, value)| Ok((key, Self::try_from(value)?)))
                    .collect::<Result<_, String>>()?,
            ),
        })
    }
}

/// Errors raised while creating a `setup.py` project
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetupPyError {
    /// None of the requested targets provides an artifact
    NoExportedTargets,
    /// A target is declared in a way packaging cannot handle
    TargetDefinition { target: String, message: String },
    /// A custom `setup.py` command exited unsuccessfully
    InstallFailed { setup_dir: String },
}

impl fmt::Display for SetupPyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoExportedTargets => {
                write!(f, "setup-py target(s) must provide an artifact.")
            }
            Self::TargetDefinition { target, message } => {
                write!(f, "Invalid target {target}: {message}")
            }
            Self::InstallFailed { setup_dir } => {
                write!(f, "Install failed. (setup.py project left at {setup_dir})")
            }
        }
    }
}

impl std::error::Error for SetupPyError {}

/// Render a value as a Python literal, one element per line
pub fn distutils_repr(value: &SetupValue) -> String {
    let mut output = String::new();
    write_repr(&mut output, value, 0);
    output
}

fn write_repr(output: &mut String, value: &SetupValue, level: usize) {
    let pad = " ".repeat(4 * level);
    let inner = " ".repeat(4 * (level + 1));
    match value {
        SetupValue::Str(s) => write_str_literal(output, s),
        SetupValue::Integer(i) => output.push_str(&i.to_string()),
        SetupValue::Float(f) => output.push_str(&format!("{f:?}")),
        SetupValue::Bool(true) => output.push_str("True"),
        SetupValue::Bool(false) => output.push_str("False"),
        SetupValue::List(items) => {
            output.push_str("[\n");
            for item in items {
                output.push_str(&inner);
                write_repr(output, item, level + 1);
                output.push_str(",\n");
            }
            output.push_str(&pad);
            output.push(']');
        }
        SetupValue::Dict(entries) => {
            output.push_str("{\n");
            for (key, item) in entries {
                output.push_str(&inner);
                write_str_literal(output, key);
                output.push_str(": ");
                write_repr(output, item, level + 1);
                output.push_str(",\n");
            }
            output.push_str(&pad);
            output.push('}');
        }
    }
}

/// Single-quoted literal; control characters are escaped so the literal
/// always fits on one line
fn write_str_literal(output: &mut String, s: &str) {
    output.push('\'');
    for c in s.chars() {
        match c {
            '\\' => output.push_str("\\\\"),
            '\'' => output.push_str("\\'"),
            '\n' => output.push_str("\\n"),
            '\r' => output.push_str("\\r"),
            '\t' => output.push_str("\\t"),
            c => output.push(c),
        }
    }
    output.push('\'');
}

/// Requirement strings of the reduced dependencies, sorted and deduplicated
///
/// Third-party requirement libraries contribute their requirements; exported
/// targets contribute the key of the artifact they provide.
pub fn install_requires(graph: &BuildGraph, reduced: &IndexSet<Address>) -> BTreeSet<String> {
    let mut requires = BTreeSet::new();
    for target in reduced.iter().filter_map(|address| graph.get(address)) {
        if target.kind.is_requirements() {
            requires.extend(target.requirements.iter().cloned());
        } else if let Some(provides) = target.provides.as_ref().filter(|_| target.has_provides()) {
            requires.insert(provides.key().to_owned());
        }
    }
    requires
}

/// The `(name, entry_point)` console scripts of the binaries a target provides
pub fn iter_entry_points(
    graph: &BuildGraph,
    target: &Target,
) -> Result<Vec<(String, String)>, SetupPyError> {
    let Some(provides) = &target.provides else {
        return Ok(Vec::new());
    };

    provides
        .binaries
        .iter()
        .map(|(name, binary)| {
            let entry_point = graph
                .get(binary)
                .filter(|binary| binary.kind == TargetKind::PythonBinary)
                .and_then(|binary| binary.entry_point.clone());
            match entry_point {
                Some(entry_point) => Ok((name.clone(), entry_point)),
                None => Err(SetupPyError::TargetDefinition {
                    target: target.address.to_string(),
                    message: "Cannot add a binary to a PythonArtifact if it does not contain an \
                              entry_point."
                        .to_owned(),
                }),
            }
        })
        .collect()
}

/// Assemble every `setup()` keyword of an exported target
pub fn setup_keywords(
    graph: &BuildGraph,
    target: &Target,
    reduced: &IndexSet<Address>,
    packages: &PackageSet,
) -> Result<BTreeMap<String, SetupValue>, SetupPyError> {
    let mut keywords: BTreeMap<String, SetupValue> = target
        .provides
        .as_ref()
        .map(|provides| provides.setup_py_keywords().into_iter().collect())
        .unwrap_or_default();

    if !packages.namespace_packages.is_empty() {
        keywords.insert(
            "namespace_packages".to_owned(),
            string_list(&packages.namespace_packages),
        );
    }

    if !packages.packages.is_empty() {
        keywords.insert(
            "package_dir".to_owned(),
            SetupValue::Dict(BTreeMap::from([(
                String::new(),
                SetupValue::from(SOURCE_ROOT),
            )])),
        );
        keywords.insert("packages".to_owned(), string_list(&packages.packages));
        keywords.insert(
            "package_data".to_owned(),
            SetupValue::Dict(
                packages
                    .resources
                    .iter()
                    .map(|(package, files)| (package.clone(), string_list(files)))
                    .collect(),
            ),
        );
    }

    keywords.insert(
        "install_requires".to_owned(),
        string_list(&install_requires(graph, reduced)),
    );

    let entry_points = iter_entry_points(graph, target)?;
    if !entry_points.is_empty() {
        let invalid = |message: &str| SetupPyError::TargetDefinition {
            target: target.address.to_string(),
            message: message.to_owned(),
        };
        let SetupValue::Dict(sections) = keywords
            .entry("entry_points".to_owned())
            .or_insert_with(|| SetupValue::Dict(BTreeMap::new()))
        else {
            return Err(invalid("entry_points must be a table"));
        };
        let SetupValue::List(scripts) = sections
            .entry("console_scripts".to_owned())
            .or_insert_with(|| SetupValue::List(Vec::new()))
        else {
            return Err(invalid("entry_points.console_scripts must be a list"));
        };
        scripts.extend(
            entry_points
                .into_iter()
                .map(|(name, entry_point)| SetupValue::Str(format!("{name} = {entry_point}"))),
        );
    }

    Ok(keywords)
}

/// Render the `setup.py` of a target from its keywords
pub fn render_setup_py(target: &Address, keywords: BTreeMap<String, SetupValue>) -> String {
    SETUP_BOILERPLATE
        .replace("{setup_target}", &target.reference())
        .replace("{setup_dict}", &distutils_repr(&SetupValue::Dict(keywords)))
}

fn string_list<'a>(values: impl IntoIterator<Item = &'a String>) -> SetupValue {
    SetupValue::List(values.into_iter().cloned().map(SetupValue::Str).collect())
}
