//! Namespace package detection
//!
//! A package is a namespace package when its `__init__.py` declares itself
//! with `pkg_resources.declare_namespace(__name__)`.

use std::{
    fmt, fs,
    path::{Path, PathBuf},
    process::Command,
};

use anyhow::{Context, Result};
use log::{debug, warn};
use ruff_python_ast::{
    Expr, ExprCall,
    visitor::{Visitor, walk_expr},
};
use ruff_python_parser::parse_module;

use crate::address::Address;

/// Errors raised while classifying package markers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassifierError {
    /// A package marker is not valid Python
    Parse { path: PathBuf, message: String },
    /// The external classifier exited unsuccessfully
    ProcessFailed {
        target: String,
        code: Option<i32>,
        stderr: String,
    },
}

impl fmt::Display for ClassifierError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parse { path, message } => {
                write!(f, "Failed to parse {}: {message}", path.display())
            }
            Self::ProcessFailed {
                target,
                code,
                stderr,
            } => {
                let code = code.map_or_else(|| "signal".to_owned(), |code| code.to_string());
                write!(
                    f,
                    "Failed to identify namespace packages for {target} (exit {code}):\n{stderr}"
                )
            }
        }
    }
}

impl std::error::Error for ClassifierError {}

/// Decides which package markers declare namespace packages
pub trait NamespaceClassifier: fmt::Debug {
    /// Return the subset of `inits` declaring namespace packages
    fn filter_namespace_packages(&self, root: &Address, inits: &[PathBuf])
    -> Result<Vec<PathBuf>>;
}

/// Classifies markers in-process by walking their syntax tree
#[derive(Debug, Default, Clone, Copy)]
pub struct AstNamespaceClassifier;

impl NamespaceClassifier for AstNamespaceClassifier {
    fn filter_namespace_packages(
        &self,
        _root: &Address,
        inits: &[PathBuf],
    ) -> Result<Vec<PathBuf>> {
        let mut namespace_inits = Vec::new();
        for init in inits {
            if declares_namespace_file(init)? {
                namespace_inits.push(init.clone());
            }
        }
        Ok(namespace_inits)
    }
}

/// Classifies markers with one external command invocation per target
///
/// The command receives every marker path as a trailing argument and prints
/// the declaring ones, one per line.
#[derive(Debug, Clone)]
pub struct ProcessNamespaceClassifier {
    command: Vec<String>,
}

impl ProcessNamespaceClassifier {
    pub fn new(command: Vec<String>) -> Self {
        Self { command }
    }
}

impl NamespaceClassifier for ProcessNamespaceClassifier {
    fn filter_namespace_packages(
        &self,
        root: &Address,
        inits: &[PathBuf],
    ) -> Result<Vec<PathBuf>> {
        if inits.is_empty() {
            return Ok(Vec::new());
        }
        let Some((program, args)) = self.command.split_first() else {
            anyhow::bail!("Namespace classifier command is empty");
        };

        let output = Command::new(program)
            .args(args)
            .args(inits)
            .output()
            .with_context(|| format!("Failed to run namespace classifier {program}"))?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        debug!("Namespace classifier stdout for {root}:\n{stdout}");
        if !stderr.trim().is_empty() {
            warn!("Namespace classifier stderr for {root}:\n{stderr}");
        }

        if !output.status.success() {
            return Err(ClassifierError::ProcessFailed {
                target: root.to_string(),
                code: output.status.code(),
                stderr: stderr.into_owned(),
            }
            .into());
        }

        Ok(stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(PathBuf::from)
            .collect())
    }
}

fn declares_namespace_file(path: &Path) -> Result<bool> {
    let source = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(declares_namespace_package(&source).map_err(|message| ClassifierError::Parse {
        path: path.to_path_buf(),
        message,
    })?)
}

/// Whether Python source declares a namespace package
pub fn declares_namespace_package(source: &str) -> Result<bool, String> {
    let parsed = parse_module(source).map_err(|err| err.to_string())?;
    let mut finder = DeclareNamespaceFinder::default();
    finder.visit_body(&parsed.syntax().body);
    Ok(finder.found)
}

/// Finds `declare_namespace(__name__)` calls anywhere in a module
#[derive(Debug, Default)]
struct DeclareNamespaceFinder {
    found: bool,
}

impl<'a> Visitor<'a> for DeclareNamespaceFinder {
    fn visit_expr(&mut self, expr: &'a Expr) {
        if self.found {
            return;
        }
        if let Expr::Call(call) = expr
            && is_declare_namespace_call(call)
        {
            self.found = true;
            return;
        }
        walk_expr(self, expr);
    }
}

fn is_declare_namespace_call(call: &ExprCall) -> bool {
    let [argument] = &*call.arguments.args else {
        return false;
    };
    // Callees other than names and attributes are not filtered by name.
    let callee_matches = match call.func.as_ref() {
        Expr::Name(name) => name.id.as_str() == "declare_namespace",
        Expr::Attribute(attribute) => attribute.attr.as_str() == "declare_namespace",
        _ => true,
    };
    callee_matches && matches!(argument, Expr::Name(name) if name.id.as_str() == "__name__")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pkg_resources_declaration() {
        let source = "__import__('pkg_resources').declare_namespace(__name__)\n";
        assert_eq!(declares_namespace_package(source), Ok(true));
    }

    #[test]
    fn test_guarded_declaration() {
        let source = "\
try:
    import pkg_resources
    pkg_resources.declare_namespace(__name__)
except ImportError:
    pass
";
        assert_eq!(declares_namespace_package(source), Ok(true));
    }

    #[test]
    fn test_pkgutil_style_is_not_namespace() {
        let source = "__path__ = __import__('pkgutil').extend_path(__path__, __name__)\n";
        assert_eq!(declares_namespace_package(source), Ok(false));
    }

    #[test]
    fn test_other_calls_are_ignored() {
        let source = "import logging\nlog = logging.getLogger(__name__)\nprint('x')\n";
        assert_eq!(declares_namespace_package(source), Ok(false));
    }

    #[test]
    fn test_parse_error() {
        assert!(declares_namespace_package("def broken(:\n").is_err());
    }

    #[test]
    fn test_ast_classifier_filters_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let namespace = dir.path().join("ns_init.py");
        let regular = dir.path().join("init.py");
        fs::write(
            &namespace,
            "__import__('pkg_resources').declare_namespace(__name__)\n",
        )
        .expect("write");
        fs::write(&regular, "").expect("write");

        let root = Address::parse("a:a").expect("valid address");
        let filtered = AstNamespaceClassifier
            .filter_namespace_packages(&root, &[namespace.clone(), regular])
            .expect("classified");
        assert_eq!(filtered, vec![namespace]);
    }

    #[cfg(unix)]
    #[test]
    fn test_process_classifier_failure() {
        let classifier = ProcessNamespaceClassifier::new(vec![
            "sh".to_owned(),
            "-c".to_owned(),
            "echo boom >&2; exit 3".to_owned(),
            "classifier".to_owned(),
        ]);
        let root = Address::parse("a:a").expect("valid address");
        let err = classifier
            .filter_namespace_packages(&root, &[PathBuf::from("a/__init__.py")])
            .expect_err("classifier fails");
        assert_eq!(
            err.downcast_ref::<ClassifierError>(),
            Some(&ClassifierError::ProcessFailed {
                target: "a:a".to_owned(),
                code: Some(3),
                stderr: "boom\n".to_owned(),
            })
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_process_classifier_reads_stdout_lines() {
        let classifier = ProcessNamespaceClassifier::new(vec![
            "sh".to_owned(),
            "-c".to_owned(),
            "echo \"$1\"".to_owned(),
            "classifier".to_owned(),
        ]);
        let root = Address::parse("a:a").expect("valid address");
        let filtered = classifier
            .filter_namespace_packages(
                &root,
                &[PathBuf::from("a/__init__.py"), PathBuf::from("b/__init__.py")],
            )
            .expect("classified");
        assert_eq!(filtered, vec![PathBuf::from("a/__init__.py")]);
    }
}
