use std::{
    cell::RefCell,
    fs,
    path::{Path, PathBuf},
    rc::Rc,
};

use anyhow::Result;
use pretty_assertions::assert_eq;
use sdistgen::{
    address::Address,
    build_graph::BuildGraph,
    config::Config,
    namespace::AstNamespaceClassifier,
    orchestrator::SetupPy,
    packager::Packager,
    setup_py::SetupPyError,
};
use tempfile::TempDir;

/// Records the projects it is asked to build, in order
#[derive(Debug, Clone)]
struct RecordingPackager {
    calls: Rc<RefCell<Vec<String>>>,
    succeed: bool,
}

impl RecordingPackager {
    fn new(succeed: bool) -> Self {
        Self {
            calls: Rc::default(),
            succeed,
        }
    }

    fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    fn record(&self, setup_dir: &Path) -> String {
        let name = setup_dir
            .file_name()
            .expect("setup dir name")
            .to_string_lossy()
            .into_owned();
        self.calls.borrow_mut().push(name.clone());
        name
    }
}

impl Packager for RecordingPackager {
    fn sdist(&self, setup_dir: &Path) -> Result<PathBuf> {
        let name = self.record(setup_dir);
        let dist = setup_dir.join("dist");
        fs::create_dir_all(&dist)?;
        let sdist = dist.join(format!("{name}.tar.gz"));
        fs::write(&sdist, "archive")?;
        Ok(sdist)
    }

    fn run_command(&self, setup_dir: &Path, _args: &[String]) -> Result<bool> {
        self.record(setup_dir);
        Ok(self.succeed)
    }
}

struct Workspace {
    root: TempDir,
}

impl Workspace {
    fn new(files: &[(&str, &str)]) -> Self {
        let root = tempfile::tempdir().expect("tempdir");
        for (path, content) in files {
            let path = root.path().join(path);
            fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
            fs::write(path, content).expect("write");
        }
        Self { root }
    }

    fn path(&self) -> &Path {
        self.root.path()
    }

    fn config(&self) -> Config {
        Config {
            buildroot: self.path().to_path_buf(),
            ..Config::default()
        }
    }

    fn dist(&self) -> PathBuf {
        self.path().join("dist")
    }
}

fn address(spec: &str) -> Address {
    Address::parse(spec).expect("valid address")
}

const PROJECT_GRAPH: &str = r#"
[[target]]
address = "src/python/proj:x"
kind = "python_library"
target_base = "src/python"
sources = ["proj/x/__init__.py", "proj/x/app.py"]
dependencies = [":y", "3rdparty/python:z"]

[target.provides]
name = "x"
version = "1.0"

[[target]]
address = "src/python/proj:y"
kind = "python_library"
target_base = "src/python"
sources = ["proj/y/__init__.py", "proj/y/data.json"]

[[target]]
address = "3rdparty/python:z"
kind = "python_requirement_library"
requirements = ["Z==1.0"]
"#;

fn project_workspace() -> Workspace {
    Workspace::new(&[
        ("src/python/proj/__init__.py", ""),
        ("src/python/proj/x/__init__.py", ""),
        ("src/python/proj/x/app.py", "import proj.y\n"),
        ("src/python/proj/y/__init__.py", ""),
        ("src/python/proj/y/data.json", "{}"),
    ])
}

#[test]
fn test_create_stages_owned_sources_and_setup_py() {
    let workspace = project_workspace();
    let graph: BuildGraph = PROJECT_GRAPH.parse().expect("valid graph");
    let setup_py = SetupPy::new(
        &graph,
        &workspace.config(),
        Box::new(RecordingPackager::new(true)),
        Box::new(AstNamespaceClassifier),
    );

    let created = setup_py
        .create([address("src/python/proj:x")])
        .expect("created");
    let setup_dir = workspace.dist().join("x-1.0");
    assert_eq!(
        created.into_iter().collect::<Vec<_>>(),
        vec![(address("src/python/proj:x"), setup_dir.clone())]
    );

    for staged in [
        "src/proj/__init__.py",
        "src/proj/x/__init__.py",
        "src/proj/x/app.py",
        "src/proj/y/__init__.py",
        "src/proj/y/data.json",
    ] {
        assert!(setup_dir.join(staged).is_file(), "{staged} is staged");
    }
    assert_eq!(
        fs::read_to_string(setup_dir.join("MANIFEST.in")).expect("manifest"),
        "include *.py"
    );
    assert_eq!(
        fs::read_to_string(setup_dir.join("setup.py")).expect("setup.py"),
        r"
# DO NOT EDIT THIS FILE -- AUTOGENERATED BY SDISTGEN
# Target: src/python/proj:x

from setuptools import setup

setup(**{
    'install_requires': [
        'Z==1.0',
    ],
    'name': 'x',
    'package_data': {
        'proj.y': [
            'data.json',
        ],
    },
    'package_dir': {
        '': 'src',
    },
    'packages': [
        'proj',
        'proj.x',
        'proj.y',
    ],
    'version': '1.0',
})
"
    );
}

#[test]
fn test_execute_moves_sdist_into_dist_dir() {
    let workspace = project_workspace();
    let graph: BuildGraph = PROJECT_GRAPH.parse().expect("valid graph");
    let packager = RecordingPackager::new(true);
    let setup_py = SetupPy::new(
        &graph,
        &workspace.config(),
        Box::new(packager.clone()),
        Box::new(AstNamespaceClassifier),
    );

    let dists = setup_py
        .execute(&[address("src/python/proj:x")])
        .expect("built");

    let sdist = workspace.dist().join("x-1.0.tar.gz");
    assert_eq!(dists.get(&address("src/python/proj:x")), Some(&sdist));
    assert!(sdist.is_file());
    assert!(!workspace.dist().join("x-1.0").exists());
    assert_eq!(packager.calls(), vec!["x-1.0"]);
}

const LAYERED_GRAPH: &str = r#"
[[target]]
address = "app:app"
kind = "python_library"
sources = ["app/__init__.py"]
target_base = ""
dependencies = [":glue"]

[target.provides]
name = "app"
version = "2.0"

[[target]]
address = "app:glue"
kind = "python_library"
sources = ["app/glue.py"]
target_base = ""
dependencies = ["core:core"]

[[target]]
address = "core:core"
kind = "python_library"
sources = ["core/__init__.py"]
target_base = ""

[target.provides]
name = "core"
version = "1.0"
"#;

fn layered_workspace() -> Workspace {
    Workspace::new(&[
        ("app/__init__.py", ""),
        ("app/glue.py", "import core\n"),
        ("core/__init__.py", ""),
    ])
}

#[test]
fn test_recursive_build_runs_dependencies_first() {
    let workspace = layered_workspace();
    let graph: BuildGraph = LAYERED_GRAPH.parse().expect("valid graph");
    let config = Config {
        recursive: true,
        ..workspace.config()
    };
    let packager = RecordingPackager::new(true);
    let setup_py = SetupPy::new(
        &graph,
        &config,
        Box::new(packager.clone()),
        Box::new(AstNamespaceClassifier),
    );

    let dists = setup_py.execute(&[address("app:app")]).expect("built");

    assert_eq!(packager.calls(), vec!["core-1.0", "app-2.0"]);
    assert_eq!(
        dists.keys().cloned().collect::<Vec<_>>(),
        vec![address("core:core"), address("app:app")]
    );
}

#[test]
fn test_exported_dependency_becomes_requirement() {
    let workspace = layered_workspace();
    let graph: BuildGraph = LAYERED_GRAPH.parse().expect("valid graph");
    let setup_py = SetupPy::new(
        &graph,
        &workspace.config(),
        Box::new(RecordingPackager::new(true)),
        Box::new(AstNamespaceClassifier),
    );

    let created = setup_py.create([address("app:app")]).expect("created");
    assert_eq!(created.len(), 1, "non-recursive creation");

    let setup_dir = workspace.dist().join("app-2.0");
    let setup = fs::read_to_string(setup_dir.join("setup.py")).expect("setup.py");
    assert!(setup.contains("    'install_requires': [\n        'core',\n    ],\n"));
    assert!(setup_dir.join("src/app/glue.py").is_file());
    assert!(!setup_dir.join("src/core").exists());
}

#[test]
fn test_failed_run_leaves_project_in_place() {
    let workspace = layered_workspace();
    let graph: BuildGraph = LAYERED_GRAPH.parse().expect("valid graph");
    let config = Config {
        run: Some("install --user".to_owned()),
        ..workspace.config()
    };
    let setup_py = SetupPy::new(
        &graph,
        &config,
        Box::new(RecordingPackager::new(false)),
        Box::new(AstNamespaceClassifier),
    );

    let err = setup_py
        .execute(&[address("core:core")])
        .expect_err("install fails");
    assert!(matches!(
        err.downcast_ref::<SetupPyError>(),
        Some(SetupPyError::InstallFailed { .. })
    ));
    assert!(err.to_string().starts_with("Install failed."));
    assert!(workspace.dist().join("core-1.0/setup.py").is_file());
}

#[test]
fn test_targets_without_artifacts_are_rejected() {
    let workspace = layered_workspace();
    let graph: BuildGraph = LAYERED_GRAPH.parse().expect("valid graph");
    let setup_py = SetupPy::new(
        &graph,
        &workspace.config(),
        Box::new(RecordingPackager::new(true)),
        Box::new(AstNamespaceClassifier),
    );

    let err = setup_py
        .execute(&[address("app:glue")])
        .expect_err("nothing to package");
    assert_eq!(
        err.downcast_ref::<SetupPyError>(),
        Some(&SetupPyError::NoExportedTargets)
    );
    assert_eq!(
        err.to_string(),
        "setup-py target(s) must provide an artifact."
    );
}

const CODEGEN_GRAPH: &str = r#"
[[target]]
address = "gen:x"
kind = "python_library"
target_base = ""
sources = ["gen/__init__.py"]
dependencies = [":idl"]

[target.provides]
name = "x"
version = "1.0"

[[target]]
address = "gen:idl"
kind = "python_library"
target_base = ""
sources = ["gen/idl/service.thrift"]

[[target]]
address = "gen:idl-py"
kind = "codegen"
target_base = ".codegen"
derived_from = ":idl"
sources = ["gen/idl/__init__.py", "gen/idl/service.py"]

[[target]]
address = "api:api"
kind = "python_library"
target_base = ""
sources = ["api/api.thrift"]

[target.provides]
name = "api"
version = "1.0"

[[target]]
address = "api:api-py"
kind = "codegen"
target_base = ".codegen"
derived_from = ":api"
sources = ["api/__init__.py", "api/client.py"]

[target.provides]
name = "api"
version = "1.0"
"#;

fn codegen_workspace() -> Workspace {
    Workspace::new(&[
        ("gen/__init__.py", ""),
        ("gen/idl/service.thrift", "service Echo {}"),
        (".codegen/gen/idl/__init__.py", ""),
        (".codegen/gen/idl/service.py", "class Echo: ...\n"),
        ("api/api.thrift", "service Api {}"),
        (".codegen/api/__init__.py", ""),
        (".codegen/api/client.py", "class Client: ...\n"),
    ])
}

#[test]
fn test_owned_dependency_stages_generated_sources() {
    let workspace = codegen_workspace();
    let graph: BuildGraph = CODEGEN_GRAPH.parse().expect("valid graph");
    let setup_py = SetupPy::new(
        &graph,
        &workspace.config(),
        Box::new(RecordingPackager::new(true)),
        Box::new(AstNamespaceClassifier),
    );

    setup_py.create([address("gen:x")]).expect("created");

    let src = workspace.dist().join("x-1.0/src");
    assert!(src.join("gen/__init__.py").is_file());
    assert!(src.join("gen/idl/__init__.py").is_file());
    assert!(src.join("gen/idl/service.py").is_file());
    assert!(!src.join("gen/idl/service.thrift").exists());
}

#[test]
fn test_exported_root_is_replaced_by_generated_target() {
    let workspace = codegen_workspace();
    let graph: BuildGraph = CODEGEN_GRAPH.parse().expect("valid graph");
    let setup_py = SetupPy::new(
        &graph,
        &workspace.config(),
        Box::new(RecordingPackager::new(true)),
        Box::new(AstNamespaceClassifier),
    );

    let created = setup_py.create([address("api:api")]).expect("created");

    let setup_dir = workspace.dist().join("api-1.0");
    assert_eq!(
        created.into_iter().collect::<Vec<_>>(),
        vec![(address("api:api"), setup_dir.clone())]
    );
    assert!(setup_dir.join("src/api/client.py").is_file());
    assert!(!setup_dir.join("src/api/api.thrift").exists());

    let setup = fs::read_to_string(setup_dir.join("setup.py")).expect("setup.py");
    assert!(setup.contains("# Target: api:api-py\n"));
    assert!(setup.contains("    'packages': [\n        'api',\n    ],\n"));
}
