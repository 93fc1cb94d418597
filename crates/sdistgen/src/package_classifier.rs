//! Package, namespace package and resource detection in a staged tree

use std::{
    collections::{BTreeMap, BTreeSet},
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use indexmap::IndexMap;
use log::{debug, warn};
use walkdir::WalkDir;

use crate::{address::Address, namespace::NamespaceClassifier};

pub const INIT_PY: &str = "__init__.py";

/// Everything `setup()` needs to know about the staged sources
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackageSet {
    pub packages: BTreeSet<String>,
    pub namespace_packages: BTreeSet<String>,
    /// Package to data files, relative to the package directory
    pub resources: BTreeMap<String, BTreeSet<String>>,
}

struct StagedFile {
    /// Dotted directory of the file; `None` for files in the source root
    module: Option<String>,
    file_name: String,
    path: PathBuf,
}

/// Detect packages, namespace packages and resources under `source_root`
pub fn find_packages(
    root: &Address,
    source_root: &Path,
    classifier: &dyn NamespaceClassifier,
) -> Result<PackageSet> {
    let files = staged_files(source_root)?;
    let mut package_set = PackageSet::default();

    let mut inits: IndexMap<PathBuf, String> = IndexMap::new();
    for file in files.iter().filter(|file| file.file_name == INIT_PY) {
        if let Some(module) = &file.module {
            package_set.packages.insert(module.clone());
            inits.insert(file.path.clone(), module.clone());
        }
    }

    let init_paths: Vec<PathBuf> = inits.keys().cloned().collect();
    for init in classifier.filter_namespace_packages(root, &init_paths)? {
        if let Some(module) = inits.get(&init) {
            package_set.namespace_packages.insert(module.clone());
        } else {
            warn!(
                "Namespace classifier reported unknown package marker {}",
                init.display()
            );
        }
    }

    for file in &files {
        let Some(module) = &file.module else {
            warn!(
                "{} is not in a package directory and will not be packaged.",
                file.path.display()
            );
            continue;
        };
        if file.file_name.ends_with(".py") {
            if !package_set.packages.contains(module) {
                warn!(
                    "{} is source but does not belong to a package.",
                    file.path.display()
                );
            }
            continue;
        }

        let package = nearest_subpackage(module, &package_set.packages);
        let resource = match module.strip_prefix(&package).and_then(|r| r.strip_prefix('.')) {
            Some(relative_module) => format!(
                "{}/{}",
                relative_module.replace('.', "/"),
                file.file_name
            ),
            None => file.file_name.clone(),
        };
        package_set
            .resources
            .entry(package)
            .or_default()
            .insert(resource);
    }

    debug!(
        "Found {} packages ({} namespace) for {root}",
        package_set.packages.len(),
        package_set.namespace_packages.len()
    );
    Ok(package_set)
}

fn staged_files(source_root: &Path) -> Result<Vec<StagedFile>> {
    if !source_root.is_dir() {
        return Ok(Vec::new());
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(source_root).sort_by_file_name() {
        let entry =
            entry.with_context(|| format!("Failed to walk {}", source_root.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let relative = path.strip_prefix(source_root).with_context(|| {
            format!("{} is outside {}", path.display(), source_root.display())
        })?;
        let module = relative.parent().and_then(|parent| {
            let components: Vec<_> = parent
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect();
            (!components.is_empty()).then(|| components.join("."))
        });
        files.push(StagedFile {
            module,
            file_name: entry.file_name().to_string_lossy().into_owned(),
            path: path.to_path_buf(),
        });
    }
    Ok(files)
}

/// The package in `all_packages` sharing the longest dotted prefix with
/// `package`, or `package` itself when none shares a prefix
pub fn nearest_subpackage(package: &str, all_packages: &BTreeSet<String>) -> String {
    fn shared_prefix<'a>(package: &'a str, candidate: &str) -> Vec<&'a str> {
        package
            .split('.')
            .zip(candidate.split('.'))
            .take_while(|(left, right)| left == right)
            .map(|(left, _)| left)
            .collect()
    }

    all_packages
        .iter()
        .map(|candidate| shared_prefix(package, candidate))
        .filter(|prefix| !prefix.is_empty())
        .reduce(|best, prefix| if prefix.len() > best.len() { prefix } else { best })
        .map_or_else(|| package.to_owned(), |prefix| prefix.join("."))
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::namespace::AstNamespaceClassifier;

    fn stage(root: &Path, files: &[(&str, &str)]) {
        for (path, content) in files {
            let path = root.join(path);
            fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
            fs::write(path, content).expect("write");
        }
    }

    fn packages(values: &[&str]) -> BTreeSet<String> {
        values.iter().map(|v| (*v).to_owned()).collect()
    }

    #[test]
    fn test_nearest_subpackage() {
        let all = packages(&["a", "a.b", "x.y"]);
        assert_eq!(nearest_subpackage("a.b.c", &all), "a.b");
        assert_eq!(nearest_subpackage("a.b", &all), "a.b");
        assert_eq!(nearest_subpackage("x.z", &all), "x");
        assert_eq!(nearest_subpackage("q", &all), "q");
    }

    #[test]
    fn test_find_packages_and_resources() {
        let dir = tempfile::tempdir().expect("tempdir");
        stage(
            dir.path(),
            &[
                ("a/__init__.py", "__import__('pkg_resources').declare_namespace(__name__)\n"),
                ("a/b/__init__.py", ""),
                ("a/b/mod.py", "x = 1\n"),
                ("a/b/schema.json", "{}"),
                ("a/b/c/data.txt", "data"),
                ("loose/orphan.py", ""),
                ("top.txt", ""),
            ],
        );

        let root = Address::parse("a:a").expect("valid address");
        let found = find_packages(&root, dir.path(), &AstNamespaceClassifier).expect("found");

        assert_eq!(found.packages, packages(&["a", "a.b"]));
        assert_eq!(found.namespace_packages, packages(&["a"]));
        assert_eq!(
            found.resources,
            BTreeMap::from([(
                "a.b".to_owned(),
                packages(&["c/data.txt", "schema.json"])
            )])
        );
    }

    #[test]
    fn test_missing_source_root_is_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = Address::parse("a:a").expect("valid address");
        let found = find_packages(&root, &dir.path().join("src"), &AstNamespaceClassifier)
            .expect("found");
        assert_eq!(found, PackageSet::default());
    }
}
