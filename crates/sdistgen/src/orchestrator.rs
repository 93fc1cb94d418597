//! Creation and building of `setup.py` projects for exported targets
//!
//! Runs in two phases. Creation stages one project per requested exported
//! target (and, when recursive, per exported dependency). Building then walks
//! the created projects in dependency order so that a project is always
//! built, installed or uploaded before the projects depending on it.

use std::{
    collections::VecDeque,
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, anyhow};
use indexmap::{IndexMap, IndexSet};
use log::{debug, info};

use crate::{
    address::Address,
    build_graph::{BuildGraph, Target, TargetKind},
    chroot::Chroot,
    config::Config,
    dependency_calculator::DependencyCalculator,
    namespace::NamespaceClassifier,
    package_classifier::{INIT_PY, find_packages},
    packager::Packager,
    setup_py::{MANIFEST_IN, SOURCE_ROOT, SetupPyError, render_setup_py, setup_keywords},
};

/// Generates `setup.py` projects and distributions for exported targets
#[derive(Debug)]
pub struct SetupPy<'g> {
    graph: &'g BuildGraph,
    buildroot: PathBuf,
    dist_dir: PathBuf,
    run: Option<String>,
    recursive: bool,
    packager: Box<dyn Packager>,
    classifier: Box<dyn NamespaceClassifier>,
}

impl<'g> SetupPy<'g> {
    pub fn new(
        graph: &'g BuildGraph,
        config: &Config,
        packager: Box<dyn Packager>,
        classifier: Box<dyn NamespaceClassifier>,
    ) -> Self {
        Self {
            graph,
            buildroot: config.buildroot.clone(),
            dist_dir: config.dist_path(),
            run: config.run.clone(),
            recursive: config.recursive,
            packager,
            classifier,
        }
    }

    /// Create and build projects for the exported targets among `roots`
    ///
    /// Returns the distribution of every created target: the sdist archive,
    /// or the staged project directory when a custom command was run.
    pub fn execute(&self, roots: &[Address]) -> Result<IndexMap<Address, PathBuf>> {
        let mut exported = Vec::new();
        for root in roots {
            self.graph.target(root)?;
            if self.is_exported_python_target(root) {
                exported.push(root.clone());
            } else {
                debug!("Skipping {root}, it does not provide an artifact");
            }
        }
        if exported.is_empty() {
            return Err(SetupPyError::NoExportedTargets.into());
        }

        let created = self.create(exported)?;
        self.build(&created)
    }

    /// Stage a `setup.py` project for each exported target
    ///
    /// Returns the project directory of every created target, keyed by the
    /// original target address.
    pub fn create(
        &self,
        exported: impl IntoIterator<Item = Address>,
    ) -> Result<IndexMap<Address, PathBuf>> {
        let mut created = IndexMap::new();
        let mut pending: VecDeque<Address> = exported.into_iter().collect();

        while let Some(address) = pending.pop_front() {
            if created.contains_key(&address) {
                continue;
            }
            info!("Creating setup.py project for {address}");
            let original = self.graph.target(&address)?;
            // Code generation may have replaced the target's sources.
            let subject = self
                .graph
                .derived_by_original(&address)
                .filter(|derived| derived.has_provides())
                .unwrap_or(original);

            let (setup_dir, reduced) = self.create_setup_py(subject)?;
            created.insert(address, setup_dir);
            if self.recursive {
                pending.extend(
                    reduced
                        .into_iter()
                        .filter(|dependency| self.is_exported_python_target(dependency)),
                );
            }
        }
        Ok(created)
    }

    fn is_exported_python_target(&self, address: &Address) -> bool {
        self.graph.get(address).is_some_and(|target| {
            target.is_original()
                && target.has_provides()
                && target.kind != TargetKind::PythonDistribution
        })
    }

    fn create_setup_py(&self, target: &Target) -> Result<(PathBuf, IndexSet<Address>)> {
        let provides = target
            .provides
            .as_ref()
            .ok_or_else(|| anyhow!("{} does not provide an artifact", target.address))?;

        let chroot = Chroot::new(&self.dist_dir, &provides.name)?;
        let reduced = DependencyCalculator::new(self.graph).reduced_dependencies(&target.address)?;
        debug!("Reduced dependencies of {}: {reduced:?}", target.address);

        self.write_contents(target, &reduced, &chroot)?;
        self.write_setup(target, &reduced, &chroot)?;

        let setup_dir = self
            .dist_dir
            .join(format!("{}-{}", provides.name, provides.version));
        let setup_dir = chroot.move_to(&setup_dir)?;
        Ok((setup_dir, reduced))
    }

    /// Stage the sources of the target and of the dependencies it owns
    fn write_contents(
        &self,
        root: &Target,
        reduced: &IndexSet<Address>,
        chroot: &Chroot,
    ) -> Result<()> {
        self.write_target(root, chroot)?;
        for address in reduced {
            let dependency = self.graph.target(address)?;
            let owned_sources = (dependency.kind.is_python() && dependency.provides.is_none())
                || dependency.kind.is_resources();
            if owned_sources {
                self.write_target(dependency, chroot)?;
            }
        }
        Ok(())
    }

    fn write_target(&self, target: &Target, chroot: &Chroot) -> Result<()> {
        let subject = self
            .graph
            .derived_by_original(&target.address)
            .unwrap_or(target);
        for source in &subject.sources {
            self.write_target_source(subject, Path::new(source), chroot)?;
        }
        Ok(())
    }

    fn write_target_source(&self, target: &Target, source: &Path, chroot: &Chroot) -> Result<()> {
        let target_base = self.buildroot.join(&target.target_base);
        let staged_root = Path::new(SOURCE_ROOT);
        chroot.copy(&target_base.join(source), staged_root.join(source))?;

        // Parent package markers decide between regular and namespace
        // packages; the source root itself is never a package.
        for parent in source
            .ancestors()
            .skip(1)
            .filter(|parent| !parent.as_os_str().is_empty())
        {
            let init = target_base.join(parent).join(INIT_PY);
            if init.is_file() {
                chroot.copy(&init, staged_root.join(parent).join(INIT_PY))?;
            }
        }
        Ok(())
    }

    /// Write `setup.py` and `MANIFEST.in`; runs after the sources are staged
    fn write_setup(
        &self,
        target: &Target,
        reduced: &IndexSet<Address>,
        chroot: &Chroot,
    ) -> Result<()> {
        let packages = find_packages(
            &target.address,
            &chroot.path().join(SOURCE_ROOT),
            self.classifier.as_ref(),
        )?;
        let keywords = setup_keywords(self.graph, target, reduced, &packages)?;
        chroot.write(render_setup_py(&target.address, keywords), "setup.py")?;
        chroot.write(MANIFEST_IN, "MANIFEST.in")
    }

    /// Build every created project, dependencies first
    pub fn build(&self, created: &IndexMap<Address, PathBuf>) -> Result<IndexMap<Address, PathBuf>> {
        let mut dists = IndexMap::new();
        for address in self.graph.sort_targets(created.keys())? {
            let Some(setup_dir) = created.get(&address) else {
                continue;
            };
            let dist = match &self.run {
                None => self.build_sdist(setup_dir)?,
                Some(run) => self.run_setup_py(run, setup_dir)?,
            };
            dists.insert(address, dist);
        }
        Ok(dists)
    }

    fn build_sdist(&self, setup_dir: &Path) -> Result<PathBuf> {
        info!("Running packager against {}", setup_dir.display());
        let sdist = self.packager.sdist(setup_dir)?;
        let file_name = sdist
            .file_name()
            .ok_or_else(|| anyhow!("Invalid sdist path {}", sdist.display()))?;
        let sdist_path = self.dist_dir.join(file_name);

        info!("Writing {}", sdist_path.display());
        if sdist_path.exists() {
            fs::remove_file(&sdist_path)
                .with_context(|| format!("Failed to remove stale {}", sdist_path.display()))?;
        }
        fs::rename(&sdist, &sdist_path)
            .with_context(|| format!("Failed to move {}", sdist.display()))?;
        fs::remove_dir_all(setup_dir)
            .with_context(|| format!("Failed to remove {}", setup_dir.display()))?;
        Ok(sdist_path)
    }

    fn run_setup_py(&self, run: &str, setup_dir: &Path) -> Result<PathBuf> {
        info!("Running {run} against {}", setup_dir.display());
        let args = shell_words::split(run).with_context(|| format!("Invalid command '{run}'"))?;
        if !self.packager.run_command(setup_dir, &args)? {
            return Err(SetupPyError::InstallFailed {
                setup_dir: setup_dir.display().to_string(),
            }
            .into());
        }
        Ok(setup_dir.to_path_buf())
    }
}
