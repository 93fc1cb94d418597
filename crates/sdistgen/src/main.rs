use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use log::{LevelFilter, info};
use sdistgen::{
    address::Address,
    build_graph::BuildGraph,
    config::Config,
    namespace::{AstNamespaceClassifier, NamespaceClassifier, ProcessNamespaceClassifier},
    orchestrator::SetupPy,
    packager::PythonPackager,
};

/// Generate setup.py projects and source distributions for exported Python
/// targets
#[derive(Parser, Debug)]
#[command(name = "sdistgen", version, about, long_about = None)]
struct Cli {
    /// Addresses of the exported targets to package
    #[arg(required = true)]
    targets: Vec<String>,

    /// Build graph manifest, relative to the build root
    #[arg(long)]
    graph: Option<PathBuf>,

    /// Directory sources are resolved against
    #[arg(long, default_value = ".")]
    buildroot: PathBuf,

    /// Output directory for projects and distributions
    #[arg(long)]
    dist_dir: Option<PathBuf>,

    /// Run `setup.py` with these arguments instead of building an sdist,
    /// e.g. "sdist upload"
    #[arg(long)]
    run: Option<String>,

    /// Also create projects for exported dependencies
    #[arg(long)]
    recursive: bool,

    /// Python interpreter used to run setup.py
    #[arg(long)]
    python: Option<String>,

    /// External command identifying namespace packages, given the
    /// `__init__.py` paths as trailing arguments
    #[arg(long)]
    namespace_classifier: Option<String>,

    /// Project config file (defaults to sdistgen.toml in the build root)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Increase verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    fn apply_to(&self, config: &mut Config) {
        if let Some(graph) = &self.graph {
            config.graph.clone_from(graph);
        }
        if let Some(dist_dir) = &self.dist_dir {
            config.dist_dir.clone_from(dist_dir);
        }
        if let Some(python) = &self.python {
            config.python_interpreter.clone_from(python);
        }
        if self.run.is_some() {
            config.run.clone_from(&self.run);
        }
        if self.recursive {
            config.recursive = true;
        }
        if self.namespace_classifier.is_some() {
            config
                .namespace_classifier
                .clone_from(&self.namespace_classifier);
        }
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .format_timestamp(None)
        .format_target(false)
        .parse_default_env()
        .init();
}

fn namespace_classifier(config: &Config) -> Result<Box<dyn NamespaceClassifier>> {
    match &config.namespace_classifier {
        Some(command) => {
            let command = shell_words::split(command)
                .with_context(|| format!("Invalid namespace classifier '{command}'"))?;
            Ok(Box::new(ProcessNamespaceClassifier::new(command)))
        }
        None => Ok(Box::new(AstNamespaceClassifier)),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut config = Config::load(&cli.buildroot, cli.config.as_deref())?;
    cli.apply_to(&mut config);

    let graph = BuildGraph::load(&config.graph_path())?;
    let roots = cli
        .targets
        .iter()
        .map(String::as_str)
        .map(Address::parse)
        .collect::<Result<Vec<_>>>()?;

    let setup_py = SetupPy::new(
        &graph,
        &config,
        Box::new(PythonPackager::new(config.python_interpreter.clone())),
        namespace_classifier(&config)?,
    );
    for (address, dist) in setup_py.execute(&roots)? {
        info!("{address}: {}", dist.display());
    }
    Ok(())
}
