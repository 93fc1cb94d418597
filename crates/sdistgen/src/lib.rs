//! sdistgen: derives `setup.py` projects and source distributions from the
//! exported targets of a build graph.
//!
//! The pipeline runs in one direction:
//! build graph → reduced dependency set → staged chroot → package metadata →
//! packaging tool.

pub mod address;
pub mod ancestry;
pub mod build_graph;
pub mod chroot;
pub mod config;
pub mod dependency_calculator;
pub mod namespace;
pub mod orchestrator;
pub mod package_classifier;
pub mod packager;
pub mod setup_py;
