//! Interfaces to the external collaborators of the validation driver.

use std::path::{Path, PathBuf};

use crate::error::Result;


/// Which part of a pipeline an execution covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Preprocessing, run level and subject level analyses.
    FirstLevel,
    GroupLevel,
    Both,
}

impl Stage {
    pub fn includes_first_level(&self) -> bool {
        matches!(self, Stage::FirstLevel | Stage::Both)
    }

    pub fn includes_group_level(&self) -> bool {
        matches!(self, Stage::GroupLevel | Stage::Both)
    }
}


/// Runs pipeline stages through an external workflow engine. Calls block until the engine is done.
pub trait PipelineExecutor {
    fn run(&mut self, stage: Stage, subjects: &[String]) -> Result<()>;

    /// First level output files that do not exist yet.
    fn list_missing_first_level_outputs(&self) -> Vec<PathBuf>;
}


/// A collection of reference result maps for one team.
pub trait ReferenceResults {
    /// Make the files available on disk, downloading them if needed.
    fn materialize(&mut self) -> Result<()>;

    /// Local paths of the collection's files, in collection order.
    fn local_files(&self) -> Vec<PathBuf>;
}


/// Computes the spatial correlation between two statistical maps.
pub trait MapComparator {
    fn correlation(&self, reproduced: &Path, reference: &Path) -> Result<f64>;
}
