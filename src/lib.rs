//! Building blocks for reproducing the analysis pipelines of the NARPS study.
//!
//! Parses task event files and participants tables, builds group level design regressors,
//! describes each team's pipeline as workflows for an external engine, and validates
//! reproduced statistical maps against published ones by spatial correlation.

pub mod config;
pub mod contrasts;
pub mod correlation;
pub mod error;
pub mod events;
pub mod nifti;
pub mod participants;
pub mod pipeline;
pub mod regressors;
pub mod results;
pub mod runner;
pub mod teams;
pub mod traits;
pub mod util;
pub mod validation;
pub mod workflow;

pub use config::Configuration;
pub use contrasts::{group_level_contrasts, Contrast};
pub use correlation::{correlation_coefficient, masked_correlation, NiftiCorrelation};
pub use error::{NarpsError, Result};
pub use events::{read_events, ConditionBunch, EventRecord, SessionModel};
pub use nifti::{read_nifti, NiftiHeader, NiftiVolume};
pub use participants::{list_participants, read_participants, GroupAssignment, Group};
pub use pipeline::{pipeline_for, Pipeline, PipelineDirectories, TeamPipeline};
pub use regressors::{build_regressors, build_regressors_by_name, DesignMethod, RegressorSet};
pub use results::ResultsCollection;
pub use runner::{select_subjects, CommandExecutor};
pub use traits::{MapComparator, PipelineExecutor, ReferenceResults, Stage};
pub use validation::{correlation_threshold, passes_thresholds, validate_team, ValidationDriver, ValidationReport};
pub use workflow::{Node, Workflow};
