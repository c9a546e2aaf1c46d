//! Validation of a reproduced pipeline against a team's published results.
//!
//! The [`ValidationDriver`] runs the first level until all its outputs exist (retrying a bounded
//! number of times for the subjects still missing files), then the group level, then correlates
//! each hypothesis' unthresholded map with the reference map. A reproduction passes when every
//! coefficient is strictly above the threshold for its subject count.

use log::{info, warn};

use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::config::Configuration;
use crate::correlation::NiftiCorrelation;
use crate::error::{NarpsError, Result};
use crate::pipeline::Pipeline;
use crate::results::ResultsCollection;
use crate::runner::CommandExecutor;
use crate::traits::{MapComparator, PipelineExecutor, ReferenceResults, Stage};
use crate::util::subject_id_from_path;

pub const NB_HYPOTHESES: usize = 9;

/// Positions of the unthresholded maps in the 18 per-hypothesis outputs.
pub const UNTHRESHOLDED_INDICES: [usize; NB_HYPOTHESES] = [1, 3, 5, 7, 9, 11, 13, 15, 17];


/// Minimum correlation expected for a reproduction over `nb_subjects` subjects.
pub fn correlation_threshold(nb_subjects: usize) -> f64 {
    if nb_subjects < 21 {
        0.30
    } else if nb_subjects < 41 {
        0.70
    } else if nb_subjects < 61 {
        0.80
    } else if nb_subjects < 81 {
        0.85
    } else {
        0.93
    }
}

/// Whether there is one value per hypothesis and all are strictly above the threshold.
pub fn passes_thresholds(values: &[f64], nb_subjects: usize) -> bool {
    let threshold = correlation_threshold(nb_subjects);
    values.len() == NB_HYPOTHESES && values.iter().all(|v| *v > threshold)
}

/// Select the unthresholded maps out of the 18 per-hypothesis outputs.
pub fn unthresholded<P: AsRef<Path>>(files: &[P]) -> Result<Vec<PathBuf>> {
    if files.len() != 2 * NB_HYPOTHESES {
        return Err(NarpsError::HypothesisCount(2 * NB_HYPOTHESES, files.len()));
    }
    Ok(UNTHRESHOLDED_INDICES.iter().map(|i| files[*i].as_ref().to_path_buf()).collect())
}

/// Subjects of `subjects` that own at least one of `missing`, in `subjects` order.
/// Paths without a recognisable subject id, or owned by none of `subjects`, make every
/// subject count as missing. The result is never empty while `subjects` is not.
pub fn subjects_with_missing_files(subjects: &[String], missing: &[PathBuf]) -> Vec<String> {
    let mut owners = Vec::new();
    for file in missing {
        match subject_id_from_path(file) {
            Some(id) => owners.push(id),
            None => return subjects.to_vec(),
        }
    }
    let selected: Vec<String> = subjects.iter().filter(|s| owners.contains(s)).cloned().collect();
    if selected.is_empty() {
        subjects.to_vec()
    } else {
        selected
    }
}


#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationState {
    PreprocessRunning,
    WaitingFirstLevel,
    FirstLevelComplete,
    GroupLevelRunning,
    Evaluated,
}


#[derive(Debug, Clone, PartialEq)]
pub struct ValidationReport {
    pub team_id: String,
    pub nb_subjects: usize,
    /// One correlation coefficient per hypothesis.
    pub coefficients: Vec<f64>,
    pub threshold: f64,
    pub passed: bool,
}

impl ValidationReport {
    pub fn new(team_id: &str, nb_subjects: usize, coefficients: Vec<f64>) -> ValidationReport {
        ValidationReport {
            team_id: team_id.to_string(),
            nb_subjects,
            threshold: correlation_threshold(nb_subjects),
            passed: passes_thresholds(&coefficients, nb_subjects),
            coefficients,
        }
    }

    /// Append the report as one line to a log file.
    pub fn append_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "{}", self)?;
        Ok(())
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} | {} subjects | {:?} | {}",
            self.team_id, self.nb_subjects, self.coefficients, self.passed
        )
    }
}


/// Drives a reproduction from first level execution to its evaluation.
pub struct ValidationDriver<E, R, C> {
    pub executor: E,
    pub reference: R,
    pub comparator: C,
    /// Maximum number of first level re-executions.
    pub nb_trials: usize,
    state: ValidationState,
}

impl<E, R, C> ValidationDriver<E, R, C>
where
    E: PipelineExecutor,
    R: ReferenceResults,
    C: MapComparator,
{
    pub fn new(executor: E, reference: R, comparator: C, nb_trials: usize) -> ValidationDriver<E, R, C> {
        ValidationDriver {
            executor,
            reference,
            comparator,
            nb_trials,
            state: ValidationState::PreprocessRunning,
        }
    }

    pub fn state(&self) -> ValidationState {
        self.state
    }

    /// Run the first level until complete, or fail with the files still missing after `nb_trials` retries.
    pub fn complete_first_level(&mut self, subjects: &[String]) -> Result<()> {
        self.state = ValidationState::PreprocessRunning;
        self.executor.run(Stage::FirstLevel, subjects)?;

        self.state = ValidationState::WaitingFirstLevel;
        for trial in 0..self.nb_trials {
            let missing = self.executor.list_missing_first_level_outputs();
            if missing.is_empty() {
                break;
            }
            let retry = subjects_with_missing_files(subjects, &missing);
            warn!(
                "{} first level files missing, retry {}/{} for subjects {:?}",
                missing.len(),
                trial + 1,
                self.nb_trials,
                retry
            );
            self.executor.run(Stage::FirstLevel, &retry)?;
        }

        let missing = self.executor.list_missing_first_level_outputs();
        if !missing.is_empty() {
            return Err(NarpsError::MissingFirstLevelOutputs(missing));
        }
        self.state = ValidationState::FirstLevelComplete;
        Ok(())
    }

    /// Reproduce the pipeline of `team_id` over `subjects` and compare its hypothesis maps
    /// (the 18 files listed by the pipeline) with the reference collection.
    pub fn evaluate<P: AsRef<Path>>(
        &mut self,
        team_id: &str,
        subjects: &[String],
        hypotheses_outputs: &[P],
    ) -> Result<ValidationReport> {
        self.complete_first_level(subjects)?;

        self.state = ValidationState::GroupLevelRunning;
        info!("Team {}: first level complete, running group level", team_id);
        self.executor.run(Stage::GroupLevel, subjects)?;

        self.reference.materialize()?;
        let reproduced = unthresholded(hypotheses_outputs)?;
        let references = unthresholded(&self.reference.local_files())?;
        let coefficients = reproduced
            .iter()
            .zip(references.iter())
            .map(|(r, q)| self.comparator.correlation(r, q))
            .collect::<Result<Vec<f64>>>()?;

        self.state = ValidationState::Evaluated;
        let report = ValidationReport::new(team_id, subjects.len(), coefficients);
        info!("{}", report);
        Ok(report)
    }
}


/// Reproduce and evaluate the pipeline of `team_id` over the first `nb_subjects` participants,
/// with the configured engine and reference collection.
pub fn validate_team(config: &Configuration, team_id: &str, nb_subjects: usize) -> Result<ValidationReport> {
    let executor = CommandExecutor::from_config(config, team_id, nb_subjects)?;
    let subjects = executor.pipeline.subject_list.clone();
    let hypotheses = executor.pipeline.hypotheses_outputs();
    let reference = ResultsCollection::new(config, team_id)?;
    let mut driver = ValidationDriver::new(executor, reference, NiftiCorrelation, config.runner.nb_trials);
    driver.evaluate(team_id, &subjects, &hypotheses)
}


#[cfg(test)]
mod test {
    use super::*;
    use std::cell::RefCell;
    use std::collections::BTreeMap;

    /// Executor whose first level leaves files missing for a number of runs.
    struct FlakyExecutor {
        failures_left: usize,
        calls: Vec<(Stage, Vec<String>)>,
    }

    impl PipelineExecutor for FlakyExecutor {
        fn run(&mut self, stage: Stage, subjects: &[String]) -> Result<()> {
            self.calls.push((stage, subjects.to_vec()));
            if stage == Stage::FirstLevel && self.failures_left > 0 {
                self.failures_left -= 1;
            }
            Ok(())
        }

        fn list_missing_first_level_outputs(&self) -> Vec<PathBuf> {
            if self.failures_left > 0 {
                vec![PathBuf::from("/out/run_level_analysis/_run_id_01_subject_id_002/cope1.nii.gz")]
            } else {
                Vec::new()
            }
        }
    }

    struct StaticReference {
        materialized: bool,
    }

    impl ReferenceResults for StaticReference {
        fn materialize(&mut self) -> Result<()> {
            self.materialized = true;
            Ok(())
        }

        fn local_files(&self) -> Vec<PathBuf> {
            (0..18).map(|i| PathBuf::from(format!("/ref/{}.nii.gz", i))).collect()
        }
    }

    /// Returns a fixed coefficient per reference file and records the pairs it saw.
    struct TableComparator {
        values: BTreeMap<PathBuf, f64>,
        seen: RefCell<Vec<(PathBuf, PathBuf)>>,
    }

    impl MapComparator for TableComparator {
        fn correlation(&self, reproduced: &Path, reference: &Path) -> Result<f64> {
            self.seen.borrow_mut().push((reproduced.to_path_buf(), reference.to_path_buf()));
            Ok(*self.values.get(reference).unwrap_or(&0.9))
        }
    }

    fn driver(failures: usize, nb_trials: usize) -> ValidationDriver<FlakyExecutor, StaticReference, TableComparator> {
        ValidationDriver::new(
            FlakyExecutor { failures_left: failures, calls: Vec::new() },
            StaticReference { materialized: false },
            TableComparator { values: BTreeMap::new(), seen: RefCell::new(Vec::new()) },
            nb_trials,
        )
    }

    fn subjects() -> Vec<String> {
        vec![String::from("001"), String::from("002")]
    }

    fn outputs() -> Vec<PathBuf> {
        (0..18).map(|i| PathBuf::from(format!("/out/{}.nii.gz", i))).collect()
    }

    #[test]
    fn thresholds_follow_subject_brackets() {
        assert_eq!(0.30, correlation_threshold(20));
        assert_eq!(0.70, correlation_threshold(21));
        assert_eq!(0.70, correlation_threshold(40));
        assert_eq!(0.80, correlation_threshold(41));
        assert_eq!(0.85, correlation_threshold(80));
        assert_eq!(0.93, correlation_threshold(81));
        assert_eq!(0.93, correlation_threshold(108));
    }

    #[test]
    fn passing_requires_nine_values_strictly_above() {
        assert!(passes_thresholds(&[0.31; 9], 20));
        assert!(!passes_thresholds(&[0.30; 9], 20));
        assert!(!passes_thresholds(&[0.99; 8], 20));
        let mut values = [0.95; 9];
        values[8] = 0.92;
        assert!(!passes_thresholds(&values, 108));
    }

    #[test]
    fn unthresholded_maps_are_odd_positions() {
        let selected = unthresholded(&outputs()).unwrap();
        assert_eq!(PathBuf::from("/out/1.nii.gz"), selected[0]);
        assert_eq!(PathBuf::from("/out/17.nii.gz"), selected[8]);
        assert!(matches!(unthresholded(&outputs()[..17]), Err(NarpsError::HypothesisCount(18, 17))));
    }

    #[test]
    fn missing_subjects_are_retried_alone() {
        let missing = vec![PathBuf::from("/out/preprocessing/_run_id_02_subject_id_002/components_file.txt")];
        assert_eq!(vec![String::from("002")], subjects_with_missing_files(&subjects(), &missing));
        let unknown = vec![PathBuf::from("/out/somewhere/file.txt")];
        assert_eq!(subjects(), subjects_with_missing_files(&subjects(), &unknown));
    }

    #[test]
    fn files_of_other_subjects_retry_everyone() {
        let missing = vec![PathBuf::from("/out/run_level_analysis/_run_id_01_subject_id_099/results/cope1.nii.gz")];
        assert_eq!(subjects(), subjects_with_missing_files(&subjects(), &missing));
    }

    #[test]
    fn complete_run_is_evaluated() {
        let mut driver = driver(1, 3);
        let report = driver.evaluate("2T6S", &subjects(), &outputs()).unwrap();

        assert_eq!(ValidationState::Evaluated, driver.state());
        assert!(driver.reference.materialized);
        assert!(report.passed);
        assert_eq!(9, report.coefficients.len());
        let calls = &driver.executor.calls;
        assert_eq!((Stage::FirstLevel, subjects()), calls[0]);
        assert_eq!((Stage::GroupLevel, subjects()), *calls.last().unwrap());

        let seen = driver.comparator.seen.borrow();
        assert_eq!((PathBuf::from("/out/3.nii.gz"), PathBuf::from("/ref/3.nii.gz")), seen[1]);
    }

    #[test]
    fn retries_target_missing_subjects() {
        let mut driver = driver(2, 3);
        driver.complete_first_level(&subjects()).unwrap();
        let calls = &driver.executor.calls;
        assert_eq!(2, calls.len());
        assert_eq!(vec![String::from("002")], calls[1].1);
        assert_eq!(ValidationState::FirstLevelComplete, driver.state());
    }

    #[test]
    fn exhausted_retries_are_fatal() {
        let mut driver = driver(10, 2);
        let result = driver.evaluate("2T6S", &subjects(), &outputs());
        match result {
            Err(NarpsError::MissingFirstLevelOutputs(files)) => assert_eq!(1, files.len()),
            other => panic!("unexpected result {:?}", other),
        }
        assert_eq!(ValidationState::WaitingFirstLevel, driver.state());
        assert_eq!(3, driver.executor.calls.len());
        assert!(!driver.reference.materialized);
    }

    #[test]
    fn low_correlation_is_a_reported_failure() {
        let mut driver = driver(0, 3);
        driver.comparator.values.insert(PathBuf::from("/ref/9.nii.gz"), 0.1);
        let report = driver.evaluate("2T6S", &subjects(), &outputs()).unwrap();
        assert!(!report.passed);
        assert_eq!(0.1, report.coefficients[4]);
        assert_eq!("2T6S | 2 subjects | [0.9, 0.9, 0.9, 0.9, 0.1, 0.9, 0.9, 0.9, 0.9] | false", report.to_string());
    }
}
