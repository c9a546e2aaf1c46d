use approx::assert_relative_eq;
use flate2::write::GzEncoder;
use flate2::Compression;
use narps_open::{
    correlation_coefficient, correlation_threshold, passes_thresholds, read_nifti, MapComparator, NarpsError,
    NiftiCorrelation, PipelineExecutor, ReferenceResults, Result, Stage, ValidationDriver, ValidationReport,
};
use tempfile::{tempdir, TempDir};

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Write a little-endian float32 NIfTI-1 volume of shape `[n, 1, 1]`, gzipped if the name ends with .gz.
fn write_nifti(path: &Path, values: &[f32]) {
    let mut raw = vec![0u8; 352];
    raw[0..4].copy_from_slice(&348i32.to_le_bytes());
    for (i, d) in [3i16, values.len() as i16, 1, 1].iter().enumerate() {
        raw[40 + 2 * i..42 + 2 * i].copy_from_slice(&d.to_le_bytes());
    }
    raw[70..72].copy_from_slice(&16i16.to_le_bytes());
    raw[72..74].copy_from_slice(&32i16.to_le_bytes());
    raw[108..112].copy_from_slice(&352f32.to_le_bytes());
    raw[344..348].copy_from_slice(b"n+1\0");
    for v in values {
        raw.extend_from_slice(&v.to_le_bytes());
    }

    let file = File::create(path).unwrap();
    if path.to_string_lossy().ends_with(".gz") {
        let mut encoder = GzEncoder::new(file, Compression::default());
        encoder.write_all(&raw).unwrap();
        encoder.finish().unwrap();
    } else {
        let mut file = file;
        file.write_all(&raw).unwrap();
    }
}

#[test]
fn gzipped_maps_can_be_read_and_correlated() {
    let dir = tempdir().unwrap();
    let reproduced = dir.path().join("zstat1.nii.gz");
    let reference = dir.path().join("hypo1_unthresh.nii");
    write_nifti(&reproduced, &[0.0, 1.0, 2.0, 3.0, 4.0, f32::NAN]);
    write_nifti(&reference, &[5.0, 2.0, 4.0, 6.0, 8.0, 1.0]);

    let volume = read_nifti(&reproduced).unwrap();
    assert_eq!(&[6, 1, 1], volume.shape());

    // the zero and NaN voxels are masked out, what remains is perfectly correlated
    assert_relative_eq!(1.0, correlation_coefficient(&reproduced, &reference).unwrap(), epsilon = 1e-12);
}

#[test]
fn anti_correlated_maps_give_minus_one() {
    let dir = tempdir().unwrap();
    let left = dir.path().join("left.nii");
    let right = dir.path().join("right.nii");
    write_nifti(&left, &[1.0, 2.0, 3.0]);
    write_nifti(&right, &[3.0, 2.0, 1.0]);
    assert_relative_eq!(-1.0, NiftiCorrelation.correlation(&left, &right).unwrap(), epsilon = 1e-12);
}

#[test]
fn maps_of_different_shapes_cannot_be_compared() {
    let dir = tempdir().unwrap();
    let left = dir.path().join("left.nii");
    let right = dir.path().join("right.nii");
    write_nifti(&left, &[1.0, 2.0, 3.0]);
    write_nifti(&right, &[1.0, 2.0, 3.0, 4.0]);
    assert!(matches!(correlation_coefficient(&left, &right), Err(NarpsError::ShapeMismatch(_, _))));
}

#[test]
fn report_lines_are_appended() {
    let dir = tempdir().unwrap();
    let log = dir.path().join("test_pipeline-2T6S.txt");
    let report = ValidationReport::new("2T6S", 20, vec![0.5; 9]);
    report.append_to_file(&log).unwrap();
    ValidationReport::new("2T6S", 40, vec![0.5; 9]).append_to_file(&log).unwrap();

    let content = fs::read_to_string(&log).unwrap();
    let lines: Vec<&str> = content.lines().collect();
    assert_eq!(2, lines.len());
    assert!(lines[0].ends_with("| true"));
    assert!(lines[1].starts_with("2T6S | 40 subjects |"));
    assert!(lines[1].ends_with("| false"));
}

#[test]
fn thresholds_at_bracket_edges() {
    assert_eq!(0.30, correlation_threshold(20));
    assert_eq!(0.70, correlation_threshold(21));
    assert_eq!(0.93, correlation_threshold(108));
    assert!(passes_thresholds(&[0.94; 9], 108));
    assert!(!passes_thresholds(&[0.93; 9], 108));
}


/// Writes the first level outputs of the subjects it is asked to run.
struct FileWritingExecutor {
    root: PathBuf,
    subjects: Vec<String>,
    runs: Vec<Stage>,
}

impl FileWritingExecutor {
    fn output(&self, subject: &str) -> PathBuf {
        self.root.join(format!("run_level_analysis/_run_id_01_subject_id_{}/cope1.nii.gz", subject))
    }
}

impl PipelineExecutor for FileWritingExecutor {
    fn run(&mut self, stage: Stage, subjects: &[String]) -> Result<()> {
        self.runs.push(stage);
        if stage.includes_first_level() {
            for subject in subjects {
                let file = self.output(subject);
                fs::create_dir_all(file.parent().unwrap())?;
                fs::write(file, b"")?;
            }
        }
        Ok(())
    }

    fn list_missing_first_level_outputs(&self) -> Vec<PathBuf> {
        self.subjects.iter().map(|s| self.output(s)).filter(|f| !f.exists()).collect()
    }
}

/// Reference maps written once in a temporary directory.
struct LocalReference {
    dir: TempDir,
}

impl ReferenceResults for LocalReference {
    fn materialize(&mut self) -> Result<()> {
        for file in self.local_files() {
            write_nifti(&file, &[1.0, 2.0, 3.0, 4.0]);
        }
        Ok(())
    }

    fn local_files(&self) -> Vec<PathBuf> {
        (1..=9)
            .flat_map(|h| vec![format!("hypo{}_thresh.nii.gz", h), format!("hypo{}_unthresh.nii.gz", h)])
            .map(|name| self.dir.path().join(name))
            .collect()
    }
}

#[test]
fn a_reproduction_is_driven_to_its_evaluation() {
    let work = tempdir().unwrap();
    let subjects = vec![String::from("001"), String::from("002")];

    let mut hypotheses = Vec::new();
    for h in 1..=9 {
        let thresholded = work.path().join(format!("h{}_thresh.nii.gz", h));
        let unthresholded = work.path().join(format!("h{}_unthresh.nii.gz", h));
        // thresholded maps are never read
        hypotheses.push(thresholded);
        write_nifti(&unthresholded, &[2.0, 4.0, 6.0, 8.5]);
        hypotheses.push(unthresholded);
    }

    let executor = FileWritingExecutor { root: work.path().to_path_buf(), subjects: subjects.clone(), runs: Vec::new() };
    let reference = LocalReference { dir: tempdir().unwrap() };
    let mut driver = ValidationDriver::new(executor, reference, NiftiCorrelation, 3);

    let report = driver.evaluate("2T6S", &subjects, &hypotheses).unwrap();

    assert_eq!(vec![Stage::FirstLevel, Stage::GroupLevel], driver.executor.runs);
    assert_eq!(9, report.coefficients.len());
    assert!(report.coefficients.iter().all(|c| *c > 0.99));
    assert!(report.passed);
}
