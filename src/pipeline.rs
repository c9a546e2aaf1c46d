//! Pipelines: the stages of a team's analysis, described as workflows for an external engine.
//!
//! Every team runs the same four stages (preprocessing, run level, subject level, group level).
//! [`TeamPipeline`] builds them for any team from its [`TeamParameters`] table; teams differ
//! in data (smoothing, session model, contrasts), not in code paths.

use serde_json::{json, Value};

use std::path::{Path, PathBuf};

use crate::config::Configuration;
use crate::contrasts::{contrasts_from_specs, group_level_contrasts, Contrast, ContrastSpec};
use crate::error::{NarpsError, Result};
use crate::events::SessionModel;
use crate::regressors::{DesignMethod, DESIGN_METHODS};
use crate::teams::find_team;
use crate::workflow::{Node, Workflow};

/// Repetition time of the mixed gambles task, in seconds.
pub const REPETITION_TIME: f64 = 1.0;

/// Runs of the mixed gambles task.
pub const RUNS: [&str; 4] = ["01", "02", "03", "04"];

/// Design files written per run by FEAT based run level analyses.
pub const FEAT_DESIGN_FILES: [&str; 2] = ["run0.mat", "run0.png"];

/// Per-contrast maps of run and subject level analyses.
pub const CONTRAST_MAPS: [&str; 4] = ["cope", "tstat", "varcope", "zstat"];

/// Subdirectory of each run level output directory holding the per-contrast maps.
pub const RUN_RESULTS_DIR: &str = "results";

/// Files written per contrast by one-sample group designs.
pub const ONE_SAMPLE_FILES: [&str; 6] = [
    "randomise_tfce_corrp_tstat1.nii.gz",
    "randomise_tfce_corrp_tstat2.nii.gz",
    "tstat1.nii.gz",
    "tstat2.nii.gz",
    "zstat1.nii.gz",
    "zstat2.nii.gz",
];

/// Files written per contrast by the two-sample group design.
pub const TWO_SAMPLE_FILES: [&str; 3] = [
    "randomise_tfce_corrp_tstat1.nii.gz",
    "tstat1.nii.gz",
    "zstat1.nii.gz",
];

/// Which run level contrast a hypothesis is tested on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    Gain,
    Loss,
}

/// The nine NARPS hypotheses: design, run level effect and group statistic index.
pub const HYPOTHESES: [(DesignMethod, Effect, usize); 9] = [
    (DesignMethod::EqualIndifference, Effect::Gain, 1),
    (DesignMethod::EqualRange, Effect::Gain, 1),
    (DesignMethod::EqualIndifference, Effect::Gain, 1),
    (DesignMethod::EqualRange, Effect::Gain, 1),
    (DesignMethod::EqualIndifference, Effect::Loss, 2),
    (DesignMethod::EqualRange, Effect::Loss, 2),
    (DesignMethod::EqualIndifference, Effect::Loss, 1),
    (DesignMethod::EqualRange, Effect::Loss, 1),
    (DesignMethod::GroupComp, Effect::Loss, 1),
];


/// Builds a team specific preprocessing workflow.
pub type PreprocessingBuilder = fn(&TeamPipeline) -> Result<Workflow>;

/// Everything that distinguishes one team's pipeline from another's.
#[derive(Debug, Clone, Copy)]
pub struct TeamParameters {
    pub team_id: &'static str,
    /// Smoothing kernel width in mm.
    pub fwhm: f64,
    pub session_model: SessionModel,
    pub run_level_contrasts: &'static [ContrastSpec],
    /// 1-based index of the run level contrast used for gain hypotheses.
    pub gain_contrast: usize,
    pub loss_contrast: usize,
    /// `None` when the team starts from already preprocessed data.
    pub preprocessing: Option<PreprocessingBuilder>,
    /// Preprocessing outputs per run, with `{subject_id}` and `{run_id}` placeholders.
    pub preprocessing_files: &'static [&'static str],
    /// Functional input of the run level analysis, relative to the output (or dataset) directory.
    pub run_level_func: &'static str,
    /// Motion parameters fed to the run level model, if any.
    pub run_level_motion: Option<&'static str>,
    /// Design files written per run besides the per-contrast maps.
    pub run_level_files: &'static [&'static str],
    /// Whether runs are combined per subject before the group level.
    pub subject_level: bool,
}


/// Directories a pipeline reads from and writes to.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineDirectories {
    pub dataset_dir: PathBuf,
    pub results_dir: PathBuf,
    pub output_dir: PathBuf,
    pub working_dir: PathBuf,
}

impl PipelineDirectories {
    /// Output in `<results>/NARPS-<team>-reproduced`, intermediate files in its `intermediate_results`.
    pub fn for_team<P: AsRef<Path>, Q: AsRef<Path>>(dataset_dir: P, results_dir: Q, team_id: &str) -> PipelineDirectories {
        let output_dir = results_dir.as_ref().join(format!("NARPS-{}-reproduced", team_id));
        PipelineDirectories {
            dataset_dir: dataset_dir.as_ref().to_path_buf(),
            results_dir: results_dir.as_ref().to_path_buf(),
            working_dir: output_dir.join("intermediate_results"),
            output_dir,
        }
    }
}


/// The stages of a NARPS analysis pipeline.
pub trait Pipeline {
    fn team_id(&self) -> &str;

    fn subject_list(&self) -> &[String];

    fn preprocessing(&self) -> Result<Option<Workflow>>;

    fn run_level_analysis(&self) -> Result<Option<Workflow>>;

    fn subject_level_analysis(&self) -> Result<Option<Workflow>>;

    /// One workflow per design method.
    fn group_level_analysis(&self) -> Result<Vec<Workflow>>;

    fn preprocessing_outputs(&self) -> Vec<PathBuf>;

    fn run_level_outputs(&self) -> Vec<PathBuf>;

    fn subject_level_outputs(&self) -> Vec<PathBuf>;

    fn group_level_outputs(&self) -> Vec<PathBuf>;

    /// Thresholded then unthresholded map for each hypothesis, 18 paths in hypothesis order.
    fn hypotheses_outputs(&self) -> Vec<PathBuf>;

    /// All outputs that must exist before the group level can run.
    fn first_level_outputs(&self) -> Vec<PathBuf> {
        let mut outputs = self.preprocessing_outputs();
        outputs.extend(self.run_level_outputs());
        outputs.extend(self.subject_level_outputs());
        outputs
    }
}


/// A team's pipeline, configured for a list of subjects.
#[derive(Debug, Clone)]
pub struct TeamPipeline {
    pub parameters: &'static TeamParameters,
    pub subject_list: Vec<String>,
    pub run_list: Vec<String>,
    pub directories: PipelineDirectories,
}


/// Look up the pipeline of a team, with directories from the configuration.
pub fn pipeline_for(team_id: &str, config: &Configuration, subjects: &[String]) -> Result<TeamPipeline> {
    let parameters = find_team(team_id).ok_or_else(|| NarpsError::UnknownTeam(team_id.to_string()))?;
    Ok(TeamPipeline::new(
        parameters,
        subjects,
        PipelineDirectories::for_team(
            &config.directories.dataset,
            &config.directories.reproduced_results,
            team_id,
        ),
    ))
}


fn to_values(items: &[String]) -> Value {
    Value::from(items.to_vec())
}


impl TeamPipeline {
    pub fn new(parameters: &'static TeamParameters, subjects: &[String], directories: PipelineDirectories) -> TeamPipeline {
        TeamPipeline {
            parameters,
            subject_list: subjects.to_vec(),
            run_list: RUNS.iter().map(|r| r.to_string()).collect(),
            directories,
        }
    }

    /// The same pipeline restricted to other subjects.
    pub fn with_subjects(&self, subjects: &[String]) -> TeamPipeline {
        TeamPipeline {
            subject_list: subjects.to_vec(),
            ..self.clone()
        }
    }

    pub fn nb_subjects(&self) -> usize {
        self.subject_list.len()
    }

    /// Contrast ids "1", "2", ... of the run level contrasts.
    pub fn contrast_list(&self) -> Vec<String> {
        (1..=self.parameters.run_level_contrasts.len()).map(|i| i.to_string()).collect()
    }

    pub fn run_level_contrasts(&self) -> Result<Vec<Contrast>> {
        contrasts_from_specs(self.parameters.run_level_contrasts)
    }

    fn group_level_dir(&self, method: DesignMethod) -> String {
        format!("l3_analysis_{}_nsub_{}", method.name(), self.nb_subjects())
    }

    fn info_source(&self, iterables: &[(&str, &[String])]) -> Node {
        let fields: Vec<&str> = iterables.iter().map(|(f, _)| *f).collect();
        let mut node = Node::new("info_source", "utility.IdentityInterface").input("fields", fields);
        for (field, values) in iterables {
            node = node.iterable(field, values);
        }
        node
    }

    fn data_sink(&self) -> Node {
        Node::new("data_sink", "io.DataSink")
            .input("base_directory", self.directories.output_dir.to_string_lossy().into_owned())
    }

    fn run_level_workflow(&self) -> Result<Workflow> {
        let p = self.parameters;
        let func_root = if p.preprocessing.is_some() {
            &self.directories.output_dir
        } else {
            &self.directories.dataset_dir
        };
        let mut templates = json!({
            "event": format!("{}/sub-{{subject_id}}/func/sub-{{subject_id}}_task-MGT_run-{{run_id}}_events.tsv",
                self.directories.dataset_dir.display()),
            "func": func_root.join(p.run_level_func).to_string_lossy(),
        });
        if let Some(motion) = p.run_level_motion {
            templates["motion"] = Value::from(self.directories.output_dir.join(motion).to_string_lossy().into_owned());
        }

        let contrasts = serde_json::to_value(self.run_level_contrasts()?)?;
        let session_model = serde_json::to_value(&p.session_model)?;

        let mut wf = Workflow::new("run_level_analysis", &self.directories.working_dir);
        wf.add_nodes(vec![
            self.info_source(&[("run_id", self.run_list.as_slice()), ("subject_id", self.subject_list.as_slice())]),
            Node::new("select_files", "io.SelectFiles").input("templates", templates),
            Node::new("session_information", "narps_open.events.SessionModel")
                .input("session_model", session_model),
            Node::new("specify_model", "modelgen.SpecifyModel")
                .input("high_pass_filter_cutoff", 100)
                .input("time_repetition", REPETITION_TIME)
                .input("input_units", "secs"),
            Node::new("l1_design", "fsl.Level1Design")
                .input("bases", json!({"dgamma": {"derivs": true}}))
                .input("interscan_interval", REPETITION_TIME)
                .input("model_serial_correlations", true)
                .input("contrasts", contrasts),
            Node::new("model_generation", "fsl.FEATModel"),
            Node::new("model_estimate", "fsl.FILMGLS"),
            self.data_sink(),
        ])?;

        wf.connect_ports("info_source", "select_files", &[("subject_id", "subject_id"), ("run_id", "run_id")])?;
        wf.connect("select_files", "event", "session_information", "event_file")?;
        wf.connect("session_information", "session_information", "specify_model", "subject_info")?;
        wf.connect("select_files", "func", "specify_model", "functional_runs")?;
        if p.run_level_motion.is_some() {
            wf.connect("select_files", "motion", "specify_model", "realignment_parameters")?;
        }
        wf.connect("specify_model", "session_info", "l1_design", "session_info")?;
        wf.connect_ports("l1_design", "model_generation", &[("ev_files", "ev_files"), ("fsf_files", "fsf_file")])?;
        wf.connect("select_files", "func", "model_estimate", "in_file")?;
        wf.connect_ports("model_generation", "model_estimate", &[("con_file", "tcon_file"), ("design_file", "design_file")])?;
        wf.connect("model_estimate", "results_dir", "data_sink", "run_level_analysis.@results")?;
        wf.connect_ports("model_generation", "data_sink", &[
            ("design_file", "run_level_analysis.@design_file"),
            ("design_image", "run_level_analysis.@design_img"),
        ])?;
        Ok(wf)
    }

    fn subject_level_workflow(&self) -> Result<Workflow> {
        let run_dir = self.directories.output_dir.join("run_level_analysis").join("_run_id_*_subject_id_{subject_id}");
        let templates = json!({
            "cope": run_dir.join(RUN_RESULTS_DIR).join("cope{contrast_id}.nii.gz").to_string_lossy(),
            "varcope": run_dir.join(RUN_RESULTS_DIR).join("varcope{contrast_id}.nii.gz").to_string_lossy(),
        });

        let mut wf = Workflow::new("subject_level_analysis", &self.directories.working_dir);
        wf.add_nodes(vec![
            self.info_source(&[("contrast_id", self.contrast_list().as_slice()), ("subject_id", self.subject_list.as_slice())]),
            Node::new("select_files", "io.SelectFiles")
                .input("templates", templates)
                .input("force_lists", true),
            Node::new("merge_copes", "fsl.Merge").input("dimension", "t"),
            Node::new("merge_varcopes", "fsl.Merge").input("dimension", "t"),
            Node::new("generate_model", "fsl.L2Model").input("num_copes", self.run_list.len() as u64),
            Node::new("estimate_model", "fsl.FLAMEO")
                .input("run_mode", "fe")
                .input("mask_file", "MNI152_T1_2mm_brain_mask.nii.gz"),
            self.data_sink(),
        ])?;

        wf.connect_ports("info_source", "select_files", &[("subject_id", "subject_id"), ("contrast_id", "contrast_id")])?;
        wf.connect("select_files", "cope", "merge_copes", "in_files")?;
        wf.connect("select_files", "varcope", "merge_varcopes", "in_files")?;
        wf.connect("merge_copes", "merged_file", "estimate_model", "cope_file")?;
        wf.connect("merge_varcopes", "merged_file", "estimate_model", "var_cope_file")?;
        wf.connect_ports("generate_model", "estimate_model", &[
            ("design_mat", "design_file"),
            ("design_con", "t_con_file"),
            ("design_grp", "cov_split_file"),
        ])?;
        wf.connect_ports("estimate_model", "data_sink", &[
            ("copes", "subject_level_analysis.@copes"),
            ("varcopes", "subject_level_analysis.@varcopes"),
            ("tstats", "subject_level_analysis.@tstats"),
            ("zstats", "subject_level_analysis.@zstats"),
        ])?;
        Ok(wf)
    }

    fn group_level_workflow(&self, method: DesignMethod) -> Result<Workflow> {
        let p = self.parameters;
        let input_dir = if p.subject_level {
            self.directories.output_dir.join("subject_level_analysis").join("_contrast_id_{contrast_id}_subject_id_*")
        } else {
            self.directories.output_dir.join("run_level_analysis").join("_run_id_*_subject_id_*").join(RUN_RESULTS_DIR)
        };
        let map_name = |map: &str| if p.subject_level { format!("{}1.nii.gz", map) } else { format!("{}{{contrast_id}}.nii.gz", map) };
        let templates = json!({
            "cope": input_dir.join(map_name("cope")).to_string_lossy(),
            "varcope": input_dir.join(map_name("varcope")).to_string_lossy(),
            "participants": self.directories.dataset_dir.join("participants.tsv").to_string_lossy(),
        });

        let mut regressors = Node::new("regressors", "narps_open.regressors.build_regressors")
            .input("method", method.name())
            .input("subject_list", to_values(&self.subject_list));
        if !p.subject_level {
            regressors = regressors.input("run_list", to_values(&self.run_list));
        }
        let group_contrasts = serde_json::to_value(group_level_contrasts(method))?;

        let name = format!("group_level_analysis_{}_nsub_{}", method.name(), self.nb_subjects());
        let mut wf = Workflow::new(&name, &self.directories.working_dir);
        wf.add_nodes(vec![
            self.info_source(&[("contrast_id", self.contrast_list().as_slice())])
                .input("subjects", to_values(&self.subject_list)),
            Node::new("select_files", "io.SelectFiles")
                .input("templates", templates)
                .input("force_lists", true),
            Node::new("subgroups_contrasts", "narps_open.participants.GroupAssignment"),
            regressors,
            Node::new("merge_copes", "fsl.Merge").input("dimension", "t"),
            Node::new("merge_varcopes", "fsl.Merge").input("dimension", "t"),
            Node::new("specify_model", "fsl.MultipleRegressDesign").input("contrasts", group_contrasts),
            Node::new("estimate_model", "fsl.FLAMEO")
                .input("run_mode", "ols")
                .input("mask_file", "MNI152_T1_2mm_brain_mask.nii.gz"),
            Node::new("randomise", "fsl.Randomise")
                .input("tfce", true)
                .input("vox_p_values", true)
                .input("c_thresh", 0.05)
                .input("num_perm", 10000)
                .input("mask", "MNI152_T1_2mm_brain_mask.nii.gz"),
            self.data_sink().input("container", self.group_level_dir(method)),
        ])?;

        wf.connect("info_source", "contrast_id", "select_files", "contrast_id")?;
        wf.connect("info_source", "subjects", "subgroups_contrasts", "subject_ids")?;
        wf.connect_ports("select_files", "subgroups_contrasts", &[
            ("cope", "copes"),
            ("varcope", "varcopes"),
            ("participants", "participants_file"),
        ])?;
        wf.connect_ports("subgroups_contrasts", "regressors", &[
            ("equalRange_id", "equalRange_id"),
            ("equalIndifference_id", "equalIndifference_id"),
        ])?;

        let (copes, varcopes) = match method {
            DesignMethod::EqualRange => ("copes_equalRange", "varcopes_equalRange"),
            DesignMethod::EqualIndifference => ("copes_equalIndifference", "varcopes_equalIndifference"),
            DesignMethod::GroupComp => ("copes_global", "varcopes_global"),
        };
        wf.connect("subgroups_contrasts", copes, "merge_copes", "in_files")?;
        wf.connect("subgroups_contrasts", varcopes, "merge_varcopes", "in_files")?;
        wf.connect("regressors", "regressors", "specify_model", "regressors")?;
        if method == DesignMethod::GroupComp {
            wf.connect("regressors", "groups", "specify_model", "groups")?;
        }

        wf.connect("merge_copes", "merged_file", "estimate_model", "cope_file")?;
        wf.connect("merge_varcopes", "merged_file", "estimate_model", "var_cope_file")?;
        wf.connect_ports("specify_model", "estimate_model", &[
            ("design_mat", "design_file"),
            ("design_con", "t_con_file"),
            ("design_grp", "cov_split_file"),
        ])?;
        wf.connect("merge_copes", "merged_file", "randomise", "in_file")?;
        wf.connect_ports("specify_model", "randomise", &[("design_mat", "design_mat"), ("design_con", "tcon")])?;

        let container = self.group_level_dir(method);
        wf.connect("estimate_model", "zstats", "data_sink", &format!("{}.@zstats", container))?;
        wf.connect("estimate_model", "tstats", "data_sink", &format!("{}.@tstats", container))?;
        wf.connect("randomise", "t_corrected_p_files", "data_sink", &format!("{}.@tcorpfile", container))?;
        Ok(wf)
    }

    fn expand(&self, template: &str, subject_id: &str, run_id: &str) -> String {
        template.replace("{subject_id}", subject_id).replace("{run_id}", run_id)
    }
}


impl Pipeline for TeamPipeline {
    fn team_id(&self) -> &str {
        self.parameters.team_id
    }

    fn subject_list(&self) -> &[String] {
        &self.subject_list
    }

    fn preprocessing(&self) -> Result<Option<Workflow>> {
        match self.parameters.preprocessing {
            Some(build) => Ok(Some(build(self)?)),
            None => Ok(None),
        }
    }

    fn run_level_analysis(&self) -> Result<Option<Workflow>> {
        Ok(Some(self.run_level_workflow()?))
    }

    fn subject_level_analysis(&self) -> Result<Option<Workflow>> {
        if self.parameters.subject_level {
            Ok(Some(self.subject_level_workflow()?))
        } else {
            Ok(None)
        }
    }

    fn group_level_analysis(&self) -> Result<Vec<Workflow>> {
        DESIGN_METHODS.iter().map(|m| self.group_level_workflow(*m)).collect()
    }

    fn preprocessing_outputs(&self) -> Vec<PathBuf> {
        if self.parameters.preprocessing.is_none() {
            return Vec::new();
        }
        let mut outputs = Vec::new();
        for subject_id in &self.subject_list {
            for run_id in &self.run_list {
                let dir = self.directories.output_dir
                    .join("preprocessing")
                    .join(format!("_run_id_{}_subject_id_{}", run_id, subject_id));
                for file in self.parameters.preprocessing_files {
                    outputs.push(dir.join(self.expand(file, subject_id, run_id)));
                }
            }
        }
        outputs
    }

    fn run_level_outputs(&self) -> Vec<PathBuf> {
        let mut outputs = Vec::new();
        for run_id in &self.run_list {
            for subject_id in &self.subject_list {
                let dir = self.directories.output_dir
                    .join("run_level_analysis")
                    .join(format!("_run_id_{}_subject_id_{}", run_id, subject_id));
                for file in self.parameters.run_level_files {
                    outputs.push(dir.join(file));
                }
                for contrast_id in self.contrast_list() {
                    for map in CONTRAST_MAPS.iter() {
                        outputs.push(dir.join(RUN_RESULTS_DIR).join(format!("{}{}.nii.gz", map, contrast_id)));
                    }
                }
            }
        }
        outputs
    }

    fn subject_level_outputs(&self) -> Vec<PathBuf> {
        if !self.parameters.subject_level {
            return Vec::new();
        }
        let mut outputs = Vec::new();
        for contrast_id in self.contrast_list() {
            for subject_id in &self.subject_list {
                let dir = self.directories.output_dir
                    .join("subject_level_analysis")
                    .join(format!("_contrast_id_{}_subject_id_{}", contrast_id, subject_id));
                for map in CONTRAST_MAPS.iter() {
                    outputs.push(dir.join(format!("{}1.nii.gz", map)));
                }
            }
        }
        outputs
    }

    fn group_level_outputs(&self) -> Vec<PathBuf> {
        let mut outputs = Vec::new();
        for method in DESIGN_METHODS.iter() {
            let files: &[&str] = if method.is_one_sample() { &ONE_SAMPLE_FILES } else { &TWO_SAMPLE_FILES };
            for contrast_id in self.contrast_list() {
                let dir = self.directories.output_dir
                    .join(self.group_level_dir(*method))
                    .join(format!("_contrast_id_{}", contrast_id));
                for file in files {
                    outputs.push(dir.join(file));
                }
            }
        }
        outputs
    }

    fn hypotheses_outputs(&self) -> Vec<PathBuf> {
        let mut outputs = Vec::with_capacity(2 * HYPOTHESES.len());
        for (method, effect, stat) in HYPOTHESES.iter() {
            let contrast = match effect {
                Effect::Gain => self.parameters.gain_contrast,
                Effect::Loss => self.parameters.loss_contrast,
            };
            let dir = self.directories.output_dir
                .join(self.group_level_dir(*method))
                .join(format!("_contrast_id_{}", contrast));
            outputs.push(dir.join(format!("randomise_tfce_corrp_tstat{}.nii.gz", stat)));
            outputs.push(dir.join(format!("zstat{}.nii.gz", stat)));
        }
        outputs
    }
}
