//! Parameter tables of the implemented teams, and the preprocessing workflows they need.

use serde_json::json;

use crate::contrasts::ContrastSpec;
use crate::error::Result;
use crate::events::{GAIN_LOSS_MODEL, PARAMETRIC_RESPONSE_MODEL};
use crate::pipeline::{TeamParameters, TeamPipeline, FEAT_DESIGN_FILES, REPETITION_TIME};
use crate::workflow::{Node, Workflow};

const MNI_BRAIN: &str = "MNI152_T1_2mm_brain.nii.gz";

const GAIN_LOSS: &[&str] = &["gain", "loss"];

const CONTRASTS_08MQ: [ContrastSpec; 3] = [
    ContrastSpec { name: "positive_effect_gain", conditions: GAIN_LOSS, weights: &[1.0, 0.0] },
    ContrastSpec { name: "positive_effect_loss", conditions: GAIN_LOSS, weights: &[0.0, 1.0] },
    ContrastSpec { name: "negative_effect_loss", conditions: GAIN_LOSS, weights: &[0.0, -1.0] },
];

const CONTRASTS_4SZ2: [ContrastSpec; 2] = [
    ContrastSpec { name: "gain", conditions: GAIN_LOSS, weights: &[1.0, 0.0] },
    ContrastSpec { name: "loss", conditions: GAIN_LOSS, weights: &[0.0, 1.0] },
];

pub static TEAM_08MQ: TeamParameters = TeamParameters {
    team_id: "08MQ",
    fwhm: 6.0,
    session_model: PARAMETRIC_RESPONSE_MODEL,
    run_level_contrasts: &CONTRASTS_08MQ,
    gain_contrast: 1,
    loss_contrast: 2,
    preprocessing: Some(preprocessing_08mq),
    preprocessing_files: &[
        "components_file.txt",
        "sub-{subject_id}_task-MGT_run-{run_id}_bold_brain_mcf.nii.gz.par",
        "sub-{subject_id}_task-MGT_run-{run_id}_bold_brain_mcf_st_smooth_flirt_trans.nii.gz",
    ],
    run_level_func: "preprocessing/_run_id_{run_id}_subject_id_{subject_id}/sub-{subject_id}_task-MGT_run-{run_id}_bold_brain_mcf_st_smooth_flirt_trans.nii.gz",
    run_level_motion: Some("preprocessing/_run_id_{run_id}_subject_id_{subject_id}/sub-{subject_id}_task-MGT_run-{run_id}_bold_brain_mcf.nii.gz.par"),
    run_level_files: &FEAT_DESIGN_FILES,
    subject_level: true,
};

pub static TEAM_4SZ2: TeamParameters = TeamParameters {
    team_id: "4SZ2",
    fwhm: 5.0,
    session_model: GAIN_LOSS_MODEL,
    run_level_contrasts: &CONTRASTS_4SZ2,
    gain_contrast: 1,
    loss_contrast: 2,
    preprocessing: None,
    preprocessing_files: &[],
    run_level_func: "derivatives/fmriprep/sub-{subject_id}/func/sub-{subject_id}_task-MGT_run-{run_id}_bold_space-MNI152NLin2009cAsym_preproc.nii.gz",
    run_level_motion: None,
    run_level_files: &[],
    subject_level: false,
};

/// All implemented teams.
pub static TEAMS: [&TeamParameters; 2] = [&TEAM_08MQ, &TEAM_4SZ2];


pub fn find_team(team_id: &str) -> Option<&'static TeamParameters> {
    TEAMS.iter().copied().find(|t| t.team_id == team_id)
}

pub fn implemented_teams() -> Vec<&'static str> {
    TEAMS.iter().map(|t| t.team_id).collect()
}


/// FSL and ANTs preprocessing: bias correction, segmentation, normalisation, fieldmap based
/// coregistration, motion and slice timing correction, smoothing and CompCor confounds.
fn preprocessing_08mq(pipeline: &TeamPipeline) -> Result<Workflow> {
    let dirs = &pipeline.directories;
    let templates = json!({
        "anat": "sub-{subject_id}/anat/sub-{subject_id}_T1w.nii.gz",
        "func": "sub-{subject_id}/func/sub-{subject_id}_task-MGT_run-{run_id}_bold.nii.gz",
        "sbref": "sub-{subject_id}/func/sub-{subject_id}_task-MGT_run-{run_id}_sbref.nii.gz",
        "magnitude": "sub-{subject_id}/fmap/sub-{subject_id}_magnitude1.nii.gz",
        "phasediff": "sub-{subject_id}/fmap/sub-{subject_id}_phasediff.nii.gz",
    });

    let mut wf = Workflow::new("preprocessing", &dirs.working_dir);
    wf.add_nodes(vec![
        Node::new("info_source", "utility.IdentityInterface")
            .input("fields", vec!["subject_id", "run_id"])
            .iterable("run_id", &pipeline.run_list)
            .iterable("subject_id", &pipeline.subject_list),
        Node::new("select_files", "io.SelectFiles")
            .input("templates", templates)
            .input("base_directory", dirs.dataset_dir.to_string_lossy().as_ref()),
        Node::new("data_sink", "io.DataSink")
            .input("base_directory", dirs.output_dir.to_string_lossy().as_ref()),

        // anatomical
        Node::new("bias_field_correction", "fsl.FAST")
            .input("img_type", 1)
            .input("output_biascorrected", true),
        Node::new("brain_extraction_anat", "fsl.BET").input("frac", 0.5),
        Node::new("segmentation_anat", "fsl.FAST")
            .input("no_bias", true)
            .input("segments", false)
            .input("probability_maps", false),
        Node::new("split_segmentation_maps", "utility.Split")
            .input("splits", vec![1, 1, 1])
            .input("squeeze", true),
        Node::new("normalization_anat", "ants.Registration")
            .input("fixed_image", MNI_BRAIN)
            .input("collapse_output_transforms", true)
            .input("convergence_threshold", vec![1e-06])
            .input("convergence_window_size", vec![10])
            .input("dimension", 3)
            .input("initial_moving_transform_com", true)
            .input("radius_or_number_of_bins", vec![32, 32, 4])
            .input("sampling_percentage", vec![0.25, 0.25, 1.0])
            .input("sampling_strategy", vec!["Regular", "Regular", "None"])
            .input("transforms", vec!["Rigid", "Affine", "SyN"])
            .input("metric", vec!["MI", "MI", "CC"])
            .input("transform_parameters", json!([[0.1], [0.1], [0.1, 3.0, 0.0]]))
            .input("metric_weight", vec![1.0; 3])
            .input("shrink_factors", json!([[8, 4, 2, 1], [8, 4, 2, 1], [8, 4, 2, 1]]))
            .input("smoothing_sigmas", json!([[3, 2, 1, 0], [3, 2, 1, 0], [3, 2, 1, 0]]))
            .input("sigma_units", vec!["vox"; 3])
            .input("number_of_iterations", json!([
                [1000, 500, 250, 100],
                [1000, 500, 250, 100],
                [100, 70, 50, 20],
            ]))
            .input("use_histogram_matching", true)
            .input("winsorize_lower_quantile", 0.005)
            .input("winsorize_upper_quantile", 0.995),
        Node::new("threshold_white_matter", "fsl.Threshold").input("thresh", 1),
        Node::new("threshold_csf", "fsl.Threshold").input("thresh", 1),
        Node::new("erode_white_matter", "fsl.ErodeImage")
            .input("kernel_shape", "sphere")
            .input("kernel_size", 2.0),
        Node::new("erode_csf", "fsl.ErodeImage")
            .input("kernel_shape", "sphere")
            .input("kernel_size", 1.5),
        Node::new("alignment_white_matter", "fsl.ApplyXFM").input("apply_xfm", true),
        Node::new("alignment_csf", "fsl.ApplyXFM").input("apply_xfm", true),
        Node::new("merge_masks", "utility.Merge").input("numinputs", 2),

        // field maps and coregistration
        Node::new("brain_extraction_magnitude", "fsl.BET").input("frac", 0.5),
        Node::new("convert_to_fieldmap", "fsl.PrepareFieldmap"),
        Node::new("coregistration_sbref", "fsl.FLIRT")
            .input("interp", "trilinear")
            .input("cost", "bbr"),
        Node::new("inverse_func_to_anat", "fsl.ConvertXFM").input("invert_xfm", true),

        // functional
        Node::new("brain_extraction_func", "fsl.BET")
            .input("frac", 0.3)
            .input("mask", true)
            .input("functional", true),
        Node::new("motion_correction", "fsl.MCFLIRT")
            .input("cost", "normcorr")
            .input("interpolation", "spline")
            .input("save_plots", true),
        Node::new("slice_time_correction", "fsl.SliceTimer")
            .input("time_repetition", REPETITION_TIME),
        Node::new("smoothing", "fsl.SUSAN")
            .input("brightness_threshold", 2000.0)
            .input("fwhm", pipeline.parameters.fwhm),
        Node::new("alignment_func_to_anat", "fsl.ApplyXFM").input("apply_xfm", true),
        Node::new("alignment_func_to_mni", "ants.ApplyTransforms")
            .input("reference_image", MNI_BRAIN),
        Node::new("compute_confounds", "confounds.CompCor")
            .input("num_components", 4)
            .input("merge_method", "union")
            .input("repetition_time", REPETITION_TIME),
    ])?;

    wf.connect_ports("info_source", "select_files", &[("subject_id", "subject_id"), ("run_id", "run_id")])?;

    wf.connect("select_files", "anat", "bias_field_correction", "in_files")?;
    wf.connect("bias_field_correction", "restored_image", "brain_extraction_anat", "in_file")?;
    wf.connect("brain_extraction_anat", "out_file", "segmentation_anat", "in_files")?;
    wf.connect("brain_extraction_anat", "out_file", "normalization_anat", "moving_image")?;
    wf.connect("segmentation_anat", "partial_volume_files", "split_segmentation_maps", "inlist")?;
    wf.connect("split_segmentation_maps", "out2", "threshold_white_matter", "in_file")?;
    wf.connect("split_segmentation_maps", "out1", "threshold_csf", "in_file")?;
    wf.connect("threshold_white_matter", "out_file", "erode_white_matter", "in_file")?;
    wf.connect("threshold_csf", "out_file", "erode_csf", "in_file")?;
    wf.connect("erode_white_matter", "out_file", "alignment_white_matter", "in_file")?;
    wf.connect("inverse_func_to_anat", "out_file", "alignment_white_matter", "in_matrix_file")?;
    wf.connect("select_files", "sbref", "alignment_white_matter", "reference")?;
    wf.connect("erode_csf", "out_file", "alignment_csf", "in_file")?;
    wf.connect("inverse_func_to_anat", "out_file", "alignment_csf", "in_matrix_file")?;
    wf.connect("select_files", "sbref", "alignment_csf", "reference")?;
    wf.connect("alignment_csf", "out_file", "merge_masks", "in1")?;
    wf.connect("alignment_white_matter", "out_file", "merge_masks", "in2")?;

    wf.connect("select_files", "magnitude", "brain_extraction_magnitude", "in_file")?;
    wf.connect("brain_extraction_magnitude", "out_file", "convert_to_fieldmap", "in_magnitude")?;
    wf.connect("select_files", "phasediff", "convert_to_fieldmap", "in_phase")?;

    wf.connect_ports("select_files", "coregistration_sbref", &[("sbref", "in_file"), ("anat", "reference")])?;
    wf.connect("convert_to_fieldmap", "out_fieldmap", "coregistration_sbref", "fieldmap")?;
    wf.connect("coregistration_sbref", "out_matrix_file", "inverse_func_to_anat", "in_file")?;

    wf.connect("select_files", "func", "brain_extraction_func", "in_file")?;
    wf.connect("brain_extraction_func", "out_file", "motion_correction", "in_file")?;
    wf.connect("select_files", "sbref", "motion_correction", "ref_file")?;
    wf.connect("motion_correction", "out_file", "slice_time_correction", "in_file")?;
    wf.connect("slice_time_correction", "slice_time_corrected_file", "smoothing", "in_file")?;
    wf.connect("smoothing", "smoothed_file", "alignment_func_to_anat", "in_file")?;
    wf.connect("coregistration_sbref", "out_matrix_file", "alignment_func_to_anat", "in_matrix_file")?;
    wf.connect("brain_extraction_anat", "out_file", "alignment_func_to_anat", "reference")?;
    wf.connect("alignment_func_to_anat", "out_file", "alignment_func_to_mni", "input_image")?;
    wf.connect("normalization_anat", "forward_transforms", "alignment_func_to_mni", "transforms")?;
    wf.connect("merge_masks", "out", "compute_confounds", "mask_files")?;
    wf.connect("slice_time_correction", "slice_time_corrected_file", "compute_confounds", "realigned_file")?;

    wf.connect("motion_correction", "par_file", "data_sink", "preprocessing.@par_file")?;
    wf.connect("compute_confounds", "components_file", "data_sink", "preprocessing.@components_file")?;
    wf.connect("alignment_func_to_mni", "output_image", "data_sink", "preprocessing.@output_image")?;

    Ok(wf)
}
