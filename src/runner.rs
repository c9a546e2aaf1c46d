//! Execution of pipelines through an external workflow engine.

use log::{debug, info};

use std::path::{Path, PathBuf};
use std::process::Command;

use crate::config::Configuration;
use crate::error::{NarpsError, Result};
use crate::participants::list_participants;
use crate::pipeline::{pipeline_for, Pipeline, TeamPipeline};
use crate::traits::{PipelineExecutor, Stage};
use crate::workflow::Workflow;


/// The first `nb_subjects` subject ids of the participants table.
pub fn select_subjects(config: &Configuration, nb_subjects: usize) -> Result<Vec<String>> {
    let mut subjects = list_participants(config.participants_file())?;
    subjects.truncate(nb_subjects);
    Ok(subjects)
}


/// Runs pipeline stages by exporting their workflows to JSON and invoking the engine command
/// on each file, in stage order.
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    pub pipeline: TeamPipeline,
    pub engine_command: Vec<String>,
}

impl CommandExecutor {
    pub fn new(pipeline: TeamPipeline, engine_command: &[String]) -> CommandExecutor {
        CommandExecutor {
            pipeline,
            engine_command: engine_command.to_vec(),
        }
    }

    /// Executor for a team's pipeline over the first `nb_subjects` participants.
    pub fn from_config(config: &Configuration, team_id: &str, nb_subjects: usize) -> Result<CommandExecutor> {
        let subjects = select_subjects(config, nb_subjects)?;
        let pipeline = pipeline_for(team_id, config, &subjects)?;
        Ok(CommandExecutor::new(pipeline, &config.runner.engine_command))
    }

    /// Workflows of `stage` for the given subjects, in execution order.
    pub fn workflows(&self, stage: Stage, subjects: &[String]) -> Result<Vec<Workflow>> {
        let pipeline = self.pipeline.with_subjects(subjects);
        let mut workflows = Vec::new();
        if stage.includes_first_level() {
            workflows.extend(pipeline.preprocessing()?);
            workflows.extend(pipeline.run_level_analysis()?);
            workflows.extend(pipeline.subject_level_analysis()?);
        }
        if stage.includes_group_level() {
            workflows.extend(pipeline.group_level_analysis()?);
        }
        Ok(workflows)
    }

    fn execute(&self, workflow_file: &Path) -> Result<()> {
        let (program, args) = self.engine_command.split_first().ok_or(NarpsError::NoEngineCommand)?;
        debug!("Running {} {:?} {}", program, args, workflow_file.display());
        let status = Command::new(program).args(args).arg(workflow_file).status()?;
        if !status.success() {
            return Err(NarpsError::EngineFailed(self.engine_command.join(" "), status.code()));
        }
        Ok(())
    }
}

impl PipelineExecutor for CommandExecutor {
    fn run(&mut self, stage: Stage, subjects: &[String]) -> Result<()> {
        let workflows = self.workflows(stage, subjects)?;
        info!(
            "Team {}: running {} workflow(s) for {} subject(s)",
            self.pipeline.team_id(),
            workflows.len(),
            subjects.len()
        );
        let export_dir = self.pipeline.directories.working_dir.join("workflows");
        for workflow in &workflows {
            let file = workflow.write_json(&export_dir)?;
            info!("Running workflow {}", workflow.name);
            self.execute(&file)?;
        }
        Ok(())
    }

    fn list_missing_first_level_outputs(&self) -> Vec<PathBuf> {
        self.pipeline
            .first_level_outputs()
            .into_iter()
            .filter(|f| !f.exists())
            .collect()
    }
}


#[cfg(test)]
mod test {
    use super::*;
    use crate::pipeline::PipelineDirectories;
    use crate::teams::{TEAM_08MQ, TEAM_4SZ2};
    use tempfile::tempdir;

    fn subjects(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn stages_select_their_workflows() {
        let dirs = PipelineDirectories::for_team("/data", "/results", "08MQ");
        let executor = CommandExecutor::new(TeamPipeline::new(&TEAM_08MQ, &subjects(&["001"]), dirs), &[]);
        let first: Vec<String> = executor.workflows(Stage::FirstLevel, &subjects(&["001"])).unwrap()
            .into_iter().map(|w| w.name).collect();
        assert_eq!(vec!["preprocessing", "run_level_analysis", "subject_level_analysis"], first);
        assert_eq!(3, executor.workflows(Stage::GroupLevel, &subjects(&["001"])).unwrap().len());
        assert_eq!(6, executor.workflows(Stage::Both, &subjects(&["001"])).unwrap().len());
    }

    #[test]
    fn missing_outputs_disappear_once_written() {
        let dir = tempdir().unwrap();
        let dirs = PipelineDirectories::for_team("/data", dir.path(), "4SZ2");
        let executor = CommandExecutor::new(TeamPipeline::new(&TEAM_4SZ2, &subjects(&["001"]), dirs), &[]);

        let missing = executor.list_missing_first_level_outputs();
        assert_eq!(2 * 4 * 4, missing.len());
        for file in &missing {
            std::fs::create_dir_all(file.parent().unwrap()).unwrap();
            std::fs::write(file, b"").unwrap();
        }
        assert!(executor.list_missing_first_level_outputs().is_empty());
    }

    #[test]
    fn an_empty_engine_command_is_an_error() {
        let dir = tempdir().unwrap();
        let dirs = PipelineDirectories::for_team(dir.path(), dir.path(), "4SZ2");
        let mut executor = CommandExecutor::new(TeamPipeline::new(&TEAM_4SZ2, &subjects(&["001"]), dirs), &[]);
        assert!(matches!(
            executor.run(Stage::FirstLevel, &subjects(&["001"])),
            Err(NarpsError::NoEngineCommand)
        ));
    }

    #[cfg(unix)]
    #[test]
    fn a_failing_engine_is_reported() {
        let dir = tempdir().unwrap();
        let dirs = PipelineDirectories::for_team(dir.path(), dir.path(), "4SZ2");
        let pipeline = TeamPipeline::new(&TEAM_4SZ2, &subjects(&["001"]), dirs);
        let mut ok = CommandExecutor::new(pipeline.clone(), &subjects(&["true"]));
        assert!(ok.run(Stage::FirstLevel, &subjects(&["001"])).is_ok());
        assert!(dir.path().join("NARPS-4SZ2-reproduced/intermediate_results/workflows/run_level_analysis.json").exists());

        let mut failing = CommandExecutor::new(pipeline, &subjects(&["false"]));
        assert!(matches!(
            failing.run(Stage::FirstLevel, &subjects(&["001"])),
            Err(NarpsError::EngineFailed(_, Some(1)))
        ));
    }
}
