//! Configuration of directories, the runner and reference collections.
//!
//! A [`Configuration`] is read from a JSON file and handed explicitly to the parts that need it:
//!
//! ```json
//! {
//!   "directories": { "dataset": "data/original/ds001734", "reproduced_results": "run/data/reproduced" },
//!   "runner": { "nb_trials": 3, "engine_command": ["python", "-m", "narps_open.engine"] },
//!   "results": { "collections": { "08MQ": "4933" } }
//! }
//! ```
//!
//! Missing fields take their default values.

use serde::{Deserialize, Serialize};

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use crate::error::Result;


#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Directories {
    /// The BIDS dataset, with `participants.tsv` at its root.
    pub dataset: PathBuf,
    pub reproduced_results: PathBuf,
    /// Where reference collections are downloaded.
    pub narps_results: PathBuf,
}

impl Default for Directories {
    fn default() -> Directories {
        Directories {
            dataset: PathBuf::from("data/original/ds001734"),
            reproduced_results: PathBuf::from("run/data/reproduced"),
            narps_results: PathBuf::from("data/results"),
        }
    }
}


#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerSettings {
    /// How many times first level execution is retried for subjects with missing outputs.
    pub nb_trials: usize,
    /// Program and leading arguments of the workflow engine; the workflow file is appended.
    pub engine_command: Vec<String>,
}

impl Default for RunnerSettings {
    fn default() -> RunnerSettings {
        RunnerSettings {
            nb_trials: 3,
            engine_command: vec![
                String::from("python"),
                String::from("-m"),
                String::from("narps_open.engine"),
            ],
        }
    }
}


#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResultsSettings {
    pub neurovault_api: String,
    /// Reference collection uid for each team id.
    pub collections: BTreeMap<String, String>,
}

impl Default for ResultsSettings {
    fn default() -> ResultsSettings {
        ResultsSettings {
            neurovault_api: String::from("https://neurovault.org/api/collections/"),
            collections: BTreeMap::new(),
        }
    }
}


#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Configuration {
    pub directories: Directories,
    pub runner: RunnerSettings,
    pub results: ResultsSettings,
}

impl Configuration {

    /// Read a configuration from a JSON file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Configuration> {
        let file = BufReader::new(File::open(path)?);
        Configuration::from_reader(file)
    }

    pub fn from_reader<S: Read>(input: S) -> Result<Configuration> {
        Ok(serde_json::from_reader(input)?)
    }

    /// Path of the participants table of the dataset.
    pub fn participants_file(&self) -> PathBuf {
        self.directories.dataset.join("participants.tsv")
    }
}
