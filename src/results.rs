//! Reference results of NARPS teams, as published in NeuroVault collections.

use log::{debug, info};
use reqwest::blocking::Client;
use serde::Deserialize;

use std::fs::{self, File};
use std::path::PathBuf;

use crate::config::Configuration;
use crate::error::{NarpsError, Result};
use crate::traits::ReferenceResults;


#[derive(Debug, Deserialize)]
struct ImageEntry {
    name: String,
    file: String,
}

/// One page of the image list of a collection.
#[derive(Debug, Deserialize)]
struct ImagePage {
    results: Vec<ImageEntry>,
    #[serde(default)]
    next: Option<String>,
}

/// Parse one page of the NeuroVault image list. Returns the `(name, url)` pairs in API order
/// and the url of the next page, if any.
pub fn parse_image_page(json: &str) -> Result<(Vec<(String, String)>, Option<String>)> {
    let page: ImagePage = serde_json::from_str(json)?;
    let files = page.results.into_iter().map(|e| (e.name, e.file)).collect();
    Ok((files, page.next))
}


/// The NeuroVault collection of one team.
#[derive(Debug, Clone)]
pub struct ResultsCollection {
    pub team_id: String,
    pub uid: String,
    /// Download directory, `<narps_results>/orig/<uid>_<team_id>`.
    pub directory: PathBuf,
    /// `(name, url)` of the collection's images, in collection order.
    pub files: Vec<(String, String)>,
    api_url: String,
    client: Client,
}

impl ResultsCollection {

    /// Describe the collection of `team_id`. Its uid comes from the configuration.
    pub fn new(config: &Configuration, team_id: &str) -> Result<ResultsCollection> {
        let uid = config
            .results
            .collections
            .get(team_id)
            .ok_or_else(|| NarpsError::NoCollection(team_id.to_string()))?;
        Ok(ResultsCollection {
            team_id: team_id.to_string(),
            uid: uid.clone(),
            directory: config
                .directories
                .narps_results
                .join("orig")
                .join(format!("{}_{}", uid, team_id)),
            files: Vec::new(),
            api_url: format!("{}{}/images/", config.results.neurovault_api, uid),
            client: Client::new(),
        })
    }

    /// Use a known list of files instead of asking the API.
    pub fn with_file_names(mut self, files: Vec<(String, String)>) -> ResultsCollection {
        self.files = files;
        self
    }

    /// Ask the API for the collection's images, following pagination.
    pub fn fetch_file_urls(&mut self) -> Result<()> {
        let mut files = Vec::new();
        let mut next = Some(self.api_url.clone());
        while let Some(url) = next {
            debug!("Fetching {}", url);
            let body = self.client.get(&url).send()?.error_for_status()?.text()?;
            let (page, following) = parse_image_page(&body)?;
            files.extend(page);
            next = following;
        }
        self.files = files;
        Ok(())
    }

    /// Download every file not already present.
    pub fn download(&self) -> Result<()> {
        fs::create_dir_all(&self.directory)?;
        info!("Collecting results for team {}", self.team_id);
        for ((name, url), path) in self.files.iter().zip(self.local_files()) {
            if path.exists() {
                debug!("{} already downloaded", name);
                continue;
            }
            debug!("Downloading {} to {}", url, path.display());
            let partial = path.with_extension("part");
            let mut response = self.client.get(url).send()?.error_for_status()?;
            let mut file = File::create(&partial)?;
            response.copy_to(&mut file)?;
            fs::rename(&partial, &path)?;
        }
        Ok(())
    }
}

impl ReferenceResults for ResultsCollection {
    fn materialize(&mut self) -> Result<()> {
        if self.files.is_empty() {
            self.fetch_file_urls()?;
        }
        self.download()
    }

    fn local_files(&self) -> Vec<PathBuf> {
        self.files
            .iter()
            .map(|(name, _)| self.directory.join(format!("{}.nii.gz", name)))
            .collect()
    }
}
