use std::{path::*, time::Duration};
use chrono::prelude::*;
use serde::*;
use crate::{errors::*, night::*};

/// One raw exposure known to the night summary service
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ExposureRecord {
    pub expnum: i64,

    /// Frame type tag (`zero`, `dome flat`, `object`, ...)
    pub obstype: String,

    pub date_obs: NaiveDateTime,

    /// Where the transfer can fetch the frame from
    pub url: String,

    /// Local file name. Last segment of `url` if absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
}

impl ExposureRecord {
    pub fn local_file_name(&self) -> String {
        if let Some(file_name) = &self.file_name {
            return file_name.clone();
        }
        self.url
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or("")
            .to_string()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct NightSummary {
    pub night: String,
    pub exposures: Vec<ExposureRecord>,
}

pub trait NightCatalog {
    fn query_night(&self, night: &NightIdentifier) -> Result<NightSummary>;
}

fn unavailable(night: &NightIdentifier, reason: impl ToString) -> BiasPrepError {
    BiasPrepError::CatalogUnavailable {
        night: night.to_string(),
        reason: reason.to_string(),
    }
}

fn check_summary(night: &NightIdentifier, summary: NightSummary) -> Result<NightSummary> {
    if summary.night != night.to_string() {
        return Err(unavailable(
            night,
            format!("summary is for night {}", summary.night)
        ));
    }
    if summary.exposures.is_empty() {
        return Err(unavailable(night, "no exposures recorded"));
    }
    Ok(summary)
}

/* Night summary service over HTTP */

pub struct HttpNightCatalog {
    url_template: String,
    http_client: reqwest::blocking::Client,
}

impl HttpNightCatalog {
    /// `url_template` must contain `{night}` placeholder
    pub fn new(url_template: &str) -> Result<HttpNightCatalog> {
        if !url_template.contains("{night}") {
            return Err(BiasPrepError::Config(format!(
                "catalog url `{}` has no {{night}} placeholder",
                url_template
            )));
        }

        let http_client = reqwest::blocking::Client::builder()
            .connect_timeout(Duration::from_secs(15))
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| BiasPrepError::Config(e.to_string()))?;

        Ok(HttpNightCatalog {
            url_template: url_template.to_string(),
            http_client,
        })
    }

    pub fn url_for(&self, night: &NightIdentifier) -> String {
        self.url_template.replace("{night}", &night.to_string())
    }
}

impl NightCatalog for HttpNightCatalog {
    fn query_night(&self, night: &NightIdentifier) -> Result<NightSummary> {
        let url = self.url_for(night);
        log::info!("Querying night summary {}", url);

        let response = self.http_client
            .get(&url)
            .send()
            .map_err(|e| unavailable(night, e))?
            .error_for_status()
            .map_err(|e| unavailable(night, e))?;

        let summary: NightSummary = response
            .json()
            .map_err(|e| unavailable(night, e))?;

        check_summary(night, summary)
    }
}

/* Night summary saved on disk */

pub struct FileNightCatalog {
    path: PathBuf,
}

impl FileNightCatalog {
    pub fn new(path: &Path) -> FileNightCatalog {
        FileNightCatalog { path: path.to_path_buf() }
    }
}

impl NightCatalog for FileNightCatalog {
    fn query_night(&self, night: &NightIdentifier) -> Result<NightSummary> {
        log::info!("Reading night summary {}", self.path.display());
        let text = std::fs::read_to_string(&self.path)
            .map_err(|e| unavailable(night, e))?;
        let summary: NightSummary = serde_json::from_str(&text)
            .map_err(|e| unavailable(night, e))?;
        check_summary(night, summary)
    }
}
