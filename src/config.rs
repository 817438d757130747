use std::path::*;
use serde::*;
use crate::{
    errors::*,
    fits_header::*,
    frame_selector::*,
    fs_utils::*,
    launch_script::*,
};

pub const DEF_REPO_NAME: &str = "repo";
pub const DEF_STAGING_DIR: &str = "raw";
/// Placeholder location of night summary service. Service must answer
/// with `NightSummary` JSON and is provided by deployment, so real runs
/// set `--catalog-url`, `--catalog-file` or `catalog` in config file
pub const DEF_CATALOG_URL: &str =
    "https://astroarchive.noirlab.edu/api/nightsum/decam/{night}/";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum CatalogSource {
    /// Night summary service, `{night}` is replaced with `YYYY-MM-DD`
    Http { url_template: String },

    /// Night summary saved as JSON file
    File { path: PathBuf },
}

/// Everything one run needs besides the night itself
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct RunConfig {
    pub repo_name: String,
    pub script_name: PathBuf,
    pub staging_dir: PathBuf,
    pub max_frames: usize,
    pub frame_kind: String,
    pub raw_mask: String,
    pub catalog: CatalogSource,
    pub header_patches: Vec<HeaderPatch>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            repo_name: DEF_REPO_NAME.to_string(),
            script_name: PathBuf::from(DEF_SCRIPT_NAME),
            staging_dir: PathBuf::from(DEF_STAGING_DIR),
            max_frames: DEF_MAX_FRAMES,
            frame_kind: DEF_FRAME_KIND.to_string(),
            raw_mask: DEF_RAW_MASK.to_string(),
            catalog: CatalogSource::Http {
                url_template: DEF_CATALOG_URL.to_string()
            },
            header_patches: default_header_patches(),
        }
    }
}

impl RunConfig {
    pub fn load(file_name: &Path) -> anyhow::Result<RunConfig> {
        let conf_str = std::fs::read_to_string(file_name)?;
        let config: RunConfig = serde_json::from_str(&conf_str)?;
        config.check()?;
        Ok(config)
    }

    /// Loads config from default location if it exists
    pub fn load_default() -> anyhow::Result<RunConfig> {
        let file_name = Self::get_file_name()?;
        if !file_name.is_file() {
            return Ok(RunConfig::default());
        }
        log::info!("Loading config {}", file_name.display());
        Self::load(&file_name)
    }

    pub fn get_file_name() -> anyhow::Result<PathBuf> {
        let mut conf_dir = get_app_conf_dir()?;
        conf_dir.push("config.json");
        Ok(conf_dir)
    }

    pub fn check(&self) -> Result<()> {
        if self.max_frames == 0 {
            return Err(BiasPrepError::Config("max_frames must be at least 1".to_string()));
        }
        if self.repo_name.trim().is_empty() {
            return Err(BiasPrepError::Config("repo_name is empty".to_string()));
        }
        if self.script_name.as_os_str().is_empty() {
            return Err(BiasPrepError::Config("script_name is empty".to_string()));
        }
        if self.raw_mask.trim().is_empty() {
            return Err(BiasPrepError::Config("raw_mask is empty".to_string()));
        }
        // ingest command gets exactly one glob
        if self.raw_mask.contains(';') {
            return Err(BiasPrepError::Config(format!(
                "raw_mask `{}` must be a single mask",
                self.raw_mask
            )));
        }
        Ok(())
    }

    /// Shell glob of staged raw frames for ingest command
    pub fn raw_glob(&self) -> Result<String> {
        let dir = self.staging_dir.to_str().ok_or_else(|| BiasPrepError::Encoding {
            what: "staging_dir".to_string(),
            text: self.staging_dir.to_string_lossy().into_owned(),
        })?;
        Ok(format!("{}/{}", dir.trim_end_matches('/'), self.raw_mask.trim()))
    }
}

pub fn get_app_conf_dir() -> anyhow::Result<PathBuf> {
    let mut conf_dir = dirs::data_local_dir()
        .ok_or_else(|| anyhow::anyhow!("Can't find local data directory"))?;
    conf_dir.push("nightly-bias");
    Ok(conf_dir)
}
