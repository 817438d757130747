use std::path::*;
use clap::Parser;
use nightly_bias::{
    config::*,
    launch_script::*,
    log_utils::*,
    night::*,
    progress::*,
    transfer::*,
    workflow::*,
};

/// Prepare creation of a master bias for a given night
#[derive(Parser, Debug)]
#[command(version, about)]
struct Opt {
    /// Observing night in YYYY-MM-DD format
    caldat: String,

    /// Butler repository name
    #[arg(long = "repo-name", alias = "repo_name")]
    repo_name: Option<String>,

    /// Output name for bias creation script
    #[arg(long = "script-name", alias = "script_name")]
    script_name: Option<PathBuf>,

    /// Existing directory to download raw frames into
    #[arg(long = "staging-dir", alias = "staging_dir")]
    staging_dir: Option<PathBuf>,

    /// Maximum number of zero frames to use
    #[arg(long = "max-frames", alias = "max_frames")]
    max_frames: Option<usize>,

    /// Night summary service url, `{night}` is replaced with night
    #[arg(long = "catalog-url", conflicts_with = "catalog_file")]
    catalog_url: Option<String>,

    /// Night summary JSON file to use instead of service
    #[arg(long = "catalog-file")]
    catalog_file: Option<PathBuf>,

    /// Config file (JSON)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Path for saving log files
    #[arg(long = "log-path", alias = "log_path")]
    log_path: Option<PathBuf>,

    /// Only query catalog and show selected frames
    #[arg(long)]
    dry_run: bool,

    /// Don't show progress bar
    #[arg(long, short)]
    quiet: bool,
}

impl Opt {
    fn apply_to(&self, config: &mut RunConfig) {
        if let Some(repo_name) = &self.repo_name {
            config.repo_name = repo_name.clone();
        }
        if let Some(script_name) = &self.script_name {
            config.script_name = script_name.clone();
        }
        if let Some(staging_dir) = &self.staging_dir {
            config.staging_dir = staging_dir.clone();
        }
        if let Some(max_frames) = self.max_frames {
            config.max_frames = max_frames;
        }
        if let Some(url_template) = &self.catalog_url {
            config.catalog = CatalogSource::Http { url_template: url_template.clone() };
        }
        if let Some(path) = &self.catalog_file {
            config.catalog = CatalogSource::File { path: path.clone() };
        }
    }
}

fn main() -> anyhow::Result<()> {
    let opt = Opt::parse();

    let _logger = match &opt.log_path {
        Some(log_path) => Some(start_logger(log_path)?),
        None => None,
    };
    log::info!(
        "Application {} {} started. Options = {:#?}",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        opt
    );

    let night = NightIdentifier::parse(&opt.caldat)?;

    let mut config = match &opt.config {
        Some(file_name) => RunConfig::load(file_name)?,
        None => RunConfig::load_default()?,
    };
    opt.apply_to(&mut config);

    let catalog = create_catalog(&config.catalog)?;

    if opt.dry_run {
        let summary = dry_run(&night, &config, catalog.as_ref())?;
        for rec in summary.selection.iter() {
            println!(
                "{:>8}  {:<6}  {}  {}",
                rec.expnum,
                rec.obstype,
                rec.date_obs,
                rec.local_file_name()
            );
        }
        println!("{}", summary.exposure_ids.to_biasexps_line());
        return Ok(());
    }

    let transfer = LocatorTransfer::new()?;
    let toolchain = LsstToolchain::decam();
    let mut progress_console = ProgressConsole::new();
    let mut progress_log = ProgressLog;
    let progress: &mut dyn Progress = if opt.quiet {
        &mut progress_log
    } else {
        &mut progress_console
    };

    let summary = run(&night, &config, Collaborators {
        catalog: catalog.as_ref(),
        transfer: &transfer,
        toolchain: &toolchain,
        progress,
    })?;

    let script_name = summary.script
        .as_ref()
        .map(|script| script.path.display().to_string())
        .unwrap_or_default();
    log::info!(
        "Script {} created for exposures {}",
        script_name,
        summary.exposure_ids.to_tuple_str()
    );
    println!("{} written, exposures {}", script_name, summary.exposure_ids.to_tuple_str());

    Ok(())
}
