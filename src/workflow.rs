use anyhow::Context;
use crate::{
    catalog::*,
    config::*,
    exposure_ids::*,
    frame_selector::*,
    launch_script::*,
    log_utils::*,
    night::*,
    progress::*,
    provisioner::*,
    transfer::*,
};

/// What one run produced
#[derive(Debug)]
pub struct RunSummary {
    pub selection: Vec<ExposureRecord>,
    pub frames: Vec<LocalFrame>,
    pub exposure_ids: ExposureIdSet,
    pub script: Option<LaunchScript>,
}

/// External collaborators of the run
pub struct Collaborators<'a> {
    pub catalog: &'a dyn NightCatalog,
    pub transfer: &'a dyn Transfer,
    pub toolchain: &'a dyn CalibrationToolchain,
    pub progress: &'a mut dyn Progress,
}

pub fn create_catalog(source: &CatalogSource) -> anyhow::Result<Box<dyn NightCatalog>> {
    let result: Box<dyn NightCatalog> = match source {
        CatalogSource::Http { url_template } =>
            Box::new(HttpNightCatalog::new(url_template)?),

        CatalogSource::File { path } =>
            Box::new(FileNightCatalog::new(path)),
    };
    Ok(result)
}

/// Query and selection only
pub fn select_frames(
    night:   &NightIdentifier,
    config:  &RunConfig,
    catalog: &dyn NightCatalog,
) -> anyhow::Result<Vec<ExposureRecord>> {
    let time_log = TimeLogger::start();
    let summary = catalog.query_night(night)?;
    time_log.log("night catalog query");
    log::info!(
        "Night {} has {} exposures in catalog",
        night,
        summary.exposures.len()
    );

    let selection = select(&summary.exposures, &config.frame_kind, config.max_frames)?;
    Ok(selection)
}

/// Runs all stages: query, selection, provisioning,
/// exposure ids resolving and launch script writing
pub fn run(
    night:  &NightIdentifier,
    config: &RunConfig,
    collab: Collaborators,
) -> anyhow::Result<RunSummary> {
    config.check()?;
    let raw_glob = config.raw_glob()?;

    let selection = select_frames(night, config, collab.catalog)?;

    let time_log = TimeLogger::start();
    let frames = provision(
        &selection,
        &config.staging_dir,
        &config.raw_mask,
        collab.transfer,
        &config.header_patches,
        collab.progress,
    )?;
    time_log.log("provisioning");

    let exposure_ids = resolve(&frames)?;
    let biasexps_line = exposure_ids.to_biasexps_line();
    log::info!("{}", biasexps_line);

    let composer = LaunchScriptComposer::new(
        collab.toolchain,
        &raw_glob,
        &night.compact(),
    );
    let script = composer.compose(&config.repo_name, &biasexps_line, &config.script_name)?;
    script.write()
        .with_context(|| format!("Writing launch script for night {}", night))?;

    Ok(RunSummary {
        selection,
        frames,
        exposure_ids,
        script: Some(script),
    })
}

/// Query and selection without touching staging directory
pub fn dry_run(
    night:   &NightIdentifier,
    config:  &RunConfig,
    catalog: &dyn NightCatalog,
) -> anyhow::Result<RunSummary> {
    config.check()?;
    let selection = select_frames(night, config, catalog)?;
    let exposure_ids = selection.iter().map(|rec| rec.expnum).collect();
    Ok(RunSummary {
        selection,
        frames: Vec::new(),
        exposure_ids,
        script: None,
    })
}
