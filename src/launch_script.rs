use std::{path::*, io::Write};
use crate::{errors::*, exposure_ids::BIASEXPS_VAR};

pub const DEF_SCRIPT_NAME: &str = "launch.sh";
pub const DETECTOR_PREDICATE: &str = "detector=18";
pub const DATAQUERY_VAR: &str = "DATAQUERY";

const SHEBANG: &str = "#!/bin/bash";

/// Phases of the launch script in the order they have to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ScriptPhase {
    Setup,
    Ingest,
    IdentifierInjection,
    DataQuery,
    PipelineInvocation,
}

impl ScriptPhase {
    pub const ALL: [ScriptPhase; 5] = [
        ScriptPhase::Setup,
        ScriptPhase::Ingest,
        ScriptPhase::IdentifierInjection,
        ScriptPhase::DataQuery,
        ScriptPhase::PipelineInvocation,
    ];
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScriptCommand {
    pub phase: ScriptPhase,
    pub line: String,
    pub log_file: Option<String>,
}

impl ScriptCommand {
    fn new(phase: ScriptPhase, line: String) -> ScriptCommand {
        ScriptCommand { phase, line, log_file: None }
    }

    fn with_log(phase: ScriptPhase, line: String, log_file: String) -> ScriptCommand {
        ScriptCommand { phase, line, log_file: Some(log_file) }
    }
}

/// Command lines of external calibration pipeline
pub trait CalibrationToolchain {
    /// Instrument name as pipeline queries know it
    fn instrument(&self) -> &str;

    /// Creation of calibration repository. Safe to rerun on existing one
    fn setup_commands(&self, repo: &str) -> Vec<String>;

    fn ingest_command(&self, repo: &str, raw_glob: &str, log_file: &str) -> String;

    fn bias_build_command(
        &self,
        repo:      &str,
        query_var: &str,
        run_tag:   &str,
        log_file:  &str,
    ) -> String;
}

/// LSST science pipelines (`butler` and `pipetask`) for DECam
pub struct LsstToolchain {
    pub instrument: String,
    pub instrument_class: String,
    pub input_collections: String,
    pub pipeline: String,
    pub jobs: usize,
}

impl LsstToolchain {
    pub fn decam() -> LsstToolchain {
        LsstToolchain {
            instrument: "DECam".to_string(),
            instrument_class: "lsst.obs.decam.DarkEnergyCamera".to_string(),
            input_collections: "DECam/raw/all,DECam/calib".to_string(),
            pipeline: "$CP_PIPE_DIR/pipelines/DarkEnergyCamera/cpBias.yaml".to_string(),
            jobs: 8,
        }
    }
}

impl CalibrationToolchain for LsstToolchain {
    fn instrument(&self) -> &str {
        &self.instrument
    }

    fn setup_commands(&self, repo: &str) -> Vec<String> {
        vec![
            format!("butler create {}", repo),
            format!("butler register-instrument {} {}", repo, self.instrument_class),
            format!("butler write-curated-calibrations {} {}", repo, self.instrument_class),
        ]
    }

    fn ingest_command(&self, repo: &str, raw_glob: &str, log_file: &str) -> String {
        format!(
            "butler --log-file {} ingest-raws {} {} --transfer link",
            log_file, repo, raw_glob
        )
    }

    fn bias_build_command(
        &self,
        repo:      &str,
        query_var: &str,
        run_tag:   &str,
        log_file:  &str,
    ) -> String {
        format!(
            "pipetask --long-log --log-file {} run -j {} -b {} -i {} -o {}/calib/bias_{} -p {} -d \"${}\" --register-dataset-types",
            log_file,
            self.jobs,
            repo,
            self.input_collections,
            self.instrument,
            run_tag,
            self.pipeline,
            query_var
        )
    }
}

/// Script composed for one run. Never changed after composition
#[derive(Debug, Clone)]
pub struct LaunchScript {
    pub path: PathBuf,
    pub commands: Vec<ScriptCommand>,
}

impl LaunchScript {
    pub fn commands_of(&self, phase: ScriptPhase) -> impl Iterator<Item = &ScriptCommand> + '_ {
        self.commands.iter().filter(move |cmd| cmd.phase == phase)
    }

    pub fn render(&self) -> String {
        let mut text = String::new();
        text.push_str(SHEBANG);
        text.push('\n');
        for cmd in self.commands.iter() {
            text.push_str(&cmd.line);
            text.push('\n');
        }
        text
    }

    /// Writes script and marks it executable. Whole text goes into temporary
    /// file which is renamed to `path` only after it is complete
    pub fn write(&self) -> Result<()> {
        let write_err = |source: std::io::Error| BiasPrepError::ScriptWrite {
            path: self.path.clone(),
            source,
        };

        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };

        let text = self.render();
        let mut tmp_file = tempfile::Builder::new()
            .prefix(".launch")
            .suffix(".tmp")
            .tempfile_in(dir)
            .map_err(write_err)?;
        tmp_file.write_all(text.as_bytes()).map_err(write_err)?;
        tmp_file.flush().map_err(write_err)?;
        set_executable(tmp_file.path()).map_err(write_err)?;
        tmp_file.persist(&self.path).map_err(|e| write_err(e.error))?;

        log::info!("Launch script written into {}", self.path.display());
        Ok(())
    }
}

#[cfg(unix)]
fn set_executable(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
}

#[cfg(not(unix))]
fn set_executable(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

/// Builds five phases of the launch script
pub struct LaunchScriptComposer<'a> {
    toolchain: &'a dyn CalibrationToolchain,
    raw_glob: String,
    run_tag: String,
}

impl<'a> LaunchScriptComposer<'a> {
    /// `raw_glob` is shell glob of staged raw frames,
    /// `run_tag` goes into log file and output collection names
    pub fn new(
        toolchain: &'a dyn CalibrationToolchain,
        raw_glob:  &str,
        run_tag:   &str,
    ) -> LaunchScriptComposer<'a> {
        LaunchScriptComposer {
            toolchain,
            raw_glob: raw_glob.to_string(),
            run_tag: run_tag.to_string(),
        }
    }

    pub fn data_query_line(&self) -> String {
        format!(
            "{}=\"{} AND instrument='{}' AND exposure IN ${}\"",
            DATAQUERY_VAR,
            DETECTOR_PREDICATE,
            self.toolchain.instrument(),
            BIASEXPS_VAR
        )
    }

    pub fn compose(
        &self,
        repo_name:     &str,
        biasexps_line: &str,
        output_path:   &Path,
    ) -> Result<LaunchScript> {
        if !biasexps_line.starts_with(&format!("{}=", BIASEXPS_VAR)) {
            return Err(BiasPrepError::Config(format!(
                "`{}` isn't {} assignment",
                biasexps_line, BIASEXPS_VAR
            )));
        }

        let ingest_log = format!("ingest_{}.log", self.run_tag);
        let bias_log = format!("bias_{}.log", self.run_tag);

        let mut commands: Vec<_> = self.toolchain
            .setup_commands(repo_name)
            .into_iter()
            .map(|line| ScriptCommand::new(ScriptPhase::Setup, line))
            .collect();

        commands.push(ScriptCommand::with_log(
            ScriptPhase::Ingest,
            self.toolchain.ingest_command(repo_name, &self.raw_glob, &ingest_log),
            ingest_log,
        ));

        commands.push(ScriptCommand::new(
            ScriptPhase::IdentifierInjection,
            biasexps_line.to_string(),
        ));

        commands.push(ScriptCommand::new(
            ScriptPhase::DataQuery,
            self.data_query_line(),
        ));

        commands.push(ScriptCommand::with_log(
            ScriptPhase::PipelineInvocation,
            self.toolchain.bias_build_command(
                repo_name,
                DATAQUERY_VAR,
                &self.run_tag,
                &bias_log
            ),
            bias_log,
        ));

        check_commands(&commands)?;

        Ok(LaunchScript {
            path: output_path.to_path_buf(),
            commands,
        })
    }
}

fn check_commands(commands: &[ScriptCommand]) -> Result<()> {
    // line 1 is shebang
    for (idx, cmd) in commands.iter().enumerate() {
        if !cmd.line.is_ascii() {
            return Err(BiasPrepError::Encoding {
                what: format!("line {} of launch script", idx + 2),
                text: cmd.line.clone(),
            });
        }
        if cmd.line.contains(['\n', '\r']) {
            return Err(BiasPrepError::Config(format!(
                "script line {} spans several lines",
                idx + 2
            )));
        }
    }

    let in_order = commands
        .windows(2)
        .all(|pair| pair[0].phase <= pair[1].phase);
    let all_present = ScriptPhase::ALL
        .iter()
        .all(|phase| commands.iter().any(|cmd| cmd.phase == *phase));
    if !in_order || !all_present {
        return Err(BiasPrepError::Config(
            "launch script phases are incomplete or out of order".to_string()
        ));
    }

    Ok(())
}

/// Finds `BIASEXPS=` assignment in rendered script
pub fn parse_biasexps_line(script_text: &str) -> Option<&str> {
    let prefix = format!("{}=", BIASEXPS_VAR);
    script_text
        .lines()
        .find(|line| line.starts_with(&prefix))
}
