use std::path::*;
use flexi_logger::*;

pub struct TimeLogger {
    start_time: std::time::Instant,
}

impl TimeLogger {
    pub fn start() -> TimeLogger {
        TimeLogger { start_time: std::time::Instant::now() }
    }

    pub fn log(self, text: &str) {
        let time = self.start_time.elapsed().as_secs_f64();
        log::info!("BENCH {} time = {:.6} s", text, time);
    }
}

/// Starts logging into files of `log_path` directory.
/// Logging stops when returned handle is dropped
pub fn start_logger(log_path: &Path) -> anyhow::Result<LoggerHandle> {
    if !log_path.exists() {
        std::fs::create_dir_all(log_path)?;
    }

    let handle = Logger::try_with_env_or_str("info")?
        .log_to_file(FileSpec::default().directory(log_path))
        .duplicate_to_stderr(Duplicate::Warn)
        .format_for_files(detailed_format)
        .rotate(
            Criterion::Size(4 * 1024 * 1024),
            Naming::Timestamps,
            Cleanup::KeepLogFiles(10),
        )
        .start()?;

    Ok(handle)
}
