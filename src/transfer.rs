use std::{path::*, fs::File, io::{BufWriter, Write}, time::Duration};
use crate::{catalog::*, errors::*, log_utils::*};

pub trait Transfer {
    /// After success every record has a file named
    /// `ExposureRecord::local_file_name` in `dest_dir`
    fn download(&self, records: &[ExposureRecord], dest_dir: &Path) -> Result<()>;
}

fn transfer_error(file_name: &str, reason: impl ToString) -> BiasPrepError {
    BiasPrepError::Transfer {
        file_name: file_name.to_string(),
        reason: reason.to_string(),
    }
}

/// Fetches frames by their locator: `http(s)://` urls are downloaded,
/// `file://` urls and plain paths are copied
pub struct LocatorTransfer {
    http_client: reqwest::blocking::Client,
}

impl LocatorTransfer {
    pub fn new() -> Result<LocatorTransfer> {
        // no read timeout: raw frames are large and the link may be slow
        let http_client = reqwest::blocking::Client::builder()
            .connect_timeout(Duration::from_secs(15))
            .timeout(None)
            .build()
            .map_err(|e| BiasPrepError::Config(e.to_string()))?;
        Ok(LocatorTransfer { http_client })
    }

    fn fetch_http(&self, url: &str, file_name: &str, dest: &Path) -> Result<()> {
        let mut response = self.http_client
            .get(url)
            .send()
            .and_then(|resp| resp.error_for_status())
            .map_err(|e| transfer_error(file_name, e))?;

        // partial downloads must not look like raw frames
        let part_file = dest.with_file_name(format!("{}.part", file_name));
        let result = File::create(&part_file)
            .map_err(|e| transfer_error(file_name, e))
            .and_then(|file| {
                let mut writer = BufWriter::new(file);
                response.copy_to(&mut writer).map_err(|e| transfer_error(file_name, e))?;
                writer.flush().map_err(|e| transfer_error(file_name, e))
            })
            .and_then(|_| {
                std::fs::rename(&part_file, dest).map_err(|e| transfer_error(file_name, e))
            });

        if result.is_err() {
            let _ = std::fs::remove_file(&part_file);
        }
        result
    }

    fn fetch_local(&self, src: &Path, file_name: &str, dest: &Path) -> Result<()> {
        // copying file onto itself truncates it
        if let (Ok(src), Ok(dest)) = (src.canonicalize(), dest.canonicalize()) {
            if src == dest {
                return Ok(());
            }
        }
        std::fs::copy(src, dest).map_err(|e|
            transfer_error(file_name, format!("{}: {}", src.display(), e))
        )?;
        Ok(())
    }
}

impl Transfer for LocatorTransfer {
    fn download(&self, records: &[ExposureRecord], dest_dir: &Path) -> Result<()> {
        for rec in records {
            let file_name = rec.local_file_name();
            if file_name.is_empty() {
                return Err(transfer_error(&rec.url, "can't derive local file name"));
            }
            let dest = dest_dir.join(&file_name);
            if dest.exists() {
                log::warn!("{} already exists, overwriting", dest.display());
            }

            log::info!("Fetching exposure {} from {}", rec.expnum, rec.url);
            let time_log = TimeLogger::start();
            if rec.url.starts_with("http://") || rec.url.starts_with("https://") {
                self.fetch_http(&rec.url, &file_name, &dest)?;
            } else {
                let src = rec.url.strip_prefix("file://").unwrap_or(&rec.url);
                self.fetch_local(Path::new(src), &file_name, &dest)?;
            }
            time_log.log(&format!("fetching {}", file_name));
        }
        Ok(())
    }
}
