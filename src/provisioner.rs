use std::{path::*, collections::HashMap};
use crate::{
    catalog::*,
    errors::*,
    fits_header::*,
    fs_utils::*,
    progress::*,
    transfer::*,
};

/// Raw frame materialized in staging directory
#[derive(Debug, Clone, PartialEq)]
pub struct LocalFrame {
    pub path: PathBuf,
    pub record: ExposureRecord,
}

/// Fetches selected frames into `target_dir` and patches their headers.
/// Frames are returned in file name order
pub fn provision(
    selection:  &[ExposureRecord],
    target_dir: &Path,
    raw_mask:   &str,
    transfer:   &dyn Transfer,
    patches:    &[HeaderPatch],
    progress:   &mut dyn Progress,
) -> Result<Vec<LocalFrame>> {
    if !target_dir.is_dir() {
        return Err(BiasPrepError::Precondition(target_dir.to_path_buf()));
    }

    progress.stage(&format!(
        "Fetching {} frames into {}...",
        selection.len(),
        target_dir.display()
    ));
    transfer.download(selection, target_dir)?;

    let mut expected: HashMap<String, &ExposureRecord> = selection
        .iter()
        .map(|rec| (rec.local_file_name(), rec))
        .collect();

    // same files as `raw_mask` glob in ingest command expands to
    let files = get_files_list(target_dir, raw_mask, false)
        .map_err(|e| BiasPrepError::Config(e.to_string()))?;

    let mut frames = Vec::new();
    for file in files {
        let file_name = extract_file_name(&file);
        match expected.remove(file_name) {
            Some(rec) => frames.push(LocalFrame {
                path: file.clone(),
                record: rec.clone(),
            }),
            None => log::warn!(
                "{} isn't among selected frames, ignoring it",
                file.display()
            ),
        }
    }

    if let Some(missing) = expected.keys().min() {
        return Err(BiasPrepError::Transfer {
            file_name: missing.clone(),
            reason: format!("no file matching `{}` after transfer", raw_mask),
        });
    }

    progress.stage("Patching frame headers...");
    progress.set_total(frames.len());
    for frame in frames.iter() {
        let patched = patch_header(&frame.path, patches)?;
        let file_name = extract_file_name(&frame.path);
        if patched.is_empty() {
            log::info!("{}: header is fine", file_name);
        } else {
            log::info!("{}: patched {}", file_name, patched.join(", "));
        }
        progress.progress(true, file_name);
    }

    Ok(frames)
}
