use std::{ffi::CString, path::*};
use fitsio::FitsFile;
use serde::*;
use crate::errors::*;

/// Integer exposure identifier in primary header
pub const EXPNUM_KEY: &str = "EXPNUM";

const PATCH_COMMENT: &str = "value filled by nightly_bias";

/// Float header value to fill when it is missing or not a number
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct HeaderPatch {
    pub key: String,
    pub fill_value: f64,
}

// Environmental readings the ingest requires to be valid numbers.
// Weather station outages leave them empty or `NaN` in raw frames
const DEF_HEADER_PATCHES: &[(&str, f64)] = &[
    // key     |fill value
    ("OUTTEMP",  0.0),
    ("OUTHUMID", 0.0),
    ("OUTPRESS", 0.0),
    ("WINDSPD",  0.0),
    ("WINDDIR",  0.0),
];

pub fn default_header_patches() -> Vec<HeaderPatch> {
    DEF_HEADER_PATCHES
        .iter()
        .map(|(key, fill_value)| HeaderPatch {
            key: key.to_string(),
            fill_value: *fill_value,
        })
        .collect()
}

fn parse_fits_float(text: &str) -> Option<f64> {
    let text = text.trim().trim_matches('\'').trim();
    // FITS allows `D` as exponent letter
    let text = text.replace(['D', 'd'], "E");
    text.parse::<f64>().ok().filter(|v| v.is_finite())
}

fn open_read_only(path: &Path) -> Result<FitsFile> {
    FitsFile::open(path).map_err(|e| BiasPrepError::corrupted(path, e))
}

/// Reads `EXPNUM` from primary header
pub fn read_exposure_number(path: &Path) -> Result<i64> {
    let mut fptr = open_read_only(path)?;
    let hdu = fptr.primary_hdu().map_err(|e| BiasPrepError::corrupted(path, e))?;
    hdu.read_key::<i64>(&mut fptr, EXPNUM_KEY)
        .map_err(|_| BiasPrepError::MetadataMissing {
            path: path.to_path_buf(),
            key: EXPNUM_KEY.to_string(),
        })
}

/// Patches which have to be applied to file header
pub fn find_header_defects<'a>(
    path:    &Path,
    patches: &'a [HeaderPatch],
) -> Result<Vec<&'a HeaderPatch>> {
    let mut fptr = open_read_only(path)?;
    let hdu = fptr.primary_hdu().map_err(|e| BiasPrepError::corrupted(path, e))?;
    let mut result = Vec::new();
    for patch in patches {
        let value = hdu.read_key::<String>(&mut fptr, &patch.key).ok();
        let is_valid = value.as_deref().and_then(parse_fits_float).is_some();
        if !is_valid {
            log::debug!(
                "{}: {} = {:?} needs patching",
                path.display(),
                patch.key,
                value
            );
            result.push(patch);
        }
    }
    Ok(result)
}

fn update_float_key(fptr: &mut FitsFile, key: &str, value: f64) -> anyhow::Result<()> {
    let key = CString::new(key)?;
    let comment = CString::new(PATCH_COMMENT)?;
    let mut status = 0;
    // `ffukyd` modifies existing card or appends new one
    unsafe {
        fitsio::sys::ffukyd(
            fptr.as_raw(),
            key.as_ptr(),
            value,
            -12,
            comment.as_ptr(),
            &mut status
        );
        fitsio::sys::ffflus(fptr.as_raw(), &mut status);
    }
    fitsio::errors::check_status(status)?;
    Ok(())
}

/// Fixes known header defects in place and returns keys which were patched.
/// File is opened for writing only if something has to be patched,
/// so patching already patched file doesn't touch it
pub fn patch_header(path: &Path, patches: &[HeaderPatch]) -> Result<Vec<String>> {
    let defects = find_header_defects(path, patches)?;
    if defects.is_empty() {
        return Ok(Vec::new());
    }

    let mut fptr = FitsFile::edit(path).map_err(|e| BiasPrepError::corrupted(path, e))?;
    let mut patched = Vec::new();
    for patch in defects {
        update_float_key(&mut fptr, &patch.key, patch.fill_value)
            .map_err(|e| BiasPrepError::corrupted(path, e))?;
        patched.push(patch.key.clone());
    }
    Ok(patched)
}
