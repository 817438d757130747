use std::path::*;
use itertools::Itertools;

pub const DEF_RAW_MASK: &str = "*.fits.fz";

pub fn file_mask_to_regex_str(text: &str) -> String {
    let mut result = String::new();
    for sym in text.chars() {
        match sym {
            '.' | '\\' | '[' | ']' | '(' | ')' |
            '{' | '}' | '^' | '$' | '|' | '+' => {
                    result.push('\\');
                    result.push(sym)
                },

            '?' =>
                result.push('.'),

            '*' =>
                result.push_str(".+"),

            _ =>
                result.push(sym)
        }
    }
    result
}

/// Regex for `;` separated list of masks like `*.fits.fz;*.fz`.
/// Case sensitive matching follows what shell glob expands to
pub fn create_regex_for_masks(masks: &str, case_insensitive: bool) -> anyhow::Result<regex::Regex> {
    let masks = masks.trim();
    if masks.is_empty() {
        return Ok(regex::Regex::new(".*")?);
    }
    let regex_str = masks
        .split(';')
        .map(|s| file_mask_to_regex_str(s.trim()))
        .map(|s| format!("(?:^{}$)", s))
        .join("|");

    let regex_str = if case_insensitive {
        format!("(?i){}", regex_str) // (?i) - case insensitive flag
    } else {
        regex_str
    };
    let res = regex::Regex::new(&regex_str)?;
    Ok(res)
}

/// Files of `path` directory matching `masks`, sorted by file name
pub fn get_files_list(
    path:             &Path,
    masks:            &str,
    case_insensitive: bool,
) -> anyhow::Result<Vec<PathBuf>> {
    let r = create_regex_for_masks(masks, case_insensitive)?;
    let mut result = Vec::new();
    for entry in std::fs::read_dir(path)? {
        let path = entry?.path();
        if path.is_file() && r.is_match(extract_file_name(&path)) {
            result.push(path);
        }
    }
    result.sort_by(|a, b| extract_file_name(a).cmp(extract_file_name(b)));
    Ok(result)
}

pub fn extract_file_name(path: &Path) -> &str {
    path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("")
}
