use crate::{catalog::*, errors::*};

pub const DEF_FRAME_KIND: &str = "zero";
pub const DEF_MAX_FRAMES: usize = 5;

// frame type tags meaning the same kind of frame
const KIND_ALIASES: &[&[&str]] = &[
    &["zero", "bias"],
];

fn kind_matches(kind: &str, obstype: &str) -> bool {
    let kind = kind.trim().to_lowercase();
    let obstype = obstype.trim().to_lowercase();
    if kind == obstype {
        return true;
    }
    KIND_ALIASES.iter().any(|group|
        group.contains(&kind.as_str()) && group.contains(&obstype.as_str())
    )
}

/// Picks at most `max_count` records of `kind` type.
/// Records are taken in the order the catalog returned them.
pub fn select(
    catalog:   &[ExposureRecord],
    kind:      &str,
    max_count: usize,
) -> Result<Vec<ExposureRecord>> {
    if max_count == 0 {
        return Err(BiasPrepError::Config(
            "maximum number of frames must be greater than zero".to_string()
        ));
    }

    let selection: Vec<_> = catalog
        .iter()
        .filter(|rec| kind_matches(kind, &rec.obstype))
        .take(max_count)
        .cloned()
        .collect();

    if selection.is_empty() {
        return Err(BiasPrepError::Selection {
            kind: kind.to_string(),
            total: catalog.len(),
        });
    }

    log::info!(
        "Selected {} `{}` frames of {} catalog records: {:?}",
        selection.len(),
        kind,
        catalog.len(),
        selection.iter().map(|rec| rec.expnum).collect::<Vec<_>>()
    );

    Ok(selection)
}
