use std::collections::BTreeSet;
use itertools::Itertools;
use crate::{errors::*, fits_header::*, provisioner::*};

pub const BIASEXPS_VAR: &str = "BIASEXPS";

/// Unique exposure identifiers of one run, always in ascending order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExposureIdSet {
    ids: BTreeSet<i64>,
}

impl ExposureIdSet {
    pub fn new() -> ExposureIdSet {
        ExposureIdSet { ids: BTreeSet::new() }
    }

    pub fn insert(&mut self, id: i64) -> bool {
        self.ids.insert(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// `(101, 115, 120)` - collection literal for pipeline query
    pub fn to_tuple_str(&self) -> String {
        format!("({})", self.ids.iter().join(", "))
    }

    /// `BIASEXPS="(101, 115, 120)"` shell assignment
    pub fn to_biasexps_line(&self) -> String {
        format!("{}=\"{}\"", BIASEXPS_VAR, self.to_tuple_str())
    }
}

impl FromIterator<i64> for ExposureIdSet {
    fn from_iter<T: IntoIterator<Item = i64>>(iter: T) -> Self {
        ExposureIdSet { ids: iter.into_iter().collect() }
    }
}

/// Reads `EXPNUM` of every provisioned frame
pub fn resolve(frames: &[LocalFrame]) -> Result<ExposureIdSet> {
    let mut result = ExposureIdSet::new();
    for frame in frames {
        let expnum = read_exposure_number(&frame.path)?;
        if expnum != frame.record.expnum {
            log::warn!(
                "{}: header {} = {} but catalog says {}",
                frame.path.display(),
                EXPNUM_KEY,
                expnum,
                frame.record.expnum
            );
        }
        if !result.insert(expnum) {
            log::warn!("Exposure {} met more than once", expnum);
        }
    }
    Ok(result)
}

/// Same as `resolve` but gives `BIASEXPS="(...)"` line
pub fn resolve_biasexps_line(frames: &[LocalFrame]) -> Result<String> {
    Ok(resolve(frames)?.to_biasexps_line())
}
