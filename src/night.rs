use std::fmt;
use chrono::prelude::*;
use crate::errors::*;

const NIGHT_FORMAT: &str = "%Y-%m-%d";

/// Observing night (calendar date of the evening the night started)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct NightIdentifier(NaiveDate);

impl NightIdentifier {
    pub fn parse(text: &str) -> Result<NightIdentifier> {
        let text = text.trim();
        let date = NaiveDate::parse_from_str(text, NIGHT_FORMAT)
            .map_err(|_| BiasPrepError::InvalidNight(text.to_string()))?;

        // chrono accepts single-digit month and day, the night token doesn't
        if date.format(NIGHT_FORMAT).to_string() != text {
            return Err(BiasPrepError::InvalidNight(text.to_string()));
        }

        Ok(NightIdentifier(date))
    }

    /// `YYYYMMDD` form used in log file and collection names
    pub fn compact(&self) -> String {
        self.0.format("%Y%m%d").to_string()
    }
}

impl fmt::Display for NightIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format(NIGHT_FORMAT))
    }
}

impl std::str::FromStr for NightIdentifier {
    type Err = BiasPrepError;

    fn from_str(s: &str) -> Result<Self> {
        NightIdentifier::parse(s)
    }
}
