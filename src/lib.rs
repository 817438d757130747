#![allow(clippy::new_without_default)]

pub mod errors;
pub mod night;
pub mod catalog;
pub mod frame_selector;
pub mod transfer;
pub mod fits_header;
pub mod provisioner;
pub mod exposure_ids;
pub mod launch_script;
pub mod config;
pub mod workflow;
pub mod fs_utils;
pub mod log_utils;
pub mod progress;
