//! Runtime drivers: the periodic scan loop and manual flush triggers.

pub mod scan;
pub mod trigger;

pub use scan::{ItemSource, ScanLoop, ScanSummary};
pub use trigger::spawn_manual_flush;
