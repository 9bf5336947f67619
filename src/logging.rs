//! Logging init: `log` + `colog`, generalized from a single `-v`
//! switch to the five-level `--log-level` scale.

use crate::config::LogLevel;

pub fn init(level: LogLevel) {
    let mut builder = colog::builder();
    builder.filter(None, level.to_filter());
    builder.init();
}
