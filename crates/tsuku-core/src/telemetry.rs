use std::fs;
use std::io::Write;

use crate::config::{self, TsukuHome};
use crate::userconfig::UserConfig;

/// Message displayed to users on first run.
const NOTICE_TEXT: &str = "tsuku collects anonymous usage statistics to improve the tool.\n\
No personal information is collected. See: https://tsuku.dev/telemetry\n\
\n\
To opt out: export TSUKU_NO_TELEMETRY=1\n";

/// Shows the telemetry notice on first run: prints to the writer and drops
/// a marker file so it never repeats. Honors `TSUKU_NO_TELEMETRY` and a
/// `telemetry = false` user config, and fails silently on I/O problems.
pub fn show_notice_if_needed(home: &TsukuHome, out: &mut impl Write) {
    if std::env::var(config::ENV_NO_TELEMETRY)
        .map(|v| !v.is_empty())
        .unwrap_or(false)
    {
        return;
    }
    if matches!(UserConfig::load(home), Ok(config) if !config.telemetry) {
        return;
    }
    let marker = home.notice_marker_path();
    if marker.exists() {
        return;
    }
    let _ = out.write_all(NOTICE_TEXT.as_bytes());
    if fs::create_dir_all(home.root()).is_ok() {
        let _ = fs::write(&marker, b"");
    }
}
