//! Probe scripts shipped with the binary, installed by `troubleshooter init`.

use anyhow::{Context, Result};
use std::path::Path;
use tracing::debug;

macro_rules! script {
    ($path:literal) => {
        ($path, include_str!(concat!("../../probes/", $path)))
    };
}

/// (path relative to the probes directory, contents)
pub const SCRIPTS: &[(&str, &str)] = &[
    script!("common.sh"),
    script!("linux/check_adapter_status.sh"),
    script!("linux/get_ip_config.sh"),
    script!("linux/ping_gateway.sh"),
    script!("linux/test_dns_resolution.sh"),
    script!("linux/test_connectivity.sh"),
    script!("linux/ping_address.sh"),
    script!("linux/traceroute.sh"),
    script!("macos/check_adapter_status.sh"),
    script!("macos/get_ip_config.sh"),
    script!("macos/ping_gateway.sh"),
    script!("macos/test_dns_resolution.sh"),
    script!("macos/test_connectivity.sh"),
    script!("macos/ping_address.sh"),
    script!("macos/traceroute.sh"),
    script!("windows/common.ps1"),
    script!("windows/check_adapter_status.ps1"),
    script!("windows/get_ip_config.ps1"),
    script!("windows/ping_gateway.ps1"),
    script!("windows/test_dns_resolution.ps1"),
    script!("windows/test_connectivity.ps1"),
    script!("windows/ping_address.ps1"),
    script!("windows/traceroute.ps1"),
];

/// Write every script under `dir`. Existing files are kept unless `force`.
///
/// Returns how many files were written.
pub fn install(dir: &Path, force: bool) -> Result<usize> {
    let mut written = 0;
    for (relative, contents) in SCRIPTS {
        let path = dir.join(relative);
        if path.exists() && !force {
            debug!("Keeping existing probe script {}", path.display());
            continue;
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        std::fs::write(&path, contents)
            .with_context(|| format!("Failed to write probe script {}", path.display()))?;
        written += 1;
    }
    Ok(written)
}
