//! Probe catalog (probes.yml).
//!
//! Each entry describes one diagnostic tool and the command that implements
//! it on every supported platform. Only the running platform's command is
//! registered; the engine never branches on the OS after startup.

use crate::error::ToolError;
use crate::tools::probe::ScriptProbe;
use crate::tools::traits::{ToolDefinition, ToolParameter};
use crate::tools::ToolRegistry;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Placeholder substituted with the configured probes directory.
const PROBES_DIR_VAR: &str = "{probes_dir}";

/// Per-platform command lines (program first).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlatformCommands {
    #[serde(default)]
    pub linux: Option<Vec<String>>,
    #[serde(default)]
    pub macos: Option<Vec<String>>,
    #[serde(default)]
    pub windows: Option<Vec<String>>,
}

impl PlatformCommands {
    /// Command for `os` (as in `std::env::consts::OS`).
    pub fn for_os(&self, os: &str) -> Option<&[String]> {
        match os {
            "linux" => self.linux.as_deref(),
            "macos" => self.macos.as_deref(),
            "windows" => self.windows.as_deref(),
            _ => None,
        }
    }
}

/// One catalog entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeSpec {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub layer: Option<u8>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub parameters: Vec<ToolParameter>,
    pub command: PlatformCommands,
}

impl ProbeSpec {
    pub fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: self.parameters.clone(),
            layer: self.layer,
            timeout: self.timeout_secs.map(Duration::from_secs),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProbeCatalog {
    pub probes: Vec<ProbeSpec>,
}

impl ProbeCatalog {
    /// Load from YAML, or fall back to the built-in catalog if absent.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No probe catalog at {:?}, using built-in catalog", path);
            return Self::builtin();
        }
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read probe catalog {}", path.display()))?;
        Self::from_yaml(&contents)
            .with_context(|| format!("Failed to parse probe catalog {}", path.display()))
    }

    pub fn from_yaml(contents: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(contents)?)
    }

    /// The five ladder probes plus two targeted helpers.
    pub fn builtin() -> Result<Self> {
        Self::from_yaml(BUILTIN_CATALOG).context("Built-in probe catalog is invalid")
    }

    /// Register every probe that has a command for `os`.
    ///
    /// Returns how many tools were registered. Probes without a command for
    /// this platform are skipped with a warning.
    pub fn register_for_os(
        &self,
        registry: &mut ToolRegistry,
        os: &str,
        probes_dir: &str,
    ) -> Result<usize, ToolError> {
        let mut registered = 0;
        for spec in &self.probes {
            let Some(command) = spec.command.for_os(os) else {
                warn!("Probe '{}' has no command for {}; skipping", spec.name, os);
                continue;
            };
            let command: Vec<String> = command
                .iter()
                .map(|part| part.replace(PROBES_DIR_VAR, probes_dir))
                .collect();
            let Some(probe) = ScriptProbe::from_command(&command) else {
                warn!("Probe '{}' has an empty command for {}; skipping", spec.name, os);
                continue;
            };
            registry.register(spec.definition(), Arc::new(probe))?;
            registered += 1;
        }
        info!("Registered {} probes for {}", registered, os);
        Ok(registered)
    }
}

const BUILTIN_CATALOG: &str = r#"
probes:
  - name: check_adapter_status
    description: Report whether the network adapter is present, enabled and has a link (layer 1, physical).
    layer: 1
    timeout_secs: 10
    parameters:
      - name: interface
        type: string
        description: Adapter name; empty means the primary adapter
        default: ""
        aliases: [adapter, iface, nic]
    command:
      linux: [sh, "{probes_dir}/linux/check_adapter_status.sh"]
      macos: [sh, "{probes_dir}/macos/check_adapter_status.sh"]
      windows: [powershell, -NoProfile, -ExecutionPolicy, Bypass, -File, "{probes_dir}\\windows\\check_adapter_status.ps1"]

  - name: get_ip_config
    description: Report the adapter's IP address, netmask and DHCP lease (layer 2, link).
    layer: 2
    timeout_secs: 10
    parameters:
      - name: interface
        type: string
        description: Adapter name; empty means the primary adapter
        default: ""
        aliases: [adapter, iface, nic]
    command:
      linux: [sh, "{probes_dir}/linux/get_ip_config.sh"]
      macos: [sh, "{probes_dir}/macos/get_ip_config.sh"]
      windows: [powershell, -NoProfile, -ExecutionPolicy, Bypass, -File, "{probes_dir}\\windows\\get_ip_config.ps1"]

  - name: ping_gateway
    description: Ping the default gateway (layer 3, network).
    layer: 3
    timeout_secs: 20
    parameters:
      - name: count
        type: integer
        description: Number of echo requests
        default: 4
    command:
      linux: [sh, "{probes_dir}/linux/ping_gateway.sh"]
      macos: [sh, "{probes_dir}/macos/ping_gateway.sh"]
      windows: [powershell, -NoProfile, -ExecutionPolicy, Bypass, -File, "{probes_dir}\\windows\\ping_gateway.ps1"]

  - name: test_dns_resolution
    description: Resolve a hostname through the configured DNS servers (layer 4, resolution).
    layer: 4
    timeout_secs: 15
    parameters:
      - name: hostname
        type: string
        description: Name to resolve
        default: "example.com"
        aliases: [host, domain, name]
    command:
      linux: [sh, "{probes_dir}/linux/test_dns_resolution.sh"]
      macos: [sh, "{probes_dir}/macos/test_dns_resolution.sh"]
      windows: [powershell, -NoProfile, -ExecutionPolicy, Bypass, -File, "{probes_dir}\\windows\\test_dns_resolution.ps1"]

  - name: test_connectivity
    description: Fetch a well-known endpoint over HTTPS (layer 5, application).
    layer: 5
    timeout_secs: 20
    parameters:
      - name: url
        type: string
        description: Endpoint to fetch
        default: "https://www.google.com"
        aliases: [target, endpoint]
    command:
      linux: [sh, "{probes_dir}/linux/test_connectivity.sh"]
      macos: [sh, "{probes_dir}/macos/test_connectivity.sh"]
      windows: [powershell, -NoProfile, -ExecutionPolicy, Bypass, -File, "{probes_dir}\\windows\\test_connectivity.ps1"]

  - name: ping_address
    description: Ping an arbitrary host to check reachability.
    timeout_secs: 20
    parameters:
      - name: host
        type: string
        description: Hostname or IP address
        required: true
        aliases: [target, address, ip]
      - name: count
        type: integer
        description: Number of echo requests
        default: 4
    command:
      linux: [sh, "{probes_dir}/linux/ping_address.sh"]
      macos: [sh, "{probes_dir}/macos/ping_address.sh"]
      windows: [powershell, -NoProfile, -ExecutionPolicy, Bypass, -File, "{probes_dir}\\windows\\ping_address.ps1"]

  - name: traceroute
    description: Trace the route to a host to find where packets stop.
    timeout_secs: 60
    parameters:
      - name: host
        type: string
        description: Hostname or IP address
        required: true
        aliases: [target, address, ip]
      - name: max_hops
        type: integer
        description: Maximum hop count
        default: 20
    command:
      linux: [sh, "{probes_dir}/linux/traceroute.sh"]
      macos: [sh, "{probes_dir}/macos/traceroute.sh"]
      windows: [powershell, -NoProfile, -ExecutionPolicy, Bypass, -File, "{probes_dir}\\windows\\traceroute.ps1"]
"#;
