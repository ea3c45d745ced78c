use super::{
    BiosInfo, CpuIdentity, CpuLoad, CpuTemperature, FilesystemInfo, HardwareIdentity,
    InterfaceStats, MemoryInfo, NetworkInterface, OsInfo, ProviderError, SoftwareVersions,
    TelemetryProvider, TimeInfo,
};
use async_trait::async_trait;
use futures::future::join_all;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use sysinfo::{ComponentExt, CpuExt, DiskExt, NetworkExt, NetworksExt, System, SystemExt};
use tokio::process::Command;
use tracing::debug;

/// Gap between the two CPU refreshes a usage reading needs.
const CPU_SAMPLE_GAP: Duration = Duration::from_millis(250);

const DMI_ROOT: &str = "/sys/class/dmi/id";
const NET_ROOT: &str = "/sys/class/net";

/// Tools whose version ends up in a snapshot, with the commands probed for
/// each (first one that answers wins).
const VERSION_PROBES: &[(&str, &[&[&str]])] = &[
    ("bash", &[&["bash", "--version"]]),
    ("apache", &[&["apache2", "-v"], &["httpd", "-v"]]),
    ("php", &[&["php", "-v"]]),
    ("nginx", &[&["nginx", "-v"]]),
    ("node", &[&["node", "-v"]]),
    ("npm", &[&["npm", "-v"]]),
    ("docker", &[&["docker", "--version"]]),
    ("mysql", &[&["mysql", "--version"]]),
];

/// Reads the local host through sysinfo, sysfs and a handful of commands.
pub struct HostProvider {
    system: Arc<Mutex<System>>,
}

impl Default for HostProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl HostProvider {
    pub fn new() -> Self {
        Self {
            system: Arc::new(Mutex::new(System::new())),
        }
    }

    async fn query<T, F>(&self, f: F) -> Result<T, ProviderError>
    where
        F: FnOnce(&mut System) -> T + Send + 'static,
        T: Send + 'static,
    {
        let system = Arc::clone(&self.system);
        tokio::task::spawn_blocking(move || {
            let mut guard = system
                .lock()
                .map_err(|_| ProviderError::Unavailable("sysinfo state lock poisoned".to_string()))?;
            Ok(f(&mut guard))
        })
        .await
        .map_err(|err| ProviderError::Unavailable(format!("sysinfo task failed: {err}")))?
    }
}

#[async_trait]
impl TelemetryProvider for HostProvider {
    async fn uptime(&self) -> Result<TimeInfo, ProviderError> {
        self.query(|system| TimeInfo {
            uptime_secs: system.uptime(),
        })
        .await
    }

    async fn memory(&self) -> Result<MemoryInfo, ProviderError> {
        self.query(|system| {
            system.refresh_memory();
            MemoryInfo {
                total: system.total_memory(),
                available: system.available_memory(),
                swap_total: system.total_swap(),
                swap_used: system.used_swap(),
            }
        })
        .await
    }

    async fn cpu_identity(&self) -> Result<CpuIdentity, ProviderError> {
        self.query(|system| {
            system.refresh_cpu();
            let first = system.cpus().first();
            CpuIdentity {
                manufacturer: first.map(|c| vendor_name(c.vendor_id())),
                brand: first.map(|c| c.brand().trim().to_string()),
                cores: system.cpus().len() as u32,
            }
        })
        .await
    }

    async fn cpu_load(&self) -> Result<CpuLoad, ProviderError> {
        self.query(|system| system.refresh_cpu()).await?;
        tokio::time::sleep(CPU_SAMPLE_GAP).await;
        self.query(|system| {
            system.refresh_cpu();
            let current_load = if system.cpus().is_empty() {
                None
            } else {
                let sum: f32 = system.cpus().iter().map(|c| c.cpu_usage()).sum();
                Some((sum / system.cpus().len() as f32) as f64)
            };
            CpuLoad { current_load }
        })
        .await
    }

    async fn cpu_temperature(&self) -> Result<CpuTemperature, ProviderError> {
        let mut temps = self
            .query(|system| {
                system.refresh_components_list();
                system
                    .components()
                    .iter()
                    .map(|c| (c.label().to_string(), c.temperature() as f64))
                    .filter(|(_, t)| *t > 0.0)
                    .collect::<Vec<_>>()
            })
            .await?;
        temps.extend(thermal_zone_temps());

        let main = pick_cpu_temperature(&temps).map(|t| (t * 10.0).round() / 10.0);
        Ok(CpuTemperature { main })
    }

    async fn filesystems(&self) -> Result<Vec<FilesystemInfo>, ProviderError> {
        self.query(|system| {
            system.refresh_disks_list();
            system
                .disks()
                .iter()
                .map(|d| {
                    let size = d.total_space();
                    let used = size.saturating_sub(d.available_space());
                    let use_percent = if size > 0 {
                        (used as f64 / size as f64) * 100.0
                    } else {
                        0.0
                    };
                    FilesystemInfo {
                        fs: d.name().to_string_lossy().to_string(),
                        mount: d.mount_point().to_string_lossy().to_string(),
                        size,
                        used,
                        use_percent,
                    }
                })
                .collect()
        })
        .await
    }

    async fn os_info(&self) -> Result<OsInfo, ProviderError> {
        self.query(|system| OsInfo {
            platform: Some(std::env::consts::OS.to_string()),
            distro: system.long_os_version().or_else(|| system.name()),
            release: system.os_version(),
            kernel: system.kernel_version(),
            arch: Some(std::env::consts::ARCH.to_string()),
            hostname: system.host_name(),
        })
        .await
    }

    async fn system_identity(&self) -> Result<HardwareIdentity, ProviderError> {
        Ok(HardwareIdentity {
            manufacturer: read_dmi("sys_vendor"),
            model: read_dmi("product_name"),
        })
    }

    async fn bios(&self) -> Result<BiosInfo, ProviderError> {
        Ok(BiosInfo {
            vendor: read_dmi("bios_vendor"),
            version: read_dmi("bios_version"),
            release_date: read_dmi("bios_date"),
        })
    }

    async fn baseboard(&self) -> Result<HardwareIdentity, ProviderError> {
        Ok(HardwareIdentity {
            manufacturer: read_dmi("board_vendor"),
            model: read_dmi("board_name"),
        })
    }

    async fn software_versions(&self) -> Result<SoftwareVersions, ProviderError> {
        let probes = VERSION_PROBES.iter().map(|(tool, commands)| async move {
            for argv in commands.iter() {
                if let Some(version) = probe_version(argv).await {
                    return Some((tool.to_string(), version));
                }
            }
            None
        });
        Ok(join_all(probes).await.into_iter().flatten().collect())
    }

    async fn network_interfaces(&self) -> Result<Vec<NetworkInterface>, ProviderError> {
        let mut names = self
            .query(|system| {
                system.refresh_networks_list();
                system
                    .networks()
                    .iter()
                    .map(|(name, _)| name.to_string())
                    .collect::<Vec<_>>()
            })
            .await?;
        names.sort();

        let addresses = ipv4_addresses();
        Ok(names
            .into_iter()
            .map(|iface| NetworkInterface {
                ip4: addresses.get(&iface).cloned(),
                mac: read_mac(&iface),
                iface,
            })
            .collect())
    }

    /// Reads the counters captured by the last `network_interfaces` refresh,
    /// so a build walks the interface list once.
    async fn interface_stats(&self, iface: &str) -> Result<Vec<InterfaceStats>, ProviderError> {
        let iface = iface.to_string();
        self.query(move |system| {
            system
                .networks()
                .iter()
                .filter(|(name, _)| **name == iface)
                .map(|(_, data)| InterfaceStats {
                    rx_bytes: Some(data.total_received()),
                    tx_bytes: Some(data.total_transmitted()),
                })
                .collect()
        })
        .await
    }
}

fn vendor_name(vendor_id: &str) -> String {
    match vendor_id.trim() {
        "GenuineIntel" => "Intel".to_string(),
        "AuthenticAMD" => "AMD".to_string(),
        other => other.to_string(),
    }
}

/// Prefers package/die sensors, then anything that is not a GPU, then ACPI
/// thermal zones.
fn pick_cpu_temperature(temps: &[(String, f64)]) -> Option<f64> {
    const CPU_MARKERS: [&str; 6] = ["cpu", "package", "tctl", "tdie", "coretemp", "k10temp"];
    const GPU_MARKERS: [&str; 4] = ["gpu", "nvidia", "amdgpu", "radeon"];
    const ZONE_MARKERS: [&str; 3] = ["acpi", "thermal zone", "_tz"];

    let plausible = || {
        temps
            .iter()
            .filter(|(_, t)| (0.0..=130.0).contains(t))
            .map(|(label, t)| (label.to_lowercase(), *t))
    };
    let is_gpu = |s: &str| GPU_MARKERS.iter().any(|m| s.contains(m));
    let is_zone = |s: &str| ZONE_MARKERS.iter().any(|m| s.contains(m));

    let primary = plausible()
        .filter(|(s, _)| {
            CPU_MARKERS.iter().any(|m| s.contains(m)) && !is_gpu(s.as_str()) && !is_zone(s.as_str())
        })
        .map(|(_, t)| t)
        .max_by(|a, b| a.total_cmp(b));
    if primary.is_some() {
        return primary;
    }

    let non_gpu = plausible()
        .filter(|(s, _)| !is_gpu(s.as_str()) && !is_zone(s.as_str()))
        .map(|(_, t)| t)
        .max_by(|a, b| a.total_cmp(b));
    if non_gpu.is_some() {
        return non_gpu;
    }

    plausible()
        .filter(|(s, _)| is_zone(s.as_str()))
        .map(|(_, t)| t)
        .max_by(|a, b| a.total_cmp(b))
}

#[cfg(target_os = "linux")]
fn thermal_zone_temps() -> Vec<(String, f64)> {
    let Ok(entries) = fs::read_dir("/sys/class/thermal") else {
        return Vec::new();
    };

    let mut out = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|v| v.to_str()) else {
            continue;
        };
        if !name.starts_with("thermal_zone") {
            continue;
        }

        let label = read_trimmed(&path.join("type")).unwrap_or_else(|| name.to_string());
        let Some(raw) = read_trimmed(&path.join("temp")) else {
            continue;
        };
        let Ok(v) = raw.parse::<f64>() else {
            continue;
        };
        // sysfs reports millidegrees.
        let celsius = if v > 1000.0 { v / 1000.0 } else { v };
        if celsius > 0.0 {
            out.push((label, celsius));
        }
    }
    out
}

#[cfg(not(target_os = "linux"))]
fn thermal_zone_temps() -> Vec<(String, f64)> {
    Vec::new()
}

fn read_trimmed(path: &Path) -> Option<String> {
    fs::read_to_string(path)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn read_dmi(field: &str) -> Option<String> {
    read_trimmed(&Path::new(DMI_ROOT).join(field))
        .filter(|v| !v.eq_ignore_ascii_case("to be filled by o.e.m."))
}

fn read_mac(iface: &str) -> Option<String> {
    read_trimmed(&Path::new(NET_ROOT).join(iface).join("address"))
}

#[cfg(unix)]
fn ipv4_addresses() -> HashMap<String, String> {
    use std::ffi::CStr;
    use std::net::Ipv4Addr;

    let mut out = HashMap::new();

    // SAFETY: getifaddrs hands back a linked list we only read and then
    // release with freeifaddrs.
    unsafe {
        let mut ifaddrs: *mut libc::ifaddrs = std::ptr::null_mut();
        if libc::getifaddrs(&mut ifaddrs) != 0 {
            return out;
        }

        let mut current = ifaddrs;
        while !current.is_null() {
            let ifa = &*current;
            if !ifa.ifa_name.is_null()
                && !ifa.ifa_addr.is_null()
                && (*ifa.ifa_addr).sa_family as i32 == libc::AF_INET
            {
                let name = CStr::from_ptr(ifa.ifa_name).to_string_lossy().to_string();
                let sockaddr_in = ifa.ifa_addr as *const libc::sockaddr_in;
                let addr = Ipv4Addr::from((*sockaddr_in).sin_addr.s_addr.to_ne_bytes());
                out.entry(name).or_insert_with(|| addr.to_string());
            }
            current = ifa.ifa_next;
        }

        libc::freeifaddrs(ifaddrs);
    }

    out
}

#[cfg(not(unix))]
fn ipv4_addresses() -> HashMap<String, String> {
    HashMap::new()
}

async fn probe_version(argv: &[&str]) -> Option<String> {
    let (program, args) = argv.split_first()?;
    let output = Command::new(program)
        .args(args)
        .kill_on_drop(true)
        .output()
        .await;
    let output = match output {
        Ok(output) => output,
        Err(err) => {
            debug!(program = %program, error = %err, "version probe not available");
            return None;
        }
    };

    // Some tools (nginx, older apache) print their banner on stderr.
    let text = format!(
        "{}\n{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
    parse_version(&text)
}

/// First dotted number in a version banner, e.g. `nginx/1.18.0` -> `1.18.0`.
fn parse_version(text: &str) -> Option<String> {
    text.split(|c: char| c.is_whitespace() || c == '/' || c == ',')
        .map(|token| token.trim_start_matches(['v', 'V']))
        .filter(|token| token.starts_with(|c: char| c.is_ascii_digit()))
        .map(|token| {
            token
                .chars()
                .take_while(|c| c.is_ascii_digit() || *c == '.')
                .collect::<String>()
        })
        .map(|v| v.trim_end_matches('.').to_string())
        .find(|v| v.contains('.'))
}
