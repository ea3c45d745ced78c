use super::{
    BiosBlock, CpuBlock, IdentityBlock, InterfaceBlock, MemoryBlock, OsBlock, Partition,
    Partitions, Snapshot, UptimeBlock, VersionsBlock, NOT_AVAILABLE, SWAP_DEVICE,
    SWAP_FALLBACK_BYTES, SWAP_MOUNT, UNKNOWN, ZERO_MEGABYTES,
};
use crate::format::{
    format_bytes_as_gb, format_celsius, format_megabytes, format_percent, format_uptime_hours,
};
use crate::telemetry::{
    FilesystemInfo, MemoryInfo, NetworkInterface, ProviderError,
    SoftwareVersions, TelemetryProvider,
};
use futures::future::try_join_all;
use std::sync::Arc;
use std::time::SystemTime;
use thiserror::Error;

/// A provider query failed, so no snapshot was produced.
#[derive(Debug, Error)]
#[error("snapshot build aborted: {source}")]
pub struct TelemetryUnavailable {
    #[from]
    source: ProviderError,
}

#[derive(Clone)]
pub struct SnapshotBuilder {
    provider: Arc<dyn TelemetryProvider>,
}

impl SnapshotBuilder {
    pub fn new(provider: Arc<dyn TelemetryProvider>) -> Self {
        Self { provider }
    }

    /// Queries the provider and assembles a complete snapshot.
    ///
    /// All independent queries run concurrently and the first failure aborts
    /// the build. Values the host does not report are replaced by markers,
    /// so a returned snapshot never has gaps.
    pub async fn build(&self) -> Result<Snapshot, TelemetryUnavailable> {
        let p = self.provider.as_ref();
        let (
            time,
            memory,
            cpu,
            load,
            temperature,
            filesystems,
            os,
            system,
            bios,
            baseboard,
            versions,
            interfaces,
        ) = tokio::try_join!(
            p.uptime(),
            p.memory(),
            p.cpu_identity(),
            p.cpu_load(),
            p.cpu_temperature(),
            p.filesystems(),
            p.os_info(),
            p.system_identity(),
            p.bios(),
            p.baseboard(),
            p.software_versions(),
            p.network_interfaces(),
        )?;

        let network = self.collect_network(interfaces).await?;

        Ok(Snapshot {
            timestamp: humantime::format_rfc3339_millis(SystemTime::now()).to_string(),
            uptime: UptimeBlock {
                total: match time.uptime_secs {
                    0 => NOT_AVAILABLE.to_string(),
                    secs => format_uptime_hours(secs),
                },
            },
            os: OsBlock {
                platform: text(os.platform, UNKNOWN),
                distro: text(os.distro, UNKNOWN),
                version: text(os.release, UNKNOWN),
                kernel: text(os.kernel, UNKNOWN),
                arch: text(os.arch, UNKNOWN),
                hostname: text(os.hostname, UNKNOWN),
            },
            hardware: IdentityBlock {
                manufacturer: text(system.manufacturer, UNKNOWN),
                model: text(system.model, UNKNOWN),
            },
            baseboard: IdentityBlock {
                manufacturer: text(baseboard.manufacturer, UNKNOWN),
                model: text(baseboard.model, UNKNOWN),
            },
            bios: BiosBlock {
                vendor: text(bios.vendor, UNKNOWN),
                version: text(bios.version, UNKNOWN),
                release_date: text(bios.release_date, UNKNOWN),
            },
            cpu: CpuBlock {
                manufacturer: text(cpu.manufacturer, UNKNOWN),
                brand: text(cpu.brand, UNKNOWN),
                cores: cpu.cores,
                load: nonzero(load.current_load)
                    .map(format_percent)
                    .unwrap_or_else(|| NOT_AVAILABLE.to_string()),
                temperature: nonzero(temperature.main)
                    .map(format_celsius)
                    .unwrap_or_else(|| NOT_AVAILABLE.to_string()),
            },
            memory: MemoryBlock {
                total: format_bytes_as_gb(memory.total),
                free: format_bytes_as_gb(memory.available),
                used: format_bytes_as_gb(memory.total.saturating_sub(memory.available)),
            },
            partitions: Partitions {
                sda1: root_partition(&filesystems),
                sda5: swap_partition(&memory),
            },
            versions: VersionsBlock {
                bash: version(&versions, "bash"),
                apache: version(&versions, "apache"),
                php: version(&versions, "php"),
                nginx: version(&versions, "nginx"),
                node: version(&versions, "node"),
                npm: version(&versions, "npm"),
                docker: version(&versions, "docker"),
                mysql: version(&versions, "mysql"),
            },
            network,
        })
    }

    /// Per-interface counters are looked up concurrently. An interface the
    /// provider has no counters for reports zero; a failed lookup aborts the
    /// build like any other query.
    async fn collect_network(
        &self,
        interfaces: Vec<NetworkInterface>,
    ) -> Result<Vec<InterfaceBlock>, ProviderError> {
        let provider = self.provider.as_ref();
        let lookups = interfaces.into_iter().map(|iface| async move {
            let stats = provider
                .interface_stats(&iface.iface)
                .await?
                .into_iter()
                .next()
                .unwrap_or_default();
            Ok::<_, ProviderError>(InterfaceBlock {
                received_mb: megabytes(stats.rx_bytes),
                sent_mb: megabytes(stats.tx_bytes),
                ip4: text(iface.ip4, NOT_AVAILABLE),
                mac: text(iface.mac, NOT_AVAILABLE),
                iface: text(Some(iface.iface), UNKNOWN),
            })
        });
        try_join_all(lookups).await
    }
}

fn text(value: Option<String>, marker: &str) -> String {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| marker.to_string())
}

/// Zero readings count as missing, the same as an absent one.
fn nonzero(value: Option<f64>) -> Option<f64> {
    value.filter(|v| *v != 0.0 && !v.is_nan())
}

fn megabytes(bytes: Option<u64>) -> String {
    match bytes {
        Some(b) if b > 0 => format_megabytes(b),
        _ => ZERO_MEGABYTES.to_string(),
    }
}

fn version(versions: &SoftwareVersions, tool: &str) -> String {
    text(versions.get(tool).cloned(), NOT_AVAILABLE)
}

fn root_partition(filesystems: &[FilesystemInfo]) -> Option<Partition> {
    filesystems
        .iter()
        .find(|f| f.mount == "/")
        .map(|f| Partition {
            filesystem: text(Some(f.fs.clone()), UNKNOWN),
            size: format_bytes_as_gb(f.size),
            used: format_bytes_as_gb(f.used),
            free: format_bytes_as_gb(f.size.saturating_sub(f.used)),
            use_percent: format_percent(f.use_percent),
            mount: f.mount.clone(),
            is_swap: false,
        })
}

fn swap_partition(memory: &MemoryInfo) -> Partition {
    let (size, use_percent) = if memory.swap_total > 0 {
        let pct = (memory.swap_used as f64 / memory.swap_total as f64) * 100.0;
        (memory.swap_total, format_percent(pct))
    } else {
        (SWAP_FALLBACK_BYTES, "0%".to_string())
    };

    Partition {
        filesystem: SWAP_DEVICE.to_string(),
        size: format_bytes_as_gb(size),
        used: format_bytes_as_gb(memory.swap_used),
        free: format_bytes_as_gb(size.saturating_sub(memory.swap_used)),
        use_percent,
        mount: SWAP_MOUNT.to_string(),
        is_swap: true,
    }
}
