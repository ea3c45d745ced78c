//! Scripted provider for tests.

use super::{
    BiosInfo, CpuIdentity, CpuLoad, CpuTemperature, FilesystemInfo, HardwareIdentity,
    InterfaceStats, MemoryInfo, NetworkInterface, OsInfo, ProviderError, SoftwareVersions,
    TelemetryProvider, TimeInfo,
};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

pub const GIB: u64 = 1024 * 1024 * 1024;

#[derive(Default)]
pub struct FakeProvider {
    pub time: TimeInfo,
    pub memory: MemoryInfo,
    pub cpu: CpuIdentity,
    pub load: CpuLoad,
    pub temperature: CpuTemperature,
    pub filesystems: Vec<FilesystemInfo>,
    pub os: OsInfo,
    pub system: HardwareIdentity,
    pub bios: BiosInfo,
    pub baseboard: HardwareIdentity,
    pub versions: SoftwareVersions,
    pub interfaces: Vec<NetworkInterface>,
    pub stats: HashMap<String, Vec<InterfaceStats>>,
    pub failing_stats: HashSet<String>,
    pub delay: Option<Duration>,
    failing: AtomicBool,
    batches: AtomicUsize,
}

impl FakeProvider {
    /// A provider where every query answers and nothing is left out.
    pub fn healthy() -> Self {
        let mut versions = SoftwareVersions::new();
        versions.insert("bash".to_string(), "5.1.16".to_string());
        versions.insert("node".to_string(), "18.19.0".to_string());

        let mut stats = HashMap::new();
        stats.insert(
            "eth0".to_string(),
            vec![InterfaceStats {
                rx_bytes: Some(10 * 1024 * 1024),
                tx_bytes: Some(5 * 1024 * 1024 + 512 * 1024),
            }],
        );

        Self {
            time: TimeInfo { uptime_secs: 7200 },
            memory: MemoryInfo {
                total: 16 * GIB,
                available: 4 * GIB,
                swap_total: 2 * GIB,
                swap_used: GIB,
            },
            cpu: CpuIdentity {
                manufacturer: Some("Intel".to_string()),
                brand: Some("Core i7-8700".to_string()),
                cores: 12,
            },
            load: CpuLoad {
                current_load: Some(12.345),
            },
            temperature: CpuTemperature { main: Some(48.0) },
            filesystems: vec![
                FilesystemInfo {
                    fs: "/dev/sda2".to_string(),
                    mount: "/boot".to_string(),
                    size: GIB,
                    used: GIB / 4,
                    use_percent: 25.0,
                },
                FilesystemInfo {
                    fs: "/dev/sda1".to_string(),
                    mount: "/".to_string(),
                    size: 100 * GIB,
                    used: 40 * GIB,
                    use_percent: 40.0,
                },
            ],
            os: OsInfo {
                platform: Some("linux".to_string()),
                distro: Some("Ubuntu".to_string()),
                release: Some("22.04".to_string()),
                kernel: Some("5.15.0-91-generic".to_string()),
                arch: Some("x86_64".to_string()),
                hostname: Some("monitor-01".to_string()),
            },
            system: HardwareIdentity {
                manufacturer: Some("Dell Inc.".to_string()),
                model: Some("OptiPlex 7060".to_string()),
            },
            bios: BiosInfo {
                vendor: Some("Dell Inc.".to_string()),
                version: Some("1.4.2".to_string()),
                release_date: Some("2019-03-05".to_string()),
            },
            baseboard: HardwareIdentity {
                manufacturer: Some("Dell Inc.".to_string()),
                model: Some("0C96W1".to_string()),
            },
            versions,
            interfaces: vec![NetworkInterface {
                iface: "eth0".to_string(),
                ip4: Some("10.0.0.12".to_string()),
                mac: Some("aa:bb:cc:dd:ee:ff".to_string()),
            }],
            stats,
            ..Self::default()
        }
    }

    /// Every query fails until switched back.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of query batches started so far.
    pub fn batches(&self) -> usize {
        self.batches.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), ProviderError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(ProviderError::Unavailable("scripted failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl TelemetryProvider for FakeProvider {
    async fn uptime(&self) -> Result<TimeInfo, ProviderError> {
        self.batches.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.time.clone())
    }

    async fn memory(&self) -> Result<MemoryInfo, ProviderError> {
        self.check()?;
        Ok(self.memory.clone())
    }

    async fn cpu_identity(&self) -> Result<CpuIdentity, ProviderError> {
        Ok(self.cpu.clone())
    }

    async fn cpu_load(&self) -> Result<CpuLoad, ProviderError> {
        Ok(self.load.clone())
    }

    async fn cpu_temperature(&self) -> Result<CpuTemperature, ProviderError> {
        Ok(self.temperature.clone())
    }

    async fn filesystems(&self) -> Result<Vec<FilesystemInfo>, ProviderError> {
        Ok(self.filesystems.clone())
    }

    async fn os_info(&self) -> Result<OsInfo, ProviderError> {
        Ok(self.os.clone())
    }

    async fn system_identity(&self) -> Result<HardwareIdentity, ProviderError> {
        Ok(self.system.clone())
    }

    async fn bios(&self) -> Result<BiosInfo, ProviderError> {
        Ok(self.bios.clone())
    }

    async fn baseboard(&self) -> Result<HardwareIdentity, ProviderError> {
        Ok(self.baseboard.clone())
    }

    async fn software_versions(&self) -> Result<SoftwareVersions, ProviderError> {
        Ok(self.versions.clone())
    }

    async fn network_interfaces(&self) -> Result<Vec<NetworkInterface>, ProviderError> {
        Ok(self.interfaces.clone())
    }

    async fn interface_stats(&self, iface: &str) -> Result<Vec<InterfaceStats>, ProviderError> {
        if self.failing_stats.contains(iface) {
            return Err(ProviderError::Unavailable(format!("no counters for {iface}")));
        }
        Ok(self.stats.get(iface).cloned().unwrap_or_default())
    }
}
