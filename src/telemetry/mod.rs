//! Raw host telemetry.
//!
//! [`TelemetryProvider`] is the seam between snapshot building and the
//! operating system. Every query is independent and may fail on its own with
//! a [`ProviderError`]; values that a healthy host simply does not report are
//! carried as `None` instead.

mod deadline;
#[cfg(test)]
pub mod fake;
pub mod host;

pub use deadline::Deadline;
pub use host::HostProvider;

use async_trait::async_trait;
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Clone, Default)]
pub struct TimeInfo {
    pub uptime_secs: u64,
}

/// Memory counters in bytes.
#[derive(Debug, Clone, Default)]
pub struct MemoryInfo {
    pub total: u64,
    pub available: u64,
    pub swap_total: u64,
    pub swap_used: u64,
}

#[derive(Debug, Clone, Default)]
pub struct CpuIdentity {
    pub manufacturer: Option<String>,
    pub brand: Option<String>,
    pub cores: u32,
}

#[derive(Debug, Clone, Default)]
pub struct CpuLoad {
    /// Average load across all cores, 0..100.
    pub current_load: Option<f64>,
}

#[derive(Debug, Clone, Default)]
pub struct CpuTemperature {
    pub main: Option<f64>,
}

#[derive(Debug, Clone, Default)]
pub struct FilesystemInfo {
    pub fs: String,
    pub mount: String,
    pub size: u64,
    pub used: u64,
    pub use_percent: f64,
}

#[derive(Debug, Clone, Default)]
pub struct OsInfo {
    pub platform: Option<String>,
    pub distro: Option<String>,
    pub release: Option<String>,
    pub kernel: Option<String>,
    pub arch: Option<String>,
    pub hostname: Option<String>,
}

/// Manufacturer and model of the system or of its baseboard.
#[derive(Debug, Clone, Default)]
pub struct HardwareIdentity {
    pub manufacturer: Option<String>,
    pub model: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct BiosInfo {
    pub vendor: Option<String>,
    pub version: Option<String>,
    pub release_date: Option<String>,
}

/// Installed tool name to version, only for tools that were found.
pub type SoftwareVersions = BTreeMap<String, String>;

#[derive(Debug, Clone, Default)]
pub struct NetworkInterface {
    pub iface: String,
    pub ip4: Option<String>,
    pub mac: Option<String>,
}

/// Cumulative transfer counters of one interface.
#[derive(Debug, Clone, Default)]
pub struct InterfaceStats {
    pub rx_bytes: Option<u64>,
    pub tx_bytes: Option<u64>,
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("{query} query exceeded its {timeout_ms} ms deadline")]
    Timeout { query: &'static str, timeout_ms: u64 },
    #[error("telemetry unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait TelemetryProvider: Send + Sync {
    async fn uptime(&self) -> Result<TimeInfo, ProviderError>;

    async fn memory(&self) -> Result<MemoryInfo, ProviderError>;

    async fn cpu_identity(&self) -> Result<CpuIdentity, ProviderError>;

    async fn cpu_load(&self) -> Result<CpuLoad, ProviderError>;

    async fn cpu_temperature(&self) -> Result<CpuTemperature, ProviderError>;

    async fn filesystems(&self) -> Result<Vec<FilesystemInfo>, ProviderError>;

    async fn os_info(&self) -> Result<OsInfo, ProviderError>;

    async fn system_identity(&self) -> Result<HardwareIdentity, ProviderError>;

    async fn bios(&self) -> Result<BiosInfo, ProviderError>;

    async fn baseboard(&self) -> Result<HardwareIdentity, ProviderError>;

    async fn software_versions(&self) -> Result<SoftwareVersions, ProviderError>;

    async fn network_interfaces(&self) -> Result<Vec<NetworkInterface>, ProviderError>;

    /// Counters for one interface. An empty list means the interface reported
    /// nothing.
    async fn interface_stats(&self, iface: &str) -> Result<Vec<InterfaceStats>, ProviderError>;
}
