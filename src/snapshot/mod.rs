//! Fully formatted host snapshot and the builder that assembles it.
//!
//! The serialized field names are the wire format the dashboard consumes and
//! must stay stable.

mod builder;

pub use builder::SnapshotBuilder;

use serde::Serialize;

/// Placeholder for identity strings the host did not report.
pub const UNKNOWN: &str = "Desconocido";
/// Placeholder for measurements and versions that are not available.
pub const NOT_AVAILABLE: &str = "N/D";
/// Transfer counter shown for an interface without statistics.
pub const ZERO_MEGABYTES: &str = "0.00";

/// Size reported for swap when the host has none configured (975 MiB).
pub const SWAP_FALLBACK_BYTES: u64 = 975 * 1024 * 1024;
pub const SWAP_DEVICE: &str = "/dev/sda5";
pub const SWAP_MOUNT: &str = "[SWAP]";

#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub timestamp: String,
    #[serde(rename = "tiempoActivo")]
    pub uptime: UptimeBlock,
    #[serde(rename = "sistemaOperativo")]
    pub os: OsBlock,
    pub hardware: IdentityBlock,
    #[serde(rename = "placaBase")]
    pub baseboard: IdentityBlock,
    pub bios: BiosBlock,
    pub cpu: CpuBlock,
    #[serde(rename = "memoria")]
    pub memory: MemoryBlock,
    #[serde(rename = "particiones")]
    pub partitions: Partitions,
    #[serde(rename = "versiones")]
    pub versions: VersionsBlock,
    #[serde(rename = "red")]
    pub network: Vec<InterfaceBlock>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UptimeBlock {
    pub total: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct OsBlock {
    #[serde(rename = "plataforma")]
    pub platform: String,
    pub distro: String,
    pub version: String,
    pub kernel: String,
    #[serde(rename = "arquitectura")]
    pub arch: String,
    pub hostname: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct IdentityBlock {
    #[serde(rename = "fabricante")]
    pub manufacturer: String,
    #[serde(rename = "modelo")]
    pub model: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct BiosBlock {
    #[serde(rename = "fabricante")]
    pub vendor: String,
    pub version: String,
    #[serde(rename = "fecha")]
    pub release_date: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CpuBlock {
    #[serde(rename = "fabricante")]
    pub manufacturer: String,
    #[serde(rename = "modelo")]
    pub brand: String,
    #[serde(rename = "nucleos")]
    pub cores: u32,
    #[serde(rename = "usoTotal")]
    pub load: String,
    #[serde(rename = "temperatura")]
    pub temperature: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct MemoryBlock {
    pub total: String,
    #[serde(rename = "libre")]
    pub free: String,
    #[serde(rename = "usado")]
    pub used: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Partitions {
    /// Root filesystem, `null` when nothing is mounted at `/`.
    pub sda1: Option<Partition>,
    /// Swap, always present.
    pub sda5: Partition,
}

#[derive(Debug, Clone, Serialize)]
pub struct Partition {
    pub filesystem: String,
    #[serde(rename = "tamaño")]
    pub size: String,
    #[serde(rename = "usado")]
    pub used: String,
    #[serde(rename = "libre")]
    pub free: String,
    #[serde(rename = "usoPorcentaje")]
    pub use_percent: String,
    #[serde(rename = "puntoMontaje")]
    pub mount: String,
    #[serde(rename = "esSwap")]
    pub is_swap: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct VersionsBlock {
    pub bash: String,
    pub apache: String,
    pub php: String,
    pub nginx: String,
    pub node: String,
    pub npm: String,
    pub docker: String,
    pub mysql: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct InterfaceBlock {
    #[serde(rename = "interfaz")]
    pub iface: String,
    pub ip4: String,
    pub mac: String,
    #[serde(rename = "recibidoMB")]
    pub received_mb: String,
    #[serde(rename = "enviadoMB")]
    pub sent_mb: String,
}
