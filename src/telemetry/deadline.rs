use super::{
    BiosInfo, CpuIdentity, CpuLoad, CpuTemperature, FilesystemInfo, HardwareIdentity,
    InterfaceStats, MemoryInfo, NetworkInterface, OsInfo, ProviderError, SoftwareVersions,
    TelemetryProvider, TimeInfo,
};
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;

/// Bounds every query of the wrapped provider by the same deadline.
pub struct Deadline<P> {
    inner: P,
    timeout: Duration,
}

impl<P> Deadline<P> {
    pub fn new(inner: P, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    async fn guard<T, F>(&self, query: &'static str, fut: F) -> Result<T, ProviderError>
    where
        F: Future<Output = Result<T, ProviderError>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout {
                query,
                timeout_ms: self.timeout.as_millis() as u64,
            }),
        }
    }
}

#[async_trait]
impl<P: TelemetryProvider> TelemetryProvider for Deadline<P> {
    async fn uptime(&self) -> Result<TimeInfo, ProviderError> {
        self.guard("uptime", self.inner.uptime()).await
    }

    async fn memory(&self) -> Result<MemoryInfo, ProviderError> {
        self.guard("memory", self.inner.memory()).await
    }

    async fn cpu_identity(&self) -> Result<CpuIdentity, ProviderError> {
        self.guard("cpu_identity", self.inner.cpu_identity()).await
    }

    async fn cpu_load(&self) -> Result<CpuLoad, ProviderError> {
        self.guard("cpu_load", self.inner.cpu_load()).await
    }

    async fn cpu_temperature(&self) -> Result<CpuTemperature, ProviderError> {
        self.guard("cpu_temperature", self.inner.cpu_temperature())
            .await
    }

    async fn filesystems(&self) -> Result<Vec<FilesystemInfo>, ProviderError> {
        self.guard("filesystems", self.inner.filesystems()).await
    }

    async fn os_info(&self) -> Result<OsInfo, ProviderError> {
        self.guard("os_info", self.inner.os_info()).await
    }

    async fn system_identity(&self) -> Result<HardwareIdentity, ProviderError> {
        self.guard("system_identity", self.inner.system_identity())
            .await
    }

    async fn bios(&self) -> Result<BiosInfo, ProviderError> {
        self.guard("bios", self.inner.bios()).await
    }

    async fn baseboard(&self) -> Result<HardwareIdentity, ProviderError> {
        self.guard("baseboard", self.inner.baseboard()).await
    }

    async fn software_versions(&self) -> Result<SoftwareVersions, ProviderError> {
        self.guard("software_versions", self.inner.software_versions())
            .await
    }

    async fn network_interfaces(&self) -> Result<Vec<NetworkInterface>, ProviderError> {
        self.guard("network_interfaces", self.inner.network_interfaces())
            .await
    }

    async fn interface_stats(&self, iface: &str) -> Result<Vec<InterfaceStats>, ProviderError> {
        self.guard("interface_stats", self.inner.interface_stats(iface))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::fake::FakeProvider;

    #[tokio::test(start_paused = true)]
    async fn slow_query_becomes_timeout_error() {
        let mut fake = FakeProvider::healthy();
        fake.delay = Some(Duration::from_secs(10));
        let provider = Deadline::new(fake, Duration::from_millis(500));

        let err = provider.uptime().await.expect_err("query must time out");
        match err {
            ProviderError::Timeout { query, timeout_ms } => {
                assert_eq!(query, "uptime");
                assert_eq!(timeout_ms, 500);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn fast_query_passes_through() {
        let provider = Deadline::new(FakeProvider::healthy(), Duration::from_millis(500));
        let mem = provider.memory().await.expect("memory");
        assert!(mem.total > 0);
    }
}
