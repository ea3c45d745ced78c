//! Display formatting for raw telemetry values.

const BYTES_PER_GIB: f64 = 1024.0 * 1024.0 * 1024.0;
const BYTES_PER_MIB: f64 = 1024.0 * 1024.0;
const SECS_PER_HOUR: f64 = 3600.0;

/// `bytes / 2^30` with two decimals and a `GB` suffix.
pub fn format_bytes_as_gb(bytes: u64) -> String {
    format!("{:.2} GB", bytes as f64 / BYTES_PER_GIB)
}

/// Two decimals and a `%` suffix. The input is already a percentage.
pub fn format_percent(ratio: f64) -> String {
    format!("{ratio:.2}%")
}

/// `bytes / 2^20` with two decimals and no unit.
pub fn format_megabytes(bytes: u64) -> String {
    format!("{:.2}", bytes as f64 / BYTES_PER_MIB)
}

pub fn format_uptime_hours(secs: u64) -> String {
    format!("{:.2} horas", secs as f64 / SECS_PER_HOUR)
}

pub fn format_celsius(value: f64) -> String {
    format!("{value} °C")
}
