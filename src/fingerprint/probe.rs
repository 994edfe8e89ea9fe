//! Live host queries.

use super::{HostAttributes, HostProbe};
use crate::error::AuthError;
use async_trait::async_trait;

/// Reads attributes from the running host.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemProbe;

#[async_trait]
impl HostProbe for SystemProbe {
    async fn attributes(&self) -> Result<HostAttributes, AuthError> {
        let platform = platform::query().await?;
        Ok(HostAttributes {
            manufacturer: platform.manufacturer,
            uuid: platform.uuid,
            logical_cpus: num_cpus::get(),
            cpu_vendor: platform.cpu_vendor,
            total_memory: platform.total_memory,
            platform: std::env::consts::OS.to_string(),
            release: platform.release,
        })
    }
}

/// Attributes that need an OS-specific query.
struct PlatformAttributes {
    manufacturer: String,
    uuid: String,
    cpu_vendor: String,
    total_memory: u64,
    release: String,
}

fn unavailable(what: &str, detail: impl std::fmt::Display) -> AuthError {
    AuthError::FingerprintUnavailable(format!("{}: {}", what, detail))
}

#[cfg(target_os = "linux")]
mod platform {
    use super::{unavailable, PlatformAttributes};
    use crate::error::AuthError;
    use std::io::ErrorKind;

    pub(super) async fn query() -> Result<PlatformAttributes, AuthError> {
        Ok(PlatformAttributes {
            manufacturer: optional_file("/sys/class/dmi/id/sys_vendor").await?,
            uuid: machine_uuid().await?,
            cpu_vendor: cpu_vendor().await?,
            total_memory: total_memory().await?,
            release: required_file("/proc/sys/kernel/osrelease").await?,
        })
    }

    async fn required_file(path: &str) -> Result<String, AuthError> {
        tokio::fs::read_to_string(path)
            .await
            .map(|s| s.trim().to_string())
            .map_err(|e| unavailable(path, e))
    }

    /// Missing DMI data (containers, some ARM boards) reads as empty.
    async fn optional_file(path: &str) -> Result<String, AuthError> {
        match tokio::fs::read_to_string(path).await {
            Ok(s) => Ok(s.trim().to_string()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(unavailable(path, e)),
        }
    }

    /// DMI product UUID when readable (root only on most distros), else machine-id.
    async fn machine_uuid() -> Result<String, AuthError> {
        if let Ok(uuid) = tokio::fs::read_to_string("/sys/class/dmi/id/product_uuid").await {
            let uuid = uuid.trim();
            if !uuid.is_empty() {
                return Ok(uuid.to_lowercase());
            }
        }

        for path in ["/etc/machine-id", "/var/lib/dbus/machine-id"] {
            if let Ok(id) = tokio::fs::read_to_string(path).await {
                let id = id.trim();
                if !id.is_empty() {
                    return Ok(id.to_string());
                }
            }
        }

        Err(unavailable("system uuid", "no product_uuid or machine-id readable"))
    }

    async fn cpu_vendor() -> Result<String, AuthError> {
        let cpuinfo = required_file("/proc/cpuinfo").await?;
        Ok(parse_cpu_vendor(&cpuinfo))
    }

    async fn total_memory() -> Result<u64, AuthError> {
        let meminfo = required_file("/proc/meminfo").await?;
        parse_mem_total(&meminfo).ok_or_else(|| unavailable("/proc/meminfo", "no MemTotal line"))
    }

    pub(super) fn parse_cpu_vendor(cpuinfo: &str) -> String {
        // x86 reports vendor_id; ARM reports an implementer code
        cpuinfo
            .lines()
            .filter_map(|line| line.split_once(':'))
            .find(|(key, _)| matches!(key.trim(), "vendor_id" | "CPU implementer"))
            .map(|(_, value)| value.trim().to_string())
            .unwrap_or_default()
    }

    /// MemTotal in bytes.
    pub(super) fn parse_mem_total(meminfo: &str) -> Option<u64> {
        let line = meminfo.lines().find(|l| l.starts_with("MemTotal:"))?;
        let kib: u64 = line
            .trim_start_matches("MemTotal:")
            .split_whitespace()
            .next()?
            .parse()
            .ok()?;
        Some(kib * 1024)
    }
}

#[cfg(target_os = "macos")]
mod platform {
    use super::{unavailable, PlatformAttributes};
    use crate::error::AuthError;
    use tokio::process::Command;

    pub(super) async fn query() -> Result<PlatformAttributes, AuthError> {
        let ioreg = run("ioreg", &["-rd1", "-c", "IOPlatformExpertDevice"]).await?;
        let uuid = ioreg_value(&ioreg, "IOPlatformUUID")
            .ok_or_else(|| unavailable("system uuid", "IOPlatformUUID not reported"))?;
        let manufacturer = ioreg_value(&ioreg, "manufacturer").unwrap_or_else(|| "Apple Inc.".to_string());

        // Apple Silicon has no machdep.cpu.vendor
        let cpu_vendor = match run("sysctl", &["-n", "machdep.cpu.vendor"]).await {
            Ok(v) if !v.is_empty() => v,
            _ => "Apple".to_string(),
        };

        let memsize = run("sysctl", &["-n", "hw.memsize"]).await?;
        let total_memory = memsize
            .parse()
            .map_err(|_| unavailable("hw.memsize", memsize))?;

        Ok(PlatformAttributes {
            manufacturer,
            uuid,
            cpu_vendor,
            total_memory,
            release: run("sysctl", &["-n", "kern.osrelease"]).await?,
        })
    }

    async fn run(program: &str, args: &[&str]) -> Result<String, AuthError> {
        let output = Command::new(program)
            .args(args)
            .output()
            .await
            .map_err(|e| unavailable(program, e))?;
        if !output.status.success() {
            return Err(unavailable(program, output.status));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Value of `"key" = "value"` or `"key" = <"value">` in ioreg output.
    fn ioreg_value(output: &str, key: &str) -> Option<String> {
        let needle = format!("\"{}\" = ", key);
        let line = output.lines().find(|l| l.contains(&needle))?;
        let value = line.split_once(&needle)?.1;
        Some(
            value
                .trim_matches(|c| c == '<' || c == '>' || c == '"' || c == ' ')
                .to_string(),
        )
    }
}

#[cfg(target_os = "windows")]
mod platform {
    use super::{unavailable, PlatformAttributes};
    use crate::error::AuthError;
    use tokio::process::Command;

    const SCRIPT: &str = "$p = Get-CimInstance Win32_ComputerSystemProduct; \
        $c = Get-CimInstance Win32_Processor | Select-Object -First 1; \
        $s = Get-CimInstance Win32_ComputerSystem; \
        $o = Get-CimInstance Win32_OperatingSystem; \
        $p.Vendor; $p.UUID; $c.Manufacturer; $s.TotalPhysicalMemory; $o.Version";

    pub(super) async fn query() -> Result<PlatformAttributes, AuthError> {
        let output = Command::new("powershell")
            .args(["-NoProfile", "-NonInteractive", "-Command", SCRIPT])
            .output()
            .await
            .map_err(|e| unavailable("powershell", e))?;
        if !output.status.success() {
            return Err(unavailable("powershell", output.status));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let lines: Vec<&str> = stdout.lines().map(str::trim).collect();
        let [manufacturer, uuid, cpu_vendor, memory, release] = lines[..] else {
            return Err(unavailable("win32 cim query", "unexpected output"));
        };

        Ok(PlatformAttributes {
            manufacturer: manufacturer.to_string(),
            uuid: uuid.to_lowercase(),
            cpu_vendor: cpu_vendor.to_string(),
            total_memory: memory
                .parse()
                .map_err(|_| unavailable("TotalPhysicalMemory", memory))?,
            release: release.to_string(),
        })
    }
}

#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
mod platform {
    use super::{unavailable, PlatformAttributes};
    use crate::error::AuthError;

    pub(super) async fn query() -> Result<PlatformAttributes, AuthError> {
        Err(unavailable(std::env::consts::OS, "unsupported platform"))
    }
}

#[cfg(all(test, target_os = "linux"))]
mod tests {
    use super::platform::{parse_cpu_vendor, parse_mem_total};

    #[test]
    fn test_parse_x86_cpuinfo() {
        let cpuinfo = "processor\t: 0\nvendor_id\t: AuthenticAMD\ncpu family\t: 25\n";
        assert_eq!(parse_cpu_vendor(cpuinfo), "AuthenticAMD");
    }

    #[test]
    fn test_parse_arm_cpuinfo() {
        let cpuinfo = "processor\t: 0\nBogoMIPS\t: 48.00\nCPU implementer\t: 0x41\n";
        assert_eq!(parse_cpu_vendor(cpuinfo), "0x41");
    }

    #[test]
    fn test_parse_mem_total() {
        let meminfo = "MemTotal:       16206240 kB\nMemFree:         1234567 kB\n";
        assert_eq!(parse_mem_total(meminfo), Some(16_206_240 * 1024));
        assert_eq!(parse_mem_total("MemFree: 1 kB"), None);
    }
}
