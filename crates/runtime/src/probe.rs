//! CPU identification, probed once per process.

use serde::Serialize;
use std::fmt;
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CapabilitySet {
    pub arch: &'static str,
    pub sse2: bool,
    pub sse41: bool,
    pub avx: bool,
    pub avx2: bool,
    pub fma: bool,
    pub avx512f: bool,
    pub neon: bool,
    pub sve: bool,
    pub lane_width_bits: usize,
}

impl CapabilitySet {
    pub fn feature_level(&self) -> &'static str {
        if self.avx512f {
            "avx512"
        } else if self.avx2 {
            "avx2"
        } else if self.avx {
            "avx"
        } else if self.sve {
            "sve"
        } else if self.neon {
            "neon"
        } else if self.sse41 {
            "sse4.1"
        } else if self.sse2 {
            "sse2"
        } else {
            "scalar"
        }
    }

    pub fn names(&self) -> Vec<&'static str> {
        [
            ("sse2", self.sse2),
            ("sse4.1", self.sse41),
            ("avx", self.avx),
            ("avx2", self.avx2),
            ("fma", self.fma),
            ("avx512f", self.avx512f),
            ("neon", self.neon),
            ("sve", self.sve),
        ]
        .into_iter()
        .filter_map(|(name, present)| present.then_some(name))
        .collect()
    }

    /// Caps the capability level, e.g. `avx2` hides avx512 and `scalar`
    /// hides everything.
    pub fn capped(mut self, level: &str) -> Self {
        match level.trim().to_lowercase().as_str() {
            "scalar" => {
                self.sse2 = false;
                self.sse41 = false;
                self.avx = false;
                self.avx2 = false;
                self.fma = false;
                self.avx512f = false;
                self.neon = false;
                self.sve = false;
            }
            "avx2" => self.avx512f = false,
            "avx" => {
                self.avx512f = false;
                self.avx2 = false;
            }
            "sse4.1" | "sse41" => {
                self.avx512f = false;
                self.avx2 = false;
                self.avx = false;
            }
            "neon" => self.sve = false,
            other => tracing::warn!(level = other, "unknown capability cap ignored"),
        }
        self.lane_width_bits = if self.avx512f {
            512
        } else if self.avx2 || self.avx || self.sve {
            256
        } else if self.neon || self.sse41 || self.sse2 {
            128
        } else {
            64
        };
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FeatureDescriptor {
    pub brand: String,
    pub capabilities: CapabilitySet,
    descriptor: String,
}

impl FeatureDescriptor {
    fn new(brand: String, capabilities: CapabilitySet) -> Self {
        let descriptor = format!(
            "{} [{}:{} lane={}b features={}]",
            brand,
            capabilities.arch,
            capabilities.feature_level(),
            capabilities.lane_width_bits,
            capabilities.names().join(",")
        );
        Self {
            brand,
            capabilities,
            descriptor,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.descriptor
    }
}

impl fmt::Display for FeatureDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.descriptor)
    }
}

pub const SIMD_MAX_ENV: &str = "LOOPFORGE_SIMD_MAX";

/// The process-wide descriptor; the CPU is probed on first use only.
pub fn describe() -> &'static FeatureDescriptor {
    static DESCRIPTOR: OnceLock<FeatureDescriptor> = OnceLock::new();
    DESCRIPTOR.get_or_init(|| {
        let mut capabilities = detect();
        if let Ok(level) = std::env::var(SIMD_MAX_ENV) {
            capabilities = capabilities.capped(&level);
        }
        let descriptor = FeatureDescriptor::new(brand_string(), capabilities);
        tracing::info!(cpu = descriptor.as_str(), "probed cpu features");
        descriptor
    })
}

pub fn cpustring() -> &'static str {
    describe().as_str()
}

#[cfg(target_arch = "x86_64")]
fn detect() -> CapabilitySet {
    let avx512f = std::arch::is_x86_feature_detected!("avx512f");
    let avx2 = std::arch::is_x86_feature_detected!("avx2");
    let avx = std::arch::is_x86_feature_detected!("avx");
    CapabilitySet {
        arch: "x86_64",
        sse2: std::arch::is_x86_feature_detected!("sse2"),
        sse41: std::arch::is_x86_feature_detected!("sse4.1"),
        avx,
        avx2,
        fma: std::arch::is_x86_feature_detected!("fma"),
        avx512f,
        neon: false,
        sve: false,
        lane_width_bits: if avx512f {
            512
        } else if avx2 || avx {
            256
        } else {
            128
        },
    }
}

#[cfg(target_arch = "aarch64")]
fn detect() -> CapabilitySet {
    let sve = std::arch::is_aarch64_feature_detected!("sve");
    CapabilitySet {
        arch: "aarch64",
        sse2: false,
        sse41: false,
        avx: false,
        avx2: false,
        fma: true,
        avx512f: false,
        neon: true,
        sve,
        lane_width_bits: if sve { 256 } else { 128 },
    }
}

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
fn detect() -> CapabilitySet {
    CapabilitySet {
        arch: std::env::consts::ARCH,
        sse2: false,
        sse41: false,
        avx: false,
        avx2: false,
        fma: false,
        avx512f: false,
        neon: false,
        sve: false,
        lane_width_bits: 64,
    }
}

#[cfg(target_arch = "x86_64")]
#[allow(unused_unsafe)]
fn brand_string() -> String {
    use std::arch::x86_64::__cpuid;

    // SAFETY: cpuid is available on every x86_64 processor.
    let max_extended = unsafe { __cpuid(0x8000_0000) }.eax;
    if max_extended < 0x8000_0004 {
        return fallback_brand();
    }
    let mut bytes = Vec::with_capacity(48);
    for leaf in 0x8000_0002u32..=0x8000_0004 {
        // SAFETY: leaf is within the supported extended range checked above.
        let regs = unsafe { __cpuid(leaf) };
        for reg in [regs.eax, regs.ebx, regs.ecx, regs.edx] {
            bytes.extend_from_slice(&reg.to_le_bytes());
        }
    }
    let brand = String::from_utf8_lossy(&bytes)
        .trim_matches(char::from(0))
        .trim()
        .to_string();
    if brand.is_empty() {
        fallback_brand()
    } else {
        brand
    }
}

#[cfg(not(target_arch = "x86_64"))]
fn brand_string() -> String {
    std::fs::read_to_string("/proc/cpuinfo")
        .ok()
        .and_then(|cpuinfo| {
            cpuinfo.lines().find_map(|line| {
                let (field, value) = line.split_once(':')?;
                matches!(field.trim(), "model name" | "Hardware" | "cpu model")
                    .then(|| value.trim().to_string())
                    .filter(|value| !value.is_empty())
            })
        })
        .unwrap_or_else(fallback_brand)
}

fn fallback_brand() -> String {
    format!("unknown {} cpu", std::env::consts::ARCH)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_is_cached() {
        let first = describe();
        let second = describe();
        assert!(std::ptr::eq(first, second));
        assert!(!cpustring().is_empty());
        assert!(cpustring().starts_with(first.brand.as_str()));
    }

    #[test]
    fn scalar_cap_clears_everything() {
        let caps = detect().capped("scalar");
        assert!(caps.names().is_empty());
        assert_eq!(caps.feature_level(), "scalar");
        assert_eq!(caps.lane_width_bits, 64);
    }
}
