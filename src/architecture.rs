//! Architecture resolution.
//!
//! Expands symbolic architecture options (`auto`, `native`, `all`, `auto64`,
//! `auto32`) into concrete per-platform sets. Every function here is pure over
//! a [`Host`] snapshot; only [`Host::detect`] looks at the running machine.

use crate::error::ConfigurationError;
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Platform family a build targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PlatformName {
    /// Linux (manylinux/musllinux)
    Linux,
    /// macOS
    Macos,
    /// Windows
    Windows,
    /// Pyodide (WebAssembly)
    Pyodide,
    /// iOS
    Ios,
}

impl PlatformName {
    /// Identifier used in option names and tables
    pub fn as_str(&self) -> &'static str {
        match self {
            PlatformName::Linux => "linux",
            PlatformName::Macos => "macos",
            PlatformName::Windows => "windows",
            PlatformName::Pyodide => "pyodide",
            PlatformName::Ios => "ios",
        }
    }

    /// Human readable name used in messages
    pub fn pretty(&self) -> &'static str {
        match self {
            PlatformName::Linux => "Linux",
            PlatformName::Macos => "macOS",
            PlatformName::Windows => "Windows",
            PlatformName::Pyodide => "Pyodide",
            PlatformName::Ios => "iOS",
        }
    }
}

impl fmt::Display for PlatformName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlatformName {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "linux" => Ok(PlatformName::Linux),
            "macos" => Ok(PlatformName::Macos),
            "windows" => Ok(PlatformName::Windows),
            "pyodide" => Ok(PlatformName::Pyodide),
            "ios" => Ok(PlatformName::Ios),
            other => Err(ConfigurationError::InvalidOption {
                option: "platform".to_string(),
                reason: format!("unknown platform '{other}'"),
            }),
        }
    }
}

/// A concrete CPU/ABI target.
///
/// Names are case sensitive: `arm64` is the macOS spelling, `ARM64` the Windows one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Architecture {
    /// x86_64 (Linux, macOS)
    X86_64,
    /// i686 (Linux)
    I686,
    /// aarch64 (Linux)
    Aarch64,
    /// ppc64le (Linux)
    Ppc64le,
    /// s390x (Linux)
    S390x,
    /// armv7l (Linux)
    Armv7l,
    /// riscv64 (Linux)
    Riscv64,
    /// arm64 (macOS)
    Arm64,
    /// universal2 (macOS fat binaries)
    Universal2,
    /// x86 (Windows)
    X86,
    /// AMD64 (Windows)
    Amd64,
    /// ARM64 (Windows)
    WinArm64,
    /// wasm32 (Pyodide)
    Wasm32,
    /// arm64_iphoneos (iOS devices)
    Arm64Iphoneos,
    /// arm64_iphonesimulator
    Arm64Iphonesimulator,
    /// x86_64_iphonesimulator
    X86_64Iphonesimulator,
}

impl Architecture {
    /// Every known architecture
    pub const ALL: [Architecture; 16] = [
        Architecture::X86_64,
        Architecture::I686,
        Architecture::Aarch64,
        Architecture::Ppc64le,
        Architecture::S390x,
        Architecture::Armv7l,
        Architecture::Riscv64,
        Architecture::Arm64,
        Architecture::Universal2,
        Architecture::X86,
        Architecture::Amd64,
        Architecture::WinArm64,
        Architecture::Wasm32,
        Architecture::Arm64Iphoneos,
        Architecture::Arm64Iphonesimulator,
        Architecture::X86_64Iphonesimulator,
    ];

    /// Canonical spelling
    pub fn value(&self) -> &'static str {
        match self {
            Architecture::X86_64 => "x86_64",
            Architecture::I686 => "i686",
            Architecture::Aarch64 => "aarch64",
            Architecture::Ppc64le => "ppc64le",
            Architecture::S390x => "s390x",
            Architecture::Armv7l => "armv7l",
            Architecture::Riscv64 => "riscv64",
            Architecture::Arm64 => "arm64",
            Architecture::Universal2 => "universal2",
            Architecture::X86 => "x86",
            Architecture::Amd64 => "AMD64",
            Architecture::WinArm64 => "ARM64",
            Architecture::Wasm32 => "wasm32",
            Architecture::Arm64Iphoneos => "arm64_iphoneos",
            Architecture::Arm64Iphonesimulator => "arm64_iphonesimulator",
            Architecture::X86_64Iphonesimulator => "x86_64_iphonesimulator",
        }
    }

    /// Look up an architecture by its exact spelling
    pub fn from_value(value: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|arch| arch.value() == value)
    }

    /// True for architectures with a 32-bit address space
    pub fn is_32_bit(&self) -> bool {
        matches!(
            self,
            Architecture::I686 | Architecture::X86 | Architecture::Armv7l | Architecture::Wasm32
        )
    }
}

impl PartialOrd for Architecture {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Architecture {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.value().cmp(other.value())
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.value())
    }
}

impl FromStr for Architecture {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_value(s).ok_or_else(|| ConfigurationError::UnknownArchitecture {
            token: s.to_string(),
        })
    }
}

/// Snapshot of the machine running the build
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Host {
    /// Platform family of the host (linux, macos or windows)
    pub platform: PlatformName,
    /// Raw machine name in the host platform's own spelling
    pub machine: String,
    /// Whether 32-bit ARM user space runs on this host
    pub aarch32_el0: bool,
}

impl Host {
    /// Build a host description from explicit facts
    pub fn new(platform: PlatformName, machine: impl Into<String>) -> Self {
        Self {
            platform,
            machine: machine.into(),
            aarch32_el0: false,
        }
    }

    /// Mark the host as able to run 32-bit ARM binaries
    pub fn with_aarch32_el0(mut self, supported: bool) -> Self {
        self.aarch32_el0 = supported;
        self
    }

    /// Describe the machine this process runs on
    pub fn detect() -> Self {
        let platform = match std::env::consts::OS {
            "macos" => PlatformName::Macos,
            "windows" => PlatformName::Windows,
            _ => PlatformName::Linux,
        };
        let machine = machine_name(platform, std::env::consts::ARCH);
        let aarch32_el0 =
            platform == PlatformName::Linux && machine == "aarch64" && check_aarch32_el0();
        Self {
            platform,
            machine,
            aarch32_el0,
        }
    }
}

/// Translate a Rust target arch into the platform's `uname -m` style spelling
fn machine_name(platform: PlatformName, rust_arch: &str) -> String {
    let name = match (platform, rust_arch) {
        (PlatformName::Windows, "x86_64") => "AMD64",
        (PlatformName::Windows, "aarch64") => "ARM64",
        (PlatformName::Windows, "x86") => "x86",
        (PlatformName::Macos, "aarch64") => "arm64",
        (_, "x86") => "i686",
        (_, "powerpc64") => "ppc64le",
        (_, "arm") => "armv7l",
        (_, other) => other,
    };
    name.to_string()
}

fn check_aarch32_el0() -> bool {
    match std::process::Command::new("linux32")
        .args(["uname", "-m"])
        .stderr(std::process::Stdio::null())
        .output()
    {
        Ok(output) if output.status.success() => {
            String::from_utf8_lossy(&output.stdout).trim().starts_with("armv")
        }
        Ok(_) => false,
        Err(e) => {
            log::debug!("linux32 unavailable, assuming no aarch32 support: {e}");
            false
        }
    }
}

struct ArchSynonym {
    linux: Option<&'static str>,
    macos: Option<&'static str>,
    windows: Option<&'static str>,
}

impl ArchSynonym {
    fn get(&self, platform: PlatformName) -> Option<&'static str> {
        match platform {
            PlatformName::Linux => self.linux,
            PlatformName::Macos => self.macos,
            PlatformName::Windows => self.windows,
            PlatformName::Pyodide | PlatformName::Ios => None,
        }
    }
}

const ARCH_SYNONYMS: [ArchSynonym; 3] = [
    ArchSynonym {
        linux: Some("x86_64"),
        macos: Some("x86_64"),
        windows: Some("AMD64"),
    },
    ArchSynonym {
        linux: Some("i686"),
        macos: None,
        windows: Some("x86"),
    },
    ArchSynonym {
        linux: Some("aarch64"),
        macos: Some("arm64"),
        windows: Some("ARM64"),
    },
];

/// Translate `arch` from one platform's naming to another's.
///
/// Returns the input unchanged when no synonym row mentions it, and `None` when
/// the row has no spelling for the target platform.
pub fn arch_synonym(arch: &str, from: PlatformName, to: PlatformName) -> Option<String> {
    match ARCH_SYNONYMS.iter().find(|row| row.get(from) == Some(arch)) {
        Some(row) => row.get(to).map(str::to_string),
        None => Some(arch.to_string()),
    }
}

/// 64-bit architectures and the 32-bit peer the same host can also build
const BITNESS_PEERS: [(PlatformName, Architecture, Architecture); 3] = [
    (PlatformName::Linux, Architecture::X86_64, Architecture::I686),
    (PlatformName::Linux, Architecture::Aarch64, Architecture::Armv7l),
    (PlatformName::Windows, Architecture::Amd64, Architecture::X86),
];

/// Parse an architecture option string for `platform`
pub fn parse_config(
    config: &str,
    platform: PlatformName,
    host: &Host,
) -> Result<BTreeSet<Architecture>, ConfigurationError> {
    let mut result = BTreeSet::new();
    for token in config
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|t| !t.is_empty())
    {
        match token {
            "auto" => result.extend(auto_archs(platform, host)),
            "native" => result.extend(native_arch(platform, host)),
            "all" => result.extend(all_archs(platform)),
            "auto64" => result.extend(bitness_archs(platform, Bitness::Bits64, host)),
            "auto32" => result.extend(bitness_archs(platform, Bitness::Bits32, host)),
            other => {
                result.insert(other.parse::<Architecture>()?);
            }
        }
    }
    Ok(result)
}

/// The architecture this host builds natively for `platform`, if any
pub fn native_arch(platform: PlatformName, host: &Host) -> Option<Architecture> {
    match platform {
        PlatformName::Pyodide => Some(Architecture::Wasm32),
        PlatformName::Ios => {
            if host.platform == PlatformName::Macos {
                Architecture::from_value(&format!("{}_iphonesimulator", host.machine))
            } else {
                None
            }
        }
        _ => {
            let machine = if host.platform == platform {
                host.machine.clone()
            } else {
                arch_synonym(&host.machine, host.platform, platform)?
            };
            Architecture::from_value(&machine).filter(|arch| all_archs(platform).contains(arch))
        }
    }
}

/// Architectures selected by `auto`
pub fn auto_archs(platform: PlatformName, host: &Host) -> BTreeSet<Architecture> {
    let mut result = BTreeSet::new();
    let Some(native) = native_arch(platform, host) else {
        return result;
    };
    result.insert(native);

    match (platform, native) {
        (PlatformName::Windows, Architecture::Amd64) => {
            result.insert(Architecture::X86);
        }
        (PlatformName::Ios, Architecture::Arm64Iphonesimulator) => {
            result.insert(Architecture::Arm64Iphoneos);
        }
        _ => {}
    }
    result
}

/// Every architecture `platform` supports
pub fn all_archs(platform: PlatformName) -> BTreeSet<Architecture> {
    use Architecture::*;
    let archs: &[Architecture] = match platform {
        PlatformName::Linux => &[X86_64, I686, Aarch64, Ppc64le, S390x, Armv7l, Riscv64],
        PlatformName::Macos => &[X86_64, Arm64, Universal2],
        PlatformName::Windows => &[X86, Amd64, WinArm64],
        PlatformName::Pyodide => &[Wasm32],
        PlatformName::Ios => &[X86_64Iphonesimulator, Arm64Iphonesimulator, Arm64Iphoneos],
    };
    archs.iter().copied().collect()
}

/// Requested pointer width for `auto64`/`auto32`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bitness {
    /// 64-bit
    Bits64,
    /// 32-bit
    Bits32,
}

/// Native architectures of the given bitness
pub fn bitness_archs(
    platform: PlatformName,
    bitness: Bitness,
    host: &Host,
) -> BTreeSet<Architecture> {
    let mut result = BTreeSet::new();
    let Some(native) = native_arch(platform, host) else {
        return result;
    };

    match bitness {
        Bitness::Bits64 => {
            if !native.is_32_bit() {
                result.insert(native);
            }
        }
        Bitness::Bits32 => {
            if native.is_32_bit() {
                result.insert(native);
            } else if let Some((_, _, peer)) = BITNESS_PEERS
                .iter()
                .find(|(p, arch64, _)| *p == platform && *arch64 == native)
            {
                if native != Architecture::Aarch64 || host.aarch32_el0 {
                    result.insert(*peer);
                }
            }
        }
    }
    result
}

/// Reject empty sets and architectures `platform` cannot build
pub fn allowed_architectures_check(
    platform: PlatformName,
    architectures: &BTreeSet<Architecture>,
) -> Result<(), ConfigurationError> {
    let allowed = all_archs(platform);

    let mut msg = format!(
        "{} only supports {} at the moment.",
        platform.pretty(),
        format_set(&allowed)
    );
    if platform != PlatformName::Linux {
        msg.push_str(" If you want to set emulation architectures on Linux, use CIBW_ARCHS_LINUX instead.");
    }

    if !architectures.is_subset(&allowed) {
        return Err(ConfigurationError::DisallowedArchitectures {
            message: format!("Invalid archs option {}. {msg}", format_set(architectures)),
        });
    }
    if architectures.is_empty() {
        return Err(ConfigurationError::DisallowedArchitectures {
            message: format!("Empty archs option set. {msg}"),
        });
    }
    Ok(())
}

fn format_set(archs: &BTreeSet<Architecture>) -> String {
    let names: Vec<&str> = archs.iter().map(Architecture::value).collect();
    format!("[{}]", names.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;

    const PLATFORMS: [PlatformName; 5] = [
        PlatformName::Linux,
        PlatformName::Macos,
        PlatformName::Windows,
        PlatformName::Pyodide,
        PlatformName::Ios,
    ];

    fn hosts() -> Vec<Host> {
        vec![
            Host::new(PlatformName::Linux, "x86_64"),
            Host::new(PlatformName::Linux, "aarch64"),
            Host::new(PlatformName::Linux, "aarch64").with_aarch32_el0(true),
            Host::new(PlatformName::Linux, "i686"),
            Host::new(PlatformName::Macos, "arm64"),
            Host::new(PlatformName::Macos, "x86_64"),
            Host::new(PlatformName::Windows, "AMD64"),
            Host::new(PlatformName::Windows, "ARM64"),
        ]
    }

    fn set(archs: &[Architecture]) -> BTreeSet<Architecture> {
        archs.iter().copied().collect()
    }

    #[test]
    fn test_tokens_resolve_within_platform() {
        for host in hosts() {
            for platform in PLATFORMS {
                for token in ["auto", "native", "all", "auto64", "auto32"] {
                    let resolved = parse_config(token, platform, &host).unwrap();
                    assert!(
                        resolved.is_subset(&all_archs(platform)),
                        "{token} on {platform} from {host:?} gave {resolved:?}"
                    );
                }
            }
        }
    }

    #[test]
    fn test_auto64_auto32_disjoint() {
        for host in hosts() {
            for platform in PLATFORMS {
                let a64 = bitness_archs(platform, Bitness::Bits64, &host);
                let a32 = bitness_archs(platform, Bitness::Bits32, &host);
                assert!(a64.is_disjoint(&a32), "{platform} from {host:?}");
            }
        }
    }

    #[test]
    fn test_parse_splits_on_commas_and_whitespace() {
        let host = Host::new(PlatformName::Linux, "x86_64");
        let archs = parse_config("aarch64, ppc64le  s390x", PlatformName::Linux, &host).unwrap();
        assert_eq!(
            archs,
            set(&[Architecture::Aarch64, Architecture::Ppc64le, Architecture::S390x])
        );
    }

    #[test]
    fn test_parse_unknown_token_fails() {
        let host = Host::new(PlatformName::Linux, "x86_64");
        let err = parse_config("auto sparc", PlatformName::Linux, &host).unwrap_err();
        assert_eq!(
            err,
            ConfigurationError::UnknownArchitecture {
                token: "sparc".to_string()
            }
        );
    }

    #[test]
    fn test_names_are_case_sensitive() {
        assert_eq!(Architecture::from_value("arm64"), Some(Architecture::Arm64));
        assert_eq!(Architecture::from_value("ARM64"), Some(Architecture::WinArm64));
        assert_eq!(Architecture::from_value("Arm64"), None);
    }

    #[test]
    fn test_native_translates_across_platforms() {
        let mac = Host::new(PlatformName::Macos, "arm64");
        assert_eq!(native_arch(PlatformName::Linux, &mac), Some(Architecture::Aarch64));
        assert_eq!(native_arch(PlatformName::Windows, &mac), Some(Architecture::WinArm64));

        let linux32 = Host::new(PlatformName::Linux, "i686");
        assert_eq!(native_arch(PlatformName::Macos, &linux32), None);
        assert_eq!(native_arch(PlatformName::Windows, &linux32), Some(Architecture::X86));
    }

    #[test]
    fn test_native_pyodide_and_ios() {
        let linux = Host::new(PlatformName::Linux, "x86_64");
        assert_eq!(native_arch(PlatformName::Pyodide, &linux), Some(Architecture::Wasm32));
        assert_eq!(native_arch(PlatformName::Ios, &linux), None);

        let mac = Host::new(PlatformName::Macos, "arm64");
        assert_eq!(
            native_arch(PlatformName::Ios, &mac),
            Some(Architecture::Arm64Iphonesimulator)
        );
    }

    #[test]
    fn test_auto_archs_extras() {
        let win = Host::new(PlatformName::Windows, "AMD64");
        assert_eq!(
            auto_archs(PlatformName::Windows, &win),
            set(&[Architecture::Amd64, Architecture::X86])
        );

        let mac = Host::new(PlatformName::Macos, "arm64");
        assert_eq!(
            auto_archs(PlatformName::Ios, &mac),
            set(&[Architecture::Arm64Iphonesimulator, Architecture::Arm64Iphoneos])
        );

        let intel_mac = Host::new(PlatformName::Macos, "x86_64");
        assert_eq!(
            auto_archs(PlatformName::Ios, &intel_mac),
            set(&[Architecture::X86_64Iphonesimulator])
        );
    }

    #[test]
    fn test_auto32_on_aarch64_needs_el0() {
        let without = Host::new(PlatformName::Linux, "aarch64");
        assert!(bitness_archs(PlatformName::Linux, Bitness::Bits32, &without).is_empty());

        let with = without.clone().with_aarch32_el0(true);
        assert_eq!(
            bitness_archs(PlatformName::Linux, Bitness::Bits32, &with),
            set(&[Architecture::Armv7l])
        );
    }

    #[test]
    fn test_bitness_for_32_bit_native() {
        let host = Host::new(PlatformName::Linux, "i686");
        assert!(bitness_archs(PlatformName::Linux, Bitness::Bits64, &host).is_empty());
        assert_eq!(
            bitness_archs(PlatformName::Linux, Bitness::Bits32, &host),
            set(&[Architecture::I686])
        );
        assert!(bitness_archs(PlatformName::Pyodide, Bitness::Bits64, &host).is_empty());
    }

    #[test]
    fn test_allowed_check_rejects_empty() {
        let err = allowed_architectures_check(PlatformName::Linux, &BTreeSet::new()).unwrap_err();
        assert!(err.to_string().starts_with("Empty archs option set. Linux only supports"));
    }

    #[test]
    fn test_allowed_check_rejects_foreign() {
        let err = allowed_architectures_check(PlatformName::Macos, &set(&[Architecture::Aarch64]))
            .unwrap_err()
            .to_string();
        assert!(err.starts_with(
            "Invalid archs option [aarch64]. macOS only supports [arm64, universal2, x86_64]"
        ));
        assert!(err.contains("CIBW_ARCHS_LINUX"));
    }

    #[test]
    fn test_allowed_check_accepts_subset() {
        assert!(
            allowed_architectures_check(PlatformName::Linux, &set(&[Architecture::Aarch64])).is_ok()
        );
    }

    #[test]
    fn test_arch_synonym_passthrough() {
        assert_eq!(
            arch_synonym("ppc64le", PlatformName::Linux, PlatformName::Macos),
            Some("ppc64le".to_string())
        );
        assert_eq!(arch_synonym("i686", PlatformName::Linux, PlatformName::Macos), None);
    }
}
