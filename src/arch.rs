/// Target architecture description and capability queries.
/// Which atomic instructions exist is a property of the architecture
/// generation, so every capability is derived once from the config here and
/// never re-checked per operation.
/// Based on the CUDA compute capability tables and the ROCm ISA docs.
use crate::error::{Error, Result};
use crate::precision::ElementKind;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Vendor {
    Nvidia,
    Amd,
}

/// How a paired (2-wide) 16-bit atomic add is realized on a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PairSupport {
    /// Hardware instruction for the packed type
    Native,
    /// Emulated with a compare-and-swap loop over the packed bits
    CasLoop,
    /// No pairing; always take the single-element path
    Unavailable,
}

impl std::fmt::Display for PairSupport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PairSupport::Native      => write!(f, "native"),
            PairSupport::CasLoop     => write!(f, "cas-loop"),
            PairSupport::Unavailable => write!(f, "unavailable"),
        }
    }
}

/// Hardware description of one GPU generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchConfig {
    pub name: String,
    pub vendor: Vendor,
    /// Compute capability (NVIDIA) or GFX major/minor (AMD)
    pub major: u32,
    pub minor: u32,
    /// Number of streaming multiprocessors / compute units
    pub num_sms: usize,
    /// Lanes per warp (32) or wavefront (64)
    pub warp_size: usize,
    /// Capacity of the simulated HBM. Far below the real part so tests stay cheap.
    #[serde(default = "default_sim_hbm_bytes")]
    pub sim_hbm_bytes: usize,
}

fn default_sim_hbm_bytes() -> usize {
    64 * 1024 * 1024
}

impl ArchConfig {
    fn nvidia(name: &str, major: u32, minor: u32, num_sms: usize) -> Self {
        ArchConfig {
            name: name.to_string(),
            vendor: Vendor::Nvidia,
            major,
            minor,
            num_sms,
            warp_size: 32,
            sim_hbm_bytes: default_sim_hbm_bytes(),
        }
    }

    fn amd(name: &str, major: u32, minor: u32, num_sms: usize) -> Self {
        ArchConfig {
            name: name.to_string(),
            vendor: Vendor::Amd,
            major,
            minor,
            num_sms,
            warp_size: 64,
            sim_hbm_bytes: default_sim_hbm_bytes(),
        }
    }

    /// K80 (Kepler, CC 3.7)
    pub fn k80() -> Self {
        Self::nvidia("k80", 3, 7, 13)
    }

    /// P100 (Pascal, CC 6.0)
    pub fn p100() -> Self {
        Self::nvidia("p100", 6, 0, 56)
    }

    /// V100 (Volta, CC 7.0)
    pub fn v100() -> Self {
        Self::nvidia("v100", 7, 0, 80)
    }

    /// A100 (Ampere, CC 8.0)
    pub fn a100() -> Self {
        Self::nvidia("a100", 8, 0, 108)
    }

    /// H100 (Hopper, CC 9.0)
    pub fn h100() -> Self {
        Self::nvidia("h100", 9, 0, 132)
    }

    /// MI250 (CDNA2, gfx90a)
    pub fn mi250() -> Self {
        Self::amd("mi250", 9, 10, 104)
    }

    /// MI300 (CDNA3, gfx942)
    pub fn mi300() -> Self {
        Self::amd("mi300", 9, 42, 304)
    }

    pub const PRESETS: [&'static str; 7] = ["k80", "p100", "v100", "a100", "h100", "mi250", "mi300"];

    pub fn preset(name: &str) -> Result<Self> {
        match name.to_ascii_lowercase().as_str() {
            "k80"   => Ok(Self::k80()),
            "p100"  => Ok(Self::p100()),
            "v100"  => Ok(Self::v100()),
            "a100"  => Ok(Self::a100()),
            "h100"  => Ok(Self::h100()),
            "mi250" => Ok(Self::mi250()),
            "mi300" => Ok(Self::mi300()),
            other => Err(Error::InvalidArch(format!(
                "unknown preset '{}', expected one of {:?}",
                other,
                Self::PRESETS
            ))),
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: ArchConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        Self::from_json_str(&data)
    }

    /// Resolve a CLI argument: a preset name, or a path to a JSON config.
    pub fn resolve(arg: &str) -> Result<Self> {
        if arg.ends_with(".json") || Path::new(arg).is_file() {
            Self::from_file(arg)
        } else {
            Self::preset(arg)
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.warp_size != 32 && self.warp_size != 64 {
            return Err(Error::InvalidArch(format!(
                "warp_size must be 32 or 64, got {}",
                self.warp_size
            )));
        }
        if self.num_sms == 0 {
            return Err(Error::InvalidArch("num_sms must be non-zero".to_string()));
        }
        Ok(())
    }

    fn at_least(&self, major: u32, minor: u32) -> bool {
        (self.major, self.minor) >= (major, minor)
    }

    /// Paired atomic add availability for an element kind.
    ///   fp16x2: native from CC 7.0
    ///   bf16x2: native from CC 8.0
    ///   AMD:    no packed 16-bit atomic add, emulated with CAS on the 32-bit word
    pub fn pair_support(&self, kind: ElementKind) -> PairSupport {
        match self.vendor {
            Vendor::Amd => PairSupport::CasLoop,
            Vendor::Nvidia => {
                let native = match kind {
                    ElementKind::F16  => self.at_least(7, 0),
                    ElementKind::BF16 => self.at_least(8, 0),
                };
                if native {
                    PairSupport::Native
                } else {
                    PairSupport::Unavailable
                }
            }
        }
    }

    /// Lane-group matching plus adjacent-lane shifts, needed by the
    /// cooperative reducer. `__match_any_sync` arrived with Volta.
    pub fn has_lane_match(&self) -> bool {
        match self.vendor {
            Vendor::Amd => true,
            Vendor::Nvidia => self.at_least(7, 0),
        }
    }
}
