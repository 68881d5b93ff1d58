use std::str::FromStr;

use serde::Deserialize;

use crate::error::{ShaderError, ShaderResult};
use crate::shader::arch::ArchParams;

/// Scalar (one thread per element) decode/execute engine parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScalarShaderConfig {
    pub num_threads: u32,
    /// Threads executing in lock step.
    pub thread_group: u32,
    pub threads_cycle: u32,
    pub instr_cycle: u32,
    /// SIMD + scalar dual issue.  Requires two instructions per thread and cycle.
    pub scalar_alu: bool,
    pub texture_units: u32,
    pub texture_request_rate: u32,
    pub requests_per_tex_unit: u32,
    pub arch: String,
}

impl Default for ScalarShaderConfig {
    fn default() -> Self {
        Self {
            num_threads: 16,
            thread_group: 4,
            threads_cycle: 4,
            instr_cycle: 1,
            scalar_alu: false,
            texture_units: 1,
            texture_request_rate: 1,
            requests_per_tex_unit: 1,
            arch: "SIMD4VarLat".to_string(),
        }
    }
}

fn require(cond: bool, message: &str) -> ShaderResult<()> {
    if cond {
        Ok(())
    } else {
        Err(ShaderError::Config(message.to_string()))
    }
}

impl ScalarShaderConfig {
    pub fn validate(&self) -> ShaderResult<()> {
        require(self.thread_group > 0, "thread_group must be > 0")?;
        require(self.num_threads >= self.thread_group, "num_threads must be >= thread_group")?;
        require(self.threads_cycle > 0, "threads_cycle must be > 0")?;
        require(self.instr_cycle > 0, "instr_cycle must be > 0")?;
        require(
            !self.scalar_alu || self.instr_cycle == 2,
            "scalar_alu requires instr_cycle = 2",
        )?;
        if self.texture_units > 0 {
            require(self.texture_request_rate > 0, "texture_request_rate must be > 0")?;
            require(self.requests_per_tex_unit > 0, "requests_per_tex_unit must be > 0")?;
        }
        ArchParams::select(&self.arch).map(|_| ())
    }

    /// Instructions received from fetch in one cycle.
    pub fn batch_size(&self) -> usize {
        (self.threads_cycle * self.instr_cycle) as usize
    }

    pub fn groups_cycle(&self) -> u32 {
        self.threads_cycle.div_ceil(self.thread_group)
    }
}

/// ALU array organisation of the vector engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VectorAluMode {
    /// One SIMD4 slot.
    Simd4,
    /// SIMD4 slot plus a scalar slot.
    Simd4Scalar,
    /// Scalar (SOA) ALUs, one slot.
    Scalar,
}

impl VectorAluMode {
    pub fn instr_cycle(self) -> u32 {
        match self {
            VectorAluMode::Simd4Scalar => 2,
            _ => 1,
        }
    }

    pub fn dual_issue(self) -> bool {
        self == VectorAluMode::Simd4Scalar
    }
}

impl FromStr for VectorAluMode {
    type Err = ShaderError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "simd4" => Ok(Self::Simd4),
            "simd4+scalar" => Ok(Self::Simd4Scalar),
            "scalar" => Ok(Self::Scalar),
            _ => Err(ShaderError::Config(format!(
                "unsupported ALU configuration '{value}', expected one of: simd4, simd4+scalar, scalar"
            ))),
        }
    }
}

/// Vector decode/execute engine parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VectorShaderConfig {
    pub vector_threads: u32,
    pub vector_length: u32,
    pub alu_width: u32,
    pub alu_config: String,
    /// Keep a stalled fetch in decode instead of asking fetch to repeat it.
    pub wait_on_stall: bool,
    /// Block on texture results at wait points instead of at the texture instruction.
    pub explicit_block: bool,
    pub texture_units: u32,
    pub texture_request_rate: u32,
    pub requests_per_tex_unit: u32,
    pub arch: String,
    pub gpu_clock_mhz: u64,
    pub shader_clock_mhz: u64,
}

impl Default for VectorShaderConfig {
    fn default() -> Self {
        Self {
            vector_threads: 8,
            vector_length: 8,
            alu_width: 4,
            alu_config: "simd4+scalar".to_string(),
            wait_on_stall: true,
            explicit_block: false,
            texture_units: 1,
            texture_request_rate: 1,
            requests_per_tex_unit: 1,
            arch: "SIMD4VarLat".to_string(),
            gpu_clock_mhz: 500,
            shader_clock_mhz: 500,
        }
    }
}

impl VectorShaderConfig {
    pub fn validate(&self) -> ShaderResult<()> {
        require(self.vector_threads > 0, "vector_threads must be > 0")?;
        require(self.vector_length > 0, "vector_length must be > 0")?;
        require(self.alu_width > 0, "alu_width must be > 0")?;
        require(
            self.vector_length % self.alu_width == 0,
            "vector_length must be a multiple of alu_width",
        )?;
        require(
            self.gpu_clock_mhz > 0 && self.shader_clock_mhz > 0,
            "clock frequencies must be > 0",
        )?;
        if self.texture_units > 0 {
            require(self.texture_request_rate > 0, "texture_request_rate must be > 0")?;
            require(self.requests_per_tex_unit > 0, "requests_per_tex_unit must be > 0")?;
        }
        self.alu_mode()?;
        ArchParams::select(&self.arch).map(|_| ())
    }

    pub fn alu_mode(&self) -> ShaderResult<VectorAluMode> {
        self.alu_config.parse()
    }

    /// GPU domain cycles, rounded up, that fit in one shader domain cycle.  Each of them can
    /// deliver a texture result per unit before the next wake-up pass.
    pub fn texture_clock_ratio(&self) -> u32 {
        self.gpu_clock_mhz
            .div_ceil(self.shader_clock_mhz.max(1))
            .clamp(1, u32::MAX as u64) as u32
    }

    /// Cycles the ALU array needs to cover every lane once.
    pub fn lane_passes(&self) -> u32 {
        self.vector_length.div_ceil(self.alu_width)
    }
}

#[cfg(test)]
mod tests {
    use super::{ScalarShaderConfig, VectorAluMode, VectorShaderConfig};
    use crate::error::ShaderError;

    #[test]
    fn scalar_defaults_are_valid() {
        let cfg = ScalarShaderConfig::default();
        cfg.validate().unwrap();
        assert_eq!(1, cfg.groups_cycle());
        assert_eq!(4, cfg.batch_size());
    }

    #[test]
    fn scalar_alu_needs_two_instructions() {
        let mut cfg = ScalarShaderConfig::default();
        cfg.scalar_alu = true;
        assert!(matches!(cfg.validate(), Err(ShaderError::Config(_))));
        cfg.instr_cycle = 2;
        cfg.validate().unwrap();
    }

    #[test]
    fn thread_group_bounds() {
        let mut cfg = ScalarShaderConfig::default();
        cfg.num_threads = 2;
        assert!(cfg.validate().is_err());
        cfg.thread_group = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn vector_alu_modes() {
        assert_eq!(VectorAluMode::Simd4Scalar, "simd4+scalar".parse().unwrap());
        assert_eq!(1, VectorAluMode::Scalar.instr_cycle());
        assert!("simd8".parse::<VectorAluMode>().is_err());
        let mut cfg = VectorShaderConfig::default();
        cfg.alu_config = "vliw".to_string();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn vector_length_multiple_of_width() {
        let mut cfg = VectorShaderConfig::default();
        cfg.vector_length = 6;
        assert!(cfg.validate().is_err());
        cfg.vector_length = 12;
        cfg.validate().unwrap();
        assert_eq!(3, cfg.lane_passes());
    }

    #[test]
    fn texture_clock_ratio_follows_clocks() {
        let mut cfg = VectorShaderConfig::default();
        assert_eq!(1, cfg.texture_clock_ratio());
        cfg.gpu_clock_mhz = 1000;
        assert_eq!(2, cfg.texture_clock_ratio());
        cfg.shader_clock_mhz = 400;
        assert_eq!(3, cfg.texture_clock_ratio());
        cfg.gpu_clock_mhz = 200;
        assert_eq!(1, cfg.texture_clock_ratio());
    }
}
