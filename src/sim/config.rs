use std::str::FromStr;

use anyhow::Context;
use log::warn;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use toml::*;

use crate::shader::config::{ScalarShaderConfig, VectorShaderConfig};

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    #[default]
    Scalar,
    Vector,
}

impl FromStr for EngineKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "scalar" => Ok(Self::Scalar),
            "vector" => Ok(Self::Vector),
            _ => Err(format!(
                "unsupported engine '{}', expected one of: scalar, vector",
                value
            )),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SimConfig {
    pub engine: EngineKind,
    pub log_level: u64,
    pub timeout: u64,
    pub trace: bool,
}

pub trait Config: DeserializeOwned + Default {
    fn from_section(section: Option<&Value>) -> anyhow::Result<Self> {
        match section {
            Some(value) => value
                .clone()
                .try_into()
                .context("cannot deserialize config section"),
            None => {
                warn!("config section not found");
                Ok(Self::default())
            }
        }
    }
}

impl Config for SimConfig {}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            engine: EngineKind::Scalar,
            log_level: 0,
            timeout: 100000,
            trace: false,
        }
    }
}

/// Program and texture behaviour fed to the engine by the reference collaborators.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct WorkloadConfig {
    /// Assembly run by every thread.
    pub program: String,
    /// Threads (scalar) or vector threads (vector) to run; 0 runs one per hardware thread.
    pub threads: u32,
    /// Texture unit cycles from request to result.
    pub texture_latency: u64,
    /// Extra random cycles added to each texture access.
    pub texture_jitter: u64,
    /// Lanes a texture unit keeps in flight.
    pub texture_capacity: u32,
    pub seed: u64,
    /// Times each jump is taken per vector thread before falling through.
    pub jump_budget: u32,
}

impl Config for WorkloadConfig {}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            program: "\
                mov r0, i0\n\
                tex r1, r0, t0\n\
                mad r2, r1, c0, c1\n\
                mov o0, r2\n\
                end\n"
                .to_string(),
            threads: 0,
            texture_latency: 20,
            texture_jitter: 0,
            texture_capacity: 16,
            seed: 0,
            jump_budget: 0,
        }
    }
}

impl Config for ScalarShaderConfig {}

impl Config for VectorShaderConfig {}

/// Every section of a configuration file.
#[derive(Debug, Clone, Default)]
pub struct FullConfig {
    pub sim: SimConfig,
    pub workload: WorkloadConfig,
    pub scalar: ScalarShaderConfig,
    pub vector: VectorShaderConfig,
}

impl FullConfig {
    pub fn from_table(table: &Table) -> anyhow::Result<Self> {
        Ok(Self {
            sim: SimConfig::from_section(table.get("sim")).context("[sim]")?,
            workload: WorkloadConfig::from_section(table.get("workload")).context("[workload]")?,
            scalar: ScalarShaderConfig::from_section(table.get("scalar")).context("[scalar]")?,
            vector: VectorShaderConfig::from_section(table.get("vector")).context("[vector]")?,
        })
    }

    pub fn from_toml(text: &str) -> anyhow::Result<Self> {
        let table: Table = toml::from_str(text).context("cannot parse config toml")?;
        Self::from_table(&table)
    }
}
