use std::fs;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use ushader::sim::config::{EngineKind, FullConfig};
use ushader::sim::log::init_logging;
use ushader::sim::top::Sim;

#[derive(Parser)]
#[command(version, about)]
struct UshaderArgs {
    #[arg(help = "Path to config.toml")]
    config_path: PathBuf,
    #[arg(long, help = "Override engine (scalar, vector)")]
    engine: Option<EngineKind>,
    #[arg(long, help = "Override number of threads (or vector threads) running the program")]
    threads: Option<u32>,
    #[arg(long, help = "Override shader program file")]
    program: Option<PathBuf>,
    #[arg(long, help = "Override simulation timeout in cycles")]
    timeout: Option<u64>,
    #[arg(long, help = "Enable log at level (0:none, 1:info, 2:debug)")]
    log: Option<u64>,
    #[arg(long, help = "Trace every executed instruction")]
    gen_trace: Option<bool>,
}

pub fn main() -> anyhow::Result<()> {
    let argv = UshaderArgs::parse();
    let text = fs::read_to_string(&argv.config_path)
        .with_context(|| format!("failed to read config file {}", argv.config_path.display()))?;
    let mut config = FullConfig::from_toml(&text)?;

    // override toml configs with argv
    config.sim.engine = argv.engine.unwrap_or(config.sim.engine);
    config.sim.timeout = argv.timeout.unwrap_or(config.sim.timeout);
    config.sim.log_level = argv.log.unwrap_or(config.sim.log_level);
    config.sim.trace = argv.gen_trace.unwrap_or(config.sim.trace);
    config.workload.threads = argv.threads.unwrap_or(config.workload.threads);
    if let Some(path) = &argv.program {
        config.workload.program = fs::read_to_string(path)
            .with_context(|| format!("failed to read program {}", path.display()))?;
    }

    init_logging(config.sim.log_level);

    let report = Sim::new(config).simulate()?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
