use std::sync::Arc;

use anyhow::{bail, Context};
use log::{info, warn};
use serde::Serialize;

use crate::base::behavior::*;
use crate::shader::isa::assemble;
use crate::shader::ports::{wire_scalar, wire_vector};
use crate::shader::{
    DecodeExecStats, DecodeExecute, TraceEmulator, VectorDecodeExecute, STAMP_FRAGMENTS,
    TICKETS_PER_STATE,
};
use crate::sim::config::{EngineKind, FullConfig};
use crate::sim::fetch::{Program, ProgramFetch, VectorProgramFetch};
use crate::sim::texture_unit::TextureUnitModel;
use crate::timeq::{ClockDomain, Cycle, DomainClock};

/// Outcome of one run, printed by the driver.
#[derive(Debug, Clone, Serialize)]
pub struct SimReport {
    pub engine: EngineKind,
    /// Shader domain cycles simulated.
    pub cycles: Cycle,
    pub finished: bool,
    pub fetch_batches: u64,
    pub texture_accesses: u64,
    pub stats: DecodeExecStats,
}

pub struct Sim {
    config: FullConfig,
}

impl Sim {
    pub fn new(config: FullConfig) -> Self {
        Self { config }
    }

    pub fn simulate(&mut self) -> anyhow::Result<SimReport> {
        let program: Program = assemble(&self.config.workload.program)
            .context("cannot assemble workload program")?
            .into_iter()
            .map(Arc::new)
            .collect();
        info!(
            "running {} instructions on the {:?} engine",
            program.len(),
            self.config.sim.engine
        );
        let report = match self.config.sim.engine {
            EngineKind::Scalar => self.run_scalar(program)?,
            EngineKind::Vector => self.run_vector(program)?,
        };
        if report.finished {
            info!("all threads ended after {} cycles", report.cycles);
        } else {
            warn!("timed out after {} cycles", report.cycles);
        }
        Ok(report)
    }

    fn check_texture_capacity(&self, units: u32, lanes: u32) -> anyhow::Result<()> {
        let tickets = self.config.workload.texture_capacity / TICKETS_PER_STATE * TICKETS_PER_STATE;
        if units > 0 && tickets < lanes {
            bail!(
                "texture_capacity {} cannot admit a request of {} lanes",
                self.config.workload.texture_capacity,
                lanes
            );
        }
        Ok(())
    }

    fn emulator(&self) -> Box<TraceEmulator> {
        Box::new(
            TraceEmulator::new(STAMP_FRAGMENTS as u32)
                .with_jump_budget(self.config.workload.jump_budget),
        )
    }

    fn run_scalar(&self, program: Program) -> anyhow::Result<SimReport> {
        let config = &self.config.scalar;
        self.check_texture_capacity(config.texture_units, 1)?;
        let wiring = wire_scalar(config);
        let active = match self.config.workload.threads {
            0 => config.num_threads,
            n => n.min(config.num_threads),
        };
        if active % STAMP_FRAGMENTS as u32 != 0 {
            bail!("{active} threads do not fill whole stamps of {STAMP_FRAGMENTS}");
        }
        let mut fetch = ProgramFetch::new(
            wiring.fetch,
            program,
            config.num_threads,
            active,
            config.thread_group,
            config.threads_cycle,
            config.instr_cycle,
        )
        .with_trace(self.config.sim.trace);
        let mut units: Vec<_> = wiring
            .texture_units
            .into_iter()
            .enumerate()
            .map(|(id, link)| TextureUnitModel::new(id, link, &self.config.workload))
            .collect();
        let mut engine = DecodeExecute::new(Arc::new(config.clone()), wiring.engine, self.emulator())?;

        let mut cycles = 0;
        let mut finished = false;
        while cycles < self.config.sim.timeout {
            fetch.clock(cycles)?;
            engine.tick_one()?;
            for unit in units.iter_mut() {
                unit.clock(cycles)?;
            }
            cycles += 1;
            if fetch.finished() {
                finished = true;
                break;
            }
        }

        Ok(SimReport {
            engine: EngineKind::Scalar,
            cycles,
            finished,
            fetch_batches: fetch.counters.batches,
            texture_accesses: units.iter().map(|u| u.accesses).sum(),
            stats: engine.stats().clone(),
        })
    }

    fn run_vector(&self, program: Program) -> anyhow::Result<SimReport> {
        let config = &self.config.vector;
        self.check_texture_capacity(config.texture_units, config.vector_length)?;
        if config.vector_length % STAMP_FRAGMENTS as u32 != 0 {
            bail!("vector length {} does not fill whole stamps of {STAMP_FRAGMENTS}", config.vector_length);
        }
        let instr_cycle = config.alu_mode()?.instr_cycle();
        let wiring = wire_vector(config, instr_cycle);
        let active = match self.config.workload.threads {
            0 => config.vector_threads,
            n => n.min(config.vector_threads),
        };
        let mut fetch = VectorProgramFetch::new(
            wiring.fetch,
            program,
            config.vector_threads,
            active,
            config.vector_length,
            instr_cycle,
        )
        .with_trace(self.config.sim.trace);
        let mut units: Vec<_> = wiring
            .texture_units
            .into_iter()
            .enumerate()
            .map(|(id, link)| TextureUnitModel::new(id, link, &self.config.workload))
            .collect();
        let mut engine =
            VectorDecodeExecute::new(Arc::new(config.clone()), wiring.engine, self.emulator())?;

        let mut clock = DomainClock::new(config.gpu_clock_mhz, config.shader_clock_mhz);
        let mut finished = false;
        while clock.shader_cycle() < self.config.sim.timeout {
            let tick = clock.next_tick();
            match tick.domain {
                ClockDomain::Gpu => {
                    engine.gpu_clock(tick.cycle)?;
                    for unit in units.iter_mut() {
                        unit.clock(tick.cycle)?;
                    }
                }
                ClockDomain::Shader => {
                    fetch.clock(tick.cycle)?;
                    engine.shader_clock(tick.cycle)?;
                    if fetch.finished() {
                        finished = true;
                        break;
                    }
                }
            }
        }

        Ok(SimReport {
            engine: EngineKind::Vector,
            cycles: clock.shader_cycle(),
            finished,
            fetch_batches: fetch.counters.batches,
            texture_accesses: units.iter().map(|u| u.accesses).sum(),
            stats: engine.stats().clone(),
        })
    }
}
