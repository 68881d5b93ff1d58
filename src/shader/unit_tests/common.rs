use std::sync::Arc;

use crate::base::signal::SignalWriter;
use crate::error::ShaderResult;
use crate::shader::command::{DecodeCommand, DecodeCommandKind, DecodeState, ShaderCommand};
use crate::shader::config::{ScalarShaderConfig, VectorShaderConfig};
use crate::shader::decode_exec::DecodeExecute;
use crate::shader::decode_exec_vector::VectorDecodeExecute;
use crate::shader::emulator::TraceEmulator;
use crate::shader::inst::{DynInst, VectorInstruction};
use crate::shader::isa::ShaderInstr;
use crate::shader::ports::{wire_scalar, wire_vector, FetchBatch, FetchLink, VectorBatch};
use crate::shader::texture::{TextureRequest, TextureResult, TextureUnitLink, TextureUnitState};
use crate::timeq::Cycle;

pub fn inst(text: &str, pc: u32, thread: u32) -> DynInst {
    element_inst(text, pc, thread, thread)
}

pub fn element_inst(text: &str, pc: u32, thread: u32, element: u32) -> DynInst {
    let instr = text.parse::<ShaderInstr>().unwrap();
    DynInst::new(Arc::new(instr), pc, thread, element, 0)
}

pub fn vector_inst(text: &str, pc: u32, thread: u32, vector_length: u32) -> VectorInstruction {
    let first = thread * vector_length;
    VectorInstruction::new(
        (first..first + vector_length)
            .map(|element| element_inst(text, pc, thread, element))
            .collect(),
    )
}

pub fn texture_result(request: &TextureRequest) -> TextureResult {
    TextureResult {
        access_id: request.access.id,
        samples: vec![[1.0; 4]; request.access.elements.len()],
        start_cycle: request.access.issued_at,
    }
}

pub trait Clocked {
    fn clock_at(&mut self, cycle: Cycle) -> ShaderResult<()>;
}

impl Clocked for DecodeExecute {
    fn clock_at(&mut self, cycle: Cycle) -> ShaderResult<()> {
        self.clock(cycle)
    }
}

impl Clocked for VectorDecodeExecute {
    fn clock_at(&mut self, cycle: Cycle) -> ShaderResult<()> {
        self.clock(cycle)
    }
}

/// Drives one engine cycle by cycle, playing fetch and the texture units by hand.
pub struct Bench<F, E> {
    pub engine: E,
    pub fetch: FetchLink<F>,
    pub commands: SignalWriter<ShaderCommand>,
    pub units: Vec<TextureUnitLink>,
    /// Next cycle to clock.
    pub cycle: Cycle,
    /// Control commands with the cycle they were sent on.
    pub received: Vec<(Cycle, DecodeCommand)>,
    pub requests: Vec<(Cycle, TextureRequest)>,
    pub state: Option<DecodeState>,
}

pub type ScalarBench = Bench<FetchBatch, DecodeExecute>;
pub type VectorBench = Bench<VectorBatch, VectorDecodeExecute>;

impl ScalarBench {
    pub fn scalar(config: ScalarShaderConfig) -> Self {
        let wiring = wire_scalar(&config);
        let engine =
            DecodeExecute::new(Arc::new(config), wiring.engine, Box::new(TraceEmulator::default()))
                .unwrap();
        Bench::start(engine, wiring.fetch, wiring.commands, wiring.texture_units)
    }
}

impl VectorBench {
    pub fn vector(config: VectorShaderConfig) -> Self {
        Self::vector_with(config, TraceEmulator::default())
    }

    pub fn vector_with(config: VectorShaderConfig, emulator: TraceEmulator) -> Self {
        let instr_cycle = config.alu_mode().unwrap().instr_cycle();
        let wiring = wire_vector(&config, instr_cycle);
        let engine = VectorDecodeExecute::new(Arc::new(config), wiring.engine, Box::new(emulator)).unwrap();
        Bench::start(engine, wiring.fetch, wiring.commands, wiring.texture_units)
    }
}

impl<F, E: Clocked> Bench<F, E> {
    /// Wraps a freshly built engine and clocks its reset cycle.
    fn start(
        engine: E,
        fetch: FetchLink<F>,
        commands: SignalWriter<ShaderCommand>,
        units: Vec<TextureUnitLink>,
    ) -> Self {
        let mut bench = Self {
            engine,
            fetch,
            commands,
            units,
            cycle: 0,
            received: Vec::new(),
            requests: Vec::new(),
            state: None,
        };
        bench.step();
        bench
    }

    pub fn step(&mut self) {
        let sent = self.cycle;
        self.engine.clock_at(sent).unwrap();
        self.cycle += 1;
        for command in self.fetch.control.read_all(self.cycle).unwrap() {
            self.received.push((sent, command));
        }
        if let Some(state) = self.fetch.decode_state.read(self.cycle).unwrap() {
            self.state = Some(state);
        }
        for unit in &self.units {
            for request in unit.requests.read_all(self.cycle).unwrap() {
                self.requests.push((sent, request));
            }
        }
    }

    pub fn run_to(&mut self, cycle: Cycle) {
        while self.cycle < cycle {
            self.step();
        }
    }

    /// Queues a fetch that the engine sees on the next clocked cycle.
    pub fn feed(&mut self, batch: F) {
        self.fetch.fetch.write(self.cycle - 1, batch).unwrap();
    }

    /// One texture unit state event (four tickets) seen on the next clocked cycle.
    pub fn grant_tickets(&mut self, unit: usize) {
        self.units[unit].state.write(self.cycle - 1, TextureUnitState).unwrap();
    }

    pub fn complete_texture(&mut self, unit: usize, request: &TextureRequest) {
        self.units[unit]
            .results
            .write(self.cycle - 1, texture_result(request))
            .unwrap();
    }

    pub fn reset_engine(&mut self) {
        self.commands.write(self.cycle - 1, ShaderCommand::Reset).unwrap();
    }

    pub fn sent(&self, kind: DecodeCommandKind) -> Vec<(Cycle, DecodeCommand)> {
        self.received
            .iter()
            .filter(|(_, command)| command.kind == kind)
            .copied()
            .collect()
    }
}
