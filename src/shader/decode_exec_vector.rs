use std::collections::VecDeque;
use std::sync::Arc;

use log::{debug, info};

use crate::base::behavior::*;
use crate::base::module::{module, IsModule, ModuleBase};
use crate::base::signal::{signal, SignalReader, SignalWriter};
use crate::error::{ShaderError, ShaderResult};
use crate::shader::arch::ArchParams;
use crate::shader::command::{DecodeCommandKind, DecodeState, EngineState, ShaderCommand};
use crate::shader::config::{VectorAluMode, VectorShaderConfig};
use crate::shader::control::FetchControl;
use crate::shader::decode_exec::Decode;
use crate::shader::emulator::ShaderEmulator;
use crate::shader::hazard::{thread_entry, ThreadControl, WritePortWindow};
use crate::shader::inst::{DynInst, VectorFetch};
use crate::shader::isa::{Bank, Operand, ShaderOpcode};
use crate::shader::ports::{DecodeExecPorts, VectorBatch};
use crate::shader::stats::DecodeExecStats;
use crate::shader::texture::TextureCoordinator;
use crate::shader::{MAX_EXEC_BW, MAX_EXEC_LAT};
use crate::timeq::Cycle;

/// Shortest distance between two vector fetches.
const MIN_FETCH_INTERVAL: u32 = 2;

#[derive(Debug)]
pub struct VectorDecodeExecState {
    pub engine: EngineState,
    pub threads: Vec<ThreadControl>,
    pub stats: DecodeExecStats,
    window: WritePortWindow,
    fetch: VectorFetch,
    /// A vector fetch is waiting in decode.
    fetch_available: bool,
    executing: bool,
    cycles_to_next_fetch: u32,
    cycles_to_next_exec: u32,
    current_repeat_rate: u32,
    reserve_simd: bool,
    reserve_scalar: bool,
    wake_queue: VecDeque<u32>,
}

impl VectorDecodeExecState {
    fn new(config: &VectorShaderConfig) -> Self {
        Self {
            engine: EngineState::Reset,
            threads: vec![ThreadControl::default(); config.vector_threads as usize],
            stats: DecodeExecStats::default(),
            window: WritePortWindow::default(),
            fetch: VectorFetch::default(),
            fetch_available: false,
            executing: false,
            cycles_to_next_fetch: 0,
            cycles_to_next_exec: 0,
            current_repeat_rate: 1,
            reserve_simd: false,
            reserve_scalar: false,
            wake_queue: VecDeque::new(),
        }
    }
}

/// Vector decode/execute engine: each vector thread carries `vector_length` shader elements that
/// flow through an ALU array `alu_width` lanes wide.
///
/// The engine straddles two clock domains.  Command processor updates and texture traffic run in
/// the GPU domain (`gpu_clock`), fetch, decode, execution and writeback in the shader domain
/// (`shader_clock`).  `clock` runs both on a shared clock.
#[derive(Debug)]
pub struct VectorDecodeExecute {
    base: ModuleBase<VectorDecodeExecState, VectorShaderConfig>,
    arch: ArchParams,
    alu_mode: VectorAluMode,
    commands: SignalReader<ShaderCommand>,
    fetch: SignalReader<VectorBatch>,
    control: FetchControl,
    texture: TextureCoordinator,
    exec_tx: SignalWriter<DynInst>,
    exec_rx: SignalReader<DynInst>,
    emulator: Box<dyn ShaderEmulator>,
}

impl VectorDecodeExecute {
    pub fn new(
        config: Arc<VectorShaderConfig>,
        ports: DecodeExecPorts<VectorBatch>,
        emulator: Box<dyn ShaderEmulator>,
    ) -> ShaderResult<Self> {
        config.validate()?;
        let arch = ArchParams::select(&config.arch)?;
        let alu_mode = config.alu_mode()?;
        if ports.texture.requests.len() != config.texture_units as usize {
            return Err(ShaderError::Config(format!(
                "{} texture units configured, {} connected",
                config.texture_units,
                ports.texture.requests.len()
            )));
        }
        info!(
            "vector decode/execute: {} vector threads of {} elements, ALU width {} ({}), arch {}",
            config.vector_threads,
            config.vector_length,
            config.alu_width,
            config.alu_config,
            arch.name()
        );

        let exec_bandwidth = (config.alu_width * alu_mode.instr_cycle()) as usize;
        let (exec_tx, exec_rx) = signal("exec", exec_bandwidth, MAX_EXEC_LAT as Cycle);
        let texture = TextureCoordinator::new(
            ports.texture,
            config.texture_request_rate,
            config.requests_per_tex_unit,
        );
        Ok(Self {
            base: ModuleBase {
                cycle: 0,
                state: VectorDecodeExecState::new(&config),
                config,
            },
            arch,
            alu_mode,
            commands: ports.commands,
            fetch: ports.fetch,
            control: FetchControl::new(ports.control, ports.decode_state),
            texture,
            exec_tx,
            exec_rx,
            emulator,
        })
    }

    pub fn stats(&self) -> &DecodeExecStats {
        &self.base.state.stats
    }

    pub fn thread_control(&self, thread: u32) -> Option<&ThreadControl> {
        self.base.state.threads.get(thread as usize)
    }

    pub fn engine_state(&self) -> EngineState {
        self.base.state.engine
    }

    pub fn texture_tickets(&self, unit: usize) -> u32 {
        self.texture.tickets(unit)
    }

    pub fn instr_cycle(&self) -> u32 {
        self.alu_mode.instr_cycle()
    }

    pub fn emulator(&self) -> &dyn ShaderEmulator {
        self.emulator.as_ref()
    }

    /// Both domains on one clock.
    pub fn clock(&mut self, cycle: Cycle) -> ShaderResult<()> {
        self.base.cycle = cycle;
        self.receive_commands(cycle)?;
        match self.base.state.engine {
            EngineState::Reset => {
                self.reset_pipeline()?;
                self.base.state.engine = EngineState::Ready;
            }
            EngineState::Ready => {
                self.shader_stages(cycle)?;
                self.texture
                    .send_requests(cycle, self.emulator.as_mut(), &mut self.base.state.stats)?;
                self.receive_texture_results(cycle)?;
            }
        }
        self.send_decode_state(cycle)
    }

    pub fn gpu_clock(&mut self, cycle: Cycle) -> ShaderResult<()> {
        self.receive_commands(cycle)?;
        match self.base.state.engine {
            EngineState::Reset => {
                self.reset_pipeline()?;
                self.base.state.engine = EngineState::Ready;
            }
            EngineState::Ready => {
                self.texture
                    .send_requests(cycle, self.emulator.as_mut(), &mut self.base.state.stats)?;
                self.receive_texture_results(cycle)?;
            }
        }
        Ok(())
    }

    pub fn shader_clock(&mut self, cycle: Cycle) -> ShaderResult<()> {
        self.base.cycle = cycle;
        match self.base.state.engine {
            EngineState::Reset => {
                self.reset_pipeline()?;
                self.base.state.engine = EngineState::Ready;
            }
            EngineState::Ready => self.shader_stages(cycle)?,
        }
        self.send_decode_state(cycle)
    }

    fn receive_commands(&mut self, cycle: Cycle) -> ShaderResult<()> {
        for command in self.commands.read_all(cycle)? {
            match command {
                ShaderCommand::Reset => {
                    info!("cycle {cycle}: RESET command received");
                    self.base.state.engine = EngineState::Reset;
                }
            }
        }
        self.texture.receive_state(cycle)
    }

    fn shader_stages(&mut self, cycle: Cycle) -> ShaderResult<()> {
        self.receive_vector_instruction(cycle)?;
        self.wake_up(cycle)?;
        self.write_back(cycle)?;
        self.decode(cycle)?;
        self.execute(cycle)
    }

    fn send_decode_state(&self, cycle: Cycle) -> ShaderResult<()> {
        let state = &self.base.state;
        let ready = !state.fetch_available && state.cycles_to_next_fetch <= MIN_FETCH_INTERVAL;
        self.control
            .send_state(cycle, if ready { DecodeState::Ready } else { DecodeState::Busy })
    }

    fn reset_pipeline(&mut self) -> ShaderResult<()> {
        self.reset();
        self.fetch.clear()?;
        self.exec_rx.clear()?;
        self.texture.clear_inflight()
    }

    fn issue_latency(&self, opcode: ShaderOpcode) -> ShaderResult<u32> {
        let latency = self.arch.execution_latency(opcode)? + 1;
        if latency as usize > MAX_EXEC_LAT {
            return Err(ShaderError::LatencyTooLarge { opcode, latency });
        }
        Ok(latency)
    }

    fn receive_vector_instruction(&mut self, cycle: Cycle) -> ShaderResult<()> {
        let state = &mut self.base.state;
        state.cycles_to_next_fetch = state.cycles_to_next_fetch.saturating_sub(1);

        let Some(batch) = self.fetch.read(cycle)? else {
            return Ok(());
        };
        if state.cycles_to_next_fetch > 0 {
            return Err(ShaderError::protocol(cycle, "vector fetch received before the fetch interval elapsed"));
        }
        if state.fetch_available || state.executing {
            return Err(ShaderError::protocol(cycle, "vector fetch received while the previous one is in decode"));
        }
        let instr_cycle = self.alu_mode.instr_cycle() as usize;
        if batch.len() != instr_cycle {
            return Err(ShaderError::protocol(
                cycle,
                format!("vector fetch with {} instructions, expected {instr_cycle}", batch.len()),
            ));
        }
        let vector_length = self.base.config.vector_length as usize;
        if let Some(bad) = batch.iter().find(|v| v.lanes.len() != vector_length) {
            return Err(ShaderError::protocol(
                cycle,
                format!("vector instruction with {} lanes, expected {vector_length}", bad.lanes.len()),
            ));
        }
        state.fetch = VectorFetch::new(batch);
        state.fetch_available = true;
        Ok(())
    }

    fn decode(&mut self, cycle: Cycle) -> ShaderResult<()> {
        self.base.state.window.advance();
        if !self.base.state.fetch_available {
            return Ok(());
        }

        let config = Arc::clone(&self.base.config);
        let dual_issue = self.alu_mode.dual_issue();
        {
            let state = &mut self.base.state;
            state.reserve_simd = false;
            state.reserve_scalar = false;
            state.current_repeat_rate = 1;
        }

        let mut stall = false;
        let mut drop = false;
        let mut executed = 0;
        let mut slot = 0;
        while slot < self.base.state.fetch.num_slots() && !stall && !drop {
            let Some(inst) = self.base.state.fetch.slot_head(slot).cloned() else {
                break;
            };
            let exec = if inst.fake {
                true
            } else {
                let decision = self.decode_instruction(cycle, &inst)?;
                let exec = decision == Decode::Execute;
                stall = decision == Decode::Repeat;
                drop = decision == Decode::Drop;
                if exec {
                    self.update_decode_stage(cycle, &inst)?;
                    if dual_issue {
                        let scalar = inst.instr.is_scalar();
                        let state = &mut self.base.state;
                        state.reserve_scalar |= scalar;
                        state.reserve_simd |= !scalar || (state.reserve_scalar && scalar);
                    }
                }
                exec
            };
            if exec {
                executed += 1;
            }
            slot += 1;
        }

        let state = &mut self.base.state;
        if stall {
            if config.wait_on_stall && executed == 0 {
                debug!("cycle {cycle}: vector fetch kept in decode");
            } else if let Some(first) = state.fetch.slot_head(executed) {
                let (thread, pc) = (first.thread, first.pc);
                self.control
                    .send(cycle, &mut state.stats, DecodeCommandKind::RepeatLast, thread, pc)?;
                state.stats.removed += state.fetch.truncate(executed) as u64;
            }
        }
        if drop {
            state.stats.removed += state.fetch.truncate(executed) as u64;
        }

        state.executing = executed > 0;
        state.fetch_available = stall && config.wait_on_stall && !state.executing;
        if !state.executing && !state.fetch_available {
            state.fetch.clear();
        }
        state.cycles_to_next_fetch =
            MIN_FETCH_INTERVAL.max(state.current_repeat_rate * config.lane_passes());
        Ok(())
    }

    /// Hazard and resource checks for one vector instruction, using lane 0 for the whole vector.
    pub fn decode_instruction(&mut self, cycle: Cycle, inst: &DynInst) -> ShaderResult<Decode> {
        let latency = self.issue_latency(inst.opcode())?;
        let vector_length = self.base.config.vector_length;
        let ports = MAX_EXEC_BW * self.alu_mode.instr_cycle();
        let dual_issue = self.alu_mode.dual_issue();

        let state = &mut self.base.state;
        let thread = thread_entry(&mut state.threads, inst.thread)?;
        if thread.end || thread.pending_jump || !thread.ready {
            debug!("cycle {cycle}: {inst} dropped");
            return Ok(Decode::Drop);
        }

        let instr = &inst.instr;
        let tickets_ok = !instr.is_texture_load() || self.texture.can_admit(cycle, vector_length)?;
        // two scalar instructions may share the SIMD and scalar slots
        let reason = if !tickets_ok {
            Some("no texture tickets")
        } else if dual_issue && !instr.is_scalar() && state.reserve_simd {
            Some("SIMD ALU already reserved")
        } else if instr.sources().iter().any(|op| thread.regs.raw_pending(*op))
            || instr
                .relative
                .is_some_and(|a| thread.regs.raw_pending(Operand::new(Bank::Addr, a)))
        {
            Some("RAW dependence")
        } else if instr.has_result() && thread.regs.waw_blocked(instr.result, cycle + latency as Cycle)? {
            Some("WAW dependence")
        } else if !state.window.has_port(latency, ports) {
            Some("no register write port")
        } else {
            None
        };

        match reason {
            None => Ok(Decode::Execute),
            Some(reason) => {
                debug!("cycle {cycle}: {inst} stalled: {reason}");
                Ok(Decode::Repeat)
            }
        }
    }

    /// Applies the effects of an accepted vector instruction to the thread tables.
    fn update_decode_stage(&mut self, cycle: Cycle, inst: &DynInst) -> ShaderResult<()> {
        let latency = self.issue_latency(inst.opcode())?;
        let repeat_rate = self.arch.repeat_rate(inst.opcode())?;
        let vector_length = self.base.config.vector_length;
        let explicit_block = self.base.config.explicit_block;
        let instr = Arc::clone(&inst.instr);

        let state = &mut self.base.state;
        let thread = thread_entry(&mut state.threads, inst.thread)?;

        if instr.is_end() {
            thread.end = true;
            self.control
                .block_thread(cycle, &mut state.stats, thread, inst.thread, inst.pc)?;
        }
        if instr.is_zexport() {
            thread.zexport = true;
        }
        if instr.is_texture_load() {
            thread.wait_texture = true;
            self.texture.consume(vector_length)?;
            if explicit_block {
                thread.pending_tex_elements += vector_length;
            } else {
                thread.pending_tex_elements = vector_length;
                self.control
                    .block_thread(cycle, &mut state.stats, thread, inst.thread, inst.pc)?;
            }
        }
        if instr.is_jump() {
            thread.pending_jump = true;
            self.control
                .block_thread(cycle, &mut state.stats, thread, inst.thread, inst.pc)?;
        }
        if explicit_block && instr.wait_point && thread.pending_tex_elements > 0 {
            self.control
                .block_thread(cycle, &mut state.stats, thread, inst.thread, inst.pc)?;
        }
        if instr.has_result() {
            thread
                .regs
                .mark_write(cycle, inst.thread, instr.result, cycle + latency as Cycle)?;
        }
        debug!("cycle {cycle}: decoded {inst} (latency {})", latency - 1);

        thread.pending += 1;
        state.window.reserve(latency);
        state.current_repeat_rate = state.current_repeat_rate.max(repeat_rate);
        Ok(())
    }

    fn execute(&mut self, cycle: Cycle) -> ShaderResult<()> {
        let state = &mut self.base.state;
        state.cycles_to_next_exec = state.cycles_to_next_exec.saturating_sub(1);
        if !state.executing || state.cycles_to_next_exec > 0 {
            return Ok(());
        }

        for _ in 0..self.base.config.alu_width {
            let first_lane = self.base.state.fetch.next_lane() == 0;
            for inst in self.base.state.fetch.pop_lane() {
                if !inst.fake {
                    self.start_execution(cycle, inst)?;
                } else if first_lane {
                    self.base.state.stats.faked += 1;
                }
            }
        }

        let state = &mut self.base.state;
        state.cycles_to_next_exec = state.current_repeat_rate;
        if state.fetch.exhausted() {
            state.executing = false;
            state.fetch.clear();
        }
        Ok(())
    }

    fn start_execution(&mut self, cycle: Cycle, inst: DynInst) -> ShaderResult<()> {
        let latency = self.issue_latency(inst.opcode())?;
        if inst.trace {
            info!("cycle {cycle}: execute element {} {inst} (latency {})", inst.element, latency - 1);
        }
        self.emulator.execute(&inst)?;
        self.exec_tx.write_with_latency(cycle, inst, latency as Cycle)
    }

    fn write_back(&mut self, cycle: Cycle) -> ShaderResult<()> {
        let vector_length = self.base.config.vector_length;
        for inst in self.exec_rx.read_all(cycle)? {
            let lane = inst.element % vector_length;
            let pc = self.emulator.thread_pc(inst.element - lane);
            let state = &mut self.base.state;
            let thread = thread_entry(&mut state.threads, inst.thread)?;

            if lane == 0 {
                thread.pending = thread.pending.checked_sub(1).ok_or(ShaderError::bookkeeping(
                    cycle,
                    inst.thread,
                    "completion with no pending instruction",
                ))?;
                if thread.zexport {
                    self.control.send(
                        cycle,
                        &mut state.stats,
                        DecodeCommandKind::ZexportThread,
                        inst.thread,
                        pc,
                    )?;
                    thread.zexport = false;
                }
                if inst.instr.has_result() {
                    thread.regs.retire(inst.instr.result, cycle)?;
                }
            }

            if lane == vector_length - 1 {
                if thread.can_end() {
                    self.control
                        .end_thread(cycle, &mut state.stats, thread, inst.thread, pc)?;
                }
                if inst.instr.is_jump() {
                    let outcome = self.emulator.resolve_jump(&inst, vector_length);
                    debug!(
                        "cycle {cycle}: thread {} jump {} to {:#06x}",
                        inst.thread,
                        if outcome.taken { "taken" } else { "not taken" },
                        outcome.target
                    );
                    self.control.send(
                        cycle,
                        &mut state.stats,
                        DecodeCommandKind::NewPc,
                        inst.thread,
                        outcome.target,
                    )?;
                    self.control
                        .unblock_thread(cycle, &mut state.stats, thread, inst.thread, pc)?;
                    thread.pending_jump = false;
                }
            }
            state.stats.executed += 1;
        }
        Ok(())
    }

    fn receive_texture_results(&mut self, cycle: Cycle) -> ShaderResult<()> {
        let vector_length = self.base.config.vector_length;
        let capacity = (self.base.config.texture_units * self.base.config.texture_clock_ratio()) as usize;
        let serviced = self.texture.receive_results(cycle, self.emulator.as_mut())?;

        let state = &mut self.base.state;
        for element in serviced.into_iter().flatten() {
            let thread_id = element / vector_length;
            let thread = thread_entry(&mut state.threads, thread_id)?;
            thread.pending_tex_elements = thread.pending_tex_elements.checked_sub(1).ok_or(
                ShaderError::bookkeeping(cycle, thread_id, "texture result for a thread with no pending elements"),
            )?;
            if thread.pending_tex_elements == 0 {
                if state.wake_queue.len() >= capacity {
                    return Err(ShaderError::protocol(cycle, "texture wake-up queue overflow"));
                }
                state.wake_queue.push_back(thread_id);
            }
        }
        Ok(())
    }

    fn wake_up(&mut self, cycle: Cycle) -> ShaderResult<()> {
        let vector_length = self.base.config.vector_length;
        while let Some(thread_id) = self.base.state.wake_queue.pop_front() {
            let pc = self.emulator.thread_pc(thread_id * vector_length);
            let state = &mut self.base.state;
            let thread = thread_entry(&mut state.threads, thread_id)?;
            if !thread.wait_texture {
                return Err(ShaderError::bookkeeping(
                    cycle,
                    thread_id,
                    "waking up a thread that is not waiting on texture",
                ));
            }
            if !thread.ready && !thread.pending_jump && !thread.end {
                self.control
                    .unblock_thread(cycle, &mut state.stats, thread, thread_id, pc)?;
            }
            thread.wait_texture = false;
            if thread.end && thread.pending == 0 {
                self.control
                    .end_thread(cycle, &mut state.stats, thread, thread_id, pc)?;
            }
        }
        Ok(())
    }
}

module!(VectorDecodeExecute, VectorDecodeExecState, VectorShaderConfig,);

impl ModuleBehaviors for VectorDecodeExecute {
    fn tick_one(&mut self) -> ShaderResult<()> {
        let cycle = self.base.cycle;
        self.clock(cycle)?;
        self.base.cycle += 1;
        Ok(())
    }

    fn reset(&mut self) {
        let state = &mut self.base.state;
        state.threads.iter_mut().for_each(ThreadControl::reset);
        state.window.reset();
        state.fetch.clear();
        state.fetch_available = false;
        state.executing = false;
        state.cycles_to_next_fetch = 0;
        state.cycles_to_next_exec = 0;
        state.current_repeat_rate = 1;
        state.reserve_simd = false;
        state.reserve_scalar = false;
        state.wake_queue.clear();
        self.texture.reset();
    }
}
