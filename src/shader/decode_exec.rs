use std::sync::Arc;

use log::{debug, info};

use crate::base::behavior::*;
use crate::base::module::{module, IsModule, ModuleBase};
use crate::base::signal::{signal, SignalReader, SignalWriter};
use crate::error::{ShaderError, ShaderResult};
use crate::shader::arch::ArchParams;
use crate::shader::command::{DecodeCommandKind, DecodeState, EngineState, ShaderCommand};
use crate::shader::config::ScalarShaderConfig;
use crate::shader::control::FetchControl;
use crate::shader::emulator::ShaderEmulator;
use crate::shader::hazard::{thread_entry, ThreadControl, WritePortWindow};
use crate::shader::ibuffer::{InstructionBuffer, IBUFFER_ENTRIES};
use crate::shader::inst::DynInst;
use crate::shader::isa::{Bank, Operand, ShaderOpcode};
use crate::shader::ports::{DecodeExecPorts, FetchBatch};
use crate::shader::stats::DecodeExecStats;
use crate::shader::texture::TextureCoordinator;
use crate::shader::{MAX_EXEC_BW, MAX_EXEC_LAT};
use crate::timeq::Cycle;

/// Outcome of decoding one instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decode {
    Execute,
    /// Hazard or resource conflict: fetch must send the instruction again.
    Repeat,
    Drop,
}

#[derive(Debug)]
pub struct DecodeExecState {
    pub engine: EngineState,
    pub threads: Vec<ThreadControl>,
    pub stats: DecodeExecStats,
    window: WritePortWindow,
    ibuffer: InstructionBuffer,
    /// Thread of the current thread group being decoded.
    group_thread: u32,
    /// Instructions the group leader executed this fetch cycle.
    instr_group: u32,
    /// Instructions of the current thread processed this fetch cycle.
    instr_thread: u32,
    reserve_simd: bool,
    reserve_scalar: bool,
}

impl DecodeExecState {
    fn new(config: &ScalarShaderConfig) -> Self {
        Self {
            engine: EngineState::Reset,
            threads: vec![ThreadControl::default(); config.num_threads as usize],
            stats: DecodeExecStats::default(),
            window: WritePortWindow::default(),
            ibuffer: InstructionBuffer::new(config.batch_size()),
            group_thread: 0,
            instr_group: 0,
            instr_thread: 0,
            reserve_simd: false,
            reserve_scalar: false,
        }
    }
}

/// Scalar decode/execute engine: every thread runs one shader element and thread groups of
/// `thread_group` threads execute in lock step.
#[derive(Debug)]
pub struct DecodeExecute {
    base: ModuleBase<DecodeExecState, ScalarShaderConfig>,
    arch: ArchParams,
    commands: SignalReader<ShaderCommand>,
    fetch: SignalReader<FetchBatch>,
    control: FetchControl,
    texture: TextureCoordinator,
    exec_tx: SignalWriter<DynInst>,
    exec_rx: SignalReader<DynInst>,
    emulator: Box<dyn ShaderEmulator>,
}

impl DecodeExecute {
    pub fn new(
        config: Arc<ScalarShaderConfig>,
        ports: DecodeExecPorts<FetchBatch>,
        emulator: Box<dyn ShaderEmulator>,
    ) -> ShaderResult<Self> {
        config.validate()?;
        let arch = ArchParams::select(&config.arch)?;
        if ports.texture.requests.len() != config.texture_units as usize {
            return Err(ShaderError::Config(format!(
                "{} texture units configured, {} connected",
                config.texture_units,
                ports.texture.requests.len()
            )));
        }
        info!(
            "scalar decode/execute: {} threads, groups of {}, {} threads x {} instructions per cycle, arch {}",
            config.num_threads,
            config.thread_group,
            config.threads_cycle,
            config.instr_cycle,
            arch.name()
        );

        let (exec_tx, exec_rx) = signal("exec", config.batch_size(), MAX_EXEC_LAT as Cycle);
        let texture = TextureCoordinator::new(
            ports.texture,
            config.texture_request_rate,
            config.requests_per_tex_unit,
        );
        Ok(Self {
            base: ModuleBase {
                cycle: 0,
                state: DecodeExecState::new(&config),
                config,
            },
            arch,
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

    pub fn emulator(&self) -> &dyn ShaderEmulator {
        self.emulator.as_ref()
    }

    /// Simulates cycle `cycle`.  Any error leaves the engine unusable.
    pub fn clock(&mut self, cycle: Cycle) -> ShaderResult<()> {
        self.base.cycle = cycle;
        for command in self.commands.read_all(cycle)? {
            match command {
                ShaderCommand::Reset => {
                    info!("cycle {cycle}: RESET command received");
                    self.base.state.engine = EngineState::Reset;
                }
            }
        }
        self.texture.receive_state(cycle)?;

        match self.base.state.engine {
            EngineState::Reset => {
                self.reset_pipeline()?;
                self.base.state.engine = EngineState::Ready;
            }
            EngineState::Ready => {
                self.base.state.window.advance();
                self.end_execution(cycle)?;
                if let Some(batch) = self.fetch.read(cycle)? {
                    self.base.state.ibuffer.push(cycle, batch)?;
                }
                self.decode(cycle)?;
                self.texture
                    .send_requests(cycle, self.emulator.as_mut(), &mut self.base.state.stats)?;
                self.receive_texture_results(cycle)?;
            }
        }

        let state = if self.base.state.ibuffer.free() >= IBUFFER_ENTRIES {
            DecodeState::Ready
        } else {
            DecodeState::Busy
        };
        self.control.send_state(cycle, state)
    }

    fn reset_pipeline(&mut self) -> ShaderResult<()> {
        self.reset();
        self.fetch.clear()?;
        self.exec_rx.clear()?;
        self.texture.clear_inflight()
    }

    fn issue_latency(&self, opcode: ShaderOpcode) -> ShaderResult<u32> {
        // one extra cycle for writeback
        let latency = self.arch.execution_latency(opcode)? + 1;
        if latency as usize > MAX_EXEC_LAT {
            return Err(ShaderError::LatencyTooLarge { opcode, latency });
        }
        Ok(latency)
    }

    fn decode(&mut self, cycle: Cycle) -> ShaderResult<()> {
        let config = Arc::clone(&self.base.config);
        let mut exec_groups = 0;
        let mut block = false;
        let mut i = 0;
        while i < config.threads_cycle
            && exec_groups < config.groups_cycle()
            && !block
            && !self.base.state.ibuffer.is_empty()
        {
            self.base.state.reserve_simd = false;
            self.base.state.reserve_scalar = false;

            let mut j = 0;
            while j < config.instr_cycle
                && self.base.state.instr_thread < config.instr_cycle
                && !block
                && !self.base.state.ibuffer.is_empty()
            {
                block = self.decode_slot(cycle)?;
                j += 1;
            }

            let state = &mut self.base.state;
            if state.instr_thread == config.instr_cycle {
                state.instr_thread = 0;
                state.group_thread += 1;
                if state.group_thread == config.thread_group {
                    state.group_thread = 0;
                    state.instr_group = 0;
                    exec_groups += 1;
                }
            }
            i += 1;
        }
        Ok(())
    }

    fn advance_slot(&mut self) {
        self.base.state.ibuffer.advance();
        self.base.state.instr_thread += 1;
    }

    /// Decodes the slot under the buffer cursor.  Returns true when decode must stop for this
    /// cycle because a thread inside a group could not follow its leader.
    fn decode_slot(&mut self, cycle: Cycle) -> ShaderResult<bool> {
        let Some(inst) = self.base.state.ibuffer.take_current() else {
            self.advance_slot();
            return Ok(false);
        };
        if inst.fake {
            self.base.state.stats.faked += 1;
            self.advance_slot();
            return Ok(false);
        }

        let interior = self.base.state.group_thread > 0;
        let decision = if interior && self.base.state.instr_thread >= self.base.state.instr_group {
            Decode::Drop
        } else {
            self.decode_instruction(cycle, &inst, interior)?
        };

        match decision {
            Decode::Execute => {
                self.start_execution(cycle, inst)?;
                if !interior {
                    self.base.state.instr_group += 1;
                }
                self.advance_slot();
                Ok(false)
            }
            Decode::Repeat if interior => {
                debug!("cycle {cycle}: {inst} blocked behind its group");
                self.base.state.stats.blocked += 1;
                self.base.state.ibuffer.restore(inst);
                Ok(true)
            }
            Decode::Repeat => {
                self.control.send(
                    cycle,
                    &mut self.base.state.stats,
                    DecodeCommandKind::RepeatLast,
                    inst.thread,
                    inst.pc,
                )?;
                self.base.state.stats.removed += 1;
                self.advance_slot();
                Ok(false)
            }
            Decode::Drop => {
                debug!("cycle {cycle}: {inst} removed");
                self.base.state.stats.removed += 1;
                self.advance_slot();
                Ok(false)
            }
        }
    }

    /// Hazard and resource checks for one instruction.  `block` is set for threads inside a
    /// group, which stall in place instead of asking for a replay.
    pub fn decode_instruction(&mut self, cycle: Cycle, inst: &DynInst, block: bool) -> ShaderResult<Decode> {
        let latency = self.issue_latency(inst.opcode())?;
        let scalar_alu = self.base.config.scalar_alu;
        let ports = MAX_EXEC_BW * self.base.config.threads_cycle * self.base.config.instr_cycle;

        let state = &mut self.base.state;
        let thread = thread_entry(&mut state.threads, inst.thread)?;

        thread.wait_replay &= !inst.replay;
        if thread.wait_replay || thread.end || !thread.ready {
            return Ok(Decode::Drop);
        }

        let instr = &inst.instr;
        let tickets_ok = !instr.is_texture_load() || self.texture.can_admit(cycle, 1)?;
        let reason = if !tickets_ok {
            Some("no texture tickets")
        } else if scalar_alu
            && ((instr.is_scalar() && state.reserve_scalar) || (!instr.is_scalar() && state.reserve_simd))
        {
            Some("ALU already reserved")
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
                debug!("cycle {cycle}: {inst} repeat: {reason}");
                if !block {
                    thread.wait_replay = true;
                }
                Ok(Decode::Repeat)
            }
        }
    }

    fn start_execution(&mut self, cycle: Cycle, inst: DynInst) -> ShaderResult<()> {
        let latency = self.issue_latency(inst.opcode())?;
        let scalar_alu = self.base.config.scalar_alu;
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
            self.texture.consume(1)?;
            self.control
                .block_thread(cycle, &mut state.stats, thread, inst.thread, inst.pc)?;
        }
        if instr.has_result() {
            thread
                .regs
                .mark_write(cycle, inst.thread, instr.result, cycle + latency as Cycle)?;
        }

        if inst.trace {
            info!("cycle {cycle}: execute {inst} (latency {})", latency - 1);
        } else {
            debug!("cycle {cycle}: execute {inst} (latency {})", latency - 1);
        }
        self.emulator.execute(&inst)?;
        thread.pending += 1;

        if scalar_alu {
            if instr.is_scalar() {
                state.reserve_scalar = true;
            } else {
                state.reserve_simd = true;
            }
        }
        state.window.reserve(latency);
        self.exec_tx.write_with_latency(cycle, inst, latency as Cycle)
    }

    fn end_execution(&mut self, cycle: Cycle) -> ShaderResult<()> {
        for inst in self.exec_rx.read_all(cycle)? {
            let pc = self.emulator.thread_pc(inst.element);
            let state = &mut self.base.state;
            let thread = thread_entry(&mut state.threads, inst.thread)?;
            debug!("cycle {cycle}: end execution {inst}");

            thread.pending = thread
                .pending
                .checked_sub(1)
                .ok_or(ShaderError::bookkeeping(cycle, inst.thread, "completion with no pending instruction"))?;
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
            if thread.can_end() {
                self.control
                    .end_thread(cycle, &mut state.stats, thread, inst.thread, pc)?;
            }
            if inst.instr.has_result() {
                thread.regs.retire(inst.instr.result, cycle)?;
            }
            state.stats.executed += 1;
        }
        Ok(())
    }

    fn receive_texture_results(&mut self, cycle: Cycle) -> ShaderResult<()> {
        let serviced = self.texture.receive_results(cycle, self.emulator.as_mut())?;
        for element in serviced.into_iter().flatten() {
            let pc = self.emulator.thread_pc(element);
            let state = &mut self.base.state;
            let thread = thread_entry(&mut state.threads, element)?;
            // a blocked thread drops everything, END included, until this unblock
            self.control
                .unblock_thread(cycle, &mut state.stats, thread, element, pc)?;
            thread.wait_texture = false;
        }
        Ok(())
    }
}

module!(DecodeExecute, DecodeExecState, ScalarShaderConfig,);

impl ModuleBehaviors for DecodeExecute {
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
        state.ibuffer.clear();
        state.group_thread = 0;
        state.instr_group = 0;
        state.instr_thread = 0;
        state.reserve_simd = false;
        state.reserve_scalar = false;
        self.texture.reset();
    }
}
