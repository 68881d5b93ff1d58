use log::debug;

use crate::base::signal::SignalWriter;
use crate::error::{ShaderError, ShaderResult};
use crate::shader::command::{DecodeCommand, DecodeCommandKind, DecodeState};
use crate::shader::hazard::ThreadControl;
use crate::shader::stats::DecodeExecStats;
use crate::timeq::Cycle;

/// Decode side of the fetch/decode hand-shake: thread commands and decode state back-pressure.
///
/// Thread state transitions that produce a command go through here so the command counters and
/// the ready flag never disagree with what fetch was told.
#[derive(Debug)]
pub struct FetchControl {
    control: SignalWriter<DecodeCommand>,
    decode_state: SignalWriter<DecodeState>,
}

impl FetchControl {
    pub fn new(control: SignalWriter<DecodeCommand>, decode_state: SignalWriter<DecodeState>) -> Self {
        Self {
            control,
            decode_state,
        }
    }

    pub fn send(
        &self,
        cycle: Cycle,
        stats: &mut DecodeExecStats,
        kind: DecodeCommandKind,
        thread: u32,
        pc: u32,
    ) -> ShaderResult<()> {
        let command = DecodeCommand::new(kind, thread, pc);
        debug!("cycle {cycle}: {command}");
        match kind {
            DecodeCommandKind::UnblockThread => stats.unblocks += 1,
            DecodeCommandKind::BlockThread => stats.blocks += 1,
            DecodeCommandKind::EndThread => stats.ends += 1,
            DecodeCommandKind::RepeatLast => stats.replays += 1,
            DecodeCommandKind::NewPc => stats.new_pcs += 1,
            DecodeCommandKind::ZexportThread => stats.zexports += 1,
        }
        self.control.write(cycle, command)
    }

    /// Blocks a ready thread.  Blocking a thread that is already blocked does nothing.
    pub fn block_thread(
        &self,
        cycle: Cycle,
        stats: &mut DecodeExecStats,
        control: &mut ThreadControl,
        thread: u32,
        pc: u32,
    ) -> ShaderResult<()> {
        if !control.ready {
            return Ok(());
        }
        control.ready = false;
        self.send(cycle, stats, DecodeCommandKind::BlockThread, thread, pc)
    }

    pub fn unblock_thread(
        &self,
        cycle: Cycle,
        stats: &mut DecodeExecStats,
        control: &mut ThreadControl,
        thread: u32,
        pc: u32,
    ) -> ShaderResult<()> {
        if control.ready {
            return Err(ShaderError::bookkeeping(cycle, thread, "unblocking a thread that is not blocked"));
        }
        control.ready = true;
        self.send(cycle, stats, DecodeCommandKind::UnblockThread, thread, pc)
    }

    /// The thread finished: clear the end flag and make the entry ready for the next thread.
    pub fn end_thread(
        &self,
        cycle: Cycle,
        stats: &mut DecodeExecStats,
        control: &mut ThreadControl,
        thread: u32,
        pc: u32,
    ) -> ShaderResult<()> {
        control.end = false;
        control.ready = true;
        self.send(cycle, stats, DecodeCommandKind::EndThread, thread, pc)
    }

    pub fn send_state(&self, cycle: Cycle, state: DecodeState) -> ShaderResult<()> {
        self.decode_state.write(cycle, state)
    }
}
