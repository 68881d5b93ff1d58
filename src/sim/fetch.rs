//! Reference fetch stages.  They run one assembled program on every thread and follow the
//! decode/execute control protocol; they make no attempt at modelling fetch timing.
use std::sync::Arc;

use log::debug;

use crate::error::{ShaderError, ShaderResult};
use crate::shader::command::{DecodeCommand, DecodeCommandKind, DecodeState};
use crate::shader::inst::{DynInst, VectorInstruction};
use crate::shader::isa::ShaderInstr;
use crate::shader::ports::{FetchBatch, FetchLink, VectorBatch};
use crate::timeq::Cycle;

pub type Program = Arc<[Arc<ShaderInstr>]>;

#[derive(Debug, Clone, Default)]
struct FetchThread {
    ready: bool,
    ended: bool,
}

impl FetchThread {
    // threads beyond the active count start out ended
    fn new(active: bool) -> Self {
        Self {
            ready: true,
            ended: !active,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct FetchGroup {
    pc: u32,
    replay: bool,
}

/// Counters of commands fetch received.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchCounters {
    pub batches: u64,
    pub ended: u64,
    pub zexports: u64,
}

fn thread_mut(threads: &mut [FetchThread], cycle: Cycle, thread: u32) -> ShaderResult<&mut FetchThread> {
    threads
        .get_mut(thread as usize)
        .ok_or_else(|| ShaderError::protocol(cycle, format!("command for unknown thread {thread}")))
}

/// Scalar fetch: lock-step thread groups share a PC, `threads_cycle` threads of
/// `instr_cycle` consecutive instructions go out per batch.
#[derive(Debug)]
pub struct ProgramFetch {
    link: FetchLink<FetchBatch>,
    program: Program,
    threads: Vec<FetchThread>,
    groups: Vec<FetchGroup>,
    thread_group: u32,
    threads_cycle: u32,
    instr_cycle: u32,
    /// Next group to consider, and how many of its threads were already sent.
    next_group: usize,
    group_offset: u32,
    decode_ready: bool,
    trace: bool,
    pub counters: FetchCounters,
}

impl ProgramFetch {
    pub fn new(
        link: FetchLink<FetchBatch>,
        program: Program,
        num_threads: u32,
        active_threads: u32,
        thread_group: u32,
        threads_cycle: u32,
        instr_cycle: u32,
    ) -> Self {
        let groups = num_threads.div_ceil(thread_group) as usize;
        Self {
            link,
            program,
            threads: (0..num_threads).map(|t| FetchThread::new(t < active_threads)).collect(),
            groups: vec![FetchGroup::default(); groups],
            thread_group,
            threads_cycle,
            instr_cycle,
            next_group: 0,
            group_offset: 0,
            decode_ready: false,
            trace: false,
            counters: FetchCounters::default(),
        }
    }

    pub fn with_trace(mut self, trace: bool) -> Self {
        self.trace = trace;
        self
    }

    pub fn finished(&self) -> bool {
        self.threads.iter().all(|t| t.ended)
    }

    fn group_of(&self, thread: u32) -> usize {
        (thread / self.thread_group) as usize
    }

    fn group_threads(&self, group: usize) -> std::ops::Range<u32> {
        let first = group as u32 * self.thread_group;
        first..(first + self.thread_group).min(self.threads.len() as u32)
    }

    fn fetchable(&self, group: usize) -> bool {
        let range = self.group_threads(group);
        let threads = &self.threads[range.start as usize..range.end as usize];
        !threads.iter().all(|t| t.ended) && threads.iter().all(|t| t.ended || t.ready)
    }

    fn apply(&mut self, cycle: Cycle, command: DecodeCommand) -> ShaderResult<()> {
        debug!("cycle {cycle}: fetch received {command}");
        let group = self.group_of(command.thread);
        let thread = thread_mut(&mut self.threads, cycle, command.thread)?;
        match command.kind {
            DecodeCommandKind::BlockThread => {
                thread.ready = false;
                self.groups[group].pc = command.pc + 1;
            }
            DecodeCommandKind::UnblockThread => thread.ready = true,
            DecodeCommandKind::EndThread => {
                thread.ended = true;
                self.counters.ended += 1;
            }
            DecodeCommandKind::RepeatLast => {
                self.groups[group].pc = command.pc;
                self.groups[group].replay = true;
            }
            DecodeCommandKind::NewPc => self.groups[group].pc = command.pc,
            DecodeCommandKind::ZexportThread => self.counters.zexports += 1,
        }
        Ok(())
    }

    fn slot(&self, cycle: Cycle, thread: u32, pc: u32, replay: bool) -> DynInst {
        match self.program.get(pc as usize) {
            Some(instr) if !self.threads[thread as usize].ended => {
                let mut inst = DynInst::new(Arc::clone(instr), pc, thread, thread, cycle);
                inst.replay = replay;
                inst.trace = self.trace;
                inst
            }
            _ => DynInst::fake(thread, thread, cycle),
        }
    }

    fn build_batch(&mut self, cycle: Cycle) -> FetchBatch {
        let mut batch = FetchBatch::new();
        let mut sent = 0;
        let mut scanned = 0;
        while sent < self.threads_cycle && scanned <= self.groups.len() {
            let group = self.next_group;
            if self.group_offset == 0 && !self.fetchable(group) {
                self.next_group = (self.next_group + 1) % self.groups.len();
                scanned += 1;
                continue;
            }
            let threads = self.group_threads(group);
            let thread = threads.start + self.group_offset;
            let FetchGroup { pc, replay } = self.groups[group].clone();
            for i in 0..self.instr_cycle {
                batch.push(Some(self.slot(cycle, thread, pc + i, replay && i == 0)));
            }
            sent += 1;
            self.group_offset += 1;
            if thread + 1 == threads.end {
                self.groups[group].pc += self.instr_cycle;
                self.groups[group].replay = false;
                self.group_offset = 0;
                self.next_group = (self.next_group + 1) % self.groups.len();
                scanned = 0;
            }
        }
        batch
    }

    pub fn clock(&mut self, cycle: Cycle) -> ShaderResult<()> {
        for command in self.link.control.read_all(cycle)? {
            self.apply(cycle, command)?;
        }
        if let Some(state) = self.link.decode_state.read(cycle)? {
            self.decode_ready = state == DecodeState::Ready;
        }
        if !self.decode_ready || self.finished() || self.groups.is_empty() {
            return Ok(());
        }
        let batch = self.build_batch(cycle);
        if batch.is_empty() {
            return Ok(());
        }
        self.counters.batches += 1;
        self.link.fetch.write(cycle, batch)
    }
}

/// Vector fetch: one vector thread per fetch, `instr_cycle` instructions replicated on
/// `vector_length` lanes.
#[derive(Debug)]
pub struct VectorProgramFetch {
    link: FetchLink<VectorBatch>,
    program: Program,
    threads: Vec<FetchThread>,
    pcs: Vec<u32>,
    vector_length: u32,
    instr_cycle: u32,
    next_thread: usize,
    last_send: Option<Cycle>,
    trace: bool,
    pub counters: FetchCounters,
}

impl VectorProgramFetch {
    pub fn new(
        link: FetchLink<VectorBatch>,
        program: Program,
        vector_threads: u32,
        active_threads: u32,
        vector_length: u32,
        instr_cycle: u32,
    ) -> Self {
        Self {
            link,
            program,
            threads: (0..vector_threads).map(|t| FetchThread::new(t < active_threads)).collect(),
            pcs: vec![0; vector_threads as usize],
            vector_length,
            instr_cycle,
            next_thread: 0,
            last_send: None,
            trace: false,
            counters: FetchCounters::default(),
        }
    }

    pub fn with_trace(mut self, trace: bool) -> Self {
        self.trace = trace;
        self
    }

    pub fn finished(&self) -> bool {
        self.threads.iter().all(|t| t.ended)
    }

    fn apply(&mut self, cycle: Cycle, command: DecodeCommand) -> ShaderResult<()> {
        debug!("cycle {cycle}: fetch received {command}");
        let thread = thread_mut(&mut self.threads, cycle, command.thread)?;
        let pc = &mut self.pcs[command.thread as usize];
        match command.kind {
            DecodeCommandKind::BlockThread => {
                thread.ready = false;
                *pc = command.pc + 1;
            }
            DecodeCommandKind::UnblockThread => thread.ready = true,
            DecodeCommandKind::EndThread => {
                thread.ended = true;
                self.counters.ended += 1;
            }
            DecodeCommandKind::RepeatLast | DecodeCommandKind::NewPc => *pc = command.pc,
            DecodeCommandKind::ZexportThread => self.counters.zexports += 1,
        }
        Ok(())
    }

    fn vector_instruction(&self, cycle: Cycle, thread: u32, pc: u32) -> VectorInstruction {
        let first = thread * self.vector_length;
        let lanes = (first..first + self.vector_length)
            .map(|element| match self.program.get(pc as usize) {
                Some(instr) => {
                    let mut inst = DynInst::new(Arc::clone(instr), pc, thread, element, cycle);
                    inst.trace = self.trace;
                    inst
                }
                None => DynInst::fake(thread, element, cycle),
            })
            .collect();
        VectorInstruction::new(lanes)
    }

    pub fn clock(&mut self, cycle: Cycle) -> ShaderResult<()> {
        for command in self.link.control.read_all(cycle)? {
            self.apply(cycle, command)?;
        }
        let Some(state) = self.link.decode_state.read(cycle)? else {
            return Ok(());
        };
        // the state must have been produced after our previous fetch reached decode
        let fresh = self.last_send.map_or(true, |sent| cycle >= sent + 2);
        if state != DecodeState::Ready || !fresh {
            return Ok(());
        }

        let count = self.threads.len();
        let Some(thread) = (0..count)
            .map(|i| (self.next_thread + i) % count)
            .find(|&t| self.threads[t].ready && !self.threads[t].ended)
        else {
            return Ok(());
        };
        self.next_thread = (thread + 1) % count;

        let pc = self.pcs[thread];
        let batch: VectorBatch = (0..self.instr_cycle)
            .map(|i| self.vector_instruction(cycle, thread as u32, pc + i))
            .collect();
        self.pcs[thread] += self.instr_cycle;
        self.last_send = Some(cycle);
        self.counters.batches += 1;
        self.link.fetch.write(cycle, batch)
    }
}
