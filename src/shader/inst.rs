use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use smallvec::SmallVec;

use crate::shader::isa::{ShaderInstr, ShaderOpcode};
use crate::timeq::Cycle;

/// One instruction instance flowing fetch -> decode -> execute -> writeback.
///
/// The decoded instruction is shared; everything else belongs to this instance.  `thread` is the
/// decode/execute thread (a vector thread for the vector engine) and `element` is the emulator's
/// element index (`thread * vector_length + lane` for vector threads, equal to `thread` otherwise).
#[derive(Debug, Clone)]
pub struct DynInst {
    pub instr: Arc<ShaderInstr>,
    pub pc: u32,
    pub thread: u32,
    pub element: u32,
    pub created_at: Cycle,
    /// Resend of an instruction that was asked to repeat.
    pub replay: bool,
    /// Padding slot with no work attached.
    pub fake: bool,
    pub trace: bool,
}

impl DynInst {
    pub fn new(instr: Arc<ShaderInstr>, pc: u32, thread: u32, element: u32, created_at: Cycle) -> Self {
        Self {
            instr,
            pc,
            thread,
            element,
            created_at,
            replay: false,
            fake: false,
            trace: false,
        }
    }

    pub fn fake(thread: u32, element: u32, created_at: Cycle) -> Self {
        Self {
            fake: true,
            ..Self::new(Arc::new(ShaderInstr::new(ShaderOpcode::Nop)), 0, thread, element, created_at)
        }
    }

    pub fn opcode(&self) -> ShaderOpcode {
        self.instr.opcode
    }
}

impl fmt::Display for DynInst {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.fake {
            return write!(f, "thread {} <fake>", self.thread);
        }
        write!(f, "thread {} pc {:#06x}: {}", self.thread, self.pc, self.instr)?;
        if self.replay {
            write!(f, " (replay)")?;
        }
        Ok(())
    }
}

/// One instruction slot of a vector fetch: the same instruction replicated for every lane.
#[derive(Debug, Clone)]
pub struct VectorInstruction {
    pub lanes: Vec<DynInst>,
}

impl VectorInstruction {
    pub fn new(lanes: Vec<DynInst>) -> Self {
        Self { lanes }
    }
}

/// Vector slots accepted by decode, drained lane by lane by the execute stage.
#[derive(Debug, Default)]
pub struct VectorFetch {
    slots: SmallVec<[VecDeque<DynInst>; 2]>,
    next_lane: usize,
}

impl VectorFetch {
    pub fn new(slots: impl IntoIterator<Item = VectorInstruction>) -> Self {
        Self {
            slots: slots.into_iter().map(|v| v.lanes.into()).collect(),
            next_lane: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn num_slots(&self) -> usize {
        self.slots.len()
    }

    pub fn slot_head(&self, slot: usize) -> Option<&DynInst> {
        self.slots.get(slot).and_then(|lanes| lanes.front())
    }

    pub fn next_lane(&self) -> usize {
        self.next_lane
    }

    /// Drops slot `from` and every slot after it.
    pub fn truncate(&mut self, from: usize) -> usize {
        let dropped = self.slots.len().saturating_sub(from);
        self.slots.truncate(from);
        dropped
    }

    /// Pops the next lane of every kept slot.
    pub fn pop_lane(&mut self) -> SmallVec<[DynInst; 2]> {
        let lane: SmallVec<[DynInst; 2]> = self.slots.iter_mut().filter_map(|s| s.pop_front()).collect();
        if !lane.is_empty() {
            self.next_lane += 1;
        }
        lane
    }

    pub fn exhausted(&self) -> bool {
        self.slots.iter().all(|s| s.is_empty())
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.next_lane = 0;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{DynInst, VectorFetch, VectorInstruction};
    use crate::shader::isa::{ShaderInstr, ShaderOpcode};

    fn lanes(op: ShaderOpcode, thread: u32, len: u32) -> VectorInstruction {
        let instr = Arc::new(ShaderInstr::new(op));
        VectorInstruction::new(
            (0..len)
                .map(|lane| DynInst::new(instr.clone(), 4, thread, thread * len + lane, 0))
                .collect(),
        )
    }

    #[test]
    fn lanes_are_drained_in_order() {
        let mut fetch = VectorFetch::new([lanes(ShaderOpcode::Add, 1, 4), lanes(ShaderOpcode::Mul, 1, 4)]);
        assert_eq!(2, fetch.num_slots());
        let first = fetch.pop_lane();
        assert_eq!(2, first.len());
        assert_eq!(4, first[0].element);
        assert_eq!(ShaderOpcode::Mul, first[1].opcode());
        assert_eq!(1, fetch.next_lane());
        for _ in 0..3 {
            fetch.pop_lane();
        }
        assert!(fetch.exhausted());
    }

    #[test]
    fn truncate_drops_later_slots() {
        let mut fetch = VectorFetch::new([lanes(ShaderOpcode::Add, 0, 2), lanes(ShaderOpcode::Tex, 0, 2)]);
        assert_eq!(1, fetch.truncate(1));
        assert_eq!(1, fetch.num_slots());
        assert_eq!(0, fetch.truncate(3));
    }

    #[test]
    fn fake_display() {
        assert_eq!("thread 3 <fake>", DynInst::fake(3, 3, 0).to_string());
    }
}
