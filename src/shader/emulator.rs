use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt::Debug;

use crate::error::{ShaderError, ShaderResult};
use crate::shader::inst::DynInst;
use crate::shader::texture::{Elements, TextureAccess};
use crate::shader::STAMP_FRAGMENTS;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JumpOutcome {
    pub taken: bool,
    pub target: u32,
}

/// Functional side of the shader: the decode/execute engines only model timing and ask the
/// emulator to carry out each instruction.
pub trait ShaderEmulator: Debug {
    /// Emulates one instruction for one element.
    fn execute(&mut self, inst: &DynInst) -> ShaderResult<()>;

    /// PC the element will execute next.
    fn thread_pc(&self, element: u32) -> u32;

    /// Next texture access ready to be sent to a texture unit, if any.
    fn next_texture_access(&mut self) -> Option<TextureAccess>;

    /// Writes back the samples of a finished access; returns the elements it serviced.
    fn complete_texture_access(&mut self, id: u32, samples: &[[f32; 4]]) -> ShaderResult<Elements>;

    /// Evaluates a jump for a whole vector of `vector_length` elements.
    fn resolve_jump(&mut self, inst: &DynInst, vector_length: u32) -> JumpOutcome;
}

/// Reference emulator that does no arithmetic.  It keeps per-element PCs, groups texture loads
/// into stamps and decides jumps with a per-site budget: each jump is taken `jump_budget` times
/// per vector, then falls through.
#[derive(Debug)]
pub struct TraceEmulator {
    stamp_width: u32,
    jump_budget: u32,
    pcs: HashMap<u32, u32>,
    // stamp index -> elements that executed their texture load so far
    staging: BTreeMap<u32, Elements>,
    ready: VecDeque<TextureAccess>,
    outstanding: HashMap<u32, Elements>,
    next_id: u32,
    jumps_taken: HashMap<(u32, u32), u32>,
    pub executed: u64,
    pub samples: u64,
}

impl Default for TraceEmulator {
    fn default() -> Self {
        Self::new(STAMP_FRAGMENTS as u32)
    }
}

impl TraceEmulator {
    pub fn new(stamp_width: u32) -> Self {
        Self {
            stamp_width: stamp_width.max(1),
            jump_budget: 0,
            pcs: HashMap::new(),
            staging: BTreeMap::new(),
            ready: VecDeque::new(),
            outstanding: HashMap::new(),
            next_id: 0,
            jumps_taken: HashMap::new(),
            executed: 0,
            samples: 0,
        }
    }

    pub fn with_jump_budget(mut self, budget: u32) -> Self {
        self.jump_budget = budget;
        self
    }

    pub fn outstanding_accesses(&self) -> usize {
        self.outstanding.len() + self.ready.len()
    }

    fn stage_texture(&mut self, element: u32) {
        let stamp = element / self.stamp_width;
        let staged = self.staging.entry(stamp).or_default();
        staged.push(element);
        if staged.len() as u32 == self.stamp_width {
            let elements = self.staging.remove(&stamp).unwrap_or_default();
            let id = self.next_id;
            self.next_id = self.next_id.wrapping_add(1);
            self.outstanding.insert(id, elements.clone());
            self.ready.push_back(TextureAccess {
                id,
                elements,
                issued_at: 0,
            });
        }
    }
}

impl ShaderEmulator for TraceEmulator {
    fn execute(&mut self, inst: &DynInst) -> ShaderResult<()> {
        if inst.fake {
            return Ok(());
        }
        self.executed += 1;
        self.pcs.insert(inst.element, inst.pc + 1);
        if inst.instr.is_texture_load() {
            self.stage_texture(inst.element);
        }
        Ok(())
    }

    fn thread_pc(&self, element: u32) -> u32 {
        self.pcs.get(&element).copied().unwrap_or(0)
    }

    fn next_texture_access(&mut self) -> Option<TextureAccess> {
        self.ready.pop_front()
    }

    fn complete_texture_access(&mut self, id: u32, samples: &[[f32; 4]]) -> ShaderResult<Elements> {
        let elements = self
            .outstanding
            .remove(&id)
            .ok_or(ShaderError::UnknownTextureAccess { id })?;
        self.samples += samples.len() as u64;
        Ok(elements)
    }

    fn resolve_jump(&mut self, inst: &DynInst, vector_length: u32) -> JumpOutcome {
        let vector_length = vector_length.max(1);
        let group = inst.element / vector_length;
        let count = self.jumps_taken.entry((group, inst.pc)).or_insert(0);
        let taken = *count < self.jump_budget;
        if taken {
            *count += 1;
        }
        let target = if taken { inst.instr.jump_target } else { inst.pc + 1 };
        for element in group * vector_length..(group + 1) * vector_length {
            self.pcs.insert(element, target);
        }
        JumpOutcome { taken, target }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{ShaderEmulator, TraceEmulator};
    use crate::shader::inst::DynInst;
    use crate::shader::isa::ShaderInstr;

    fn inst(text: &str, pc: u32, element: u32) -> DynInst {
        DynInst::new(Arc::new(text.parse::<ShaderInstr>().unwrap()), pc, element, element, 0)
    }

    #[test]
    fn texture_released_per_stamp() {
        let mut emu = TraceEmulator::new(2);
        emu.execute(&inst("tex r0, i0, t0", 3, 0)).unwrap();
        assert!(emu.next_texture_access().is_none());
        emu.execute(&inst("tex r0, i0, t0", 3, 1)).unwrap();
        let access = emu.next_texture_access().expect("stamp complete");
        assert_eq!(&[0, 1], access.elements.as_slice());
        assert_eq!(4, emu.thread_pc(1));
        let serviced = emu.complete_texture_access(access.id, &[[0.0; 4]; 2]).unwrap();
        assert_eq!(2, serviced.len());
        assert!(emu.complete_texture_access(access.id, &[]).is_err());
    }

    #[test]
    fn jump_budget_per_site() {
        let mut emu = TraceEmulator::new(4).with_jump_budget(1);
        let jmp = inst("jmp p0, 1", 6, 8);
        let first = emu.resolve_jump(&jmp, 4);
        assert!(first.taken);
        assert_eq!(1, first.target);
        assert_eq!(1, emu.thread_pc(11));
        let second = emu.resolve_jump(&jmp, 4);
        assert!(!second.taken);
        assert_eq!(7, second.target);
    }
}
