use crate::error::{ShaderError, ShaderResult};
use crate::shader::inst::DynInst;
use crate::timeq::Cycle;

pub const IBUFFER_ENTRIES: usize = 2;

/// Fixed-capacity ring of fetch batches waiting for the scalar decoder.
///
/// Decode walks the oldest batch slot by slot; an entry is freed once its last slot has been
/// consumed.
#[derive(Debug)]
pub struct InstructionBuffer {
    entries: [Vec<Option<DynInst>>; IBUFFER_ENTRIES],
    batch: usize,
    head: usize,
    count: usize,
    cursor: usize,
}

impl InstructionBuffer {
    pub fn new(batch: usize) -> Self {
        Self {
            entries: std::array::from_fn(|_| vec![None; batch]),
            batch,
            head: 0,
            count: 0,
            cursor: 0,
        }
    }

    pub fn free(&self) -> usize {
        IBUFFER_ENTRIES - self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Stores a fetch batch; short batches are padded with empty slots.
    pub fn push(&mut self, cycle: Cycle, mut batch: Vec<Option<DynInst>>) -> ShaderResult<()> {
        if self.count == IBUFFER_ENTRIES {
            return Err(ShaderError::protocol(cycle, "instruction batch received with no free buffer entry"));
        }
        if batch.len() > self.batch {
            return Err(ShaderError::protocol(
                cycle,
                format!("instruction batch of {} slots, at most {}", batch.len(), self.batch),
            ));
        }
        batch.resize(self.batch, None);
        let tail = (self.head + self.count) % IBUFFER_ENTRIES;
        self.entries[tail] = batch;
        self.count += 1;
        Ok(())
    }

    pub fn take_current(&mut self) -> Option<DynInst> {
        if self.is_empty() {
            return None;
        }
        self.entries[self.head][self.cursor].take()
    }

    /// Puts a taken instruction back under the cursor.
    pub fn restore(&mut self, inst: DynInst) {
        if !self.is_empty() {
            self.entries[self.head][self.cursor] = Some(inst);
        }
    }

    /// Moves past the current slot, releasing the entry after its last slot.
    pub fn advance(&mut self) {
        if self.is_empty() {
            return;
        }
        self.entries[self.head][self.cursor] = None;
        self.cursor += 1;
        if self.cursor == self.batch {
            self.cursor = 0;
            self.head = (self.head + 1) % IBUFFER_ENTRIES;
            self.count -= 1;
        }
    }

    pub fn clear(&mut self) {
        for entry in self.entries.iter_mut() {
            entry.iter_mut().for_each(|slot| *slot = None);
        }
        self.head = 0;
        self.count = 0;
        self.cursor = 0;
    }
}
