use crate::error::{ShaderError, ShaderResult};
use crate::shader::isa::{Bank, Operand};
use crate::shader::{ADDR_BANK_REGS, MAX_EXEC_LAT, OUTP_BANK_REGS, PRED_BANK_REGS, TEMP_BANK_REGS};
use crate::timeq::Cycle;

/// Pending-write bit and last scheduled completion cycle for every register of one bank.
#[derive(Debug, Clone)]
pub struct RegisterTable<const N: usize> {
    pending: [bool; N],
    completes_at: [Cycle; N],
}

impl<const N: usize> Default for RegisterTable<N> {
    fn default() -> Self {
        Self {
            pending: [false; N],
            completes_at: [0; N],
        }
    }
}

impl<const N: usize> RegisterTable<N> {
    fn slot(&self, bank: Bank, reg: u32) -> ShaderResult<usize> {
        let idx = reg as usize;
        if idx < N {
            Ok(idx)
        } else {
            Err(ShaderError::RegisterOutOfRange { bank, reg })
        }
    }

    pub fn pending(&self, reg: u32) -> bool {
        self.pending.get(reg as usize).copied().unwrap_or(false)
    }

    pub fn completes_at(&self, reg: u32) -> Cycle {
        self.completes_at.get(reg as usize).copied().unwrap_or(0)
    }
}

/// Per-thread register dependence state for the writable banks.
#[derive(Debug, Clone, Default)]
pub struct RegisterBanks {
    pub addr: RegisterTable<ADDR_BANK_REGS>,
    pub temp: RegisterTable<TEMP_BANK_REGS>,
    pub pred: RegisterTable<PRED_BANK_REGS>,
    pub outp: RegisterTable<OUTP_BANK_REGS>,
}

// Binds the table of a writable bank to `$t`; any other bank is an error.
macro_rules! with_table {
    (mut $self:expr, $bank:expr, |$t:ident| $body:expr) => {
        match $bank {
            Bank::Addr => { let $t = &mut $self.addr; $body }
            Bank::Temp => { let $t = &mut $self.temp; $body }
            Bank::Pred => { let $t = &mut $self.pred; $body }
            Bank::Output => { let $t = &mut $self.outp; $body }
            other => return Err(ShaderError::UnwritableBank { bank: other }),
        }
    };
    ($self:expr, $bank:expr, |$t:ident| $body:expr) => {
        match $bank {
            Bank::Addr => { let $t = &$self.addr; $body }
            Bank::Temp => { let $t = &$self.temp; $body }
            Bank::Pred => { let $t = &$self.pred; $body }
            Bank::Output => { let $t = &$self.outp; $body }
            other => return Err(ShaderError::UnwritableBank { bank: other }),
        }
    };
}

impl RegisterBanks {
    /// Read-after-write check.  Only temporaries, address and predicate registers are ever
    /// read back by the shader; every other bank reports no dependence.
    pub fn raw_pending(&self, operand: Operand) -> bool {
        match operand.bank {
            Bank::Temp => self.temp.pending(operand.reg),
            Bank::Addr => self.addr.pending(operand.reg),
            Bank::Pred => self.pred.pending(operand.reg),
            _ => false,
        }
    }

    /// True when a write to `result` completing at `completes_at` would not land strictly
    /// after the write already scheduled for that register.
    pub fn waw_blocked(&self, result: Operand, completes_at: Cycle) -> ShaderResult<bool> {
        with_table!(self, result.bank, |t| {
            let idx = t.slot(result.bank, result.reg)?;
            Ok(t.completes_at[idx] >= completes_at)
        })
    }

    /// Records a write issued at `cycle` completing at `completes_at`.
    pub fn mark_write(
        &mut self,
        cycle: Cycle,
        thread: u32,
        result: Operand,
        completes_at: Cycle,
    ) -> ShaderResult<()> {
        with_table!(mut self, result.bank, |t| {
            let idx = t.slot(result.bank, result.reg)?;
            if t.completes_at[idx] >= completes_at {
                return Err(ShaderError::WawViolation {
                    cycle,
                    thread,
                    bank: result.bank,
                    reg: result.reg,
                    recorded: t.completes_at[idx],
                    requested: completes_at,
                });
            }
            t.pending[idx] = true;
            t.completes_at[idx] = completes_at;
            Ok(())
        })
    }

    /// Clears the pending bit if this retirement is the last write scheduled for the register.
    pub fn retire(&mut self, result: Operand, cycle: Cycle) -> ShaderResult<()> {
        with_table!(mut self, result.bank, |t| {
            let idx = t.slot(result.bank, result.reg)?;
            if t.completes_at[idx] == cycle {
                t.pending[idx] = false;
            }
            Ok(())
        })
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

/// Control state for one thread (scalar engine) or vector thread (vector engine).
#[derive(Debug, Clone)]
pub struct ThreadControl {
    pub ready: bool,
    pub end: bool,
    pub wait_texture: bool,
    pub zexport: bool,
    pub pending_jump: bool,
    pub pending_tex_elements: u32,
    /// Instructions in the execution pipeline.
    pub pending: u32,
    /// A repeat was requested; drop everything until the replayed copy arrives.
    pub wait_replay: bool,
    pub regs: RegisterBanks,
}

impl Default for ThreadControl {
    fn default() -> Self {
        Self {
            ready: true,
            end: false,
            wait_texture: false,
            zexport: false,
            pending_jump: false,
            pending_tex_elements: 0,
            pending: 0,
            wait_replay: false,
            regs: RegisterBanks::default(),
        }
    }
}

impl ThreadControl {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// An END was executed and nothing is left in flight for the thread.
    pub fn can_end(&self) -> bool {
        self.end && !self.wait_texture && self.pending == 0
    }
}

pub fn thread_entry(
    threads: &mut [ThreadControl],
    thread: u32,
) -> ShaderResult<&mut ThreadControl> {
    let limit = threads.len() as u32;
    threads
        .get_mut(thread as usize)
        .ok_or(ShaderError::ThreadOutOfRange { thread, limit })
}

/// Sliding window counting register writes scheduled to complete in each of the next
/// `MAX_EXEC_LAT` cycles.
#[derive(Debug, Clone)]
pub struct WritePortWindow {
    slots: [u32; MAX_EXEC_LAT],
    next: usize,
}

impl Default for WritePortWindow {
    fn default() -> Self {
        Self {
            slots: [0; MAX_EXEC_LAT],
            next: 0,
        }
    }
}

impl WritePortWindow {
    // Called once per decode cycle before any check or reservation.
    pub fn advance(&mut self) {
        self.slots[self.next] = 0;
        self.next = (self.next + 1) % MAX_EXEC_LAT;
    }

    pub fn occupancy(&self, latency: u32) -> u32 {
        self.slots[(self.next + latency as usize) % MAX_EXEC_LAT]
    }

    pub fn has_port(&self, latency: u32, limit: u32) -> bool {
        self.occupancy(latency) < limit
    }

    pub fn reserve(&mut self, latency: u32) {
        self.slots[(self.next + latency as usize) % MAX_EXEC_LAT] += 1;
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::{RegisterBanks, ThreadControl, WritePortWindow};
    use crate::error::ShaderError;
    use crate::shader::MAX_EXEC_LAT;
    use crate::shader::isa::{Bank, Operand};

    #[test]
    fn retire_only_clears_last_write() {
        let mut regs = RegisterBanks::default();
        let r5 = Operand::new(Bank::Temp, 5);
        regs.mark_write(0, 0, r5, 4).unwrap();
        regs.mark_write(1, 0, r5, 6).unwrap();
        regs.retire(r5, 4).unwrap();
        assert!(regs.raw_pending(r5));
        regs.retire(r5, 6).unwrap();
        assert!(!regs.raw_pending(r5));
    }

    #[test]
    fn writes_complete_in_issue_order() {
        let mut regs = RegisterBanks::default();
        let r2 = Operand::new(Bank::Temp, 2);
        regs.mark_write(3, 1, r2, 8).unwrap();
        assert!(regs.waw_blocked(r2, 8).unwrap());
        assert!(regs.waw_blocked(r2, 7).unwrap());
        assert!(!regs.waw_blocked(r2, 9).unwrap());

        let err = regs.mark_write(4, 1, r2, 8).expect_err("same completion cycle");
        assert_eq!(
            ShaderError::WawViolation {
                cycle: 4,
                thread: 1,
                bank: Bank::Temp,
                reg: 2,
                recorded: 8,
                requested: 8
            },
            err
        );
        assert!(regs.mark_write(4, 1, r2, 6).is_err());
        regs.mark_write(4, 1, r2, 9).unwrap();
        assert!(regs.waw_blocked(r2, 9).unwrap());
    }

    #[test]
    fn output_and_input_banks_never_raw() {
        let mut regs = RegisterBanks::default();
        regs.mark_write(0, 0, Operand::new(Bank::Output, 1), 3).unwrap();
        assert!(!regs.raw_pending(Operand::new(Bank::Output, 1)));
        assert!(!regs.raw_pending(Operand::new(Bank::Input, 1)));
    }

    #[test]
    fn invalid_writes_rejected() {
        let mut regs = RegisterBanks::default();
        let err = regs
            .mark_write(0, 0, Operand::new(Bank::Param, 0), 3)
            .expect_err("constant bank is read only");
        assert_eq!(ShaderError::UnwritableBank { bank: Bank::Param }, err);
        assert!(regs.mark_write(0, 0, Operand::new(Bank::Addr, 2), 3).is_err());
    }

    #[test]
    fn end_requires_quiet_thread() {
        let mut thread = ThreadControl::default();
        thread.end = true;
        thread.pending = 1;
        assert!(!thread.can_end());
        thread.pending = 0;
        thread.wait_texture = true;
        assert!(!thread.can_end());
        thread.wait_texture = false;
        assert!(thread.can_end());
    }

    #[test]
    fn window_slides() {
        let mut window = WritePortWindow::default();
        window.advance();
        window.reserve(3);
        window.reserve(3);
        assert!(!window.has_port(3, 2));
        assert!(window.has_port(2, 2));
        window.advance();
        assert_eq!(2, window.occupancy(2));
        for _ in 0..2 {
            window.advance();
        }
        assert_eq!(2, window.occupancy(0));
        window.advance();
        assert_eq!(0, window.occupancy(MAX_EXEC_LAT as u32 - 1));
    }
}
