use thiserror::Error;

use crate::shader::isa::{Bank, ShaderOpcode};
use crate::timeq::Cycle;

/// Fatal conditions raised by the decode/execute engines and the channels around them.
///
/// Simulated contention (tickets, write ports, register hazards) never shows up here; it is
/// resolved through repeat/block/drop decisions.  Anything in this enum means the engine instance
/// is in an inconsistent state and must not be clocked again.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ShaderError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("architecture {arch}: opcode {opcode:?} is not implemented")]
    UnimplementedOpcode { arch: &'static str, opcode: ShaderOpcode },

    #[error("line {line}: {message}")]
    Assembly { line: usize, message: String },

    #[error("opcode {opcode:?} latency {latency} exceeds the maximum execution latency")]
    LatencyTooLarge { opcode: ShaderOpcode, latency: u32 },

    #[error("thread {thread} out of range (limit {limit})")]
    ThreadOutOfRange { thread: u32, limit: u32 },

    #[error("{bank:?} register {reg} out of range")]
    RegisterOutOfRange { bank: Bank, reg: u32 },

    #[error("{bank:?} bank does not support register writes")]
    UnwritableBank { bank: Bank },

    #[error(
        "cycle {cycle}: thread {thread}: WAW on {bank:?}[{reg}], completion {recorded} not before {requested}"
    )]
    WawViolation {
        cycle: Cycle,
        thread: u32,
        bank: Bank,
        reg: u32,
        recorded: Cycle,
        requested: Cycle,
    },

    #[error("cycle {cycle}: thread {thread}: {message}")]
    Bookkeeping {
        cycle: Cycle,
        thread: u32,
        message: &'static str,
    },

    #[error("texture unit {unit}: {requested} tickets requested, {available} available")]
    TicketUnderflow {
        unit: usize,
        available: u32,
        requested: u32,
    },

    #[error("texture access {id} is not outstanding")]
    UnknownTextureAccess { id: u32 },

    #[error("cycle {cycle}: protocol error: {message}")]
    Protocol { cycle: Cycle, message: String },

    #[error("signal {signal}: more than {bandwidth} writes in cycle {cycle}")]
    SignalBandwidth {
        signal: String,
        cycle: Cycle,
        bandwidth: usize,
    },

    #[error("signal {signal}: latency {latency} above maximum {max}")]
    SignalLatency {
        signal: String,
        latency: Cycle,
        max: Cycle,
    },

    #[error("signal {signal}: data ready at cycle {ready_at} was not read (now {cycle})")]
    SignalStale {
        signal: String,
        ready_at: Cycle,
        cycle: Cycle,
    },

    #[error("signal {signal}: lock poisoned")]
    SignalPoisoned { signal: String },
}

impl ShaderError {
    pub fn protocol(cycle: Cycle, message: impl Into<String>) -> Self {
        ShaderError::Protocol {
            cycle,
            message: message.into(),
        }
    }

    pub fn bookkeeping(cycle: Cycle, thread: u32, message: &'static str) -> Self {
        ShaderError::Bookkeeping {
            cycle,
            thread,
            message,
        }
    }
}

pub type ShaderResult<T> = Result<T, ShaderError>;
