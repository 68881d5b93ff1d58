pub mod arch;
pub mod command;
pub mod config;
pub mod control;
pub mod decode_exec;
pub mod decode_exec_vector;
pub mod emulator;
pub mod hazard;
pub mod ibuffer;
pub mod inst;
pub mod isa;
pub mod ports;
pub mod stats;
pub mod texture;

#[cfg(test)]
mod unit_tests;

pub use command::{DecodeCommand, DecodeCommandKind, DecodeState, EngineState, ShaderCommand};
pub use config::{ScalarShaderConfig, VectorAluMode, VectorShaderConfig};
pub use decode_exec::DecodeExecute;
pub use decode_exec_vector::VectorDecodeExecute;
pub use emulator::{ShaderEmulator, TraceEmulator};
pub use stats::DecodeExecStats;

/// Longest execution latency the pipeline supports (also the write port window length).
pub const MAX_EXEC_LAT: usize = 17;
/// Register writes per cycle, per thread processed per cycle and instruction slot.
pub const MAX_EXEC_BW: u32 = 2;

pub const ADDR_BANK_REGS: usize = 2;
pub const TEMP_BANK_REGS: usize = 32;
pub const PRED_BANK_REGS: usize = 32;
pub const OUTP_BANK_REGS: usize = 16;

/// Fragments in a stamp; texture accesses service at most this many elements.
pub const STAMP_FRAGMENTS: usize = 4;
/// Tickets a texture unit returns with every state event.
pub const TICKETS_PER_STATE: u32 = 4;
