use std::fmt;

/// Commands decode/execute sends back to fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DecodeCommandKind {
    UnblockThread,
    BlockThread,
    EndThread,
    RepeatLast,
    NewPc,
    ZexportThread,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeCommand {
    pub kind: DecodeCommandKind,
    pub thread: u32,
    pub pc: u32,
}

impl DecodeCommand {
    pub fn new(kind: DecodeCommandKind, thread: u32, pc: u32) -> Self {
        Self { kind, thread, pc }
    }
}

impl fmt::Display for DecodeCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self.kind {
            DecodeCommandKind::UnblockThread => "UNBLOCK_THREAD",
            DecodeCommandKind::BlockThread => "BLOCK_THREAD",
            DecodeCommandKind::EndThread => "END_THREAD",
            DecodeCommandKind::RepeatLast => "REPEAT_LAST",
            DecodeCommandKind::NewPc => "NEW_PC",
            DecodeCommandKind::ZexportThread => "ZEXPORT_THREAD",
        };
        write!(f, "{} thread {} pc {:#06x}", name, self.thread, self.pc)
    }
}

/// Back-pressure state sent to fetch every cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeState {
    Ready,
    Busy,
}

/// Commands from the command processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderCommand {
    Reset,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EngineState {
    #[default]
    Reset,
    Ready,
}
