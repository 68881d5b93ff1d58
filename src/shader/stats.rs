use serde::Serialize;

/// Monotonic decode/execute counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DecodeExecStats {
    pub executed: u64,
    pub blocked: u64,
    pub faked: u64,
    pub removed: u64,
    pub blocks: u64,
    pub unblocks: u64,
    pub ends: u64,
    pub replays: u64,
    pub zexports: u64,
    pub new_pcs: u64,
    pub texture_requests: u64,
}
