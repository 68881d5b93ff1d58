//! Wires between a decode/execute engine and the units around it.
//!
//! Every wire is a `Signal` with latency 1 except the execution pipeline, which is private to the
//! engine and takes per-opcode latencies up to `MAX_EXEC_LAT`.
use crate::base::signal::{signal, SignalReader, SignalWriter};
use crate::shader::command::{DecodeCommand, DecodeState, ShaderCommand};
use crate::shader::config::{ScalarShaderConfig, VectorShaderConfig};
use crate::shader::inst::{DynInst, VectorInstruction};
use crate::shader::texture::{texture_ports, TexturePorts, TextureUnitLink};
use crate::shader::{MAX_EXEC_BW, MAX_EXEC_LAT, TICKETS_PER_STATE};

/// One scalar fetch batch: `threads_cycle * instr_cycle` slots, `None` for an empty slot.
pub type FetchBatch = Vec<Option<DynInst>>;
/// One vector fetch: one or two instruction slots.
pub type VectorBatch = Vec<VectorInstruction>;

/// Engine side.
#[derive(Debug)]
pub struct DecodeExecPorts<F> {
    pub commands: SignalReader<ShaderCommand>,
    pub fetch: SignalReader<F>,
    pub decode_state: SignalWriter<DecodeState>,
    pub control: SignalWriter<DecodeCommand>,
    pub texture: TexturePorts,
}

/// Fetch side.
#[derive(Debug)]
pub struct FetchLink<F> {
    pub fetch: SignalWriter<F>,
    pub decode_state: SignalReader<DecodeState>,
    pub control: SignalReader<DecodeCommand>,
}

/// Everything needed to connect one engine.
#[derive(Debug)]
pub struct DecodeExecWiring<F> {
    pub engine: DecodeExecPorts<F>,
    pub fetch: FetchLink<F>,
    pub commands: SignalWriter<ShaderCommand>,
    pub texture_units: Vec<TextureUnitLink>,
}

fn wire<F>(
    control_bandwidth: usize,
    texture_units: usize,
    texture_request_rate: usize,
) -> DecodeExecWiring<F> {
    let (cmd_tx, cmd_rx) = signal("shader_command", 1, 1);
    let (fetch_tx, fetch_rx) = signal("fetch_instructions", 1, 1);
    let (state_tx, state_rx) = signal("decode_state", 1, 1);
    let (ctrl_tx, ctrl_rx) = signal("decode_control", control_bandwidth.max(1), 1);
    let (texture, texture_units) = texture_ports(texture_units, texture_request_rate, 1);
    DecodeExecWiring {
        engine: DecodeExecPorts {
            commands: cmd_rx,
            fetch: fetch_rx,
            decode_state: state_tx,
            control: ctrl_tx,
            texture,
        },
        fetch: FetchLink {
            fetch: fetch_tx,
            decode_state: state_rx,
            control: ctrl_rx,
        },
        commands: cmd_tx,
        texture_units,
    }
}

/// Control commands per cycle: texture results unblock and end up to a stamp of threads per
/// unit, writeback emits z-export and end per completed instruction and decode emits one repeat
/// or block per slot.
pub fn scalar_control_bandwidth(config: &ScalarShaderConfig) -> usize {
    let batch = config.batch_size();
    let units = config.texture_units as usize;
    units * TICKETS_PER_STATE as usize * 2 + (2 * MAX_EXEC_BW as usize + 1) * batch
}

/// Vector engines can see lane groups of several fetches complete in the same cycle, each one
/// producing up to three commands per slot.
pub fn vector_control_bandwidth(config: &VectorShaderConfig, instr_cycle: u32) -> usize {
    let ic = instr_cycle as usize;
    let wakeups = (config.texture_units * config.texture_clock_ratio()) as usize;
    1 + ic * (1 + 3 * MAX_EXEC_LAT) + 2 * wakeups
}

pub fn wire_scalar(config: &ScalarShaderConfig) -> DecodeExecWiring<FetchBatch> {
    wire(
        scalar_control_bandwidth(config),
        config.texture_units as usize,
        config.texture_request_rate as usize,
    )
}

pub fn wire_vector(config: &VectorShaderConfig, instr_cycle: u32) -> DecodeExecWiring<VectorBatch> {
    wire(
        vector_control_bandwidth(config, instr_cycle),
        config.texture_units as usize,
        config.texture_request_rate as usize,
    )
}
