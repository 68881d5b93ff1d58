use log::debug;
use smallvec::SmallVec;

use crate::base::signal::{signal_vec, SignalReader, SignalWriter};
use crate::error::{ShaderError, ShaderResult};
use crate::shader::emulator::ShaderEmulator;
use crate::shader::stats::DecodeExecStats;
use crate::shader::{STAMP_FRAGMENTS, TICKETS_PER_STATE};
use crate::timeq::Cycle;

pub type Elements = SmallVec<[u32; STAMP_FRAGMENTS]>;

/// A texture access staged by the emulator: one stamp of elements sampling together.
#[derive(Debug, Clone, PartialEq)]
pub struct TextureAccess {
    pub id: u32,
    pub elements: Elements,
    pub issued_at: Cycle,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextureRequest {
    pub access: TextureAccess,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextureResult {
    pub access_id: u32,
    pub samples: Vec<[f32; 4]>,
    pub start_cycle: Cycle,
}

/// Texture unit state event: the unit freed room for another `TICKETS_PER_STATE` lanes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureUnitState;

/// Decode/execute side of the wires to every texture unit.
#[derive(Debug)]
pub struct TexturePorts {
    pub requests: Vec<SignalWriter<TextureRequest>>,
    pub results: Vec<SignalReader<TextureResult>>,
    pub state: Vec<SignalReader<TextureUnitState>>,
}

/// Texture unit side of the same wires.
#[derive(Debug)]
pub struct TextureUnitLink {
    pub requests: SignalReader<TextureRequest>,
    pub results: SignalWriter<TextureResult>,
    pub state: SignalWriter<TextureUnitState>,
}

pub fn texture_ports(
    units: usize,
    request_rate: usize,
    latency: Cycle,
) -> (TexturePorts, Vec<TextureUnitLink>) {
    let (req_tx, req_rx) = signal_vec("tex_request", units, request_rate.max(1), latency);
    let (res_tx, res_rx) = signal_vec("tex_result", units, 1, latency);
    let (st_tx, st_rx) = signal_vec("tex_state", units, 1, latency);
    let links = req_rx
        .into_iter()
        .zip(res_tx)
        .zip(st_tx)
        .map(|((requests, results), state)| TextureUnitLink {
            requests,
            results,
            state,
        })
        .collect();
    (
        TexturePorts {
            requests: req_tx,
            results: res_rx,
            state: st_rx,
        },
        links,
    )
}

/// Outstanding-lane budget per texture unit.
#[derive(Debug, Clone, Default)]
pub struct TicketPool {
    tickets: Vec<u32>,
}

impl TicketPool {
    pub fn new(units: usize) -> Self {
        Self {
            tickets: vec![0; units],
        }
    }

    pub fn available(&self, unit: usize) -> u32 {
        self.tickets.get(unit).copied().unwrap_or(0)
    }

    pub fn replenish(&mut self, unit: usize) {
        if let Some(t) = self.tickets.get_mut(unit) {
            *t += TICKETS_PER_STATE;
        }
    }

    pub fn can_admit(&self, unit: usize, lanes: u32) -> bool {
        self.available(unit) >= lanes
    }

    pub fn consume(&mut self, unit: usize, lanes: u32) -> ShaderResult<()> {
        let available = self.available(unit);
        match self.tickets.get_mut(unit) {
            Some(t) if *t >= lanes => {
                *t -= lanes;
                Ok(())
            }
            _ => Err(ShaderError::TicketUnderflow {
                unit,
                available,
                requested: lanes,
            }),
        }
    }

    pub fn reset(&mut self) {
        self.tickets.iter_mut().for_each(|t| *t = 0);
    }
}

/// Round robin over texture units: stay on a unit until it got `per_unit` requests and the
/// emulator has nothing more to send.
#[derive(Debug, Clone)]
pub struct RequestArbiter {
    units: usize,
    per_unit: u32,
    current: usize,
    sent: u32,
}

impl RequestArbiter {
    pub fn new(units: usize, per_unit: u32) -> Self {
        Self {
            units,
            per_unit,
            current: 0,
            sent: 0,
        }
    }

    pub fn current(&self) -> usize {
        self.current
    }

    pub fn sent(&mut self) {
        self.sent += 1;
    }

    pub fn idle(&mut self) {
        if self.units > 0 && self.sent >= self.per_unit {
            self.sent = 0;
            self.current = (self.current + 1) % self.units;
        }
    }

    pub fn reset(&mut self) {
        self.current = 0;
        self.sent = 0;
    }
}

/// Tickets, request arbitration and result delivery for the texture units attached to one
/// decode/execute engine.
#[derive(Debug)]
pub struct TextureCoordinator {
    ports: TexturePorts,
    tickets: TicketPool,
    arbiter: RequestArbiter,
    request_rate: u32,
}

impl TextureCoordinator {
    pub fn new(ports: TexturePorts, request_rate: u32, requests_per_unit: u32) -> Self {
        let units = ports.requests.len();
        Self {
            ports,
            tickets: TicketPool::new(units),
            arbiter: RequestArbiter::new(units, requests_per_unit),
            request_rate,
        }
    }

    pub fn units(&self) -> usize {
        self.ports.requests.len()
    }

    pub fn current_unit(&self) -> usize {
        self.arbiter.current()
    }

    pub fn tickets(&self, unit: usize) -> u32 {
        self.tickets.available(unit)
    }

    pub fn receive_state(&mut self, cycle: Cycle) -> ShaderResult<()> {
        for (unit, rx) in self.ports.state.iter().enumerate() {
            for _ in rx.read_all(cycle)? {
                self.tickets.replenish(unit);
            }
        }
        Ok(())
    }

    /// Whether a texture instruction covering `lanes` lanes may issue now.
    pub fn can_admit(&self, cycle: Cycle, lanes: u32) -> ShaderResult<bool> {
        if self.units() == 0 {
            return Err(ShaderError::protocol(
                cycle,
                "texture instruction decoded with no texture unit attached",
            ));
        }
        Ok(self.tickets.can_admit(self.current_unit(), lanes))
    }

    pub fn consume(&mut self, lanes: u32) -> ShaderResult<()> {
        self.tickets.consume(self.arbiter.current(), lanes)
    }

    pub fn send_requests(
        &mut self,
        cycle: Cycle,
        emulator: &mut dyn ShaderEmulator,
        stats: &mut DecodeExecStats,
    ) -> ShaderResult<()> {
        if self.units() == 0 {
            return Ok(());
        }
        for _ in 0..self.request_rate {
            match emulator.next_texture_access() {
                Some(mut access) => {
                    access.issued_at = cycle;
                    let unit = self.arbiter.current();
                    debug!(
                        "cycle {cycle}: texture access {} ({} elements) to unit {unit}",
                        access.id,
                        access.elements.len()
                    );
                    self.ports.requests[unit].write(cycle, TextureRequest { access })?;
                    self.arbiter.sent();
                    stats.texture_requests += 1;
                }
                None => self.arbiter.idle(),
            }
        }
        Ok(())
    }

    /// Completes every result arriving this cycle and returns the elements each one serviced.
    pub fn receive_results(
        &mut self,
        cycle: Cycle,
        emulator: &mut dyn ShaderEmulator,
    ) -> ShaderResult<Vec<Elements>> {
        let mut serviced = Vec::new();
        for rx in &self.ports.results {
            for result in rx.read_all(cycle)? {
                serviced.push(emulator.complete_texture_access(result.access_id, &result.samples)?);
            }
        }
        Ok(serviced)
    }

    pub fn reset(&mut self) {
        self.tickets.reset();
        self.arbiter.reset();
    }

    /// Throws away results and state events still in flight to us.
    pub fn clear_inflight(&self) -> ShaderResult<()> {
        for rx in &self.ports.results {
            rx.clear()?;
        }
        for rx in &self.ports.state {
            rx.clear()?;
        }
        Ok(())
    }
}
