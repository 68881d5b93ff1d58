use log::debug;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::ShaderResult;
use crate::shader::texture::{TextureAccess, TextureResult, TextureUnitLink, TextureUnitState};
use crate::shader::TICKETS_PER_STATE;
use crate::sim::config::WorkloadConfig;
use crate::timeq::Cycle;

#[derive(Debug)]
struct PendingAccess {
    ready_at: Cycle,
    access: TextureAccess,
}

/// Texture unit stand-in: every access takes `texture_latency` plus up to `texture_jitter`
/// cycles, one result leaves per cycle, and room for every `TICKETS_PER_STATE` freed lanes is
/// announced with a state event.
#[derive(Debug)]
pub struct TextureUnitModel {
    id: usize,
    link: TextureUnitLink,
    latency: Cycle,
    jitter: Cycle,
    rng: StdRng,
    pending: Vec<PendingAccess>,
    freed_lanes: u32,
    // state events owed to the engine, one goes out per cycle
    owed_events: u32,
    pub accesses: u64,
}

impl TextureUnitModel {
    pub fn new(id: usize, link: TextureUnitLink, workload: &WorkloadConfig) -> Self {
        Self {
            id,
            link,
            latency: workload.texture_latency.max(1),
            jitter: workload.texture_jitter,
            rng: StdRng::seed_from_u64(workload.seed.wrapping_add(id as u64)),
            pending: Vec::new(),
            freed_lanes: 0,
            owed_events: workload.texture_capacity / TICKETS_PER_STATE,
            accesses: 0,
        }
    }

    pub fn idle(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn clock(&mut self, cycle: Cycle) -> ShaderResult<()> {
        for request in self.link.requests.read_all(cycle)? {
            let extra = if self.jitter > 0 {
                self.rng.gen_range(0..=self.jitter)
            } else {
                0
            };
            debug!(
                "cycle {cycle}: texture unit {} accepted access {} ({} elements)",
                self.id,
                request.access.id,
                request.access.elements.len()
            );
            self.accesses += 1;
            self.pending.push(PendingAccess {
                ready_at: cycle + self.latency + extra,
                access: request.access,
            });
        }

        let done = self
            .pending
            .iter()
            .enumerate()
            .filter(|(_, p)| p.ready_at <= cycle)
            .min_by_key(|(_, p)| p.ready_at)
            .map(|(idx, _)| idx);
        if let Some(idx) = done {
            let PendingAccess { access, .. } = self.pending.remove(idx);
            let lanes = access.elements.len() as u32;
            self.link.results.write(
                cycle,
                TextureResult {
                    access_id: access.id,
                    samples: vec![[0.0; 4]; lanes as usize],
                    start_cycle: access.issued_at,
                },
            )?;
            self.freed_lanes += lanes;
            self.owed_events += self.freed_lanes / TICKETS_PER_STATE;
            self.freed_lanes %= TICKETS_PER_STATE;
        }

        if self.owed_events > 0 {
            self.link.state.write(cycle, TextureUnitState)?;
            self.owed_events -= 1;
        }
        Ok(())
    }
}
