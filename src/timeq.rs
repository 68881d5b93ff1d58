/*
Clock bookkeeping for the shader pipeline model.

Every unit is clocked with an explicit cycle number.  Units that live entirely in one clock
domain just count cycles; the vector decode/execute unit straddles two domains (the GPU domain,
where texture traffic and command processor updates happen, and the shader domain, where decode
and execution happen).  `DomainClock` produces the interleaved sequence of domain edges for two
frequencies so the driver can call the right step function with the right per-domain cycle.

Edge n of a domain with frequency f happens at time n / f.  Comparing n_gpu * f_shader against
n_shader * f_gpu keeps the ordering exact without floating point.  When both edges coincide the
GPU domain goes first.
*/

pub type Cycle = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClockDomain {
    Gpu,
    Shader,
}

// One clock edge: which domain ticks, and that domain's own cycle number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DomainTick {
    pub domain: ClockDomain,
    pub cycle: Cycle,
}

#[derive(Debug, Clone)]
pub struct DomainClock {
    gpu_mhz: u64,
    shader_mhz: u64,
    gpu_cycle: Cycle,
    shader_cycle: Cycle,
}

impl DomainClock {
    pub fn new(gpu_mhz: u64, shader_mhz: u64) -> Self {
        assert!(gpu_mhz > 0 && shader_mhz > 0, "clock frequencies must be > 0");
        Self {
            gpu_mhz,
            shader_mhz,
            gpu_cycle: 0,
            shader_cycle: 0,
        }
    }

    // Cycles already handed out for each domain.
    pub fn gpu_cycle(&self) -> Cycle {
        self.gpu_cycle
    }

    pub fn shader_cycle(&self) -> Cycle {
        self.shader_cycle
    }

    // Next edge in simulated time order.
    pub fn next_tick(&mut self) -> DomainTick {
        let gpu_time = self.gpu_cycle as u128 * self.shader_mhz as u128;
        let shader_time = self.shader_cycle as u128 * self.gpu_mhz as u128;
        if gpu_time <= shader_time {
            let tick = DomainTick {
                domain: ClockDomain::Gpu,
                cycle: self.gpu_cycle,
            };
            self.gpu_cycle += 1;
            tick
        } else {
            let tick = DomainTick {
                domain: ClockDomain::Shader,
                cycle: self.shader_cycle,
            };
            self.shader_cycle += 1;
            tick
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ClockDomain, DomainClock};

    #[test]
    fn equal_frequencies_alternate_gpu_first() {
        let mut clock = DomainClock::new(500, 500);
        let ticks: Vec<_> = (0..4).map(|_| clock.next_tick()).collect();
        assert_eq!(ClockDomain::Gpu, ticks[0].domain);
        assert_eq!(ClockDomain::Shader, ticks[1].domain);
        assert_eq!(ClockDomain::Gpu, ticks[2].domain);
        assert_eq!(1, ticks[2].cycle);
        assert_eq!(1, ticks[3].cycle);
    }

    #[test]
    fn faster_shader_domain_ticks_more_often() {
        let mut clock = DomainClock::new(250, 500);
        let shader_ticks = (0..30)
            .map(|_| clock.next_tick())
            .filter(|tick| tick.domain == ClockDomain::Shader)
            .count();
        assert_eq!(20, shader_ticks);
        assert_eq!(10, clock.gpu_cycle());
    }
}
