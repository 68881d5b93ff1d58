/// `Signal` models a bounded, fixed-latency wire between two units.
///
/// A value written at cycle `c` becomes readable at `c + latency`.  Each signal accepts at most
/// `bandwidth` writes per cycle and a write may ask for a shorter latency than the signal's
/// maximum (the execution pipeline uses this for per-opcode latencies).  The reader must drain
/// everything that becomes ready on a cycle during that cycle: data left behind is reported as
/// stale on the next read.
use std::collections::VecDeque;
use std::sync::{Arc, RwLock, RwLockWriteGuard};

use crate::error::{ShaderError, ShaderResult};
use crate::timeq::Cycle;

#[derive(Debug)]
struct Timed<T> {
    ready_at: Cycle,
    data: T,
}

#[derive(Debug)]
pub struct SignalQueue<T> {
    name: String,
    bandwidth: usize,
    latency: Cycle,
    // ordered by ready_at, FIFO among equal ready cycles
    inflight: VecDeque<Timed<T>>,
    write_cycle: Cycle,
    writes_this_cycle: usize,
}

impl<T> SignalQueue<T> {
    fn new(name: &str, bandwidth: usize, latency: Cycle) -> Self {
        Self {
            name: name.to_string(),
            bandwidth,
            latency,
            inflight: VecDeque::with_capacity(bandwidth * latency.max(1) as usize),
            write_cycle: 0,
            writes_this_cycle: 0,
        }
    }

    fn write(&mut self, cycle: Cycle, data: T, latency: Cycle) -> ShaderResult<()> {
        if latency == 0 || latency > self.latency {
            return Err(ShaderError::SignalLatency {
                signal: self.name.clone(),
                latency,
                max: self.latency,
            });
        }
        if cycle != self.write_cycle {
            self.write_cycle = cycle;
            self.writes_this_cycle = 0;
        }
        if self.writes_this_cycle >= self.bandwidth {
            return Err(ShaderError::SignalBandwidth {
                signal: self.name.clone(),
                cycle,
                bandwidth: self.bandwidth,
            });
        }
        self.writes_this_cycle += 1;

        let ready_at = cycle + latency;
        let position = self
            .inflight
            .iter()
            .rposition(|entry| entry.ready_at <= ready_at)
            .map_or(0, |idx| idx + 1);
        self.inflight.insert(position, Timed { ready_at, data });
        Ok(())
    }

    fn read(&mut self, cycle: Cycle) -> ShaderResult<Option<T>> {
        match self.inflight.front() {
            Some(front) if front.ready_at < cycle => Err(ShaderError::SignalStale {
                signal: self.name.clone(),
                ready_at: front.ready_at,
                cycle,
            }),
            Some(front) if front.ready_at == cycle => {
                Ok(self.inflight.pop_front().map(|entry| entry.data))
            }
            _ => Ok(None),
        }
    }

}

type Shared<T> = Arc<RwLock<SignalQueue<T>>>;

fn lock<'a, T>(shared: &'a Shared<T>, name: &str) -> ShaderResult<RwLockWriteGuard<'a, SignalQueue<T>>> {
    shared.write().map_err(|_| ShaderError::SignalPoisoned {
        signal: name.to_string(),
    })
}

/// Producer end of a signal.
#[derive(Debug)]
pub struct SignalWriter<T> {
    name: String,
    queue: Shared<T>,
}

/// Consumer end of a signal.
#[derive(Debug)]
pub struct SignalReader<T> {
    name: String,
    queue: Shared<T>,
}

impl<T> SignalWriter<T> {
    /// Write with the signal's full latency.
    pub fn write(&self, cycle: Cycle, data: T) -> ShaderResult<()> {
        let mut queue = lock(&self.queue, &self.name)?;
        let latency = queue.latency;
        queue.write(cycle, data, latency)
    }

    /// Write with an explicit latency, at most the signal's latency.
    pub fn write_with_latency(&self, cycle: Cycle, data: T, latency: Cycle) -> ShaderResult<()> {
        lock(&self.queue, &self.name)?.write(cycle, data, latency)
    }
}

impl<T> SignalReader<T> {
    /// Returns the next value that becomes ready at `cycle`, if any.
    pub fn read(&self, cycle: Cycle) -> ShaderResult<Option<T>> {
        lock(&self.queue, &self.name)?.read(cycle)
    }

    /// Reads everything that is ready at `cycle`.
    pub fn read_all(&self, cycle: Cycle) -> ShaderResult<Vec<T>> {
        let mut queue = lock(&self.queue, &self.name)?;
        let mut ready = Vec::new();
        while let Some(data) = queue.read(cycle)? {
            ready.push(data);
        }
        Ok(ready)
    }

    /// Throws away everything still in flight.
    pub fn clear(&self) -> ShaderResult<()> {
        lock(&self.queue, &self.name)?.inflight.clear();
        Ok(())
    }
}

/// Creates a signal and returns its two ends.
pub fn signal<T>(name: &str, bandwidth: usize, latency: Cycle) -> (SignalWriter<T>, SignalReader<T>) {
    assert!(bandwidth > 0, "signal {name}: bandwidth must be > 0");
    assert!(latency > 0, "signal {name}: latency must be > 0");
    let queue = Arc::new(RwLock::new(SignalQueue::new(name, bandwidth, latency)));
    (
        SignalWriter {
            name: name.to_string(),
            queue: Arc::clone(&queue),
        },
        SignalReader {
            name: name.to_string(),
            queue,
        },
    )
}

/// One signal per unit, e.g. a texture request wire for every texture unit.
pub fn signal_vec<T>(
    name: &str,
    count: usize,
    bandwidth: usize,
    latency: Cycle,
) -> (Vec<SignalWriter<T>>, Vec<SignalReader<T>>) {
    (0..count)
        .map(|idx| signal(&format!("{name}[{idx}]"), bandwidth, latency))
        .unzip()
}
