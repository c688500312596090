use std::time::Instant;

use crate::error::Result;
use crate::runtime::messaging::Communicator;

/// Wall-clock accumulator in the style of the experiment clocks: `start`
/// and `stop` bracket an interval, `seconds` accumulates the bracketed
/// intervals, `reduce` fills in the maximum across ranks.
#[derive(Debug, Clone)]
pub struct Clock {
    name: &'static str,
    started: Option<Instant>,
    pub seconds: f64,
    pub max: f64,
}

impl Clock {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            started: None,
            seconds: 0.0,
            max: 0.0,
        }
    }

    pub fn start(&mut self) {
        self.started = Some(Instant::now());
    }

    pub fn stop(&mut self) {
        if let Some(t0) = self.started.take() {
            self.seconds += t0.elapsed().as_secs_f64();
        }
    }

    /// All-reduce the last interval to its maximum over `participants`.
    pub fn reduce<P: crate::primitives::cell::Cell>(
        &mut self,
        comm: &Communicator<P>,
        participants: &[usize],
    ) -> Result<()> {
        let local = self.seconds.max(0.0);
        self.max = comm.all_reduce_max_f64(participants, local)?;
        Ok(())
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

/// The engine-lifetime clocks reported at the end of a run.
#[derive(Debug)]
pub struct EngineClocks {
    pub ctrl: Clock,
    pub init: Clock,
    pub main_loop: Clock,
    pub iter: Clock,
    pub redistribute: Clock,
    pub comm: Clock,
}

impl EngineClocks {
    pub fn new() -> Self {
        Self {
            ctrl: Clock::new("ctrl"),
            init: Clock::new("init"),
            main_loop: Clock::new("loop"),
            iter: Clock::new("iter"),
            redistribute: Clock::new("redistribute"),
            comm: Clock::new("comm"),
        }
    }

    pub fn reduce<P: crate::primitives::cell::Cell>(
        &mut self,
        comm: &Communicator<P>,
        participants: &[usize],
    ) -> Result<()> {
        self.ctrl.reduce(comm, participants)?;
        self.init.reduce(comm, participants)?;
        self.main_loop.reduce(comm, participants)?;
        self.redistribute.reduce(comm, participants)?;
        self.comm.reduce(comm, participants)?;
        Ok(())
    }

    /// Report reduced maxima. The experimentation format is a single CSV
    /// line; the normal format is one event per clock.
    pub fn report(&self, rank: usize, exp_mode: bool) {
        if rank != 0 {
            return;
        }
        if exp_mode {
            println!(
                "{}, {}, {}, {}",
                self.ctrl.max, self.init.max, self.main_loop.max, self.comm.max
            );
        } else {
            for clock in [
                &self.ctrl,
                &self.init,
                &self.main_loop,
                &self.redistribute,
                &self.comm,
            ] {
                tracing::info!(clock = clock.name(), max_seconds = clock.max, "clock");
            }
        }
    }
}

impl Default for EngineClocks {
    fn default() -> Self {
        Self::new()
    }
}
