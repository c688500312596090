use enum_dispatch::enum_dispatch;

use crate::error::{EpsilodError, Result};

/// Which rebalancing heuristic drives the supervisor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AlbKind {
    None,
    NextAlb,
    ConstIters,
    ExpIters,
    DoubleIters,
}

impl Default for AlbKind {
    fn default() -> Self {
        AlbKind::None
    }
}

impl AlbKind {
    pub fn parse(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(AlbKind::None),
            "nextalb" => Ok(AlbKind::NextAlb),
            "constiters" => Ok(AlbKind::ConstIters),
            "expiters" => Ok(AlbKind::ExpIters),
            "doubleiters" => Ok(AlbKind::DoubleIters),
            other => Err(EpsilodError::Config(format!(
                "unknown ALB heuristic {other:?}"
            ))),
        }
    }

    pub fn build(self) -> Option<AlbHeuristic> {
        match self {
            AlbKind::None => None,
            AlbKind::NextAlb => Some(NextAlb::default().into()),
            AlbKind::ConstIters => Some(ConstIters.into()),
            AlbKind::ExpIters => Some(ExpIters::default().into()),
            AlbKind::DoubleIters => Some(DoubleIters::default().into()),
        }
    }
}

/// The heuristic interface: `should_rebalance` is consulted once the timing
/// window is full; `on_redistribute` observes the gathered per-rank times
/// whenever a redistribution actually happens, so the heuristic can place
/// its next trigger.
#[enum_dispatch]
pub trait Heuristic {
    fn should_rebalance(&self, curr_iter: usize, curr_alb_iter: usize) -> bool;

    fn on_redistribute(
        &mut self,
        curr_iter: usize,
        curr_alb_iter: usize,
        row_times: &[f64],
        avg_times: &[f64],
        redis_times: &[f64],
    );
}

#[enum_dispatch(Heuristic)]
#[derive(Clone, Debug)]
pub enum AlbHeuristic {
    NextAlb,
    ConstIters,
    ExpIters,
    DoubleIters,
}

fn worst_and_mean(avg_times: &[f64]) -> (f64, f64) {
    let worst = avg_times.iter().copied().fold(0.0f64, f64::max);
    let mean = avg_times.iter().sum::<f64>() / avg_times.len() as f64;
    (worst, mean)
}

/// Estimate the iteration at which imbalance will have cost one
/// redistribution's worth of time, and trigger there.
#[derive(Clone, Debug, Default)]
pub struct NextAlb {
    next_alb: usize,
    avg_redis_time: f64,
}

impl Heuristic for NextAlb {
    fn should_rebalance(&self, curr_iter: usize, _curr_alb_iter: usize) -> bool {
        curr_iter >= self.next_alb
    }

    fn on_redistribute(
        &mut self,
        curr_iter: usize,
        curr_alb_iter: usize,
        _row_times: &[f64],
        avg_times: &[f64],
        redis_times: &[f64],
    ) {
        // Redistribution times are the -1 sentinel until the first
        // redistribution has been measured; check again next window.
        if redis_times.first().copied() == Some(-1.0) {
            self.next_alb = curr_iter;
            return;
        }
        let (worst, mean) = worst_and_mean(avg_times);
        if worst - mean <= 0.0 {
            // Perfectly balanced: never again.
            self.next_alb = usize::MAX;
            return;
        }
        let worst_redis = redis_times.iter().copied().fold(0.0f64, f64::max);
        self.avg_redis_time = (self.avg_redis_time * (curr_alb_iter as f64 - 1.0)
            + worst_redis)
            / curr_alb_iter as f64;
        let iters = (self.avg_redis_time / (worst - mean)).ceil() as usize;
        self.next_alb = curr_iter + iters;
        tracing::debug!(
            curr_iter,
            curr_alb_iter,
            avg_redis_time = self.avg_redis_time,
            worst,
            mean,
            next_alb = self.next_alb,
            "nextalb estimate"
        );
    }
}

/// Rebalance on every full window.
#[derive(Clone, Debug, Default)]
pub struct ConstIters;

impl Heuristic for ConstIters {
    fn should_rebalance(&self, _curr_iter: usize, _curr_alb_iter: usize) -> bool {
        true
    }

    fn on_redistribute(&mut self, _: usize, _: usize, _: &[f64], _: &[f64], _: &[f64]) {}
}

/// Rebalance after exponentially growing gaps: next at `iter + 2^alb_iter`.
#[derive(Clone, Debug, Default)]
pub struct ExpIters {
    next_alb: usize,
}

impl Heuristic for ExpIters {
    fn should_rebalance(&self, curr_iter: usize, _curr_alb_iter: usize) -> bool {
        curr_iter >= self.next_alb
    }

    fn on_redistribute(&mut self, curr_iter: usize, curr_alb_iter: usize, _: &[f64], _: &[f64], _: &[f64]) {
        self.next_alb = curr_iter + (1usize << curr_alb_iter.min(62));
    }
}

/// Rebalance at iteration numbers that double each time.
#[derive(Clone, Debug, Default)]
pub struct DoubleIters {
    next_alb: usize,
}

impl Heuristic for DoubleIters {
    fn should_rebalance(&self, curr_iter: usize, _curr_alb_iter: usize) -> bool {
        curr_iter >= self.next_alb
    }

    fn on_redistribute(&mut self, curr_iter: usize, _curr_alb_iter: usize, _: &[f64], _: &[f64], _: &[f64]) {
        self.next_alb = curr_iter * 2;
    }
}
