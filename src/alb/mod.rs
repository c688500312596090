pub mod heuristics;

use std::time::Instant;

use crate::comm::pattern::{sort_comm_slots, Pattern};
use crate::config::EngineConfig;
use crate::engine::{EngineState, TilePair};
use crate::error::Result;
use crate::partition::{Layout, Topology, Weights};
use crate::primitives::cell::Cell;
use crate::primitives::tile::Tile;
use crate::redistribute::redistribute_layout;
use crate::runtime::messaging::{
    Communicator, PendingGather, TAG_ALB_AVG_TIMES, TAG_ALB_REDIS_TIMES, TAG_ALB_ROW_TIMES,
};
use crate::runtime::Controller;
use crate::stencil::Stencil;
use crate::tiles::{CommArgs, EngineTiles, GlobalCoords, ThreadSpaces};
use crate::utils::avg::SlidingAvg;

pub use heuristics::{AlbHeuristic, AlbKind, Heuristic};

/// What the supervisor did this iteration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AlbOutcome {
    None,
    /// The layout changed: the engine must re-seed the copy buffer on
    /// device before the next swap.
    Rebalanced,
}

struct PendingTimes {
    row: PendingGather,
    avg: PendingGather,
    redis: PendingGather,
}

/// The automatic load balancer.
///
/// Keeps a sliding window of inner-kernel times; when the configured
/// heuristic fires on a full window, it first launches non-blocking
/// all-gathers of the per-rank timings, and on the following trigger waits
/// on them, recomputes partition weights inversely proportional to each
/// rank's time per row, and re-partitions the domain with live data
/// migration.
pub struct AlbSupervisor {
    heur: Option<AlbHeuristic>,
    window: SlidingAvg,
    curr_iter: usize,
    curr_alb_iter: usize,
    /// Ranks active at engine start; later deactivations keep communicating.
    comm_ranks: Vec<usize>,
    pending: Option<PendingTimes>,
    /// Seconds of the last redistribution, -1 until one has happened.
    last_redis_seconds: f64,
    pub rebalances: usize,
}

impl AlbSupervisor {
    /// ALB requires the weighted partition: anything else with a non-`None`
    /// heuristic logs a warning and disables rebalancing.
    pub fn new(config: &EngineConfig, lay: &Layout) -> AlbSupervisor {
        let mut kind = config.alb;
        if kind != AlbKind::None && !config.partition.is_weighted() {
            tracing::warn!(
                "ALB heuristic {:?} selected but the partition is not weighted; disabling ALB",
                kind
            );
            kind = AlbKind::None;
        }
        AlbSupervisor {
            heur: kind.build(),
            window: SlidingAvg::new(config.alb_window),
            curr_iter: 0,
            curr_alb_iter: 0,
            comm_ranks: lay.active_ranks(),
            pending: None,
            last_redis_seconds: -1.0,
            rebalances: 0,
        }
    }

    /// Per-iteration hook, called right after the inner kernel's time has
    /// been read. Skipped (except for bookkeeping) on the final iteration.
    #[allow(clippy::too_many_arguments)]
    pub fn step<C: Cell>(
        &mut self,
        ctrl: &Controller<C>,
        comm: &Communicator<C>,
        config: &EngineConfig,
        stencil: &Stencil,
        global_mat: &Tile<C>,
        state: &mut EngineState<C>,
        kernel_time: f64,
        is_last: bool,
    ) -> Result<AlbOutcome> {
        if self.heur.is_none() {
            self.curr_iter += 1;
            return Ok(AlbOutcome::None);
        }

        let time = if state.lay.active() { kernel_time } else { 0.0 };
        self.window.push(time);

        let mut outcome = AlbOutcome::None;
        if let Some(avg) = self.window.mean() {
            let fire = self
                .heur
                .as_ref()
                .map(|h| h.should_rebalance(self.curr_iter, self.curr_alb_iter))
                .unwrap_or(false);
            if fire && !is_last {
                if self.pending.is_none() {
                    // First trigger on a full window: launch the gathers and
                    // keep iterating while they complete.
                    let per_row = match state.tiles.as_ref() {
                        Some(pair) => avg / pair.cur.mat.card(0) as f64,
                        None => 0.0,
                    };
                    self.pending = Some(PendingTimes {
                        row: comm.all_gather_start(&self.comm_ranks, per_row, TAG_ALB_ROW_TIMES)?,
                        avg: comm.all_gather_start(&self.comm_ranks, avg, TAG_ALB_AVG_TIMES)?,
                        redis: comm.all_gather_start(
                            &self.comm_ranks,
                            self.last_redis_seconds,
                            TAG_ALB_REDIS_TIMES,
                        )?,
                    });
                } else {
                    let t0 = Instant::now();
                    let pending = self.pending.take().expect("checked above");
                    let row_times = comm.finish_gather(&pending.row)?;
                    let avg_times = comm.finish_gather(&pending.avg)?;
                    let redis_times = comm.finish_gather(&pending.redis)?;

                    self.curr_alb_iter += 1;
                    if let Some(h) = self.heur.as_mut() {
                        h.on_redistribute(
                            self.curr_iter,
                            self.curr_alb_iter,
                            &row_times,
                            &avg_times,
                            &redis_times,
                        );
                    }

                    let weights = self.weights_from_row_times(comm.num_ranks(), &row_times);
                    self.rebalance(ctrl, comm, config, stencil, global_mat, state, weights)?;

                    self.window.reset();
                    self.last_redis_seconds = t0.elapsed().as_secs_f64();
                    self.rebalances += 1;
                    outcome = AlbOutcome::Rebalanced;
                }
            }
        }
        self.curr_iter += 1;
        Ok(outcome)
    }

    /// New weights, one per world rank: inversely proportional to the
    /// measured time per row. Ranks with zero time (or outside the
    /// communicating set) get zero weight; an all-zero measurement pins all
    /// work on the first communicating rank.
    fn weights_from_row_times(&self, num_ranks: usize, row_times: &[f64]) -> Weights {
        let sum: f64 = row_times.iter().sum();
        let mut by_comm_rank: Vec<f32> = row_times
            .iter()
            .map(|&t| if t == 0.0 { 0.0 } else { (sum / t) as f32 })
            .collect();
        if sum == 0.0 {
            by_comm_rank[0] = 1.0;
        }
        let mut ratios = vec![0.0f32; num_ranks];
        for (i, &r) in self.comm_ranks.iter().enumerate() {
            ratios[r] = by_comm_rank[i];
        }
        Weights { ratios }
    }

    /// The live re-partition: drain the device, free the copy buffer, lay
    /// the domain out under the new weights, migrate the data, rebuild
    /// every tile, pattern and thread space, refresh the halos, and put the
    /// matrix back on the device.
    #[allow(clippy::too_many_arguments)]
    fn rebalance<C: Cell>(
        &self,
        ctrl: &Controller<C>,
        comm: &Communicator<C>,
        config: &EngineConfig,
        stencil: &Stencil,
        global_mat: &Tile<C>,
        state: &mut EngineState<C>,
        weights: Weights,
    ) -> Result<()> {
        let borders = stencil.borders();

        if let Some(pair) = state.tiles.as_ref() {
            ctrl.move_from(&pair.cur.mat);
            ctrl.wait_tile(&pair.cur.mat);
        }

        let new_lay = Layout::weighted(
            Topology::plain(state.lay.num_ranks()),
            state.lay.orig_shape().clone(),
            0,
            &weights,
            state.lay.my_rank(),
        )?;
        if comm.rank() == 0 {
            tracing::info!(ratios = ?weights.ratios, "ALB redistribution");
        }
        let new_args = CommArgs::new(stencil, &new_lay);

        // Keep the current timestep alive for the migration, free the rest.
        let old_pair = state.tiles.take();
        let (old_cur, old_prev) = match old_pair {
            Some(pair) => (Some(pair.cur), Some(pair.prev)),
            None => (None, None),
        };
        drop(old_prev);

        let new_cur = new_lay
            .active()
            .then(|| EngineTiles::create(ctrl, &new_lay, global_mat, &borders, &new_args));

        redistribute_layout(
            comm,
            &self.comm_ranks,
            &state.lay,
            &new_lay,
            old_cur.as_ref().map(|t| &t.mat),
            new_cur.as_ref().map(|t| &t.mat),
            global_mat.shape(),
            &borders,
        )?;
        drop(old_cur);

        state.lay = new_lay;
        state.args = new_args;

        if let Some(mut cur) = new_cur {
            let mut prev =
                EngineTiles::create(ctrl, &state.lay, global_mat, &borders, &state.args);

            let order = sort_comm_slots(&cur, &state.args);
            cur.pattern = Some(Pattern::build(
                &cur,
                &state.args,
                &state.lay,
                &order,
                config.dev_aware,
            ));
            prev.pattern = Some(Pattern::build(
                &prev,
                &state.args,
                &state.lay,
                &order,
                config.dev_aware,
            ));

            let threads = ThreadSpaces::build(&cur);
            let coords = GlobalCoords::build(&cur, global_mat.shape(), borders);

            // Refresh every halo on host buffers, then upload the matrix.
            cur.pattern
                .as_ref()
                .expect("pattern built above")
                .run_on(comm, crate::primitives::tile::Side::Host)?;
            ctrl.move_to(&cur.mat);
            ctrl.wait_tile(&cur.mat);

            state.tiles = Some(TilePair {
                cur,
                prev,
                coords,
                threads,
            });
        }
        Ok(())
    }
}
