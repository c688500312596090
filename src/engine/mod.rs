use crate::alb::{AlbOutcome, AlbSupervisor};
use crate::comm::do_comms;
use crate::comm::pattern::{sort_comm_slots, Pattern};
use crate::error::{EpsilodError, Result};
use crate::kernels::{DevInitFn, HostInitFn, InitCtx, KernelSet, OutputFn, UpdateFn};
use crate::partition::{build_layout, check_partition, Layout};
use crate::primitives::cell::Cell;
use crate::primitives::shape::{Shape, Transform};
use crate::primitives::tile::{Side, Tile};
use crate::runtime::{Controller, EngineContext};
use crate::stencil::Stencil;
use crate::tiles::{BlockSizes, CommArgs, EngineTiles, GlobalCoords, ThreadSpaces};
use crate::utils::clock::EngineClocks;

/// A stencil computation: the global domain, the stencil, the iteration
/// count and the user hooks. The update kernel is explicit; float cells can
/// use [`crate::kernels::update_cell_default`].
pub struct StencilProgram<C: Cell, X> {
    /// Global matrix cardinality per axis, in elements.
    pub sizes: Vec<usize>,
    pub stencil: Stencil,
    /// Divisor applied by the generic kernel to the neighborhood sum.
    pub factor: f32,
    pub iterations: usize,
    /// Host-side initialization of the local tile.
    pub init: Option<HostInitFn<C, X>>,
    /// In-device initialization of the local tile.
    pub dev_init: Option<DevInitFn<C, X>>,
    /// Special first-step initialization of the copy buffer (one stencil
    /// step with its own kernel, e.g. a wave half-step).
    pub init_copy: Option<UpdateFn<C, X>>,
    pub update: KernelSet<C, X>,
    /// Result consumer; receives the host view of the output selection.
    pub output: Option<OutputFn<C, X>>,
    /// Extra parameters passed through to every functor.
    pub ext: X,
}

/// Summary of one engine run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RunStats {
    pub rebalances: usize,
}

/// One buffer family of the double buffer, plus the launch geometry that
/// goes with its shapes (identical for both buffers of a pair).
#[derive(Debug)]
pub struct TilePair<C: Cell> {
    pub cur: EngineTiles<C>,
    pub prev: EngineTiles<C>,
    pub coords: GlobalCoords,
    pub threads: ThreadSpaces,
}

impl<C: Cell> TilePair<C> {
    pub fn swap(&mut self) {
        std::mem::swap(&mut self.cur, &mut self.prev);
    }
}

/// The mutable per-rank engine state the load balancer may replace
/// wholesale: the layout, the tile pair (absent on ranks without work) and
/// the neighbor bookkeeping.
pub struct EngineState<C: Cell> {
    pub lay: Layout,
    pub tiles: Option<TilePair<C>>,
    pub args: CommArgs,
}

fn info_once<C: Cell>(ctx: &EngineContext<C>, msg: &str) {
    if ctx.rank == 0 && !ctx.config.exp_mode {
        tracing::info!("{msg}");
    }
}

/// Launch the stencil kernels of one iteration: every live outbound slab
/// first (they feed the sends), a wait on all of them, then the inner
/// kernel, which depends on no inbound halo and overlaps the exchange.
#[allow(clippy::too_many_arguments)]
fn compute<C: Cell, X>(
    ctrl: &Controller<C>,
    set: &KernelSet<C, X>,
    cur: &EngineTiles<C>,
    prev: &EngineTiles<C>,
    threads: &ThreadSpaces,
    blocks: &BlockSizes,
    coords: &GlobalCoords,
    stencil: &Stencil,
    factor: f32,
    ext: &X,
) {
    let borders = stencil.borders();
    for axis in 0..cur.dims() {
        for side in 0..2 {
            if let (Some(out), Some(inp)) = (
                &cur.border_out_dev[axis][side],
                &prev.border_out_dev[axis][side],
            ) {
                let space = threads.border_out_dev[axis][side]
                    .as_ref()
                    .expect("live slab has a thread space");
                let c = coords.border_out_dev[axis][side].expect("live slab has coords");
                ctrl.launch_update(
                    set.for_tile(out.shape(), &borders),
                    space,
                    &blocks.border_out_dev[axis][side],
                    2 * axis + side,
                    out,
                    inp,
                    &c,
                    stencil,
                    factor,
                    ext,
                );
            }
        }
    }
    for pair in &cur.border_out_dev {
        for slab in pair.iter().flatten() {
            ctrl.wait_tile(slab);
        }
    }
    if let (Some(out), Some(inp)) = (&cur.inner, &prev.inner) {
        let space = threads.inner.as_ref().expect("inner tile has a thread space");
        let c = coords.inner.expect("inner tile has coords");
        ctrl.launch_update(
            set.for_tile(out.shape(), &borders),
            space,
            &blocks.inner,
            0,
            out,
            inp,
            &c,
            stencil,
            factor,
            ext,
        );
    }
}

/// Mark every selection of both buffers as produced, so explicit dependence
/// tracking never sees an uninitialized tile.
fn mark_tiles<C: Cell>(
    ctrl: &Controller<C>,
    threads: &ThreadSpaces,
    blocks: &BlockSizes,
    cur: &EngineTiles<C>,
    prev: &EngineTiles<C>,
    args: &CommArgs,
) {
    for axis in 0..cur.dims() {
        for side in 0..2 {
            if let Some(slab) = &cur.border_out_dev[axis][side] {
                ctrl.launch_touch(&threads.touch, &blocks.touch, slab);
            }
            if let Some(slab) = &prev.border_out_dev[axis][side] {
                ctrl.launch_touch(&threads.touch, &blocks.touch, slab);
            }
        }
    }
    if let Some(inner) = &cur.inner {
        ctrl.launch_touch(&threads.touch, &blocks.touch, inner);
    }
    if let Some(inner) = &prev.inner {
        ctrl.launch_touch(&threads.touch, &blocks.touch, inner);
    }
    for (slot, halo) in cur.border_in.iter().enumerate() {
        if !args.border_in_active[slot] {
            continue;
        }
        if let Some(halo) = halo {
            ctrl.launch_touch(&threads.touch, &blocks.touch, halo);
        }
    }
}

/// Perform a stencil computation on this rank. SPMD: every rank of the
/// world calls this with the same program; inactive ranks only join the
/// collective clock operations.
pub fn stencil_computation<C: Cell, X>(
    ctx: &EngineContext<C>,
    prog: &StencilProgram<C, X>,
) -> Result<RunStats> {
    let dims = prog.stencil.dims();
    if prog.sizes.len() != dims {
        return Err(EpsilodError::Config(format!(
            "{}-dimensional stencil over a {}-dimensional domain",
            dims,
            prog.sizes.len()
        )));
    }
    let borders = prog.stencil.borders();
    let global_shape = Shape::of_sizes(&prog.sizes).ok_or_else(|| {
        EpsilodError::Config("every domain axis needs a positive size".into())
    })?;

    // The distributed shape: the domain minus the fixed global border.
    let mut inner = Some(global_shape.clone());
    for axis in 0..dims {
        inner = inner
            .and_then(|s| s.transform(axis, Transform::Begin(borders.low[axis] as isize)))
            .and_then(|s| s.transform(axis, Transform::End(-(borders.high[axis] as isize))));
    }
    let inner = inner.ok_or_else(|| {
        EpsilodError::Config("domain has no interior once the stencil borders are removed".into())
    })?;

    let mut clocks = EngineClocks::new();
    clocks.ctrl.start();
    clocks.init.start();

    let ctrl = ctx.controller();
    ctrl.set_explicit_dependences(true);

    let global_mat: Tile<C> = Tile::domain(global_shape.clone());
    let all_ranks: Vec<usize> = (0..ctx.num_ranks()).collect();

    let weights = ctx.config_weights();
    let lay = build_layout(
        ctx.config.partition,
        ctx.num_ranks(),
        ctx.rank,
        &inner,
        &weights,
    )?;

    if !lay.active() {
        // Inactive processes: only the collective clock operations.
        tracing::warn!(rank = ctx.rank, "process not active");
        clocks.init.stop();
        clocks.ctrl.stop();
        clocks.reduce(&ctx.comm, &all_ranks)?;
        clocks.report(ctx.rank, ctx.config.exp_mode);
        return Ok(RunStats::default());
    }

    check_partition(&lay, &borders, &ctx.comm)?;

    let args = CommArgs::new(&prog.stencil, &lay);
    let mut cur = EngineTiles::create(&ctrl, &lay, &global_mat, &borders, &args);
    let mut prev = EngineTiles::create(&ctrl, &lay, &global_mat, &borders, &args);
    if ctx.config.debug_tiles {
        cur.dump(ctx.rank);
    }

    let order = sort_comm_slots(&cur, &args);
    cur.pattern = Some(Pattern::build(&cur, &args, &lay, &order, ctx.config.dev_aware));
    prev.pattern = Some(Pattern::build(&prev, &args, &lay, &order, ctx.config.dev_aware));

    let blocks = BlockSizes::for_device(dims, ctrl.kind());
    let threads = ThreadSpaces::build(&cur);
    let coords = GlobalCoords::build(&cur, &global_shape, borders);

    info_once(ctx, "Init stage...");

    if let Some(f) = &prog.init {
        info_once(ctx, "\tInitializing in the host...");
        ctrl.host_task(&cur.mat, |mat| {
            f(InitCtx {
                mat,
                coords: &coords.mat,
                ext: &prog.ext,
            })
        })?;
        ctrl.move_to(&cur.mat);
        ctrl.wait_tile(&cur.mat);
    }

    if let Some(f) = &prog.dev_init {
        info_once(ctx, "\tInitializing in the device...");
        ctrl.launch_init(f, &threads.mat, &blocks.mat, 0, &cur.mat, &coords.mat, &prog.ext);
    }

    let mut state = EngineState {
        lay,
        tiles: Some(TilePair {
            cur,
            prev,
            coords,
            threads,
        }),
        args,
    };

    {
        let pair = state.tiles.as_mut().expect("tiles built above");
        match &prog.init_copy {
            Some(f) => {
                // A special first step computes the copy buffer from the
                // initialized matrix, halos included.
                mark_tiles(&ctrl, &pair.threads, &blocks, &pair.cur, &pair.prev, &state.args);
                pair.swap();
                let set = KernelSet::single(f.clone());
                compute(
                    &ctrl,
                    &set,
                    &pair.cur,
                    &pair.prev,
                    &pair.threads,
                    &blocks,
                    &pair.coords,
                    &prog.stencil,
                    prog.factor,
                    &prog.ext,
                );
                do_comms(
                    &ctrl,
                    &ctx.comm,
                    &pair.cur,
                    &state.args,
                    ctx.config.dev_aware,
                    ctx.config.comm_method,
                    &mut clocks.comm,
                )?;
                pair.swap();
            }
            None if ctx.config.host_copy_init => {
                info_once(ctx, "\tInitializing copy in the host...");
                let cells = pair.cur.mat.read_region(pair.cur.mat.shape(), Side::Host);
                pair.prev
                    .mat
                    .write_region(pair.prev.mat.shape(), Side::Host, &cells);
                ctrl.move_to(&pair.prev.mat);
                ctrl.wait_tile(&pair.prev.mat);
                mark_tiles(&ctrl, &pair.threads, &blocks, &pair.cur, &pair.prev, &state.args);
            }
            None => {
                info_once(ctx, "\tInitializing copy in the device...");
                ctrl.launch_touch(&pair.threads.touch, &blocks.touch, &pair.cur.mat);
                ctrl.launch_copy(
                    &pair.threads.flat,
                    &blocks.flat,
                    0,
                    &pair.cur.mat,
                    &pair.prev.mat,
                );
                mark_tiles(&ctrl, &pair.threads, &blocks, &pair.cur, &pair.prev, &state.args);
            }
        }
    }

    clocks.init.stop();
    ctrl.synchronize();
    ctx.comm.barrier(&state.lay.active_ranks())?;

    info_once(ctx, "Computation stage...");
    clocks.main_loop.start();

    let mut alb = AlbSupervisor::new(&ctx.config, &state.lay);

    for iter in 0..prog.iterations.saturating_sub(1) {
        clocks.iter.start();

        let mut kernel_time = 0.0;
        if let Some(pair) = state.tiles.as_mut() {
            pair.swap();
            compute(
                &ctrl,
                &prog.update,
                &pair.cur,
                &pair.prev,
                &pair.threads,
                &blocks,
                &pair.coords,
                &prog.stencil,
                prog.factor,
                &prog.ext,
            );
            do_comms(
                &ctrl,
                &ctx.comm,
                &pair.cur,
                &state.args,
                ctx.config.dev_aware,
                ctx.config.comm_method,
                &mut clocks.comm,
            )?;
            if let Some(inner) = &pair.cur.inner {
                kernel_time = ctrl.time_last_op(inner);
            }
        }

        clocks.redistribute.start();
        let outcome = alb.step(
            &ctrl,
            &ctx.comm,
            &ctx.config,
            &prog.stencil,
            &global_mat,
            &mut state,
            kernel_time,
            iter + 2 == prog.iterations,
        )?;
        if outcome == AlbOutcome::Rebalanced {
            if let Some(pair) = state.tiles.as_ref() {
                // Re-seed the copy buffer on device and mark everything so
                // dependence tracking stays satisfied.
                ctrl.launch_copy(
                    &pair.threads.flat,
                    &blocks.flat,
                    0,
                    &pair.cur.mat,
                    &pair.prev.mat,
                );
                ctrl.wait_tile(&pair.cur.mat);
                mark_tiles(&ctrl, &pair.threads, &blocks, &pair.cur, &pair.prev, &state.args);
            }
        }
        clocks.redistribute.stop();
        clocks.iter.stop();
    }

    // Last iteration: no exchange is needed after the final update.
    if prog.iterations > 0 {
        if let Some(pair) = state.tiles.as_mut() {
            pair.swap();
            compute(
                &ctrl,
                &prog.update,
                &pair.cur,
                &pair.prev,
                &pair.threads,
                &blocks,
                &pair.coords,
                &prog.stencil,
                prog.factor,
                &prog.ext,
            );
            if let Some(inner) = &pair.cur.inner {
                ctrl.wait_tile(inner);
            }
        }
    }

    ctrl.synchronize();
    clocks.main_loop.stop();

    if let Some(pair) = state.tiles.as_ref() {
        ctrl.move_from(&pair.cur.mat);
        ctrl.wait_tile(&pair.cur.mat);
    }
    info_once(ctx, "Computation ended");

    clocks.ctrl.stop();
    clocks.reduce(&ctx.comm, &all_ranks)?;
    clocks.report(ctx.rank, ctx.config.exp_mode);

    if let Some(f) = &prog.output {
        if let Some(pair) = state.tiles.as_ref() {
            f(pair.cur.io.view(Side::Host), &prog.ext)?;
        }
        info_once(ctx, "Output finished");
    }

    info_once(ctx, "Epsilod End.");
    Ok(RunStats {
        rebalances: alb.rebalances,
    })
}
