use std::cell::{Cell as StdCell, RefCell};
use std::marker::PhantomData;
use std::time::Instant;

use fxhash::FxHashMap;

use super::device::DeviceKind;
use crate::error::Result;
use crate::kernels::{DevInitFn, InitCtx, KernelCtx, UpdateFn};
use crate::primitives::cell::Cell;
use crate::primitives::tile::{Side, Tile, TileViewMut};
use crate::stencil::Stencil;
use crate::tiles::{EngineCoords, ThreadSpace};

/// The per-rank device controller of the runtime façade.
///
/// The reference implementation executes every submission synchronously on
/// the calling thread, so `wait_tile` and `synchronize` return immediately;
/// what it does maintain faithfully is the per-tile timing of the last
/// operation, which drives the load balancer. Launch parameters (thread
/// space, block size, stream) are accepted and traced the way a device
/// backend would consume them.
pub struct Controller<C: Cell> {
    kind: DeviceKind,
    explicit_deps: StdCell<bool>,
    timings: RefCell<FxHashMap<u64, f64>>,
    _cells: PhantomData<C>,
}

impl<C: Cell> Controller<C> {
    pub fn new(kind: DeviceKind) -> Self {
        Self {
            kind,
            explicit_deps: StdCell::new(false),
            timings: RefCell::new(FxHashMap::default()),
            _cells: PhantomData,
        }
    }

    pub fn kind(&self) -> DeviceKind {
        self.kind
    }

    /// In explicit mode the engine is responsible for `wait_tile` between
    /// producers and consumers; the controller does no dependence tracking.
    pub fn set_explicit_dependences(&self, on: bool) {
        self.explicit_deps.set(on);
    }

    pub fn explicit_dependences(&self) -> bool {
        self.explicit_deps.get()
    }

    fn record(&self, tile_id: u64, t0: Instant) {
        self.timings
            .borrow_mut()
            .insert(tile_id, t0.elapsed().as_secs_f64());
    }

    /// Seconds the last operation on `tile` took.
    pub fn time_last_op(&self, tile: &Tile<C>) -> f64 {
        self.timings.borrow().get(&tile.id()).copied().unwrap_or(0.0)
    }

    pub fn alloc(&self, domain: &Tile<C>) -> Tile<C> {
        let t0 = Instant::now();
        let tile = domain.alloc();
        self.record(tile.id(), t0);
        tile
    }

    /// Async upload of the tile's selection, host to device.
    pub fn move_to(&self, tile: &Tile<C>) {
        let t0 = Instant::now();
        tile.transfer(Side::Device);
        self.record(tile.id(), t0);
    }

    /// Async download of the tile's selection, device to host.
    pub fn move_from(&self, tile: &Tile<C>) {
        let t0 = Instant::now();
        tile.transfer(Side::Host);
        self.record(tile.id(), t0);
    }

    /// Block until pending operations on `tile` complete. Submissions are
    /// synchronous here, so there is never anything left to wait for.
    pub fn wait_tile(&self, _tile: &Tile<C>) {}

    /// Drain all streams.
    pub fn synchronize(&self) {}

    /// Schedule a host callback against the tile's stream.
    pub fn host_task<F>(&self, tile: &Tile<C>, f: F) -> Result<()>
    where
        F: FnOnce(TileViewMut<'_, C>) -> Result<()>,
    {
        let t0 = Instant::now();
        let result = f(tile.view_mut(Side::Host));
        self.record(tile.id(), t0);
        result
    }

    /// Empty host task marking `tile` as produced.
    pub fn host_touch(&self, tile: &Tile<C>) {
        self.record(tile.id(), Instant::now());
    }

    /// Empty kernel marking a device tile as produced, to satisfy
    /// dependence tracking of selections.
    pub fn launch_touch(&self, threads: &ThreadSpace, block: &ThreadSpace, tile: &Tile<C>) {
        tracing::trace!(?threads, ?block, tile = tile.id(), "launch touch");
        self.record(tile.id(), Instant::now());
    }

    /// Launch a stencil update kernel: `out` and `inp` must live in
    /// different allocations (the double-buffer rule).
    #[allow(clippy::too_many_arguments)]
    pub fn launch_update<X>(
        &self,
        kernel: &UpdateFn<C, X>,
        threads: &ThreadSpace,
        block: &ThreadSpace,
        stream: usize,
        out: &Tile<C>,
        inp: &Tile<C>,
        coords: &EngineCoords,
        stencil: &Stencil,
        factor: f32,
        ext: &X,
    ) {
        assert!(
            !out.same_root(inp),
            "update kernel writes the buffer it reads"
        );
        tracing::trace!(?threads, ?block, stream, out = out.id(), "launch update");
        let t0 = Instant::now();
        kernel(KernelCtx {
            out: out.view_mut(Side::Device),
            inp: inp.view(Side::Device),
            coords,
            stencil,
            factor,
            ext,
        });
        self.record(out.id(), t0);
    }

    /// Launch an in-device init kernel over `mat`.
    pub fn launch_init<X>(
        &self,
        kernel: &DevInitFn<C, X>,
        threads: &ThreadSpace,
        block: &ThreadSpace,
        stream: usize,
        mat: &Tile<C>,
        coords: &EngineCoords,
        ext: &X,
    ) {
        tracing::trace!(?threads, ?block, stream, mat = mat.id(), "launch init");
        let t0 = Instant::now();
        kernel(InitCtx {
            mat: mat.view_mut(Side::Device),
            coords,
            ext,
        });
        self.record(mat.id(), t0);
    }

    /// Device-side copy of `src`'s selection into the same coordinates of
    /// `dst`'s allocation.
    pub fn launch_copy(
        &self,
        threads: &ThreadSpace,
        block: &ThreadSpace,
        stream: usize,
        src: &Tile<C>,
        dst: &Tile<C>,
    ) {
        assert!(!src.same_root(dst), "device copy within one allocation");
        tracing::trace!(?threads, ?block, stream, "launch copy");
        let t0 = Instant::now();
        {
            let src_view = src.view(Side::Device);
            let mut dst_view = dst.view_mut(Side::Device);
            for p in src.shape().points() {
                dst_view.set(&p, src_view.get(&p));
            }
        }
        self.record(dst.id(), t0);
    }
}
