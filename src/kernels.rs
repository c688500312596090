use std::sync::Arc;

use num_traits::Float;
use smallvec::SmallVec;

use crate::error::Result;
use crate::primitives::cell::Cell;
use crate::primitives::shape::{Shape, MAX_DIMS};
use crate::primitives::tile::{TileView, TileViewMut};
use crate::stencil::{Borders, Stencil};
use crate::tiles::EngineCoords;

/// Arguments handed to a stencil update functor. `out` iterates the launch
/// selection; `inp` may be read outside that selection (the neighborhood
/// reaches into the halo of the root allocation).
pub struct KernelCtx<'a, C: Cell, X> {
    pub out: TileViewMut<'a, C>,
    pub inp: TileView<'a, C>,
    pub coords: &'a EngineCoords,
    pub stencil: &'a Stencil,
    pub factor: f32,
    pub ext: &'a X,
}

/// Arguments handed to an init functor (host or device side).
pub struct InitCtx<'a, C: Cell, X> {
    pub mat: TileViewMut<'a, C>,
    pub coords: &'a EngineCoords,
    pub ext: &'a X,
}

/// A stencil update kernel. Kernels cannot fail; a functor producing NaN
/// propagates it unchanged.
pub type UpdateFn<C, X> = Arc<dyn for<'a> Fn(KernelCtx<'a, C, X>) + Send + Sync>;

/// In-device initialization of the freshly allocated local tile.
pub type DevInitFn<C, X> = Arc<dyn for<'a> Fn(InitCtx<'a, C, X>) + Send + Sync>;

/// Host-side initialization; may fail (it is user I/O territory).
pub type HostInitFn<C, X> =
    Arc<dyn for<'a> Fn(InitCtx<'a, C, X>) -> Result<()> + Send + Sync>;

/// Result consumer; receives the host view of the `io` selection.
pub type OutputFn<C, X> =
    Arc<dyn for<'a> Fn(TileView<'a, C>, &'a X) -> Result<()> + Send + Sync>;

/// The generic cell update for fully described stencils: the weighted sum of
/// the neighborhood divided by `factor`, skipping zero weights. Defined for
/// float cell types only; compound cells need a custom kernel.
pub fn update_cell_default<C, X>() -> UpdateFn<C, X>
where
    C: Cell + Float,
    X: 'static,
{
    fn run<C: Cell + Float, X>(mut k: KernelCtx<'_, C, X>) {
        let points: Vec<_> = k.out.shape().points().collect();
        for p in points {
            let mut sum = C::zero();
            for (off, w) in k.stencil.iter_nonzero() {
                let q: SmallVec<[isize; MAX_DIMS]> =
                    p.iter().zip(off.iter()).map(|(&a, &b)| a + b).collect();
                sum = sum + k.inp.get(&q) * C::from(w).unwrap();
            }
            k.out.set(&p, sum / C::from(k.factor).unwrap());
        }
    }
    Arc::new(run::<C, X>)
}

/// Which implementation a launch should route to, keyed on axis-overflow
/// predicates: a tile thinner than the stencil radius along an axis takes
/// that axis's border variant.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Kernel {
    Inner,
    Border(usize),
}

pub fn classify(shape: &Shape, borders: &Borders) -> Kernel {
    for axis in (0..shape.dims()).rev() {
        let card = shape.card(axis);
        if card <= borders.low[axis] || card <= borders.high[axis] {
            return Kernel::Border(axis);
        }
    }
    Kernel::Inner
}

/// An update kernel with optional per-axis border specializations. Plain
/// single-kernel stencils use `single`; the selection function dispatches
/// per launch target.
pub struct KernelSet<C: Cell, X> {
    pub default: UpdateFn<C, X>,
    pub border: [Option<UpdateFn<C, X>>; MAX_DIMS],
}

impl<C: Cell, X> Clone for KernelSet<C, X> {
    fn clone(&self) -> Self {
        KernelSet {
            default: self.default.clone(),
            border: self.border.clone(),
        }
    }
}

impl<C: Cell, X> KernelSet<C, X> {
    pub fn single(default: UpdateFn<C, X>) -> Self {
        KernelSet {
            default,
            border: Default::default(),
        }
    }

    pub fn with_border(mut self, axis: usize, f: UpdateFn<C, X>) -> Self {
        self.border[axis] = Some(f);
        self
    }

    pub fn for_tile(&self, shape: &Shape, borders: &Borders) -> &UpdateFn<C, X> {
        match classify(shape, borders) {
            Kernel::Inner => &self.default,
            Kernel::Border(axis) => self.border[axis].as_ref().unwrap_or(&self.default),
        }
    }
}
