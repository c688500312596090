pub mod comm_args;
pub mod coords;
pub mod threads;

use crate::comm::pattern::Pattern;
use crate::partition::Layout;
use crate::primitives::cell::Cell;
use crate::primitives::shape::{Shape, Transform, MAX_DIMS};
use crate::primitives::sig::Sig;
use crate::primitives::tile::Tile;
use crate::runtime::Controller;
use crate::stencil::{num_slots, slot_on_axis, Borders};

pub use comm_args::CommArgs;
pub use coords::{EngineCoords, GlobalCoords};
pub use threads::{BlockSizes, ThreadSpace, ThreadSpaces};

/// The per-rank tile family of one buffer of the double-buffer pair.
///
/// - `mat`: the owned region expanded by the border thickness on every axis;
///   the only allocation, everything else selects into it.
/// - `inner`: `mat` with all outbound borders carved off; the region whose
///   update depends on no inbound halo.
/// - `io`: `mat` minus inbound halos, except where a face lies on the global
///   matrix edge (output must include true boundary cells).
/// - `border_in[3^D]`: inbound halo selections per neighbor slot.
/// - `border_out[3^D]`: outbound border selections, symmetric to the halos.
/// - `border_out_dev[D][2]`: the minimum set of non-overlapping slabs
///   covering the outbound region, used to launch border kernels
///   independently of the inner kernel.
///
/// Absent members are `None` and every compute/transfer site skips them.
#[derive(Debug)]
pub struct EngineTiles<C: Cell> {
    pub mat: Tile<C>,
    pub inner: Option<Tile<C>>,
    pub io: Tile<C>,
    pub border_in: Vec<Option<Tile<C>>>,
    pub border_out: Vec<Option<Tile<C>>>,
    pub border_out_dev: [[Option<Tile<C>>; 2]; MAX_DIMS],
    pub pattern: Option<Pattern<C>>,
}

fn expand_shape(shape: &Shape, borders: &Borders) -> Shape {
    Shape::from_sigs(shape.sigs().iter().enumerate().map(|(i, s)| {
        Sig::new(
            s.begin - borders.low[i] as isize,
            s.end + borders.high[i] as isize,
        )
    }))
    .expect("expanding a non-empty shape cannot empty it")
}

/// The local allocation: the owned region grown by the halo thickness.
fn shape_mat(lay_shape: &Shape, borders: &Borders) -> Shape {
    expand_shape(lay_shape, borders)
}

/// Inbound halo for one neighbor slot: the facing band of the owned region,
/// translated outward by the border thickness so it lands in `mat`'s
/// expansion.
fn shape_border_in(lay_shape: &Shape, borders: &Borders, shift: &[i32]) -> Option<Shape> {
    let mut shape = Some(lay_shape.clone());
    for (axis, &d) in shift.iter().enumerate() {
        shape = match d {
            -1 => shape
                .and_then(|s| s.transform(axis, Transform::First(borders.low[axis])))
                .and_then(|s| s.transform(axis, Transform::Move(-(borders.low[axis] as isize)))),
            1 => shape
                .and_then(|s| s.transform(axis, Transform::Last(borders.high[axis])))
                .and_then(|s| s.transform(axis, Transform::Move(borders.high[axis] as isize))),
            _ => shape,
        };
    }
    shape
}

/// Outbound border for one neighbor slot: the band of owned cells whose
/// values feed that neighbor's halo. Same cardinality as the halo on the
/// other side, no translation.
fn shape_border_out(lay_shape: &Shape, borders: &Borders, shift: &[i32]) -> Option<Shape> {
    let mut shape = Some(lay_shape.clone());
    for (axis, &d) in shift.iter().enumerate() {
        shape = match d {
            -1 => shape.and_then(|s| s.transform(axis, Transform::Last(borders.low[axis]))),
            1 => shape.and_then(|s| s.transform(axis, Transform::First(borders.high[axis]))),
            _ => shape,
        };
    }
    shape
}

/// The inner region: the owned region minus every band that an active
/// out-neighbor will be sent. Band thicknesses match the out-dev slabs so
/// that `inner` and the slabs partition the owned region exactly.
fn shape_inner(lay_shape: &Shape, borders: &Borders, out_active: &[bool]) -> Option<Shape> {
    let dims = lay_shape.dims();
    let mut shape = Some(lay_shape.clone());
    for axis in 0..dims {
        if out_active[slot_on_axis(dims, axis, -1)] {
            shape = shape.and_then(|s| {
                s.transform(axis, Transform::End(-(borders.low[axis] as isize)))
            });
        }
        if out_active[slot_on_axis(dims, axis, 1)] {
            shape = shape.and_then(|s| {
                s.transform(axis, Transform::Begin(borders.high[axis] as isize))
            });
        }
    }
    shape
}

/// The device-side outbound slabs: per axis a low band `First(high)` and a
/// high band `Last(low)`, with overlap against every earlier axis's slabs
/// removed (lower axis wins). Inverted ranges collapse to `None`.
fn shapes_border_out_dev(
    lay_shape: &Shape,
    borders: &Borders,
    out_active: &[bool],
) -> [[Option<Shape>; 2]; MAX_DIMS] {
    let dims = lay_shape.dims();
    let mut slabs: [[Option<Shape>; 2]; MAX_DIMS] = Default::default();
    for axis in 0..dims {
        let low_active = out_active[slot_on_axis(dims, axis, 1)];
        let high_active = out_active[slot_on_axis(dims, axis, -1)];
        let trim_earlier = |mut s: Option<Shape>, slabs: &[[Option<Shape>; 2]; MAX_DIMS]| {
            for k in 0..axis {
                if slabs[k][0].is_some() {
                    s = s.and_then(|s| s.transform(k, Transform::Begin(borders.high[k] as isize)));
                }
                if slabs[k][1].is_some() {
                    s = s.and_then(|s| s.transform(k, Transform::End(-(borders.low[k] as isize))));
                }
            }
            s
        };
        slabs[axis][0] = if low_active {
            trim_earlier(
                lay_shape.transform(axis, Transform::First(borders.high[axis])),
                &slabs,
            )
        } else {
            None
        };
        slabs[axis][1] = if high_active {
            trim_earlier(
                lay_shape.transform(axis, Transform::Last(borders.low[axis])),
                &slabs,
            )
        } else {
            None
        };
    }
    slabs
}

/// The output selection: `mat` with inbound halos carved off on every axis,
/// except where the face coincides with the global matrix boundary.
fn shape_io(mat_shape: &Shape, global: &Shape, borders: &Borders) -> Shape {
    let mut shape = mat_shape.clone();
    for axis in 0..mat_shape.dims() {
        if mat_shape.sig(axis).begin != global.sig(axis).begin {
            shape = shape
                .transform(axis, Transform::Begin(borders.low[axis] as isize))
                .expect("io trim keeps the owned region");
        }
        if mat_shape.sig(axis).end != global.sig(axis).end {
            shape = shape
                .transform(axis, Transform::End(-(borders.high[axis] as isize)))
                .expect("io trim keeps the owned region");
        }
    }
    shape
}

impl<C: Cell> EngineTiles<C> {
    /// Derive and allocate this rank's tile family from the layout, the
    /// stencil footprint and the neighbor-activity flags. The rank must be
    /// active in `lay`.
    pub fn create(
        ctrl: &Controller<C>,
        lay: &Layout,
        global_mat: &Tile<C>,
        borders: &Borders,
        args: &CommArgs,
    ) -> EngineTiles<C> {
        let lay_shape = lay.my_shape().expect("tiles are only built on active ranks");
        let dims = lay_shape.dims();

        let mat = ctrl.alloc(&global_mat.select(shape_mat(lay_shape, borders)));

        let inner = shape_inner(lay_shape, borders, &args.border_out_active)
            .map(|s| mat.select(s));
        let io = mat.select(shape_io(mat.shape(), global_mat.shape(), borders));

        let mut border_in = Vec::with_capacity(num_slots(dims));
        let mut border_out = Vec::with_capacity(num_slots(dims));
        for slot in 0..num_slots(dims) {
            let halo = args.border_in_active[slot]
                .then(|| args.shifts_in[slot].as_ref())
                .flatten()
                .and_then(|shift| shape_border_in(lay_shape, borders, shift))
                .map(|s| mat.select(s));
            border_in.push(halo);
            let out = args.border_out_active[slot]
                .then(|| args.shifts_in[slot].as_ref())
                .flatten()
                .and_then(|shift| shape_border_out(lay_shape, borders, shift))
                .map(|s| mat.select(s));
            border_out.push(out);
        }

        let mut border_out_dev: [[Option<Tile<C>>; 2]; MAX_DIMS] = Default::default();
        let slab_shapes = shapes_border_out_dev(lay_shape, borders, &args.border_out_active);
        for (axis, pair) in slab_shapes.into_iter().enumerate() {
            for (side, shape) in pair.into_iter().enumerate() {
                border_out_dev[axis][side] = shape.map(|s| mat.select(s));
            }
        }

        EngineTiles {
            mat,
            inner,
            io,
            border_in,
            border_out,
            border_out_dev,
            pattern: None,
        }
    }

    pub fn dims(&self) -> usize {
        self.mat.dims()
    }

    /// Diagnostic dump of every selection, gated by the debug-tiles toggle
    /// at the call site.
    pub fn dump(&self, rank: usize) {
        tracing::debug!(rank, mat = %self.mat.shape(), "tiles: mat");
        match &self.inner {
            Some(t) => tracing::debug!(rank, inner = %t.shape(), "tiles: inner"),
            None => tracing::debug!(rank, "tiles: inner none"),
        }
        tracing::debug!(rank, io = %self.io.shape(), "tiles: io");
        for axis in 0..self.dims() {
            for side in 0..2 {
                match &self.border_out_dev[axis][side] {
                    Some(t) => tracing::debug!(
                        rank, axis, side, shape = %t.shape(), "tiles: border_out_dev"
                    ),
                    None => tracing::debug!(rank, axis, side, "tiles: border_out_dev none"),
                }
            }
        }
        for (slot, (halo, out)) in self.border_in.iter().zip(&self.border_out).enumerate() {
            if let Some(t) = halo {
                tracing::debug!(rank, slot, shape = %t.shape(), "tiles: border_in");
            }
            if let Some(t) = out {
                tracing::debug!(rank, slot, shape = %t.shape(), "tiles: border_out");
            }
        }
    }
}
