use ndarray::{ArrayD, IxDyn};
use smallvec::SmallVec;

use crate::error::{EpsilodError, Result};
use crate::primitives::shape::{Shape, MAX_DIMS};

/// Halo thicknesses per axis: `low[i]`/`high[i]` cells below/above the owned
/// region. Derived from the stencil's nonzero weight footprint.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Borders {
    pub low: [usize; MAX_DIMS],
    pub high: [usize; MAX_DIMS],
}

/// Neighbor displacement on the process grid, one entry in `{-1, 0, +1}`
/// per domain axis.
pub type Shift = SmallVec<[i32; MAX_DIMS]>;

/// Number of (direction, axis) neighbor slots for a D-dimensional grid,
/// counting the all-zeros centre slot that denotes the local inner region.
pub fn num_slots(dims: usize) -> usize {
    3usize.pow(dims as u32)
}

/// Flat slot number of a displacement vector: base-3 digits `d[i] + 1`,
/// axis 0 most significant.
pub fn slot_of_shift(shift: &[i32]) -> usize {
    let mut slot = 0;
    for &d in shift {
        debug_assert!((-1..=1).contains(&d));
        slot = slot * 3 + (d + 1) as usize;
    }
    slot
}

/// Displacement vector of a flat slot number.
pub fn shift_of_slot(slot: usize, dims: usize) -> Shift {
    let mut shift = Shift::from_elem(0, dims);
    let mut digits = slot;
    for axis in (0..dims).rev() {
        shift[axis] = (digits % 3) as i32 - 1;
        digits /= 3;
    }
    shift
}

/// Slot number for a single-axis displacement: the centre slot moved by
/// `displ` in that axis's base-3 digit.
pub fn slot_on_axis(dims: usize, axis: usize, displ: i32) -> usize {
    let mid = num_slots(dims) / 2;
    let acum = 3usize.pow((dims - 1 - axis) as u32);
    (mid as isize + displ as isize * acum as isize) as usize
}

/// The slot reached by negating a slot's displacement.
pub fn opposite_slot(slot: usize, dims: usize) -> usize {
    let shift = shift_of_slot(slot, dims);
    let negated: Shift = shift.iter().map(|&d| -d).collect();
    slot_of_shift(&negated)
}

/// A stencil: a small dense weight array over origin-relative coordinates,
/// plus the halo thicknesses derived from its nonzero footprint. A zero
/// weight at a position means "not a real neighbor"; it contributes neither
/// to the borders nor to active-slot detection.
#[derive(Clone, Debug)]
pub struct Stencil {
    weights: ArrayD<f32>,
    shape: Shape,
    borders: Borders,
}

impl Stencil {
    /// Build a stencil from its coordinate shape (which must straddle the
    /// origin on every axis) and row-major weights.
    pub fn new(shape: Shape, data: Vec<f32>) -> Result<Stencil> {
        let dims = shape.dims();
        if dims == 0 || dims > MAX_DIMS {
            return Err(EpsilodError::Config(format!(
                "stencil with invalid number of dimensions {dims}; only up to {MAX_DIMS}D is supported"
            )));
        }
        for axis in 0..dims {
            let sig = shape.sig(axis);
            if sig.begin > 0 || sig.end <= 0 || sig.stride != 1 {
                return Err(EpsilodError::Config(format!(
                    "stencil shape must straddle the origin densely on axis {axis}, got {shape}"
                )));
            }
        }
        if data.len() != shape.size() {
            return Err(EpsilodError::Config(format!(
                "stencil data holds {} weights but the shape selects {} cells",
                data.len(),
                shape.size()
            )));
        }
        let cards: Vec<usize> = shape.cards().into_iter().collect();
        let weights = ArrayD::from_shape_vec(IxDyn(&cards), data)
            .map_err(|e| EpsilodError::Config(format!("stencil weights: {e}")))?;

        let mut borders = Borders::default();
        for (p, _) in iter_nonzero(&weights, &shape) {
            for axis in 0..dims {
                if p[axis] < 0 {
                    borders.low[axis] = borders.low[axis].max((-p[axis]) as usize);
                } else {
                    borders.high[axis] = borders.high[axis].max(p[axis] as usize);
                }
            }
        }
        Ok(Stencil {
            weights,
            shape,
            borders,
        })
    }

    pub fn dims(&self) -> usize {
        self.shape.dims()
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn borders(&self) -> Borders {
        self.borders
    }

    pub fn weight_at(&self, offset: &[isize]) -> f32 {
        let idx: Vec<usize> = offset
            .iter()
            .enumerate()
            .map(|(axis, &o)| (o - self.shape.sig(axis).begin) as usize)
            .collect();
        self.weights[IxDyn(&idx)]
    }

    /// Offsets carrying a nonzero weight, in row-major order.
    pub fn iter_nonzero(&self) -> impl Iterator<Item = (SmallVec<[isize; MAX_DIMS]>, f32)> + '_ {
        iter_nonzero(&self.weights, &self.shape)
    }

    /// Which neighbor slots this stencil reaches: every nonzero weight is
    /// classified per axis into low/centre/high by the sign of its offset,
    /// and its slot is raised. The centre slot is forced off afterwards (it
    /// is the no-op neighbor sentinel).
    pub fn active_slots(&self) -> Vec<bool> {
        let dims = self.dims();
        let mut active = vec![false; num_slots(dims)];
        for (p, _) in self.iter_nonzero() {
            let shift: Shift = p.iter().map(|&o| o.signum() as i32).collect();
            active[slot_of_shift(&shift)] = true;
        }
        active[num_slots(dims) / 2] = false;
        active
    }
}

fn iter_nonzero<'a>(
    weights: &'a ArrayD<f32>,
    shape: &'a Shape,
) -> impl Iterator<Item = (SmallVec<[isize; MAX_DIMS]>, f32)> + 'a {
    shape.points().filter_map(move |p| {
        let idx: Vec<usize> = p
            .iter()
            .enumerate()
            .map(|(axis, &o)| (o - shape.sig(axis).begin) as usize)
            .collect();
        let w = weights[IxDyn(&idx)];
        (w != 0.0).then(|| (p, w))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::sig::Sig;

    fn radius_shape(dims: usize, r: isize) -> Shape {
        Shape::from_sigs((0..dims).map(|_| Sig::new(-r, r + 1))).unwrap()
    }

    #[test]
    fn slot_numbering_roundtrip() {
        for dims in 1..=4 {
            for slot in 0..num_slots(dims) {
                let shift = shift_of_slot(slot, dims);
                assert_eq!(slot_of_shift(&shift), slot);
                assert_eq!(opposite_slot(opposite_slot(slot, dims), dims), slot);
            }
        }
        assert_eq!(slot_on_axis(2, 0, -1), 1);
        assert_eq!(slot_on_axis(2, 0, 1), 7);
        assert_eq!(slot_on_axis(2, 1, -1), 3);
        assert_eq!(slot_on_axis(2, 1, 1), 5);
    }

    #[test]
    fn five_point_active_slots() {
        // [0,1,0 / 1,0,1 / 0,1,0]: exactly the four face slots are active.
        let weights = vec![0., 1., 0., 1., 0., 1., 0., 1., 0.];
        let st = Stencil::new(radius_shape(2, 1), weights).unwrap();
        let active = st.active_slots();
        let expected: Vec<usize> = vec![
            slot_of_shift(&[-1, 0]),
            slot_of_shift(&[1, 0]),
            slot_of_shift(&[0, -1]),
            slot_of_shift(&[0, 1]),
        ];
        for slot in 0..num_slots(2) {
            assert_eq!(
                active[slot],
                expected.contains(&slot),
                "slot {slot} flag mismatch"
            );
        }
        assert_eq!(st.borders().low[0], 1);
        assert_eq!(st.borders().high[1], 1);
    }

    #[test]
    fn borders_follow_nonzero_footprint() {
        // Padded 1-D shape [-2, 3) whose support is only [-1, 1].
        let st = Stencil::new(
            Shape::from_sigs([Sig::new(-2, 3)]).unwrap(),
            vec![0., 1., 1., 1., 0.],
        )
        .unwrap();
        assert_eq!(st.borders().low[0], 1);
        assert_eq!(st.borders().high[0], 1);
    }

    #[test]
    fn rejects_originless_shape() {
        let bad = Shape::from_sigs([Sig::new(1, 3)]).unwrap();
        assert!(Stencil::new(bad, vec![1., 1.]).is_err());
    }
}
