use smallvec::SmallVec;

use super::topology::Topology;
use super::Weights;
use crate::error::{EpsilodError, Result};
use crate::primitives::shape::{Shape, Transform, MAX_DIMS};
use crate::stencil::Shift;

/// Assignment of an axis-aligned sub-domain of the global index space to
/// each rank of a process topology.
///
/// The layout knows every rank's block (needed for neighbor lookups and for
/// redistribution planning), which axes of the domain the topology spans,
/// and the original shape it was computed from (the load balancer
/// re-partitions that same shape).
#[derive(Clone, Debug)]
pub struct Layout {
    topo: Topology,
    /// Topology dimension `t` partitions domain axis `axes[t]`.
    axes: SmallVec<[usize; MAX_DIMS]>,
    orig: Shape,
    shapes: Vec<Option<Shape>>,
    my_rank: usize,
}

impl Layout {
    /// Equal-sized blocks along each partitioned axis; the last block of an
    /// axis absorbs the remainder.
    pub fn blocks(
        topo: Topology,
        inner: Shape,
        axes: Vec<usize>,
        my_rank: usize,
    ) -> Result<Layout> {
        assert_eq!(topo.dims(), axes.len());
        let mut shapes = Vec::with_capacity(topo.num_procs());
        for rank in 0..topo.num_procs() {
            let coords = topo.coords_of(rank);
            let mut shape = Some(inner.clone());
            for (t, &axis) in axes.iter().enumerate() {
                let n = topo.card(t);
                let total = inner.card(axis);
                let base = total / n;
                let offset = coords[t] * base;
                let len = if coords[t] == n - 1 {
                    total - base * (n - 1)
                } else {
                    base
                };
                shape = shape.and_then(|s| {
                    s.transform(axis, Transform::Begin(offset as isize))
                        .and_then(|s| s.transform(axis, Transform::First(len)))
                });
            }
            shapes.push(shape);
        }
        Ok(Layout {
            topo,
            axes: SmallVec::from_vec(axes),
            orig: inner,
            shapes,
            my_rank,
        })
    }

    /// Blocks along one axis, sized proportionally to `weights`: floor per
    /// rank, residual added to the last rank with nonzero weight. A rank
    /// with weight zero gets no rows and becomes inactive.
    pub fn weighted(
        topo: Topology,
        inner: Shape,
        axis: usize,
        weights: &Weights,
        my_rank: usize,
    ) -> Result<Layout> {
        let n = topo.num_procs();
        if weights.num_procs() != n {
            return Err(EpsilodError::Config(format!(
                "weighted partition over {n} ranks with {} weights",
                weights.num_procs()
            )));
        }
        let sum: f64 = weights.ratios.iter().map(|&w| w as f64).sum();
        if sum <= 0.0 || weights.ratios.iter().any(|&w| w < 0.0) {
            return Err(EpsilodError::Config(
                "partition weights must be non-negative with a positive sum".into(),
            ));
        }
        let total = inner.card(axis);
        let mut cards: Vec<usize> = weights
            .ratios
            .iter()
            .map(|&w| ((total as f64) * (w as f64) / sum).floor() as usize)
            .collect();
        let residual = total - cards.iter().sum::<usize>();
        if residual > 0 {
            let last_nonzero = weights
                .ratios
                .iter()
                .rposition(|&w| w > 0.0)
                .expect("positive weight sum implies a nonzero weight");
            cards[last_nonzero] += residual;
        }

        let mut shapes = Vec::with_capacity(n);
        let mut offset = 0usize;
        for &len in &cards {
            let shape = if len == 0 {
                None
            } else {
                inner
                    .transform(axis, Transform::Begin(offset as isize))
                    .and_then(|s| s.transform(axis, Transform::First(len)))
            };
            shapes.push(shape);
            offset += len;
        }
        Ok(Layout {
            topo,
            axes: SmallVec::from_slice(&[axis]),
            orig: inner,
            shapes,
            my_rank,
        })
    }

    pub fn my_rank(&self) -> usize {
        self.my_rank
    }

    pub fn num_ranks(&self) -> usize {
        self.topo.num_procs()
    }

    /// The shape this layout distributed, unchanged by partitioning.
    pub fn orig_shape(&self) -> &Shape {
        &self.orig
    }

    pub fn my_shape(&self) -> Option<&Shape> {
        self.shapes[self.my_rank].as_ref()
    }

    pub fn shape_of(&self, rank: usize) -> Option<&Shape> {
        self.shapes[rank].as_ref()
    }

    /// Whether this rank was assigned any work.
    pub fn active(&self) -> bool {
        self.shapes[self.my_rank].is_some()
    }

    pub fn rank_active(&self, rank: usize) -> bool {
        self.shapes[rank].is_some()
    }

    pub fn active_ranks(&self) -> Vec<usize> {
        (0..self.num_ranks())
            .filter(|&r| self.rank_active(r))
            .collect()
    }

    pub fn dims(&self) -> usize {
        self.orig.dims()
    }

    /// Rank of the neighbor at `shift` (one entry per domain axis).
    ///
    /// `None` when the displacement leaves the grid, moves along an axis the
    /// topology does not partition, or only reaches inactive ranks. Empty
    /// ranks are stepped over: the owner of the adjacent cells is the next
    /// rank with data in that direction.
    pub fn neighbor(&self, shift: &Shift) -> Option<usize> {
        debug_assert_eq!(shift.len(), self.dims());
        let mut steps: SmallVec<[(usize, i32); MAX_DIMS]> = SmallVec::new();
        for (axis, &d) in shift.iter().enumerate() {
            if d == 0 {
                continue;
            }
            let t = self.axes.iter().position(|&a| a == axis)?;
            steps.push((t, d));
        }
        if steps.is_empty() {
            return None;
        }
        let mut coords = self.topo.coords_of(self.my_rank);
        loop {
            for &(t, d) in &steps {
                let next = coords[t] as isize + d as isize;
                if next < 0 || next >= self.topo.card(t) as isize {
                    return None;
                }
                coords[t] = next as usize;
            }
            let rank = self.topo.rank_of(&coords);
            if self.rank_active(rank) {
                return Some(rank);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::sig::Sig;

    fn inner(len: usize) -> Shape {
        Shape::from_sigs([Sig::new(1, 1 + len as isize)]).unwrap()
    }

    #[test]
    fn weighted_rounding_exact() {
        let lay = Layout::weighted(
            Topology::plain(3),
            inner(10),
            0,
            &Weights {
                ratios: vec![1.0, 2.0, 7.0],
            },
            0,
        )
        .unwrap();
        let cards: Vec<usize> = (0..3)
            .map(|r| lay.shape_of(r).map(|s| s.card(0)).unwrap_or(0))
            .collect();
        assert_eq!(cards, vec![1, 2, 7]);
    }

    #[test]
    fn weighted_residual_goes_last() {
        let lay = Layout::weighted(
            Topology::plain(3),
            inner(10),
            0,
            &Weights::uniform(3),
            0,
        )
        .unwrap();
        let cards: Vec<usize> = (0..3)
            .map(|r| lay.shape_of(r).map(|s| s.card(0)).unwrap_or(0))
            .collect();
        assert_eq!(cards, vec![3, 3, 4]);
        // Blocks tile the axis in rank order.
        assert_eq!(lay.shape_of(0).unwrap().sig(0), &Sig::new(1, 4));
        assert_eq!(lay.shape_of(2).unwrap().sig(0), &Sig::new(7, 11));
    }

    #[test]
    fn zero_weight_rank_is_inactive_and_skipped() {
        let lay0 = Layout::weighted(
            Topology::plain(3),
            inner(8),
            0,
            &Weights {
                ratios: vec![1.0, 0.0, 1.0],
            },
            0,
        )
        .unwrap();
        assert!(!lay0.rank_active(1));
        assert_eq!(lay0.active_ranks(), vec![0, 2]);
        // Rank 0's high-side neighbor is rank 2, not the empty rank 1.
        assert_eq!(lay0.neighbor(&Shift::from_slice(&[1])), Some(2));
        assert_eq!(lay0.neighbor(&Shift::from_slice(&[-1])), None);
    }

    #[test]
    fn blocks_cover_domain_without_overlap() {
        let global = Shape::from_sigs([Sig::new(0, 7), Sig::new(0, 5)]).unwrap();
        let lay = Layout::blocks(Topology::grid(4, 2), global.clone(), vec![0, 1], 0).unwrap();
        let mut covered = 0;
        for r in 0..4 {
            covered += lay.shape_of(r).map(|s| s.size()).unwrap_or(0);
        }
        assert_eq!(covered, global.size());
    }

    #[test]
    fn single_dim_neighbor_lookup() {
        let lay = Layout::blocks(Topology::plain(2), inner(8), vec![0], 0).unwrap();
        assert_eq!(lay.neighbor(&Shift::from_slice(&[1])), Some(1));
        assert_eq!(lay.neighbor(&Shift::from_slice(&[-1])), None);
    }
}
