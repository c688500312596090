pub mod layout;
pub mod topology;

use crate::error::{EpsilodError, Result};
use crate::primitives::cell::Cell;
use crate::primitives::shape::Shape;
use crate::runtime::messaging::Communicator;
use crate::stencil::Borders;

pub use layout::Layout;
pub use topology::Topology;

/// Per-rank partition weights, as read from the device-selection
/// configuration or recomputed by the load balancer. Normalized at use.
#[derive(Clone, Debug, PartialEq)]
pub struct Weights {
    pub ratios: Vec<f32>,
}

impl Weights {
    pub fn uniform(num_procs: usize) -> Self {
        Self {
            ratios: vec![1.0; num_procs],
        }
    }

    pub fn num_procs(&self) -> usize {
        self.ratios.len()
    }
}

/// How the global domain is laid onto the process topology.
///
/// Parsed from `m[k] | s<d> | w<d> | n<d>`; the default when unconfigured is
/// `s0` (a plain process line along axis 0).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PartitionSpec {
    /// Grid topology over the first `k` axes (all axes when `None`).
    MultiDim(Option<usize>),
    /// Plain 1-D process line along the axis.
    SingleDim(usize),
    /// Grid over every axis except the given one.
    NotDim(usize),
    /// 1-D line along the axis, block sizes proportional to the weights.
    Weighted(usize),
}

impl Default for PartitionSpec {
    fn default() -> Self {
        PartitionSpec::SingleDim(0)
    }
}

impl PartitionSpec {
    /// Parse a partition string. Dimension bounds are checked later, when
    /// the domain dimensionality is known.
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.len() > 2 {
            return Err(EpsilodError::Config(format!(
                "partition string has more than two characters: {s:?}"
            )));
        }
        let mut chars = s.chars();
        let kind = chars
            .next()
            .ok_or_else(|| EpsilodError::Config("empty partition string".into()))?
            .to_ascii_lowercase();
        let arg = chars.as_str();
        let parse_dim = |what: &str| -> Result<usize> {
            arg.parse().map_err(|_| {
                EpsilodError::Config(format!("bad dimension in partition string {s:?} ({what})"))
            })
        };
        match kind {
            'm' => {
                if arg.is_empty() {
                    Ok(PartitionSpec::MultiDim(None))
                } else {
                    Ok(PartitionSpec::MultiDim(Some(parse_dim("multi-dim")?)))
                }
            }
            's' => Ok(PartitionSpec::SingleDim(parse_dim("single-dim")?)),
            'w' => Ok(PartitionSpec::Weighted(parse_dim("weighted")?)),
            'n' => Ok(PartitionSpec::NotDim(parse_dim("not-dim")?)),
            other => Err(EpsilodError::Config(format!(
                "unknown partition type {other:?} in {s:?}"
            ))),
        }
    }

    pub fn is_weighted(&self) -> bool {
        matches!(self, PartitionSpec::Weighted(_))
    }

    fn checked_axis(axis: usize, dims: usize, what: &str) -> Result<usize> {
        if axis >= dims {
            return Err(EpsilodError::Config(format!(
                "{what} partition axis {axis} out of range [0:{}]",
                dims - 1
            )));
        }
        Ok(axis)
    }
}

/// Lay the distributed (inner) shape onto a process topology according to
/// the partition spec. `weights` feeds the weighted partitioner; the other
/// types ignore it.
pub fn build_layout(
    spec: PartitionSpec,
    num_procs: usize,
    my_rank: usize,
    inner: &Shape,
    weights: &Weights,
) -> Result<Layout> {
    let dims = inner.dims();
    match spec {
        PartitionSpec::MultiDim(k) => {
            let k = match k {
                None => dims,
                Some(k) if k >= 1 && k <= dims => k,
                Some(k) => {
                    return Err(EpsilodError::Config(format!(
                        "multi-dim partition over {k} axes, domain has {dims}"
                    )))
                }
            };
            let topo = Topology::grid(num_procs, k);
            Layout::blocks(topo, inner.clone(), (0..k).collect(), my_rank)
        }
        PartitionSpec::SingleDim(axis) => {
            let axis = PartitionSpec::checked_axis(axis, dims, "single-dim")?;
            Layout::blocks(
                Topology::plain(num_procs),
                inner.clone(),
                vec![axis],
                my_rank,
            )
        }
        PartitionSpec::NotDim(axis) => {
            let axis = PartitionSpec::checked_axis(axis, dims, "not-dim")?;
            if dims == 1 {
                return Err(EpsilodError::Config(
                    "not-dim partition needs at least two domain axes".into(),
                ));
            }
            let axes: Vec<usize> = (0..dims).filter(|&a| a != axis).collect();
            let topo = Topology::grid(num_procs, axes.len());
            Layout::blocks(topo, inner.clone(), axes, my_rank)
        }
        PartitionSpec::Weighted(axis) => {
            let axis = PartitionSpec::checked_axis(axis, dims, "weighted")?;
            Layout::weighted(
                Topology::plain(num_procs),
                inner.clone(),
                axis,
                weights,
                my_rank,
            )
        }
    }
}

/// Post-partition validation: every active rank needs a block at least as
/// thick as the stencil radius on every axis, or a halo would reach past
/// the immediate neighbor. The check is an all-reduce max over the active
/// ranks so that every one of them observes the same failing axis.
pub fn check_partition<C: Cell>(
    lay: &Layout,
    borders: &Borders,
    comm: &Communicator<C>,
) -> Result<()> {
    let mut local: i64 = 0;
    if let Some(shape) = lay.my_shape() {
        for axis in 0..shape.dims() {
            let card = shape.card(axis);
            if card < borders.low[axis] || card < borders.high[axis] {
                local = axis as i64 + 1;
            }
        }
    }
    let global = comm.all_reduce_max_i64(&lay.active_ranks(), local)?;
    if global > 0 {
        return Err(EpsilodError::PartitionTooFine {
            axis: (global - 1) as usize,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_partition_strings() {
        assert_eq!(
            PartitionSpec::parse("m").unwrap(),
            PartitionSpec::MultiDim(None)
        );
        assert_eq!(
            PartitionSpec::parse("m2").unwrap(),
            PartitionSpec::MultiDim(Some(2))
        );
        assert_eq!(
            PartitionSpec::parse("S0").unwrap(),
            PartitionSpec::SingleDim(0)
        );
        assert_eq!(
            PartitionSpec::parse("w1").unwrap(),
            PartitionSpec::Weighted(1)
        );
        assert_eq!(PartitionSpec::parse("n2").unwrap(), PartitionSpec::NotDim(2));
        assert!(PartitionSpec::parse("x0").is_err());
        assert!(PartitionSpec::parse("s").is_err());
        assert!(PartitionSpec::parse("m10").is_err());
        assert!(PartitionSpec::parse("").is_err());
    }
}
