use smallvec::SmallVec;

use super::EngineTiles;
use crate::primitives::cell::Cell;
use crate::primitives::shape::{Shape, MAX_DIMS};
use crate::runtime::DeviceKind;

/// A kernel launch extent, one entry per thread-space axis.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ThreadSpace {
    pub extents: SmallVec<[usize; MAX_DIMS]>,
}

impl ThreadSpace {
    pub fn from_shape(shape: &Shape) -> ThreadSpace {
        ThreadSpace {
            extents: shape.cards(),
        }
    }

    /// One flat dimension covering `n` threads.
    pub fn flat(n: usize) -> ThreadSpace {
        ThreadSpace {
            extents: SmallVec::from_slice(&[n]),
        }
    }

    /// The one-thread space used for marker kernels.
    pub fn touch() -> ThreadSpace {
        ThreadSpace {
            extents: SmallVec::from_slice(&[1]),
        }
    }

    pub fn total(&self) -> usize {
        self.extents.iter().product()
    }
}

/// Thread spaces for every kernel the engine launches on one tile family.
#[derive(Clone, Debug, Default)]
pub struct ThreadSpaces {
    pub mat: ThreadSpace,
    pub inner: Option<ThreadSpace>,
    pub flat: ThreadSpace,
    pub touch: ThreadSpace,
    pub border_out_dev: [[Option<ThreadSpace>; 2]; MAX_DIMS],
}

impl ThreadSpaces {
    pub fn build<C: Cell>(tiles: &EngineTiles<C>) -> ThreadSpaces {
        let mut spaces = ThreadSpaces {
            mat: ThreadSpace::from_shape(tiles.mat.shape()),
            inner: tiles
                .inner
                .as_ref()
                .map(|t| ThreadSpace::from_shape(t.shape())),
            flat: ThreadSpace::flat(tiles.mat.size()),
            touch: ThreadSpace::touch(),
            ..Default::default()
        };
        for axis in 0..tiles.dims() {
            for side in 0..2 {
                spaces.border_out_dev[axis][side] = tiles.border_out_dev[axis][side]
                    .as_ref()
                    .map(|t| ThreadSpace::from_shape(t.shape()));
            }
        }
        spaces
    }
}

/// Kernel block characterizations per device kind and dimensionality.
/// Above three dimensions the 3-D blocks are reused.
#[derive(Clone, Debug, Default)]
pub struct BlockSizes {
    pub mat: ThreadSpace,
    pub inner: ThreadSpace,
    pub flat: ThreadSpace,
    pub touch: ThreadSpace,
    pub border_out_dev: [[ThreadSpace; 2]; MAX_DIMS],
}

impl BlockSizes {
    pub fn for_device(dims: usize, kind: DeviceKind) -> BlockSizes {
        let d = dims.min(3);
        let inner: &[usize] = match (kind, d) {
            (DeviceKind::Cpu, 1) => &[1024],
            (DeviceKind::Cpu, 2) => &[4, 1024],
            (DeviceKind::Cpu, _) => &[2, 2, 1024],
            (DeviceKind::Gpu, 1) => &[256],
            (DeviceKind::Gpu, 2) => &[4, 64],
            (DeviceKind::Gpu, _) => &[1, 4, 64],
        };
        let border: &[&[usize]] = match (kind, d) {
            (DeviceKind::Cpu, 1) => &[&[1024]],
            (DeviceKind::Cpu, 2) => &[&[1, 1024], &[1024, 1]],
            (DeviceKind::Cpu, _) => &[&[1, 1, 1024], &[1, 1, 1024], &[1, 1024, 1]],
            (DeviceKind::Gpu, 1) => &[&[256]],
            (DeviceKind::Gpu, 2) => &[&[1, 256], &[256, 1]],
            (DeviceKind::Gpu, _) => &[&[1, 4, 64], &[4, 1, 64], &[4, 64, 1]],
        };

        let mut sizes = BlockSizes {
            inner: ThreadSpace {
                extents: SmallVec::from_slice(inner),
            },
            flat: ThreadSpace::flat(256),
            touch: ThreadSpace::touch(),
            ..Default::default()
        };
        sizes.mat = sizes.inner.clone();
        for axis in 0..dims {
            let b = ThreadSpace {
                extents: SmallVec::from_slice(border[axis.min(d - 1)]),
            };
            sizes.border_out_dev[axis] = [b.clone(), b];
        }
        sizes
    }
}
