use super::EngineTiles;
use crate::primitives::cell::Cell;
use crate::primitives::shape::{Shape, MAX_DIMS};
use crate::stencil::Borders;

/// The global geometry view a kernel receives: enough to reconstruct the
/// global position of any local thread index.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EngineCoords {
    pub dims: usize,
    /// Cardinality of the global matrix per axis.
    pub size: [usize; MAX_DIMS],
    /// Global begin coordinate of the tile's selection per axis.
    pub offset: [isize; MAX_DIMS],
    pub borders: Borders,
}

impl EngineCoords {
    pub fn build(tile_shape: &Shape, global: &Shape, borders: Borders) -> EngineCoords {
        let dims = global.dims();
        let mut coords = EngineCoords {
            dims,
            borders,
            ..Default::default()
        };
        for axis in 0..dims {
            coords.size[axis] = global.card(axis);
            coords.offset[axis] = tile_shape.sig(axis).begin;
        }
        coords
    }
}

/// Coordinate data for every tile a kernel can be launched on.
#[derive(Clone, Copy, Debug, Default)]
pub struct GlobalCoords {
    pub mat: EngineCoords,
    pub inner: Option<EngineCoords>,
    pub border_out_dev: [[Option<EngineCoords>; 2]; MAX_DIMS],
}

impl GlobalCoords {
    pub fn build<C: Cell>(
        tiles: &EngineTiles<C>,
        global: &Shape,
        borders: Borders,
    ) -> GlobalCoords {
        let mut coords = GlobalCoords {
            mat: EngineCoords::build(tiles.mat.shape(), global, borders),
            ..Default::default()
        };
        coords.inner = tiles
            .inner
            .as_ref()
            .map(|t| EngineCoords::build(t.shape(), global, borders));
        for axis in 0..tiles.dims() {
            for side in 0..2 {
                coords.border_out_dev[axis][side] = tiles.border_out_dev[axis][side]
                    .as_ref()
                    .map(|t| EngineCoords::build(t.shape(), global, borders));
            }
        }
        coords
    }
}
