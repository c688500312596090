use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::cell::Cell;
use super::shape::Shape;

static NEXT_TILE_ID: AtomicU64 = AtomicU64::new(1);

/// Which buffer of a root a bulk operation touches.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Side {
    Host,
    Device,
}

/// Root storage of an allocation: the host canvas and its device mirror,
/// both addressed in the array coordinates of `shape`. Selections alias this
/// storage through the `Arc`, so a child tile can never outlive its root.
struct TileRoot<C> {
    shape: Shape,
    host: RwLock<Vec<C>>,
    dev: RwLock<Vec<C>>,
}

/// A view of (optionally allocated) cell storage described by a shape.
///
/// - A *domain* tile carries no storage; it only describes an index space
///   (the global matrix starts out like this).
/// - `alloc` turns a tile into its own root allocation.
/// - `select` carves a zero-copy sub-view sharing the root's storage.
///
/// Indices are always array coordinates of the root's allocated shape, so a
/// selection's cells can be addressed without translation.
#[derive(Clone)]
pub struct Tile<C: Cell> {
    id: u64,
    shape: Shape,
    root: Option<Arc<TileRoot<C>>>,
}

impl<C: Cell> Tile<C> {
    /// A tile with no underlying data, describing an index space only.
    pub fn domain(shape: Shape) -> Self {
        Self {
            id: NEXT_TILE_ID.fetch_add(1, Ordering::Relaxed),
            shape,
            root: None,
        }
    }

    /// Allocate fresh root storage spanning this tile's shape. Host and
    /// device buffers are zero-filled.
    pub fn alloc(&self) -> Tile<C> {
        let cells = self.shape.size();
        Tile {
            id: NEXT_TILE_ID.fetch_add(1, Ordering::Relaxed),
            shape: self.shape.clone(),
            root: Some(Arc::new(TileRoot {
                shape: self.shape.clone(),
                host: RwLock::new(vec![C::ZERO; cells]),
                dev: RwLock::new(vec![C::ZERO; cells]),
            })),
        }
    }

    /// Zero-copy sub-view. `shape` must be a valid selection of this tile.
    pub fn select(&self, shape: Shape) -> Tile<C> {
        assert!(
            self.shape.contains_shape(&shape),
            "selection {} escapes parent {}",
            shape,
            self.shape
        );
        Tile {
            id: NEXT_TILE_ID.fetch_add(1, Ordering::Relaxed),
            shape,
            root: self.root.clone(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn dims(&self) -> usize {
        self.shape.dims()
    }

    pub fn card(&self, axis: usize) -> usize {
        self.shape.card(axis)
    }

    pub fn size(&self) -> usize {
        self.shape.size()
    }

    pub fn is_allocated(&self) -> bool {
        self.root.is_some()
    }

    pub fn same_root(&self, other: &Tile<C>) -> bool {
        match (&self.root, &other.root) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    fn root(&self) -> &TileRoot<C> {
        self.root
            .as_deref()
            .expect("tile has no storage; allocate it first")
    }

    /// Read view over this tile's selection.
    pub fn view(&self, side: Side) -> TileView<'_, C> {
        let root = self.root();
        TileView {
            sel: &self.shape,
            root_shape: &root.shape,
            data: match side {
                Side::Host => root.host.read(),
                Side::Device => root.dev.read(),
            },
        }
    }

    /// Write view over this tile's selection.
    pub fn view_mut(&self, side: Side) -> TileViewMut<'_, C> {
        let root = self.root();
        TileViewMut {
            sel: &self.shape,
            root_shape: &root.shape,
            data: match side {
                Side::Host => root.host.write(),
                Side::Device => root.dev.write(),
            },
        }
    }

    /// Extract a rectangular region into a contiguous row-major run
    /// (axis 0 slowest). Used for the wire format of halo exchanges and
    /// redistribution transfers.
    pub fn read_region(&self, region: &Shape, side: Side) -> Vec<C> {
        let view = self.view(side);
        let mut out = Vec::with_capacity(region.size());
        for p in region.points() {
            out.push(view.get(&p));
        }
        out
    }

    /// Scatter a contiguous row-major run back into a rectangular region.
    pub fn write_region(&self, region: &Shape, side: Side, cells: &[C]) {
        assert_eq!(region.size(), cells.len(), "region/payload size mismatch");
        let mut view = self.view_mut(side);
        for (p, &v) in region.points().zip(cells) {
            view.set(&p, v);
        }
    }

    /// Copy this tile's selection between its host and device buffers.
    pub fn transfer(&self, to: Side) {
        let root = self.root();
        let (src, mut dst) = match to {
            Side::Device => (root.host.read(), root.dev.write()),
            Side::Host => (root.dev.read(), root.host.write()),
        };
        if self.shape == root.shape {
            dst.copy_from_slice(&src);
            return;
        }
        for p in self.shape.points() {
            let off = root.shape.offset_of(&p);
            dst[off] = src[off];
        }
    }
}

impl<C: Cell> std::fmt::Debug for Tile<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tile")
            .field("id", &self.id)
            .field("shape", &self.shape)
            .field("allocated", &self.is_allocated())
            .finish()
    }
}

/// Read access to a tile's root buffer. Indexing is by absolute array
/// coordinates and may reach outside the selection but inside the root,
/// which is what border kernels rely on to read their neighborhood.
pub struct TileView<'a, C: Cell> {
    sel: &'a Shape,
    root_shape: &'a Shape,
    data: RwLockReadGuard<'a, Vec<C>>,
}

impl<'a, C: Cell> TileView<'a, C> {
    pub fn shape(&self) -> &Shape {
        self.sel
    }

    pub fn get(&self, p: &[isize]) -> C {
        self.data[self.root_shape.offset_of(p)]
    }
}

/// Write access to a tile's root buffer, same addressing rules as
/// [`TileView`].
pub struct TileViewMut<'a, C: Cell> {
    sel: &'a Shape,
    root_shape: &'a Shape,
    data: RwLockWriteGuard<'a, Vec<C>>,
}

impl<'a, C: Cell> TileViewMut<'a, C> {
    pub fn shape(&self) -> &Shape {
        self.sel
    }

    pub fn get(&self, p: &[isize]) -> C {
        self.data[self.root_shape.offset_of(p)]
    }

    pub fn set(&mut self, p: &[isize], v: C) {
        let off = self.root_shape.offset_of(p);
        self.data[off] = v;
    }
}
