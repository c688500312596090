use itertools::Itertools;
use smallvec::SmallVec;

use super::sig::Sig;

/// Maximum number of domain dimensions the engine supports.
pub const MAX_DIMS: usize = 4;

/// A point in the index space of a shape.
pub type Point = SmallVec<[isize; MAX_DIMS]>;

/// Boundary edits applied to one axis of a shape.
///
/// `Begin`/`End` shift one boundary by a (possibly negative) delta,
/// `First`/`Last` keep only the leading/trailing `k` indices, `Move`
/// translates the whole axis.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transform {
    Begin(isize),
    End(isize),
    First(usize),
    Last(usize),
    Move(isize),
}

/// An ordered sequence of signatures, one per axis. Absence ("NULL shape")
/// is expressed as `Option<Shape>` by every operation that can collapse a
/// shape; a constructed `Shape` is always non-empty on every axis.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Shape {
    sigs: SmallVec<[Sig; MAX_DIMS]>,
}

impl Shape {
    /// Build a shape from per-axis signatures. `None` when any axis is empty.
    pub fn from_sigs(sigs: impl IntoIterator<Item = Sig>) -> Option<Shape> {
        let sigs: SmallVec<[Sig; MAX_DIMS]> = sigs.into_iter().collect();
        if sigs.is_empty() || sigs.iter().any(Sig::is_empty) {
            return None;
        }
        Some(Shape { sigs })
    }

    /// Dense shape spanning `[0, size_i)` on each axis.
    pub fn of_sizes(sizes: &[usize]) -> Option<Shape> {
        Shape::from_sigs(sizes.iter().map(|&s| Sig::new(0, s as isize)))
    }

    pub fn dims(&self) -> usize {
        self.sigs.len()
    }

    pub fn sig(&self, axis: usize) -> &Sig {
        &self.sigs[axis]
    }

    pub fn sigs(&self) -> &[Sig] {
        &self.sigs
    }

    pub fn card(&self, axis: usize) -> usize {
        self.sigs[axis].card()
    }

    pub fn cards(&self) -> SmallVec<[usize; MAX_DIMS]> {
        self.sigs.iter().map(Sig::card).collect()
    }

    /// Total number of selected cells.
    pub fn size(&self) -> usize {
        self.sigs.iter().map(Sig::card).product()
    }

    /// Apply a boundary edit to one axis. Collapses to `None` when the edit
    /// empties the axis; downstream code treats `None` as "absent" and skips
    /// it, never panicking on degenerate geometry.
    pub fn transform(&self, axis: usize, t: Transform) -> Option<Shape> {
        let mut sigs = self.sigs.clone();
        let sig = &mut sigs[axis];
        match t {
            Transform::Begin(delta) => sig.begin += delta,
            Transform::End(delta) => sig.end += delta,
            Transform::First(k) => sig.end = sig.begin + k as isize * sig.stride,
            Transform::Last(k) => sig.begin = sig.end - k as isize * sig.stride,
            Transform::Move(delta) => {
                sig.begin += delta;
                sig.end += delta;
            }
        }
        if sig.is_empty() {
            None
        } else {
            Some(Shape { sigs })
        }
    }

    /// Axiswise intersection; `None` if it is empty along any axis.
    pub fn intersect(&self, other: &Shape) -> Option<Shape> {
        assert_eq!(self.dims(), other.dims());
        let mut sigs = SmallVec::new();
        for (a, b) in self.sigs.iter().zip(other.sigs.iter()) {
            sigs.push(a.intersect(b)?);
        }
        Some(Shape { sigs })
    }

    /// Whether `sub` is a valid selection of `self`: every axis signature of
    /// `sub` is contained in the corresponding axis of `self`.
    pub fn contains_shape(&self, sub: &Shape) -> bool {
        self.dims() == sub.dims()
            && self
                .sigs
                .iter()
                .zip(sub.sigs.iter())
                .all(|(root, s)| root.contains_sig(s))
    }

    pub fn contains_point(&self, p: &[isize]) -> bool {
        p.len() == self.dims() && self.sigs.iter().zip(p).all(|(s, &i)| s.contains(i))
    }

    /// Row-major iteration over the index space, axis 0 slowest.
    pub fn points(&self) -> impl Iterator<Item = Point> + '_ {
        self.sigs
            .iter()
            .map(|s| s.indices())
            .multi_cartesian_product()
            .map(|p| Point::from_iter(p))
    }

    /// Flat row-major position of `p` within this shape's index space.
    /// The caller guarantees membership.
    pub fn offset_of(&self, p: &[isize]) -> usize {
        debug_assert!(self.contains_point(p), "point {:?} outside {:?}", p, self);
        let mut offset = 0usize;
        for (sig, &i) in self.sigs.iter().zip(p) {
            let local = ((i - sig.begin) / sig.stride) as usize;
            offset = offset * sig.card() + local;
        }
        offset
    }
}

impl std::fmt::Display for Shape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[")?;
        for (i, s) in self.sigs.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}:{}:{}", s.begin, s.end, s.stride)?;
        }
        write!(f, "] cards: [")?;
        for (i, s) in self.sigs.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}", s.card())?;
        }
        write!(f, "]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shape2(a: (isize, isize), b: (isize, isize)) -> Shape {
        Shape::from_sigs([Sig::new(a.0, a.1), Sig::new(b.0, b.1)]).unwrap()
    }

    #[test]
    fn transforms() {
        let s = shape2((0, 8), (0, 8));
        let t = s.transform(0, Transform::Begin(2)).unwrap();
        assert_eq!(*t.sig(0), Sig::new(2, 8));
        let t = s.transform(1, Transform::End(-3)).unwrap();
        assert_eq!(*t.sig(1), Sig::new(0, 5));
        let t = s.transform(0, Transform::First(3)).unwrap();
        assert_eq!(*t.sig(0), Sig::new(0, 3));
        let t = s.transform(0, Transform::Last(3)).unwrap();
        assert_eq!(*t.sig(0), Sig::new(5, 8));
        let t = s.transform(1, Transform::Move(-2)).unwrap();
        assert_eq!(*t.sig(1), Sig::new(-2, 6));
    }

    #[test]
    fn transform_collapse_is_none() {
        let s = shape2((0, 4), (0, 4));
        assert_eq!(s.transform(0, Transform::Begin(4)), None);
        assert_eq!(s.transform(0, Transform::End(-5)), None);
        assert_eq!(s.transform(1, Transform::First(0)), None);
    }

    #[test]
    fn intersect_and_contains() {
        let a = shape2((0, 8), (0, 8));
        let b = shape2((4, 12), (2, 6));
        let i = a.intersect(&b).unwrap();
        assert_eq!(i, shape2((4, 8), (2, 6)));
        assert!(a.contains_shape(&i));
        assert!(!b.contains_shape(&a));
        assert_eq!(a.intersect(&shape2((8, 10), (0, 8))), None);
    }

    #[test]
    fn row_major_offsets_match_point_order() {
        let s = shape2((1, 4), (-1, 2));
        let points: Vec<_> = s.points().collect();
        assert_eq!(points.len(), s.size());
        for (n, p) in points.iter().enumerate() {
            assert_eq!(s.offset_of(p), n);
        }
        // axis 0 is the slowest axis
        assert_eq!(points[0].as_slice(), &[1, -1]);
        assert_eq!(points[1].as_slice(), &[1, 0]);
        assert_eq!(points[3].as_slice(), &[2, -1]);
    }
}
