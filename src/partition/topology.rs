use smallvec::SmallVec;

use crate::primitives::shape::MAX_DIMS;

/// A grid of process ranks. Ranks are numbered row-major, axis 0 slowest.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Topology {
    card: SmallVec<[usize; MAX_DIMS]>,
}

impl Topology {
    /// A plain 1-D process line.
    pub fn plain(num_procs: usize) -> Self {
        assert!(num_procs > 0);
        Self {
            card: SmallVec::from_slice(&[num_procs]),
        }
    }

    /// A balanced `ndims`-dimensional grid: prime factors of `num_procs`
    /// are assigned largest-first to the currently smallest axis.
    pub fn grid(num_procs: usize, ndims: usize) -> Self {
        assert!(num_procs > 0 && ndims > 0);
        let mut card = SmallVec::from_elem(1usize, ndims);
        for f in prime_factors_desc(num_procs) {
            let smallest = (0..ndims).min_by_key(|&d| card[d]).unwrap();
            card[smallest] *= f;
        }
        // Largest axis first, keeps the slow axis the widest one.
        card.sort_unstable_by(|a: &usize, b| b.cmp(a));
        Self { card }
    }

    pub fn dims(&self) -> usize {
        self.card.len()
    }

    pub fn card(&self, dim: usize) -> usize {
        self.card[dim]
    }

    pub fn num_procs(&self) -> usize {
        self.card.iter().product()
    }

    pub fn coords_of(&self, rank: usize) -> SmallVec<[usize; MAX_DIMS]> {
        debug_assert!(rank < self.num_procs());
        let mut coords = SmallVec::from_elem(0usize, self.dims());
        let mut rest = rank;
        for d in (0..self.dims()).rev() {
            coords[d] = rest % self.card[d];
            rest /= self.card[d];
        }
        coords
    }

    pub fn rank_of(&self, coords: &[usize]) -> usize {
        debug_assert_eq!(coords.len(), self.dims());
        coords
            .iter()
            .zip(self.card.iter())
            .fold(0, |rank, (&c, &n)| rank * n + c)
    }
}

fn prime_factors_desc(mut n: usize) -> Vec<usize> {
    let mut factors = Vec::new();
    let mut f = 2;
    while f * f <= n {
        while n % f == 0 {
            factors.push(f);
            n /= f;
        }
        f += 1;
    }
    if n > 1 {
        factors.push(n);
    }
    factors.sort_unstable_by(|a, b| b.cmp(a));
    factors
}
