use half::f16;

/// The element type of a grid. The engine never inspects cell values: it
/// copies them, compares them for bit-level tests, and hands them to user
/// functors. A cell may be a primitive float or a compound aggregate of
/// fixed arity (one array cell per lattice site, for instance).
pub trait Cell: Copy + PartialEq + Send + Sync + std::fmt::Debug + 'static {
    /// Fill value for freshly allocated tiles.
    const ZERO: Self;
}

impl Cell for f32 {
    const ZERO: Self = 0.0;
}

impl Cell for f64 {
    const ZERO: Self = 0.0;
}

impl Cell for f16 {
    const ZERO: Self = f16::ZERO;
}

/// Compound cells: a fixed-arity aggregate of a base cell, e.g. `[f32; 19]`
/// for a D3Q19 lattice.
impl<C: Cell, const N: usize> Cell for [C; N] {
    const ZERO: Self = [C::ZERO; N];
}
