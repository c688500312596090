use crate::error::Result;
use crate::partition::Layout;
use crate::primitives::cell::Cell;
use crate::primitives::shape::Shape;
use crate::primitives::sig::Sig;
use crate::primitives::tile::{Side, Tile};
use crate::runtime::messaging::{Communicator, TAG_REDISTRIBUTE};
use crate::stencil::Borders;

/// Source coverage of a rank during redistribution: its owned region, plus
/// the global-matrix border cells on any face that touches the global edge
/// (edge blocks own the fixed boundary).
fn source_region(owned: &Shape, global: &Shape, borders: &Borders) -> Shape {
    let sigs = owned.sigs().iter().enumerate().map(|(axis, s)| {
        let inner_begin = global.sig(axis).begin + borders.low[axis] as isize;
        let inner_end = global.sig(axis).end - borders.high[axis] as isize;
        let begin = if s.begin == inner_begin {
            s.begin - borders.low[axis] as isize
        } else {
            s.begin
        };
        let end = if s.end == inner_end {
            s.end + borders.high[axis] as isize
        } else {
            s.end
        };
        Sig::new(begin, end)
    });
    Shape::from_sigs(sigs).expect("source region contains the owned region")
}

/// Destination coverage: the full halo expansion (the new `mat` shape), so
/// the new owner starts with coherent halos wherever the data came from one
/// source; edges that crossed a rank boundary get refreshed by the follow-up
/// halo exchange.
fn dest_region(owned: &Shape, borders: &Borders) -> Shape {
    let sigs = owned.sigs().iter().enumerate().map(|(axis, s)| {
        Sig::new(
            s.begin - borders.low[axis] as isize,
            s.end + borders.high[axis] as isize,
        )
    });
    Shape::from_sigs(sigs).expect("halo expansion contains the owned region")
}

/// Move the matrix from its distribution under `old_lay` (host buffers of
/// `old_mat`) to its distribution under `new_lay` (host buffers of
/// `new_mat`): for every pair of ranks whose source and destination regions
/// overlap, one point-to-point transfer of the overlap. Ranks without data
/// on a side simply skip that side.
pub fn redistribute_layout<C: Cell>(
    comm: &Communicator<C>,
    participants: &[usize],
    old_lay: &Layout,
    new_lay: &Layout,
    old_mat: Option<&Tile<C>>,
    new_mat: Option<&Tile<C>>,
    global: &Shape,
    borders: &Borders,
) -> Result<()> {
    let me = comm.rank();
    let src_of = |r: usize, lay: &Layout| {
        lay.shape_of(r)
            .map(|owned| source_region(owned, global, borders))
    };
    let dst_of = |r: usize| new_lay.shape_of(r).map(|owned| dest_region(owned, borders));

    // Post all sends first; the transfers complete as peers drain them.
    if let (Some(my_src), Some(old_mat)) = (src_of(me, old_lay), old_mat) {
        for &r in participants {
            if r == me {
                continue;
            }
            if let Some(overlap) = dst_of(r).and_then(|d| my_src.intersect(&d)) {
                let cells = old_mat.read_region(&overlap, Side::Host);
                comm.send_cells(r, TAG_REDISTRIBUTE, cells)?;
            }
        }
    }

    if let (Some(my_dst), Some(new_mat)) = (dst_of(me), new_mat) {
        // The part I already own moves locally.
        if let (Some(my_src), Some(old_mat)) = (src_of(me, old_lay), old_mat) {
            if let Some(overlap) = my_src.intersect(&my_dst) {
                let cells = old_mat.read_region(&overlap, Side::Host);
                new_mat.write_region(&overlap, Side::Host, &cells);
            }
        }
        for &r in participants {
            if r == me {
                continue;
            }
            if let Some(overlap) = src_of(r, old_lay).and_then(|s| s.intersect(&my_dst)) {
                let cells = comm.recv_cells(r, TAG_REDISTRIBUTE)?;
                new_mat.write_region(&overlap, Side::Host, &cells);
            }
        }
    }
    Ok(())
}
