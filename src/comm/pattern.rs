use std::collections::VecDeque;

use crate::error::Result;
use crate::partition::Layout;
use crate::primitives::cell::Cell;
use crate::primitives::tile::{Side, Tile};
use crate::runtime::messaging::Communicator;
use crate::tiles::{CommArgs, EngineTiles};

/// One symmetric exchange of a neighbor slot: send the outbound border
/// toward the out-neighbor, receive the inbound halo from the in-neighbor.
/// Either half may be absent on ranks at the grid edge.
#[derive(Debug, Clone)]
pub struct SendRecvOp<C: Cell> {
    pub slot: usize,
    pub send_to: Option<usize>,
    pub out: Option<Tile<C>>,
    pub recv_from: Option<usize>,
    pub halo: Option<Tile<C>>,
}

/// Completion events of an asynchronously stepped pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommEvent {
    SendDone(usize),
    RecvDone(usize),
    End,
}

/// A reusable schedule of send/recv operations attached to a tile family.
/// The pattern holds selections of the tiles it was built from; it must be
/// rebuilt whenever those tiles are rebuilt.
#[derive(Debug)]
pub struct Pattern<C: Cell> {
    ops: Vec<SendRecvOp<C>>,
    dev_aware: bool,
}

/// Slots participating in communication, largest `border_in` first: posting
/// big transfers early shortens the completion tail of the slow path. Slots
/// without an inbound halo sort last.
pub fn sort_comm_slots<C: Cell>(tiles: &EngineTiles<C>, args: &CommArgs) -> Vec<usize> {
    let mut slots: Vec<usize> = args.comm_slots().collect();
    slots.sort_by_key(|&s| {
        std::cmp::Reverse(tiles.border_in[s].as_ref().map(|t| t.size()).unwrap_or(0))
    });
    slots
}

impl<C: Cell> Pattern<C> {
    /// Register one op per communicating slot, in `order`. With device-aware
    /// messaging the ops move device buffers directly; otherwise they stage
    /// through the host buffers.
    pub fn build(
        tiles: &EngineTiles<C>,
        args: &CommArgs,
        lay: &Layout,
        order: &[usize],
        dev_aware: bool,
    ) -> Pattern<C> {
        let mut ops = Vec::new();
        for &slot in order {
            let send_to = if args.border_out_active[slot] {
                args.shifts_out[slot].as_ref().and_then(|s| lay.neighbor(s))
            } else {
                None
            };
            let recv_from = if args.border_in_active[slot] {
                args.shifts_in[slot].as_ref().and_then(|s| lay.neighbor(s))
            } else {
                None
            };
            if send_to.is_none() && recv_from.is_none() {
                continue;
            }
            ops.push(SendRecvOp {
                slot,
                send_to,
                out: send_to.and(tiles.border_out[slot].clone()),
                recv_from,
                halo: recv_from.and(tiles.border_in[slot].clone()),
            });
        }
        Pattern { ops, dev_aware }
    }

    pub fn ops(&self) -> &[SendRecvOp<C>] {
        &self.ops
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    fn side(&self) -> Side {
        if self.dev_aware {
            Side::Device
        } else {
            Side::Host
        }
    }

    /// Drive the whole pattern to completion on its configured buffers.
    pub fn run(&self, comm: &Communicator<C>) -> Result<()> {
        self.run_on(comm, self.side())
    }

    /// Drive the whole pattern on an explicit buffer side (the post-ALB
    /// refresh runs on host buffers regardless of device-aware messaging).
    pub fn run_on(&self, comm: &Communicator<C>, side: Side) -> Result<()> {
        let mut exchange = self.start_async_on(comm, side)?;
        while exchange.step()? != CommEvent::End {}
        Ok(())
    }

    /// Post every send and hand back the stepper for completion events.
    pub fn start_async<'a>(&'a self, comm: &'a Communicator<C>) -> Result<AsyncExchange<'a, C>> {
        self.start_async_on(comm, self.side())
    }

    fn start_async_on<'a>(
        &'a self,
        comm: &'a Communicator<C>,
        side: Side,
    ) -> Result<AsyncExchange<'a, C>> {
        let mut send_events = VecDeque::new();
        let mut recvs = Vec::new();
        for (idx, op) in self.ops.iter().enumerate() {
            if let (Some(dst), Some(out)) = (op.send_to, op.out.as_ref()) {
                let cells = out.read_region(out.shape(), side);
                comm.send_cells(dst, op.slot as u32, cells)?;
                send_events.push_back(idx);
            }
            if let (Some(src), Some(_)) = (op.recv_from, op.halo.as_ref()) {
                recvs.push((idx, src, op.slot as u32));
            }
        }
        Ok(AsyncExchange {
            pattern: self,
            comm,
            side,
            send_events,
            recvs,
        })
    }
}

/// A non-blocking iterator of completion events over a started pattern.
/// Sends complete at post time in this fabric, so their events drain first;
/// receive completions then arrive in whatever order the neighbors flush.
pub struct AsyncExchange<'a, C: Cell> {
    pattern: &'a Pattern<C>,
    comm: &'a Communicator<C>,
    side: Side,
    send_events: VecDeque<usize>,
    recvs: Vec<(usize, usize, u32)>,
}

impl<'a, C: Cell> AsyncExchange<'a, C> {
    /// Next completion event, or `End` once every op has finished.
    pub fn step(&mut self) -> Result<CommEvent> {
        if let Some(idx) = self.send_events.pop_front() {
            return Ok(CommEvent::SendDone(idx));
        }
        match self.step_recv()? {
            Some(idx) => Ok(CommEvent::RecvDone(idx)),
            None => Ok(CommEvent::End),
        }
    }

    /// Next *receive* completion only; `None` once all halos have landed.
    pub fn step_recv(&mut self) -> Result<Option<usize>> {
        if self.recvs.is_empty() {
            return Ok(None);
        }
        let pending: Vec<(usize, u32)> =
            self.recvs.iter().map(|&(_, src, tag)| (src, tag)).collect();
        let (done, cells) = self.comm.recv_any_cells(&pending)?;
        let (op_idx, _, _) = self.recvs.swap_remove(done);
        let op = &self.pattern.ops[op_idx];
        let halo = op.halo.as_ref().expect("recv op carries a halo tile");
        halo.write_region(halo.shape(), self.side, &cells);
        Ok(Some(op_idx))
    }

    /// Drain whatever is still outstanding.
    pub fn finish(&mut self) -> Result<()> {
        self.send_events.clear();
        while self.step_recv()?.is_some() {}
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::shape::Shape;
    use crate::primitives::sig::Sig;
    use crate::stencil::{num_slots, slot_of_shift};
    use crate::tiles::EngineTiles;

    fn shape(ranges: &[(isize, isize)]) -> Shape {
        Shape::from_sigs(ranges.iter().map(|&(b, e)| Sig::new(b, e))).unwrap()
    }

    /// Hand-rolled tile family with two inbound halos of different sizes.
    fn tiles_with_halos(big_slot: usize, small_slot: usize) -> (EngineTiles<f32>, CommArgs) {
        let mat: Tile<f32> = Tile::domain(shape(&[(0, 12), (0, 12)])).alloc();
        let mut border_in: Vec<Option<Tile<f32>>> = vec![None; num_slots(2)];
        border_in[big_slot] = Some(mat.select(shape(&[(0, 1), (1, 11)])));
        border_in[small_slot] = Some(mat.select(shape(&[(1, 11), (0, 1)])));
        let mut args = CommArgs {
            border_in_active: vec![false; num_slots(2)],
            border_out_active: vec![false; num_slots(2)],
            shifts_in: vec![None; num_slots(2)],
            shifts_out: vec![None; num_slots(2)],
        };
        args.border_in_active[big_slot] = true;
        args.border_in_active[small_slot] = true;
        let tiles = EngineTiles {
            io: mat.clone(),
            inner: None,
            border_in,
            border_out: vec![None; num_slots(2)],
            border_out_dev: Default::default(),
            pattern: None,
            mat,
        };
        (tiles, args)
    }

    #[test]
    fn sort_puts_largest_halo_first() {
        let big = slot_of_shift(&[-1, 0]);
        let small = slot_of_shift(&[0, -1]);
        let (mut tiles, args) = tiles_with_halos(big, small);
        // Shrink the second halo so the sizes differ clearly (10 vs 2 cells).
        tiles.border_in[small] = Some(tiles.mat.select(shape(&[(1, 3), (0, 1)])));
        let order = sort_comm_slots(&tiles, &args);
        assert_eq!(order.first(), Some(&big));
    }
}
