//! In-process messaging fabric: one unbounded channel per ordered rank
//! pair, tagged messages, and collectives over explicit participant sets.
//!
//! Point-to-point payloads are raw row-major cell runs (the wire format of
//! halo exchanges); control traffic uses `f64` vectors. Messages are matched
//! by `(source, tag)`: anything received while looking for a different match
//! is stashed and delivered later, which is what lets a non-blocking
//! all-gather stay in flight across several iterations of halo traffic.

use std::cell::RefCell;
use std::collections::VecDeque;

use crossbeam_channel::{Receiver, Select, Sender};

use crate::error::{EpsilodError, Result};
use crate::primitives::cell::Cell;

/// Message tags. Halo traffic uses the neighbor slot number directly, so
/// reserved tags live far above any slot number (3^4 = 81 slots at most).
pub const TAG_BARRIER: u32 = 1 << 16;
pub const TAG_COLLECT: u32 = (1 << 16) + 1;
pub const TAG_REDISTRIBUTE: u32 = (1 << 16) + 2;
pub const TAG_ALB_ROW_TIMES: u32 = (1 << 16) + 3;
pub const TAG_ALB_AVG_TIMES: u32 = (1 << 16) + 4;
pub const TAG_ALB_REDIS_TIMES: u32 = (1 << 16) + 5;

#[derive(Debug)]
pub enum Payload<C: Cell> {
    Cells(Vec<C>),
    Doubles(Vec<f64>),
    Token,
}

#[derive(Debug)]
pub struct Msg<C: Cell> {
    pub tag: u32,
    pub payload: Payload<C>,
}

/// A posted, not yet completed all-gather.
#[derive(Debug)]
pub struct PendingGather {
    participants: Vec<usize>,
    my_value: f64,
    tag: u32,
}

/// Per-rank endpoint of the fabric.
pub struct Communicator<C: Cell> {
    rank: usize,
    senders: Vec<Sender<Msg<C>>>,
    receivers: Vec<Receiver<Msg<C>>>,
    stash: RefCell<Vec<VecDeque<Msg<C>>>>,
}

impl<C: Cell> Communicator<C> {
    pub(crate) fn new(
        rank: usize,
        senders: Vec<Sender<Msg<C>>>,
        receivers: Vec<Receiver<Msg<C>>>,
    ) -> Self {
        let n = senders.len();
        Self {
            rank,
            senders,
            receivers,
            stash: RefCell::new((0..n).map(|_| VecDeque::new()).collect()),
        }
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn num_ranks(&self) -> usize {
        self.senders.len()
    }

    fn post(&self, dst: usize, tag: u32, payload: Payload<C>) -> Result<()> {
        self.senders[dst]
            .send(Msg { tag, payload })
            .map_err(|_| EpsilodError::Messaging(format!("rank {dst} is gone")))
    }

    /// Blocking receive of the message with `tag` from `src`, stashing
    /// anything else that arrives first.
    fn recv_match(&self, src: usize, tag: u32) -> Result<Payload<C>> {
        let mut stash = self.stash.borrow_mut();
        if let Some(pos) = stash[src].iter().position(|m| m.tag == tag) {
            return Ok(stash[src].remove(pos).expect("position just found").payload);
        }
        loop {
            let msg = self.receivers[src].recv().map_err(|_| {
                EpsilodError::Messaging(format!("rank {src} disconnected while rank {} waited", self.rank))
            })?;
            if msg.tag == tag {
                return Ok(msg.payload);
            }
            stash[src].push_back(msg);
        }
    }

    pub fn send_cells(&self, dst: usize, tag: u32, cells: Vec<C>) -> Result<()> {
        self.post(dst, tag, Payload::Cells(cells))
    }

    pub fn recv_cells(&self, src: usize, tag: u32) -> Result<Vec<C>> {
        match self.recv_match(src, tag)? {
            Payload::Cells(cells) => Ok(cells),
            other => Err(EpsilodError::Messaging(format!(
                "expected cells from rank {src} tag {tag}, got {other:?}"
            ))),
        }
    }

    /// Wait until any of `pending` (pairs of `(src, tag)`) completes; returns
    /// the index of the completed entry and its cells.
    pub fn recv_any_cells(&self, pending: &[(usize, u32)]) -> Result<(usize, Vec<C>)> {
        // A stashed message may already satisfy one of the ops.
        {
            let mut stash = self.stash.borrow_mut();
            for (idx, &(src, tag)) in pending.iter().enumerate() {
                if let Some(pos) = stash[src].iter().position(|m| m.tag == tag) {
                    let msg = stash[src].remove(pos).expect("position just found");
                    match msg.payload {
                        Payload::Cells(cells) => return Ok((idx, cells)),
                        other => {
                            return Err(EpsilodError::Messaging(format!(
                                "expected cells from rank {src} tag {tag}, got {other:?}"
                            )))
                        }
                    }
                }
            }
        }

        let mut srcs: Vec<usize> = pending.iter().map(|&(s, _)| s).collect();
        srcs.sort_unstable();
        srcs.dedup();
        loop {
            let mut sel = Select::new();
            for &src in &srcs {
                sel.recv(&self.receivers[src]);
            }
            let op = sel.select();
            let src = srcs[op.index()];
            let msg = op.recv(&self.receivers[src]).map_err(|_| {
                EpsilodError::Messaging(format!("rank {src} disconnected mid-exchange"))
            })?;
            if let Some(idx) = pending
                .iter()
                .position(|&(s, tag)| s == src && tag == msg.tag)
            {
                match msg.payload {
                    Payload::Cells(cells) => return Ok((idx, cells)),
                    other => {
                        return Err(EpsilodError::Messaging(format!(
                            "expected cells from rank {src}, got {other:?}"
                        )))
                    }
                }
            }
            self.stash.borrow_mut()[src].push_back(msg);
        }
    }

    /// Rendezvous of `participants` (must list the same, sorted ranks on
    /// every participant, including the caller).
    pub fn barrier(&self, participants: &[usize]) -> Result<()> {
        if participants.len() < 2 {
            return Ok(());
        }
        debug_assert!(participants.contains(&self.rank));
        let root = participants[0];
        if self.rank == root {
            for &r in &participants[1..] {
                match self.recv_match(r, TAG_BARRIER)? {
                    Payload::Token => {}
                    other => {
                        return Err(EpsilodError::Messaging(format!(
                            "barrier expected token, got {other:?}"
                        )))
                    }
                }
            }
            for &r in &participants[1..] {
                self.post(r, TAG_BARRIER, Payload::Token)?;
            }
        } else {
            self.post(root, TAG_BARRIER, Payload::Token)?;
            match self.recv_match(root, TAG_BARRIER)? {
                Payload::Token => {}
                other => {
                    return Err(EpsilodError::Messaging(format!(
                        "barrier expected token, got {other:?}"
                    )))
                }
            }
        }
        Ok(())
    }

    /// Synchronous all-gather of one double per participant, in participant
    /// order.
    pub fn all_gather_f64(&self, participants: &[usize], value: f64) -> Result<Vec<f64>> {
        let pending = self.all_gather_start(participants, value, TAG_COLLECT)?;
        self.finish_gather(&pending)
    }

    /// Post the sends of an all-gather and return a handle; the matching
    /// receives happen in `finish_gather`, possibly much later.
    pub fn all_gather_start(
        &self,
        participants: &[usize],
        value: f64,
        tag: u32,
    ) -> Result<PendingGather> {
        debug_assert!(participants.contains(&self.rank));
        for &r in participants {
            if r != self.rank {
                self.post(r, tag, Payload::Doubles(vec![value]))?;
            }
        }
        Ok(PendingGather {
            participants: participants.to_vec(),
            my_value: value,
            tag,
        })
    }

    pub fn finish_gather(&self, pending: &PendingGather) -> Result<Vec<f64>> {
        let mut out = Vec::with_capacity(pending.participants.len());
        for &r in &pending.participants {
            if r == self.rank {
                out.push(pending.my_value);
                continue;
            }
            match self.recv_match(r, pending.tag)? {
                Payload::Doubles(mut v) if v.len() == 1 => out.push(v.pop().expect("one value")),
                other => {
                    return Err(EpsilodError::Messaging(format!(
                        "gather expected one double from rank {r}, got {other:?}"
                    )))
                }
            }
        }
        Ok(out)
    }

    pub fn all_reduce_max_f64(&self, participants: &[usize], value: f64) -> Result<f64> {
        let all = self.all_gather_f64(participants, value)?;
        Ok(all.into_iter().fold(f64::MIN, f64::max))
    }

    pub fn all_reduce_max_i64(&self, participants: &[usize], value: i64) -> Result<i64> {
        let max = self.all_reduce_max_f64(participants, value as f64)?;
        Ok(max as i64)
    }
}
