use super::pattern::CommEvent;
use crate::error::{EpsilodError, Result};
use crate::primitives::cell::Cell;
use crate::runtime::messaging::Communicator;
use crate::runtime::Controller;
use crate::tiles::{CommArgs, EngineTiles};
use crate::utils::clock::Clock;

/// How host-staged halo exchanges overlap interprocess transfers with the
/// host-to-device uploads of received halos.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommMethod {
    /// Upload each halo as soon as its receive completes.
    HostWaitAny,
    /// Complete receives (uploading per completion) before minding sends.
    HostWaitAnyRecvFirst,
    /// Complete the whole pattern, then upload every halo.
    HostWaitAll,
}

impl Default for CommMethod {
    fn default() -> Self {
        CommMethod::HostWaitAny
    }
}

impl CommMethod {
    pub fn parse(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "host_waitany" => Ok(CommMethod::HostWaitAny),
            "host_waitany_recvfirst" => Ok(CommMethod::HostWaitAnyRecvFirst),
            "host_waitall" => Ok(CommMethod::HostWaitAll),
            other => Err(EpsilodError::Config(format!(
                "unknown comm method {other:?}"
            ))),
        }
    }
}

/// Perform one iteration's halo exchange for `tiles`.
///
/// Device-aware messaging drives the pattern on device buffers and needs no
/// staging. Otherwise the freshly computed outbound slabs are brought down
/// to the host, the pattern runs on host buffers per the configured method,
/// and each halo is uploaded back; the comm clock brackets the interprocess
/// part.
pub fn do_comms<C: Cell>(
    ctrl: &Controller<C>,
    comm: &Communicator<C>,
    tiles: &EngineTiles<C>,
    args: &CommArgs,
    dev_aware: bool,
    method: CommMethod,
    comm_clock: &mut Clock,
) -> Result<()> {
    let pattern = tiles
        .pattern
        .as_ref()
        .expect("tiles carry a built communication pattern");

    if dev_aware {
        pattern.run(comm)?;
        return Ok(());
    }

    for pair in &tiles.border_out_dev {
        for slab in pair.iter().flatten() {
            ctrl.move_from(slab);
        }
    }
    for pair in &tiles.border_out_dev {
        for slab in pair.iter().flatten() {
            ctrl.wait_tile(slab);
        }
    }

    comm_clock.start();
    match method {
        CommMethod::HostWaitAny => {
            let mut exchange = pattern.start_async(comm)?;
            loop {
                match exchange.step()? {
                    CommEvent::SendDone(_) => continue,
                    CommEvent::RecvDone(op) => {
                        if let Some(halo) = &pattern.ops()[op].halo {
                            ctrl.host_touch(halo);
                            ctrl.move_to(halo);
                        }
                    }
                    CommEvent::End => break,
                }
            }
        }
        CommMethod::HostWaitAnyRecvFirst => {
            let mut exchange = pattern.start_async(comm)?;
            while let Some(op) = exchange.step_recv()? {
                if let Some(halo) = &pattern.ops()[op].halo {
                    ctrl.host_touch(halo);
                    ctrl.move_to(halo);
                }
            }
            exchange.finish()?;
        }
        CommMethod::HostWaitAll => {
            pattern.run(comm)?;
            for (slot, halo) in tiles.border_in.iter().enumerate() {
                if !args.border_in_active[slot] {
                    continue;
                }
                if let Some(halo) = halo {
                    ctrl.host_touch(halo);
                    ctrl.move_to(halo);
                }
            }
        }
    }
    for (slot, halo) in tiles.border_in.iter().enumerate() {
        if !args.border_in_active[slot] {
            continue;
        }
        if let Some(halo) = halo {
            ctrl.wait_tile(halo);
        }
    }
    comm_clock.stop();
    Ok(())
}
