use crossbeam_channel::unbounded;

use super::controller::Controller;
use super::device::DeviceSelection;
use super::messaging::{Communicator, Msg};
use crate::config::EngineConfig;
use crate::error::Result;
use crate::partition::Weights;
use crate::primitives::cell::Cell;

/// Everything a rank's single-threaded driver needs: its identity, the
/// messaging endpoint, the engine configuration (read once at start) and
/// the device-selection data. Replaces the original's global mutable state
/// (rank id, communicator handle, cached env decisions) with a value passed
/// through every top-level operation.
pub struct EngineContext<C: Cell> {
    pub rank: usize,
    pub comm: Communicator<C>,
    pub config: EngineConfig,
    pub device: DeviceSelection,
}

impl<C: Cell> EngineContext<C> {
    pub fn num_ranks(&self) -> usize {
        self.comm.num_ranks()
    }

    /// The per-rank device controller.
    pub fn controller(&self) -> Controller<C> {
        Controller::new(self.device.kind_of(self.rank))
    }

    /// Partition weights from the device-selection configuration.
    pub fn config_weights(&self) -> Weights {
        self.device.config_weights(self.comm.num_ranks())
    }
}

/// The in-process SPMD runtime: `run` spawns one OS thread per rank, wires
/// the all-pairs channel fabric, and executes the same driver on each rank.
///
/// A rank that returns an error drops its channel endpoints; peers blocked
/// on it observe the disconnect as a `Messaging` error, which is the
/// in-process analogue of an MPI-style abort killing the job.
pub struct World;

impl World {
    pub fn run<C, T, F>(
        num_ranks: usize,
        config: EngineConfig,
        device: DeviceSelection,
        driver: F,
    ) -> Vec<Result<T>>
    where
        C: Cell,
        T: Send,
        F: Fn(EngineContext<C>) -> Result<T> + Sync,
    {
        assert!(num_ranks > 0);
        let mut contexts = Self::make_contexts::<C>(num_ranks, &config, &device);
        let driver = &driver;
        std::thread::scope(|scope| {
            let mut handles = Vec::with_capacity(num_ranks);
            for ctx in contexts.drain(..) {
                handles.push(scope.spawn(move || driver(ctx)));
            }
            handles
                .into_iter()
                .map(|h| match h.join() {
                    Ok(result) => result,
                    Err(panic) => std::panic::resume_unwind(panic),
                })
                .collect()
        })
    }

    fn make_contexts<C: Cell>(
        num_ranks: usize,
        config: &EngineConfig,
        device: &DeviceSelection,
    ) -> Vec<EngineContext<C>> {
        // senders[src][dst] pairs with receivers[dst][src].
        let mut senders: Vec<Vec<_>> = (0..num_ranks).map(|_| Vec::new()).collect();
        let mut receivers: Vec<Vec<_>> = (0..num_ranks).map(|_| Vec::new()).collect();
        for src in 0..num_ranks {
            for _dst in 0..num_ranks {
                let (tx, rx) = unbounded::<Msg<C>>();
                senders[src].push(tx);
                receivers[src].push(rx);
            }
        }
        // Transpose receivers so rank d owns the endpoints indexed by source.
        let mut by_dst: Vec<Vec<_>> = (0..num_ranks).map(|_| Vec::new()).collect();
        for row in receivers {
            for (dst, rx) in row.into_iter().enumerate() {
                by_dst[dst].push(rx);
            }
        }
        senders
            .into_iter()
            .zip(by_dst)
            .enumerate()
            .map(|(rank, (tx_row, rx_row))| EngineContext {
                rank,
                comm: Communicator::new(rank, tx_row, rx_row),
                config: config.clone(),
                device: device.clone(),
            })
            .collect()
    }

    /// Test harness: run a driver that only needs the messaging endpoint.
    #[cfg(test)]
    pub(crate) fn fabric_for_tests<C, F>(num_ranks: usize, driver: F) -> Vec<Result<()>>
    where
        C: Cell,
        F: Fn(&Communicator<C>) -> Result<()> + Sync,
    {
        Self::run(
            num_ranks,
            EngineConfig::default(),
            DeviceSelection::uniform_cpu(),
            |ctx| driver(&ctx.comm),
        )
    }
}
