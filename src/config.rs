use crate::alb::AlbKind;
use crate::comm::CommMethod;
use crate::error::{EpsilodError, Result};
use crate::partition::PartitionSpec;

/// Engine configuration, read once at engine start from the environment.
/// Replaces the per-call cached env lookups with a single value carried by
/// the engine context.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub partition: PartitionSpec,
    pub comm_method: CommMethod,
    /// Zero-copy device-aware messaging: patterns move device buffers
    /// directly instead of staging through the host.
    pub dev_aware: bool,
    pub alb: AlbKind,
    /// Sliding-window length for ALB kernel timings.
    pub alb_window: usize,
    /// Initialize the copy buffer with a host-side loop instead of the
    /// device copy kernel.
    pub host_copy_init: bool,
    pub debug_tiles: bool,
    /// Experimentation mode: quiet stages, CSV clock line.
    pub exp_mode: bool,
}

pub const DEFAULT_ALB_WINDOW: usize = 30;

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            partition: PartitionSpec::default(),
            comm_method: CommMethod::default(),
            dev_aware: false,
            alb: AlbKind::default(),
            alb_window: DEFAULT_ALB_WINDOW,
            host_copy_init: false,
            debug_tiles: false,
            exp_mode: false,
        }
    }
}

impl EngineConfig {
    /// All environment values are accepted lower-cased.
    ///
    /// - `EPSILOD_MPI_DEV_AWARE` ∈ {y,n}
    /// - `EPSILOD_PARTITION` = `m[k] | s<d> | w<d> | n<d>`, default `s0`
    /// - `EPSILOD_ALB_HEUR` ∈ {none, NextALB, ConstIters, ExpIters, DoubleIters}
    /// - `EPSILOD_ALB_WINDOW` = window length, default 30
    /// - `EPSILOD_COMM_METHOD` ∈ {host_waitany, host_waitany_recvfirst, host_waitall}
    /// - `EPSILOD_DEBUG_TILES`, `CTRL_EXAMPLES_EXP_MODE` ∈ {y,n}
    pub fn from_env() -> Result<EngineConfig> {
        let mut config = EngineConfig::default();
        if let Some(s) = env_var("EPSILOD_PARTITION") {
            config.partition = PartitionSpec::parse(&s)?;
        }
        if let Some(s) = env_var("EPSILOD_COMM_METHOD") {
            config.comm_method = CommMethod::parse(&s)?;
        }
        if let Some(s) = env_var("EPSILOD_ALB_HEUR") {
            config.alb = AlbKind::parse(&s)?;
        }
        if let Some(s) = env_var("EPSILOD_ALB_WINDOW") {
            config.alb_window = s.parse().map_err(|_| {
                EpsilodError::Config(format!("EPSILOD_ALB_WINDOW is not a window length: {s:?}"))
            })?;
            if config.alb_window == 0 {
                return Err(EpsilodError::Config(
                    "EPSILOD_ALB_WINDOW must be positive".into(),
                ));
            }
        }
        config.dev_aware = env_no_yes("EPSILOD_MPI_DEV_AWARE")?;
        config.debug_tiles = env_no_yes("EPSILOD_DEBUG_TILES")?;
        config.exp_mode = env_no_yes("CTRL_EXAMPLES_EXP_MODE")?;
        Ok(config)
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.is_empty())
}

fn env_no_yes(name: &str) -> Result<bool> {
    match env_var(name).as_deref().map(str::to_ascii_lowercase) {
        None => Ok(false),
        Some(v) if v == "n" || v == "no" => Ok(false),
        Some(v) if v == "y" || v == "yes" => Ok(true),
        Some(v) => Err(EpsilodError::Config(format!(
            "{name} expects y or n, got {v:?}"
        ))),
    }
}

/// Extra options taken from environment variables, for program usage text.
pub fn print_usage() {
    eprintln!("\nEPSILOD environment variables:");
    eprintln!("\tEPSILOD_MPI_DEV_AWARE=y|n    Activate device-aware messaging");
    eprintln!("\tEPSILOD_PARTITION=m          Regular blocks on a multidimensional grid topology");
    eprintln!("\tEPSILOD_PARTITION=m<n_dims>  Regular blocks on the first <n_dims> dimensions");
    eprintln!("\tEPSILOD_PARTITION=s<dim>     Regular blocks on a single dimension topology");
    eprintln!("\tEPSILOD_PARTITION=n<dim>     Regular blocks on all dimensions except one");
    eprintln!("\tEPSILOD_PARTITION=w<dim>     Weighted block distribution in the chosen dimension.");
    eprintln!("\t                             Process weights come from the device selection file.");
    eprintln!("\tNOTE: the default behaviour corresponds to s0.");
    eprintln!("\tEPSILOD_ALB_HEUR=none        Rebalancing deactivated.");
    eprintln!("\tEPSILOD_ALB_HEUR=NextALB     Estimate the iteration needing the next rebalance.");
    eprintln!("\tEPSILOD_ALB_HEUR=ConstIters  Rebalance every full timing window.");
    eprintln!("\tEPSILOD_ALB_HEUR=ExpIters    Rebalance after exponentially growing gaps.");
    eprintln!("\tEPSILOD_ALB_HEUR=DoubleIters Rebalance at iterations that double each time.");
    eprintln!("\tNOTE: the default is none. Anything else requires the w partition.");
    eprintln!("\tEPSILOD_ALB_WINDOW=<n>       Timing window length (default {DEFAULT_ALB_WINDOW}).");
    eprintln!("\tEPSILOD_COMM_METHOD=host_waitany|host_waitany_recvfirst|host_waitall");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = EngineConfig::default();
        assert_eq!(c.partition, PartitionSpec::SingleDim(0));
        assert_eq!(c.comm_method, CommMethod::HostWaitAny);
        assert_eq!(c.alb, AlbKind::None);
        assert_eq!(c.alb_window, DEFAULT_ALB_WINDOW);
        assert!(!c.dev_aware);
    }

    // The only test that touches the process environment; keeps every
    // variable it sets cleaned up.
    #[test]
    fn from_env_reads_variables() {
        std::env::set_var("EPSILOD_PARTITION", "m2");
        std::env::set_var("EPSILOD_ALB_HEUR", "expiters");
        std::env::set_var("EPSILOD_ALB_WINDOW", "5");
        std::env::set_var("EPSILOD_COMM_METHOD", "host_waitall");
        std::env::set_var("EPSILOD_MPI_DEV_AWARE", "y");
        let c = EngineConfig::from_env().unwrap();
        assert_eq!(c.partition, PartitionSpec::MultiDim(Some(2)));
        assert_eq!(c.alb, AlbKind::ExpIters);
        assert_eq!(c.alb_window, 5);
        assert_eq!(c.comm_method, CommMethod::HostWaitAll);
        assert!(c.dev_aware);

        std::env::set_var("EPSILOD_MPI_DEV_AWARE", "maybe");
        assert!(EngineConfig::from_env().is_err());

        for var in [
            "EPSILOD_PARTITION",
            "EPSILOD_ALB_HEUR",
            "EPSILOD_ALB_WINDOW",
            "EPSILOD_COMM_METHOD",
            "EPSILOD_MPI_DEV_AWARE",
        ] {
            std::env::remove_var(var);
        }
    }
}
