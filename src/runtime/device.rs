use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{EpsilodError, Result};
use crate::partition::Weights;

/// What kind of compute device a rank drives. The reference runtime executes
/// everything on the host either way; the kind only selects kernel block
/// characterizations.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    Cpu,
    Gpu,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeviceEntry {
    pub kind: DeviceKind,
    /// Partition weight of this rank under the weighted partitioner.
    #[serde(default = "default_weight")]
    pub weight: f32,
}

fn default_weight() -> f32 {
    1.0
}

/// Parsed device-selection configuration: which device each rank uses and
/// the per-rank partition weights. When fewer entries than ranks are given,
/// entries repeat cyclically.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeviceSelection {
    pub devices: Vec<DeviceEntry>,
}

impl DeviceSelection {
    pub fn uniform_cpu() -> Self {
        Self {
            devices: vec![DeviceEntry {
                kind: DeviceKind::Cpu,
                weight: 1.0,
            }],
        }
    }

    pub fn with_weights(weights: &[f32]) -> Self {
        Self {
            devices: weights
                .iter()
                .map(|&w| DeviceEntry {
                    kind: DeviceKind::Cpu,
                    weight: w,
                })
                .collect(),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let sel: DeviceSelection = serde_json::from_str(&text)
            .map_err(|e| EpsilodError::Config(format!("device selection file: {e}")))?;
        if sel.devices.is_empty() {
            return Err(EpsilodError::Config(
                "device selection file lists no devices".into(),
            ));
        }
        Ok(sel)
    }

    pub fn kind_of(&self, rank: usize) -> DeviceKind {
        self.devices[rank % self.devices.len()].kind
    }

    /// The configured partition weights, one per rank.
    pub fn config_weights(&self, num_ranks: usize) -> Weights {
        Weights {
            ratios: (0..num_ranks)
                .map(|r| self.devices[r % self.devices.len()].weight)
                .collect(),
        }
    }
}
