use std::collections::TryReserveError;

use crate::{SlotId, Tier};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ProfilerError {
    #[error("unknown stat event tag {0}")]
    UnknownEvent(u8),

    #[error("unknown output kind tag {0}")]
    UnknownOutput(u8),

    #[error("slot {0} is not a registered call site")]
    InvalidSlot(SlotId),

    #[error("slot tables are already borrowed")]
    TableBusy,
}

#[derive(Debug, thiserror::Error)]
pub enum CalibrationError {
    #[error("failed to allocate {bytes} byte {tier} probe buffer")]
    Alloc {
        tier: Tier,
        bytes: usize,
        #[source]
        source: TryReserveError,
    },

    #[error("{tier} probe needs at least two cells and one hop (bytes={bytes}, hops={hops})")]
    InvalidProbe { tier: Tier, bytes: usize, hops: u64 },
}

impl CalibrationError {
    pub fn tier(&self) -> Tier {
        match self {
            CalibrationError::Alloc { tier, .. } | CalibrationError::InvalidProbe { tier, .. } => {
                *tier
            }
        }
    }
}
