use crate::{CounterKind, HwCounterError};

/// Never constructed: opening always fails off Linux.
pub(crate) enum Counter {}

impl Counter {
    pub(crate) fn open(_kind: CounterKind) -> Result<Self, HwCounterError> {
        Err(HwCounterError::Unsupported)
    }

    pub(crate) fn enable(&mut self) -> Result<(), HwCounterError> {
        match *self {}
    }

    pub(crate) fn disable(&mut self) -> Result<(), HwCounterError> {
        match *self {}
    }

    pub(crate) fn reset(&mut self) -> Result<(), HwCounterError> {
        match *self {}
    }

    pub(crate) fn read(&mut self) -> Result<u64, HwCounterError> {
        match *self {}
    }
}
