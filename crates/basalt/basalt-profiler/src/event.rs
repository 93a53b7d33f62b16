// Typed events folded into the slot tables, and the derived values that can
// be read back out. Both carry a stable u8 tag so callers holding a raw tag
// (FFI shims, replayed traces) can go through TryFrom and get an error for
// anything unknown instead of silently touching a table.

use crate::ProfilerError;

#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StatEvent {
    CyclesTotal = 0,
    CyclesMin = 1,
    CyclesMax = 2,

    TimeTotal = 3,
    TimeMin = 4,
    TimeMax = 5,

    CallTotal = 6,
    CallEarlyReturn = 7,
    CallSuccess = 8,
    CallFailure = 9,

    /// Elapsed cycles of a memory access region, handed to the classifier.
    CacheAccess = 10,
}

impl StatEvent {
    pub const ALL: [StatEvent; 11] = [
        StatEvent::CyclesTotal,
        StatEvent::CyclesMin,
        StatEvent::CyclesMax,
        StatEvent::TimeTotal,
        StatEvent::TimeMin,
        StatEvent::TimeMax,
        StatEvent::CallTotal,
        StatEvent::CallEarlyReturn,
        StatEvent::CallSuccess,
        StatEvent::CallFailure,
        StatEvent::CacheAccess,
    ];
}

impl TryFrom<u8> for StatEvent {
    type Error = ProfilerError;

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        StatEvent::ALL
            .get(tag as usize)
            .copied()
            .ok_or(ProfilerError::UnknownEvent(tag))
    }
}

#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OutputKind {
    CyclesAvg = 0,
    TimeAvg = 1,
    L1Misses = 2,
    L2Misses = 3,
    L3Misses = 4,
}

impl OutputKind {
    pub const ALL: [OutputKind; 5] = [
        OutputKind::CyclesAvg,
        OutputKind::TimeAvg,
        OutputKind::L1Misses,
        OutputKind::L2Misses,
        OutputKind::L3Misses,
    ];
}

impl TryFrom<u8> for OutputKind {
    type Error = ProfilerError;

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        OutputKind::ALL
            .get(tag as usize)
            .copied()
            .ok_or(ProfilerError::UnknownOutput(tag))
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum QueryValue {
    Count(u64),
    Average(f64),
    /// Average over zero calls, an unregistered slot, or an unknown kind.
    Undefined,
}

impl QueryValue {
    /// Numeric view with `Undefined` mapped to zero.
    pub fn as_f64(self) -> f64 {
        match self {
            QueryValue::Count(n) => n as f64,
            QueryValue::Average(v) => v,
            QueryValue::Undefined => 0.0,
        }
    }

    pub fn is_defined(self) -> bool {
        !matches!(self, QueryValue::Undefined)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_match_discriminants() {
        for event in StatEvent::ALL {
            assert_eq!(StatEvent::try_from(event as u8), Ok(event));
        }
        for kind in OutputKind::ALL {
            assert_eq!(OutputKind::try_from(kind as u8), Ok(kind));
        }
    }

    #[test]
    fn unknown_tags_are_errors() {
        assert_eq!(StatEvent::try_from(11), Err(ProfilerError::UnknownEvent(11)));
        assert_eq!(OutputKind::try_from(200), Err(ProfilerError::UnknownOutput(200)));
    }

    #[test]
    fn undefined_reads_as_zero() {
        assert_eq!(QueryValue::Undefined.as_f64(), 0.0);
        assert!(!QueryValue::Undefined.is_defined());
        assert_eq!(QueryValue::Count(3).as_f64(), 3.0);
    }
}
