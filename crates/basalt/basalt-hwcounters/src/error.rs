use crate::CounterKind;

#[derive(Debug, thiserror::Error)]
pub enum HwCounterError {
    #[error("perf_event_open failed for {kind} counter")]
    Open {
        kind: CounterKind,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read {kind} counter")]
    Read {
        kind: CounterKind,
        #[source]
        source: std::io::Error,
    },

    #[error("{op} ioctl failed on {kind} counter")]
    Ioctl {
        op: &'static str,
        kind: CounterKind,
        #[source]
        source: std::io::Error,
    },

    #[error("hardware counters are not supported on this platform")]
    Unsupported,
}
