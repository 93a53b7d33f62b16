//! In-process instrumentation: per-call-site cycle, time, outcome and cache
//! tier statistics.
//!
//! ```no_run
//! use basalt_config::ProfilerConfig;
//! use basalt_profiler::{Profiler, callsite};
//!
//! let profiler = Profiler::init(&ProfilerConfig::default());
//! {
//!     let scope = profiler.enter_site(&callsite!());
//!     // ... work ...
//!     scope.success();
//! }
//! profiler.end();
//! profiler.print_all();
//! ```

pub mod cache;
pub mod calibrate;
mod error;
pub mod event;
pub mod host;
mod profiler;
pub mod report;
pub mod slot;
pub mod stats;
pub mod table;

pub use cache::{CacheClassifier, ClassifierMode, TierThresholds};
pub use calibrate::CacheLatencyProfile;
pub use error::{CalibrationError, ProfilerError};
pub use event::{OutputKind, QueryValue, StatEvent};
pub use host::HostInfo;
pub use profiler::{CacheScope, CallSite, Profiler, Scope, enclosing_function};
pub use report::{Report, SlotSnapshot};
pub use slot::{CAPACITY, MAX_USER_SLOTS, RESERVED_SLOTS, SlotHeader, SlotId};
pub use stats::{CacheStat, CallStat, CpuStat, Tier, TimeStat};
pub use table::StatTable;
