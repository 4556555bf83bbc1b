//! Utilities to turn interval samples of the linux `perf` tool into microarchitectural metrics.
//!
//! An event list declares the counters to sample, grouped the way `perf` should schedule them,
//! followed by the metrics to derive from them:
//!
//! ```text
//! events_core
//! cycles|r11
//! {
//! inst_retired|r08
//! stall_backend|r24
//! }
//! events_cmn
//! ARM_CMN_0/hnf_cache_miss/
//! ;
//! ipc = [inst_retired] / [cycles]
//! # uncore_metrics
//! hnf_miss_rate = [ARM_CMN_0/hnf_cache_miss/] / [const_sampletime]
//! ```
//!
//! [`pmu::EventCatalog`] renders the event section as `perf stat -e` arguments, and
//! [`postprocess::Postprocess`] turns the resulting captures into a metrics table and its averages.

#![deny(missing_docs, missing_debug_implementations)]

mod errors;
pub use errors::{Error, Result};

pub mod perf;
pub use perf::{Capabilities, FixedCapabilities, PerfTool};

pub mod pmu;

pub mod postprocess;

pub(crate) mod util;
