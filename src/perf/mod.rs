//! Interfaces that deal with the userspace perf utilities and the machine they run on.

use lazy_static::lazy_static;
use regex::Regex;

mod probe;
pub use probe::{FixedCapabilities, PerfTool};

lazy_static! {
    /// Name of the mesh PMU device advertising the `watchpoint_up` event, e.g. `arm_cmn_0`.
    static ref CMN_DEVICE: Regex = Regex::new(r"^\s*([^/\s]+)/watchpoint_up").unwrap();
}

/// Facts about the machine that the event catalog needs when rendering `perf` expressions.
///
/// Implemented by [`PerfTool`] for a live system and by [`FixedCapabilities`] when the facts are
/// known in advance.
pub trait Capabilities {
    /// Output of `perf list`.
    fn event_listing(&self) -> &str;

    /// Number of populated CPU sockets.
    fn socket_count(&self) -> crate::Result<usize>;

    /// Is the `arm_cmn` mesh PMU driver loaded?
    fn has_cmn_driver(&self) -> bool {
        self.event_listing().contains("arm_cmn")
    }

    /// Does `perf` know the symbolic event `name`?
    fn supports_event(&self, name: &str) -> bool {
        if name.is_empty() {
            return false;
        }
        Regex::new(&format!(r"\b{}\b", regex::escape(name)))
            .map(|re| re.is_match(self.event_listing()))
            .unwrap_or(false)
    }

    /// Mesh PMU device names in socket order.
    fn cmn_devices(&self) -> Vec<String> {
        self.event_listing()
            .lines()
            .filter(|l| l.contains("watchpoint_up"))
            .filter_map(|l| match CMN_DEVICE.captures(l) {
                Some(c) => Some(c[1].to_string()),
                None => l.split('/').next().map(|x| x.trim().to_string()),
            })
            .filter(|x| !x.is_empty())
            .collect()
    }
}
