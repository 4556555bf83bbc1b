use crate::perf::Capabilities;
use crate::util::normalize_name;
use log::{debug, warn};

/// Prefix of events counted by the mesh interconnect PMU.
pub const CMN_PREFIX: &str = "ARM_CMN";

/// Placeholder replaced by the mesh PMU device of socket 0.
pub const CMN_SOCKET0: &str = "ARM_CMN_0";

/// Placeholder replaced by the mesh PMU device of socket 1.
pub const CMN_SOCKET1: &str = "ARM_CMN_1";

/// The PMU an event is counted on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Section {
    /// Per-core PMU events, e.g. `cycles`.
    Core,
    /// Uncore events of the coherent mesh network, e.g. `ARM_CMN_0/hnf_cache_miss/`.
    Cmn,
}

impl Section {
    /// Classify an event by its declared name.
    pub fn of(name: &str) -> Self {
        if name.starts_with(CMN_PREFIX) {
            Section::Cmn
        } else {
            Section::Core
        }
    }
}

/// A counter declared in the event list.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    /// Name as declared.
    pub name: String,
    /// Raw hex code, e.g. `r11`, used when `perf` does not know `name`.
    pub code: Option<String>,
    /// Id of the group open when this event was declared.
    pub group: usize,
    /// PMU counting this event.
    pub section: Section,
    /// First event after a `{`.
    pub(crate) opens_group: bool,
    /// Last event before a `}`.
    pub(crate) closes_group: bool,
}

impl Event {
    /// Parse a `name[|hexcode]` declaration.
    ///
    /// Returns `None`, after logging, for lines that do not form a valid declaration.
    pub fn from_line(line: &str, group: usize) -> Option<Self> {
        let fields: Vec<&str> = line.split('|').map(str::trim).collect();
        if fields.len() > 2 {
            warn!("Skipping event declaration with extra fields -- {}", line);
            return None;
        }
        let name = fields[0];
        if name.is_empty() || name.contains(char::is_whitespace) {
            warn!("Skipping malformed event declaration -- {}", line);
            return None;
        }
        let code = fields
            .get(1)
            .filter(|c| !c.is_empty())
            .map(|c| String::from(*c));
        Some(Event {
            name: name.to_string(),
            code,
            group,
            section: Section::of(name),
            opens_group: false,
            closes_group: false,
        })
    }

    /// Name usable as a formula token.
    pub fn normalized_name(&self) -> String {
        normalize_name(&self.name)
    }

    /// Name without modifiers, i.e. `l1d_cache` for `l1d_cache:k`.
    pub fn base_name(&self) -> &str {
        self.name.split(':').next().unwrap_or(&self.name)
    }

    /// Get string for the perf command line tool from this event.
    ///
    /// Core events unknown to the running `perf` fall back to their raw code when one was declared.
    pub fn to_perf_string(&self, caps: &dyn Capabilities) -> String {
        let name = match (&self.section, &self.code) {
            (Section::Core, Some(code)) if !caps.supports_event(self.base_name()) => {
                debug!("{} not known to perf, using {}", self.name, code);
                code.clone()
            }
            _ => self.name.clone(),
        };
        format!(
            "{}{}{}",
            if self.opens_group { "{" } else { "" },
            name,
            if self.closes_group { "}" } else { "" }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::perf::FixedCapabilities;

    #[test]
    fn test_event_from_line() {
        let evt = Event::from_line("l1d_cache:k | r04", 3).unwrap();
        assert_eq!(evt.name, "l1d_cache:k");
        assert_eq!(evt.code.as_deref(), Some("r04"));
        assert_eq!(evt.group, 3);
        assert_eq!(evt.section, Section::Core);
        assert_eq!(evt.normalized_name(), "l1d_cache_k");
        assert_eq!(evt.base_name(), "l1d_cache");

        let evt = Event::from_line("ARM_CMN_0/hnf_cache_miss/", 0).unwrap();
        assert_eq!(evt.section, Section::Cmn);
        assert!(evt.code.is_none());

        assert!(Event::from_line("|r11", 0).is_none());
        assert!(Event::from_line("a|r1|r2", 0).is_none());
        assert!(Event::from_line("two words", 0).is_none());
    }

    #[test]
    fn test_hex_fallback() {
        let caps = FixedCapabilities::new("  cycles  [Hardware event]\n", 1);
        let known = Event::from_line("cycles|r11", 0).unwrap();
        let unknown = Event::from_line("stall_slot|r3f", 0).unwrap();
        let no_code = Event::from_line("stall_slot", 0).unwrap();
        assert_eq!(known.to_perf_string(&caps), "cycles");
        assert_eq!(unknown.to_perf_string(&caps), "r3f");
        assert_eq!(no_code.to_perf_string(&caps), "stall_slot");
    }
}
