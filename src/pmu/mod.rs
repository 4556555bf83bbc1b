//! Utilities to read PMU event lists and derive metrics from counter samples.

use crate::perf::Capabilities;
use crate::{Error, Result};
use derive_more::{Index, IntoIterator};
use log::debug;
use std::path::Path;

mod events;
pub use events::{Event, Section, CMN_PREFIX, CMN_SOCKET0, CMN_SOCKET1};

mod expr;
pub use expr::{MetricExpr, Rule};

mod metrics;
pub use metrics::{Constants, MetricDefinition, MetricEvaluator, MetricSet, SAMPLE_TIME};

/// `perf stat -e` arguments for the two PMUs of an event list.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct PerfExpressions {
    /// Core PMU events, e.g. `{cycles,instructions},r11`.
    pub core: String,
    /// Mesh PMU events with the placeholders replaced by device names.
    pub cmn: String,
}

/// Counters declared by an event list, in declaration order, with their sampling groups.
#[derive(Default, Debug, Index, IntoIterator)]
pub struct EventCatalog {
    /// Where the event list was read from.
    pub source: String,
    /// Declared events.
    #[index]
    #[into_iterator(owned, ref)]
    pub events: Vec<Event>,
    /// Normalized member names of each group, indexed by group id.
    groups: Vec<Vec<String>>,
}

impl EventCatalog {
    /// Load an event list from `path`.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(Error::MissingInput(path.display().to_string()));
        }
        let text = std::fs::read_to_string(path)?;
        let mut catalog = EventCatalog::parse(&text);
        catalog.source = path.display().to_string();
        Ok(catalog)
    }

    /// Parse the event section of an event list.
    ///
    /// Parsing stops at the first `;`; what follows is the metric section read by [`MetricSet`].
    pub fn parse(text: &str) -> Self {
        let mut catalog = EventCatalog::default();
        let mut section: Option<Section> = None;
        let mut group_id = 0;
        let mut open_group = false;

        for line in text.lines().map(str::trim) {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if line.starts_with(';') {
                break;
            }
            match line {
                "events_core" => section = Some(Section::Core),
                "events_cmn" => section = Some(Section::Cmn),
                "{" => open_group = true,
                l if l.starts_with('}') => {
                    let opened = catalog
                        .events
                        .iter()
                        .rev()
                        .take_while(|e| e.group == group_id)
                        .any(|e| e.opens_group);
                    if opened {
                        if let Some(last) = catalog.events.last_mut() {
                            last.closes_group = true;
                        }
                    }
                    catalog.ensure_group(group_id);
                    debug!("new group with id: {}", group_id + 1);
                    group_id += 1;
                    open_group = false;
                }
                l if section.is_none() => debug!("Ignoring line outside of a section -- {}", l),
                l => {
                    if let Some(mut evt) = Event::from_line(l, group_id) {
                        evt.opens_group = open_group;
                        open_group = false;
                        catalog.ensure_group(group_id);
                        catalog.groups[group_id].push(evt.normalized_name());
                        catalog.events.push(evt);
                    }
                }
            }
        }
        catalog
    }

    fn ensure_group(&mut self, id: usize) {
        if self.groups.len() <= id {
            self.groups.resize_with(id + 1, Vec::new);
        }
    }

    /// Number of declared events.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Does the catalog declare no events?
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Number of groups.
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// Normalized member names of group `id`.
    pub fn group(&self, id: usize) -> Option<&[String]> {
        self.groups.get(id).map(Vec::as_slice)
    }

    /// Ids of all groups containing the event with normalized name `name`.
    pub fn groups_of(&self, name: &str) -> Vec<usize> {
        self.groups
            .iter()
            .enumerate()
            .filter(|(_, members)| members.iter().any(|m| m == name))
            .map(|(id, _)| id)
            .collect()
    }

    /// Column of `name` within the sampled counters when it was counted in group `group`.
    ///
    /// Groups are laid out contiguously in id order.
    pub fn column_in_group(&self, name: &str, group: usize) -> Option<usize> {
        let members = self.groups.get(group)?;
        let offset: usize = self.groups[..group].iter().map(Vec::len).sum();
        members.iter().position(|m| m == name).map(|i| offset + i)
    }

    /// Events counted on `section`, in declaration order.
    pub fn section_events(&self, section: Section) -> Vec<&Event> {
        self.events.iter().filter(|e| e.section == section).collect()
    }

    /// Render the event list as `perf stat -e` expressions.
    pub fn perf_expressions(&self, caps: &dyn Capabilities) -> Result<PerfExpressions> {
        let core: Vec<String> = self
            .section_events(Section::Core)
            .iter()
            .map(|e| e.to_perf_string(caps))
            .collect();
        let core = core.join(",");
        debug!("core events from eventlist: {}", core);

        let mesh = self.section_events(Section::Cmn);
        if mesh.is_empty() {
            return Ok(PerfExpressions {
                core,
                cmn: String::default(),
            });
        }
        if !caps.has_cmn_driver() {
            return Err(Error::DriverUnavailable(self.source.clone()));
        }
        let (socket0, socket1) = EventCatalog::cmn_device_names(caps)?;
        let cmn = mesh
            .iter()
            .map(|e| {
                e.to_perf_string(caps)
                    .replace(CMN_SOCKET0, &socket0)
                    .replace(CMN_SOCKET1, &socket1)
            })
            .collect::<Vec<String>>()
            .join(",");
        debug!("cmn events from eventlist: {}", cmn);

        Ok(PerfExpressions { core, cmn })
    }

    /// Device names substituted for the socket 0 and socket 1 mesh placeholders.
    fn cmn_device_names(caps: &dyn Capabilities) -> Result<(String, String)> {
        let sockets = caps.socket_count()?;
        let mut devices = caps.cmn_devices().into_iter();
        match sockets {
            1 => match devices.next() {
                Some(d0) => Ok((d0, String::default())),
                None => Err(Error::UnsupportedTopology(sockets)),
            },
            2 => match (devices.next(), devices.next()) {
                (Some(d0), Some(d1)) => Ok((d0, d1)),
                _ => Err(Error::UnsupportedTopology(sockets)),
            },
            n => Err(Error::UnsupportedTopology(n)),
        }
    }
}
