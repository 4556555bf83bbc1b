use crate::pmu::{Event, EventCatalog, Section};
use crate::util::{is_raw_code, round_to};
use crate::Result;
use log::{debug, warn};
use std::collections::HashMap;
use std::fs::File;
use std::io;
use std::path::Path;

/// Column layout of a `perf stat -I <ms> -x,` capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    /// `time,value,unit,event,...`
    Aggregate,
    /// `time,socket,cpus,value,unit,event,...`, written with `--per-socket`.
    PerSocket,
}

impl Layout {
    /// Column holding the counter value.
    pub fn value_column(self) -> usize {
        match self {
            Layout::Aggregate => 1,
            Layout::PerSocket => 3,
        }
    }

    /// Column holding the event name or raw code.
    pub fn event_column(self) -> usize {
        match self {
            Layout::Aggregate => 3,
            Layout::PerSocket => 5,
        }
    }

    /// Column holding the socket identifier, e.g. `S0`.
    pub fn socket_column(self) -> Option<usize> {
        match self {
            Layout::Aggregate => None,
            Layout::PerSocket => Some(1),
        }
    }
}

/// Transposes a capture with one record per counter and interval into a table with one row per
/// interval and one column per counter.
#[derive(Debug)]
pub struct SampleReshaper<'a> {
    /// Events of the captured PMU, used to name counters `perf` reported by raw code.
    events: Vec<&'a Event>,
    layout: Layout,
}

/// Row being accumulated for one timestamp.
struct Pending {
    time: f64,
    values: Vec<f64>,
}

impl<'a> SampleReshaper<'a> {
    /// Create a reshaper for a capture of the `section` PMU.
    pub fn new(catalog: &'a EventCatalog, section: Section, layout: Layout) -> Self {
        SampleReshaper {
            events: catalog.section_events(section),
            layout,
        }
    }

    /// Reshape the capture at `input` into `output`.
    pub fn reshape_file(&self, input: &Path, output: &Path) -> Result<usize> {
        debug!(
            "processing stats with {} input and output {}",
            input.display(),
            output.display()
        );
        self.reshape(File::open(input)?, File::create(output)?)
    }

    /// Reshape the capture read from `reader` into `writer`.
    ///
    /// The header is `time` followed by the counters of the first interval, prefixed with `sN.` in
    /// per-socket mode. Returns the number of rows written, excluding the header.
    pub fn reshape<R: io::Read, W: io::Write>(&self, reader: R, writer: W) -> Result<usize> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .comment(Some(b'#'))
            .from_reader(reader);
        let mut writer = csv::Writer::from_writer(writer);

        let mut header = vec![String::from("time")];
        let mut header_done = false;
        let mut sockets: Vec<String> = vec![];
        let mut running: HashMap<usize, usize> = HashMap::new();
        let mut pending: Option<Pending> = None;
        let mut rows = 0;

        for record in reader.records() {
            let record = record?;
            let field = |i: usize| record.get(i).map(str::trim).unwrap_or("");
            let stat = field(self.layout.event_column());
            let val = field(self.layout.value_column());
            if stat.is_empty() || val.is_empty() {
                continue;
            }

            let time = match field(0).parse::<f64>() {
                Ok(t) => round_to(t, 2),
                Err(e) => {
                    warn!("Skipping record with malformed timestamp {:?} -- {}", field(0), e);
                    continue;
                }
            };

            let socket = match self.layout.socket_column().map(field) {
                Some(s) => match sockets.iter().position(|x| x == s) {
                    Some(i) => Some(i),
                    None => {
                        sockets.push(s.to_string());
                        Some(sockets.len() - 1)
                    }
                },
                None => None,
            };

            if pending.as_ref().map(|p| p.time) != Some(time) {
                if let Some(row) = pending.take() {
                    rows += self.flush(&mut writer, &header, &mut header_done, row)?;
                }
                pending = Some(Pending {
                    time,
                    values: vec![],
                });
                running.clear();
            }

            let index = running.entry(socket.unwrap_or(0)).or_insert(0);
            if !header_done {
                let name = self.counter_name(stat, *index);
                header.push(match socket {
                    Some(s) => format!("s{}.{}", s, name),
                    None => name,
                });
            }
            *index += 1;

            if let Some(ref mut row) = pending {
                // `<not counted>` and `<not supported>` keep their column as zero
                row.values.push(val.parse().unwrap_or(0.0));
            }
        }
        if let Some(row) = pending.take() {
            rows += self.flush(&mut writer, &header, &mut header_done, row)?;
        }
        writer.flush()?;
        Ok(rows)
    }

    /// Name of the counter `perf` reported as `stat` at position `index` of an interval.
    fn counter_name(&self, stat: &str, index: usize) -> String {
        if !is_raw_code(stat) {
            return stat.to_string();
        }
        match self.events.get(index) {
            Some(evt) => {
                debug!("{} is reported as {}", evt.name, stat);
                evt.name.clone()
            }
            None => {
                warn!("No event declared at position {} for {}", index, stat);
                stat.to_string()
            }
        }
    }

    /// Write the header on the first call and then `row`, sized to the header.
    fn flush<W: io::Write>(
        &self,
        writer: &mut csv::Writer<W>,
        header: &[String],
        header_done: &mut bool,
        row: Pending,
    ) -> Result<usize> {
        if !*header_done {
            writer.write_record(header)?;
            *header_done = true;
        }
        let width = header.len() - 1;
        if row.values.len() != width {
            warn!(
                "Interval {} has {} counters, expected {}",
                row.time,
                row.values.len(),
                width
            );
        }
        let mut out = vec![row.time.to_string()];
        out.extend(row.values.iter().map(f64::to_string));
        out.resize(header.len(), String::from("0"));
        writer.write_record(&out)?;
        Ok(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EVENTS: &str = "\
events_core
cycles|r11
{
inst_retired|r08
stall_backend|r24
}
";

    fn reshape(input: &str, layout: Layout) -> (usize, String) {
        let catalog = EventCatalog::parse(EVENTS);
        let reshaper = SampleReshaper::new(&catalog, Section::Core, layout);
        let mut out = vec![];
        let rows = reshaper.reshape(input.as_bytes(), &mut out).unwrap();
        (rows, String::from_utf8(out).unwrap())
    }

    #[test]
    fn test_reshape_aggregate() {
        let input = "\
# started on Mon Jan  6 10:00:00 2025

     1.000501232,100,,cycles,8000,100.00,,
     1.000501232,50,,inst_retired,8000,100.00,,
     1.000501232,<not counted>,,r24,0,100.00,,
     2.001102345,300,,cycles,8000,100.00,,
     2.001102345,70,,inst_retired,8000,100.00,,
     2.001102345,9,,r24,0,100.00,,
     3.001702345,500,,cycles,8000,100.00,,
     3.001702345,90,,inst_retired,8000,100.00,,
     3.001702345,11,,r24,0,100.00,,
";
        let (rows, out) = reshape(input, Layout::Aggregate);
        assert_eq!(rows, 3);
        assert_eq!(
            out,
            "time,cycles,inst_retired,stall_backend\n1,100,50,0\n2,300,70,9\n3,500,90,11\n"
        );
    }

    #[test]
    fn test_reshape_per_socket() {
        let input = "\
1.00,S0,40,10,,cycles,,
1.00,S1,40,20,,cycles,,
1.00,S0,40,3,,r08,,
1.00,S1,40,4,,r08,,
2.00,S0,40,11,,cycles,,
2.00,S1,40,21,,cycles,,
2.00,S0,40,5,,r08,,
2.00,S1,40,6,,r08,,
";
        let (rows, out) = reshape(input, Layout::PerSocket);
        assert_eq!(rows, 2);
        assert_eq!(
            out,
            "time,s0.cycles,s1.cycles,s0.inst_retired,s1.inst_retired\n\
             1,10,20,3,4\n\
             2,11,21,5,6\n"
        );
    }

    #[test]
    fn test_reshape_skips_bad_timestamps() {
        let input = "\
1.0,100,,cycles,,
oops,1,,cycles,,
2.0,200,,cycles,,
2.0,,,inst_retired,,
";
        let (rows, out) = reshape(input, Layout::Aggregate);
        assert_eq!(rows, 2);
        assert_eq!(out, "time,cycles\n1,100\n2,200\n");
    }

    #[test]
    fn test_reshape_keeps_timestamp_order() {
        let input = "0.5,1,,cycles,,\n0.25,2,,cycles,,\n0.75,3,,cycles,,\n";
        let (rows, out) = reshape(input, Layout::Aggregate);
        assert_eq!(rows, 3);
        assert_eq!(out, "time,cycles\n0.5,1\n0.25,2\n0.75,3\n");
    }

    #[test]
    fn test_reshape_empty() {
        let (rows, out) = reshape("# started on Mon Jan  6 10:00:00 2025\n", Layout::Aggregate);
        assert_eq!(rows, 0);
        assert!(out.is_empty());
    }
}
