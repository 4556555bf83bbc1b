//! Turns raw `perf stat` captures into metric tables.
//!
//! A run reshapes every capture into one row per interval, joins the reshaped tables, evaluates
//! the metrics of the event list over each row, and finally averages every column:
//!
//! ```no_run
//! use pmu_metrics::postprocess::Postprocess;
//!
//! let report = Postprocess::build()
//!     .event_list("events.txt")
//!     .input("results/core_pmu.csv")
//!     .input("results/cmn_pmu.csv")
//!     .output("results/metrics.csv")
//!     .cpus(32)
//!     .duration(10.0)
//!     .run()?;
//! println!("{} samples", report.samples);
//! # Ok::<(), pmu_metrics::Error>(())
//! ```

use crate::pmu::{Constants, EventCatalog, MetricEvaluator, MetricSet, Section};
use crate::{Error, Result};
use log::{debug, info, warn};
use std::fs::File;
use std::path::{Path, PathBuf};

pub mod average;
pub use average::SummaryRow;

pub mod join;

mod reshape;
pub use reshape::{Layout, SampleReshaper};

/// Name of the averages table written next to the metrics table.
pub const AVERAGES_FILE: &str = "metrics.average.csv";

/// Number of CPUs in a list such as `0-3,8,10-11`.
pub fn count_cpus(list: &str) -> Result<usize> {
    let mut count = 0;
    for part in list.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let mut range = part.splitn(2, '-');
        let start = range.next().unwrap_or(part).trim().parse::<usize>()?;
        count += match range.next() {
            Some(end) => end.trim().parse::<usize>()?.saturating_sub(start) + 1,
            None => 1,
        };
    }
    Ok(count)
}

/// PMU a capture was taken from, guessed from its file name (`cmn_pmu.csv` or `core_pmu.csv`).
fn section_of(path: &Path) -> Section {
    let is_cmn = path
        .file_name()
        .and_then(|x| x.to_str())
        .map(|x| x.contains("cmn"))
        .unwrap_or(false);
    if is_cmn {
        Section::Cmn
    } else {
        Section::Core
    }
}

/// Files produced by a run.
#[derive(Debug, Clone)]
pub struct Report {
    /// Per-interval metrics table.
    pub metrics: PathBuf,
    /// Averages table.
    pub averages: PathBuf,
    /// Number of intervals in the metrics table.
    pub samples: usize,
    /// Contents of the averages table.
    pub summary: Vec<SummaryRow>,
}

/// Builder configuring a post-processing run.
#[derive(Debug, Clone)]
pub struct Postprocess {
    /// Event list holding the event and metric sections.
    event_list: PathBuf,
    /// Captures and the PMU each was taken from.
    inputs: Vec<(PathBuf, Section)>,
    /// Metrics table to write.
    ///
    /// Intermediate tables and the averages table are written to the same directory.
    output: PathBuf,
    /// Number of CPUs sampled.
    ///
    /// Defaults to `80`.
    cpus: usize,
    /// Duration of the capture in seconds.
    ///
    /// Defaults to `0`.
    duration: f64,
    /// Core captures were taken with `--per-socket`.
    ///
    /// Defaults to `false`.
    persocket: bool,
    /// Keep intermediate tables.
    ///
    /// Defaults to `false`.
    debug: bool,
}

impl Default for Postprocess {
    fn default() -> Self {
        Postprocess {
            event_list: PathBuf::from("events.txt"),
            inputs: vec![],
            output: PathBuf::from("metrics.csv"),
            cpus: 80,
            duration: 0.0,
            persocket: false,
            debug: false,
        }
    }
}

macro_rules! builder_pattern {
    ($(#[$outer:meta])* $var_name: ident : $var_type: ty) => {
        builder_pattern!($(#[$outer])* $var_name => $var_name: $var_type);
    };
    ($(#[$outer:meta])* $name: ident => $var_name: ident : $var_type: ty) => {
        $(#[$outer])*
        pub fn $name(mut self, $var_name: $var_type) -> Self {
            self.$var_name = $var_name;
            self
        }
    };
}

macro_rules! builder_pattern_bool {
    ($(#[$outer:meta])* $var_name: ident) => {
        builder_pattern_bool!($(#[$outer])* $var_name => $var_name);
    };
    ($(#[$outer:meta])* $name: ident => $var_name: ident) => {
        $(#[$outer])*
        pub fn $name(mut self) -> Self {
            self.$var_name = true;
            self
        }
    };
}

impl Postprocess {
    /// Start configuring a run.
    pub fn build() -> Self {
        Postprocess::default()
    }

    /// Path of the event list.
    pub fn event_list<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.event_list = path.as_ref().to_path_buf();
        self
    }

    /// Add a capture, guessing its PMU from the file name.
    pub fn input<P: AsRef<Path>>(self, path: P) -> Self {
        let section = section_of(path.as_ref());
        self.input_for(path, section)
    }

    /// Add a capture of the `section` PMU.
    pub fn input_for<P: AsRef<Path>>(mut self, path: P, section: Section) -> Self {
        self.inputs.push((path.as_ref().to_path_buf(), section));
        self
    }

    /// Path of the metrics table.
    pub fn output<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.output = path.as_ref().to_path_buf();
        self
    }

    /// Number of CPUs from a list such as `0-79`.
    pub fn cpu_list(self, list: &str) -> Result<Self> {
        Ok(self.cpus(count_cpus(list)?))
    }

    builder_pattern!(
        /// Number of CPUs sampled.
        cpus: usize
    );
    builder_pattern!(
        /// Duration of the capture in seconds.
        duration: f64
    );
    builder_pattern_bool!(
        /// Core captures were taken with `--per-socket`.
        persocket
    );
    builder_pattern_bool!(
        /// Keep intermediate tables.
        debug
    );

    /// Directory receiving intermediate tables and averages.
    fn result_dir(&self) -> PathBuf {
        match self.output.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }

    /// Execute the run.
    pub fn run(self) -> Result<Report> {
        info!("eventfile used: {}", self.event_list.display());
        let catalog = EventCatalog::from_file(&self.event_list)?;
        let metrics = MetricSet::from_file(&self.event_list)?;
        debug!(
            "{} events in {} groups, {} metrics",
            catalog.len(),
            catalog.group_count(),
            metrics.len()
        );
        let resdir = self.result_dir();
        info!("results directory: {}", resdir.display());

        let mut reshaped = vec![];
        let mut persocket = false;
        for (i, (path, section)) in self.inputs.iter().enumerate() {
            if !path.is_file() {
                warn!("Skipping missing capture {}", path.display());
                continue;
            }
            let layout = if self.persocket && *section == Section::Core {
                persocket = true;
                Layout::PerSocket
            } else {
                Layout::Aggregate
            };
            debug!("{} uses layout {:?}", path.display(), layout);
            let tmp = resdir.join(format!("tmp{}.csv", i));
            SampleReshaper::new(&catalog, *section, layout).reshape_file(path, &tmp)?;
            reshaped.push(tmp);
        }

        let joined = match reshaped.len() {
            0 => {
                let names: Vec<String> = self
                    .inputs
                    .iter()
                    .map(|(p, _)| p.display().to_string())
                    .collect();
                return Err(Error::MissingInput(names.join(", ")));
            }
            1 => reshaped[0].clone(),
            _ => {
                debug!("joining tmp files");
                let tmp = resdir.join("tmp.csv");
                join::join_files(&reshaped, &tmp)?;
                tmp
            }
        };

        info!("cores: {}", self.cpus);
        let constants = Constants::default()
            .with_cpus(self.cpus)
            .with_wall_clock_time(self.duration);
        let samples = MetricEvaluator::process(
            &catalog,
            &constants,
            &metrics,
            persocket,
            File::open(&joined)?,
            File::create(&self.output)?,
        )?;

        if !self.debug {
            for tmp in reshaped.iter().chain(Some(&joined)) {
                if tmp.exists() {
                    std::fs::remove_file(tmp)?;
                }
            }
        }

        let averages = resdir.join(AVERAGES_FILE);
        let summary = average::average_file(&self.output, &averages)?;
        Ok(Report {
            metrics: self.output,
            averages,
            samples,
            summary,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    /// Fresh scratch directory for one test.
    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("pmu-metrics-{}-{}", name, std::process::id()));
        if dir.exists() {
            std::fs::remove_dir_all(&dir).unwrap();
        }
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn write(path: &Path, contents: &str) {
        let mut f = File::create(path).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
    }

    #[test]
    fn test_count_cpus() {
        assert_eq!(count_cpus("0-3,8").unwrap(), 5);
        assert_eq!(count_cpus("0-79").unwrap(), 80);
        assert_eq!(count_cpus("4").unwrap(), 1);
        assert!(count_cpus("a-b").is_err());
    }

    #[test]
    fn test_section_of() {
        assert_eq!(section_of(Path::new("out/cmn_pmu.csv")), Section::Cmn);
        assert_eq!(section_of(Path::new("out/core_pmu.csv")), Section::Core);
    }

    #[test]
    fn test_run_single_capture() {
        let dir = scratch_dir("single");
        write(
            &dir.join("events.txt"),
            "events_core\ncycles\n;\nrate = [cycles] / [const_sampletime]\n",
        );
        write(
            &dir.join("core_pmu.csv"),
            "# started on Mon Jan  6 10:00:00 2025\n\n\
             1.000123,100,,cycles,8000,100.00,,\n\
             2.000456,200,,cycles,8000,100.00,,\n",
        );

        let report = Postprocess::build()
            .event_list(dir.join("events.txt"))
            .input(dir.join("core_pmu.csv"))
            .output(dir.join("metrics.csv"))
            .cpus(4)
            .duration(2.0)
            .run()
            .unwrap();

        assert_eq!(report.samples, 2);
        assert_eq!(
            std::fs::read_to_string(&report.metrics).unwrap(),
            "time,rate,cycles\n1,100.0000,100\n2,200.0000,200\n"
        );
        assert_eq!(
            std::fs::read_to_string(&report.averages).unwrap(),
            "rate,150.0000\ncycles,150.0000\n"
        );
        assert!(!dir.join("tmp0.csv").exists());
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_run_joined_per_socket() {
        let dir = scratch_dir("joined");
        write(
            &dir.join("events.txt"),
            "events_core\nx\nevents_cmn\nARM_CMN_0/hnf_miss/\n;\n\
             m = [x]\n\
             # uncore_metrics\n\
             miss = [arm_cmn_0/hnf_miss/] * [const_cpus]\n",
        );
        write(
            &dir.join("core_pmu.csv"),
            "1.0,S0,40,5,,x,,\n1.0,S1,40,7,,x,,\n2.0,S0,40,6,,x,,\n2.0,S1,40,8,,x,,\n",
        );
        write(
            &dir.join("cmn_pmu.csv"),
            "1.0,3,,arm_cmn_0/hnf_miss/,,\n2.0,4,,arm_cmn_0/hnf_miss/,,\n",
        );

        let report = Postprocess::build()
            .event_list(dir.join("events.txt"))
            .input(dir.join("core_pmu.csv"))
            .input(dir.join("cmn_pmu.csv"))
            .input(dir.join("missing.csv"))
            .output(dir.join("metrics.csv"))
            .cpus(2)
            .persocket()
            .debug()
            .run()
            .unwrap();

        let metrics = std::fs::read_to_string(&report.metrics).unwrap();
        let mut lines = metrics.lines();
        assert_eq!(
            lines.next().unwrap(),
            "time,s0.m,miss,s1.m,s0.x,s1.x,arm_cmn_0/hnf_miss/"
        );
        assert_eq!(lines.next().unwrap(), "1,5.0000,6.0000,7.0000,5,7,3");
        assert!(dir.join("tmp.csv").exists());
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_run_without_captures() {
        let dir = scratch_dir("nocapture");
        write(&dir.join("events.txt"), "events_core\ncycles\n;\n");
        let res = Postprocess::build()
            .event_list(dir.join("events.txt"))
            .input(dir.join("core_pmu.csv"))
            .output(dir.join("metrics.csv"))
            .run();
        match res {
            Err(Error::MissingInput(_)) => {}
            x => panic!("unexpected result {:?}", x),
        }
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
