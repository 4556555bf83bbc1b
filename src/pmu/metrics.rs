//! Metric formulas and their evaluation over reshaped counter samples.

use crate::pmu::{EventCatalog, MetricExpr};
use crate::util::{normalize_name, round_half_even};
use crate::{Error, Result};
use log::{debug, error, info, warn};
use std::collections::{BTreeMap, HashMap};
use std::io;
use std::path::Path;

/// Constant holding the length of the current sampling interval in seconds.
pub const SAMPLE_TIME: &str = "const_sampletime";

/// Marker flagging every following metric as uncore.
const UNCORE_MARKER: &str = "uncore_metrics";

/// Named numbers that formulas can reference like counters, e.g. `[const_cpus]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Constants {
    values: BTreeMap<String, f64>,
}

impl Default for Constants {
    fn default() -> Self {
        let values = [
            ("const_cpus", 80.0),
            (SAMPLE_TIME, 1.0),
            ("const_width", 4.0),
            ("const_ixu_exec_width", 4.0),
            ("const_fsu_exec_width", 2.0),
            ("const_wall_clock_time", 0.0),
        ]
        .iter()
        .map(|(k, v)| (k.to_string(), *v))
        .collect();
        Constants { values }
    }
}

impl Constants {
    /// Is `token` a constant rather than a counter?
    pub fn is_constant(token: &str) -> bool {
        token.starts_with("const")
    }

    /// Value of constant `name`.
    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.get(name).cloned()
    }

    /// Define or override constant `name`.
    pub fn set(&mut self, name: &str, value: f64) {
        self.values.insert(name.to_string(), value);
    }

    /// Number of CPUs sampled.
    pub fn with_cpus(mut self, cpus: usize) -> Self {
        self.set("const_cpus", cpus as f64);
        self
    }

    /// Duration of the whole capture in seconds.
    pub fn with_wall_clock_time(mut self, seconds: f64) -> Self {
        self.set("const_wall_clock_time", seconds);
        self
    }
}

/// Bracketed tokens of `formula` in order of appearance.
fn formula_tokens(formula: &str) -> Vec<&str> {
    let mut tokens = vec![];
    let mut rest = formula;
    while let Some(start) = rest.find('[') {
        match rest[start..].find(']') {
            Some(len) => {
                tokens.push(rest[start + 1..start + len].trim());
                rest = &rest[start + len + 1..];
            }
            None => break,
        }
    }
    tokens
}

/// Prefix every counter token of `formula` with `prefix`, leaving constants untouched.
fn qualify_formula(formula: &str, prefix: &str) -> String {
    let mut out = String::with_capacity(formula.len() + 8);
    let mut rest = formula;
    while let Some(start) = rest.find('[') {
        let len = match rest[start..].find(']') {
            Some(len) => len,
            None => break,
        };
        let token = rest[start + 1..start + len].trim();
        out.push_str(&rest[..=start]);
        if !Constants::is_constant(token) {
            out.push_str(prefix);
        }
        out.push_str(token);
        out.push(']');
        rest = &rest[start + len + 1..];
    }
    out.push_str(rest);
    out
}

/// Alternate spelling `perf` may use for a counter column, e.g. `l1d_cache:k` for `l1d_cache_k`.
fn compatible_name(token: &str) -> String {
    if token.ends_with("_k") {
        format!("{}:k", &token[..token.len() - 2])
    } else {
        token.replace('_', "-")
    }
}

/// Group id occurring most often across `groups`, preferring the smallest id on ties.
pub(crate) fn winner_group(groups: &[Vec<usize>]) -> Option<usize> {
    let mut counts: BTreeMap<usize, usize> = BTreeMap::new();
    for id in groups.iter().flatten() {
        *counts.entry(*id).or_insert(0) += 1;
    }
    let max = counts.values().cloned().max()?;
    counts
        .into_iter()
        .find(|(_, count)| *count == max)
        .map(|(id, _)| id)
}

/// A named metric and the formula computing it.
#[derive(Debug, Clone)]
pub struct MetricDefinition {
    /// Column name in the metrics output.
    pub name: String,
    /// Formula as written in the event list.
    pub formula: String,
    /// Uncore metrics are system wide and never split per socket.
    pub uncore: bool,
    /// Parsed formula or the reason it could not be parsed.
    expr: std::result::Result<MetricExpr, String>,
}

impl MetricDefinition {
    /// Create a metric, parsing its formula.
    ///
    /// A formula that fails to parse is kept so that its column still appears in the output.
    pub fn new(name: &str, formula: &str, uncore: bool) -> Self {
        let expr = MetricExpr::parse_str(formula).map_err(|e| e.to_string());
        if let Err(ref e) = expr {
            warn!("Could not parse formula of {} -- {}", name, e);
        }
        MetricDefinition {
            name: name.to_string(),
            formula: formula.to_string(),
            uncore,
            expr,
        }
    }

    /// Parse a `name = formula` line.
    pub fn from_line(line: &str, uncore: bool) -> Option<Self> {
        let mut split = line.splitn(2, '=');
        match (split.next().map(str::trim), split.next().map(str::trim)) {
            (Some(name), Some(formula)) if !name.is_empty() && !formula.is_empty() => {
                Some(MetricDefinition::new(name, formula, uncore))
            }
            _ => {
                warn!("Skipping malformed metric -- {}", line);
                None
            }
        }
    }

    /// Variant of this metric reading the counters of socket `socket`.
    pub fn for_socket(&self, socket: usize) -> Self {
        let prefix = format!("s{}.", socket);
        MetricDefinition::new(
            &format!("{}{}", prefix, self.name),
            &qualify_formula(&self.formula, &prefix),
            self.uncore,
        )
    }

    /// Tokens of the formula that are not constants.
    pub fn counters(&self) -> Vec<&str> {
        formula_tokens(&self.formula)
            .into_iter()
            .filter(|t| !Constants::is_constant(t))
            .collect()
    }

    /// The parsed formula.
    pub fn expr(&self) -> Result<&MetricExpr> {
        self.expr
            .as_ref()
            .map_err(|e| Error::InvalidFormula(e.clone()))
    }
}

/// Metrics declared after the `;` of an event list.
#[derive(Debug, Default, Clone)]
pub struct MetricSet {
    /// Declared metrics in order.
    pub metrics: Vec<MetricDefinition>,
}

impl MetricSet {
    /// Load the metric section of the event list at `path`.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(Error::MissingInput(path.display().to_string()));
        }
        Ok(MetricSet::parse(&std::fs::read_to_string(path)?))
    }

    /// Parse the metric section of an event list.
    pub fn parse(text: &str) -> Self {
        let mut metrics = vec![];
        let mut uncore = false;
        for line in text
            .lines()
            .map(str::trim)
            .skip_while(|l| !l.starts_with(';'))
            .skip(1)
        {
            if line.contains(UNCORE_MARKER) {
                debug!("found uncore metrics");
                uncore = true;
            }
            if line.is_empty() || line.starts_with('#') || line == UNCORE_MARKER {
                continue;
            }
            metrics.extend(MetricDefinition::from_line(line, uncore));
        }
        MetricSet { metrics }
    }

    /// Number of metrics.
    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    /// Are no metrics declared?
    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }
}

/// Computes metric values from rows of the reshaped counter table.
#[derive(Debug)]
pub struct MetricEvaluator<'a> {
    catalog: &'a EventCatalog,
    constants: &'a Constants,
    /// Output metric columns, after per-socket expansion.
    columns: Vec<MetricDefinition>,
    /// Normalized counter names of the reshaped table, without the time column.
    counters: Vec<String>,
}

impl<'a> MetricEvaluator<'a> {
    /// Prepare evaluation of `metrics` over a reshaped table with columns `header`.
    ///
    /// `header` includes the leading time column. With `persocket`, every metric that is not
    /// uncore is split into `s0.` and `s1.` variants; a variant is dropped when one of its counters
    /// is missing from `header`.
    pub fn new(
        catalog: &'a EventCatalog,
        constants: &'a Constants,
        metrics: &MetricSet,
        header: &[&str],
        persocket: bool,
    ) -> Self {
        let raw: Vec<&str> = header.iter().skip(1).cloned().collect();
        let is_sampled = |metric: &MetricDefinition| {
            metric.counters().iter().all(|c| {
                let found = raw.contains(c) || raw.contains(&compatible_name(c).as_str());
                if !found {
                    debug!("Skipping {}, {} was not sampled", metric.name, c);
                }
                found
            })
        };

        let mut columns = vec![];
        let mut second_socket = vec![];
        for metric in metrics.metrics.iter() {
            if !persocket || metric.uncore {
                columns.push(metric.clone());
                continue;
            }
            let s0 = metric.for_socket(0);
            if is_sampled(&s0) {
                columns.push(s0);
            }
            let s1 = metric.for_socket(1);
            if is_sampled(&s1) {
                second_socket.push(s1);
            }
        }
        columns.extend(second_socket);

        MetricEvaluator {
            catalog,
            constants,
            columns,
            counters: raw.iter().map(|x| normalize_name(x)).collect(),
        }
    }

    /// Metric columns produced for each row.
    pub fn columns(&self) -> &[MetricDefinition] {
        &self.columns
    }

    /// Column of each referenced counter within the row, after resolving counters that were
    /// sampled in more than one group.
    fn resolve_columns(&self, counters: &[String]) -> HashMap<String, usize> {
        let groups: Vec<Vec<usize>> = counters
            .iter()
            .map(|c| self.catalog.groups_of(c))
            .collect();
        let ambiguous: Vec<&String> = counters
            .iter()
            .zip(groups.iter())
            .filter(|(_, g)| g.len() > 1)
            .map(|(c, _)| c)
            .collect();
        let winner = if ambiguous.is_empty() {
            None
        } else {
            winner_group(&groups)
        };
        debug!("counters {:?} groups {:?} winner {:?}", counters, groups, winner);

        let mut columns = HashMap::new();
        for counter in counters {
            if columns.contains_key(counter) {
                continue;
            }
            let in_winner = match winner {
                Some(w) if ambiguous.contains(&counter) => self.catalog.column_in_group(counter, w),
                _ => None,
            };
            let column = in_winner.or_else(|| self.counters.iter().position(|c| c == counter));
            if let Some(idx) = column {
                columns.insert(counter.clone(), idx);
            }
        }
        columns
    }

    /// Evaluate `metric` over `row`, a reshaped row starting with its timestamp.
    ///
    /// `interval` is the time since the previous row and is substituted for [`SAMPLE_TIME`].
    pub fn evaluate(&self, metric: &MetricDefinition, row: &[&str], interval: f64) -> Result<f64> {
        let expr = metric.expr()?;
        let counters: Vec<String> = expr
            .get_counters()
            .into_iter()
            .filter(|t| !Constants::is_constant(t))
            .map(|t| normalize_name(t))
            .collect();

        let mut values: HashMap<String, f64> = HashMap::new();
        for (counter, idx) in self.resolve_columns(&counters) {
            let cell = row
                .get(idx + 1)
                .ok_or_else(|| Error::UnresolvedCounter(counter.clone()))?;
            values.insert(counter, cell.trim().parse()?);
        }

        let lookup = |token: &str| -> Result<f64> {
            if token == SAMPLE_TIME {
                Ok(interval)
            } else if Constants::is_constant(token) {
                self.constants
                    .get(token)
                    .ok_or_else(|| Error::UnresolvedCounter(token.to_string()))
            } else {
                values
                    .get(&normalize_name(token))
                    .cloned()
                    .ok_or_else(|| Error::UnresolvedCounter(token.to_string()))
            }
        };
        match expr.eval(&lookup)? {
            v if v.is_finite() => Ok(v),
            _ => Err(Error::NonFinite),
        }
    }

    /// Formatted value of `metric` for `row`.
    ///
    /// Division by zero yields `0` and any other failure an empty cell; both are logged.
    pub fn cell(&self, metric: &MetricDefinition, row: &[&str], interval: f64) -> String {
        match self.evaluate(metric, row, interval) {
            Ok(v) => format!("{:.4}", v),
            Err(Error::DivideByZero) => {
                error!("Divide by Zero evaluating {}", metric.formula);
                String::from("0")
            }
            Err(e) => {
                error!("Error evaluating {} = {} -- {}", metric.name, metric.formula, e);
                String::default()
            }
        }
    }

    /// Formatted values of all metric columns for `row`.
    pub fn evaluate_row(&self, row: &[&str], interval: f64) -> Vec<String> {
        self.columns
            .iter()
            .map(|m| self.cell(m, row, interval))
            .collect()
    }

    /// Stream a reshaped table from `reader` into a metrics table on `writer`.
    ///
    /// The output header is the time column, the metric names, then the raw counter names; each
    /// row carries the metric values followed by the raw counters rounded to integers. Returns the
    /// number of rows written, excluding the header.
    pub fn process<R: io::Read, W: io::Write>(
        catalog: &EventCatalog,
        constants: &Constants,
        metrics: &MetricSet,
        persocket: bool,
        reader: R,
        writer: W,
    ) -> Result<usize> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(reader);
        let mut writer = csv::Writer::from_writer(writer);
        let mut records = reader.records();

        let header = match records.next() {
            Some(h) => h?,
            None => return Ok(0),
        };
        let header: Vec<&str> = header.iter().collect();
        let evaluator = MetricEvaluator::new(catalog, constants, metrics, &header, persocket);
        info!("Evaluating {} metric columns", evaluator.columns().len());

        let mut out: Vec<String> = header.iter().take(1).map(|x| x.to_string()).collect();
        out.extend(evaluator.columns().iter().map(|m| m.name.clone()));
        out.extend(header.iter().skip(1).map(|x| x.to_string()));
        writer.write_record(&out)?;

        let mut rows = 0;
        let mut prev_time = 0.0;
        for record in records {
            let record = record?;
            if record.iter().all(|x| x.trim().is_empty()) {
                continue;
            }
            let row: Vec<&str> = record.iter().collect();
            let time: f64 = match row[0].trim().parse() {
                Ok(t) => t,
                Err(e) => {
                    warn!("Skipping row with malformed timestamp {:?} -- {}", row[0], e);
                    continue;
                }
            };
            let interval = time - prev_time;
            prev_time = time;

            let mut out = vec![row[0].to_string()];
            out.extend(evaluator.evaluate_row(&row, interval));
            out.extend(row.iter().skip(1).map(|r| match r.trim().parse::<f64>() {
                Ok(v) => format!("{:.0}", round_half_even(v)),
                Err(_) => String::default(),
            }));
            writer.write_record(&out)?;
            rows += 1;
        }
        writer.flush()?;
        Ok(rows)
    }
}
