//! Time averages of every column of a metrics table.

use crate::util::format_thousands;
use crate::{Error, Result};
use log::{debug, info};
use std::fs::File;
use std::io;
use std::path::Path;

/// Time average of one metrics column.
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryRow {
    /// Column name.
    pub metric: String,
    /// Mean over all samples.
    pub average: f64,
}

/// Average every column but the first of the metrics table read from `reader`.
///
/// Empty and non-numeric cells count as zero. `source` names the table in the error returned when
/// it holds no samples.
pub fn averages<R: io::Read>(reader: R, source: &str) -> Result<Vec<SummaryRow>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(reader);
    let mut records = reader.records();
    let header = match records.next() {
        Some(h) => h?,
        None => return Err(Error::NoSamples(source.to_string())),
    };

    let mut sums = vec![0.0; header.len().saturating_sub(1)];
    let mut samples = 0usize;
    for record in records {
        let record = record?;
        if record.iter().all(|x| x.trim().is_empty()) {
            continue;
        }
        for (i, cell) in record.iter().skip(1).enumerate().take(sums.len()) {
            match cell.trim().parse::<f64>() {
                Ok(v) => sums[i] += v,
                Err(_) => debug!("Counting {:?} in column {} as 0", cell, &header[i + 1]),
            }
        }
        samples += 1;
    }

    info!("number of samples: {}", samples);
    if samples == 0 {
        return Err(Error::NoSamples(source.to_string()));
    }
    Ok(header
        .iter()
        .skip(1)
        .zip(sums)
        .map(|(metric, sum)| SummaryRow {
            metric: metric.to_string(),
            average: sum / samples as f64,
        })
        .collect())
}

/// Write `rows` as `metric,average` records without a header.
pub fn write_averages<W: io::Write>(rows: &[SummaryRow], writer: W) -> Result<()> {
    let mut writer = csv::Writer::from_writer(writer);
    for row in rows {
        writer.write_record(&[row.metric.clone(), format_thousands(row.average)])?;
    }
    writer.flush()?;
    Ok(())
}

/// Average the metrics table at `input` into `output`.
pub fn average_file(input: &Path, output: &Path) -> Result<Vec<SummaryRow>> {
    let rows = averages(File::open(input)?, &input.display().to_string())?;
    write_averages(&rows, File::create(output)?)?;
    info!("metric averages: {}", output.display());
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_averages() {
        let table = "time,ipc,cycles\n1.0,1.0,1000\n2.0,2.0,2000\n3.0,3.0,4000\n";
        let rows = averages(table.as_bytes(), "test").unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].metric, "ipc");
        assert_eq!(format_thousands(rows[0].average), "2.0000");
        assert!((rows[1].average - 2333.3333).abs() < 1e-3);

        let mut out = vec![];
        write_averages(&rows, &mut out).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "ipc,2.0000\ncycles,\"2,333.3333\"\n"
        );
    }

    #[test]
    fn test_averages_empty_cells() {
        let table = "time,ratio\n1.0,\n2.0,4.0\n";
        let rows = averages(table.as_bytes(), "test").unwrap();
        assert_eq!(rows[0].average, 2.0);
    }

    #[test]
    fn test_averages_no_samples() {
        match averages("time,ipc\n".as_bytes(), "metrics.csv") {
            Err(Error::NoSamples(ref s)) if s == "metrics.csv" => {}
            x => panic!("unexpected result {:?}", x),
        }
        assert!(averages("".as_bytes(), "metrics.csv").is_err());
    }
}
