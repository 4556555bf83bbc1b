//! Column-wise concatenation of reshaped counter tables.

use crate::Result;
use log::{debug, warn};
use std::fs::File;
use std::io;
use std::path::Path;

/// Concatenate the reshaped tables at `inputs` column-wise into `output`.
pub fn join_files<P: AsRef<Path>>(inputs: &[P], output: &Path) -> Result<usize> {
    let readers = inputs
        .iter()
        .map(|p| File::open(p.as_ref()))
        .collect::<io::Result<Vec<File>>>()?;
    join(readers, File::create(output)?)
}

/// Concatenate reshaped tables column-wise.
///
/// Row `i` of the output is row `i` of the first table followed by row `i` of every other table
/// without its time column. The output stops at the shortest table. Returns the number of rows
/// written, including the header.
pub fn join<R: io::Read, W: io::Write>(inputs: Vec<R>, writer: W) -> Result<usize> {
    let mut tables = vec![];
    for input in inputs {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(input);
        tables.push(reader.records().collect::<csv::Result<Vec<csv::StringRecord>>>()?);
    }
    let lines = tables.iter().map(Vec::len).min().unwrap_or(0);
    if tables.iter().any(|t| t.len() != lines) {
        warn!("Joined tables differ in length, keeping the first {} rows", lines);
    }

    let mut writer = csv::Writer::from_writer(writer);
    for i in 0..lines {
        let mut row: Vec<&str> = tables[0][i].iter().collect();
        for table in tables.iter().skip(1) {
            if i > 0 && table[i].get(0) != tables[0][i].get(0) {
                debug!(
                    "Timestamps {:?} and {:?} differ in joined row",
                    tables[0][i].get(0),
                    table[i].get(0)
                );
            }
            row.extend(table[i].iter().skip(1));
        }
        writer.write_record(&row)?;
    }
    writer.flush()?;
    Ok(lines)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join() {
        let core = "time,cycles,inst\n1,10,5\n2,20,6\n3,30,7\n";
        let cmn = "time,hnf_miss\n1,100\n2,200\n";
        let mut out = vec![];
        let lines = join(vec![core.as_bytes(), cmn.as_bytes()], &mut out).unwrap();
        assert_eq!(lines, 3);
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "time,cycles,inst,hnf_miss\n1,10,5,100\n2,20,6,200\n"
        );
    }

    #[test]
    fn test_join_single() {
        let core = "time,cycles\n1,10\n";
        let mut out = vec![];
        assert_eq!(join(vec![core.as_bytes()], &mut out).unwrap(), 2);
        assert_eq!(String::from_utf8(out).unwrap(), core);
    }
}
