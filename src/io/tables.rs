//! Text-table persistence of the diffusion gradient scheme and the phase
//! encoding scheme.
//!
//! Both schemes are whitespace-separated tables with one row per volume:
//! `gx gy gz b` for gradients, `ex ey ez tau` for phase encoding. The
//! alternative two-file phase encoding convention stores the unique rows in
//! one file and a 1-based row index per volume in another; the 1-based
//! encoding never leaves this module.

use std::fs;
use std::path::Path;

use itertools::Itertools;

use crate::pe::PeScheme;
use crate::{DwiError, Result};

fn parse_error(path: &Path, msg: impl Into<String>) -> DwiError {
    DwiError::TableParse {
        path: path.to_owned(),
        msg: msg.into(),
    }
}

fn data_lines(text: &str) -> impl Iterator<Item = (usize, &str)> {
    text.lines()
        .enumerate()
        .map(|(n, line)| (n + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty() && !line.starts_with('#'))
}

/// Read a table of fixed-width float rows (gradient or phase encoding).
pub fn read_rows(path: &Path) -> Result<Vec<[f64; 4]>> {
    let text = fs::read_to_string(path)?;
    let mut rows = vec![];
    for (line_number, line) in data_lines(&text) {
        let fields: Vec<f64> = line
            .split_whitespace()
            .map(|field| {
                field
                    .parse()
                    .map_err(|_| parse_error(path, format!("line {line_number}: not a number: \"{field}\"")))
            })
            .try_collect()?;
        match <[f64; 4]>::try_from(fields) {
            Ok(row) => rows.push(row),
            Err(fields) => {
                return Err(parse_error(
                    path,
                    format!("line {line_number}: expected 4 columns, found {}", fields.len()),
                ))
            }
        }
    }
    if rows.is_empty() {
        return Err(parse_error(path, "table contains no rows"));
    }
    Ok(rows)
}

pub fn write_rows(path: &Path, rows: &[[f64; 4]]) -> Result<()> {
    let text: String = rows
        .iter()
        .map(|row| format!("{:.6} {:.6} {:.6} {:.6}\n", row[0], row[1], row[2], row[3]))
        .collect();
    fs::write(path, text)?;
    Ok(())
}

/// Read the two-file phase encoding convention. The index file holds one
/// 1-based configuration row index per volume, in any whitespace layout.
pub fn read_pe_eddy(config_path: &Path, index_path: &Path) -> Result<PeScheme> {
    let config = read_rows(config_path)?;
    let text = fs::read_to_string(index_path)?;
    let indices: Vec<usize> = text
        .split_whitespace()
        .map(|field| {
            field.parse().map_err(|_| {
                parse_error(index_path, format!("not a volume index: \"{field}\""))
            })
        })
        .try_collect()?;
    if indices.is_empty() {
        return Err(parse_error(index_path, "index file contains no entries"));
    }
    PeScheme::from_eddy(config, &indices)
}

pub fn write_pe_eddy(config_path: &Path, index_path: &Path, pe: &PeScheme) -> Result<()> {
    write_rows(config_path, pe.config())?;
    let text: String = pe.index().iter().map(|&i| (i + 1).to_string()).join(" ");
    fs::write(index_path, text + "\n")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    #[allow(unused)]
    use pretty_assertions::{assert_eq, assert_ne};
    use tempfile::tempdir;

    #[test]
    fn gradient_table_roundtrip() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("grad.txt");
        let rows = vec![
            [0.0, 0.0, 0.0, 0.0],
            [0.5, 0.5, 0.707107, 1000.0],
            [0.0, 0.0, -1.0, 2995.0],
        ];
        write_rows(&path, &rows)?;
        let reloaded = read_rows(&path)?;
        assert_eq!(reloaded.len(), rows.len());
        for (a, b) in reloaded.iter().zip(&rows) {
            for (x, y) in a.iter().zip(b) {
                assert!((x - y).abs() < 1e-6);
            }
        }
        Ok(())
    }

    #[test]
    fn comments_and_blank_lines_are_skipped() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("grad.txt");
        fs::write(&path, "# gradient table\n\n0 0 1 1000\n\n# done\n0 1 0 1000\n")?;
        assert_eq!(read_rows(&path)?.len(), 2);
        Ok(())
    }

    #[test]
    fn wrong_column_count_reports_the_line() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("grad.txt");
        fs::write(&path, "0 0 1 1000\n0 0 1\n").unwrap();
        match read_rows(&path) {
            Err(DwiError::TableParse { msg, .. }) => assert!(msg.contains("line 2")),
            other => panic!("expected TableParse, got {other:?}"),
        }
    }

    #[test]
    fn unparseable_number_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("grad.txt");
        fs::write(&path, "0 0 one 1000\n").unwrap();
        assert!(read_rows(&path).is_err());
    }

    #[test]
    fn eddy_roundtrip_preserves_one_based_indices() -> Result<()> {
        let dir = tempdir()?;
        let config_path = dir.path().join("config.txt");
        let index_path = dir.path().join("indices.txt");

        let scheme = PeScheme::from_volume_table(&[
            [0.0, 1.0, 0.0, 0.1],
            [0.0, -1.0, 0.0, 0.1],
            [0.0, 1.0, 0.0, 0.1],
        ])
        .unwrap();
        write_pe_eddy(&config_path, &index_path, &scheme)?;

        // On disk the indices are 1-based
        let on_disk = fs::read_to_string(&index_path)?;
        assert_eq!(on_disk.trim(), "1 2 1");

        // Back in memory they are 0-based again
        let reloaded = read_pe_eddy(&config_path, &index_path)?;
        assert_eq!(reloaded.index(), scheme.index());
        assert_eq!(reloaded.group_count(), scheme.group_count());
        Ok(())
    }

    #[test]
    fn eddy_index_out_of_range_is_rejected() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("config.txt");
        let index_path = dir.path().join("indices.txt");
        fs::write(&config_path, "0 1 0 0.1\n0 -1 0 0.1\n").unwrap();
        fs::write(&index_path, "1 2 3\n").unwrap();
        assert!(read_pe_eddy(&config_path, &index_path).is_err());
    }
}
