//! Phase encoding classification and pairing.
//!
//! The per-volume phase encoding table is deduplicated into a table of unique
//! (axis, total readout time) rows plus a volume-to-group mapping. For paired
//! recombination, every group must have exactly one partner with the same
//! readout time and the opposite axis polarity.

use crate::{DwiError, PeRow, Result};

/// Readout times closer than this (seconds) are considered equal. Values
/// ingested from text tables rarely carry more than four decimals.
pub const TAU_TOLERANCE: f64 = 1e-4;

/// Deduplicated phase encoding scheme: `config` holds the P unique rows in
/// first-appearance order, `index` maps each volume to its row.
#[derive(Clone, Debug)]
pub struct PeScheme {
    config: Vec<PeRow>,
    index: Vec<usize>,
}

fn validate_row(row: &PeRow, volume: usize) -> Result<()> {
    let axis = &row[..3];
    let nonzero = axis.iter().filter(|&&e| e != 0.0).count();
    if nonzero != 1 || axis.iter().any(|&e| e != 0.0 && e.abs() != 1.0) {
        return Err(DwiError::InputShape(format!(
            "phase encoding row for volume {volume} is not a signed unit axis: \
             [{}, {}, {}]",
            row[0], row[1], row[2]
        )));
    }
    if !(row[3] > 0.0) {
        return Err(DwiError::InputShape(format!(
            "phase encoding row for volume {volume} has non-positive readout time {}",
            row[3]
        )));
    }
    Ok(())
}

fn rows_equal(a: &PeRow, b: &PeRow) -> bool {
    a[..3] == b[..3] && (a[3] - b[3]).abs() <= TAU_TOLERANCE
}

impl PeScheme {
    /// Build the scheme from a per-volume table (one row per volume).
    pub fn from_volume_table(rows: &[PeRow]) -> Result<Self> {
        let mut config: Vec<PeRow> = vec![];
        let mut index = Vec::with_capacity(rows.len());
        for (volume, row) in rows.iter().enumerate() {
            validate_row(row, volume)?;
            let group = match config.iter().position(|c| rows_equal(c, row)) {
                Some(p) => p,
                None => {
                    config.push(*row);
                    config.len() - 1
                }
            };
            index.push(group);
        }
        Ok(PeScheme { config, index })
    }

    /// Build the scheme from the two-file convention: unique rows plus one
    /// 1-based row index per volume. Indices are rebased to 0 here; nothing
    /// downstream ever sees the 1-based encoding.
    pub fn from_eddy(config: Vec<PeRow>, indices_one_based: &[usize]) -> Result<Self> {
        for (group, row) in config.iter().enumerate() {
            validate_row(row, group)?;
        }
        let mut index = Vec::with_capacity(indices_one_based.len());
        for (volume, &i) in indices_one_based.iter().enumerate() {
            if i < 1 || i > config.len() {
                return Err(DwiError::InputShape(format!(
                    "phase encoding index {i} for volume {volume} is outside \
                     the configuration table (1..={})",
                    config.len()
                )));
            }
            index.push(i - 1);
        }
        Ok(PeScheme { config, index })
    }

    pub fn group_count(&self) -> usize {
        self.config.len()
    }

    pub fn config(&self) -> &[PeRow] {
        &self.config
    }

    /// Volume-to-group mapping (0-based).
    pub fn index(&self) -> &[usize] {
        &self.index
    }

    pub fn group_of(&self, volume: usize) -> usize {
        self.index[volume]
    }

    /// Image axis the group encodes along, and the polarity of that axis.
    pub fn axis_and_sign(&self, group: usize) -> (usize, f64) {
        let row = &self.config[group];
        for (axis, &e) in row[..3].iter().enumerate() {
            if e != 0.0 {
                return (axis, e.signum());
            }
        }
        unreachable!("rows are validated to contain a signed unit axis");
    }

    pub fn readout_time(&self, group: usize) -> f64 {
        self.config[group][3]
    }

    /// Reconstruct the per-volume table (for export).
    pub fn volume_table(&self) -> Vec<PeRow> {
        self.index.iter().map(|&p| self.config[p]).collect()
    }

    /// For each group, the unique partner group with the opposite axis and an
    /// equal readout time. Fails if the group count is odd or any group has no
    /// partner.
    pub fn pairing(&self) -> Result<Vec<usize>> {
        let p = self.group_count();
        if p % 2 != 0 {
            return Err(DwiError::PePartition(format!(
                "cannot pair phase encoding groups: number of unique phase \
                 encodings ({p}) is odd"
            )));
        }
        let mut partner = vec![usize::MAX; p];
        for first in 0..p {
            if partner[first] != usize::MAX {
                continue;
            }
            let a = &self.config[first];
            let found = (first + 1..p).find(|&second| {
                partner[second] == usize::MAX && {
                    let b = &self.config[second];
                    a[0] + b[0] == 0.0
                        && a[1] + b[1] == 0.0
                        && a[2] + b[2] == 0.0
                        && (a[3] - b[3]).abs() <= TAU_TOLERANCE
                }
            });
            match found {
                Some(second) => {
                    partner[first] = second;
                    partner[second] = first;
                }
                None => {
                    return Err(DwiError::PePartition(format!(
                        "no reversed phase encoding found for [{}, {}, {}, {}]",
                        a[0], a[1], a[2], a[3]
                    )))
                }
            }
        }
        Ok(partner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    #[allow(unused)]
    use pretty_assertions::{assert_eq, assert_ne};
    use rstest::rstest;

    const AP: PeRow = [0.0, 1.0, 0.0, 0.1];
    const PA: PeRow = [0.0, -1.0, 0.0, 0.1];
    const LR: PeRow = [1.0, 0.0, 0.0, 0.05];
    const RL: PeRow = [-1.0, 0.0, 0.0, 0.05];

    #[test]
    fn dedup_keeps_first_appearance_order() {
        let scheme = PeScheme::from_volume_table(&[AP, PA, AP, PA, LR]).unwrap();
        assert_eq!(scheme.group_count(), 3);
        assert_eq!(scheme.config(), &[AP, PA, LR]);
        assert_eq!(scheme.index(), &[0, 1, 0, 1, 2]);
    }

    #[test]
    fn tau_within_tolerance_is_one_group() {
        let near = [0.0, 1.0, 0.0, 0.1 + 0.5 * TAU_TOLERANCE];
        let scheme = PeScheme::from_volume_table(&[AP, near]).unwrap();
        assert_eq!(scheme.group_count(), 1);
    }

    #[test]
    fn tau_outside_tolerance_splits_groups() {
        let far = [0.0, 1.0, 0.0, 0.2];
        let scheme = PeScheme::from_volume_table(&[AP, far]).unwrap();
        assert_eq!(scheme.group_count(), 2);
    }

    #[rstest(/**/ row,
             case([0.0, 0.0, 0.0, 0.1]),   // no axis
             case([1.0, 1.0, 0.0, 0.1]),   // two axes
             case([0.0, 0.5, 0.0, 0.1]),   // not unit
             case([0.0, 1.0, 0.0, 0.0]),   // zero readout time
             case([0.0, 1.0, 0.0, -0.1]),  // negative readout time
    )]
    fn malformed_rows_are_rejected(row: PeRow) {
        assert!(PeScheme::from_volume_table(&[row]).is_err());
    }

    #[test]
    fn pairing_matches_opposite_axes() {
        let scheme = PeScheme::from_volume_table(&[AP, PA, LR, RL]).unwrap();
        assert_eq!(scheme.pairing().unwrap(), vec![1, 0, 3, 2]);
    }

    #[test]
    fn odd_group_count_fails() {
        let scheme = PeScheme::from_volume_table(&[AP, PA, LR]).unwrap();
        assert!(matches!(
            scheme.pairing(),
            Err(DwiError::PePartition(_))
        ));
    }

    #[test]
    fn same_axis_different_tau_has_no_partner() {
        let slow = [0.0, -1.0, 0.0, 0.2];
        let scheme = PeScheme::from_volume_table(&[AP, slow]).unwrap();
        assert!(scheme.pairing().is_err());
    }

    #[test]
    fn eddy_indices_are_rebased() {
        let scheme = PeScheme::from_eddy(vec![AP, PA], &[1, 2, 2, 1]).unwrap();
        assert_eq!(scheme.index(), &[0, 1, 1, 0]);
        assert_eq!(scheme.group_of(1), 1);
    }

    #[rstest(/**/ index, case(0), case(3))]
    fn eddy_index_out_of_range(index: usize) {
        assert!(PeScheme::from_eddy(vec![AP, PA], &[index]).is_err());
    }

    #[test]
    fn axis_and_sign() {
        let scheme = PeScheme::from_volume_table(&[AP, PA, RL]).unwrap();
        assert_eq!(scheme.axis_and_sign(0), (1, 1.0));
        assert_eq!(scheme.axis_and_sign(1), (1, -1.0));
        assert_eq!(scheme.axis_and_sign(2), (0, -1.0));
        assert_eq!(scheme.readout_time(2), 0.05);
    }

    #[test]
    fn volume_table_roundtrip() {
        let rows = [AP, PA, AP, LR];
        let scheme = PeScheme::from_volume_table(&rows).unwrap();
        assert_eq!(scheme.volume_table(), rows.to_vec());
    }
}
