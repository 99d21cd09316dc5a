//! Explicit recombination of volume pairs acquired with reversed phase
//! encoding (the `combine_pairs` operation).

use indicatif::{ProgressBar, ProgressStyle};
use ndarray::parallel::prelude::*;
use ndarray::{azip, Axis};

use crate::grad1d::group_jacobians;
use crate::image::{Series, Volume};
use crate::pe::PeScheme;
use crate::shells::Shells;
use crate::{DwiError, GradRow, Result};

/// Gradient directions count as equivalent (or antipodal) when the absolute
/// dot product of the unit vectors reaches this. Tolerates numerical noise
/// while excluding genuinely different directions.
pub const DIRECTION_DOT_THRESHOLD: f64 = 0.999;

/// The outcome of pairing: source volume index pairs, in output order, and
/// the synthesised gradient table of the recombined series.
#[derive(Clone, Debug)]
pub struct VolumePairs {
    pub pairs: Vec<(usize, usize)>,
    pub grad_out: Vec<GradRow>,
}

fn dot3(a: &GradRow, b: &GradRow) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

/// Synthesised direction of a pair: the normalised mean, flipped to the
/// difference when the two directions are antipodal, and left at zero when
/// both inputs are zero.
fn average_direction(first: &GradRow, second: &GradRow) -> [f64; 3] {
    let mut dir = [
        0.5 * (first[0] + second[0]),
        0.5 * (first[1] + second[1]),
        0.5 * (first[2] + second[2]),
    ];
    if dir.iter().map(|e| e * e).sum::<f64>() < 0.5 {
        dir = [
            0.5 * (first[0] - second[0]),
            0.5 * (first[1] - second[1]),
            0.5 * (first[2] - second[2]),
        ];
    }
    let norm = dir.iter().map(|e| e * e).sum::<f64>().sqrt();
    if norm > 0.0 {
        for e in &mut dir {
            *e /= norm;
        }
    }
    dir
}

/// Match every volume with exactly one counterpart sharing its shell, with a
/// partnered phase encoding group and an equivalent (or antipodal) gradient
/// direction. Deterministic greedy scan in ascending volume index.
pub fn pair_volumes(
    grad: &[GradRow],
    shells: &Shells,
    pe: &PeScheme,
) -> Result<VolumePairs> {
    if grad.len() % 2 != 0 {
        return Err(DwiError::PePartition(format!(
            "cannot recombine phase encoding pairs: number of volumes \
             ({}) is odd",
            grad.len()
        )));
    }
    let partner = pe.pairing()?;
    let vol2shell = shells.vol2shell(grad.len());

    let mut pairs = Vec::with_capacity(grad.len() / 2);
    let mut grad_out = Vec::with_capacity(grad.len() / 2);
    let mut assigned = vec![false; grad.len()];

    for first in 0..grad.len() {
        if assigned[first] {
            continue;
        }
        let wanted_pe = partner[pe.group_of(first)];
        let shell = vol2shell[first];
        let is_bzero = shells[shell].is_bzero();
        let first_dir = &grad[first];

        let second = (first + 1..grad.len()).find(|&second| {
            if assigned[second]
                || pe.group_of(second) != wanted_pe
                || vol2shell[second] != shell
            {
                return false;
            }
            if is_bzero {
                return true;
            }
            let second_dir = &grad[second];
            // Direction equivalence only matters off the b=0 shell; a zero
            // vector can only ever match another zero vector
            if dot3(first_dir, first_dir) > 0.0 {
                dot3(second_dir, second_dir) > 0.0
                    && dot3(first_dir, second_dir).abs() >= DIRECTION_DOT_THRESHOLD
            } else {
                dot3(second_dir, second_dir) == 0.0
            }
        });

        let second = second.ok_or(DwiError::PairingFailure {
            volume: first,
            gradient: *first_dir,
            pe: pe.config()[pe.group_of(first)],
        })?;

        let dir = average_direction(first_dir, &grad[second]);
        grad_out.push([
            dir[0],
            dir[1],
            dir[2],
            0.5 * (grad[first][3] + grad[second][3]),
        ]);
        pairs.push((first, second));
        assigned[first] = true;
        assigned[second] = true;
    }
    Ok(VolumePairs { pairs, grad_out })
}

fn progress(len: u64, message: &'static str) -> ProgressBar {
    let bar = ProgressBar::new(len).with_message(message);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("{msg} [{wide_bar}] {pos}/{len}")
            .unwrap(),
    );
    bar
}

/// Fuse every pair into one output volume. With a field, contributions are
/// weighted by the squared Jacobian of each volume's phase encoding group;
/// without one, the pair is averaged. Returns the recombined series and its
/// synthesised gradient table.
pub fn combine_pairs(
    dwi: &Series,
    grad: &[GradRow],
    pe: &PeScheme,
    field: Option<&Volume>,
) -> Result<(Series, Vec<GradRow>)> {
    let shells = Shells::new(grad)?;
    let VolumePairs { pairs, grad_out } = pair_volumes(grad, &shells, pe)?;

    let mut out = Series::zeros(dwi.grid.clone(), pairs.len());

    if let Some(field) = field {
        let weights: Vec<_> = {
            let bar = progress(
                pe.group_count() as u64,
                "Computing phase encoding group weighting images",
            );
            group_jacobians(field, pe)
                .into_iter()
                .map(|mut jac| {
                    jac.mapv_inplace(|j| j * j);
                    bar.inc(1);
                    jac
                })
                .collect()
        };

        let bar = progress(pairs.len() as u64, "Performing explicit volume recombination");
        out.data
            .axis_iter_mut(Axis(3))
            .into_par_iter()
            .enumerate()
            .for_each(|(o, mut fused)| {
                let (v1, v2) = pairs[o];
                let first = dwi.volume(v1);
                let second = dwi.volume(v2);
                let w1 = &weights[pe.group_of(v1)];
                let w2 = &weights[pe.group_of(v2)];
                azip!((out in &mut fused, &a in &first, &b in &second, &wa in w1, &wb in w2) {
                    let denominator = wa + wb;
                    // Both Jacobians can vanish where the field collapses the
                    // signal entirely; the recombined intensity is 0 there
                    *out = if denominator > 0.0 {
                        (a * wa + b * wb) / denominator
                    } else {
                        0.0
                    };
                });
                bar.inc(1);
            });
        bar.finish();
    } else {
        let bar = progress(pairs.len() as u64, "Performing explicit volume recombination");
        out.data
            .axis_iter_mut(Axis(3))
            .into_par_iter()
            .enumerate()
            .for_each(|(o, mut fused)| {
                let (v1, v2) = pairs[o];
                let first = dwi.volume(v1);
                let second = dwi.volume(v2);
                azip!((out in &mut fused, &a in &first, &b in &second) {
                    *out = 0.5 * (a + b);
                });
                bar.inc(1);
            });
        bar.finish();
    }

    Ok((out, grad_out))
}
