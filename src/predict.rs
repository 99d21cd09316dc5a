//! Prediction-based reconstruction (the `combine_predicted` operation).
//!
//! Every volume is rebuilt as a blend of its empirical intensities and a
//! spherical-harmonic prediction fitted to the volumes of all *other* phase
//! encoding groups on the same shell. The blend weight is the voxel's
//! Jacobian for the volume's own phase encoding group.

use std::str::FromStr;

use indicatif::{ProgressBar, ProgressStyle};
use nalgebra::{DMatrix, DVector};
use ndarray::parallel::prelude::*;
use ndarray::{Array3, Axis};

use crate::grad1d::group_jacobians;
use crate::image::{Series, Volume};
use crate::pe::PeScheme;
use crate::sh;
use crate::shells::Shells;
use crate::{DwiError, GradRow, Result};

/// How the per-voxel Jacobian turns into the weight of the empirical data.
///
/// `Floor` keeps the historical expression `max(1, J)`: empirical data is
/// used exclusively wherever J <= 1, and J > 1 extrapolates with a negative
/// prediction weight. `Clamp` computes `min(1, J)`, so predictions contribute
/// with weight `1 - J` exactly where the Jacobian indicates compression.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlendRule {
    Floor,
    Clamp,
}

impl BlendRule {
    pub fn empirical_weight(self, jacobian: f64) -> f64 {
        match self {
            BlendRule::Floor => jacobian.max(1.0),
            BlendRule::Clamp => jacobian.min(1.0),
        }
    }
}

impl FromStr for BlendRule {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, String> {
        match s {
            "floor" => Ok(BlendRule::Floor),
            "clamp" => Ok(BlendRule::Clamp),
            other => Err(format!(
                "unknown blend rule \"{other}\" (expected \"floor\" or \"clamp\")"
            )),
        }
    }
}

/// Source/target split of one (phase encoding group, shell) cell, together
/// with the operators shared by every voxel of that cell.
struct Partition {
    target_volumes: Vec<usize>,
    source_volumes: Vec<usize>,
    sh2target: DMatrix<f64>,
    source_basis: DMatrix<f64>,
}

fn partition(
    grad: &[GradRow],
    shells: &Shells,
    pe: &PeScheme,
    group: usize,
    shell: usize,
    lmax_user: Option<&[usize]>,
) -> Result<Partition> {
    let mut target_volumes = vec![];
    let mut source_volumes = vec![];
    for &volume in shells[shell].volumes() {
        if pe.group_of(volume) == group {
            target_volumes.push(volume);
        } else {
            source_volumes.push(volume);
        }
    }
    for (role, volumes) in [("target", &target_volumes), ("source", &source_volumes)] {
        if volumes.is_empty() {
            return Err(DwiError::EmptyPartition {
                role,
                group,
                bvalue: shells[shell].mean(),
            });
        }
    }

    let lmax_data = sh::lmax_for(source_volumes.len());
    let lmax = match lmax_user {
        None => lmax_data,
        Some(user) => {
            let lmax = user[shell];
            if lmax > lmax_data {
                return Err(DwiError::LmaxInfeasible(format!(
                    "requested lmax={lmax} for shell b={:.0} exceeds what can be \
                     predicted from the {} volumes of the other phase encoding groups \
                     (lmax={lmax_data})",
                    shells[shell].mean(),
                    source_volumes.len()
                )));
            }
            lmax
        }
    };

    let spherical = |volumes: &[usize]| -> Vec<[f64; 2]> {
        volumes
            .iter()
            .map(|&v| sh::cartesian2spherical([grad[v][0], grad[v][1], grad[v][2]]))
            .collect()
    };
    let sh2target = sh::basis(&spherical(&target_volumes), lmax);
    let source_basis = sh::basis(&spherical(&source_volumes), lmax);

    Ok(Partition {
        target_volumes,
        source_volumes,
        sh2target,
        source_basis,
    })
}

/// Check a user-supplied lmax sequence against the shell structure before any
/// per-cell feasibility test: one even value per shell, each achievable from
/// the shell's full sample count.
pub fn validate_lmax(lmax_user: &[usize], shells: &Shells) -> Result<()> {
    if lmax_user.len() != shells.count() {
        return Err(DwiError::LmaxInfeasible(format!(
            "-lmax must specify one value per unique b-value ({} given, {} shells)",
            lmax_user.len(),
            shells.count()
        )));
    }
    for (lmax, shell) in lmax_user.iter().zip(shells.iter()) {
        if lmax % 2 != 0 {
            return Err(DwiError::LmaxInfeasible(format!(
                "-lmax values must be even numbers (got {lmax})"
            )));
        }
        let achievable = sh::lmax_for(shell.count());
        if *lmax > achievable {
            return Err(DwiError::LmaxInfeasible(format!(
                "requested lmax={lmax} for shell b={:.0}, but its {} volumes only \
                 support lmax={achievable}",
                shell.mean(),
                shell.count()
            )));
        }
    }
    Ok(())
}

/// Reconstruct the full series, blending empirical and predicted intensities
/// per voxel. The field is compulsory; Jacobian images drive both the blend
/// weight and (when more than two phase encoding groups exist) the weighted
/// SH fit of the sources.
pub fn combine_predicted(
    dwi: &Series,
    grad: &[GradRow],
    pe: &PeScheme,
    field: &Volume,
    lmax_user: Option<&[usize]>,
    blend: BlendRule,
) -> Result<Series> {
    let shells = Shells::new(grad)?;
    if let Some(user) = lmax_user {
        validate_lmax(user, &shells)?;
    }

    let jacobians = group_jacobians(field, pe);
    let mut out = Series::zeros(dwi.grid.clone(), dwi.volume_count());

    let bar = ProgressBar::new((pe.group_count() * shells.count()) as u64)
        .with_message("Reconstructing volumes combining empirical and predicted intensities");
    bar.set_style(
        ProgressStyle::default_bar()
            .template("{msg} [{wide_bar}] {pos}/{len}")
            .unwrap(),
    );

    for group in 0..pe.group_count() {
        for shell in 0..shells.count() {
            let cell = partition(grad, &shells, pe, group, shell, lmax_user)?;
            if pe.group_count() == 2 {
                // A single source group: the source-to-target operator is
                // voxel-independent, so build it once and share it
                let source2target = &cell.sh2target * sh::pinv(&cell.source_basis)?;
                reconstruct_cell(dwi, &mut out, &jacobians[group], blend, &cell, |_, data| {
                    Ok(&source2target * data)
                })?;
            } else {
                // Per-voxel Jacobian weights demand a per-voxel weighted fit
                let source_groups: Vec<usize> = cell
                    .source_volumes
                    .iter()
                    .map(|&v| pe.group_of(v))
                    .collect();
                let jacobians = &jacobians;
                reconstruct_cell(dwi, &mut out, &jacobians[group], blend, &cell, |voxel, data| {
                    let weights = DVector::from_iterator(
                        source_groups.len(),
                        source_groups.iter().map(|&g| jacobians[g][voxel] as f64),
                    );
                    let source2target = &cell.sh2target * sh::wls(&cell.source_basis, &weights)?;
                    Ok(source2target * data)
                })?;
            }
            bar.inc(1);
        }
    }
    bar.finish();
    Ok(out)
}

/// Run the per-voxel blend for one (group, shell) cell. `predict` maps the
/// source amplitudes of a voxel to the predicted target amplitudes; the P=2
/// caller closes over one shared operator, the P>2 caller rebuilds a
/// Jacobian-weighted operator per voxel.
fn reconstruct_cell<F>(
    dwi: &Series,
    out: &mut Series,
    jacobian: &Array3<f32>,
    blend: BlendRule,
    cell: &Partition,
    predict: F,
) -> Result<()>
where
    F: Fn((usize, usize, usize), &DVector<f64>) -> Result<DVector<f64>> + Sync,
{
    let input = &dwi.data;
    let target_volumes = &cell.target_volumes;
    let source_volumes = &cell.source_volumes;

    out.data
        .axis_iter_mut(Axis(2))
        .into_par_iter()
        .enumerate()
        .try_for_each(|(z, mut slab)| -> Result<()> {
            let mut source_data = DVector::zeros(source_volumes.len());
            for x in 0..input.len_of(Axis(0)) {
                for y in 0..input.len_of(Axis(1)) {
                    let empirical_weight =
                        blend.empirical_weight(jacobian[[x, y, z]] as f64);
                    if empirical_weight == 1.0 {
                        for &t in target_volumes {
                            slab[[x, y, t]] = input[[x, y, z, t]];
                        }
                    } else {
                        for (i, &v) in source_volumes.iter().enumerate() {
                            source_data[i] = input[[x, y, z, v]] as f64;
                        }
                        let predicted = predict((x, y, z), &source_data)?;
                        for (i, &t) in target_volumes.iter().enumerate() {
                            slab[[x, y, t]] = (empirical_weight
                                * input[[x, y, z, t]] as f64
                                + (1.0 - empirical_weight) * predicted[i])
                                as f32;
                        }
                    }
                }
            }
            Ok(())
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_eq::assert_float_eq;
    use rstest::rstest;

    #[rstest(/**/ rule,              jacobian, weight,
             case(BlendRule::Floor,  0.25,     1.0),
             case(BlendRule::Floor,  1.0,      1.0),
             case(BlendRule::Floor,  1.5,      1.5),
             case(BlendRule::Clamp,  0.25,     0.25),
             case(BlendRule::Clamp,  1.0,      1.0),
             case(BlendRule::Clamp,  1.5,      1.0),
    )]
    fn empirical_weight_rules(rule: BlendRule, jacobian: f64, weight: f64) {
        assert_float_eq!(rule.empirical_weight(jacobian), weight, abs <= 0.0);
    }

    #[test]
    fn blend_rule_parsing() {
        assert_eq!("floor".parse::<BlendRule>().unwrap(), BlendRule::Floor);
        assert_eq!("clamp".parse::<BlendRule>().unwrap(), BlendRule::Clamp);
        assert!("mean".parse::<BlendRule>().is_err());
    }
}
