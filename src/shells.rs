//! Partition DWI volumes into b-value shells.
//!
//! Volumes with b below `BZERO_THRESHOLD` form the b=0 shell; the remaining
//! volumes are clustered in ascending b, opening a new shell whenever the gap
//! to the running shell mean exceeds `SHELL_GAP`.

use crate::{DwiError, GradRow, Result};

/// b-values at or below this (s/mm²) count as unweighted.
pub const BZERO_THRESHOLD: f64 = 10.0;

/// A new shell opens when a b-value sits further than this (s/mm²) from the
/// running mean of the shell under construction.
pub const SHELL_GAP: f64 = 100.0;

#[derive(Clone, Debug)]
pub struct Shell {
    mean: f64,
    bzero: bool,
    volumes: Vec<usize>,
}

impl Shell {
    pub fn mean(&self) -> f64 {
        self.mean
    }

    pub fn is_bzero(&self) -> bool {
        self.bzero
    }

    pub fn volumes(&self) -> &[usize] {
        &self.volumes
    }

    pub fn count(&self) -> usize {
        self.volumes.len()
    }
}

/// All shells of one gradient table, ordered by ascending mean b-value.
#[derive(Clone, Debug)]
pub struct Shells {
    shells: Vec<Shell>,
}

impl Shells {
    pub fn new(grad: &[GradRow]) -> Result<Self> {
        if grad.is_empty() {
            return Err(DwiError::InputShape(
                "gradient table contains no volumes".into(),
            ));
        }

        let mut order: Vec<usize> = (0..grad.len()).collect();
        order.sort_by(|&a, &b| grad[a][3].total_cmp(&grad[b][3]));

        let mut shells: Vec<Shell> = vec![];
        let mut bzero = Shell {
            mean: 0.0,
            bzero: true,
            volumes: vec![],
        };

        let mut sum = 0.0;
        for &v in &order {
            let b = grad[v][3];
            if b <= BZERO_THRESHOLD {
                bzero.mean = (bzero.mean * bzero.volumes.len() as f64 + b)
                    / (bzero.volumes.len() + 1) as f64;
                bzero.volumes.push(v);
                continue;
            }
            match shells.last_mut() {
                Some(shell) if b - shell.mean <= SHELL_GAP => {
                    sum += b;
                    shell.volumes.push(v);
                    shell.mean = sum / shell.volumes.len() as f64;
                }
                _ => {
                    sum = b;
                    shells.push(Shell {
                        mean: b,
                        bzero: false,
                        volumes: vec![v],
                    });
                }
            }
        }
        if !bzero.volumes.is_empty() {
            bzero.volumes.sort_unstable();
            shells.insert(0, bzero);
        }
        for shell in &mut shells {
            shell.volumes.sort_unstable();
        }
        Ok(Shells { shells })
    }

    pub fn count(&self) -> usize {
        self.shells.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Shell> {
        self.shells.iter()
    }

    /// Map from volume index to shell index. Every volume belongs to exactly
    /// one shell by construction.
    pub fn vol2shell(&self, volume_count: usize) -> Vec<usize> {
        let mut map = vec![usize::MAX; volume_count];
        for (s, shell) in self.shells.iter().enumerate() {
            for &v in &shell.volumes {
                debug_assert_eq!(map[v], usize::MAX);
                map[v] = s;
            }
        }
        debug_assert!(map.iter().all(|&s| s != usize::MAX));
        map
    }
}

impl std::ops::Index<usize> for Shells {
    type Output = Shell;
    fn index(&self, s: usize) -> &Shell {
        &self.shells[s]
    }
}
