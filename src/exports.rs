pub use crate::{
    error::{DwiError, Result},
    image::{Grid, Series, Volume},
};

/// One row of the diffusion gradient table: unit direction plus b-value.
pub type GradRow = [f64; 4];

/// One row of the phase encoding table: signed unit axis plus total readout time.
pub type PeRow = [f64; 4];
