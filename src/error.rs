use std::path::PathBuf;

use thiserror::Error;

use crate::{GradRow, PeRow};

pub type Result<T> = std::result::Result<T, DwiError>;

/// Everything that can go wrong between the CLI boundary and the voxel loops.
/// All variants are fatal; none are retried.
#[derive(Error, Debug)]
pub enum DwiError {
    #[error("{0}")]
    InputShape(String),

    #[error(
        "unable to establish paired DWI volume with reversed phase encoding: \
         index {volume}; grad [{:.4}, {:.4}, {:.4}, {:.1}]; phase encoding [{}, {}, {}, {}]",
        gradient[0], gradient[1], gradient[2], gradient[3],
        pe[0], pe[1], pe[2], pe[3]
    )]
    PairingFailure {
        volume: usize,
        gradient: GradRow,
        pe: PeRow,
    },

    #[error("{0}")]
    PePartition(String),

    #[error("{0}")]
    OptionConflict(String),

    #[error("{0}")]
    LmaxInfeasible(String),

    #[error("no {role} volumes for phase encoding group {group} in shell b={bvalue:.0}")]
    EmptyPartition {
        role: &'static str,
        group: usize,
        bvalue: f64,
    },

    #[error("-field option is compulsory for the \"{0}\" operation")]
    FieldMissing(&'static str),

    #[error("operation \"{0}\" is not yet implemented")]
    NotImplemented(&'static str),

    #[error("{0}")]
    NumericFailure(String),

    #[error("failed to parse {}: {msg}", path.display())]
    TableParse { path: PathBuf, msg: String },

    #[error(transparent)]
    Nifti(#[from] nifti::error::NiftiError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
