use std::path::PathBuf;
use std::str::FromStr;

use structopt::StructOpt;

use dwicombine::predict::BlendRule;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    CombinePairs,
    CombinePredicted,
    LeaveOneOut,
}

impl Operation {
    pub fn name(self) -> &'static str {
        match self {
            Operation::CombinePairs => "combine_pairs",
            Operation::CombinePredicted => "combine_predicted",
            Operation::LeaveOneOut => "leave_one_out",
        }
    }
}

impl FromStr for Operation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, String> {
        match s {
            "combine_pairs" => Ok(Operation::CombinePairs),
            "combine_predicted" => Ok(Operation::CombinePredicted),
            "leave_one_out" => Ok(Operation::LeaveOneOut),
            other => Err(format!(
                "unknown operation \"{other}\" \
                 (expected combine_pairs, combine_predicted or leave_one_out)"
            )),
        }
    }
}

#[derive(StructOpt, Debug, Clone)]
#[structopt(
    name = "dwicombine",
    about = "Reconstruct DWI volumes by combining complementary phase encoding acquisitions"
)]
pub struct Cli {
    /// The input DWI series (4D NIfTI)
    pub input: PathBuf,

    /// How the output DWIs will be reconstructed;
    /// one of: combine_pairs, combine_predicted, leave_one_out
    pub operation: Operation,

    /// The output DWI series (4D NIfTI)
    pub output: PathBuf,

    /// B0 field offset image in Hz, defined on the input voxel grid.
    /// Optional for combine_pairs (a plain average is used without it);
    /// compulsory for combine_predicted
    #[structopt(long)]
    pub field: Option<PathBuf>,

    /// Maximal spherical harmonic degrees to use during signal
    /// reconstruction: a comma-separated list with one even value per b-value
    #[structopt(long, use_delimiter = true)]
    pub lmax: Option<Vec<usize>>,

    /// How the Jacobian becomes the empirical blending weight:
    /// "floor" (max(1, J): empirical data used as-is wherever J <= 1) or
    /// "clamp" (min(1, J): predictions weighted by 1-J wherever J < 1)
    #[structopt(long, default_value = "floor")]
    pub blend: BlendRule,

    /// Diffusion gradient table: one "gx gy gz b" row per input volume
    #[structopt(long)]
    pub grad: Option<PathBuf>,

    /// Write the gradient table of the output series to this file
    #[structopt(long)]
    pub export_grad: Option<PathBuf>,

    /// Phase encoding table: one "ex ey ez tau" row per input volume
    #[structopt(long)]
    pub import_pe_table: Option<PathBuf>,

    /// Phase encoding as two files: the unique "ex ey ez tau" rows, and one
    /// 1-based row index per volume
    #[structopt(long, number_of_values = 2)]
    pub import_pe_eddy: Option<Vec<PathBuf>>,

    /// Write the per-volume phase encoding table of the output series
    #[structopt(long)]
    pub export_pe_table: Option<PathBuf>,

    /// Write the phase encoding of the output series in the two-file
    /// convention
    #[structopt(long, number_of_values = 2)]
    pub export_pe_eddy: Option<Vec<PathBuf>>,

    /// Maximum number of worker threads (0: one per logical core)
    #[structopt(short = "j", long, default_value = "0")]
    pub threads: usize,
}
