mod cli;

use std::time::Instant;

use structopt::StructOpt;

use dwicombine::io::{nifti, tables};
use dwicombine::pe::PeScheme;
use dwicombine::{predict, recombine};
use dwicombine::{DwiError, GradRow, Result, Series, Volume};

use cli::{Cli, Operation};

fn main() {
    let args = Cli::from_args();
    if let Err(e) = run(args) {
        eprintln!("dwicombine: {e}");
        std::process::exit(1);
    }
}

fn run(args: Cli) -> Result<()> {
    if args.threads > 0 {
        // A failure here just means a pool already exists (e.g. in tests)
        if let Err(e) = rayon::ThreadPoolBuilder::new()
            .num_threads(args.threads)
            .build_global()
        {
            eprintln!("Warning: {e}");
        }
    }

    let mut now = Instant::now();
    let mut report_time = |message: &str| {
        println!("{}: {} ms", message, now.elapsed().as_millis());
        now = Instant::now();
    };

    let (dwi, header) = nifti::read_series(&args.input)?;
    let grad = load_grad(&args, &dwi)?;
    let pe = load_pe(&args, &dwi)?;
    let field = load_field(&args)?;
    if let Some(field) = &field {
        if !field.grid.matches(&dwi.grid, 1e-3) {
            return Err(DwiError::InputShape(
                "susceptibility field image and DWI series are not defined \
                 on the same voxel grid"
                    .into(),
            ));
        }
    }
    report_time("Loaded input images and schemes");

    match args.operation {
        Operation::CombinePairs => {
            if args.lmax.is_some() {
                return Err(DwiError::OptionConflict(
                    "-lmax option is not supported for the \"combine_pairs\" operation"
                        .into(),
                ));
            }
            if field.is_none() {
                eprintln!(
                    "Warning: no susceptibility field image provided for \
                     \"combine_pairs\"; volumes will be recombined by plain averaging"
                );
            }
            let (out, grad_out) = recombine::combine_pairs(&dwi, &grad, &pe, field.as_ref())?;
            report_time("Recombined volume pairs");

            nifti::write_series(&args.output, &out, &header)?;
            if let Some(path) = &args.export_grad {
                tables::write_rows(path, &grad_out)?;
            }
            // The recombined series has no meaningful phase encoding scheme
            if args.export_pe_table.is_some() || args.export_pe_eddy.is_some() {
                eprintln!(
                    "Warning: the output of \"combine_pairs\" carries no phase \
                     encoding scheme; nothing to export"
                );
            }
            report_time("Wrote output series");
        }

        Operation::CombinePredicted => {
            let field = field.ok_or(DwiError::FieldMissing("combine_predicted"))?;
            let out = predict::combine_predicted(
                &dwi,
                &grad,
                &pe,
                &field,
                args.lmax.as_deref(),
                args.blend,
            )?;
            report_time("Reconstructed volumes from empirical and predicted intensities");

            nifti::write_series(&args.output, &out, &header)?;
            if let Some(path) = &args.export_grad {
                tables::write_rows(path, &grad)?;
            }
            if let Some(path) = &args.export_pe_table {
                tables::write_rows(path, &pe.volume_table())?;
            }
            if let Some(paths) = &args.export_pe_eddy {
                tables::write_pe_eddy(&paths[0], &paths[1], &pe)?;
            }
            report_time("Wrote output series");
        }

        Operation::LeaveOneOut => {
            return Err(DwiError::NotImplemented("leave_one_out"));
        }
    }

    Ok(())
}

fn load_grad(args: &Cli, dwi: &Series) -> Result<Vec<GradRow>> {
    let path = args.grad.as_ref().ok_or_else(|| {
        DwiError::OptionConflict(
            "the -grad option is required: the image container carries no \
             diffusion gradient table"
                .into(),
        )
    })?;
    let grad = tables::read_rows(path)?;
    if grad.len() != dwi.volume_count() {
        return Err(DwiError::InputShape(format!(
            "gradient table has {} rows but the DWI series has {} volumes",
            grad.len(),
            dwi.volume_count()
        )));
    }
    Ok(grad)
}

fn load_pe(args: &Cli, dwi: &Series) -> Result<PeScheme> {
    let pe = match (&args.import_pe_table, &args.import_pe_eddy) {
        (Some(_), Some(_)) => {
            return Err(DwiError::OptionConflict(
                "provide the phase encoding through either -import_pe_table or \
                 -import_pe_eddy, not both"
                    .into(),
            ))
        }
        (Some(path), None) => PeScheme::from_volume_table(&tables::read_rows(path)?)?,
        (None, Some(paths)) => tables::read_pe_eddy(&paths[0], &paths[1])?,
        (None, None) => {
            return Err(DwiError::OptionConflict(
                "a phase encoding scheme is required: provide -import_pe_table or \
                 -import_pe_eddy"
                    .into(),
            ))
        }
    };
    if pe.index().len() != dwi.volume_count() {
        return Err(DwiError::InputShape(format!(
            "phase encoding scheme describes {} volumes but the DWI series has {}",
            pe.index().len(),
            dwi.volume_count()
        )));
    }
    Ok(pe)
}

fn load_field(args: &Cli) -> Result<Option<Volume>> {
    args.field.as_deref().map(nifti::read_volume).transpose()
}
