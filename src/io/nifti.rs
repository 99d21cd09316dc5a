//! NIfTI container I/O for the 4-D DWI series and the 3-D field image.
//! Supports `.nii` and `.nii.gz`.

use std::path::Path;

use ndarray::{Ix3, Ix4};
use nifti::{
    writer::WriterOptions, IntoNdArray, NiftiHeader, NiftiObject, ReaderOptions,
};

use crate::image::{Grid, Series, Volume};
use crate::{DwiError, Result};

fn grid_from_header(header: &NiftiHeader) -> Grid {
    let dims = [
        header.dim[1] as usize,
        header.dim[2] as usize,
        header.dim[3] as usize,
    ];
    let voxel_size = [header.pixdim[1], header.pixdim[2], header.pixdim[3]];
    // Prefer the sform when present; otherwise fall back to voxel scaling
    let affine = if header.sform_code > 0 {
        let [x, y, z] = [header.srow_x, header.srow_y, header.srow_z];
        [x, y, z, [0.0, 0.0, 0.0, 1.0]]
    } else {
        [
            [voxel_size[0], 0.0, 0.0, 0.0],
            [0.0, voxel_size[1], 0.0, 0.0],
            [0.0, 0.0, voxel_size[2], 0.0],
            [0.0, 0.0, 0.0, 1.0],
        ]
    };
    Grid {
        dims,
        voxel_size,
        affine,
    }
}

/// Read a 4-D DWI series. Returns the image and its header, which the writer
/// reuses so that the output inherits the input geometry.
pub fn read_series(path: &Path) -> Result<(Series, NiftiHeader)> {
    let object = ReaderOptions::new().read_file(path)?;
    let header = object.header().clone();
    let grid = grid_from_header(&header);
    let array = object.into_volume().into_ndarray::<f32>()?;
    let data = array.into_dimensionality::<Ix4>().map_err(|_| {
        DwiError::InputShape(format!(
            "expected a 4D DWI series in {}",
            path.display()
        ))
    })?;
    Ok((Series::new(grid, data), header))
}

/// Read a 3-D scalar image (a 4-D image with a singleton last axis is
/// accepted and squeezed).
pub fn read_volume(path: &Path) -> Result<Volume> {
    let object = ReaderOptions::new().read_file(path)?;
    let grid = grid_from_header(object.header());
    let array = object.into_volume().into_ndarray::<f32>()?;
    let data = match array.ndim() {
        3 => array.into_dimensionality::<Ix3>().unwrap(),
        4 if array.shape()[3] == 1 => {
            array.into_dimensionality::<Ix4>().unwrap().remove_axis(ndarray::Axis(3))
        }
        _ => {
            return Err(DwiError::InputShape(format!(
                "expected a 3D image in {}",
                path.display()
            )))
        }
    };
    Ok(Volume::new(grid, data))
}

/// Write a series as float32, reusing `reference` for everything the data
/// does not determine (geometry, units, ...).
pub fn write_series(path: &Path, series: &Series, reference: &NiftiHeader) -> Result<()> {
    WriterOptions::new(path)
        .reference_header(reference)
        .write_nifti(&series.data)?;
    Ok(())
}
