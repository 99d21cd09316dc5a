use ndarray::{Array3, Array4, ArrayView3, Axis};

/// Voxel grid metadata shared by all images in one reconstruction:
/// spatial dimensions, voxel size in mm, and the voxel-to-scanner affine.
#[derive(Clone, Debug, PartialEq)]
pub struct Grid {
    pub dims: [usize; 3],
    pub voxel_size: [f32; 3],
    pub affine: [[f32; 4]; 4],
}

impl Grid {
    /// Unit grid: 1 mm isotropic voxels, identity affine. Handy in tests and
    /// for images synthesised in memory.
    pub fn unit(dims: [usize; 3]) -> Self {
        let mut affine = [[0.0; 4]; 4];
        for (i, row) in affine.iter_mut().enumerate() {
            row[i] = 1.0;
        }
        Grid {
            dims,
            voxel_size: [1.0; 3],
            affine,
        }
    }

    pub fn voxel_count(&self) -> usize {
        self.dims.iter().product()
    }

    /// Scanner-space coincidence: same dimensions, affines equal within `tol`.
    pub fn matches(&self, other: &Grid, tol: f32) -> bool {
        self.dims == other.dims
            && self
                .affine
                .iter()
                .flatten()
                .zip(other.affine.iter().flatten())
                .all(|(a, b)| (a - b).abs() <= tol)
    }
}

/// A single 3-D scalar image (the off-resonance field, a Jacobian image, ...).
#[derive(Clone, Debug)]
pub struct Volume {
    pub grid: Grid,
    pub data: Array3<f32>,
}

impl Volume {
    pub fn new(grid: Grid, data: Array3<f32>) -> Self {
        assert_eq!(data.dim(), (grid.dims[0], grid.dims[1], grid.dims[2]));
        Volume { grid, data }
    }

    pub fn zeros(grid: Grid) -> Self {
        let [nx, ny, nz] = grid.dims;
        Volume {
            data: Array3::zeros((nx, ny, nz)),
            grid,
        }
    }
}

/// A 4-D DWI series: axes 0..2 spatial, axis 3 the volume index.
#[derive(Clone, Debug)]
pub struct Series {
    pub grid: Grid,
    pub data: Array4<f32>,
}

impl Series {
    pub fn new(grid: Grid, data: Array4<f32>) -> Self {
        assert_eq!(
            (data.dim().0, data.dim().1, data.dim().2),
            (grid.dims[0], grid.dims[1], grid.dims[2])
        );
        Series { grid, data }
    }

    pub fn zeros(grid: Grid, volumes: usize) -> Self {
        let [nx, ny, nz] = grid.dims;
        Series {
            data: Array4::zeros((nx, ny, nz, volumes)),
            grid,
        }
    }

    pub fn volume_count(&self) -> usize {
        self.data.len_of(Axis(3))
    }

    /// Read-only view of one volume of the series.
    pub fn volume(&self, v: usize) -> ArrayView3<f32> {
        self.data.index_axis(Axis(3), v)
    }
}
