pub mod nifti;
pub mod tables;
