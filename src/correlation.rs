//! Spatial correlation between a reproduced statistical map and a reference map.

use log::debug;
use ndarray::{Array2, ArrayD};
use ndarray_stats::CorrelationExt;

use std::path::Path;

use crate::error::{NarpsError, Result};
use crate::nifti::read_nifti;
use crate::traits::MapComparator;


/// Pearson correlation over the voxels that are finite and non-zero in both volumes.
///
/// Zero is the background value of thresholded and masked statistical maps.
pub fn masked_correlation(left: &ArrayD<f64>, right: &ArrayD<f64>) -> Result<f64> {
    if left.shape() != right.shape() {
        return Err(NarpsError::ShapeMismatch(left.shape().to_vec(), right.shape().to_vec()));
    }

    let pairs: Vec<(f64, f64)> = left
        .iter()
        .zip(right.iter())
        .filter(|(a, b)| a.is_finite() && b.is_finite() && **a != 0. && **b != 0.)
        .map(|(a, b)| (*a, *b))
        .collect();

    let n = pairs.len();
    if n < 2 {
        return Err(NarpsError::DegenerateCorrelation(n));
    }

    let observations = Array2::from_shape_fn((2, n), |(row, col)| {
        if row == 0 { pairs[col].0 } else { pairs[col].1 }
    });
    let matrix = observations
        .pearson_correlation()
        .map_err(|_| NarpsError::DegenerateCorrelation(n))?;

    let coefficient = matrix[[0, 1]];
    if !coefficient.is_finite() {
        return Err(NarpsError::DegenerateCorrelation(n));
    }
    debug!("Correlation {:.4} over {} voxels", coefficient, n);
    Ok(coefficient)
}


/// Read two NIfTI volumes and correlate them with [`masked_correlation`].
pub fn correlation_coefficient<P: AsRef<Path>, Q: AsRef<Path>>(reproduced: P, reference: Q) -> Result<f64> {
    let reproduced = read_nifti(reproduced)?;
    let reference = read_nifti(reference)?;
    masked_correlation(&reproduced.data, &reference.data)
}


/// Compares NIfTI maps on disk.
#[derive(Debug, Clone, Copy, Default)]
pub struct NiftiCorrelation;

impl MapComparator for NiftiCorrelation {
    fn correlation(&self, reproduced: &Path, reference: &Path) -> Result<f64> {
        correlation_coefficient(reproduced, reference)
    }
}


#[cfg(test)]
mod test {
    use super::*;
    use ndarray::IxDyn;

    fn volume(values: Vec<f64>) -> ArrayD<f64> {
        ArrayD::from_shape_vec(IxDyn(&[values.len()]), values).unwrap()
    }

    #[test]
    fn identical_maps_correlate_perfectly() {
        let a = volume(vec![1.0, 2.0, 3.0, 5.0]);
        let r = masked_correlation(&a, &a).unwrap();
        assert!((r - 1.0).abs() < 1e-12);
    }

    #[test]
    fn background_and_nan_voxels_are_ignored() {
        let a = volume(vec![1.0, 2.0, 3.0, 0.0, f64::NAN, 100.0]);
        let b = volume(vec![-1.0, -2.0, -3.0, 50.0, 7.0, 0.0]);
        let r = masked_correlation(&a, &b).unwrap();
        assert!((r + 1.0).abs() < 1e-12);
    }

    #[test]
    fn shapes_must_match() {
        let a = volume(vec![1.0, 2.0]);
        let b = volume(vec![1.0, 2.0, 3.0]);
        assert!(matches!(masked_correlation(&a, &b), Err(NarpsError::ShapeMismatch(_, _))));
    }

    #[test]
    fn constant_maps_have_no_correlation() {
        let a = volume(vec![1.0, 1.0, 1.0]);
        let b = volume(vec![1.0, 2.0, 3.0]);
        assert!(matches!(masked_correlation(&a, &b), Err(NarpsError::DegenerateCorrelation(3))));
    }
}
