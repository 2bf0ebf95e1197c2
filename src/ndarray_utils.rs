//! A collection of various array utilities needed in this library:
//! argument extrema, medians, and row-band reductions over detector frames.

use ndarray::{Array1, ArrayView1, ArrayView2, Axis};

use crate::Float;

pub(crate) fn argmax<F>(arr: ArrayView1<'_, F>) -> usize
where
    F: Float,
{
    arr.indexed_iter()
        .reduce(|acc, f| if acc.1 >= f.1 { acc } else { f })
        .unwrap()
        .0
}

pub(crate) fn min<F: Float>(arr: ArrayView1<F>) -> F {
    *arr.iter()
        .min_by(|f1, f2| f1.partial_cmp(f2).expect("found nan"))
        .expect("empty iterator")
}

pub(crate) fn max<F: Float>(arr: ArrayView1<F>) -> F {
    *arr.iter()
        .max_by(|f1, f2| f1.partial_cmp(f2).expect("found nan"))
        .expect("empty iterator")
}

pub(crate) fn mean<F: Float>(arr: ArrayView1<F>) -> F {
    arr.sum() / F::from_usize(arr.len()).unwrap()
}

/// Median of a 1-D view. Averages the two central elements for even lengths.
pub(crate) fn median<F: Float>(arr: ArrayView1<F>) -> F {
    let mut sorted: Vec<F> = arr.iter().copied().collect();
    sorted.sort_unstable_by(|f1, f2| f1.partial_cmp(f2).expect("found nan"));
    let n = sorted.len();
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) / F::from_f64(2.).unwrap()
    }
}

/// Column-wise median over all rows of a 2-D view.
pub(crate) fn median_axis0<F: Float>(arr: ArrayView2<F>) -> Array1<F> {
    arr.map_axis(Axis(0), |col| median(col.view()))
}

/// Row-wise median over all columns of a 2-D view.
pub(crate) fn median_axis1<F: Float>(arr: ArrayView2<F>) -> Array1<F> {
    arr.map_axis(Axis(1), |row| median(row.view()))
}
