//! Statistics functions

use ndarray::prelude::*;
use ndarray::DataMut;
use ndarray_stats::errors::QuantileError;
use ndarray_stats::CorrelationExt;
use num_traits::FromPrimitive;
use std::cmp::Ordering;
use std::ops::{Add, Div, Mul, Rem, Sub};

/// Return the median. Sorts its argument in place.
pub fn median_mut<S, T>(xs: &mut ArrayBase<S, Ix1>) -> Result<T, QuantileError>
where
    S: DataMut<Elem = T>,
    T: Clone + Copy + Ord + FromPrimitive,
    T: Add<Output = T> + Sub<Output = T> + Mul<Output = T> + Div<Output = T> + Rem<Output = T>,
{
    if xs.is_empty() {
        return Err(QuantileError::EmptyInput);
    }
    match xs.as_slice_mut() {
        Some(vector) => vector.sort_unstable(),
        None => panic!("An attempt was made to calculate a median value for non-contiguous data"),
    }
    let n = xs.len();
    Ok(if n % 2 == 0 {
        (xs[n / 2] + xs[n / 2 - 1]) / T::from_u64(2).ok_or(QuantileError::EmptyInput)?
    } else {
        xs[n / 2]
    })
}

/// 1-based ranks of `values`, with tied values sharing the mean of the ranks they span.
/// NaN sorts last.
pub fn rank_average<S>(values: &ArrayBase<S, Ix1>) -> Array1<f64>
where
    S: ndarray::Data<Elem = f64>,
{
    let n = values.len();
    let mut order = (0..n).collect::<Vec<_>>();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));

    let mut ranks = Array1::zeros(n);
    let mut start = 0;
    while start < n {
        let mut end = start;
        while end + 1 < n && values[order[end + 1]].total_cmp(&values[order[start]]) == Ordering::Equal {
            end += 1;
        }
        let rank = (start + end) as f64 / 2.0 + 1.0;
        for &i in &order[start..=end] {
            ranks[i] = rank;
        }
        start = end + 1;
    }
    ranks
}

/// True if every value equals the first one
pub fn is_constant<S>(values: &ArrayBase<S, Ix1>) -> bool
where
    S: ndarray::Data<Elem = f64>,
{
    match values.iter().next() {
        None => true,
        Some(&first) => values.iter().all(|&v| v == first),
    }
}

/// Pearson correlation of two equal-length vectors. `None` when fewer than two values are
/// given or either vector has zero variance.
pub fn pearson(x: ArrayView1<f64>, y: ArrayView1<f64>) -> Option<f64> {
    if x.len() < 2 || x.len() != y.len() {
        return None;
    }
    let pair = ndarray::stack(Axis(0), &[x.view(), y.view()]).ok()?;
    let r = pair.pearson_correlation().ok()?[[0, 1]];
    r.is_finite().then(|| r.clamp(-1.0, 1.0))
}
