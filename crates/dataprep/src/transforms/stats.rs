//! Descriptive statistics over columns with missing values.
//!
//! All functions skip missing (`None` or NaN) cells and return `None` when
//! too few values remain.

use std::cmp::Ordering;

/// Present, non-NaN values in order
pub fn present(values: &[Option<f64>]) -> Vec<f64> {
    values
        .iter()
        .filter_map(|v| v.filter(|x| !x.is_nan()))
        .collect()
}

pub fn mean(values: &[Option<f64>]) -> Option<f64> {
    let xs = present(values);
    if xs.is_empty() {
        return None;
    }
    Some(xs.iter().sum::<f64>() / xs.len() as f64)
}

/// Standard deviation with `ddof` delta degrees of freedom
pub fn std_dev(values: &[Option<f64>], ddof: usize) -> Option<f64> {
    let xs = present(values);
    if xs.len() <= ddof {
        return None;
    }
    let mean = xs.iter().sum::<f64>() / xs.len() as f64;
    let ss: f64 = xs.iter().map(|x| (x - mean).powi(2)).sum();
    Some((ss / (xs.len() - ddof) as f64).sqrt())
}

pub fn min(values: &[Option<f64>]) -> Option<f64> {
    present(values).into_iter().reduce(f64::min)
}

pub fn max(values: &[Option<f64>]) -> Option<f64> {
    present(values).into_iter().reduce(f64::max)
}

pub fn median(values: &[Option<f64>]) -> Option<f64> {
    quantile(values, 0.5)
}

/// Quantile with linear interpolation between closest ranks
pub fn quantile(values: &[Option<f64>], q: f64) -> Option<f64> {
    let mut xs = present(values);
    if xs.is_empty() {
        return None;
    }
    xs.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));

    let position = q.clamp(0.0, 1.0) * (xs.len() - 1) as f64;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    let fraction = position - lower as f64;
    Some(xs[lower] + (xs[upper] - xs[lower]) * fraction)
}

/// Most frequent value; ties go to the smallest
pub fn mode(values: &[Option<f64>]) -> Option<f64> {
    let mut xs = present(values);
    xs.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    most_frequent_sorted(&xs)
}

/// Most frequent string; ties go to the lexicographically smallest
pub fn mode_str(values: &[Option<String>]) -> Option<String> {
    let mut xs: Vec<&str> = values.iter().flatten().map(String::as_str).collect();
    xs.sort_unstable();
    most_frequent_sorted(&xs).map(str::to_string)
}

pub(crate) fn most_frequent_sorted<T: PartialEq + Copy>(sorted: &[T]) -> Option<T> {
    let mut best: Option<(T, usize)> = None;
    let mut i = 0;
    while i < sorted.len() {
        let run = sorted[i..].iter().take_while(|x| **x == sorted[i]).count();
        if best.map_or(true, |(_, n)| run > n) {
            best = Some((sorted[i], run));
        }
        i += run;
    }
    best.map(|(value, _)| value)
}
