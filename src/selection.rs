//! Per-pixel image selection along the image axis.
//!
//! Inputs are `(image, row, col)` criterion arrays where NaN marks a masked
//! candidate. Each selector returns, per pixel, the image position that
//! wins, or `None` when every candidate is masked.

use ndarray::{Array2, ArrayView1, ArrayView3, Axis, Zip};

/// Winning image index per pixel of one block.
pub type WinnerMap = Array2<Option<usize>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selector {
    Max,
    Min,
    Median,
}

impl Selector {
    pub fn name(&self) -> &'static str {
        match self {
            Selector::Max => "max",
            Selector::Min => "min",
            Selector::Median => "median",
        }
    }

    pub fn select(&self, values: ArrayView3<f64>) -> WinnerMap {
        match self {
            Selector::Max => select_with(values, |lane| first_extreme(lane, |a, b| a > b)),
            Selector::Min => select_with(values, |lane| first_extreme(lane, |a, b| a < b)),
            Selector::Median => select_with(values, nearest_to_median),
        }
    }
}

fn select_with<F>(values: ArrayView3<f64>, pick: F) -> WinnerMap
where
    F: Fn(ArrayView1<f64>) -> Option<usize> + Sync + Send,
{
    let (_, rows, cols) = values.dim();
    let mut winners = Array2::from_elem((rows, cols), None);

    // Rows are independent; the result does not depend on scheduling
    Zip::from(&mut winners)
        .and(values.lanes(Axis(0)))
        .par_for_each(|slot, lane| *slot = pick(lane));

    winners
}

/// Position of the first value that no later value beats.
fn first_extreme(lane: ArrayView1<f64>, beats: impl Fn(f64, f64) -> bool) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (i, &v) in lane.iter().enumerate() {
        if v.is_nan() {
            continue;
        }
        match best {
            Some((_, b)) if !beats(v, b) => {}
            _ => best = Some((i, v)),
        }
    }
    best.map(|(i, _)| i)
}

/// Position of the value closest to the median of the valid values.
/// Even counts use the mean of the two middle values; the first of equally
/// close candidates wins.
fn nearest_to_median(lane: ArrayView1<f64>) -> Option<usize> {
    let mut valid: Vec<f64> = lane.iter().copied().filter(|v| !v.is_nan()).collect();
    if valid.is_empty() {
        return None;
    }
    valid.sort_by(|a, b| a.total_cmp(b));

    let n = valid.len();
    let median = if n % 2 == 1 {
        valid[n / 2]
    } else {
        (valid[n / 2 - 1] + valid[n / 2]) / 2.0
    };

    let mut best: Option<(usize, f64)> = None;
    for (i, &v) in lane.iter().enumerate() {
        if v.is_nan() {
            continue;
        }
        // inf - inf is NaN
        let dist = if v == median { 0.0 } else { (v - median).abs() };
        match best {
            Some((_, d)) if dist >= d => {}
            _ => best = Some((i, dist)),
        }
    }
    best.map(|(i, _)| i)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr1, Array3};

    fn stack(values: &[f64]) -> Array3<f64> {
        Array3::from_shape_vec((values.len(), 1, 1), values.to_vec()).unwrap()
    }

    #[test]
    fn test_max_picks_largest() {
        let data = stack(&[0.6, 0.818, 0.1]);
        assert_eq!(Selector::Max.select(data.view())[[0, 0]], Some(1));
    }

    #[test]
    fn test_min_picks_smallest() {
        let data = stack(&[5.0, 50.0, 20.0]);
        assert_eq!(Selector::Min.select(data.view())[[0, 0]], Some(0));
    }

    #[test]
    fn test_ties_keep_first_image() {
        let data = stack(&[3.0, 7.0, 7.0, 3.0]);
        assert_eq!(Selector::Max.select(data.view())[[0, 0]], Some(1));
        assert_eq!(Selector::Min.select(data.view())[[0, 0]], Some(0));
    }

    #[test]
    fn test_median_odd_count() {
        let data = stack(&[0.8, 0.2, 0.5]);
        assert_eq!(Selector::Median.select(data.view())[[0, 0]], Some(2));
    }

    #[test]
    fn test_median_is_not_mean() {
        // mean 26.5 would pick index 2; median 2.5 ties 2.0 and 3.0, first wins
        let data = stack(&[1.0, 2.0, 3.0, 100.0]);
        assert_eq!(Selector::Median.select(data.view())[[0, 0]], Some(1));

        let data = stack(&[0.2, 0.5, 0.8, 0.9, 0.1]);
        assert_eq!(Selector::Median.select(data.view())[[0, 0]], Some(1));
    }

    #[test]
    fn test_masked_candidates_are_skipped() {
        let data = stack(&[f64::NAN, 2.0, f64::NAN, 1.0]);
        assert_eq!(Selector::Max.select(data.view())[[0, 0]], Some(1));
        assert_eq!(Selector::Min.select(data.view())[[0, 0]], Some(3));
        assert_eq!(Selector::Median.select(data.view())[[0, 0]], Some(1));
    }

    #[test]
    fn test_all_masked_has_no_winner() {
        let data = stack(&[f64::NAN, f64::NAN]);
        for sel in [Selector::Max, Selector::Min, Selector::Median] {
            assert_eq!(sel.select(data.view())[[0, 0]], None, "{}", sel.name());
        }
    }

    #[test]
    fn test_median_with_infinities() {
        let lane = arr1(&[f64::INFINITY, f64::INFINITY, 1.0]);
        assert_eq!(nearest_to_median(lane.view()), Some(0));
    }

    #[test]
    fn test_selection_is_per_pixel() {
        // 2 images, 1x3 block
        let data = Array3::from_shape_vec((2, 1, 3), vec![1.0, 9.0, 5.0, 4.0, 2.0, 5.0]).unwrap();
        let winners = Selector::Max.select(data.view());
        assert_eq!(winners.dim(), (1, 3));
        assert_eq!(winners.row(0).to_vec(), vec![Some(1), Some(0), Some(0)]);
    }
}
