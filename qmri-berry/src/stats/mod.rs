//! 脑区统计.
//!
//! 每个脑区 (或脑区分组) 在每种定量图上计算均值, 中位数, 第 1/99 百分位数
//! 和总体标准差. 统计直接作用于原始体素值, 不做平滑, 不剔除离群值.

use ordered_float::OrderedFloat;

mod aggregate;
mod grouping;
mod table;

pub use aggregate::{aggregate, aggregate_custom, LabelValueIndex};
pub use grouping::{RegionGroup, RegionGrouping};
pub use table::{RegionRow, RegionStatisticsTable};

/// 一组体素值的描述统计量.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Summary {
    /// 均值.
    pub mean: f64,
    /// 中位数.
    pub median: f64,
    /// 第 1 百分位数.
    pub p1: f64,
    /// 第 99 百分位数.
    pub p99: f64,
    /// 总体标准差 (除以 `n`).
    pub std: f64,
}

/// 已升序排列的数据的第 `p` 百分位数 (`0 <= p <= 100`).
///
/// 在相邻次序统计量之间线性插值: 秩为 `p / 100 * (n - 1)`.
/// `sorted` 为空时返回 NaN.
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    let n = sorted.len();
    if n == 0 {
        return f64::NAN;
    }
    let rank = (p / 100.0).clamp(0.0, 1.0) * (n - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let t = rank - lo as f64;
    if lo == hi {
        sorted[lo]
    } else {
        sorted[lo] + (sorted[hi] - sorted[lo]) * t
    }
}

/// 计算描述统计量. `values` 为空时返回 `None`.
pub fn summarize(values: &[f64]) -> Option<Summary> {
    if values.is_empty() {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;

    let mut sorted = values.to_vec();
    sorted.sort_unstable_by_key(|&v| OrderedFloat(v));
    Some(Summary {
        mean,
        median: percentile(&sorted, 50.0),
        p1: percentile(&sorted, 1.0),
        p99: percentile(&sorted, 99.0),
        std: var.sqrt(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_percentile_interpolates() {
        let v: Vec<f64> = (1..=5).map(f64::from).collect();
        assert!(close(percentile(&v, 0.0), 1.0));
        assert!(close(percentile(&v, 50.0), 3.0));
        assert!(close(percentile(&v, 100.0), 5.0));
        // rank = 0.01 * 4 = 0.04
        assert!(close(percentile(&v, 1.0), 1.04));
        // rank = 0.99 * 4 = 3.96
        assert!(close(percentile(&v, 99.0), 4.96));
        assert!(percentile(&[], 50.0).is_nan());
    }

    #[test]
    fn test_summary() {
        let s = summarize(&[4.0, 1.0, 3.0, 2.0]).unwrap();
        assert!(close(s.mean, 2.5));
        assert!(close(s.median, 2.5));
        assert!(close(s.std, 1.25f64.sqrt()));
        assert!(s.p1 <= s.p99);
        assert!(summarize(&[]).is_none());
    }

    #[test]
    fn test_single_value() {
        let s = summarize(&[7.5]).unwrap();
        assert_eq!(s.mean, 7.5);
        assert_eq!(s.median, 7.5);
        assert_eq!(s.p1, 7.5);
        assert_eq!(s.p99, 7.5);
        assert_eq!(s.std, 0.0);
    }
}
