//! 配准相似性度量. 所有度量都是 "越小越好".

use itertools::izip;
use ndarray::ArrayView3;

use super::resample::linear_at;
use crate::config::Metric;
use crate::data::Affine;
use crate::{MaskVolume, NiftiHeaderAttr, ScalarVolume};

/// Mattes 互信息的直方图箱数.
const MATTES_BINS: usize = 32;

/// 固定图像上的采样点: 世界坐标与强度.
#[derive(Debug, Clone, Default)]
pub(crate) struct FixedSamples {
    points: Vec<[f64; 3]>,
    values: Vec<f64>,
}

impl FixedSamples {
    /// 在 `mask` 前景内每隔 `stride` 个体素取一个点, 总数超过 `max` 时再均匀抽稀.
    pub fn collect(fixed: &ScalarVolume, mask: &MaskVolume, stride: usize, max: usize) -> Self {
        let stride = stride.max(1);
        let affine = fixed.affine();
        let candidates: Vec<_> = mask
            .data()
            .indexed_iter()
            .filter(|(pos, &m)| {
                m != 0 && pos.0 % stride == 0 && pos.1 % stride == 0 && pos.2 % stride == 0
            })
            .map(|(pos, _)| pos)
            .filter(|&pos| fixed[pos].is_finite())
            .collect();
        let step = candidates.len().div_ceil(max.max(1)).max(1);
        let mut ans = Self::default();
        for pos in candidates.into_iter().step_by(step) {
            ans.points.push(affine.index_to_world(pos));
            ans.values.push(fixed[pos] as f64);
        }
        ans
    }

    /// 采样点个数.
    #[inline]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// 是否没有采样点.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// 最小值与最大值.
fn range<I: IntoIterator<Item = f64>>(it: I) -> (f64, f64) {
    it.into_iter()
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(v), hi.max(v))
        })
}

/// 度量求值器. 一次配准的每一层共用一个.
pub(crate) struct MetricEvaluator<'a> {
    metric: Metric,
    samples: &'a FixedSamples,
    moving: ArrayView3<'a, f32>,
    moving_inv: Affine,
    fixed_range: (f64, f64),
    moving_range: (f64, f64),
}

impl<'a> MetricEvaluator<'a> {
    /// `moving_inv` 为运动图像的世界-体素矩阵.
    pub fn new(
        metric: Metric,
        samples: &'a FixedSamples,
        moving: &'a ScalarVolume,
        moving_inv: Affine,
    ) -> Self {
        Self {
            metric,
            samples,
            moving: moving.data(),
            moving_inv,
            fixed_range: range(samples.values.iter().copied()),
            moving_range: range(moving.data().iter().map(|&v| v as f64)),
        }
    }

    /// 在变换 `t` (固定世界坐标 -> 运动世界坐标) 下的度量值.
    ///
    /// 落在运动图像视野内的采样点少于四分之一时返回 `None`.
    pub fn cost(&self, t: &Affine) -> Option<f64> {
        let map = self.moving_inv.compose(t);
        let mut fixed = Vec::with_capacity(self.samples.len());
        let mut moving = Vec::with_capacity(self.samples.len());
        for (p, &f) in self.samples.points.iter().zip(self.samples.values.iter()) {
            let [i, j, k] = map.apply(*p);
            if let Some(m) = linear_at(&self.moving, [k, j, i]) {
                if m.is_finite() {
                    fixed.push(f);
                    moving.push(m);
                }
            }
        }
        if fixed.len() < 8 || fixed.len() * 4 < self.samples.len() {
            return None;
        }
        Some(match self.metric {
            Metric::MeanSquares => mean_squares(&fixed, &moving),
            Metric::GC => -pearson(&fixed, &moving).unwrap_or(0.0),
            Metric::Mattes => -mutual_information(
                &fixed,
                &moving,
                self.fixed_range,
                self.moving_range,
            ),
        })
    }
}

/// 均方差.
pub(crate) fn mean_squares(a: &[f64], b: &[f64]) -> f64 {
    let n = a.len().min(b.len());
    if n == 0 {
        return 0.0;
    }
    izip!(a, b).map(|(x, y)| (x - y) * (x - y)).sum::<f64>() / n as f64
}

/// Pearson 相关系数. 任一方方差为 0 或样本为空时返回 `None`.
pub(crate) fn pearson(a: &[f64], b: &[f64]) -> Option<f64> {
    let n = a.len().min(b.len());
    if n == 0 {
        return None;
    }
    let nf = n as f64;
    let ma = a.iter().take(n).sum::<f64>() / nf;
    let mb = b.iter().take(n).sum::<f64>() / nf;
    let (mut sab, mut saa, mut sbb) = (0.0, 0.0, 0.0);
    for (x, y) in izip!(a, b) {
        let (dx, dy) = (x - ma, y - mb);
        sab += dx * dy;
        saa += dx * dx;
        sbb += dy * dy;
    }
    if saa <= 0.0 || sbb <= 0.0 {
        return None;
    }
    let r = sab / (saa * sbb).sqrt();
    r.is_finite().then_some(r.clamp(-1.0, 1.0))
}

/// 值在直方图中的连续箱坐标, 范围 `[0, bins - 1]`.
#[inline]
fn bin_position(v: f64, (lo, hi): (f64, f64), bins: usize) -> f64 {
    if hi <= lo {
        return 0.0;
    }
    ((v - lo) / (hi - lo) * (bins - 1) as f64).clamp(0.0, (bins - 1) as f64)
}

/// 以部分体积 (双线性) 分箱估计的互信息.
pub(crate) fn mutual_information(
    fixed: &[f64],
    moving: &[f64],
    fixed_range: (f64, f64),
    moving_range: (f64, f64),
) -> f64 {
    const B: usize = MATTES_BINS;
    let mut joint = [[0.0f64; B]; B];
    for (&f, &m) in izip!(fixed, moving) {
        let x = bin_position(f, fixed_range, B);
        let y = bin_position(m, moving_range, B);
        let (x0, y0) = (x.floor() as usize, y.floor() as usize);
        let (x1, y1) = ((x0 + 1).min(B - 1), (y0 + 1).min(B - 1));
        let (tx, ty) = (x - x0 as f64, y - y0 as f64);
        joint[x0][y0] += (1.0 - tx) * (1.0 - ty);
        joint[x1][y0] += tx * (1.0 - ty);
        joint[x0][y1] += (1.0 - tx) * ty;
        joint[x1][y1] += tx * ty;
    }
    let total: f64 = joint.iter().flatten().sum();
    if total <= 0.0 {
        return 0.0;
    }
    let pf: Vec<f64> = joint.iter().map(|r| r.iter().sum::<f64>() / total).collect();
    let pm: Vec<f64> = (0..B)
        .map(|c| joint.iter().map(|r| r[c]).sum::<f64>() / total)
        .collect();
    let mut mi = 0.0;
    for (a, row) in joint.iter().enumerate() {
        for (b, &v) in row.iter().enumerate() {
            if v > 0.0 {
                let p = v / total;
                mi += p * (p / (pf[a] * pm[b])).ln();
            }
        }
    }
    mi
}
