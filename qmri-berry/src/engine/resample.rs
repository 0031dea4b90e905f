//! 重采样核.
//!
//! 所有重采样都是 "拉取" 式的: 对目标网格的每个体素, 求出它的世界坐标,
//! 经变换映射到源图像的世界坐标, 再转换为源图像的连续体素坐标并插值.
//! 落在源图像视野 `[-0.5, n - 0.5]` 之外的体素取 0.

use ndarray::{Array3, ArrayView3, ArrayViewMut2, Axis};
use nifti::NiftiHeader;

use super::{Interpolation, SpatialTransform};
use crate::data::Affine;
use crate::error::RegistrationError;
use crate::{Idx3d, LabelVolume, NiftiHeaderAttr, ScalarVolume, Volume};

cfg_if::cfg_if! {
    if #[cfg(feature = "rayon")] {
        use rayon::iter::{IndexedParallelIterator, IntoParallelIterator, ParallelIterator};
    }
}

/// 目标网格体素坐标 `(i, j, k)` 到源网格体素坐标 `(i, j, k)` 的矩阵.
pub(crate) fn voxel_map(
    source: &Affine,
    target: &Affine,
    transform: &SpatialTransform,
) -> Result<Affine, RegistrationError> {
    let source_inv = source.inverse().ok_or(RegistrationError::NotInvertible)?;
    Ok(source_inv.compose(transform.affine()).compose(target))
}

/// 以 `(z, h, w)` 顺序求目标体素在源网格中的连续坐标.
#[inline]
pub(crate) fn source_index(map: &Affine, pos: Idx3d) -> [f64; 3] {
    let [i, j, k] = map.index_to_world(pos);
    [k, j, i]
}

/// 连续坐标是否位于长度为 `n` 的轴的视野内.
#[inline]
fn inside(x: f64, n: usize) -> bool {
    -0.5 <= x && x <= n as f64 - 0.5
}

#[inline]
fn inside3(p: [f64; 3], (z, h, w): Idx3d) -> bool {
    inside(p[0], z) && inside(p[1], h) && inside(p[2], w)
}

/// 最近邻取值. 视野外返回 `None`.
#[inline]
pub fn nearest_at<T: Copy>(data: &ArrayView3<T>, p: [f64; 3]) -> Option<T> {
    let shape = data.dim();
    if !inside3(p, shape) {
        return None;
    }
    let r = |x: f64, n: usize| (x.round().max(0.0) as usize).min(n - 1);
    Some(data[(r(p[0], shape.0), r(p[1], shape.1), r(p[2], shape.2))])
}

/// 三线性插值. 视野外返回 `None`, 视野内靠边处取边界值.
pub fn linear_at(data: &ArrayView3<f32>, p: [f64; 3]) -> Option<f64> {
    let shape = data.dim();
    if !inside3(p, shape) {
        return None;
    }
    // 每个轴上的两个下标与权重.
    let axis = |x: f64, n: usize| -> ([usize; 2], [f64; 2]) {
        let x = x.clamp(0.0, (n - 1) as f64);
        let lo = x.floor() as usize;
        let hi = (lo + 1).min(n - 1);
        let t = x - lo as f64;
        ([lo, hi], [1.0 - t, t])
    };
    let (zi, zw) = axis(p[0], shape.0);
    let (hi, hw) = axis(p[1], shape.1);
    let (wi, ww) = axis(p[2], shape.2);
    let mut ans = 0.0;
    for a in 0..2 {
        for b in 0..2 {
            for c in 0..2 {
                let weight = zw[a] * hw[b] * ww[c];
                if weight != 0.0 {
                    ans += weight * data[(zi[a], hi[b], wi[c])] as f64;
                }
            }
        }
    }
    Some(ans)
}

/// 三次 B 样条插值的极点.
const POLE: f64 = -0.267_949_192_431_122_7; // sqrt(3) - 2

/// 镜像边界下的下标折叠.
#[inline]
fn mirror(k: isize, n: usize) -> usize {
    if n == 1 {
        return 0;
    }
    let period = 2 * n as isize - 2;
    let k = k.rem_euclid(period);
    if k >= n as isize {
        (period - k) as usize
    } else {
        k as usize
    }
}

/// 因果滤波初值 (镜像边界).
fn causal_init(c: &[f64]) -> f64 {
    let n = c.len();
    let horizon = (1e-10f64.ln() / POLE.abs().ln()).ceil() as usize;
    if horizon < n {
        let mut zn = POLE;
        let mut sum = c[0];
        for v in &c[1..horizon] {
            sum += zn * v;
            zn *= POLE;
        }
        return sum;
    }
    let iz = 1.0 / POLE;
    let mut zn = POLE;
    let mut z2n = POLE.powi(n as i32 - 1);
    let mut sum = c[0] + z2n * c[n - 1];
    z2n *= z2n * iz;
    for v in &c[1..n - 1] {
        sum += (zn + z2n) * v;
        zn *= POLE;
        z2n *= iz;
    }
    sum / (1.0 - zn * zn)
}

/// 就地把一行采样值转换为三次 B 样条系数.
fn prefilter_line(c: &mut [f64]) {
    let n = c.len();
    if n < 2 {
        return;
    }
    let gain = (1.0 - POLE) * (1.0 - 1.0 / POLE);
    c.iter_mut().for_each(|v| *v *= gain);

    c[0] = causal_init(c);
    for k in 1..n {
        c[k] += POLE * c[k - 1];
    }
    c[n - 1] = (POLE / (POLE * POLE - 1.0)) * (POLE * c[n - 2] + c[n - 1]);
    for k in (0..n - 1).rev() {
        c[k] = POLE * (c[k + 1] - c[k]);
    }
}

/// 三次 B 样条基函数在 `t ∈ [0, 1)` 处的 4 个权重.
#[inline]
fn cubic_weights(t: f64) -> [f64; 4] {
    let t2 = t * t;
    let t3 = t2 * t;
    let s = 1.0 - t;
    [
        s * s * s / 6.0,
        (4.0 - 6.0 * t2 + 3.0 * t3) / 6.0,
        (1.0 + 3.0 * t + 3.0 * t2 - 3.0 * t3) / 6.0,
        t3 / 6.0,
    ]
}

/// 三次 B 样条系数场. 构建时对每个轴做一次递归预滤波,
/// 之后插值结果精确经过原采样点.
#[derive(Debug, Clone)]
pub struct BSplineCoefficients {
    coef: Array3<f64>,
}

impl BSplineCoefficients {
    /// 对体素数组预滤波.
    pub fn new(data: &ArrayView3<f32>) -> Self {
        let mut coef = data.mapv(f64::from);
        let mut line = Vec::new();
        for axis in 0..3 {
            for mut lane in coef.lanes_mut(Axis(axis)) {
                line.clear();
                line.extend(lane.iter().copied());
                prefilter_line(&mut line);
                lane.iter_mut().zip(line.iter()).for_each(|(d, s)| *d = *s);
            }
        }
        Self { coef }
    }

    /// 插值. 视野外返回 `None`.
    pub fn at(&self, p: [f64; 3]) -> Option<f64> {
        let shape = self.coef.dim();
        if !inside3(p, shape) {
            return None;
        }
        let axis = |x: f64, n: usize| -> ([usize; 4], [f64; 4]) {
            let f = x.floor();
            let base = f as isize - 1;
            (
                std::array::from_fn(|d| mirror(base + d as isize, n)),
                cubic_weights(x - f),
            )
        };
        let (zi, zw) = axis(p[0], shape.0);
        let (hi, hw) = axis(p[1], shape.1);
        let (wi, ww) = axis(p[2], shape.2);
        let mut ans = 0.0;
        for a in 0..4 {
            for b in 0..4 {
                let zh = zw[a] * hw[b];
                for c in 0..4 {
                    ans += zh * ww[c] * self.coef[(zi[a], hi[b], wi[c])];
                }
            }
        }
        Some(ans)
    }
}

/// 逐 z 切片填充 `out`. 开启 `rayon` 特性时各切片并行.
fn fill_slices<T, F>(out: &mut Array3<T>, f: F)
where
    T: Send + Sync,
    F: Fn(Idx3d) -> T + Sync,
{
    let fill = |(z, mut s): (usize, ArrayViewMut2<T>)| {
        for ((h, w), v) in s.indexed_iter_mut() {
            *v = f((z, h, w));
        }
    };
    cfg_if::cfg_if! {
        if #[cfg(feature = "rayon")] {
            out.axis_iter_mut(Axis(0)).into_par_iter().enumerate().for_each(fill);
        } else {
            out.axis_iter_mut(Axis(0)).enumerate().for_each(fill);
        }
    }
}

/// 目标网格形状.
#[inline]
fn target_shape(target: &NiftiHeader) -> Idx3d {
    target.shape()
}

/// 把连续值图像重采样到 `target` 网格上. `transform` 把目标世界坐标映射到源世界坐标.
pub fn resample_scalar(
    source: &ScalarVolume,
    target: &NiftiHeader,
    transform: &SpatialTransform,
    interpolation: Interpolation,
) -> Result<ScalarVolume, RegistrationError> {
    let map = voxel_map(&source.affine(), &target.affine(), transform)?;
    let data = source.data();
    let mut out = Array3::<f32>::zeros(target_shape(target));
    match interpolation {
        Interpolation::NearestNeighbor => fill_slices(&mut out, |pos| {
            nearest_at(&data, source_index(&map, pos)).unwrap_or(0.0)
        }),
        Interpolation::Linear => fill_slices(&mut out, |pos| {
            linear_at(&data, source_index(&map, pos)).map_or(0.0, |v| v as f32)
        }),
        Interpolation::BSpline => {
            let coef = BSplineCoefficients::new(&data);
            fill_slices(&mut out, |pos| {
                coef.at(source_index(&map, pos)).map_or(0.0, |v| v as f32)
            })
        }
    }
    Ok(Volume::from_header(target, out))
}

/// 用最近邻把标签重采样到 `target` 网格上.
pub fn resample_labels(
    source: &LabelVolume,
    target: &NiftiHeader,
    transform: &SpatialTransform,
) -> Result<LabelVolume, RegistrationError> {
    let map = voxel_map(&source.affine(), &target.affine(), transform)?;
    let data = source.data();
    let mut out = Array3::<u32>::zeros(target_shape(target));
    fill_slices(&mut out, |pos| {
        nearest_at(&data, source_index(&map, pos)).unwrap_or(crate::consts::label::BACKGROUND)
    });
    Ok(Volume::from_header(target, out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransformKind;

    fn ramp(shape: Idx3d) -> Array3<f32> {
        Array3::from_shape_fn(shape, |(z, h, w)| (2 * z + 3 * h + 5 * w) as f32)
    }

    #[test]
    fn test_mirror() {
        assert_eq!(mirror(-1, 5), 1);
        assert_eq!(mirror(-2, 5), 2);
        assert_eq!(mirror(5, 5), 3);
        assert_eq!(mirror(6, 5), 2);
        assert_eq!(mirror(3, 1), 0);
    }

    #[test]
    fn test_linear_is_exact_on_ramp() {
        let a = ramp((4, 5, 6));
        let v = a.view();
        assert_eq!(linear_at(&v, [1.0, 2.0, 3.0]), Some(2.0 + 6.0 + 15.0));
        let x = linear_at(&v, [1.5, 2.25, 3.5]).unwrap();
        assert!((x - (3.0 + 6.75 + 17.5)).abs() < 1e-9);
        assert_eq!(linear_at(&v, [-0.6, 0.0, 0.0]), None);
        assert_eq!(linear_at(&v, [3.4, 0.0, 0.0]), Some(6.0));
    }

    #[test]
    fn test_bspline_interpolates_samples() {
        let a = Array3::from_shape_fn((6, 7, 8), |(z, h, w)| {
            ((z * 7 + h * 3 + w * 11) % 13) as f32
        });
        let coef = BSplineCoefficients::new(&a.view());
        for pos in [(0, 0, 0), (2, 3, 4), (5, 6, 7), (3, 0, 7)] {
            let v = coef.at([pos.0 as f64, pos.1 as f64, pos.2 as f64]).unwrap();
            assert!((v - a[pos] as f64).abs() < 1e-6, "{pos:?}: {v} vs {}", a[pos]);
        }
        assert!(coef.at([0.0, 0.0, 7.6]).is_none());
    }

    #[test]
    fn test_bspline_reproduces_constant() {
        let a = Array3::from_elem((5, 6, 7), 42.0f32);
        let coef = BSplineCoefficients::new(&a.view());
        for p in [[3.5, 4.25, 2.75], [0.1, 0.0, 6.4], [-0.4, 5.3, 0.5]] {
            assert!((coef.at(p).unwrap() - 42.0).abs() < 1e-6);
        }
    }

    #[test]
    fn test_identity_resample_keeps_values() {
        let affine = Affine::from_spacing([1.0, 1.5, 2.0], [-3.0, 4.0, 1.0]);
        let src = ScalarVolume::with_affine(ramp((4, 5, 6)), &affine);
        for interp in [
            Interpolation::NearestNeighbor,
            Interpolation::Linear,
            Interpolation::BSpline,
        ] {
            let out =
                resample_scalar(&src, src.header(), &SpatialTransform::IDENTITY, interp).unwrap();
            assert_eq!(out.shape(), src.shape());
            for (a, b) in out.data().iter().zip(src.data().iter()) {
                assert!((a - b).abs() < 1e-3, "{interp}: {a} vs {b}");
            }
        }
    }

    #[test]
    fn test_translation_shifts_and_fills_zero() {
        let src = ScalarVolume::with_affine(ramp((3, 3, 4)) + 1.0, &Affine::IDENTITY);
        // 目标点 x 映射到源点 x + 1 (i 方向, 即 w 轴).
        let t = SpatialTransform::new(
            TransformKind::Rigid,
            Affine::from_spacing([1.0; 3], [1.0, 0.0, 0.0]),
        );
        let out = resample_scalar(&src, src.header(), &t, Interpolation::Linear).unwrap();
        assert_eq!(out[(1, 1, 0)], src[(1, 1, 1)]);
        assert_eq!(out[(1, 1, 2)], src[(1, 1, 3)]);
        assert_eq!(out[(1, 1, 3)], 0.0);
    }

    #[test]
    fn test_label_round_trip_on_finer_grid() {
        let labels = Array3::from_shape_fn((4, 4, 4), |(z, h, w)| ((z + h + w) % 3) as u32);
        let src = LabelVolume::with_affine(labels, &Affine::from_spacing([2.0; 3], [0.0; 3]));
        let fine_header = ScalarVolume::with_affine(
            Array3::zeros((8, 8, 8)),
            &Affine::from_spacing([1.0; 3], [0.0; 3]),
        );
        let up = resample_labels(&src, fine_header.header(), &SpatialTransform::IDENTITY).unwrap();
        let back = resample_labels(&up, src.header(), &SpatialTransform::IDENTITY).unwrap();
        assert_eq!(back.data(), src.data());
    }
}
