//! 可分离的平方欧氏距离变换.
//!
//! 参考 Felzenszwalb & Huttenlocher, "Distance Transforms of Sampled Functions".
//! 三维变换由沿三个轴依次做一维下包络计算得到.

use ndarray::{Array3, Axis};

use crate::{MaskVolume, NiftiHeaderAttr};

/// 计算每个体素到最近前景体素的平方欧氏距离, 以体素为单位.
///
/// 掩膜没有前景时, 全部结果为 `f64::INFINITY`.
pub fn squared_distance_transform(mask: &MaskVolume) -> Array3<f64> {
    let mut dist = mask
        .data()
        .mapv(|p| if p != 0 { 0.0 } else { f64::INFINITY });

    let (z, h, w) = mask.shape();
    let n = z.max(h).max(w);
    let mut f = vec![0.0; n];
    let mut d = vec![0.0; n];
    let mut v = vec![0usize; n];
    let mut env = vec![0.0; n + 1];

    // w -> h -> z
    for axis in [2, 1, 0] {
        let len = dist.len_of(Axis(axis));
        for mut lane in dist.lanes_mut(Axis(axis)) {
            f[..len].iter_mut().zip(lane.iter()).for_each(|(a, b)| *a = *b);
            lower_envelope(&f[..len], &mut d[..len], &mut v, &mut env);
            lane.iter_mut().zip(d.iter()).for_each(|(a, b)| *a = *b);
        }
    }
    dist
}

/// 以 `q` 和 `p` 为顶点的两条抛物线的交点横坐标. 要求 `p < q`.
#[inline]
fn intersect(f: &[f64], q: usize, p: usize) -> f64 {
    let (qf, pf) = (q as f64, p as f64);
    ((f[q] + qf * qf) - (f[p] + pf * pf)) / (2.0 * (qf - pf))
}

/// 一维平方距离变换: `d[q] = min_p ((q - p)^2 + f[p])`.
///
/// `f` 中的无穷大代表该位置没有抛物线.
fn lower_envelope(f: &[f64], d: &mut [f64], v: &mut [usize], env: &mut [f64]) {
    let mut top: Option<usize> = None;
    for q in (0..f.len()).filter(|&q| f[q].is_finite()) {
        let Some(mut k) = top else {
            v[0] = q;
            env[0] = f64::NEG_INFINITY;
            env[1] = f64::INFINITY;
            top = Some(0);
            continue;
        };
        let mut s = intersect(f, q, v[k]);
        // env[0] 为负无穷, k 不会下溢.
        while s <= env[k] {
            k -= 1;
            s = intersect(f, q, v[k]);
        }
        k += 1;
        v[k] = q;
        env[k] = s;
        env[k + 1] = f64::INFINITY;
        top = Some(k);
    }

    if top.is_none() {
        d.fill(f64::INFINITY);
        return;
    }
    let mut k = 0;
    for (q, dq) in d.iter_mut().enumerate() {
        while env[k + 1] < q as f64 {
            k += 1;
        }
        let diff = q as f64 - v[k] as f64;
        *dq = diff * diff + f[v[k]];
    }
}
