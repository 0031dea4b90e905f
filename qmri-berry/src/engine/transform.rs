//! 物理空间中的线性变换及其优化参数化.

use crate::config::{OptimizerConfig, TransformKind};
use crate::data::Affine;
use crate::error::RegistrationError;

/// 物理空间 (毫米) 中的线性变换.
///
/// 配准结果中的正向变换把参考空间的点映射到运动图像 (定量图) 空间,
/// 因此用它把运动图像重采样到参考网格上.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct SpatialTransform {
    kind: TransformKind,
    affine: Affine,
}

impl SpatialTransform {
    /// 单位变换.
    pub const IDENTITY: SpatialTransform = SpatialTransform {
        kind: TransformKind::Rigid,
        affine: Affine::IDENTITY,
    };

    /// 由矩阵构造.
    #[inline]
    pub fn new(kind: TransformKind, affine: Affine) -> Self {
        Self { kind, affine }
    }

    /// 变换类型.
    #[inline]
    pub fn kind(&self) -> TransformKind {
        self.kind
    }

    /// 变换矩阵.
    #[inline]
    pub fn affine(&self) -> &Affine {
        &self.affine
    }

    /// 作用于一个物理点.
    #[inline]
    pub fn apply(&self, p: [f64; 3]) -> [f64; 3] {
        self.affine.apply(p)
    }

    /// 逆变换.
    pub fn inverse(&self) -> Result<SpatialTransform, RegistrationError> {
        let affine = self.affine.inverse().ok_or(RegistrationError::NotInvertible)?;
        Ok(Self {
            kind: self.kind,
            affine,
        })
    }
}

/// 绕 x, y, z 轴依次旋转的旋转矩阵 `Rz * Ry * Rx`.
fn euler_matrix(rx: f64, ry: f64, rz: f64) -> [[f64; 3]; 3] {
    let (sx, cx) = rx.sin_cos();
    let (sy, cy) = ry.sin_cos();
    let (sz, cz) = rz.sin_cos();
    [
        [cz * cy, cz * sy * sx - sz * cx, cz * sy * cx + sz * sx],
        [sz * cy, sz * sy * sx + cz * cx, sz * sy * cx - cz * sx],
        [-sy, cy * sx, cy * cx],
    ]
}

/// 优化器使用的参数化变换: `T(x) = M (x - c) + c + t`.
///
/// - `Rigid`: `[rx, ry, rz, tx, ty, tz]`, `M` 为旋转矩阵.
/// - `Similarity`: 在 `Rigid` 之后追加各向同性缩放 `s`, `M = s R`.
/// - `Affine`: 按行存储的 `M` 的 9 个元素, 之后是 `t`.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformParameters {
    kind: TransformKind,
    center: [f64; 3],
    values: Vec<f64>,
}

impl TransformParameters {
    /// 以 `center` 为旋转中心的单位变换.
    pub fn identity(kind: TransformKind, center: [f64; 3]) -> Self {
        let values = match kind {
            TransformKind::Rigid => vec![0.0; 6],
            TransformKind::Similarity => vec![0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 1.0],
            TransformKind::Affine => vec![
                1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0,
            ],
        };
        debug_assert_eq!(values.len(), kind.n_params());
        Self {
            kind,
            center,
            values,
        }
    }

    /// 设置平移部分.
    pub fn with_translation(mut self, t: [f64; 3]) -> Self {
        let at = self.translation_offset();
        self.values[at..at + 3].copy_from_slice(&t);
        self
    }

    #[inline]
    fn translation_offset(&self) -> usize {
        match self.kind {
            TransformKind::Rigid | TransformKind::Similarity => 3,
            TransformKind::Affine => 9,
        }
    }

    /// 变换类型.
    #[inline]
    pub fn kind(&self) -> TransformKind {
        self.kind
    }

    /// 参数值.
    #[inline]
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// 可变参数值.
    #[inline]
    pub fn values_mut(&mut self) -> &mut [f64] {
        &mut self.values
    }

    /// 平移部分.
    pub fn translation(&self) -> [f64; 3] {
        let at = self.translation_offset();
        [self.values[at], self.values[at + 1], self.values[at + 2]]
    }

    /// 线性部分 `M`.
    pub fn linear(&self) -> [[f64; 3]; 3] {
        let v = &self.values;
        match self.kind {
            TransformKind::Rigid => euler_matrix(v[0], v[1], v[2]),
            TransformKind::Similarity => euler_matrix(v[0], v[1], v[2]).map(|r| r.map(|e| e * v[6])),
            TransformKind::Affine => [[v[0], v[1], v[2]], [v[3], v[4], v[5]], [v[6], v[7], v[8]]],
        }
    }

    /// 展开为矩阵形式.
    pub fn to_affine(&self) -> Affine {
        let m = self.linear();
        let c = self.center;
        let t = self.translation();
        // M (x - c) + c + t = M x + (c + t - M c)
        let offset: [f64; 3] = std::array::from_fn(|r| {
            c[r] + t[r] - (m[r][0] * c[0] + m[r][1] * c[1] + m[r][2] * c[2])
        });
        Affine::from_linear(m, offset)
    }

    /// 转换为 [`SpatialTransform`].
    #[inline]
    pub fn to_transform(&self) -> SpatialTransform {
        SpatialTransform::new(self.kind, self.to_affine())
    }

    /// 每个参数的初始搜索步长.
    pub fn initial_steps(&self, cfg: &OptimizerConfig) -> Vec<f64> {
        let (t, r, s) = (cfg.translation_step, cfg.rotation_step, cfg.scale_step);
        match self.kind {
            TransformKind::Rigid => vec![r, r, r, t, t, t],
            TransformKind::Similarity => vec![r, r, r, t, t, t, s],
            TransformKind::Affine => vec![s, s, s, s, s, s, s, s, s, t, t, t],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: [f64; 3], b: [f64; 3], eps: f64) -> bool {
        a.iter().zip(b.iter()).all(|(x, y)| (x - y).abs() < eps)
    }

    #[test]
    fn test_identity_is_identity() {
        for kind in [
            TransformKind::Rigid,
            TransformKind::Similarity,
            TransformKind::Affine,
        ] {
            let p = TransformParameters::identity(kind, [3.0, -2.0, 7.0]);
            assert!(p.to_affine().max_abs_diff(&Affine::IDENTITY) < 1e-12);
            assert_eq!(p.values().len(), kind.n_params());
        }
    }

    #[test]
    fn test_rotation_about_center() {
        let c = [10.0, 0.0, 0.0];
        let mut p = TransformParameters::identity(TransformKind::Rigid, c);
        p.values_mut()[2] = std::f64::consts::FRAC_PI_2;
        let t = p.to_transform();
        // 中心不动.
        assert!(close(t.apply(c), c, 1e-12));
        // 绕 z 轴 90 度: (11, 0, 0) -> (10, 1, 0).
        assert!(close(t.apply([11.0, 0.0, 0.0]), [10.0, 1.0, 0.0], 1e-12));
        assert!((t.affine().determinant() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_translation_and_inverse() {
        let p = TransformParameters::identity(TransformKind::Similarity, [1.0, 2.0, 3.0])
            .with_translation([4.0, 5.0, 6.0]);
        assert_eq!(p.translation(), [4.0, 5.0, 6.0]);
        let t = p.to_transform();
        assert!(close(t.apply([0.0; 3]), [4.0, 5.0, 6.0], 1e-12));
        let inv = t.inverse().unwrap();
        assert!(close(inv.apply(t.apply([9.0, -1.0, 2.5])), [9.0, -1.0, 2.5], 1e-9));
    }

    #[test]
    fn test_singular_transform() {
        let mut p = TransformParameters::identity(TransformKind::Affine, [0.0; 3]);
        p.values_mut()[..9].fill(0.0);
        assert!(matches!(
            p.to_transform().inverse(),
            Err(RegistrationError::NotInvertible)
        ));
    }
}
