//! 配准引擎.
//!
//! [`RegistrationEngine`] 是配准能力的抽象: 计算刚体 (或相似, 仿射) 配准,
//! 并提供正向/逆向重采样. 调用方决定掩膜如何构建, 使用哪种插值,
//! 以及朝哪个方向重采样; 引擎只负责计算.
//!
//! crate 自带一个纯 Rust 实现 [`NativeEngine`].

use std::fmt;

use nifti::NiftiHeader;
use serde::{Deserialize, Serialize};

use crate::error::RegistrationError;
use crate::{LabelVolume, MaskVolume, ScalarVolume};

pub(crate) mod metric;
mod native;
pub mod resample;
mod transform;

pub use native::NativeEngine;
pub use transform::{SpatialTransform, TransformParameters};

/// 重采样插值方式. 序列化名称与元信息中记录的一致.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Interpolation {
    /// 最近邻. 标签只能使用该方式.
    #[serde(rename = "nearestNeighbor")]
    NearestNeighbor,
    /// 三线性.
    #[serde(rename = "linear")]
    Linear,
    /// 三次 B 样条.
    #[serde(rename = "bSpline")]
    BSpline,
}

impl Interpolation {
    /// 元信息中使用的名称.
    #[inline]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Interpolation::NearestNeighbor => "nearestNeighbor",
            Interpolation::Linear => "linear",
            Interpolation::BSpline => "bSpline",
        }
    }
}

impl fmt::Display for Interpolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 一次配准的结果, 只在单个会话内使用.
#[derive(Debug, Clone)]
pub struct RegistrationResult {
    /// 参考空间 -> 运动图像空间. 用于把定量图拉到参考网格上.
    pub forward: SpatialTransform,
    /// 运动图像空间 -> 参考空间. 用于把分割拉到定量图网格上.
    pub inverse: SpatialTransform,
    /// 用正向变换重采样到参考网格上的运动图像.
    pub warped_moving: ScalarVolume,
    /// 最终度量值. 越小越好.
    pub final_cost: f64,
}

/// 配准能力.
pub trait RegistrationEngine {
    /// 以 `reference` 为固定图像, `moving` 为运动图像, 在 `mask` 内计算配准.
    ///
    /// `mask` 必须与 `reference` 位于同一网格, 且至少含一个前景体素.
    fn register(
        &self,
        reference: &ScalarVolume,
        moving: &ScalarVolume,
        mask: &MaskVolume,
    ) -> Result<RegistrationResult, RegistrationError>;

    /// 把连续值图像重采样到 `target` 网格. `transform` 把目标空间的点映射到 `image` 空间,
    /// 通常为配准结果的 `forward`.
    fn apply_forward(
        &self,
        image: &ScalarVolume,
        target: &NiftiHeader,
        transform: &SpatialTransform,
        interpolation: Interpolation,
    ) -> Result<ScalarVolume, RegistrationError> {
        resample::resample_scalar(image, target, transform, interpolation)
    }

    /// 把标签重采样到 `target` 网格. `transform` 通常为配准结果的 `inverse`.
    ///
    /// 只接受最近邻插值, 其他插值会产生不存在的标签值.
    fn apply_inverse(
        &self,
        labels: &LabelVolume,
        target: &NiftiHeader,
        transform: &SpatialTransform,
        interpolation: Interpolation,
    ) -> Result<LabelVolume, RegistrationError> {
        if interpolation != Interpolation::NearestNeighbor {
            return Err(RegistrationError::LabelInterpolation(interpolation));
        }
        resample::resample_labels(labels, target, transform)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransformKind;
    use crate::data::Affine;
    use crate::NiftiHeaderAttr;
    use ndarray::Array3;

    #[test]
    fn test_interpolation_names() {
        assert_eq!(Interpolation::NearestNeighbor.to_string(), "nearestNeighbor");
        assert_eq!(
            serde_json::to_string(&Interpolation::BSpline).unwrap(),
            "\"bSpline\""
        );
    }

    #[test]
    fn test_labels_reject_continuous_interpolation() {
        let labels = LabelVolume::with_affine(Array3::from_elem((2, 2, 2), 3), &Affine::IDENTITY);
        let engine = NativeEngine::default();
        for interp in [Interpolation::Linear, Interpolation::BSpline] {
            let e = engine
                .apply_inverse(&labels, labels.header(), &SpatialTransform::IDENTITY, interp)
                .unwrap_err();
            assert!(matches!(e, RegistrationError::LabelInterpolation(i) if i == interp));
        }
        let ok = engine
            .apply_inverse(
                &labels,
                labels.header(),
                &SpatialTransform::IDENTITY,
                Interpolation::NearestNeighbor,
            )
            .unwrap();
        assert_eq!(ok.count(3), 8);
    }

    #[test]
    fn test_label_round_trip_through_rigid_transform() {
        const N: usize = 20;
        let region = |i: usize| (6..14).contains(&i);
        let labels = Array3::from_shape_fn((N, N, N), |(z, h, w)| {
            if region(z) && region(h) && region(w) {
                5
            } else {
                0
            }
        });
        let native =
            LabelVolume::with_affine(labels, &Affine::from_spacing([1.0; 3], [0.0; 3]));

        // 绕 z 轴旋转 10 度并平移, 旋转中心为网格中心.
        let mut params = TransformParameters::identity(TransformKind::Rigid, [9.5; 3]);
        params
            .values_mut()
            .copy_from_slice(&[0.0, 0.0, 10f64.to_radians(), 1.3, -0.7, 0.4]);
        let t = params.to_transform();

        let engine = NativeEngine::default();
        let moved = engine
            .apply_inverse(&native, native.header(), &t, Interpolation::NearestNeighbor)
            .unwrap();
        assert_ne!(moved.data(), native.data());
        let back = engine
            .apply_inverse(
                &moved,
                native.header(),
                &t.inverse().unwrap(),
                Interpolation::NearestNeighbor,
            )
            .unwrap();

        assert_eq!(back.labels(), vec![5]);
        // 两次最近邻取整的位移不超过两个体素, 离边界更远的体素必须保持原标签.
        for z in 8..12 {
            for h in 8..12 {
                for w in 8..12 {
                    assert_eq!(back[(z, h, w)], 5, "({z}, {h}, {w})");
                }
            }
        }
        let before = native.count(5) as f64;
        let after = back.count(5) as f64;
        assert!((after - before).abs() <= 0.25 * before, "{before} vs {after}");
    }
}
