//! 纯 Rust 配准引擎.
//!
//! 1. 以两幅图像的强度加权质心对齐作为初值;
//! 2. 由粗到细逐层在掩膜内采样固定图像;
//! 3. 每层做坐标下降: 逐个参数尝试 `±step`, 一轮没有改进则步长减半.

use log::{debug, info};

use super::metric::{FixedSamples, MetricEvaluator};
use super::resample::resample_scalar;
use super::{Interpolation, RegistrationEngine, RegistrationResult, TransformParameters};
use crate::config::{Metric, OptimizerConfig, PipelineConfig, TransformKind};
use crate::error::RegistrationError;
use crate::{MaskVolume, NiftiHeaderAttr, ScalarVolume};

/// 纯 Rust 配准引擎.
#[derive(Debug, Clone, Default)]
pub struct NativeEngine {
    metric: Metric,
    kind: TransformKind,
    optimizer: OptimizerConfig,
}

impl NativeEngine {
    /// 构建引擎.
    pub fn new(metric: Metric, kind: TransformKind, optimizer: OptimizerConfig) -> Self {
        Self {
            metric,
            kind,
            optimizer,
        }
    }

    /// 按流程配置构建引擎.
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(
            config.metric,
            config.transform_kind,
            config.optimizer.clone(),
        )
    }

    /// 坐标下降. 返回最终度量值.
    fn descend(
        &self,
        evaluator: &MetricEvaluator,
        params: &mut TransformParameters,
        level_scale: f64,
    ) -> Option<f64> {
        let mut best = evaluator.cost(&params.to_affine())?;
        let mut steps: Vec<f64> = params
            .initial_steps(&self.optimizer)
            .into_iter()
            .map(|s| s * level_scale)
            .collect();
        let mut scale = 1.0;

        for _ in 0..self.optimizer.iterations {
            let mut improved = false;
            for i in 0..steps.len() {
                for dir in [1.0, -1.0] {
                    let mut cand = params.clone();
                    cand.values_mut()[i] += dir * steps[i];
                    match evaluator.cost(&cand.to_affine()) {
                        Some(c) if c < best - 1e-12 => {
                            best = c;
                            *params = cand;
                            improved = true;
                            break;
                        }
                        _ => {}
                    }
                }
            }
            if !improved {
                steps.iter_mut().for_each(|s| *s *= 0.5);
                scale *= 0.5;
                if scale < self.optimizer.min_step_ratio {
                    break;
                }
            }
        }
        Some(best)
    }
}

/// 强度加权质心 (世界坐标). 只统计有限正值; 全部为 0 时取网格几何中心.
fn centroid(image: &ScalarVolume, mask: Option<&MaskVolume>) -> [f64; 3] {
    let affine = image.affine();
    let mut acc = [0.0; 3];
    let mut total = 0.0;
    for (pos, &v) in image.data().indexed_iter() {
        if mask.is_some_and(|m| m[pos] == 0) || !v.is_finite() || v <= 0.0 {
            continue;
        }
        let p = affine.index_to_world(pos);
        let v = v as f64;
        acc.iter_mut().zip(p.iter()).for_each(|(a, x)| *a += v * x);
        total += v;
    }
    if total > 0.0 {
        return acc.map(|a| a / total);
    }
    let (z, h, w) = image.shape();
    affine.apply([
        (w as f64 - 1.0) / 2.0,
        (h as f64 - 1.0) / 2.0,
        (z as f64 - 1.0) / 2.0,
    ])
}

impl RegistrationEngine for NativeEngine {
    fn register(
        &self,
        reference: &ScalarVolume,
        moving: &ScalarVolume,
        mask: &MaskVolume,
    ) -> Result<RegistrationResult, RegistrationError> {
        if mask.shape() != reference.shape() {
            return Err(RegistrationError::ShapeMismatch {
                expected: reference.shape(),
                actual: mask.shape(),
            });
        }
        if mask.foreground_count() == 0 {
            return Err(RegistrationError::EmptyMask);
        }
        let moving_inv = moving
            .affine()
            .inverse()
            .ok_or(RegistrationError::NotInvertible)?;

        let c_fixed = centroid(reference, Some(mask));
        let c_moving = centroid(moving, None);
        let t0: [f64; 3] = std::array::from_fn(|i| c_moving[i] - c_fixed[i]);
        let mut params = TransformParameters::identity(self.kind, c_fixed).with_translation(t0);
        debug!("initial translation {t0:?}");

        let coarsest = self.optimizer.shrink_factors.iter().copied().max().unwrap_or(1).max(1);
        let mut final_cost = None;
        for &shrink in self.optimizer.shrink_factors.iter() {
            let samples =
                FixedSamples::collect(reference, mask, shrink, self.optimizer.max_samples);
            if samples.is_empty() {
                continue;
            }
            let evaluator = MetricEvaluator::new(self.metric, &samples, moving, moving_inv);
            let level_scale = shrink.max(1) as f64 / coarsest as f64;
            match self.descend(&evaluator, &mut params, level_scale) {
                Some(c) => {
                    debug!("shrink {shrink}: {} samples, cost {c:.6}", samples.len());
                    final_cost = Some(c);
                }
                None => {
                    return Err(RegistrationError::Degenerate(format!(
                        "moving image does not overlap the mask at shrink factor {shrink}"
                    )))
                }
            }
        }
        let final_cost = final_cost.ok_or_else(|| {
            RegistrationError::Degenerate("no sampling level produced any point".to_string())
        })?;

        let forward = params.to_transform();
        let inverse = forward.inverse()?;
        info!(
            "{:?} registration ({:?}) finished, cost {final_cost:.6}, translation {:?}",
            self.kind,
            self.metric,
            params.translation()
        );
        let warped_moving =
            resample_scalar(moving, reference.header(), &forward, Interpolation::Linear)?;
        Ok(RegistrationResult {
            forward,
            inverse,
            warped_moving,
            final_cost,
        })
    }
}
