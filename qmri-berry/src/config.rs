//! 处理流程配置.
//!
//! 所有字段都有默认值, 因此 JSON 配置文件只需写出需要覆盖的字段.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::consts::{DEFAULT_MASK_DILATION_RADIUS, DEFAULT_SEQUENCE_KEY};
use crate::error::ConfigError;

/// 配准相似性度量.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Metric {
    /// Mattes 互信息.
    #[default]
    #[serde(rename = "mattes")]
    Mattes,
    /// 全局相关系数.
    #[serde(rename = "GC")]
    GC,
    /// 均方差.
    #[serde(rename = "meansquares")]
    MeanSquares,
}

/// 配准变换自由度.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TransformKind {
    /// 刚体: 3 个旋转 + 3 个平移.
    #[default]
    Rigid,
    /// 相似: 刚体 + 各向同性缩放.
    Similarity,
    /// 一般仿射: 12 个参数.
    Affine,
}

impl TransformKind {
    /// 优化参数个数.
    #[inline]
    pub const fn n_params(&self) -> usize {
        match self {
            TransformKind::Rigid => 6,
            TransformKind::Similarity => 7,
            TransformKind::Affine => 12,
        }
    }
}

/// QC 图底图的灰度窗.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QcContrast {
    /// 以掩膜内众数为中心的窗口.
    #[default]
    Modal,
    /// 掩膜内的最小值到最大值.
    FullRange,
}

/// 优化器参数.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    /// 每一层金字塔的降采样倍数, 由粗到细.
    pub shrink_factors: Vec<usize>,
    /// 每一层最多迭代轮数.
    pub iterations: usize,
    /// 每轮度量最多使用的固定图像采样点数.
    pub max_samples: usize,
    /// 初始平移步长, 毫米.
    pub translation_step: f64,
    /// 初始旋转步长, 弧度.
    pub rotation_step: f64,
    /// 初始缩放/剪切步长.
    pub scale_step: f64,
    /// 步长缩小到初值的该比例以下时停止.
    pub min_step_ratio: f64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            shrink_factors: vec![4, 2, 1],
            iterations: 40,
            max_samples: 20_000,
            translation_step: 4.0,
            rotation_step: 0.05,
            scale_step: 0.02,
            min_step_ratio: 1e-3,
        }
    }
}

/// 处理流程配置.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// 从哪个文件名实体读取序列标签.
    pub sequence_key: String,
    /// 配准相似性度量.
    pub metric: Metric,
    /// 配准变换类型.
    pub transform_kind: TransformKind,
    /// 配准掩膜膨胀半径, 以体素为单位.
    pub mask_dilation_radius: usize,
    /// 优化器参数.
    pub optimizer: OptimizerConfig,
    /// QC 图底图灰度窗.
    pub qc_contrast: QcContrast,
    /// 外部 FreeSurfer 风格查找表. 为空时使用内置 aseg 表.
    pub lut_path: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            sequence_key: DEFAULT_SEQUENCE_KEY.to_string(),
            metric: Metric::default(),
            transform_kind: TransformKind::default(),
            mask_dilation_radius: DEFAULT_MASK_DILATION_RADIUS,
            optimizer: OptimizerConfig::default(),
            qc_contrast: QcContrast::default(),
            lut_path: None,
        }
    }
}

impl PipelineConfig {
    /// 从 JSON 文件加载配置.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_owned(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Malformed {
            path: path.to_owned(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_keeps_defaults() {
        let c: PipelineConfig = serde_json::from_str(
            r#"{"metric": "GC", "transform_kind": "Affine", "optimizer": {"iterations": 5}}"#,
        )
        .unwrap();
        assert_eq!(c.metric, Metric::GC);
        assert_eq!(c.transform_kind, TransformKind::Affine);
        assert_eq!(c.optimizer.iterations, 5);
        assert_eq!(c.optimizer.shrink_factors, vec![4, 2, 1]);
        assert_eq!(c.mask_dilation_radius, 35);
        assert_eq!(c.sequence_key, "acq");
        assert_eq!(c.qc_contrast, QcContrast::Modal);
    }

    #[test]
    fn test_enum_names() {
        assert_eq!(serde_json::to_string(&Metric::MeanSquares).unwrap(), "\"meansquares\"");
        assert_eq!(serde_json::to_string(&Metric::Mattes).unwrap(), "\"mattes\"");
        assert_eq!(
            serde_json::to_string(&QcContrast::FullRange).unwrap(),
            "\"full-range\""
        );
        assert_eq!(TransformKind::Similarity.n_params(), 7);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"qc_contrast": "full-range", "lut_path": "/tmp/lut.txt"}"#).unwrap();
        let c = PipelineConfig::load(&path).unwrap();
        assert_eq!(c.qc_contrast, QcContrast::FullRange);
        assert_eq!(c.lut_path, Some(PathBuf::from("/tmp/lut.txt")));

        fs::write(&path, "{").unwrap();
        let e = PipelineConfig::load(&path).unwrap_err();
        assert!(matches!(e, ConfigError::Malformed { .. }));
        assert!(e.to_string().starts_with("config `"));

        fs::write(&path, r#"{"metric": "cosine"}"#).unwrap();
        assert!(matches!(
            PipelineConfig::load(&path),
            Err(ConfigError::Malformed { .. })
        ));
        assert!(matches!(
            PipelineConfig::load(dir.path().join("missing.json")),
            Err(ConfigError::Io { .. })
        ));
    }
}
