//! 运行时错误.
//!
//! 每个组件各自拥有一个错误类型, 由 [`PipelineError`] 汇总,
//! 再由 [`SessionError`] 附上会话身份.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::engine::Interpolation;
use crate::session::{Modality, SessionId};
use crate::Idx3d;

/// nifti 体数据读写错误.
#[derive(Error, Debug)]
pub enum VolumeError {
    /// nifti 解析或写出失败.
    #[error("nifti error on `{path}`: {source}")]
    Nifti {
        /// 文件路径.
        path: PathBuf,
        /// 底层错误.
        #[source]
        source: nifti::NiftiError,
    },

    /// 文件读写失败.
    #[error("i/o error on `{path}`: {source}")]
    Io {
        /// 文件路径.
        path: PathBuf,
        /// 底层错误.
        #[source]
        source: io::Error,
    },

    /// 不是三维体数据 (第四维及以上长度不为 1).
    #[error("`{path}` is not a 3-D volume (dim = {dim:?})")]
    NotThreeDimensional {
        /// 文件路径.
        path: PathBuf,
        /// header 中的 `dim` 字段.
        dim: [u16; 8],
    },
}

/// 会话输入文件定位失败.
#[derive(Error, Debug)]
pub enum ResolutionError {
    /// 既没有 `space-T2w` 也没有 `space-T1w` 的分割.
    #[error("no aseg segmentation (space-T2w or space-T1w) found in `{dir}`")]
    NoSegmentationFound {
        /// 搜索目录.
        dir: PathBuf,
    },

    /// 分割同目录下缺少配套脑掩膜.
    #[error("brain mask `{expected}` is missing")]
    MissingMask {
        /// 期望的掩膜路径.
        expected: PathBuf,
    },

    /// 解剖参考图像不存在或不唯一.
    #[error("expected exactly one {modality} reference in `{dir}`, found {found:?}")]
    AmbiguousOrMissingReference {
        /// 参考模态.
        modality: Modality,
        /// 搜索目录.
        dir: PathBuf,
        /// 实际找到的候选.
        found: Vec<PathBuf>,
    },

    /// 合成加权图像 T1w/T2w 不恰好各一个.
    #[error("expected exactly one synthetic T1w and one T2w in `{dir}`, found {t1w} and {t2w}")]
    AmbiguousOrMissingSyntheticWeighted {
        /// 搜索目录.
        dir: PathBuf,
        /// T1w 个数.
        t1w: usize,
        /// T2w 个数.
        t2w: usize,
    },

    /// 没有任何定量图.
    #[error("no T1map/T2map/PDmap found in `{dir}`")]
    NoQuantitativeMapsFound {
        /// 搜索目录.
        dir: PathBuf,
    },

    /// 目录读取失败.
    #[error("cannot list `{dir}`: {source}")]
    Io {
        /// 目录.
        dir: PathBuf,
        /// 底层错误.
        #[source]
        source: io::Error,
    },
}

/// 标签表与脑区分组错误.
#[derive(Error, Debug)]
pub enum CatalogError {
    /// 查找表读取失败.
    #[error("cannot read label table `{path}`: {source}")]
    Io {
        /// 文件路径.
        path: PathBuf,
        /// 底层错误.
        #[source]
        source: io::Error,
    },

    /// 编号后缺少区域名.
    #[error("line {line}: region number without a name: `{content}`")]
    MalformedLine {
        /// 行号, 从 1 开始.
        line: usize,
        /// 原始行内容.
        content: String,
    },

    /// 同一编号出现两次.
    #[error("region number {number} is defined twice (`{first}` and `{second}`)")]
    DuplicateRegion {
        /// 区域编号.
        number: u32,
        /// 先出现的名称.
        first: String,
        /// 后出现的名称.
        second: String,
    },

    /// 分割中出现了标签表没有的编号.
    #[error("segmentation has value {0} but no region with this number exists in the label table")]
    UnknownLabel(u32),

    /// 分组中出现了标签表没有的区域名.
    #[error("group `{group}` references unknown region `{region}`")]
    UnknownRegionName {
        /// 分组名.
        group: String,
        /// 区域名.
        region: String,
    },

    /// 分组不含任何区域.
    #[error("group `{0}` does not reference any region")]
    EmptyGroup(String),

    /// 分组文件读取失败.
    #[error("cannot read grouping file `{path}`: {source}")]
    GroupingIo {
        /// 文件路径.
        path: PathBuf,
        /// 底层错误.
        #[source]
        source: io::Error,
    },

    /// 分组文件不是 `{"组名": ["区域名", ...]}` 格式.
    #[error("grouping file `{path}` is malformed: {source}")]
    MalformedGrouping {
        /// 文件路径.
        path: PathBuf,
        /// 底层错误.
        #[source]
        source: serde_json::Error,
    },
}

/// 配准与重采样错误.
#[derive(Error, Debug)]
pub enum RegistrationError {
    /// 配准掩膜不含任何体素.
    #[error("registration mask is empty")]
    EmptyMask,

    /// 两个体数据网格形状不一致.
    #[error("shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        /// 期望形状.
        expected: Idx3d,
        /// 实际形状.
        actual: Idx3d,
    },

    /// 对标签使用了非最近邻插值.
    #[error("labels can only be resampled with nearest neighbour, got {0}")]
    LabelInterpolation(Interpolation),

    /// 变换或体素-世界矩阵不可逆.
    #[error("transform is not invertible")]
    NotInvertible,

    /// 优化无法进行 (如重叠区域过小).
    #[error("degenerate registration: {0}")]
    Degenerate(String),
}

/// 统计错误.
#[derive(Error, Debug)]
pub enum StatsError {
    /// 分割与定量图网格不一致.
    #[error("{kind} map shape {actual:?} differs from segmentation shape {expected:?}")]
    ShapeMismatch {
        /// 定量图种类.
        kind: crate::session::MapKind,
        /// 分割形状.
        expected: Idx3d,
        /// 定量图形状.
        actual: Idx3d,
    },

    /// 标签表相关错误.
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    /// 表格写出失败.
    #[error("cannot write table `{path}`: {source}")]
    Io {
        /// 文件路径.
        path: PathBuf,
        /// 底层错误.
        #[source]
        source: io::Error,
    },
}

/// 元信息错误.
#[derive(Error, Debug)]
pub enum ProvenanceError {
    /// sidecar 存在但不是合法 JSON.
    #[error("sidecar `{path}` is malformed: {source}")]
    MalformedSidecar {
        /// 文件路径.
        path: PathBuf,
        /// 底层错误.
        #[source]
        source: serde_json::Error,
    },

    /// 读写失败.
    #[error("i/o error on `{path}`: {source}")]
    Io {
        /// 文件路径.
        path: PathBuf,
        /// 底层错误.
        #[source]
        source: io::Error,
    },

    /// 序列化失败.
    #[error("cannot serialize metadata: {0}")]
    Serialize(#[from] serde_json::Error),

    /// 体数据网格不一致.
    #[error("inputs differ in shape: {0:?} vs {1:?}")]
    ShapeMismatch(Idx3d, Idx3d),
}

/// 配置文件错误.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// 配置文件读取失败.
    #[error("cannot read config `{path}`: {source}")]
    Io {
        /// 文件路径.
        path: PathBuf,
        /// 底层错误.
        #[source]
        source: io::Error,
    },

    /// 配置文件不是合法 JSON, 或字段取值未知.
    #[error("config `{path}` is malformed: {source}")]
    Malformed {
        /// 文件路径.
        path: PathBuf,
        /// 底层错误.
        #[source]
        source: serde_json::Error,
    },
}

/// 单个会话处理流程中的致命错误.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// 输入定位.
    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    /// 体数据读写.
    #[error(transparent)]
    Volume(#[from] VolumeError),

    /// 标签表.
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    /// 配准.
    #[error(transparent)]
    Registration(#[from] RegistrationError),

    /// 统计.
    #[error(transparent)]
    Stats(#[from] StatsError),

    /// 元信息.
    #[error(transparent)]
    Provenance(#[from] ProvenanceError),

    /// QC 图.
    #[error("cannot render QC figure `{path}`: {source}")]
    Figure {
        /// 输出路径.
        path: PathBuf,
        /// 底层错误.
        #[source]
        source: image::ImageError,
    },

    /// 输出目录创建失败.
    #[error("cannot create `{path}`: {source}")]
    Io {
        /// 目录.
        path: PathBuf,
        /// 底层错误.
        #[source]
        source: io::Error,
    },
}

/// 带会话身份的致命错误. 一个会话失败不影响其他会话.
#[derive(Error, Debug)]
#[error("{session}: {source}")]
pub struct SessionError {
    /// 失败的会话.
    pub session: SessionId,
    /// 具体错误.
    #[source]
    pub source: PipelineError,
}
