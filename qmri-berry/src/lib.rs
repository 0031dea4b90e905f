#![warn(missing_docs)] // <= 合适时移除它.
// #![warn(clippy::missing_docs_in_private_items)]  // <= too strict.

//! 核心库. 对定量磁共振 (qMRI) 弛豫图 (T1/T2/PD) 做会话级后处理:
//! 把定量图配准到受试者的高分辨率解剖空间, 把外部分割传播回定量图原生空间,
//! 并计算每个脑区的描述统计量.
//!
//! 该 crate 目前仅提供 `safe` 接口.
//!
//! # 注意
//!
//! 1. 输入按 BIDS 风格组织 (`sub-*/ses-*/anat`), 分割采用 FreeSurfer aseg 标签集.
//! 2. 命令行解析, 会话发现以及已有输出的跳过/覆盖策略不在本 crate 中,
//!   见 `drivers/batch`.
//!
//! # 开发计划
//!
//! ### nifti 体数据与仿射矩阵 ✅
//!
//! 读取任意数值类型的 3D nifti, 统一按 `(z, h, w)` 访问, 输出 gzip 压缩的 nifti.
//!
//! 实现位于 `qmri-berry/src/data`.
//!
//! ### 三维形态学操作 ✅
//!
//! 26-连通最大区域提取, 基于欧氏距离变换的球形膨胀.
//!
//! 实现位于 `qmri-berry/src/data/morph_3d`.
//!
//! ### 会话输入定位 ✅
//!
//! 结构化解析 BIDS 文件名, 选择解剖参考模态 (T2w 优先).
//!
//! 实现位于 `qmri-berry/src/session`.
//!
//! ### 配准引擎 ✅
//!
//! 1. 刚体/相似/仿射变换, 质心初始化, 多分辨率坐标搜索. ✅
//! 2. Mattes 互信息, 全局相关, 均方差三种度量. ✅
//! 3. 最近邻, 三线性, 三次 B 样条重采样. ✅
//!
//! 实现位于 `qmri-berry/src/engine`.
//!
//! ### 脑区统计 ✅
//!
//! 标准标签表和自定义分组表. 两者共用同一份按标签归集的体素值.
//!
//! 实现位于 `qmri-berry/src/stats`.
//!
//! ### 元信息与 QC 图 ✅
//!
//! 实现位于 `qmri-berry/src/provenance.rs`, `qmri-berry/src/qc.rs`.
//!
//! ### 非线性配准 ⌛️
//!
//! 目前只支持线性变换.

/// 三维索引, 同时也可一定程度上用作非负整数向量.
pub type Idx3d = (usize, usize, usize);

/// 3D nii 文件基础数据结构.
mod data;

pub use data::{
    Affine, IntensityWindow, LabelVolume, MaskVolume, NiftiHeaderAttr, ScalarVolume, Volume,
};

pub use data::morph_3d;

pub mod catalog;
pub mod config;
pub mod consts;
pub mod dataset;
pub mod engine;
pub mod error;
pub mod pipeline;
pub mod prelude;
pub mod provenance;
pub mod qc;
pub mod session;
pub mod stats;
