//! 数据集根目录布局.

use std::path::{Path, PathBuf};

/// 一次处理涉及的四个数据集根目录.
///
/// 每个根目录下都按 `sub-*/ses-*/anat` 组织.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StudyLayout {
    /// 原始 BIDS 数据集, 提供解剖参考图像.
    pub bids_root: PathBuf,
    /// 分割工具的输出, 提供分割和脑掩膜.
    pub segmentation_root: PathBuf,
    /// 定量成像数据集, 提供定量图和合成加权图像.
    pub qmri_root: PathBuf,
    /// 本流程的输出目录.
    pub output_root: PathBuf,
}

impl StudyLayout {
    /// 由四个根目录构建布局.
    pub fn new<P: Into<PathBuf>>(
        bids_root: P,
        segmentation_root: P,
        qmri_root: P,
        output_root: P,
    ) -> Self {
        Self {
            bids_root: bids_root.into(),
            segmentation_root: segmentation_root.into(),
            qmri_root: qmri_root.into(),
            output_root: output_root.into(),
        }
    }

    /// 全部位于 `{用户主目录}/dataset` 下的默认布局:
    /// `bids`, `bibsnet`, `qmri`, `qmri_postproc`.
    pub fn under_home() -> Option<Self> {
        Some(Self::new(
            home_dataset_dir_with(["bids"])?,
            home_dataset_dir_with(["bibsnet"])?,
            home_dataset_dir_with(["qmri"])?,
            home_dataset_dir_with(["qmri_postproc"])?,
        ))
    }
}

/// 获取 `{用户主目录}/dataset` 目录.
pub fn home_dataset_dir() -> Option<PathBuf> {
    let mut ans = dirs::home_dir()?;
    ans.push("dataset");
    Some(ans)
}

/// 获取 `{用户主目录}/dataset` 目录下给定继续项组成的全路径.
pub fn home_dataset_dir_with<P: AsRef<Path>, I: IntoIterator<Item = P>>(it: I) -> Option<PathBuf> {
    let mut ans = home_dataset_dir()?;
    ans.extend(it);
    Some(ans)
}
