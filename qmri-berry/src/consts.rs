//! 通用常量.

/// 分割标签相关常量.
pub mod label {
    /// 背景区域编号. 背景体素从不参与统计.
    pub const BACKGROUND: u32 = 0;

    /// 标签是否是背景?
    #[inline]
    pub const fn is_background(l: u32) -> bool {
        l == BACKGROUND
    }
}

/// 单通道颜色.
pub mod gray {
    /// 单通道黑色.
    pub const BLACK: u8 = 0b_0000_0000;

    /// 单通道白色.
    pub const WHITE: u8 = 0b_1111_1111;
}

/// QC 图中分割轮廓使用的颜色 (品红).
pub const CONTOUR_RGB: [u8; 3] = [255, 0, 255];

/// 配准掩膜默认膨胀半径, 以体素为单位.
pub const DEFAULT_MASK_DILATION_RADIUS: usize = 35;

/// 默认从文件名中的哪个实体键读取序列标签.
pub const DEFAULT_SEQUENCE_KEY: &str = "acq";

/// 文件名中不存在序列实体时使用的序列标签.
pub const FALLBACK_SEQUENCE_TAG: &str = "quant";

/// 标准脑区统计表的 `desc` 实体.
pub const STANDARD_TABLE_DESC: &str = "ParametricROIValues";

/// 配准质量辅助图的 `desc` 实体.
pub const QC_FIGURE_DESC: &str = "RegistrationQCAid";

/// 从原始 sidecar 复制的采集元信息字段白名单.
pub const ACQUISITION_FIELDS: [&str; 6] = [
    "Manufacturer",
    "ManufacturersModelName",
    "DeviceSerialNumber",
    "PatientName",
    "PatientBirthDate",
    "AcquisitionDateTime",
];

/// 只对某个加权图像有意义的 sidecar 字段, 嵌入定量图元信息时移除.
pub const WEIGHTING_SPECIFIC_FIELDS: [&str; 2] = ["SeriesDescription", "ImageType"];

/// 元信息中数据集别名.
pub mod dataset_tag {
    /// 外部分割工具输出.
    pub const SEGMENTATION: &str = "bibsnet";

    /// 原始 BIDS 数据集.
    pub const BIDS: &str = "assembly_bids";

    /// 定量图原始输出.
    pub const QMRI: &str = "qmri";

    /// 本工具的输出.
    pub const OUTPUT: &str = "qmri_postproc";
}

/// 元信息中的文字描述.
pub mod description {
    /// 统计表工作流描述.
    pub const TABLE_WORKFLOW: &str = "The values generated in the accompanying tsv file are \
summary statistics from PD/T1/T2 maps that were generated using the qMRI pipeline. A registration \
was calculated from a high resolution anatomical image to the qMRI maps, and the inverse of this \
registration was applied to register the segmentation image to the original maps. Summary \
statistics were then applied within the different regions of interest for the different maps.";

    /// 重采样定量图工作流描述.
    pub const MAP_WORKFLOW: &str = "The values generated in the accompanying images are the \
quantitative maps that have been registered and resampled to a high-resolution native image for \
the subject (see Anatomical_Reference_Path for the image that was registered to).";

    /// QC 图工作流描述.
    pub const QC_WORKFLOW: &str = "The image generated in the accompanying figure is a visual \
representation of the registration quality of the segmentation image to the high resolution \
anatomical image. The underlay is a quantitative image that has been registered to the anatomical \
image, and the overlay is the segmentation image in the anatomical space. The figure is intended \
to be used as a quality control aid.";

    /// 体素相关系数描述.
    pub const CORRELATION: &str = "This is the correlation of voxel intensities between the \
anatomical reference image and the synthetic weighted image from qmri following registration, \
using only voxels defined in the brain mask.";
}
