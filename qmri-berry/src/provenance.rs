//! 输出产物的元信息 (JSON sidecar).
//!
//! 每个 sidecar 都由两部分组成: 与产物相关的字段, 以及同一会话所有产物共享的来源信息.
//! 输入文件以 `bids:<数据集>:<相对路径>` 的逻辑标识引用.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use itertools::izip;
use log::debug;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::consts::{dataset_tag, description, ACQUISITION_FIELDS, WEIGHTING_SPECIFIC_FIELDS};
use crate::dataset::StudyLayout;
use crate::engine::metric::pearson;
use crate::engine::Interpolation;
use crate::error::ProvenanceError;
use crate::session::{Modality, SessionAssets};
use crate::{MaskVolume, NiftiHeaderAttr, ScalarVolume};

/// JSON 对象.
pub type JsonObject = Map<String, Value>;

/// 图像文件对应的 sidecar 路径: 去掉第一个 `.` 起的扩展名, 换成 `.json`.
pub fn sidecar_path(image: &Path) -> PathBuf {
    let name = image
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stem = name.split_once('.').map_or(name.as_str(), |(s, _)| s);
    image.with_file_name(format!("{stem}.json"))
}

/// 读取 sidecar. 文件不存在时返回 `Ok(None)`; 存在但不是 JSON 对象时返回 `Err`.
pub fn load_sidecar(path: &Path) -> Result<Option<JsonObject>, ProvenanceError> {
    let text = match fs::read_to_string(path) {
        Ok(t) => t,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!("sidecar `{}` does not exist", path.display());
            return Ok(None);
        }
        Err(source) => {
            return Err(ProvenanceError::Io {
                path: path.to_owned(),
                source,
            })
        }
    };
    serde_json::from_str(&text)
        .map(Some)
        .map_err(|source| ProvenanceError::MalformedSidecar {
            path: path.to_owned(),
            source,
        })
}

/// 复制白名单字段. sidecar 缺失或字段缺失时为 `null`.
pub fn allowlisted(sidecar: Option<&JsonObject>) -> JsonObject {
    ACQUISITION_FIELDS
        .iter()
        .map(|&k| {
            let v = sidecar.and_then(|s| s.get(k)).cloned().unwrap_or(Value::Null);
            (k.to_string(), v)
        })
        .collect()
}

/// 去掉只对某个加权图像有意义的字段.
pub fn without_weighting_fields(mut sidecar: JsonObject) -> JsonObject {
    for k in WEIGHTING_SPECIFIC_FIELDS {
        sidecar.remove(k);
    }
    sidecar
}

/// `bids:<tag>:<path 相对于 root 的路径>`.
pub fn bids_uri(tag: &str, root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    format!("bids:{tag}:{}", rel.display())
}

/// 配准后合成图像与解剖参考在掩膜内的体素 Pearson 相关系数.
///
/// 掩膜为空, 或任一方方差为 0 时无定义, 返回 `Ok(None)`.
pub fn voxel_correlation(
    warped: &ScalarVolume,
    reference: &ScalarVolume,
    mask: &MaskVolume,
) -> Result<Option<f64>, ProvenanceError> {
    for other in [warped.shape(), mask.shape()] {
        if other != reference.shape() {
            return Err(ProvenanceError::ShapeMismatch(reference.shape(), other));
        }
    }
    let (mut a, mut b) = (Vec::new(), Vec::new());
    for (&w, &r, &m) in izip!(warped.data().iter(), reference.data().iter(), mask.data().iter()) {
        if m != 0 {
            a.push(w as f64);
            b.push(r as f64);
        }
    }
    Ok(pearson(&a, &b))
}

/// 同一会话所有 sidecar 共享的来源信息.
#[derive(Debug, Clone, Serialize)]
pub struct SharedProvenance {
    /// 脑掩膜.
    #[serde(rename = "Mask_Path")]
    pub mask_path: Vec<String>,
    /// 解剖参考.
    #[serde(rename = "Anatomical_Reference_Path")]
    pub anatomical_reference_path: Vec<String>,
    /// 解剖参考模态.
    #[serde(rename = "Anatomical_Reference_Modality")]
    pub anatomical_reference_modality: Modality,
    /// 原始定量图.
    #[serde(rename = "Original_qMRI_Images")]
    pub original_qmri_images: Vec<String>,
    /// 从定量图 sidecar 复制的白名单字段, 平铺在顶层.
    #[serde(flatten)]
    pub acquisition: JsonObject,
    /// 从解剖参考 sidecar 复制的白名单字段.
    #[serde(rename = "Anatomical_Reference_Metadata")]
    pub anatomical_reference_metadata: JsonObject,
    /// 定量图 sidecar 全文, 去掉加权相关字段. sidecar 不存在时为 `null`.
    #[serde(rename = "Original_qMRI_JSON_Metadata")]
    pub original_qmri_json_metadata: Option<JsonObject>,
}

/// 统计表 sidecar 的专有字段.
#[derive(Debug, Clone, Serialize)]
pub struct TableFields {
    /// 工作流描述.
    #[serde(rename = "Workflow_Description")]
    pub workflow_description: &'static str,
    /// 解剖空间中的原始分割.
    #[serde(rename = "Original_Segmentation_Path")]
    pub original_segmentation_path: Vec<String>,
    /// 定量空间中的分割.
    #[serde(rename = "qMRI_Registered_Segmentation_Path")]
    pub registered_segmentation_path: Vec<String>,
    /// 分割重采样插值方式.
    #[serde(rename = "Segmentation_Resampling_Scheme")]
    pub segmentation_resampling_scheme: Interpolation,
    /// 掩膜内体素相关系数.
    #[serde(rename = "Voxel_Correlation_Within_Mask")]
    pub voxel_correlation_within_mask: Option<f64>,
    /// 相关系数说明.
    #[serde(rename = "Voxel_Correlation_Within_Mask_Description")]
    pub voxel_correlation_description: &'static str,
    /// 自定义分组原文. 只出现在自定义统计表中.
    #[serde(rename = "Custom_ROI_Grouping", skip_serializing_if = "Option::is_none")]
    pub custom_roi_grouping: Option<Value>,
}

/// 重采样定量图 sidecar 的专有字段.
#[derive(Debug, Clone, Serialize)]
pub struct MapFields {
    /// 工作流描述.
    #[serde(rename = "Workflow_Description")]
    pub workflow_description: &'static str,
    /// 解剖空间中的分割.
    #[serde(rename = "Segmentation_Path")]
    pub segmentation_path: Vec<String>,
    /// 定量图重采样插值方式.
    #[serde(rename = "Resampling_Scheme")]
    pub resampling_scheme: Interpolation,
}

/// QC 图 sidecar 的专有字段.
#[derive(Debug, Clone, Serialize)]
pub struct FigureFields {
    /// 工作流描述.
    #[serde(rename = "Workflow_Description")]
    pub workflow_description: &'static str,
    /// 轮廓所用分割.
    #[serde(rename = "Segmentation_Path")]
    pub segmentation_path: Vec<String>,
    /// 底图.
    #[serde(rename = "Underlay_Path")]
    pub underlay_path: Vec<String>,
}

/// 产物专有字段.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ArtifactFields {
    /// 统计表.
    Table(TableFields),
    /// 重采样定量图.
    Map(MapFields),
    /// QC 图.
    Figure(FigureFields),
}

/// 一个 sidecar 文档.
#[derive(Debug, Clone, Serialize)]
pub struct MetadataDocument {
    /// 专有字段.
    #[serde(flatten)]
    pub artifact: ArtifactFields,
    /// 共享来源信息.
    #[serde(flatten)]
    pub shared: SharedProvenance,
}

impl MetadataDocument {
    /// 以缩进格式写出到 `path`.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ProvenanceError> {
        let path = path.as_ref();
        let io_err = |source| ProvenanceError::Io {
            path: path.to_owned(),
            source,
        };
        let mut w = BufWriter::new(File::create(path).map_err(io_err)?);
        serde_json::to_writer_pretty(&mut w, self)?;
        writeln!(w).map_err(io_err)?;
        w.flush().map_err(io_err)
    }

    /// 转换为 JSON 值.
    pub fn to_value(&self) -> Result<Value, ProvenanceError> {
        Ok(serde_json::to_value(self)?)
    }
}

/// 一个会话的来源信息, 用于生成各产物的 sidecar.
#[derive(Debug, Clone)]
pub struct Provenance {
    layout: StudyLayout,
    segmentation: PathBuf,
    shared: SharedProvenance,
}

impl Provenance {
    /// 读取定量图和解剖参考的 sidecar, 汇总共享来源信息.
    ///
    /// 定量图 sidecar 取 T1, T2, PD 中第一个存在的定量图.
    pub fn collect(layout: &StudyLayout, assets: &SessionAssets) -> Result<Self, ProvenanceError> {
        let qmri_sidecar = match assets.maps.values().next() {
            Some(first) => load_sidecar(&sidecar_path(first))?,
            None => None,
        };
        let reference_sidecar = load_sidecar(&sidecar_path(&assets.reference))?;

        let shared = SharedProvenance {
            mask_path: vec![bids_uri(
                dataset_tag::SEGMENTATION,
                &layout.segmentation_root,
                &assets.mask,
            )],
            anatomical_reference_path: vec![bids_uri(
                dataset_tag::BIDS,
                &layout.bids_root,
                &assets.reference,
            )],
            anatomical_reference_modality: assets.modality,
            original_qmri_images: assets
                .maps
                .values()
                .map(|p| bids_uri(dataset_tag::QMRI, &layout.qmri_root, p))
                .collect(),
            acquisition: allowlisted(qmri_sidecar.as_ref()),
            anatomical_reference_metadata: allowlisted(reference_sidecar.as_ref()),
            original_qmri_json_metadata: qmri_sidecar.map(without_weighting_fields),
        };
        Ok(Self {
            layout: layout.clone(),
            segmentation: assets.segmentation.clone(),
            shared,
        })
    }

    /// 共享来源信息.
    #[inline]
    pub fn shared(&self) -> &SharedProvenance {
        &self.shared
    }

    fn segmentation_uri(&self) -> Vec<String> {
        vec![bids_uri(
            dataset_tag::SEGMENTATION,
            &self.layout.segmentation_root,
            &self.segmentation,
        )]
    }

    fn output_uri(&self, path: &Path) -> Vec<String> {
        vec![bids_uri(dataset_tag::OUTPUT, &self.layout.output_root, path)]
    }

    fn document(&self, artifact: ArtifactFields) -> MetadataDocument {
        MetadataDocument {
            artifact,
            shared: self.shared.clone(),
        }
    }

    /// 统计表 sidecar. `grouping` 为自定义分组原文, 标准表传 `None`.
    pub fn table_document(
        &self,
        registered_segmentation: &Path,
        correlation: Option<f64>,
        grouping: Option<&Value>,
    ) -> MetadataDocument {
        self.document(ArtifactFields::Table(TableFields {
            workflow_description: description::TABLE_WORKFLOW,
            original_segmentation_path: self.segmentation_uri(),
            registered_segmentation_path: self.output_uri(registered_segmentation),
            segmentation_resampling_scheme: Interpolation::NearestNeighbor,
            voxel_correlation_within_mask: correlation,
            voxel_correlation_description: description::CORRELATION,
            custom_roi_grouping: grouping.cloned(),
        }))
    }

    /// 重采样定量图 sidecar. 所有定量图共用同一份.
    pub fn map_document(&self) -> MetadataDocument {
        self.document(ArtifactFields::Map(MapFields {
            workflow_description: description::MAP_WORKFLOW,
            segmentation_path: self.segmentation_uri(),
            resampling_scheme: Interpolation::BSpline,
        }))
    }

    /// QC 图 sidecar.
    pub fn figure_document(&self, underlay: &Path) -> MetadataDocument {
        self.document(ArtifactFields::Figure(FigureFields {
            workflow_description: description::QC_WORKFLOW,
            segmentation_path: self.segmentation_uri(),
            underlay_path: self.output_uri(underlay),
        }))
    }
}
