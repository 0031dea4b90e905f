//! 单个会话的处理流程.
//!
//! 1. 读取元信息与全部体数据, 校验分组文件;
//! 2. 以清理膨胀后的脑掩膜为配准掩膜, 将合成加权图像配准到解剖参考;
//! 3. 正向变换把定量图重采样到解剖网格, 逆向变换把分割重采样到定量网格;
//! 4. 在定量网格上统计标准表和自定义表;
//! 5. 写出体数据, 统计表, QC 图及其 sidecar.
//!
//! 任何致命错误都只终止当前会话. 写出在全部计算完成后才开始.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use log::{debug, info, warn};

use crate::catalog::LabelCatalog;
use crate::config::PipelineConfig;
use crate::consts::{QC_FIGURE_DESC, STANDARD_TABLE_DESC};
use crate::dataset::StudyLayout;
use crate::engine::{Interpolation, RegistrationEngine};
use crate::error::{CatalogError, PipelineError, SessionError};
use crate::provenance::{sidecar_path, voxel_correlation, Provenance};
use crate::session::{self, BidsName, MapKind, SessionAssets, SessionId};
use crate::stats::{LabelValueIndex, RegionGrouping, RegionStatisticsTable};
use crate::{morph_3d, LabelVolume, MaskVolume, NiftiHeaderAttr, ScalarVolume};

/// QC 图底图的定量图优先级.
const UNDERLAY_PREFERENCE: [MapKind; 3] = [MapKind::T2, MapKind::T1, MapKind::PD];

/// 所有会话共享的只读上下文.
#[derive(Debug, Clone)]
pub struct SessionContext {
    /// 处理流程配置.
    pub config: PipelineConfig,
    /// 区域查找表.
    pub catalog: Arc<LabelCatalog>,
    /// 自定义分组, 每个生成一张表.
    pub groupings: Arc<[RegionGrouping]>,
}

impl SessionContext {
    /// 由配置构建上下文. 配置了查找表路径时加载之, 否则使用内置表.
    pub fn from_config(
        config: PipelineConfig,
        groupings: Vec<RegionGrouping>,
    ) -> Result<Self, CatalogError> {
        let catalog = match &config.lut_path {
            Some(p) => LabelCatalog::load(p)?,
            None => LabelCatalog::builtin().clone(),
        };
        Ok(Self {
            config,
            catalog: Arc::new(catalog),
            groupings: groupings.into(),
        })
    }
}

/// 一个会话写出的全部产物.
#[derive(Debug, Clone)]
pub struct SessionOutputs {
    /// 输出目录.
    pub anat_dir: PathBuf,
    /// 解剖空间中的定量图.
    pub resampled_maps: BTreeMap<MapKind, PathBuf>,
    /// 定量空间中的分割.
    pub registered_segmentation: PathBuf,
    /// 标准统计表.
    pub standard_table: PathBuf,
    /// 自定义统计表, 与分组顺序一致.
    pub custom_tables: Vec<PathBuf>,
    /// QC 图. 分割为空时不生成.
    pub qc_figure: Option<PathBuf>,
    /// 掩膜内体素相关系数.
    pub correlation: Option<f64>,
    /// 配准最终度量值.
    pub final_cost: f64,
}

/// 会话的输出文件名.
struct OutputNames {
    dir: PathBuf,
    prefix: BidsName,
    assets: SessionAssets,
}

impl OutputNames {
    fn new(layout: &StudyLayout, assets: &SessionAssets) -> Self {
        Self {
            dir: assets.session.anat_dir(&layout.output_root),
            prefix: assets.session.file_stem(),
            assets: assets.clone(),
        }
    }

    fn join(&self, name: BidsName) -> PathBuf {
        self.dir.join(name.to_string())
    }

    fn map(&self, kind: MapKind) -> PathBuf {
        self.join(
            self.prefix
                .clone()
                .with_entity("space", self.assets.modality.as_str())
                .with_entity("desc", self.assets.sequence_tag.as_str())
                .with_suffix(kind.suffix())
                .with_extension(".nii.gz"),
        )
    }

    fn segmentation(&self) -> PathBuf {
        let name = BidsName::from_path(&self.assets.segmentation).unwrap_or_else(|| {
            self.prefix
                .clone()
                .with_entity("desc", "aseg")
                .with_suffix("dseg")
        });
        self.join(
            name.with_entity("space", self.assets.sequence_tag.as_str())
                .with_extension(".nii.gz"),
        )
    }

    fn table(&self, desc: &str) -> PathBuf {
        self.join(self.prefix.clone().with_entity("desc", desc).with_extension(".tsv"))
    }

    fn figure(&self) -> PathBuf {
        self.join(
            self.prefix
                .clone()
                .with_entity("desc", QC_FIGURE_DESC)
                .with_extension(".png"),
        )
    }
}

/// 定位一个会话的输入并处理之.
pub fn process_session<E: RegistrationEngine + ?Sized>(
    layout: &StudyLayout,
    session: &SessionId,
    engine: &E,
    ctx: &SessionContext,
) -> Result<SessionOutputs, SessionError> {
    let assets = session::resolve(layout, session, &ctx.config.sequence_key).map_err(|e| {
        SessionError {
            session: session.clone(),
            source: e.into(),
        }
    })?;
    process(layout, &assets, engine, ctx)
}

/// 处理一个已定位输入的会话.
pub fn process<E: RegistrationEngine + ?Sized>(
    layout: &StudyLayout,
    assets: &SessionAssets,
    engine: &E,
    ctx: &SessionContext,
) -> Result<SessionOutputs, SessionError> {
    run(layout, assets, engine, ctx).map_err(|source| SessionError {
        session: assets.session.clone(),
        source,
    })
}

fn run<E: RegistrationEngine + ?Sized>(
    layout: &StudyLayout,
    assets: &SessionAssets,
    engine: &E,
    ctx: &SessionContext,
) -> Result<SessionOutputs, PipelineError> {
    let session = &assets.session;
    let catalog = ctx.catalog.as_ref();

    // 1. 输入
    for g in ctx.groupings.iter() {
        g.resolve(catalog)?;
    }
    let provenance = Provenance::collect(layout, assets)?;

    let reference = ScalarVolume::open(&assets.reference)?;
    let segmentation = LabelVolume::open(&assets.segmentation)?;
    let brain_mask = MaskVolume::open(&assets.mask)?;
    let moving = ScalarVolume::open(assets.synthetic_for_modality())?;
    let mut maps = BTreeMap::new();
    for (&kind, path) in assets.maps.iter() {
        maps.insert(kind, ScalarVolume::open(path)?);
    }
    info!(
        "{session}: reference {} {:?}, moving {:?}, {} map(s)",
        assets.modality,
        reference.shape(),
        moving.shape(),
        maps.len()
    );

    // 2. 配准
    let reg_mask = morph_3d::registration_mask(&brain_mask, ctx.config.mask_dilation_radius);
    debug!(
        "{session}: registration mask has {} voxels (brain mask {})",
        reg_mask.foreground_count(),
        brain_mask.foreground_count()
    );
    let registration = engine.register(&reference, &moving, &reg_mask)?;
    info!(
        "{session}: registration finished, final cost {:.5}",
        registration.final_cost
    );
    let correlation = voxel_correlation(&registration.warped_moving, &reference, &brain_mask)?;
    match correlation {
        Some(r) => info!("{session}: voxel correlation within mask {r:.4}"),
        None => warn!("{session}: voxel correlation within mask is undefined"),
    }

    // 3. 重采样
    let mut resampled = BTreeMap::new();
    for (&kind, map) in maps.iter() {
        let warped = engine.apply_forward(
            map,
            reference.header(),
            &registration.forward,
            Interpolation::BSpline,
        )?;
        resampled.insert(kind, warped);
    }
    let native_segmentation = engine.apply_inverse(
        &segmentation,
        moving.header(),
        &registration.inverse,
        Interpolation::NearestNeighbor,
    )?;

    // 4. 统计
    let index = LabelValueIndex::build(&native_segmentation, &maps)?;
    let standard = index.standard_table(catalog)?;
    let mut custom: Vec<(&RegionGrouping, RegionStatisticsTable)> = Vec::new();
    for g in ctx.groupings.iter() {
        custom.push((g, index.custom_table(catalog, g)?));
    }
    let figure = UNDERLAY_PREFERENCE
        .iter()
        .find_map(|k| resampled.get(k))
        .map(|underlay| crate::qc::render(underlay, &segmentation, ctx.config.qc_contrast))
        .transpose()?
        .flatten();

    // 5. 写出
    let names = OutputNames::new(layout, assets);
    fs::create_dir_all(&names.dir).map_err(|source| PipelineError::Io {
        path: names.dir.clone(),
        source,
    })?;

    let map_doc = provenance.map_document();
    let mut resampled_maps = BTreeMap::new();
    for (&kind, volume) in resampled.iter() {
        let path = volume.write_nii_gz(names.map(kind))?;
        map_doc.save(sidecar_path(&path))?;
        resampled_maps.insert(kind, path);
    }
    let registered_segmentation = native_segmentation.write_nii_gz(names.segmentation())?;

    let standard_table = names.table(STANDARD_TABLE_DESC);
    standard.save(&standard_table)?;
    provenance
        .table_document(&registered_segmentation, correlation, None)
        .save(sidecar_path(&standard_table))?;

    let mut custom_tables = Vec::with_capacity(custom.len());
    for (grouping, table) in custom {
        let path = names.table(grouping.name());
        table.save(&path)?;
        provenance
            .table_document(&registered_segmentation, correlation, Some(grouping.raw()))
            .save(sidecar_path(&path))?;
        custom_tables.push(path);
    }

    let qc_figure = match figure {
        Some(img) => {
            let path = names.figure();
            img.save(&path).map_err(|source| PipelineError::Figure {
                path: path.clone(),
                source,
            })?;
            let underlay = UNDERLAY_PREFERENCE
                .iter()
                .find_map(|k| resampled_maps.get(k))
                .map_or_else(PathBuf::new, Clone::clone);
            provenance
                .figure_document(&underlay)
                .save(sidecar_path(&path))?;
            Some(path)
        }
        None => {
            warn!("{session}: segmentation is empty, QC figure skipped");
            None
        }
    };

    info!(
        "{session}: wrote {} map(s), {} table(s) to `{}`",
        resampled_maps.len(),
        custom_tables.len() + 1,
        names.dir.display()
    );
    Ok(SessionOutputs {
        anat_dir: names.dir,
        resampled_maps,
        registered_segmentation,
        standard_table,
        custom_tables,
        qc_figure,
        correlation,
        final_cost: registration.final_cost,
    })
}

/// 标准表是否已存在. 批处理据此跳过已完成的会话.
pub fn standard_table_exists(layout: &StudyLayout, session: &SessionId) -> bool {
    let name = session
        .file_stem()
        .with_entity("desc", STANDARD_TABLE_DESC)
        .with_extension(".tsv");
    session
        .anat_dir(&layout.output_root)
        .join(name.to_string())
        .is_file()
}
