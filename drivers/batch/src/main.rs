//! qMRI 弛豫图后处理批处理程序.
//!
//! 对 BIDS 数据集中的每个会话: 配准定量图, 传播分割, 计算脑区统计并写出元信息.

mod result;
mod runner;

use std::env;
use std::io;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use log::{info, LevelFilter};
use qmri_berry::config::{Metric, PipelineConfig, QcContrast, TransformKind};
use qmri_berry::dataset::StudyLayout;
use qmri_berry::engine::NativeEngine;
use qmri_berry::pipeline::SessionContext;
use qmri_berry::stats::RegionGrouping;
use serde_json::Value;
use simple_logger::SimpleLogger;
use utils::loader;

use runner::{ExistingPolicy, Plan};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// The path to the BIDS directory for your study
    bids_dir: PathBuf,

    /// The path to the folder where outputs will be stored
    output_dir: PathBuf,

    /// Should always be `participant`
    analysis_level: String,

    /// The folder where the qMRI relaxometry maps are stored
    /// [default: $QMRI_DERIV_DIR, then $HOME/dataset/qmri]
    qmri_deriv_dir: Option<PathBuf>,

    /// The folder where the BIBSNet/CABINET segmentations are stored
    /// [default: $QMRI_BIBSNET_DIR, then $HOME/dataset/bibsnet]
    bibsnet_deriv_dir: Option<PathBuf>,

    /// Subject labels to process (i.e. sub-01 or 01). All subjects when absent
    #[arg(long, alias = "participant_label", num_args = 1..)]
    participant_label: Vec<String>,

    /// A specific session to process (i.e. ses-01)
    #[arg(long, alias = "session_id")]
    session_id: Option<String>,

    /// Delete an existing session output folder before processing
    #[arg(long, alias = "overwrite_existing", conflicts_with = "skip_existing")]
    overwrite_existing: bool,

    /// Skip a session whose output folder already exists
    #[arg(long, alias = "skip_existing")]
    skip_existing: bool,

    /// JSON files with region groupings; each produces its own table
    #[arg(long, alias = "region_groupings_json", num_args = 1..)]
    region_groupings_json: Vec<PathBuf>,

    /// Filename entity key holding the sequence name (e.g. `acq`)
    #[arg(long, alias = "sequence_name_source")]
    sequence_name_source: Option<String>,

    /// Registration metric
    #[arg(long, alias = "reg_metric", value_parser = ["mattes", "GC", "meansquares"])]
    reg_metric: Option<String>,

    /// Registration transform type
    #[arg(long, alias = "reg_type", value_parser = ["Rigid", "Similarity", "Affine"])]
    reg_type: Option<String>,

    /// Brain mask dilation radius in voxels
    #[arg(long)]
    mask_dilation_radius: Option<usize>,

    /// QC figure contrast
    #[arg(long, value_parser = ["modal", "full-range"])]
    qc_contrast: Option<String>,

    /// FreeSurfer-style lookup table replacing the built-in aseg table
    #[arg(long)]
    lut: Option<PathBuf>,

    /// JSON pipeline configuration; command line flags take precedence
    #[arg(long)]
    config: Option<PathBuf>,

    /// Number of sessions processed in parallel [default: number of CPUs]
    #[arg(short, long)]
    jobs: Option<usize>,

    /// Print debug messages
    #[arg(short, long)]
    verbose: bool,
}

/// 按序列化名称解析配置枚举.
fn by_name<T: for<'de> serde::Deserialize<'de>>(name: &str) -> Result<T> {
    serde_json::from_value(Value::String(name.to_string()))
        .with_context(|| format!("unknown option value `{name}`"))
}

impl Args {
    fn policy(&self) -> ExistingPolicy {
        match (self.overwrite_existing, self.skip_existing) {
            (true, _) => ExistingPolicy::Overwrite,
            (_, true) => ExistingPolicy::Skip,
            _ => ExistingPolicy::Refuse,
        }
    }

    /// 配置文件, 然后命令行覆盖.
    fn pipeline_config(&self, cwd: &std::path::Path) -> Result<PipelineConfig> {
        let mut config = match &self.config {
            Some(p) => PipelineConfig::load(loader::absolute(p, cwd))?,
            None => PipelineConfig::default(),
        };
        if let Some(k) = &self.sequence_name_source {
            config.sequence_key = k.clone();
        }
        if let Some(m) = &self.reg_metric {
            config.metric = by_name::<Metric>(m)?;
        }
        if let Some(t) = &self.reg_type {
            config.transform_kind = by_name::<TransformKind>(t)?;
        }
        if let Some(r) = self.mask_dilation_radius {
            config.mask_dilation_radius = r;
        }
        if let Some(c) = &self.qc_contrast {
            config.qc_contrast = by_name::<QcContrast>(c)?;
        }
        if let Some(l) = &self.lut {
            config.lut_path = Some(loader::absolute(l, cwd));
        }
        Ok(config)
    }

    fn layout(&self, cwd: &std::path::Path) -> Result<StudyLayout> {
        let qmri = match &self.qmri_deriv_dir {
            Some(p) => p.clone(),
            None => loader::qmri_dir_from_env_or_home()
                .context("no qMRI derivatives directory given and no home directory")?,
        };
        let bibsnet = match &self.bibsnet_deriv_dir {
            Some(p) => p.clone(),
            None => loader::segmentation_dir_from_env_or_home()
                .context("no segmentation directory given and no home directory")?,
        };
        Ok(StudyLayout::new(
            loader::absolute(&self.bids_dir, cwd),
            loader::absolute(bibsnet, cwd),
            loader::absolute(qmri, cwd),
            loader::absolute(&self.output_dir, cwd),
        ))
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    let level = if args.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    SimpleLogger::new().with_level(level).env().init()?;

    if args.analysis_level != "participant" {
        bail!(
            "analysis level must be participant, but program received: {}",
            args.analysis_level
        );
    }

    let cwd = env::current_dir().context("cannot determine the working directory")?;
    let layout = args.layout(&cwd)?;
    let config = args.pipeline_config(&cwd)?;
    let groupings = args
        .region_groupings_json
        .iter()
        .map(|p| RegionGrouping::load(loader::absolute(p, &cwd)))
        .collect::<Result<Vec<_>, _>>()?;
    let engine = NativeEngine::from_config(&config);
    let ctx = SessionContext::from_config(config, groupings)?;

    let participants: Vec<String> = args
        .participant_label
        .iter()
        .flat_map(|s| s.split_whitespace())
        .map(str::to_string)
        .collect();
    let sessions = loader::discover_sessions(
        &layout.bids_root,
        &participants,
        args.session_id.as_deref(),
    )
    .with_context(|| format!("cannot discover sessions in `{}`", layout.bids_root.display()))?;
    let jobs = args.jobs.unwrap_or_else(utils::cpus);
    info!("{} session(s) to process with {jobs} worker(s)", sessions.len());

    let report = runner::run(Plan {
        layout,
        sessions,
        ctx,
        engine,
        policy: args.policy(),
        jobs,
    });
    report.write_to(io::stdout().lock())?;

    if report.failed() > 0 {
        bail!("{} session(s) failed", report.failed());
    }
    Ok(())
}
