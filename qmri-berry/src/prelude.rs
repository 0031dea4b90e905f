//! 🍇欢迎光临🍓
//!
//! 涵盖了本 crate 一系列常用的功能.

pub use crate::Idx3d;

pub use crate::{
    Affine, IntensityWindow, LabelVolume, MaskVolume, NiftiHeaderAttr, ScalarVolume, Volume,
};

pub use crate::catalog::LabelCatalog;
pub use crate::config::{Metric, PipelineConfig, QcContrast, TransformKind};
pub use crate::dataset::{self, StudyLayout};
pub use crate::engine::{Interpolation, NativeEngine, RegistrationEngine, SpatialTransform};
pub use crate::error::{PipelineError, SessionError};
pub use crate::pipeline::{process, process_session, SessionContext, SessionOutputs};
pub use crate::session::{MapKind, Modality, SessionAssets, SessionId};
pub use crate::stats::{RegionGrouping, RegionStatisticsTable};
