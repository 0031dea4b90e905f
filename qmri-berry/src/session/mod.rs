//! 会话身份与会话输入.
//!
//! 一个会话 (`sub-*` + 可选 `ses-*`) 的全部输入文件由 [`resolve`] 定位,
//! 结果以 [`SessionAssets`] 的形式交给处理流程.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

mod naming;
mod resolve;

pub use naming::BidsName;
pub use resolve::resolve;

/// 会话身份. 受试者带 `sub-` 前缀, 会话带 `ses-` 前缀或不存在.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId {
    subject: String,
    session: Option<String>,
}

/// 补全 BIDS 前缀.
fn with_prefix(s: &str, prefix: &str) -> String {
    if s.starts_with(prefix) {
        s.to_string()
    } else {
        format!("{prefix}{s}")
    }
}

impl SessionId {
    /// 构造会话身份. `subject` 和 `session` 可带或不带 `sub-`/`ses-` 前缀;
    /// `session` 为空字符串代表数据集不使用会话层级.
    pub fn new(subject: &str, session: &str) -> Self {
        Self {
            subject: with_prefix(subject, "sub-"),
            session: (!session.is_empty()).then(|| with_prefix(session, "ses-")),
        }
    }

    /// 受试者目录名, 如 `sub-01`.
    #[inline]
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// 会话目录名, 如 `ses-A`.
    #[inline]
    pub fn session(&self) -> Option<&str> {
        self.session.as_deref()
    }

    /// 会话相对于数据集根目录的 `anat` 目录, 如 `sub-01/ses-A/anat`.
    pub fn anat_dir(&self, root: &Path) -> PathBuf {
        let mut ans = root.join(&self.subject);
        if let Some(ses) = &self.session {
            ans.push(ses);
        }
        ans.push("anat");
        ans
    }

    /// 仅含 `sub` (和 `ses`) 实体的文件名骨架.
    pub fn file_stem(&self) -> BidsName {
        let label = |s: &str| s.split_once('-').map_or(s, |(_, v)| v).to_string();
        let mut entities = vec![("sub".to_string(), label(&self.subject))];
        if let Some(ses) = &self.session {
            entities.push(("ses".to_string(), label(ses)));
        }
        BidsName::new(entities, String::new(), String::new())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.session {
            Some(ses) => write!(f, "{}/{}", self.subject, ses),
            None => write!(f, "{}", self.subject),
        }
    }
}

/// 解剖参考图像模态. T2w 优先于 T1w.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Modality {
    /// T2 加权.
    T2w,
    /// T1 加权.
    T1w,
}

impl Modality {
    /// 按优先级排列的全部模态.
    pub const PREFERENCE: [Modality; 2] = [Modality::T2w, Modality::T1w];

    /// BIDS 后缀.
    #[inline]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Modality::T2w => "T2w",
            Modality::T1w => "T1w",
        }
    }
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 定量图种类. 派生的 `Ord` 即统计表中的列顺序.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MapKind {
    /// T1 弛豫时间图.
    T1,
    /// T2 弛豫时间图.
    T2,
    /// 质子密度图.
    PD,
}

impl MapKind {
    /// 全部种类, 按列顺序.
    pub const ALL: [MapKind; 3] = [MapKind::T1, MapKind::T2, MapKind::PD];

    /// 列名前缀, 如 `T1`.
    #[inline]
    pub const fn as_str(&self) -> &'static str {
        match self {
            MapKind::T1 => "T1",
            MapKind::T2 => "T2",
            MapKind::PD => "PD",
        }
    }

    /// BIDS 后缀, 如 `T1map`.
    #[inline]
    pub const fn suffix(&self) -> &'static str {
        match self {
            MapKind::T1 => "T1map",
            MapKind::T2 => "T2map",
            MapKind::PD => "PDmap",
        }
    }
}

impl fmt::Display for MapKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 一个会话经过校验的全部输入.
#[derive(Debug, Clone)]
pub struct SessionAssets {
    /// 会话身份.
    pub session: SessionId,
    /// 解剖参考模态.
    pub modality: Modality,
    /// 解剖空间中的分割.
    pub segmentation: PathBuf,
    /// 与分割配套的脑掩膜.
    pub mask: PathBuf,
    /// 解剖参考图像.
    pub reference: PathBuf,
    /// 定量原生空间中的合成 T1w.
    pub synthetic_t1w: PathBuf,
    /// 定量原生空间中的合成 T2w.
    pub synthetic_t2w: PathBuf,
    /// 现有定量图, 至少一个.
    pub maps: BTreeMap<MapKind, PathBuf>,
    /// 序列标签, 用于输出文件名.
    pub sequence_tag: String,
}

impl SessionAssets {
    /// 与解剖参考对比度一致的合成加权图像, 用于驱动配准.
    #[inline]
    pub fn synthetic_for_modality(&self) -> &Path {
        match self.modality {
            Modality::T1w => &self.synthetic_t1w,
            Modality::T2w => &self.synthetic_t2w,
        }
    }
}
