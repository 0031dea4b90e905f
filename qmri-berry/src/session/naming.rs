//! BIDS 风格文件名的结构化表示.
//!
//! 形如 `sub-01_ses-A_space-T2w_desc-aseg_dseg.nii.gz` 的文件名被拆成
//! 有序实体 (`sub=01`, `ses=A`, `space=T2w`, `desc=aseg`), 后缀 (`dseg`)
//! 和扩展名 (`.nii.gz`). 所有派生文件名都通过修改该结构得到.

use std::fmt;
use std::path::Path;

/// 解析后的 BIDS 文件名.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BidsName {
    entities: Vec<(String, String)>,
    suffix: String,
    extension: String,
}

impl BidsName {
    /// 由实体, 后缀和扩展名直接构造. `extension` 需带前导 `.`, 可以为空.
    pub fn new<S: Into<String>>(entities: Vec<(String, String)>, suffix: S, extension: S) -> Self {
        Self {
            entities,
            suffix: suffix.into(),
            extension: extension.into(),
        }
    }

    /// 解析文件名 (不含目录).
    ///
    /// 扩展名从第一个 `.` 开始. 最后一段不含 `-` 时视为后缀,
    /// 其余每段都必须形如 `key-value`, 否则返回 `None`.
    pub fn parse(file_name: &str) -> Option<Self> {
        let (parts, suffix, extension) = split_name(file_name)?;
        let entities = parts
            .into_iter()
            .map(parse_entity)
            .collect::<Option<Vec<_>>>()?;
        Some(Self::new(entities, suffix, extension))
    }

    /// 宽松解析. 不形如 `key-value` 的段被丢弃, 后缀和扩展名照常识别.
    ///
    /// 只在文件名为空或只有扩展名时返回 `None`.
    pub fn parse_lenient(file_name: &str) -> Option<Self> {
        let (parts, suffix, extension) = split_name(file_name)?;
        let entities = parts.into_iter().filter_map(parse_entity).collect();
        Some(Self::new(entities, suffix, extension))
    }

    /// 解析路径的文件名部分.
    pub fn from_path(path: &Path) -> Option<Self> {
        path.file_name()?.to_str().and_then(Self::parse)
    }

    /// 实体值.
    pub fn entity(&self, key: &str) -> Option<&str> {
        self.entities
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// 全部实体, 保持文件名中的顺序.
    #[inline]
    pub fn entities(&self) -> &[(String, String)] {
        &self.entities
    }

    /// 后缀, 如 `T1map`, `dseg`. 可以为空.
    #[inline]
    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    /// 扩展名, 带前导 `.`.
    #[inline]
    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// 是否是 nifti 文件 (`.nii` 或 `.nii.gz`).
    #[inline]
    pub fn is_nifti(&self) -> bool {
        matches!(self.extension.as_str(), ".nii" | ".nii.gz")
    }

    /// 设置实体. 已存在时原位替换, 否则追加到末尾.
    pub fn with_entity<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        let (key, value) = (key.into(), value.into());
        match self.entities.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.entities.push((key, value)),
        }
        self
    }

    /// 设置后缀.
    pub fn with_suffix<S: Into<String>>(mut self, suffix: S) -> Self {
        self.suffix = suffix.into();
        self
    }

    /// 设置扩展名. `extension` 需带前导 `.`.
    pub fn with_extension<S: Into<String>>(mut self, extension: S) -> Self {
        self.extension = extension.into();
        self
    }
}

/// 拆成 (实体段, 后缀, 扩展名).
fn split_name(file_name: &str) -> Option<(Vec<&str>, &str, &str)> {
    let (stem, extension) = match file_name.find('.') {
        Some(i) => file_name.split_at(i),
        None => (file_name, ""),
    };
    if stem.is_empty() {
        return None;
    }
    let mut parts: Vec<&str> = stem.split('_').collect();
    let suffix = match parts.last() {
        Some(last) if !last.contains('-') => parts.pop().unwrap_or_default(),
        _ => "",
    };
    Some((parts, suffix, extension))
}

#[inline]
fn parse_entity(part: &str) -> Option<(String, String)> {
    let (k, v) = part.split_once('-')?;
    (!k.is_empty() && !v.is_empty()).then(|| (k.to_string(), v.to_string()))
}

impl fmt::Display for BidsName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut sep = "";
        for (k, v) in self.entities.iter() {
            write!(f, "{sep}{k}-{v}")?;
            sep = "_";
        }
        if !self.suffix.is_empty() {
            write!(f, "{sep}{}", self.suffix)?;
        }
        f.write_str(&self.extension)
    }
}
