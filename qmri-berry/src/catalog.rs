//! 分割标签查找表.
//!
//! 采用 FreeSurfer 颜色查找表格式: 每行第一列为区域编号, 第二列为区域名,
//! 其余列 (颜色) 忽略. 空行, `#` 注释行, 首列不是非负整数的行 (表头) 都被跳过.
//!
//! crate 内置一份 aseg 标签子集, 见 [`LabelCatalog::builtin`].

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;

use once_cell::sync::Lazy;

use crate::error::CatalogError;

/// 内置 aseg 查找表原文.
const ASEG_LUT: &str = include_str!("../assets/aseg_lut.txt");

static BUILTIN: Lazy<LabelCatalog> = Lazy::new(|| {
    // 内置表在测试中被完整解析过, 不会生成 `Err`, 可直接 unwrap.
    LabelCatalog::parse(ASEG_LUT).unwrap()
});

/// 区域编号与区域名的双向查找表. 只读, 可在多个会话之间共享.
#[derive(Debug, Clone, Default)]
pub struct LabelCatalog {
    by_number: BTreeMap<u32, String>,
    by_name: HashMap<String, u32>,
}

impl LabelCatalog {
    /// 解析查找表文本.
    ///
    /// 同一编号出现两次时返回 `Err`. 同名的不同编号以先出现者为准.
    pub fn parse(text: &str) -> Result<Self, CatalogError> {
        let mut ans = Self::default();
        for (i, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut tokens = line.split_whitespace();
            let Some(number) = tokens.next().and_then(|t| t.parse::<u32>().ok()) else {
                continue;
            };
            let Some(name) = tokens.next() else {
                return Err(CatalogError::MalformedLine {
                    line: i + 1,
                    content: line.to_string(),
                });
            };
            ans.insert(number, name)?;
        }
        Ok(ans)
    }

    /// 从文件加载查找表.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, CatalogError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| CatalogError::Io {
            path: path.to_owned(),
            source,
        })?;
        Self::parse(&text)
    }

    /// 内置 aseg 查找表.
    #[inline]
    pub fn builtin() -> &'static LabelCatalog {
        &BUILTIN
    }

    fn insert(&mut self, number: u32, name: &str) -> Result<(), CatalogError> {
        if let Some(first) = self.by_number.get(&number) {
            return Err(CatalogError::DuplicateRegion {
                number,
                first: first.clone(),
                second: name.to_string(),
            });
        }
        self.by_number.insert(number, name.to_string());
        self.by_name.entry(name.to_string()).or_insert(number);
        Ok(())
    }

    /// 编号对应的区域名.
    #[inline]
    pub fn name_of(&self, number: u32) -> Option<&str> {
        self.by_number.get(&number).map(String::as_str)
    }

    /// 区域名对应的编号.
    #[inline]
    pub fn number_of(&self, name: &str) -> Option<u32> {
        self.by_name.get(name).copied()
    }

    /// 编号对应的区域名, 不存在时返回 [`CatalogError::UnknownLabel`].
    pub fn require_name(&self, number: u32) -> Result<&str, CatalogError> {
        self.name_of(number)
            .ok_or(CatalogError::UnknownLabel(number))
    }

    /// 条目数.
    #[inline]
    pub fn len(&self) -> usize {
        self.by_number.len()
    }

    /// 是否为空表.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.by_number.is_empty()
    }

    /// 按编号升序迭代 `(编号, 区域名)`.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &str)> {
        self.by_number.iter().map(|(n, s)| (*n, s.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_skips_headers_and_comments() {
        let text = "\
#$Id: FreeSurferColorLUT.txt
No. Label Name: R G B A

  0   Unknown        0 0 0 0
# comment
  2   Left-Cerebral-White-Matter 245 245 245 0
 -1   Negative 0 0 0 0
 41   Right-Cerebral-White-Matter 245 245 245 0
";
        let c = LabelCatalog::parse(text).unwrap();
        assert_eq!(c.len(), 3);
        assert_eq!(c.name_of(2), Some("Left-Cerebral-White-Matter"));
        assert_eq!(c.number_of("Right-Cerebral-White-Matter"), Some(41));
        assert_eq!(c.name_of(0), Some("Unknown"));
        assert_eq!(c.number_of("Negative"), None);
        assert_eq!(
            c.iter().map(|(n, _)| n).collect::<Vec<_>>(),
            vec![0, 2, 41]
        );
    }

    #[test]
    fn test_duplicate_number_is_rejected() {
        let err = LabelCatalog::parse("3 A 0 0 0 0\n3 B 0 0 0 0\n").unwrap_err();
        assert!(matches!(
            err,
            CatalogError::DuplicateRegion { number: 3, .. }
        ));
    }

    #[test]
    fn test_number_without_name_is_rejected() {
        let err = LabelCatalog::parse("0 Unknown\n7\n").unwrap_err();
        assert!(matches!(err, CatalogError::MalformedLine { line: 2, .. }));
    }

    #[test]
    fn test_builtin_catalog() {
        let c = LabelCatalog::builtin();
        assert_eq!(c.name_of(0), Some("Unknown"));
        assert_eq!(c.name_of(2), Some("Left-Cerebral-White-Matter"));
        assert_eq!(c.name_of(3), Some("Left-Cerebral-Cortex"));
        assert_eq!(c.name_of(41), Some("Right-Cerebral-White-Matter"));
        assert_eq!(c.name_of(42), Some("Right-Cerebral-Cortex"));
        assert_eq!(c.number_of("CC_Anterior"), Some(255));
        assert!(matches!(
            c.require_name(1000),
            Err(CatalogError::UnknownLabel(1000))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lut.txt");
        std::fs::write(&path, "0 Unknown 0 0 0 0\n10 Left-Thalamus 0 0 0 0\n").unwrap();
        let c = LabelCatalog::load(&path).unwrap();
        assert_eq!(c.number_of("Left-Thalamus"), Some(10));

        let missing = LabelCatalog::load(dir.path().join("missing.txt"));
        assert!(matches!(missing, Err(CatalogError::Io { .. })));
    }
}
