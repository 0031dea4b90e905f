//! 自定义脑区分组.
//!
//! 分组文件是一个 JSON 对象, 键为分组名, 值为区域名列表:
//!
//! ```json
//! {"WhiteMatter": ["Left-Cerebral-White-Matter", "Right-Cerebral-White-Matter"]}
//! ```
//!
//! 分组顺序即统计表的行顺序.

use std::fs;
use std::path::Path;

use itertools::Itertools;
use serde_json::{Map, Value};

use crate::catalog::LabelCatalog;
use crate::error::CatalogError;

/// 解析到区域编号后的分组.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionGroup {
    /// 分组名.
    pub name: String,
    /// 区域编号, 与分组文件中的顺序一致. 重复的区域只保留第一次出现.
    pub labels: Vec<u32>,
}

/// 一个分组文件.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionGrouping {
    name: String,
    groups: Vec<(String, Vec<String>)>,
    raw: Value,
}

impl RegionGrouping {
    /// 由内存中的分组构建. `name` 用于输出文件名.
    pub fn new<S: Into<String>>(name: S, groups: Vec<(String, Vec<String>)>) -> Self {
        let raw = Value::Object(
            groups
                .iter()
                .map(|(g, regions)| {
                    let list = regions.iter().cloned().map(Value::String).collect();
                    (g.clone(), Value::Array(list))
                })
                .collect::<Map<_, _>>(),
        );
        Self {
            name: name.into(),
            groups,
            raw,
        }
    }

    /// 加载分组文件. 文件名主干 (去掉 `.json`) 作为分组名.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, CatalogError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| CatalogError::GroupingIo {
            path: path.to_owned(),
            source,
        })?;
        let malformed = |source| CatalogError::MalformedGrouping {
            path: path.to_owned(),
            source,
        };
        let raw: Map<String, Value> = serde_json::from_str(&text).map_err(malformed)?;
        let groups = raw
            .iter()
            .map(|(g, v)| {
                serde_json::from_value::<Vec<String>>(v.clone()).map(|regions| (g.clone(), regions))
            })
            .collect::<Result<Vec<_>, _>>()
            .map_err(malformed)?;
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Self {
            name,
            groups,
            raw: Value::Object(raw),
        })
    }

    /// 分组名 (文件名主干).
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// 全部分组, 保持文件顺序.
    #[inline]
    pub fn groups(&self) -> &[(String, Vec<String>)] {
        &self.groups
    }

    /// 文件原文, 嵌入元信息时使用.
    #[inline]
    pub fn raw(&self) -> &Value {
        &self.raw
    }

    /// 把每个分组的区域名解析为编号.
    ///
    /// 任何未知区域名或空分组都会使整个分组文件失败, 因此调用方可以在
    /// 写出任何文件之前完成校验.
    pub fn resolve(&self, catalog: &LabelCatalog) -> Result<Vec<RegionGroup>, CatalogError> {
        self.groups
            .iter()
            .map(|(g, regions)| {
                if regions.is_empty() {
                    return Err(CatalogError::EmptyGroup(g.clone()));
                }
                let labels = regions
                    .iter()
                    .map(|r| {
                        catalog
                            .number_of(r)
                            .ok_or_else(|| CatalogError::UnknownRegionName {
                                group: g.clone(),
                                region: r.clone(),
                            })
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                let labels: Vec<u32> = labels.into_iter().unique().collect();
                Ok(RegionGroup {
                    name: g.clone(),
                    labels,
                })
            })
            .collect()
    }
}
