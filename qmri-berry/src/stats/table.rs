use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use itertools::Itertools;

use super::Summary;
use crate::error::StatsError;
use crate::session::MapKind;

/// 统计表中的一行.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionRow {
    /// 区域名或分组名.
    pub name: String,
    /// 每种定量图的统计量, 顺序与表的 `kinds` 一致.
    pub summaries: Vec<Summary>,
}

/// 脑区统计表.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionStatisticsTable {
    kinds: Vec<MapKind>,
    rows: Vec<RegionRow>,
}

/// 每种定量图对应的列名后缀.
const COLUMN_SUFFIXES: [&str; 5] = ["Mean", "Median", "1-percentile", "99-percentile", "Std"];

impl RegionStatisticsTable {
    /// 空表. `kinds` 为列中出现的定量图种类, 按 T1, T2, PD 顺序.
    pub fn new(kinds: Vec<MapKind>) -> Self {
        Self {
            kinds,
            rows: Vec::new(),
        }
    }

    /// 追加一行.
    pub(crate) fn push(&mut self, row: RegionRow) {
        debug_assert_eq!(row.summaries.len(), self.kinds.len());
        self.rows.push(row);
    }

    /// 列中出现的定量图种类.
    #[inline]
    pub fn kinds(&self) -> &[MapKind] {
        &self.kinds
    }

    /// 全部行.
    #[inline]
    pub fn rows(&self) -> &[RegionRow] {
        &self.rows
    }

    /// 行数.
    #[inline]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// 是否没有任何行.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// 按名称查找行.
    pub fn row(&self, name: &str) -> Option<&RegionRow> {
        self.rows.iter().find(|r| r.name == name)
    }

    /// 表头: `Region_Name`, 然后每种定量图 5 列.
    pub fn header(&self) -> Vec<String> {
        let mut ans = vec!["Region_Name".to_string()];
        for kind in self.kinds.iter() {
            ans.extend(COLUMN_SUFFIXES.iter().map(|s| format!("{kind}_{s}")));
        }
        ans
    }

    /// 以制表符分隔写出.
    pub fn write_tsv<W: Write>(&self, mut w: W) -> io::Result<()> {
        writeln!(w, "{}", self.header().iter().join("\t"))?;
        for row in self.rows.iter() {
            let values = row
                .summaries
                .iter()
                .flat_map(|s| [s.mean, s.median, s.p1, s.p99, s.std])
                .join("\t");
            writeln!(w, "{}\t{}", row.name, values)?;
        }
        Ok(())
    }

    /// 写出到 `path`.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), StatsError> {
        let path = path.as_ref();
        let io_err = |source| StatsError::Io {
            path: path.to_owned(),
            source,
        };
        let mut w = BufWriter::new(File::create(path).map_err(io_err)?);
        self.write_tsv(&mut w).map_err(io_err)?;
        w.flush().map_err(io_err)
    }
}
