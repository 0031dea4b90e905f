use std::collections::BTreeMap;

use itertools::Itertools;
use log::warn;

use super::{summarize, RegionGrouping, RegionRow, RegionStatisticsTable, Summary};
use crate::catalog::LabelCatalog;
use crate::consts::label;
use crate::error::StatsError;
use crate::session::MapKind;
use crate::{LabelVolume, NiftiHeaderAttr, ScalarVolume};

/// 按标签归集的定量图体素值. 每个会话构建一次, 供标准表和所有自定义表共用.
#[derive(Debug, Clone, Default)]
pub struct LabelValueIndex {
    kinds: Vec<MapKind>,
    /// 标签 -> 每种定量图的体素值 (顺序同 `kinds`).
    values: BTreeMap<u32, Vec<Vec<f64>>>,
}

impl LabelValueIndex {
    /// 遍历一次分割, 按标签收集每种定量图的体素值. 背景不收集.
    ///
    /// 所有定量图必须与分割同形状.
    pub fn build(
        segmentation: &LabelVolume,
        maps: &BTreeMap<MapKind, ScalarVolume>,
    ) -> Result<Self, StatsError> {
        let expected = segmentation.shape();
        for (&kind, map) in maps.iter() {
            if map.shape() != expected {
                return Err(StatsError::ShapeMismatch {
                    kind,
                    expected,
                    actual: map.shape(),
                });
            }
        }
        let kinds: Vec<MapKind> = maps.keys().copied().collect();
        let views: Vec<_> = maps.values().map(|m| m.data()).collect();
        let mut values: BTreeMap<u32, Vec<Vec<f64>>> = BTreeMap::new();
        for (pos, &l) in segmentation.data().indexed_iter() {
            if label::is_background(l) {
                continue;
            }
            let slot = values
                .entry(l)
                .or_insert_with(|| vec![Vec::new(); kinds.len()]);
            for (col, view) in slot.iter_mut().zip(views.iter()) {
                col.push(view[pos] as f64);
            }
        }
        Ok(Self { kinds, values })
    }

    /// 定量图种类, 按 T1, T2, PD 顺序.
    #[inline]
    pub fn kinds(&self) -> &[MapKind] {
        &self.kinds
    }

    /// 出现过的非背景标签, 升序.
    pub fn labels(&self) -> impl Iterator<Item = u32> + '_ {
        self.values.keys().copied()
    }

    /// 标签的体素个数.
    pub fn voxel_count(&self, label: u32) -> usize {
        self.values
            .get(&label)
            .and_then(|cols| cols.first())
            .map_or(0, Vec::len)
    }

    /// 合并 `labels` 的全部体素后计算每种定量图的统计量.
    ///
    /// 每个体素只计一次, 重复的标签不会重复合并.
    /// 这些标签在分割中都不存在时返回 `None`.
    pub fn summarize(&self, labels: &[u32]) -> Option<Vec<Summary>> {
        let present: Vec<&Vec<Vec<f64>>> = labels
            .iter()
            .unique()
            .filter_map(|l| self.values.get(l))
            .collect();
        if present.is_empty() {
            return None;
        }
        (0..self.kinds.len())
            .map(|k| {
                if let [only] = present.as_slice() {
                    return summarize(&only[k]);
                }
                let pooled: Vec<f64> = present.iter().flat_map(|cols| cols[k].iter().copied()).collect();
                summarize(&pooled)
            })
            .collect()
    }

    /// 标准统计表: 每个出现过的非背景标签一行, 按编号升序.
    ///
    /// 任一标签不在查找表中都会返回 [`CatalogError::UnknownLabel`](crate::error::CatalogError::UnknownLabel).
    pub fn standard_table(
        &self,
        catalog: &LabelCatalog,
    ) -> Result<RegionStatisticsTable, StatsError> {
        let mut table = RegionStatisticsTable::new(self.kinds.clone());
        for l in self.labels() {
            let name = catalog.require_name(l)?;
            // 出现过的标签至少有一个体素.
            if let Some(summaries) = self.summarize(&[l]) {
                table.push(RegionRow {
                    name: name.to_string(),
                    summaries,
                });
            }
        }
        Ok(table)
    }

    /// 自定义分组统计表: 每个分组一行, 按分组文件顺序.
    ///
    /// 整个分组文件先完成解析, 失败时不产生任何行. 解析成功但不含任何体素的分组
    /// 给出警告并跳过.
    pub fn custom_table(
        &self,
        catalog: &LabelCatalog,
        grouping: &RegionGrouping,
    ) -> Result<RegionStatisticsTable, StatsError> {
        let groups = grouping.resolve(catalog)?;
        let mut table = RegionStatisticsTable::new(self.kinds.clone());
        for g in groups {
            match self.summarize(&g.labels) {
                Some(summaries) => table.push(RegionRow {
                    name: g.name,
                    summaries,
                }),
                None => warn!(
                    "group `{}` of `{}` has no voxels in the segmentation, skipped",
                    g.name,
                    grouping.name()
                ),
            }
        }
        Ok(table)
    }
}

/// 计算标准统计表.
pub fn aggregate(
    segmentation: &LabelVolume,
    catalog: &LabelCatalog,
    maps: &BTreeMap<MapKind, ScalarVolume>,
) -> Result<RegionStatisticsTable, StatsError> {
    LabelValueIndex::build(segmentation, maps)?.standard_table(catalog)
}

/// 计算自定义分组统计表.
pub fn aggregate_custom(
    segmentation: &LabelVolume,
    catalog: &LabelCatalog,
    grouping: &RegionGrouping,
    maps: &BTreeMap<MapKind, ScalarVolume>,
) -> Result<RegionStatisticsTable, StatsError> {
    LabelValueIndex::build(segmentation, maps)?.custom_table(catalog, grouping)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Affine;
    use crate::error::CatalogError;
    use ndarray::Array3;

    /// 标签 {0, 2, 41, 3, 42} 各占一个 z 切片, T1 值为 `标签 * 10 + w`.
    fn scenario() -> (LabelVolume, BTreeMap<MapKind, ScalarVolume>) {
        let order = [0u32, 2, 41, 3, 42];
        let seg = Array3::from_shape_fn((5, 3, 4), |(z, _, _)| order[z]);
        let t1 = Array3::from_shape_fn((5, 3, 4), |(z, _, w)| (order[z] * 10 + w as u32) as f32);
        let seg = LabelVolume::with_affine(seg, &Affine::IDENTITY);
        let t1 = seg.like(t1);
        (seg, BTreeMap::from([(MapKind::T1, t1)]))
    }

    #[test]
    fn test_standard_table_rows_and_columns() {
        let (seg, maps) = scenario();
        let t = aggregate(&seg, LabelCatalog::builtin(), &maps).unwrap();
        assert_eq!(t.len(), 4);
        let names: Vec<_> = t.rows().iter().map(|r| r.name.as_str()).collect();
        assert_eq!(
            names,
            [
                "Left-Cerebral-White-Matter",
                "Left-Cerebral-Cortex",
                "Right-Cerebral-White-Matter",
                "Right-Cerebral-Cortex"
            ]
        );
        assert_eq!(t.header().len(), 6);
        assert!(t.header()[1..].iter().all(|c| c.starts_with("T1_")));

        let row = t.row("Left-Cerebral-White-Matter").unwrap();
        let s = row.summaries[0];
        assert!((s.mean - 21.5).abs() < 1e-9);
        assert!((s.median - 21.5).abs() < 1e-9);
        assert!(s.std >= 0.0);
        assert!(s.p1 <= s.p99);
        assert!(s.p1 >= 20.0 && s.p99 <= 23.0);
    }

    #[test]
    fn test_white_matter_group() {
        let (seg, maps) = scenario();
        let g = RegionGrouping::new(
            "tissue",
            vec![(
                "WhiteMatter".into(),
                vec![
                    "Left-Cerebral-White-Matter".into(),
                    "Right-Cerebral-White-Matter".into(),
                ],
            )],
        );
        let t = aggregate_custom(&seg, LabelCatalog::builtin(), &g, &maps).unwrap();
        assert_eq!(t.len(), 1);
        let s = t.rows()[0].summaries[0];
        // 20..=23 和 410..=413.
        assert!((s.mean - (21.5 + 411.5) / 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_single_region_group_matches_standard_row() {
        let (seg, maps) = scenario();
        let index = LabelValueIndex::build(&seg, &maps).unwrap();
        let c = LabelCatalog::builtin();
        let standard = index.standard_table(c).unwrap();
        let g = RegionGrouping::new(
            "one",
            vec![("Only".into(), vec!["Right-Cerebral-Cortex".into()])],
        );
        let custom = index.custom_table(c, &g).unwrap();
        assert_eq!(
            custom.rows()[0].summaries,
            standard.row("Right-Cerebral-Cortex").unwrap().summaries
        );
    }

    #[test]
    fn test_repeated_region_counts_each_voxel_once() {
        let seg = Array3::from_shape_fn((1, 1, 4), |_| 42u32);
        let seg = LabelVolume::with_affine(seg, &Affine::IDENTITY);
        let t1 = seg.like(Array3::from_shape_fn((1, 1, 4), |(_, _, w)| w as f32));
        let maps = BTreeMap::from([(MapKind::T1, t1)]);
        let index = LabelValueIndex::build(&seg, &maps).unwrap();
        let c = LabelCatalog::builtin();
        let standard = index.standard_table(c).unwrap();
        let g = RegionGrouping::new(
            "dup",
            vec![(
                "Twice".into(),
                vec!["Right-Cerebral-Cortex".into(), "Right-Cerebral-Cortex".into()],
            )],
        );
        let custom = index.custom_table(c, &g).unwrap();
        let expected = standard.row("Right-Cerebral-Cortex").unwrap().summaries.clone();
        assert_eq!(custom.rows()[0].summaries, expected);
        assert!((expected[0].p1 - 0.03).abs() < 1e-9);
        assert!((expected[0].p99 - 2.97).abs() < 1e-9);
        assert_eq!(index.summarize(&[42, 42]).unwrap(), expected);
    }

    #[test]
    fn test_empty_group_skipped_others_kept() {
        let (seg, maps) = scenario();
        let g = RegionGrouping::new(
            "mixed",
            vec![
                ("Thalamus".into(), vec!["Left-Thalamus".into()]),
                ("Cortex".into(), vec!["Left-Cerebral-Cortex".into()]),
            ],
        );
        let t = aggregate_custom(&seg, LabelCatalog::builtin(), &g, &maps).unwrap();
        assert_eq!(t.len(), 1);
        assert_eq!(t.rows()[0].name, "Cortex");
    }

    #[test]
    fn test_unknown_label_is_fatal() {
        let seg = LabelVolume::with_affine(Array3::from_elem((1, 1, 2), 9999), &Affine::IDENTITY);
        let maps = BTreeMap::from([(MapKind::T2, seg.map(|_| 1.0f32))]);
        let e = aggregate(&seg, LabelCatalog::builtin(), &maps).unwrap_err();
        assert!(matches!(e, StatsError::Catalog(CatalogError::UnknownLabel(9999))));
    }

    #[test]
    fn test_shape_mismatch() {
        let (seg, _) = scenario();
        let other = ScalarVolume::with_affine(Array3::zeros((2, 2, 2)), &Affine::IDENTITY);
        let maps = BTreeMap::from([(MapKind::PD, other)]);
        assert!(matches!(
            LabelValueIndex::build(&seg, &maps),
            Err(StatsError::ShapeMismatch { kind: MapKind::PD, .. })
        ));
    }

    #[test]
    fn test_multiple_maps_keep_column_order() {
        let (seg, mut maps) = scenario();
        maps.insert(MapKind::PD, seg.map(|&l| l as f32 / 100.0));
        let index = LabelValueIndex::build(&seg, &maps).unwrap();
        assert_eq!(index.kinds(), [MapKind::T1, MapKind::PD]);
        assert_eq!(index.voxel_count(41), 12);
        assert_eq!(index.voxel_count(0), 0);
        let s = index.summarize(&[41]).unwrap();
        assert!((s[1].mean - 0.41).abs() < 1e-6);
    }
}
