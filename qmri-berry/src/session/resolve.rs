//! 会话输入定位.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::{debug, warn};

use super::{BidsName, MapKind, Modality, SessionAssets, SessionId};
use crate::consts::FALLBACK_SEQUENCE_TAG;
use crate::dataset::StudyLayout;
use crate::error::ResolutionError;

/// 目录下可以解析为 BIDS 文件名的所有文件, 按路径排序.
///
/// 不规范的文件名按宽松方式解析, 仍可按后缀匹配. 目录不存在时返回空表.
fn list_bids(dir: &Path) -> Result<Vec<(PathBuf, BidsName)>, ResolutionError> {
    let entries = match fs::read_dir(dir) {
        Ok(it) => it,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => {
            return Err(ResolutionError::Io {
                dir: dir.to_owned(),
                source,
            })
        }
    };
    let mut ans = Vec::new();
    for entry in entries {
        let path = entry
            .map_err(|source| ResolutionError::Io {
                dir: dir.to_owned(),
                source,
            })?
            .path();
        let Some(file_name) = path.file_name().and_then(|s| s.to_str()) else {
            debug!("skipping `{}`: file name is not UTF-8", path.display());
            continue;
        };
        if let Some(name) = BidsName::parse(file_name) {
            ans.push((path, name));
        } else if let Some(name) = BidsName::parse_lenient(file_name) {
            debug!(
                "`{}` is not a well-formed BIDS name, matching it by suffix `{}`",
                path.display(),
                name.suffix()
            );
            ans.push((path, name));
        } else {
            debug!("skipping `{}`: not a BIDS file name", path.display());
        }
    }
    ans.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(ans)
}

/// 后缀为 `suffix` 的 nifti 文件.
fn nifti_with_suffix<'a>(
    files: &'a [(PathBuf, BidsName)],
    suffix: &'a str,
) -> impl Iterator<Item = &'a (PathBuf, BidsName)> + 'a {
    files
        .iter()
        .filter(move |(_, n)| n.is_nifti() && n.suffix() == suffix)
}

/// 多个候选时取排序后的第一个并给出警告.
fn first_of<'a>(
    mut found: Vec<&'a (PathBuf, BidsName)>,
    what: &str,
    session: &SessionId,
) -> Option<&'a (PathBuf, BidsName)> {
    if found.len() > 1 {
        warn!(
            "{session}: {} candidates for {what}, using `{}`",
            found.len(),
            found[0].0.display()
        );
    }
    (!found.is_empty()).then(|| found.swap_remove(0))
}

/// 定位并校验一个会话的全部输入.
///
/// 1. 在分割根目录中优先寻找 `space-T2w` 的 aseg 分割, 其次 `space-T1w`.
///   找到的空间即解剖参考模态.
/// 2. 分割同目录下必须存在 `desc-brain_mask` 掩膜.
/// 3. BIDS 根目录中该模态的参考图像必须恰好一个.
/// 4. 定量根目录中合成 T1w 和 T2w 必须恰好各一个.
/// 5. 至少存在一个 `T1map`/`T2map`/`PDmap`.
/// 6. 序列标签取自定量图文件名中的 `sequence_key` 实体 (PD 优先, 其次 T2, T1),
///   缺失时为 `quant`.
pub fn resolve(
    layout: &StudyLayout,
    session: &SessionId,
    sequence_key: &str,
) -> Result<SessionAssets, ResolutionError> {
    // 1. 分割
    let seg_dir = session.anat_dir(&layout.segmentation_root);
    let seg_files = list_bids(&seg_dir)?;
    let (modality, (segmentation, seg_name)) = Modality::PREFERENCE
        .into_iter()
        .find_map(|m| {
            let found: Vec<_> = nifti_with_suffix(&seg_files, "dseg")
                .filter(|(_, n)| {
                    n.entity("desc") == Some("aseg") && n.entity("space") == Some(m.as_str())
                })
                .collect();
            first_of(found, "segmentation", session).map(|f| (m, f.clone()))
        })
        .ok_or_else(|| ResolutionError::NoSegmentationFound {
            dir: seg_dir.clone(),
        })?;
    debug!("{session}: segmentation `{}`", segmentation.display());

    // 2. 掩膜
    let mask_name = seg_name.with_entity("desc", "brain").with_suffix("mask");
    let mask = seg_dir.join(mask_name.to_string());
    if !mask.is_file() {
        return Err(ResolutionError::MissingMask { expected: mask });
    }

    // 3. 解剖参考
    let bids_dir = session.anat_dir(&layout.bids_root);
    let bids_files = list_bids(&bids_dir)?;
    let refs: Vec<PathBuf> = nifti_with_suffix(&bids_files, modality.as_str())
        .map(|(p, _)| p.clone())
        .collect();
    let [reference] = <[PathBuf; 1]>::try_from(refs).map_err(|found| {
        ResolutionError::AmbiguousOrMissingReference {
            modality,
            dir: bids_dir.clone(),
            found,
        }
    })?;

    // 4. 合成加权图像
    let qmri_dir = session.anat_dir(&layout.qmri_root);
    let qmri_files = list_bids(&qmri_dir)?;
    let t1w: Vec<_> = nifti_with_suffix(&qmri_files, "T1w").collect();
    let t2w: Vec<_> = nifti_with_suffix(&qmri_files, "T2w").collect();
    let (synthetic_t1w, synthetic_t2w) = match (t1w.as_slice(), t2w.as_slice()) {
        ([a], [b]) => (a.0.clone(), b.0.clone()),
        _ => {
            return Err(ResolutionError::AmbiguousOrMissingSyntheticWeighted {
                dir: qmri_dir,
                t1w: t1w.len(),
                t2w: t2w.len(),
            })
        }
    };

    // 5. 定量图
    let mut maps = BTreeMap::new();
    let mut names = BTreeMap::new();
    for kind in MapKind::ALL {
        let found: Vec<_> = nifti_with_suffix(&qmri_files, kind.suffix()).collect();
        if let Some((path, name)) = first_of(found, kind.suffix(), session) {
            maps.insert(kind, path.clone());
            names.insert(kind, name);
        }
    }

    // 6. 序列标签
    let Some((_, example)) = names.iter().next_back() else {
        return Err(ResolutionError::NoQuantitativeMapsFound { dir: qmri_dir });
    };
    let sequence_tag = example
        .entity(sequence_key)
        .unwrap_or(FALLBACK_SEQUENCE_TAG)
        .to_string();

    Ok(SessionAssets {
        session: session.clone(),
        modality,
        segmentation,
        mask,
        reference,
        synthetic_t1w,
        synthetic_t2w,
        maps,
        sequence_tag,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{create_dir_all, File};

    /// 在临时目录里搭建一个会话的数据集骨架.
    struct Fixture {
        _dir: tempfile::TempDir,
        layout: StudyLayout,
        session: SessionId,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let layout = StudyLayout::new(
                dir.path().join("bids"),
                dir.path().join("bibsnet"),
                dir.path().join("qmri"),
                dir.path().join("out"),
            );
            Self {
                _dir: dir,
                layout,
                session: SessionId::new("sub-01", "ses-A"),
            }
        }

        fn touch(&self, root: &Path, name: &str) {
            let dir = self.session.anat_dir(root);
            create_dir_all(&dir).unwrap();
            File::create(dir.join(name)).unwrap();
        }

        fn seg(&self, name: &str) {
            self.touch(&self.layout.segmentation_root.clone(), name)
        }

        fn bids(&self, name: &str) {
            self.touch(&self.layout.bids_root.clone(), name)
        }

        fn qmri(&self, name: &str) {
            self.touch(&self.layout.qmri_root.clone(), name)
        }

        fn complete(&self) {
            self.seg("sub-01_ses-A_space-T1w_desc-aseg_dseg.nii.gz");
            self.seg("sub-01_ses-A_space-T1w_desc-brain_mask.nii.gz");
            self.seg("sub-01_ses-A_space-T2w_desc-aseg_dseg.nii.gz");
            self.seg("sub-01_ses-A_space-T2w_desc-brain_mask.nii.gz");
            self.bids("sub-01_ses-A_run-1_T1w.nii.gz");
            self.bids("sub-01_ses-A_run-1_T2w.nii.gz");
            self.bids("sub-01_ses-A_run-1_T2w.json");
            self.qmri("sub-01_ses-A_acq-QALAS_T1w.nii.gz");
            self.qmri("sub-01_ses-A_acq-QALAS_T2w.nii.gz");
            self.qmri("sub-01_ses-A_acq-QALAS_T1map.nii.gz");
            self.qmri("sub-01_ses-A_acq-QALAS_T2map.nii.gz");
        }

        fn resolve(&self) -> Result<SessionAssets, ResolutionError> {
            resolve(&self.layout, &self.session, "acq")
        }
    }

    #[test]
    fn test_t2w_preferred_when_both_exist() {
        let f = Fixture::new();
        f.complete();
        let a = f.resolve().unwrap();
        assert_eq!(a.modality, Modality::T2w);
        assert!(a
            .segmentation
            .ends_with("sub-01_ses-A_space-T2w_desc-aseg_dseg.nii.gz"));
        assert!(a.mask.ends_with("sub-01_ses-A_space-T2w_desc-brain_mask.nii.gz"));
        assert!(a.reference.ends_with("sub-01_ses-A_run-1_T2w.nii.gz"));
        assert_eq!(a.synthetic_for_modality(), a.synthetic_t2w.as_path());
        assert_eq!(a.maps.keys().copied().collect::<Vec<_>>(), [MapKind::T1, MapKind::T2]);
        assert_eq!(a.sequence_tag, "QALAS");
    }

    #[test]
    fn test_malformed_reference_name_matched_by_suffix() {
        let f = Fixture::new();
        f.seg("sub-01_ses-A_space-T2w_desc-aseg_dseg.nii.gz");
        f.seg("sub-01_ses-A_space-T2w_desc-brain_mask.nii.gz");
        f.bids("sub-01_ses-A_run1_T2w.nii.gz");
        f.qmri("sub-01_ses-A_acq-QALAS_T1w.nii.gz");
        f.qmri("sub-01_ses-A_acq-QALAS_T2w.nii.gz");
        f.qmri("sub-01_ses-A_acq-QALAS_T1map.nii.gz");
        let a = f.resolve().unwrap();
        assert!(a.reference.ends_with("sub-01_ses-A_run1_T2w.nii.gz"));
    }

    #[test]
    fn test_t1w_fallback() {
        let f = Fixture::new();
        f.seg("sub-01_ses-A_space-T1w_desc-aseg_dseg.nii.gz");
        f.seg("sub-01_ses-A_space-T1w_desc-brain_mask.nii.gz");
        f.bids("sub-01_ses-A_T1w.nii.gz");
        f.qmri("sub-01_ses-A_T1w.nii.gz");
        f.qmri("sub-01_ses-A_T2w.nii.gz");
        f.qmri("sub-01_ses-A_PDmap.nii.gz");
        let a = f.resolve().unwrap();
        assert_eq!(a.modality, Modality::T1w);
        assert_eq!(a.synthetic_for_modality(), a.synthetic_t1w.as_path());
        // 缺少 acq 实体.
        assert_eq!(a.sequence_tag, "quant");
    }

    #[test]
    fn test_missing_segmentation() {
        let f = Fixture::new();
        let e = f.resolve().unwrap_err();
        assert!(matches!(e, ResolutionError::NoSegmentationFound { .. }));
    }

    #[test]
    fn test_missing_mask_names_expected_path() {
        let f = Fixture::new();
        f.seg("sub-01_ses-A_space-T2w_desc-aseg_dseg.nii.gz");
        match f.resolve().unwrap_err() {
            ResolutionError::MissingMask { expected } => {
                assert!(expected.ends_with("sub-01_ses-A_space-T2w_desc-brain_mask.nii.gz"))
            }
            e => panic!("unexpected error {e}"),
        }
    }

    #[test]
    fn test_ambiguous_reference() {
        let f = Fixture::new();
        f.complete();
        f.bids("sub-01_ses-A_run-2_T2w.nii.gz");
        match f.resolve().unwrap_err() {
            ResolutionError::AmbiguousOrMissingReference {
                modality, found, ..
            } => {
                assert_eq!(modality, Modality::T2w);
                assert_eq!(found.len(), 2);
            }
            e => panic!("unexpected error {e}"),
        }
    }

    #[test]
    fn test_synthetic_weighted_must_be_unique() {
        let f = Fixture::new();
        f.complete();
        f.qmri("sub-01_ses-A_acq-other_T1w.nii.gz");
        assert!(matches!(
            f.resolve().unwrap_err(),
            ResolutionError::AmbiguousOrMissingSyntheticWeighted { t1w: 2, t2w: 1, .. }
        ));
    }

    #[test]
    fn test_no_maps() {
        let f = Fixture::new();
        f.seg("sub-01_ses-A_space-T2w_desc-aseg_dseg.nii.gz");
        f.seg("sub-01_ses-A_space-T2w_desc-brain_mask.nii.gz");
        f.bids("sub-01_ses-A_T2w.nii.gz");
        f.qmri("sub-01_ses-A_T1w.nii.gz");
        f.qmri("sub-01_ses-A_T2w.nii.gz");
        assert!(matches!(
            f.resolve().unwrap_err(),
            ResolutionError::NoQuantitativeMapsFound { .. }
        ));
    }

    #[test]
    fn test_sequence_tag_prefers_pd_map_name() {
        let f = Fixture::new();
        f.complete();
        f.qmri("sub-01_ses-A_acq-PDSEQ_PDmap.nii.gz");
        let a = f.resolve().unwrap();
        assert_eq!(a.sequence_tag, "PDSEQ");
        assert_eq!(a.maps.len(), 3);
    }
}
