//! 3D 形态学操作.
//!
//! 配准掩膜由分割工具给出的脑掩膜构建: 先只保留最大的 26-连通前景区域,
//! 再以固定体素半径做球形膨胀.

use std::collections::VecDeque;

use ndarray::Array3;

use crate::{Idx3d, MaskVolume, NiftiHeaderAttr};

mod distance;

pub use distance::squared_distance_transform;

/// 26-邻域偏移量 (不含自身).
const N26: [(isize, isize, isize); 26] = {
    let mut ans = [(0, 0, 0); 26];
    let mut i = 0;
    let mut dz = -1;
    while dz <= 1 {
        let mut dh = -1;
        while dh <= 1 {
            let mut dw = -1;
            while dw <= 1 {
                if !(dz == 0 && dh == 0 && dw == 0) {
                    ans[i] = (dz, dh, dw);
                    i += 1;
                }
                dw += 1;
            }
            dh += 1;
        }
        dz += 1;
    }
    ans
};

/// `pos + delta`, 越界时返回 `None`.
#[inline]
fn offset((z, h, w): Idx3d, (dz, dh, dw): (isize, isize, isize), shape: Idx3d) -> Option<Idx3d> {
    let z = z.checked_add_signed(dz).filter(|&v| v < shape.0)?;
    let h = h.checked_add_signed(dh).filter(|&v| v < shape.1)?;
    let w = w.checked_add_signed(dw).filter(|&v| v < shape.2)?;
    Some((z, h, w))
}

/// 按照 26-相邻规则给掩膜前景区域编号.
///
/// 返回 `(编号数组, 各区域体素数)`. 编号从 1 开始, 0 代表背景;
/// 区域按光栅扫描序中首次遇到的顺序编号.
pub fn label_components(mask: &MaskVolume) -> (Array3<u32>, Vec<usize>) {
    let shape = mask.shape();
    let data = mask.data();
    let mut labels = Array3::<u32>::zeros(shape);
    let mut sizes = Vec::new();
    let mut bfs_q = VecDeque::with_capacity(64);

    for (pos, &pixel) in data.indexed_iter() {
        if pixel == 0 || labels[pos] != 0 {
            continue;
        }
        sizes.push(0usize);
        let id = sizes.len() as u32;
        labels[pos] = id;
        bfs_q.push_back(pos);

        // bfs
        while let Some(cur) = bfs_q.pop_front() {
            sizes[id as usize - 1] += 1;
            for delta in N26 {
                let Some(next) = offset(cur, delta, shape) else {
                    continue;
                };
                if data[next] != 0 && labels[next] == 0 {
                    labels[next] = id;
                    bfs_q.push_back(next);
                }
            }
        }
    }
    (labels, sizes)
}

/// 只保留最大的 26-连通前景区域.
///
/// 若有多个区域同为最大, 保留光栅扫描序中最先出现的那个.
/// 掩膜全为背景时原样返回 (全背景).
pub fn largest_component(mask: &MaskVolume) -> MaskVolume {
    let (labels, sizes) = label_components(mask);
    let Some(keep) = sizes
        .iter()
        .enumerate()
        .fold(None, |best: Option<(usize, usize)>, (i, &s)| match best {
            Some((_, bs)) if bs >= s => best,
            _ => Some((i, s)),
        })
        .map(|(i, _)| i as u32 + 1)
    else {
        return mask.clone();
    };
    mask.like(labels.mapv(|l| u8::from(l == keep)))
}

/// 以 `radius` 体素为半径做球形膨胀. 距离按体素索引 (而非毫米) 计算.
///
/// 前景体素到任一原前景体素的欧氏距离不超过 `radius` 时被置为前景.
pub fn dilate_ball(mask: &MaskVolume, radius: usize) -> MaskVolume {
    if radius == 0 || mask.foreground_count() == 0 {
        return mask.clone();
    }
    let dist = squared_distance_transform(mask);
    let r2 = (radius * radius) as f64;
    mask.like(dist.mapv(|d| u8::from(d <= r2)))
}

/// 以原掩膜为基础依次做最大连通域清理和球形膨胀, 得到配准掩膜.
pub fn registration_mask(mask: &MaskVolume, radius: usize) -> MaskVolume {
    dilate_ball(&largest_component(mask), radius)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Affine;

    fn mask_from(shape: Idx3d, fg: &[Idx3d]) -> MaskVolume {
        let mut data = Array3::<u8>::zeros(shape);
        for &p in fg {
            data[p] = 1;
        }
        MaskVolume::with_affine(data, &Affine::IDENTITY)
    }

    #[test]
    fn test_n26_offsets_are_unique() {
        let mut v = N26.to_vec();
        v.sort();
        v.dedup();
        assert_eq!(v.len(), 26);
        assert!(!v.contains(&(0, 0, 0)));
    }

    #[test]
    fn test_diagonal_voxels_are_connected() {
        // 仅顶点相接的两个体素在 26-邻域下相连.
        let m = mask_from((3, 3, 3), &[(0, 0, 0), (1, 1, 1), (2, 2, 2)]);
        let (_, sizes) = label_components(&m);
        assert_eq!(sizes, vec![3]);
    }

    #[test]
    fn test_largest_component_keeps_biggest() {
        let mut fg = vec![(0, 0, 0), (0, 0, 1)];
        for z in 3..5 {
            for h in 3..5 {
                for w in 3..5 {
                    fg.push((z, h, w));
                }
            }
        }
        fg.push((6, 6, 6));
        let m = mask_from((7, 7, 7), &fg);
        let (_, sizes) = label_components(&m);
        assert_eq!(sizes, vec![2, 8, 1]);

        let kept = largest_component(&m);
        assert_eq!(kept.foreground_count(), 8);
        assert_eq!(kept[(3, 3, 3)], 1);
        assert_eq!(kept[(0, 0, 0)], 0);
        assert_eq!(kept[(6, 6, 6)], 0);
    }

    #[test]
    fn test_largest_component_tie_keeps_first() {
        let m = mask_from((5, 1, 5), &[(0, 0, 0), (4, 0, 4)]);
        let kept = largest_component(&m);
        assert_eq!(kept.foreground_pos(), vec![(0, 0, 0)]);
    }

    #[test]
    fn test_empty_mask_stays_empty() {
        let m = mask_from((3, 3, 3), &[]);
        assert_eq!(largest_component(&m).foreground_count(), 0);
        assert_eq!(dilate_ball(&m, 5).foreground_count(), 0);
    }

    #[test]
    fn test_dilate_ball_radius() {
        let m = mask_from((11, 11, 11), &[(5, 5, 5)]);
        let d = dilate_ball(&m, 2);
        // 半径 2 的离散球: 满足 dz^2 + dh^2 + dw^2 <= 4 的格点数.
        let expected = (-2i32..=2)
            .flat_map(|a| (-2i32..=2).flat_map(move |b| (-2i32..=2).map(move |c| (a, b, c))))
            .filter(|(a, b, c)| a * a + b * b + c * c <= 4)
            .count();
        assert_eq!(d.foreground_count(), expected);
        assert_eq!(d[(5, 5, 7)], 1);
        assert_eq!(d[(5, 7, 7)], 0);
        assert_eq!(d[(3, 5, 5)], 1);
        // 原前景保持.
        assert_eq!(d[(5, 5, 5)], 1);
    }

    #[test]
    fn test_registration_mask_drops_islands_before_dilation() {
        let m = mask_from((9, 9, 9), &[(0, 0, 0), (4, 4, 4), (4, 4, 5)]);
        let r = registration_mask(&m, 1);
        assert_eq!(r[(0, 0, 0)], 0);
        assert_eq!(r[(4, 4, 3)], 1);
        assert_eq!(r[(4, 4, 6)], 1);
        assert_eq!(r[(4, 5, 5)], 1);
        assert_eq!(r[(4, 5, 6)], 0);
    }
}
