//! 配准质量辅助图.
//!
//! 底图是重采样到解剖空间的定量图, 其上叠加解剖空间分割的轮廓.
//! 从分割覆盖的水平切片中等间隔取 9 张, 按 3 x 3 拼接成一张 RGB 图片.

use image::{Rgb, RgbImage};

use crate::config::QcContrast;
use crate::consts::{gray, CONTOUR_RGB};
use crate::error::ProvenanceError;
use crate::{Idx3d, IntensityWindow, LabelVolume, NiftiHeaderAttr, ScalarVolume};

/// 拼图行数与列数.
const GRID: usize = 3;

/// 取样切片数.
pub const QC_SLICES: usize = GRID * GRID;

/// 分割首末切片附近跳过的切片数.
const SLICE_BUFFER: usize = 3;

/// 切片裁剪时在分割包围盒外保留的像素数.
const CROP_BUFFER: usize = 20;

/// 众数窗口使用的直方图桶数.
const HISTOGRAM_BINS: usize = 100;

/// 分割的包围盒, 闭区间.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
struct BoundingBox {
    min: Idx3d,
    max: Idx3d,
}

fn bounding_box(labels: &LabelVolume) -> Option<BoundingBox> {
    let mut ans: Option<BoundingBox> = None;
    for ((z, h, w), &l) in labels.data().indexed_iter() {
        if l == 0 {
            continue;
        }
        match ans.as_mut() {
            None => {
                ans = Some(BoundingBox {
                    min: (z, h, w),
                    max: (z, h, w),
                })
            }
            Some(b) => {
                b.min = (b.min.0.min(z), b.min.1.min(h), b.min.2.min(w));
                b.max = (b.max.0.max(z), b.max.1.max(h), b.max.2.max(w));
            }
        }
    }
    ans
}

/// 在 `[lo, hi]` 上等间隔选 `n` 个切片 (可重复).
fn spread(lo: usize, hi: usize, n: usize) -> Vec<usize> {
    if n <= 1 {
        return vec![lo];
    }
    let span = (hi - lo) as f64;
    (0..n)
        .map(|i| lo + (span * i as f64 / (n - 1) as f64).round() as usize)
        .collect()
}

/// 分割覆盖范围内要展示的切片.
fn pick_slices(b: &BoundingBox) -> Vec<usize> {
    let (lo, hi) = (b.min.0, b.max.0);
    if hi - lo > 2 * SLICE_BUFFER {
        spread(lo + SLICE_BUFFER, hi - SLICE_BUFFER, QC_SLICES)
    } else {
        spread(lo, hi, QC_SLICES)
    }
}

/// 底图显示窗.
///
/// `Modal` 在分割覆盖体素的正值上做直方图, 以最高桶的左边界为众数;
/// 众数无效时退回全范围窗口.
fn display_window(
    underlay: &ScalarVolume,
    overlay: &LabelVolume,
    contrast: QcContrast,
) -> IntensityWindow {
    let finite = || underlay.data().into_iter().copied().filter(|v| v.is_finite());
    let (lo, hi) = finite().fold((f32::INFINITY, f32::NEG_INFINITY), |(a, b), v| {
        (a.min(v), b.max(v))
    });
    let full_range = IntensityWindow::from_bounds(lo, hi)
        .or_else(|| IntensityWindow::new(if lo.is_finite() { lo } else { 0.0 }, 1.0))
        .unwrap_or(FALLBACK_WINDOW);
    if contrast == QcContrast::FullRange {
        return full_range;
    }

    let tissue: Vec<f32> = underlay
        .data()
        .iter()
        .zip(overlay.data().iter())
        .filter(|&(&v, &l)| l != 0 && v.is_finite() && v > 0.0)
        .map(|(&v, _)| v)
        .collect();
    modal_value(&tissue)
        .and_then(IntensityWindow::from_modal)
        .unwrap_or(full_range)
}

/// 永远合法的兜底窗口.
const FALLBACK_WINDOW: IntensityWindow = IntensityWindow::UNIT;

/// 直方图最高桶的左边界.
fn modal_value(values: &[f32]) -> Option<f32> {
    let lo = values.iter().copied().fold(f32::INFINITY, f32::min);
    let hi = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    if !(lo.is_finite() && hi.is_finite()) || hi <= lo {
        return None;
    }
    let width = (hi - lo) / HISTOGRAM_BINS as f32;
    let mut counts = [0usize; HISTOGRAM_BINS];
    for &v in values {
        let bin = (((v - lo) / width) as usize).min(HISTOGRAM_BINS - 1);
        counts[bin] += 1;
    }
    // 并列时取靠前的桶.
    let (best, _) = counts
        .iter()
        .enumerate()
        .fold((0, 0), |(bi, bc), (i, &c)| if c > bc { (i, c) } else { (bi, bc) });
    Some(lo + best as f32 * width).filter(|&m| m > 0.0)
}

/// 生成 QC 图.
///
/// `underlay` 与 `overlay` 必须位于同一网格. 分割不含任何前景时返回 `Ok(None)`.
pub fn render(
    underlay: &ScalarVolume,
    overlay: &LabelVolume,
    contrast: QcContrast,
) -> Result<Option<RgbImage>, ProvenanceError> {
    let shape = underlay.shape();
    if overlay.shape() != shape {
        return Err(ProvenanceError::ShapeMismatch(shape, overlay.shape()));
    }
    let Some(bbox) = bounding_box(overlay) else {
        return Ok(None);
    };
    let window = display_window(underlay, overlay, contrast);

    let (_, len_h, len_w) = shape;
    let h0 = bbox.min.1.saturating_sub(CROP_BUFFER);
    let h1 = (bbox.max.1 + CROP_BUFFER).min(len_h - 1);
    let w0 = bbox.min.2.saturating_sub(CROP_BUFFER);
    let w1 = (bbox.max.2 + CROP_BUFFER).min(len_w - 1);
    let (tile_h, tile_w) = (h1 - h0 + 1, w1 - w0 + 1);

    let img_u = underlay.data();
    let img_o = overlay.data();
    let on_contour = |z: usize, h: usize, w: usize| {
        let l = img_o[(z, h, w)];
        if l == 0 {
            return false;
        }
        let neighbours = [
            h.checked_sub(1).map(|h| (z, h, w)),
            (h + 1 < len_h).then_some((z, h + 1, w)),
            w.checked_sub(1).map(|w| (z, h, w)),
            (w + 1 < len_w).then_some((z, h, w + 1)),
        ];
        neighbours
            .into_iter()
            .any(|n| n.map_or(true, |pos| img_o[pos] != l))
    };

    let mut canvas = RgbImage::new((GRID * tile_w) as u32, (GRID * tile_h) as u32);
    for (i, z) in pick_slices(&bbox).into_iter().enumerate() {
        let (row, col) = (i / GRID, i % GRID);
        for h in h0..=h1 {
            // 图像上方为前方.
            let y = row * tile_h + (h1 - h);
            for w in w0..=w1 {
                let x = col * tile_w + (w - w0);
                let px = if on_contour(z, h, w) {
                    Rgb(CONTOUR_RGB)
                } else {
                    let g = window.eval(img_u[(z, h, w)]).unwrap_or(gray::BLACK);
                    Rgb([g, g, g])
                };
                canvas.put_pixel(x as u32, y as u32, px);
            }
        }
    }
    Ok(Some(canvas))
}
