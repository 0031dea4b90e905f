use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter};
use std::ops::{Index, IndexMut};
use std::path::{Path, PathBuf};

use flate2::write::GzEncoder;
use flate2::Compression;
use ndarray::{Array3, ArrayView, ArrayViewMut, Ix3};
use nifti::writer::WriterOptions;
use nifti::{IntoNdArray, NiftiHeader, NiftiObject, ReaderOptions};

use crate::consts::label;
use crate::error::VolumeError;
use crate::Idx3d;

pub mod affine;
pub mod morph_3d;
pub mod window;

pub use affine::Affine;
pub use window::IntensityWindow;

/// `NiftiHeader` 是栈上大对象, 移动该对象的开销很可观.
/// 因此我们将其分配到堆上.
type BoxedHeader = Box<NiftiHeader>;

/// 将 (W, H, z) 转换成 (z, H, W). 以后均按照该模式访问.
#[inline]
fn get_shape_from_header(h: &NiftiHeader) -> Idx3d {
    // [W, H, z]. 体素个数数组.
    let [_, w, h, z, ..] = h.dim;
    (z as usize, h as usize, w as usize)
}

/// 把 `(z, H, W)` 形状写回 header 的 `dim` 字段.
fn set_shape_to_header(h: &mut NiftiHeader, (z, hh, w): Idx3d) {
    h.dim = [3, w as u16, hh as u16, z as u16, 1, 1, 1, 1];
}

/// 3D nii 文件 header 的共用属性和部分通用操作.
pub trait NiftiHeaderAttr {
    /// 获取 header 部分.
    fn header(&self) -> &NiftiHeader;

    /// 获取数据形状大小.
    #[inline]
    fn shape(&self) -> Idx3d {
        get_shape_from_header(self.header())
    }

    /// 获取水平切片个数.
    #[inline]
    fn len_z(&self) -> usize {
        self.shape().0
    }

    /// 获取数据体素个数.
    #[inline]
    fn size(&self) -> usize {
        let (z, h, w) = self.shape();
        z * h * w
    }

    /// 检查索引是否合法.
    #[inline]
    fn check(&self, (z0, h0, w0): &Idx3d) -> bool {
        let (z, h, w) = self.shape();
        *z0 < z && *h0 < h && *w0 < w
    }

    /// 体素坐标到世界坐标的仿射矩阵.
    #[inline]
    fn affine(&self) -> Affine {
        Affine::from_header(self.header())
    }

    /// 获取单个体素分辨率. 该分辨率以毫米为单位, 顺序为 `(z, h, w)`.
    #[inline]
    fn pix_dim(&self) -> [f64; 3] {
        let [i, j, k] = self.affine().spacing();
        [k, j, i]
    }

    /// 获取体素的实际体积值, 以立方毫米为单位.
    #[inline]
    fn voxel(&self) -> f64 {
        self.pix_dim().iter().product()
    }

    /// 与 `other` 是否位于同一采样网格 (形状相同, 仿射矩阵在 `1e-4` 内一致).
    fn same_grid<O: NiftiHeaderAttr + ?Sized>(&self, other: &O) -> bool {
        self.shape() == other.shape() && self.affine().max_abs_diff(&other.affine()) < 1e-4
    }
}

impl NiftiHeaderAttr for NiftiHeader {
    #[inline]
    fn header(&self) -> &NiftiHeader {
        self
    }
}

/// nii 格式 3D 体数据, 包括 header 和体素值. 体素按 `(z, h, w)` 存储.
#[derive(Debug, Clone)]
pub struct Volume<T> {
    header: BoxedHeader,
    data: Array3<T>,
}

/// 连续值体数据, 如定量图、解剖参考、合成加权图像.
pub type ScalarVolume = Volume<f32>;

/// 整数标签体数据, 如分割.
pub type LabelVolume = Volume<u32>;

/// 二值掩膜体数据. 前景为 1, 背景为 0.
pub type MaskVolume = Volume<u8>;

impl<T> NiftiHeaderAttr for Volume<T> {
    #[inline]
    fn header(&self) -> &NiftiHeader {
        &self.header
    }
}

impl<T> Index<Idx3d> for Volume<T> {
    type Output = T;

    #[inline]
    fn index(&self, index: Idx3d) -> &Self::Output {
        &self.data[index]
    }
}

impl<T> IndexMut<Idx3d> for Volume<T> {
    #[inline]
    fn index_mut(&mut self, index: Idx3d) -> &mut Self::Output {
        &mut self.data[index]
    }
}

/// 读取 nifti 文件为 `f32` 体数据, 并把 [W, H, z] 转为 [z, H, W].
fn read_f32(path: &Path) -> Result<(BoxedHeader, Array3<f32>), VolumeError> {
    let nifti_err = |source| VolumeError::Nifti {
        path: path.to_owned(),
        source,
    };
    let obj = ReaderOptions::new().read_file(path).map_err(nifti_err)?;
    let header = Box::new(obj.header().clone());

    // 第四维及以上必须全部为 1.
    let ndim = header.dim[0] as usize;
    if !(3..=7).contains(&ndim) || header.dim[4..=ndim].iter().any(|&d| d > 1) {
        return Err(VolumeError::NotThreeDimensional {
            path: path.to_owned(),
            dim: header.dim,
        });
    }

    // hint: 原第一维向下增长, 原第二维向右增长.
    let axes: Vec<usize> = (0..ndim).rev().collect();
    let data = obj
        .into_volume()
        .into_ndarray::<f32>()
        .map_err(nifti_err)?
        .permuted_axes(axes.as_slice());

    // The nature of nifti data field layout.
    let data = if data.is_standard_layout() {
        data
    } else {
        data.as_standard_layout().into_owned()
    };
    let data = Array3::<f32>::from_shape_vec(get_shape_from_header(&header), data.into_raw_vec())
        .map_err(|e| VolumeError::Io {
            path: path.to_owned(),
            source: io::Error::new(io::ErrorKind::InvalidData, e),
        })?;

    Ok((header, data))
}

impl<T> Volume<T> {
    /// 在 `header` 描述的网格上直接创建体数据. `data` 按 `(z, h, w)` 组织.
    ///
    /// header 的 `dim` 会被改写为 `data` 的形状, 强度缩放被重置.
    pub fn from_header(header: &NiftiHeader, data: Array3<T>) -> Self {
        let mut header = Box::new(header.clone());
        set_shape_to_header(&mut header, data.dim());
        header.scl_slope = 1.0;
        header.scl_inter = 0.0;
        Self { header, data }
    }

    /// 以给定仿射矩阵创建体数据. 主要用于合成数据.
    pub fn with_affine(data: Array3<T>, affine: &Affine) -> Self {
        let mut header = NiftiHeader::default();
        affine.write_to_header(&mut header);
        Self::from_header(&header, data)
    }

    /// 在与 `self` 相同的网格上创建新的体数据.
    pub fn like<U>(&self, data: Array3<U>) -> Volume<U> {
        debug_assert_eq!(data.dim(), self.data.dim());
        Volume::from_header(&self.header, data)
    }

    /// 逐体素映射, 网格不变.
    pub fn map<U, F: FnMut(&T) -> U>(&self, f: F) -> Volume<U> {
        Volume {
            header: self.header.clone(),
            data: self.data.map(f),
        }
    }

    /// 获得数据的一份不可变 shallow copy.
    #[inline]
    pub fn data(&self) -> ArrayView<'_, T, Ix3> {
        self.data.view()
    }

    /// 获得数据的一份可变 shallow copy.
    #[inline]
    pub fn data_mut(&mut self) -> ArrayViewMut<'_, T, Ix3> {
        self.data.view_mut()
    }

    /// 取出体素数组.
    #[inline]
    pub fn into_data(self) -> Array3<T> {
        self.data
    }
}

macro_rules! impl_write_nii_gz {
    ($($elem: ty),+) => {
        $(
            impl Volume<$elem> {
                /// 写出为 gzip 压缩的 nifti 文件, 返回 `.nii.gz` 文件路径.
                ///
                /// 先写出未压缩的 `.nii`, 再压缩替换之.
                pub fn write_nii_gz<P: AsRef<Path>>(&self, path: P) -> Result<PathBuf, VolumeError> {
                    let path = path.as_ref();
                    let plain = match path.extension() {
                        Some(e) if e == "gz" => path.with_extension(""),
                        _ => path.to_owned(),
                    };
                    let mut gz_path = plain.clone().into_os_string();
                    gz_path.push(".gz");
                    let gz_path = PathBuf::from(gz_path);

                    // [z, H, W] -> [W, H, z].
                    let view = self.data.view().permuted_axes([2, 1, 0]);
                    WriterOptions::new(&plain)
                        .reference_header(&self.header)
                        .write_nifti(&view)
                        .map_err(|source| VolumeError::Nifti {
                            path: plain.clone(),
                            source,
                        })?;

                    gzip_replace(&plain, &gz_path).map_err(|source| VolumeError::Io {
                        path: gz_path.clone(),
                        source,
                    })?;
                    Ok(gz_path)
                }
            }
        )+
    };
}

impl_write_nii_gz!(f32, u32, u8);

/// 将 `plain` 压缩为 `gz`, 然后删除 `plain`.
fn gzip_replace(plain: &Path, gz: &Path) -> io::Result<()> {
    let mut input = BufReader::new(File::open(plain)?);
    let mut encoder = GzEncoder::new(BufWriter::new(File::create(gz)?), Compression::default());
    io::copy(&mut input, &mut encoder)?;
    encoder.finish()?;
    fs::remove_file(plain)
}

impl ScalarVolume {
    /// 打开 nii 文件格式的 3D 连续值体数据.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, VolumeError> {
        let (header, data) = read_f32(path.as_ref())?;
        Ok(Self { header, data })
    }
}

impl LabelVolume {
    /// 打开 nii 文件格式的 3D 分割. 体素值四舍五入为非负整数.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, VolumeError> {
        let (header, data) = read_f32(path.as_ref())?;
        let data = data.mapv(|v| v.round().max(0.0) as u32);
        Ok(Self { header, data })
    }

    /// 收集分割中出现过的所有非背景标签, 升序.
    pub fn labels(&self) -> Vec<u32> {
        self.data
            .iter()
            .copied()
            .filter(|&l| !label::is_background(l))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// 获取值为 `label` 的体素个数.
    #[inline]
    pub fn count(&self, label: u32) -> usize {
        self.data.iter().filter(|p| **p == label).count()
    }

    /// 将标签二值化为掩膜, 非背景即前景.
    pub fn to_mask(&self) -> MaskVolume {
        self.map(|&l| u8::from(!label::is_background(l)))
    }
}

impl MaskVolume {
    /// 打开 nii 文件格式的 3D 掩膜. 体素值大于 0.5 视为前景.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, VolumeError> {
        let (header, data) = read_f32(path.as_ref())?;
        let data = data.mapv(|v| u8::from(v > 0.5));
        Ok(Self { header, data })
    }

    /// 前景体素个数.
    #[inline]
    pub fn foreground_count(&self) -> usize {
        self.data.iter().filter(|p| **p != 0).count()
    }

    /// 收集前景体素下标. 结果按行优先存储.
    pub fn foreground_pos(&self) -> Vec<Idx3d> {
        self.data
            .indexed_iter()
            .filter_map(|(pos, &p)| (p != 0).then_some(pos))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    fn ramp(shape: Idx3d) -> Array3<f32> {
        Array3::from_shape_fn(shape, |(z, h, w)| (z * 100 + h * 10 + w) as f32)
    }

    #[test]
    fn test_write_then_open_keeps_layout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ramp.nii.gz");
        let affine = Affine::from_spacing([1.0, 2.0, 3.0], [-4.0, 5.0, 6.0]);
        let vol = ScalarVolume::with_affine(ramp((4, 3, 2)), &affine);
        assert_eq!(vol.shape(), (4, 3, 2));

        let written = vol.write_nii_gz(&path).unwrap();
        assert_eq!(written, path);
        assert!(path.is_file());
        // 中间文件已被删除.
        assert!(!dir.path().join("ramp.nii").exists());

        let back = ScalarVolume::open(&path).unwrap();
        assert_eq!(back.shape(), (4, 3, 2));
        assert_eq!(back[(3, 2, 1)], 321.0);
        assert_eq!(back[(1, 0, 1)], 101.0);
        assert!(back.affine().max_abs_diff(&affine) < 1e-6);
        assert!(back.same_grid(&vol));
        assert_eq!(back.pix_dim(), [3.0, 2.0, 1.0]);
    }

    #[test]
    fn test_label_and_mask_open() {
        let dir = tempfile::tempdir().unwrap();
        let mut raw = Array3::<f32>::zeros((2, 2, 2));
        raw[(0, 0, 0)] = 41.2;
        raw[(1, 1, 1)] = 2.0;
        raw[(0, 1, 0)] = 0.4;
        let vol = ScalarVolume::with_affine(raw, &Affine::IDENTITY);
        let path = dir.path().join("seg.nii.gz");
        vol.write_nii_gz(&path).unwrap();

        let labels = LabelVolume::open(&path).unwrap();
        assert_eq!(labels.labels(), vec![2, 41]);
        assert_eq!(labels.count(0), 6);

        let mask = MaskVolume::open(&path).unwrap();
        assert_eq!(mask.foreground_count(), 2);
        assert_eq!(mask.foreground_pos(), vec![(0, 0, 0), (1, 1, 1)]);
    }

    #[test]
    fn test_label_volume_written_as_integers() {
        let dir = tempfile::tempdir().unwrap();
        let data = Array3::from_shape_fn((3, 2, 2), |(z, _, _)| z as u32 * 7);
        let vol = LabelVolume::with_affine(data, &Affine::from_spacing([0.5; 3], [0.0; 3]));
        let path = dir.path().join("labels.nii.gz");
        vol.write_nii_gz(&path).unwrap();
        let back = LabelVolume::open(&path).unwrap();
        assert_eq!(back.labels(), vec![7, 14]);
        assert_eq!(back.to_mask().foreground_count(), 8);
    }
}
