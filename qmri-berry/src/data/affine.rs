//! 体素坐标到物理 (世界) 坐标的仿射矩阵.
//!
//! 仿射矩阵作用于 nifti 惯用的 `(i, j, k)` 体素坐标, 也就是本 crate
//! `(z, h, w)` 索引的逆序. 使用 [`Affine::index_to_world`] 和
//! [`Affine::world_to_index`] 可以免去手动换序.

use nifti::NiftiHeader;

use crate::Idx3d;

/// 3 x 4 仿射矩阵, 最后一行隐含为 `[0, 0, 0, 1]`.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Affine {
    m: [[f64; 4]; 3],
}

impl Default for Affine {
    #[inline]
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Affine {
    /// 单位变换.
    pub const IDENTITY: Affine = Affine {
        m: [
            [1.0, 0.0, 0.0, 0.0],
            [0.0, 1.0, 0.0, 0.0],
            [0.0, 0.0, 1.0, 0.0],
        ],
    };

    /// 按行构造.
    #[inline]
    pub const fn from_rows(m: [[f64; 4]; 3]) -> Self {
        Self { m }
    }

    /// 由线性部分和平移部分构造.
    pub fn from_linear(linear: [[f64; 3]; 3], translation: [f64; 3]) -> Self {
        let mut m = [[0.0; 4]; 3];
        for r in 0..3 {
            m[r][..3].copy_from_slice(&linear[r]);
            m[r][3] = translation[r];
        }
        Self { m }
    }

    /// 对角缩放加平移, 测试与合成数据常用.
    pub fn from_spacing(spacing: [f64; 3], origin: [f64; 3]) -> Self {
        let [sx, sy, sz] = spacing;
        Self::from_linear([[sx, 0.0, 0.0], [0.0, sy, 0.0], [0.0, 0.0, sz]], origin)
    }

    /// 按 nifti 标准从 header 计算体素-世界矩阵.
    ///
    /// 优先使用 sform; 其次 qform (四元数 + `pixdim[0]` 决定的 qfac);
    /// 两者都缺失时退化为 `pixdim` 对角矩阵.
    pub fn from_header(h: &NiftiHeader) -> Self {
        if h.sform_code > 0 {
            let row = |r: [f32; 4]| r.map(f64::from);
            return Self::from_rows([row(h.srow_x), row(h.srow_y), row(h.srow_z)]);
        }

        let [_, dx, dy, dz, ..] = h.pixdim.map(f64::from);
        if h.qform_code > 0 {
            let (b, c, d) = (
                f64::from(h.quatern_b),
                f64::from(h.quatern_c),
                f64::from(h.quatern_d),
            );
            let a = (1.0 - (b * b + c * c + d * d).min(1.0)).sqrt();
            let qfac = if h.pixdim[0] < 0.0 { -1.0 } else { 1.0 };
            let r = [
                [
                    a * a + b * b - c * c - d * d,
                    2.0 * (b * c - a * d),
                    2.0 * (b * d + a * c),
                ],
                [
                    2.0 * (b * c + a * d),
                    a * a + c * c - b * b - d * d,
                    2.0 * (c * d - a * b),
                ],
                [
                    2.0 * (b * d - a * c),
                    2.0 * (c * d + a * b),
                    a * a + d * d - b * b - c * c,
                ],
            ];
            let scale = [dx, dy, dz * qfac];
            let linear = r.map(|row| [row[0] * scale[0], row[1] * scale[1], row[2] * scale[2]]);
            let origin = [h.quatern_x, h.quatern_y, h.quatern_z].map(f64::from);
            return Self::from_linear(linear, origin);
        }

        // 没有任何方向信息时 pixdim 可能为 0.
        let fix = |v: f64| if v > 0.0 { v } else { 1.0 };
        Self::from_spacing([fix(dx), fix(dy), fix(dz)], [0.0; 3])
    }

    /// 将矩阵写入 header 的 sform 字段, 并同步 `pixdim`.
    pub fn write_to_header(&self, h: &mut NiftiHeader) {
        let row = |r: [f64; 4]| r.map(|v| v as f32);
        h.srow_x = row(self.m[0]);
        h.srow_y = row(self.m[1]);
        h.srow_z = row(self.m[2]);
        h.sform_code = 1;
        h.qform_code = 0;
        let spacing = self.spacing();
        h.pixdim[1..4].copy_from_slice(&spacing.map(|v| v as f32));
    }

    /// 行数据.
    #[inline]
    pub fn rows(&self) -> &[[f64; 4]; 3] {
        &self.m
    }

    /// 线性部分.
    #[inline]
    pub fn linear(&self) -> [[f64; 3]; 3] {
        self.m.map(|r| [r[0], r[1], r[2]])
    }

    /// 平移部分.
    #[inline]
    pub fn translation(&self) -> [f64; 3] {
        self.m.map(|r| r[3])
    }

    /// 各列的模长, 即各体素轴方向的物理间距.
    pub fn spacing(&self) -> [f64; 3] {
        let l = self.linear();
        [0, 1, 2].map(|c| (l[0][c].powi(2) + l[1][c].powi(2) + l[2][c].powi(2)).sqrt())
    }

    /// 线性部分的行列式.
    pub fn determinant(&self) -> f64 {
        let [a, b, c] = self.linear();
        a[0] * (b[1] * c[2] - b[2] * c[1]) - a[1] * (b[0] * c[2] - b[2] * c[0])
            + a[2] * (b[0] * c[1] - b[1] * c[0])
    }

    /// 作用于一个点.
    #[inline]
    pub fn apply(&self, p: [f64; 3]) -> [f64; 3] {
        let [x, y, z] = p;
        self.m.map(|r| r[0] * x + r[1] * y + r[2] * z + r[3])
    }

    /// `(z, h, w)` 体素索引到世界坐标.
    #[inline]
    pub fn index_to_world(&self, (z, h, w): Idx3d) -> [f64; 3] {
        self.apply([w as f64, h as f64, z as f64])
    }

    /// 世界坐标到连续 `(z, h, w)` 体素坐标. `self` 必须是世界-体素矩阵,
    /// 即体素-世界矩阵的逆.
    #[inline]
    pub fn world_to_index(&self, p: [f64; 3]) -> [f64; 3] {
        let [i, j, k] = self.apply(p);
        [k, j, i]
    }

    /// 复合变换 `self ∘ rhs`, 即先作用 `rhs` 再作用 `self`.
    pub fn compose(&self, rhs: &Affine) -> Affine {
        let a = &self.m;
        let b = &rhs.m;
        let mut m = [[0.0; 4]; 3];
        for r in 0..3 {
            for c in 0..4 {
                m[r][c] = a[r][0] * b[0][c] + a[r][1] * b[1][c] + a[r][2] * b[2][c];
            }
            m[r][3] += a[r][3];
        }
        Affine { m }
    }

    /// 逆变换. 线性部分奇异时返回 `None`.
    pub fn inverse(&self) -> Option<Affine> {
        let det = self.determinant();
        if !det.is_finite() || det.abs() < 1e-12 {
            return None;
        }
        let [a, b, c] = self.linear();
        let inv_det = 1.0 / det;
        let inv = [
            [
                (b[1] * c[2] - b[2] * c[1]) * inv_det,
                (a[2] * c[1] - a[1] * c[2]) * inv_det,
                (a[1] * b[2] - a[2] * b[1]) * inv_det,
            ],
            [
                (b[2] * c[0] - b[0] * c[2]) * inv_det,
                (a[0] * c[2] - a[2] * c[0]) * inv_det,
                (a[2] * b[0] - a[0] * b[2]) * inv_det,
            ],
            [
                (b[0] * c[1] - b[1] * c[0]) * inv_det,
                (a[1] * c[0] - a[0] * c[1]) * inv_det,
                (a[0] * b[1] - a[1] * b[0]) * inv_det,
            ],
        ];
        let t = self.translation();
        let t_inv = inv.map(|r| -(r[0] * t[0] + r[1] * t[1] + r[2] * t[2]));
        Some(Self::from_linear(inv, t_inv))
    }

    /// 与 `other` 的逐元素最大绝对差.
    pub fn max_abs_diff(&self, other: &Affine) -> f64 {
        self.m
            .iter()
            .flatten()
            .zip(other.m.iter().flatten())
            .map(|(a, b)| (a - b).abs())
            .fold(0.0, f64::max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: [f64; 3], b: [f64; 3]) -> bool {
        a.iter().zip(b.iter()).all(|(x, y)| (x - y).abs() < 1e-9)
    }

    #[test]
    fn test_inverse_round_trip() {
        let a = Affine::from_rows([
            [0.0, -1.2, 0.1, 12.0],
            [0.9, 0.0, 0.0, -4.0],
            [0.05, 0.0, 2.5, 7.5],
        ]);
        let inv = a.inverse().unwrap();
        let p = [3.0, -8.0, 11.0];
        assert!(close(inv.apply(a.apply(p)), p));
        assert!(inv.compose(&a).max_abs_diff(&Affine::IDENTITY) < 1e-12);
    }

    #[test]
    fn test_singular_has_no_inverse() {
        let a = Affine::from_spacing([1.0, 0.0, 1.0], [0.0; 3]);
        assert!(a.inverse().is_none());
    }

    #[test]
    fn test_index_order() {
        // 体素间距 (i, j, k) = (1, 2, 3).
        let a = Affine::from_spacing([1.0, 2.0, 3.0], [10.0, 20.0, 30.0]);
        // (z, h, w) = (1, 1, 1) -> (i, j, k) = (1, 1, 1).
        assert!(close(a.index_to_world((1, 0, 0)), [10.0, 20.0, 33.0]));
        assert!(close(a.index_to_world((0, 0, 2)), [12.0, 20.0, 30.0]));
        let back = a.inverse().unwrap().world_to_index([12.0, 20.0, 33.0]);
        assert!(close(back, [1.0, 0.0, 2.0]));
    }

    #[test]
    fn test_header_sform_preferred() {
        let mut h = NiftiHeader::default();
        h.pixdim = [1.0, 9.0, 9.0, 9.0, 0.0, 0.0, 0.0, 0.0];
        let a = Affine::from_spacing([2.0, 2.0, 2.0], [-5.0, 0.0, 5.0]);
        a.write_to_header(&mut h);
        assert_eq!(Affine::from_header(&h), a);
        assert_eq!(h.pixdim[1..4], [2.0, 2.0, 2.0]);
    }

    #[test]
    fn test_header_qform_identity_quaternion() {
        let mut h = NiftiHeader::default();
        h.sform_code = 0;
        h.qform_code = 1;
        h.pixdim = [-1.0, 1.5, 1.5, 3.0, 0.0, 0.0, 0.0, 0.0];
        h.quatern_b = 0.0;
        h.quatern_c = 0.0;
        h.quatern_d = 0.0;
        h.quatern_x = 1.0;
        let a = Affine::from_header(&h);
        // qfac = -1 翻转 k 轴.
        assert!(close(a.apply([1.0, 1.0, 1.0]), [2.5, 1.5, -3.0]));
    }
}
