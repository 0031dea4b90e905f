/// 灰度显示窗口, 包含窗位 (window level) 和窗宽 (window width).
///
/// 该窗口是只读的. 若要修改窗口参数, 你应该创建新的实例.
#[derive(Copy, Clone, Debug)]
pub struct IntensityWindow {
    level: f32,
    width: f32,
}

impl IntensityWindow {
    /// `[0, 1]` 窗口.
    pub const UNIT: IntensityWindow = IntensityWindow {
        level: 0.5,
        width: 1.0,
    };

    /// 构建显示窗.
    ///
    /// `level` 必须有限, `width` 必须为正, 否则返回 `None`.
    pub fn new(level: f32, width: f32) -> Option<IntensityWindow> {
        if level.is_finite() && width.is_finite() && 0.0 < width {
            Some(Self { level, width })
        } else {
            None
        }
    }

    /// 由上下限构建显示窗.
    #[inline]
    pub fn from_bounds(lower: f32, upper: f32) -> Option<IntensityWindow> {
        Self::new((lower + upper) / 2.0, upper - lower)
    }

    /// 构建以众数为中心的窗口, 范围为 `[0.3 * modal, 1.7 * modal]`.
    ///
    /// 定量图 (T1/T2/PD) 的脑组织值集中在众数附近, 该窗口能看清灰白质对比.
    /// `modal` 必须为正.
    #[inline]
    pub fn from_modal(modal: f32) -> Option<IntensityWindow> {
        Self::from_bounds(modal * 0.3, modal * 1.7)
    }

    /// 窗下限.
    #[inline]
    pub fn lower_bound(&self) -> f32 {
        self.level - self.width / 2.0
    }

    /// 窗上限.
    #[inline]
    pub fn upper_bound(&self) -> f32 {
        self.level + self.width / 2.0
    }

    /// 窗位.
    #[inline]
    pub fn level(&self) -> f32 {
        self.level
    }

    /// 窗宽.
    #[inline]
    pub fn width(&self) -> f32 {
        self.width
    }

    /// 求在当前窗设置下, `v` 对应的灰度图像素整数值 (0 <= value <= 255)
    ///
    /// 如果 `v` 无意义 (如 inf, NaN), 则返回 `None`.
    pub fn eval(&self, v: f32) -> Option<u8> {
        self.eval_f32(v).map(|g| g as u8)
    }

    /// 求在当前窗设置下, `v` 对应的灰度图像素分布点 (0.0 <= value <= 255.0).
    ///
    /// 如果 `v` 无意义 (如 inf, NaN), 则返回 `None`.
    pub fn eval_f32(&self, v: f32) -> Option<f32> {
        if !v.is_finite() {
            return None;
        }
        // 255, not 256.
        let g = (v - self.lower_bound()) / self.width() * 255.0;
        Some(num::clamp(g, 0.0, 255.0))
    }
}
