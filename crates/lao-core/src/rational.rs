//! 有理数类型, 用于时间基 (time_base) 与帧率.
//!
//! 容器内各流的自然时间单位 (帧计数、采样计数、块计数) 通过
//! [`Rational::common_time_base`] 归并为同一个时钟.

use std::fmt;

/// 有理数, 由分子和分母组成
///
/// 例如: 时间基 1/22050 表示 22050Hz 采样时钟, 帧率 30000/1001 表示 29.97fps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rational {
    /// 分子
    pub num: i32,
    /// 分母
    pub den: i32,
}

impl Rational {
    /// 创建新的有理数
    ///
    /// # 参数
    /// - `num`: 分子
    /// - `den`: 分母 (不应为 0)
    pub const fn new(num: i32, den: i32) -> Self {
        Self { num, den }
    }

    /// 零值
    pub const ZERO: Self = Self { num: 0, den: 1 };

    /// 未定义 (分母为 0)
    pub const UNDEFINED: Self = Self { num: 0, den: 0 };

    /// 常用时间基: 微秒 (1/1_000_000)
    pub const MICRO: Self = Self {
        num: 1,
        den: 1_000_000,
    };

    /// 判断是否有效 (分母不为 0)
    pub const fn is_valid(&self) -> bool {
        self.den != 0
    }

    /// 转换为 f64 浮点数
    ///
    /// 如果分母为 0, 返回 `f64::NAN`.
    pub fn to_f64(self) -> f64 {
        if self.den == 0 {
            return f64::NAN;
        }
        f64::from(self.num) / f64::from(self.den)
    }

    /// 对有理数进行约分
    pub fn reduce(self) -> Self {
        if self.den == 0 {
            return self;
        }
        let g = gcd(self.num.unsigned_abs(), self.den.unsigned_abs());
        if g == 0 {
            return self;
        }
        let g = g as i32;
        // 保证分母为正
        let sign = if self.den < 0 { -1 } else { 1 };
        Self {
            num: sign * self.num / g,
            den: sign * self.den / g,
        }
    }

    /// 求倒数
    pub const fn invert(self) -> Self {
        Self {
            num: self.den,
            den: self.num,
        }
    }

    /// 求两个正时间基的最大公共时间基
    ///
    /// 返回最大的 t, 使 `self / t` 与 `other / t` 都是整数.
    /// 例如 1/30 与 1/22050 的公共时间基为 1/22050, 1/12 与 1/22050 为 1/44100.
    /// 任一输入非正或结果超出 i32 范围时返回 None.
    pub fn common_time_base(self, other: Self) -> Option<Self> {
        if self.num <= 0 || self.den <= 0 || other.num <= 0 || other.den <= 0 {
            return None;
        }
        let a = self.reduce();
        let b = other.reduce();
        let (na, da) = (u64::from(a.num as u32), u64::from(a.den as u32));
        let (nb, db) = (u64::from(b.num as u32), u64::from(b.den as u32));
        let num = gcd64(na * db, nb * da);
        let den = da * db;
        let g = gcd64(num, den);
        let (num, den) = (num / g, den / g);
        if num > i32::MAX as u64 || den > i32::MAX as u64 {
            return None;
        }
        Some(Self::new(num as i32, den as i32))
    }

    /// 一个 `self` 时长折合多少个 `clock` 刻度
    ///
    /// `clock` 应是 [`Rational::common_time_base`] 的结果; 不能整除或非正时返回 None.
    pub fn ticks_in(self, clock: Self) -> Option<i64> {
        if self.num <= 0 || self.den <= 0 || clock.num <= 0 || clock.den <= 0 {
            return None;
        }
        let num = i64::from(self.num) * i64::from(clock.den);
        let den = i64::from(self.den) * i64::from(clock.num);
        (num % den == 0).then(|| num / den)
    }
}

impl std::ops::Mul for Rational {
    type Output = Self;

    /// 两个有理数相乘
    fn mul(self, other: Self) -> Self {
        Self {
            num: self.num * other.num,
            den: self.den * other.den,
        }
        .reduce()
    }
}

impl fmt::Display for Rational {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

impl From<(i32, i32)> for Rational {
    fn from((num, den): (i32, i32)) -> Self {
        Self { num, den }
    }
}

impl From<i32> for Rational {
    fn from(num: i32) -> Self {
        Self { num, den: 1 }
    }
}

/// 求最大公约数 (欧几里得算法)
fn gcd(mut a: u32, mut b: u32) -> u32 {
    while b != 0 {
        let t = b;
        b = a % b;
        a = t;
    }
    a
}

fn gcd64(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        let t = b;
        b = a % b;
        a = t;
    }
    a
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rational_basic_creation() {
        let r = Rational::new(1, 30);
        assert_eq!(r.num, 1);
        assert_eq!(r.den, 30);
    }

    #[test]
    fn test_rational_to_float() {
        let r = Rational::new(1, 4);
        assert!((r.to_f64() - 0.25).abs() < f64::EPSILON);
    }

    #[test]
    fn test_rational_reduce() {
        let r = Rational::new(30, 60).reduce();
        assert_eq!(r, Rational::new(1, 2));
    }

    #[test]
    fn test_rational_invalid_value() {
        let r = Rational::UNDEFINED;
        assert!(!r.is_valid());
        assert!(r.to_f64().is_nan());
    }

    #[test]
    fn test_rational_display() {
        let r = Rational::new(30000, 1001);
        assert_eq!(format!("{r}"), "30000/1001");
    }

    #[test]
    fn test_公共时间基() {
        let video = Rational::new(1, 30);
        let audio = Rational::new(1, 22050);
        assert_eq!(video.common_time_base(audio), Some(Rational::new(1, 22050)));
        assert_eq!(
            Rational::new(1, 12).common_time_base(audio),
            Some(Rational::new(1, 44100))
        );
        // 帧时长 66666us 与 1/22050
        assert_eq!(
            Rational::new(66666, 1_000_000).common_time_base(audio),
            Some(Rational::new(1, 220_500_000))
        );
        assert_eq!(Rational::UNDEFINED.common_time_base(audio), None);
    }

    #[test]
    fn test_公共时间基与自身相同() {
        let tb = Rational::new(4410, 22050);
        assert_eq!(tb.common_time_base(tb), Some(Rational::new(1, 5)));
    }

    #[test]
    fn test_刻度换算() {
        let clock = Rational::new(1, 22050);
        assert_eq!(Rational::new(1, 30).ticks_in(clock), Some(735));
        assert_eq!(Rational::new(1, 22050).ticks_in(clock), Some(1));
        assert_eq!(Rational::new(1, 44100).ticks_in(clock), None);
        assert_eq!(Rational::UNDEFINED.ticks_in(clock), None);
    }

    #[test]
    fn test_rational_reciprocal() {
        let r = Rational::new(1, 25).invert();
        assert_eq!(r, Rational::new(25, 1));
    }
}
