//! 音频采样格式定义.

use std::fmt;

/// 音频采样格式
///
/// 老游戏音频只出现 8 位无符号与 16 位有符号两种深度.
/// - 交错 (Interleaved): 各声道采样交替排列, 如 LRLRLR...
/// - 平面 (Planar): 每个声道独立存储, 如 LLL...RRR...
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleFormat {
    /// 未指定
    None,
    /// 无符号 8 位整数, 交错
    U8,
    /// 有符号 16 位整数, 交错
    S16,
    /// 有符号 16 位整数, 平面
    S16p,
}

impl SampleFormat {
    /// 每个采样点占用的字节数
    pub const fn bytes_per_sample(&self) -> u32 {
        match self {
            Self::None => 0,
            Self::U8 => 1,
            Self::S16 | Self::S16p => 2,
        }
    }

    /// 是否为平面格式
    pub const fn is_planar(&self) -> bool {
        matches!(self, Self::S16p)
    }

    /// 由位深选择交错格式
    pub const fn from_bits(bits: u32) -> Self {
        match bits {
            8 => Self::U8,
            16 => Self::S16,
            _ => Self::None,
        }
    }
}

impl fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::None => "none",
            Self::U8 => "u8",
            Self::S16 => "s16",
            Self::S16p => "s16p",
        };
        write!(f, "{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_由位深选择格式() {
        assert_eq!(SampleFormat::from_bits(8), SampleFormat::U8);
        assert_eq!(SampleFormat::from_bits(16), SampleFormat::S16);
        assert_eq!(SampleFormat::from_bits(4), SampleFormat::None);
        assert_eq!(SampleFormat::S16.bytes_per_sample(), 2);
    }
}
