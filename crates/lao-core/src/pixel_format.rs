//! 像素格式定义.
//!
//! 老游戏视频解码后只产生三类像素布局: 8 位调色板索引、YUV 4:4:4 平面,
//! 以及调色板展开后的打包 RGB.

use std::fmt;

/// 像素格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// 未指定
    None,
    /// 8 位调色板索引, 单平面, 调色板随帧携带
    Pal8,
    /// YUV 4:4:4 平面格式, 8 位 (RoQ)
    Yuv444p,
    /// RGB 各 8 位, 打包
    Rgb24,
}

impl PixelFormat {
    /// 平面数量
    pub const fn plane_count(&self) -> u32 {
        match self {
            Self::None => 0,
            Self::Pal8 | Self::Rgb24 => 1,
            Self::Yuv444p => 3,
        }
    }

    /// 是否需要调色板
    pub const fn is_paletted(&self) -> bool {
        matches!(self, Self::Pal8)
    }

    /// 计算指定平面每行的字节数
    ///
    /// 格式为 None 或平面索引超出范围时返回 None.
    pub fn plane_linesize(&self, plane: usize, width: u32) -> Option<usize> {
        if plane >= self.plane_count() as usize {
            return None;
        }
        let w = width as usize;
        match self {
            Self::None => None,
            Self::Pal8 | Self::Yuv444p => Some(w),
            Self::Rgb24 => Some(w * 3),
        }
    }

    /// 计算整帧的字节数
    pub fn frame_size(&self, width: u32, height: u32) -> Option<usize> {
        if *self == Self::None {
            return None;
        }
        let mut total = 0usize;
        for plane in 0..self.plane_count() as usize {
            total += self.plane_linesize(plane, width)? * height as usize;
        }
        Some(total)
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::None => "none",
            Self::Pal8 => "pal8",
            Self::Yuv444p => "yuv444p",
            Self::Rgb24 => "rgb24",
        };
        write!(f, "{name}")
    }
}
