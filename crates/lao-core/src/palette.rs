//! 256 色调色板.
//!
//! 游戏视频里的调色板大多是 VGA 的 6 位分量, 写入时展开为 8 位.

use crate::{LaoError, LaoResult};

/// 调色板条目数
pub const PALETTE_SIZE: usize = 256;

/// 将 VGA 6 位分量展开为 8 位
#[inline]
pub const fn vga6_to_8(v: u8) -> u8 {
    let v = v & 0x3F;
    (v << 2) | (v >> 4)
}

/// 256 色 RGB 调色板
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Palette {
    entries: [[u8; 3]; PALETTE_SIZE],
}

impl Default for Palette {
    fn default() -> Self {
        Self::new()
    }
}

impl Palette {
    /// 全黑调色板
    pub const fn new() -> Self {
        Self {
            entries: [[0; 3]; PALETTE_SIZE],
        }
    }

    /// 读取一个条目
    pub fn get(&self, index: u8) -> [u8; 3] {
        self.entries[usize::from(index)]
    }

    /// 设置一个条目
    pub fn set(&mut self, index: u8, rgb: [u8; 3]) {
        self.entries[usize::from(index)] = rgb;
    }

    /// 全部条目
    pub fn entries(&self) -> &[[u8; 3]; PALETTE_SIZE] {
        &self.entries
    }

    /// 从 `start` 开始用 RGB 三元组覆盖一段连续条目
    ///
    /// `vga6` 为真时分量按 6 位展开. 越过 256 项时返回 `Malformed`, 调色板不变.
    pub fn update_range(&mut self, start: usize, rgb: &[u8], vga6: bool) -> LaoResult<()> {
        let count = rgb.len() / 3;
        if start + count > PALETTE_SIZE {
            return Err(LaoError::Malformed(format!(
                "调色板更新越界: 起始 {start}, 数量 {count}"
            )));
        }
        for (i, c) in rgb.chunks_exact(3).enumerate() {
            self.entries[start + i] = if vga6 {
                [vga6_to_8(c[0]), vga6_to_8(c[1]), vga6_to_8(c[2])]
            } else {
                [c[0], c[1], c[2]]
            };
        }
        Ok(())
    }

    /// 把索引像素展开为 RGB24
    pub fn expand(&self, indices: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(indices.len() * 3);
        for &i in indices {
            out.extend_from_slice(&self.entries[usize::from(i)]);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vga6_展开() {
        assert_eq!(vga6_to_8(0x3F), 0xFF);
        assert_eq!(vga6_to_8(0), 0);
        assert_eq!(vga6_to_8(0x20), 0x82);
    }

    #[test]
    fn test_部分更新只影响指定范围() {
        let mut pal = Palette::new();
        pal.update_range(10, &[1, 2, 3, 4, 5, 6], false).unwrap();
        assert_eq!(pal.get(9), [0, 0, 0]);
        assert_eq!(pal.get(10), [1, 2, 3]);
        assert_eq!(pal.get(11), [4, 5, 6]);
        assert_eq!(pal.get(12), [0, 0, 0]);
    }

    #[test]
    fn test_越界更新被拒绝() {
        let mut pal = Palette::new();
        let rgb = [0x3Fu8; 6];
        assert!(matches!(
            pal.update_range(255, &rgb, true),
            Err(LaoError::Malformed(_))
        ));
        assert_eq!(pal, Palette::new());
    }

    #[test]
    fn test_索引展开() {
        let mut pal = Palette::new();
        pal.set(1, [10, 20, 30]);
        assert_eq!(pal.expand(&[1, 0]), vec![10, 20, 30, 0, 0, 0]);
    }
}
