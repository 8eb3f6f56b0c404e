//! LCW (format80) 解压.
//!
//! Westwood 的字节级 LZ 变体, 操作码:
//! - `0x80`: 结束
//! - `0b0cccpppp pppppppp`: 从当前位置向前 p 字节复制 c+3 字节
//! - `0b10cccccc`: 直接复制随后 c 字节
//! - `0b11cccccc pppp`: 从输出绝对位置 p 复制 c+3 字节
//! - `0xFE cccc v`: 填充 c 个 v
//! - `0xFF cccc pppp`: 从输出绝对位置 p 复制 c 字节

use lao_core::{ByteReader, LaoError, LaoResult};

fn check_count(dest_index: usize, count: usize, dest_len: usize) -> LaoResult<()> {
    if dest_index + count > dest_len {
        return Err(LaoError::Malformed(format!(
            "LCW 输出越界: 位置 {dest_index} + {count} > {dest_len}"
        )));
    }
    Ok(())
}

fn copy_within(dest: &mut [u8], src_pos: usize, dest_index: usize, count: usize) -> LaoResult<()> {
    if src_pos + count > dest.len() {
        return Err(LaoError::Malformed(format!(
            "LCW 复制源越界: 位置 {src_pos} + {count}"
        )));
    }
    // 源与目标可能重叠, 必须逐字节复制
    for i in 0..count {
        dest[dest_index + i] = dest[src_pos + i];
    }
    Ok(())
}

/// 把 `src` 解压到 `dest`, 返回写入的字节数
///
/// 输出不会超过 `dest` 的长度, 任何越界的引用都报告为 `Malformed`.
pub fn decompress(src: &[u8], dest: &mut [u8]) -> LaoResult<usize> {
    let mut br = ByteReader::new(src);
    let mut dest_index = 0usize;

    while !br.is_empty() {
        let opcode = br.read_u8()?;
        if opcode == 0x80 {
            break;
        }
        if dest_index >= dest.len() {
            return Err(LaoError::Malformed("LCW 输出已满但数据未结束".into()));
        }
        match opcode {
            0xFF => {
                let count = usize::from(br.read_u16_le()?);
                let src_pos = usize::from(br.read_u16_le()?);
                check_count(dest_index, count, dest.len())?;
                copy_within(dest, src_pos, dest_index, count)?;
                dest_index += count;
            }
            0xFE => {
                let count = usize::from(br.read_u16_le()?);
                let color = br.read_u8()?;
                check_count(dest_index, count, dest.len())?;
                dest[dest_index..dest_index + count].fill(color);
                dest_index += count;
            }
            op if op & 0xC0 == 0xC0 => {
                let count = usize::from(op & 0x3F) + 3;
                let src_pos = usize::from(br.read_u16_le()?);
                check_count(dest_index, count, dest.len())?;
                copy_within(dest, src_pos, dest_index, count)?;
                dest_index += count;
            }
            op if op > 0x80 => {
                let count = usize::from(op & 0x3F);
                check_count(dest_index, count, dest.len())?;
                br.read_into(&mut dest[dest_index..dest_index + count])?;
                dest_index += count;
            }
            op => {
                let count = usize::from((op & 0x70) >> 4) + 3;
                let back = usize::from(br.read_u8()?) | (usize::from(op & 0x0F) << 8);
                check_count(dest_index, count, dest.len())?;
                let src_pos = dest_index.checked_sub(back).ok_or_else(|| {
                    LaoError::Malformed(format!("LCW 回溯距离 {back} 超过已输出的 {dest_index} 字节"))
                })?;
                copy_within(dest, src_pos, dest_index, count)?;
                dest_index += count;
            }
        }
    }
    Ok(dest_index)
}
