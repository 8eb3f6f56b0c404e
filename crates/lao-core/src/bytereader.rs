//! 字节游标.
//!
//! 在内存切片上按字节读取定宽整数, 大小端由调用方按格式选择.
//! 所有读取要么完整返回, 要么以 `Truncated` 失败且不移动位置.

use crate::{LaoError, LaoResult};

/// 切片上的字节游标
#[derive(Debug, Clone)]
pub struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

macro_rules! read_int {
    ($name:ident, $peek:ident, $ty:ty, $n:expr, $conv:ident) => {
        /// 读取定宽整数
        pub fn $name(&mut self) -> LaoResult<$ty> {
            let v = self.$peek()?;
            self.pos += $n;
            Ok(v)
        }

        /// 窥视定宽整数 (不移动位置)
        pub fn $peek(&self) -> LaoResult<$ty> {
            let bytes = self.peek_bytes($n)?;
            let mut buf = [0u8; $n];
            buf.copy_from_slice(bytes);
            Ok(<$ty>::$conv(buf))
        }
    };
}

impl<'a> ByteReader<'a> {
    /// 创建新的字节游标
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// 当前位置
    pub fn position(&self) -> usize {
        self.pos
    }

    /// 数据总长度
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// 剩余字节数
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// 是否已读完
    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    fn peek_bytes(&self, n: usize) -> LaoResult<&'a [u8]> {
        let available = self.remaining();
        if n > available {
            return Err(LaoError::truncated(n, available));
        }
        Ok(&self.data[self.pos..self.pos + n])
    }

    /// 读取 n 个字节
    pub fn read_bytes(&mut self, n: usize) -> LaoResult<&'a [u8]> {
        let bytes = self.peek_bytes(n)?;
        self.pos += n;
        Ok(bytes)
    }

    /// 读取到目标缓冲区, 长度由缓冲区决定
    pub fn read_into(&mut self, dst: &mut [u8]) -> LaoResult<()> {
        let bytes = self.read_bytes(dst.len())?;
        dst.copy_from_slice(bytes);
        Ok(())
    }

    /// 读取剩余的全部字节
    pub fn read_rest(&mut self) -> &'a [u8] {
        let rest = &self.data[self.pos..];
        self.pos = self.data.len();
        rest
    }

    /// 跳过 n 个字节
    pub fn skip(&mut self, n: usize) -> LaoResult<()> {
        self.read_bytes(n).map(|_| ())
    }

    /// 定位到绝对偏移
    pub fn seek(&mut self, offset: usize) -> LaoResult<()> {
        if offset > self.data.len() {
            return Err(LaoError::OutOfRange {
                offset: offset as u64,
                len: self.data.len() as u64,
            });
        }
        self.pos = offset;
        Ok(())
    }

    /// 截取接下来的 n 个字节作为独立游标, 本游标跳过它们
    pub fn sub_reader(&mut self, n: usize) -> LaoResult<ByteReader<'a>> {
        Ok(ByteReader::new(self.read_bytes(n)?))
    }

    /// 读取 u8
    pub fn read_u8(&mut self) -> LaoResult<u8> {
        let v = self.peek_u8()?;
        self.pos += 1;
        Ok(v)
    }

    /// 窥视 u8
    pub fn peek_u8(&self) -> LaoResult<u8> {
        Ok(self.peek_bytes(1)?[0])
    }

    /// 读取 i8
    pub fn read_i8(&mut self) -> LaoResult<i8> {
        Ok(self.read_u8()? as i8)
    }

    read_int!(read_u16_le, peek_u16_le, u16, 2, from_le_bytes);
    read_int!(read_u16_be, peek_u16_be, u16, 2, from_be_bytes);
    read_int!(read_u32_le, peek_u32_le, u32, 4, from_le_bytes);
    read_int!(read_u32_be, peek_u32_be, u32, 4, from_be_bytes);
    read_int!(read_u64_le, peek_u64_le, u64, 8, from_le_bytes);

    /// 读取 24 位小端整数
    pub fn read_u24_le(&mut self) -> LaoResult<u32> {
        let b = self.read_bytes(3)?;
        Ok(u32::from(b[0]) | (u32::from(b[1]) << 8) | (u32::from(b[2]) << 16))
    }

    /// 读取 24 位大端整数
    pub fn read_u24_be(&mut self) -> LaoResult<u32> {
        let b = self.read_bytes(3)?;
        Ok((u32::from(b[0]) << 16) | (u32::from(b[1]) << 8) | u32::from(b[2]))
    }
}
