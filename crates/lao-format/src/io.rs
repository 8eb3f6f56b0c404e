//! I/O 抽象层.
//!
//! 为解封装器提供统一的读取接口, 数据来自内存缓冲或宿主提供的可定位读取器.
//! 核心库本身不访问文件系统, 字节来源由调用方负责.
//!
//! 所有读取要么完整返回, 要么以 `Truncated` 失败且不移动读取位置.

use std::io::{self, Read, Seek, SeekFrom};

use lao_core::{LaoError, LaoResult};

/// I/O 后端 trait
///
/// 后端必须能报告总长度, 解封装器据此区分 "数据被截断" 与 "长度字段不可信".
pub trait IoBackend: Send {
    /// 读取数据到缓冲区, 返回实际读取的字节数
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
    /// 定位到绝对偏移
    fn seek(&mut self, pos: u64) -> io::Result<u64>;
    /// 数据总长度
    fn size(&self) -> u64;
}

/// I/O 上下文
///
/// 封装底层后端, 跟踪读取位置.
pub struct IoContext {
    /// 内部 I/O 实现
    inner: Box<dyn IoBackend>,
    /// 当前位置
    pos: u64,
    /// 总长度
    size: u64,
}

impl IoContext {
    /// 从 I/O 后端创建上下文
    pub fn new(backend: Box<dyn IoBackend>) -> Self {
        let size = backend.size();
        Self {
            inner: backend,
            pos: 0,
            size,
        }
    }

    /// 从内存数据创建
    pub fn from_memory(data: impl Into<Vec<u8>>) -> Self {
        Self::new(Box::new(MemoryBackend::from_data(data.into())))
    }

    /// 从任意可定位读取器创建
    pub fn from_reader<R: Read + Seek + Send + 'static>(reader: R) -> LaoResult<Self> {
        Ok(Self::new(Box::new(ReaderBackend::new(reader)?)))
    }

    // ========================
    // 读取方法
    // ========================

    /// 读满缓冲区
    pub fn read_exact(&mut self, buf: &mut [u8]) -> LaoResult<()> {
        let available = self.remaining();
        if (buf.len() as u64) > available {
            return Err(LaoError::truncated(buf.len(), available as usize));
        }
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.inner.read(&mut buf[filled..])?;
            if n == 0 {
                // 后端报告的长度与实际不符, 回到读取前的位置
                self.inner.seek(self.pos)?;
                return Err(LaoError::truncated(buf.len(), filled));
            }
            filled += n;
        }
        self.pos += buf.len() as u64;
        Ok(())
    }

    /// 读取 1 个字节
    pub fn read_u8(&mut self) -> LaoResult<u8> {
        let mut buf = [0u8; 1];
        self.read_exact(&mut buf)?;
        Ok(buf[0])
    }

    /// 读取 u16 小端
    pub fn read_u16_le(&mut self) -> LaoResult<u16> {
        let mut buf = [0u8; 2];
        self.read_exact(&mut buf)?;
        Ok(u16::from_le_bytes(buf))
    }

    /// 读取 i16 小端
    pub fn read_i16_le(&mut self) -> LaoResult<i16> {
        let mut buf = [0u8; 2];
        self.read_exact(&mut buf)?;
        Ok(i16::from_le_bytes(buf))
    }

    /// 读取 u24 小端
    pub fn read_u24_le(&mut self) -> LaoResult<u32> {
        let mut buf = [0u8; 3];
        self.read_exact(&mut buf)?;
        Ok(u32::from(buf[0]) | (u32::from(buf[1]) << 8) | (u32::from(buf[2]) << 16))
    }

    /// 读取 u32 小端
    pub fn read_u32_le(&mut self) -> LaoResult<u32> {
        let mut buf = [0u8; 4];
        self.read_exact(&mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    /// 读取 i32 小端
    pub fn read_i32_le(&mut self) -> LaoResult<i32> {
        let mut buf = [0u8; 4];
        self.read_exact(&mut buf)?;
        Ok(i32::from_le_bytes(buf))
    }

    /// 读取 u16 大端
    pub fn read_u16_be(&mut self) -> LaoResult<u16> {
        let mut buf = [0u8; 2];
        self.read_exact(&mut buf)?;
        Ok(u16::from_be_bytes(buf))
    }

    /// 读取 u32 大端
    pub fn read_u32_be(&mut self) -> LaoResult<u32> {
        let mut buf = [0u8; 4];
        self.read_exact(&mut buf)?;
        Ok(u32::from_be_bytes(buf))
    }

    /// 读取 4 字节标签 (FourCC)
    pub fn read_tag(&mut self) -> LaoResult<[u8; 4]> {
        let mut buf = [0u8; 4];
        self.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// 读取指定数量的字节
    pub fn read_bytes(&mut self, count: usize) -> LaoResult<Vec<u8>> {
        let available = self.remaining();
        if (count as u64) > available {
            return Err(LaoError::truncated(count, available as usize));
        }
        let mut buf = vec![0u8; count];
        self.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// 读取至多 `count` 个字节后回到原位置
    pub fn peek_bytes(&mut self, count: usize) -> LaoResult<Vec<u8>> {
        let n = (count as u64).min(self.remaining()) as usize;
        let start = self.pos;
        let data = self.read_bytes(n)?;
        self.seek(start)?;
        Ok(data)
    }

    /// 跳过指定字节数
    pub fn skip(&mut self, count: u64) -> LaoResult<()> {
        let available = self.remaining();
        if count > available {
            return Err(LaoError::truncated(
                count.min(usize::MAX as u64) as usize,
                available as usize,
            ));
        }
        self.seek(self.pos + count)
    }

    // ========================
    // 定位方法
    // ========================

    /// 定位到绝对偏移, 允许定位到末尾
    pub fn seek(&mut self, pos: u64) -> LaoResult<()> {
        if pos > self.size {
            return Err(LaoError::OutOfRange {
                offset: pos,
                len: self.size,
            });
        }
        self.inner.seek(pos)?;
        self.pos = pos;
        Ok(())
    }

    /// 当前位置
    pub fn position(&self) -> u64 {
        self.pos
    }

    /// 总长度
    pub fn size(&self) -> u64 {
        self.size
    }

    /// 剩余字节数
    pub fn remaining(&self) -> u64 {
        self.size.saturating_sub(self.pos)
    }

    /// 是否已读到末尾
    pub fn is_eof(&self) -> bool {
        self.remaining() == 0
    }
}

/// 内存缓冲区 I/O 后端
pub struct MemoryBackend {
    /// 数据缓冲区
    data: Vec<u8>,
    /// 当前位置
    pos: usize,
}

impl MemoryBackend {
    /// 从已有数据创建
    pub fn from_data(data: Vec<u8>) -> Self {
        Self { data, pos: 0 }
    }

    /// 获取内部数据的引用
    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

impl IoBackend for MemoryBackend {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let available = self.data.len().saturating_sub(self.pos);
        let n = buf.len().min(available);
        buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }

    fn seek(&mut self, pos: u64) -> io::Result<u64> {
        self.pos = usize::try_from(pos)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "偏移超出地址范围"))?;
        Ok(pos)
    }

    fn size(&self) -> u64 {
        self.data.len() as u64
    }
}

/// 可定位读取器后端
///
/// 包装宿主提供的 `Read + Seek` (例如已打开的文件), 创建时定位到末尾求出总长度.
pub struct ReaderBackend<R> {
    reader: R,
    size: u64,
}

impl<R: Read + Seek> ReaderBackend<R> {
    /// 包装读取器
    pub fn new(mut reader: R) -> io::Result<Self> {
        let size = reader.seek(SeekFrom::End(0))?;
        reader.seek(SeekFrom::Start(0))?;
        Ok(Self { reader, size })
    }
}

impl<R: Read + Seek + Send> IoBackend for ReaderBackend<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reader.read(buf)
    }

    fn seek(&mut self, pos: u64) -> io::Result<u64> {
        self.reader.seek(SeekFrom::Start(pos))
    }

    fn size(&self) -> u64 {
        self.size
    }
}
