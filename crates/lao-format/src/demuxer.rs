//! 解封装器 (Demuxer) trait 定义.
//!
//! 定义了从容器中按物理顺序读取样本的接口.

use lao_codec::Packet;
use lao_core::{LaoError, LaoResult};

use crate::format_id::FormatId;
use crate::io::IoContext;
use crate::stream::Stream;

/// 解封装器 trait
///
/// 所有格式的解封装器都实现此 trait.
///
/// 使用流程:
/// 1. 调用 `open()` 校验签名并解析头部
/// 2. 调用 `streams()` 获取流信息
/// 3. 循环调用 `read_packet()` 读取数据包, 直到返回 `Eof`
///
/// 读取只能向前进行, 重新读取需要重新 `open()`.
pub trait Demuxer: Send {
    /// 获取格式标识
    fn format_id(&self) -> FormatId;

    /// 获取格式名称
    fn name(&self) -> &str;

    /// 打开容器并解析头部信息
    ///
    /// 签名不符时尽早返回 `NotThisFormat`.
    fn open(&mut self, io: &mut IoContext) -> LaoResult<()>;

    /// 获取所有流信息
    fn streams(&self) -> &[Stream];

    /// 读取下一个数据包
    ///
    /// # 返回
    /// - `Ok(packet)`: 成功读取一个数据包
    /// - `Err(LaoError::Eof)`: 已到达容器末尾
    /// - `Err(LaoError::Truncated)`: 数据在块中途结束
    /// - `Err(LaoError::Malformed)`: 块长度不可信, 已跳过该块
    fn read_packet(&mut self, io: &mut IoContext) -> LaoResult<Packet>;

    /// 获取容器时长 (秒), None 表示未知
    fn duration(&self) -> Option<f64>;

    /// 获取容器元数据
    fn metadata(&self) -> &[(String, String)] {
        &[]
    }
}

/// 读取并校验签名
///
/// 已有字节与签名不符时返回 `NotThisFormat`; 字节是签名的前缀但不完整时返回 `Truncated`.
pub(crate) fn read_signature(io: &mut IoContext, expected: &[u8], format: &str) -> LaoResult<()> {
    let found = io.peek_bytes(expected.len())?;
    if found[..] != expected[..found.len()] {
        return Err(LaoError::NotThisFormat(format!("{format} 签名不匹配")));
    }
    if found.len() < expected.len() {
        return Err(LaoError::truncated(expected.len(), found.len()));
    }
    io.skip(expected.len() as u64)
}
