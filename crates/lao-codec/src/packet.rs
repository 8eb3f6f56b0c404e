//! 压缩数据包 (Packet).
//!
//! 解封装器每次产出一个数据包, 对应一个可独立送入解码器的样本.

use bytes::Bytes;
use lao_core::Rational;
use lao_core::timestamp::{NOPTS_VALUE, Timestamp};

/// 压缩数据包
///
/// 负载原样保存容器中的压缩数据 (个别格式会保留块头, 见各解封装器说明).
/// `pts` 与 `duration` 以容器统一时钟 `time_base` 为单位.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// 压缩数据
    pub data: Bytes,
    /// 显示时间戳 (PTS)
    pub pts: i64,
    /// 解码时间戳 (DTS), 这些格式没有重排序, 与 PTS 相同
    pub dts: i64,
    /// 数据包时长 (以 time_base 为单位)
    pub duration: i64,
    /// 时间基
    pub time_base: Rational,
    /// 所属流的索引
    pub stream_index: usize,
    /// 是否可以从这里开始解码
    pub is_keyframe: bool,
    /// 在容器中的字节偏移量 (-1 表示未知)
    pub pos: i64,
}

impl Packet {
    /// 创建空数据包
    pub fn empty() -> Self {
        Self {
            data: Bytes::new(),
            pts: NOPTS_VALUE,
            dts: NOPTS_VALUE,
            duration: 0,
            time_base: Rational::UNDEFINED,
            stream_index: 0,
            is_keyframe: false,
            pos: -1,
        }
    }

    /// 从数据创建数据包
    pub fn from_data(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            ..Self::empty()
        }
    }

    /// 从数据创建关键数据包
    pub fn key(data: impl Into<Bytes>) -> Self {
        Self {
            is_keyframe: true,
            ..Self::from_data(data)
        }
    }

    /// 数据大小 (字节)
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// 是否为零长度数据包
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// 显示时间戳
    pub fn timestamp(&self) -> Timestamp {
        Timestamp::new(self.pts, self.time_base)
    }
}
