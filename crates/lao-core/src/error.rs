//! 统一错误类型定义.
//!
//! 解封装与解码共用一套错误分类:
//! - `NotThisFormat`: 签名不匹配, 仅用于格式探测
//! - `Truncated`: 数据在一次必需的读取前结束, 补齐数据后可重试
//! - `Malformed`: 容器或码流内部的计数/偏移自相矛盾, 该实例不可恢复
//! - `InvalidState`: 解码调用顺序错误或缺少关键样本

use thiserror::Error;

/// lao 统一错误类型
#[derive(Debug, Error)]
pub enum LaoError {
    /// 签名不匹配, 不是该格式
    #[error("不是该格式: {0}")]
    NotThisFormat(String),

    /// 数据被截断
    #[error("数据被截断: 需要 {needed} 字节, 剩余 {available} 字节")]
    Truncated {
        /// 本次读取需要的字节数
        needed: usize,
        /// 实际剩余的字节数
        available: usize,
    },

    /// 结构自相矛盾的数据
    #[error("数据格式错误: {0}")]
    Malformed(String),

    /// 解码状态不允许本次调用
    #[error("状态错误: {0}")]
    InvalidState(String),

    /// 定位目标超出数据范围
    #[error("定位越界: 偏移 {offset}, 长度 {len}")]
    OutOfRange {
        /// 请求的绝对偏移
        offset: u64,
        /// 数据总长度
        len: u64,
    },

    /// 已到达流末尾
    #[error("已到达流末尾")]
    Eof,

    /// 无效参数
    #[error("无效参数: {0}")]
    InvalidArgument(String),

    /// 不支持的变体或功能
    #[error("不支持的操作: {0}")]
    Unsupported(String),

    /// I/O 错误
    #[error("I/O 错误: {0}")]
    Io(#[from] std::io::Error),

    /// 未找到指定的编解码器
    #[error("未找到编解码器: {0}")]
    CodecNotFound(String),

    /// 未找到指定的容器格式
    #[error("未找到容器格式: {0}")]
    FormatNotFound(String),

    /// 未找到指定的流
    #[error("未找到流: 索引 {0}")]
    StreamNotFound(usize),
}

impl LaoError {
    /// 构造截断错误
    pub fn truncated(needed: usize, available: usize) -> Self {
        Self::Truncated { needed, available }
    }

    /// 是否可能在补齐数据后恢复
    ///
    /// 只有 `Truncated` 属于这一类, 其余错误对当前实例都是确定的.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Truncated { .. })
    }
}

/// lao 统一 Result 类型
pub type LaoResult<T> = Result<T, LaoError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_仅截断可恢复() {
        assert!(LaoError::truncated(4, 1).is_recoverable());
        assert!(!LaoError::Malformed("块长度".into()).is_recoverable());
        assert!(!LaoError::InvalidState("未解码关键帧".into()).is_recoverable());
        assert!(!LaoError::Eof.is_recoverable());
    }

    #[test]
    fn test_错误信息() {
        let err = LaoError::truncated(8, 3);
        assert_eq!(format!("{err}"), "数据被截断: 需要 8 字节, 剩余 3 字节");
    }
}
