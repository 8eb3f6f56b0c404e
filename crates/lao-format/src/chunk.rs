//! 块模型.
//!
//! 这些容器都由 "标签 + 长度 + 数据" 的块组成, 标签与长度的编码各不相同.
//! 这里统一长度字段的可信度判断:
//! - 声明长度超过该格式的合理上限 (文件头声明的大小或由头部推出的最大值):
//!   长度字段本身不可信, 返回 `Malformed`, 并把读取位置移过声明范围
//! - 长度合理但数据不足: 返回 `Truncated`, 读取位置不变, 补齐数据后可重试

use lao_core::{LaoError, LaoResult};
use log::warn;

use crate::io::IoContext;

/// 检查声明长度是否在合理上限之内
pub fn check_length(declared: u64, bound: u64, what: &str) -> LaoResult<()> {
    if declared > bound {
        return Err(LaoError::Malformed(format!(
            "{what} 声明长度 {declared} 超过上限 {bound}"
        )));
    }
    Ok(())
}

/// 读取一个块的数据
///
/// 长度不可信时把读取位置移到声明范围之后 (最多到末尾) 再返回 `Malformed`,
/// 之后的调用可以安全地继续.
pub fn read_payload(io: &mut IoContext, declared: u64, bound: u64, what: &str) -> LaoResult<Vec<u8>> {
    if let Err(e) = check_length(declared, bound, what) {
        warn!("{e}, 跳过该块");
        let end = io.position().saturating_add(declared).min(io.size());
        io.seek(end)?;
        return Err(e);
    }
    io.read_bytes(declared as usize)
}

/// 跳过一个块的数据, 长度判断与 [`read_payload`] 相同
pub fn skip_payload(io: &mut IoContext, declared: u64, bound: u64, what: &str) -> LaoResult<()> {
    if let Err(e) = check_length(declared, bound, what) {
        warn!("{e}, 跳过该块");
        let end = io.position().saturating_add(declared).min(io.size());
        io.seek(end)?;
        return Err(e);
    }
    io.skip(declared)
}

/// 在块边界上判断是否读完: 没有剩余数据时返回 `Eof`
pub fn ensure_more(io: &IoContext) -> LaoResult<()> {
    if io.is_eof() {
        return Err(LaoError::Eof);
    }
    Ok(())
}

/// 错误为 `Truncated` 时把读取位置退回 `start`, 其他错误原样返回
pub fn rewind_if_truncated(io: &mut IoContext, start: u64, err: LaoError) -> LaoError {
    if matches!(err, LaoError::Truncated { .. }) {
        if let Err(seek_err) = io.seek(start) {
            return seek_err;
        }
    }
    err
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_合理长度() {
        assert!(check_length(16, 16, "测试块").is_ok());
        assert!(matches!(
            check_length(17, 16, "测试块"),
            Err(LaoError::Malformed(_))
        ));
    }

    #[test]
    fn test_长度不可信时跳到末尾() {
        let mut io = IoContext::from_memory(vec![0u8; 10]);
        io.skip(2).unwrap();
        let err = read_payload(&mut io, 0xFFFF_FFFF, 1024, "测试块").unwrap_err();
        assert!(matches!(err, LaoError::Malformed(_)));
        assert!(io.is_eof());
        assert!(matches!(ensure_more(&io), Err(LaoError::Eof)));
    }

    #[test]
    fn test_数据不足为截断() {
        let mut io = IoContext::from_memory(vec![0u8; 10]);
        let err = read_payload(&mut io, 20, 1024, "测试块").unwrap_err();
        assert!(matches!(err, LaoError::Truncated { .. }));
        assert_eq!(io.position(), 0);
    }
}
