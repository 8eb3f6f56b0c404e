//! 编解码器注册表.
//!
//! 按 CodecId 查找解码器工厂并创建实例.

use std::collections::HashMap;

use lao_core::{LaoError, LaoResult};

use crate::codec_id::CodecId;
use crate::decoder::Decoder;

/// 解码器工厂函数类型
pub type DecoderFactory = fn() -> LaoResult<Box<dyn Decoder>>;

/// 编解码器注册表
///
/// 管理所有已注册的解码器, 支持按 CodecId 查找并创建实例.
pub struct CodecRegistry {
    /// 解码器工厂映射
    decoders: HashMap<CodecId, Vec<DecoderEntry>>,
}

/// 解码器注册条目
struct DecoderEntry {
    /// 解码器名称
    name: String,
    /// 工厂函数
    factory: DecoderFactory,
}

impl CodecRegistry {
    /// 创建空的注册表
    pub fn new() -> Self {
        Self {
            decoders: HashMap::new(),
        }
    }

    /// 注册一个解码器
    pub fn register_decoder(
        &mut self,
        codec_id: CodecId,
        name: impl Into<String>,
        factory: DecoderFactory,
    ) {
        self.decoders
            .entry(codec_id)
            .or_default()
            .push(DecoderEntry {
                name: name.into(),
                factory,
            });
    }

    /// 创建指定编解码器 ID 的解码器实例
    pub fn create_decoder(&self, codec_id: CodecId) -> LaoResult<Box<dyn Decoder>> {
        let entry = self
            .decoders
            .get(&codec_id)
            .and_then(|entries| entries.first())
            .ok_or_else(|| LaoError::CodecNotFound(format!("未找到 {} 的解码器", codec_id)))?;
        // 使用第一个注册的解码器 (优先级最高)
        (entry.factory)()
    }

    /// 是否注册了指定编解码器的解码器
    pub fn has_decoder(&self, codec_id: CodecId) -> bool {
        self.decoders.contains_key(&codec_id)
    }

    /// 获取所有已注册的解码器名称
    pub fn list_decoders(&self) -> Vec<(CodecId, &str)> {
        let mut result = Vec::new();
        for (id, entries) in &self.decoders {
            for entry in entries {
                result.push((*id, entry.name.as_str()));
            }
        }
        result.sort_by(|a, b| a.1.cmp(b.1));
        result
    }
}

impl Default for CodecRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_注册所有解码器() {
        let mut registry = CodecRegistry::new();
        crate::register_all(&mut registry);

        // FstVideo 与 H263 没有解码器, 其余各一个
        let decoders = registry.list_decoders();
        assert_eq!(decoders.len(), CodecId::ALL.len() - 2);
        assert!(!registry.has_decoder(CodecId::FstVideo));
        assert!(!registry.has_decoder(CodecId::H263));
    }

    #[test]
    fn test_按codec_id创建解码器() {
        let mut registry = CodecRegistry::new();
        crate::register_all(&mut registry);

        for &id in CodecId::ALL {
            if matches!(id, CodecId::FstVideo | CodecId::H263) {
                continue;
            }
            let dec = registry.create_decoder(id);
            assert!(dec.is_ok(), "创建 {} 解码器失败", id);
            assert_eq!(dec.unwrap().codec_id(), id);
        }
    }

    #[test]
    fn test_未注册的编解码器返回错误() {
        let registry = CodecRegistry::new();
        assert!(matches!(
            registry.create_decoder(CodecId::RoqVideo),
            Err(LaoError::CodecNotFound(_))
        ));
    }
}
