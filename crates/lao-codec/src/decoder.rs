//! 解码器 trait 定义.
//!
//! 解码器本身不保存跨样本的信息: 所有预测值、参考帧、码本与调色板都放在
//! 调用方持有的 [`DecoderState`] 中, 每次调用以 `&mut` 借用.

use lao_core::LaoResult;

use crate::codec_id::CodecId;
use crate::codec_parameters::CodecParameters;
use crate::frame::Frame;
use crate::packet::Packet;
use crate::state::{CodecState, DecoderState};

/// 解码器 trait
///
/// 解码流程:
/// 1. 调用 `create_state()` 按流参数建立初始状态
/// 2. 按解封装顺序对每个样本调用 `decode()`
/// 3. 需要随机访问时调用 `DecoderState::reset()` 并从关键样本重新开始
pub trait Decoder: Send + Sync {
    /// 获取解码器标识
    fn codec_id(&self) -> CodecId;

    /// 获取解码器名称
    fn name(&self) -> &str;

    /// 按流参数创建解码状态
    fn create_state(&self, params: &CodecParameters) -> LaoResult<DecoderState>;

    /// 在编解码状态上解码一个样本的负载
    ///
    /// 只有调色板等状态更新、不产生画面的样本返回 `Ok(None)`.
    fn decode_sample(&self, state: &mut CodecState, packet: &Packet) -> LaoResult<Option<Frame>>;

    /// 按状态机规则解码一个样本
    fn decode(&self, state: &mut DecoderState, packet: &Packet) -> LaoResult<Option<Frame>> {
        state.run(packet, |codec_state, pkt| self.decode_sample(codec_state, pkt))
    }
}
