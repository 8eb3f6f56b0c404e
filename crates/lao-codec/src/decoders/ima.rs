//! IMA ADPCM 解码器 (Cryo APC 与 Westwood 变体).
//!
//! 两个变体共用同一个 4 位展开公式 (移位 3), 预测值与步长索引跨样本连续保存,
//! 区别只在字节内半字节的顺序和声道排列:
//! - APC: 高半字节在前; 立体声时高半字节属于左声道, 低半字节属于右声道.
//!   初始预测值来自文件头 (extradata 中两个小端 i32, 截断到 18 位).
//! - Westwood: 低半字节在前, 每个字节的两个采样属于同一声道;
//!   VQA 第 3 版的立体声按声道分成前后两半, 高半字节在前, 解码后再交织.

use log::debug;
use lao_core::{ChannelLayout, LaoError, LaoResult};

use crate::codec_id::CodecId;
use crate::codec_parameters::CodecParameters;
use crate::decoder::Decoder;
use crate::frame::{AudioFrame, Frame};
use crate::interleave::interleave;
use crate::packet::Packet;
use crate::state::{CodecState, DecoderState};

/// 步长索引调整表
pub const INDEX_TABLE: [i8; 16] = [-1, -1, -1, -1, 2, 4, 6, 8, -1, -1, -1, -1, 2, 4, 6, 8];

/// 量化步长表
pub const STEP_TABLE: [u16; 89] = [
    7, 8, 9, 10, 11, 12, 13, 14, 16, 17, 19, 21, 23, 25, 28, 31, 34, 37, 41, 45, 50, 55, 60, 66,
    73, 80, 88, 97, 107, 118, 130, 143, 157, 173, 190, 209, 230, 253, 279, 307, 337, 371, 408,
    449, 494, 544, 598, 658, 724, 796, 876, 963, 1060, 1166, 1282, 1411, 1552, 1707, 1878, 2066,
    2272, 2499, 2749, 3024, 3327, 3660, 4026, 4428, 4871, 5358, 5894, 6484, 7132, 7845, 8630,
    9493, 10442, 11487, 12635, 13899, 15289, 16818, 18500, 20350, 22385, 24623, 27086, 29794,
    32767,
];

/// 单声道的 IMA 预测状态
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImaChannel {
    /// 当前预测值
    pub predictor: i32,
    /// 步长索引 (0..=88)
    pub step_index: u8,
}

impl ImaChannel {
    /// 以给定预测值创建
    pub fn with_predictor(predictor: i32) -> Self {
        Self {
            predictor,
            step_index: 0,
        }
    }

    /// 展开一个 4 位码字, 返回新的采样值
    pub fn expand_nibble(&mut self, nibble: u8) -> i16 {
        let nibble = nibble & 0x0F;
        let step = i32::from(STEP_TABLE[usize::from(self.step_index)]);
        let delta = i32::from(nibble & 7);
        let diff = ((2 * delta + 1) * step) >> 3;
        let predicted = if nibble & 8 != 0 {
            self.predictor - diff
        } else {
            self.predictor + diff
        };
        self.predictor = predicted.clamp(i32::from(i16::MIN), i32::from(i16::MAX));
        let index = i32::from(self.step_index) + i32::from(INDEX_TABLE[usize::from(nibble)]);
        self.step_index = index.clamp(0, 88) as u8;
        self.predictor as i16
    }
}

/// 码流排列方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImaLayout {
    /// Cryo APC
    Apc,
    /// Westwood AUD 与 VQA 第 1/2 版
    Westwood,
    /// VQA 第 3 版 (按声道分半)
    WestwoodPlanar,
}

/// IMA 解码状态
#[derive(Debug, Clone)]
pub struct ImaState {
    layout: ImaLayout,
    sample_rate: u32,
    channel_layout: ChannelLayout,
    channels: [ImaChannel; 2],
}

impl ImaState {
    /// 创建解码状态
    pub fn new(
        layout: ImaLayout,
        sample_rate: u32,
        channel_layout: ChannelLayout,
        predictors: [i32; 2],
    ) -> Self {
        Self {
            layout,
            sample_rate,
            channel_layout,
            channels: predictors.map(ImaChannel::with_predictor),
        }
    }

    /// 指定声道的预测状态
    pub fn channel(&self, ch: usize) -> Option<&ImaChannel> {
        self.channels.get(ch)
    }

    /// 解码一个负载, 返回交错采样
    pub fn decode_payload(&mut self, data: &[u8]) -> LaoResult<Vec<i16>> {
        let nch = self.channel_layout.channels as usize;
        match self.layout {
            ImaLayout::Apc => {
                let st = nch - 1;
                let mut out = Vec::with_capacity(data.len() * 2);
                for &b in data {
                    out.push(self.channels[0].expand_nibble(b >> 4));
                    out.push(self.channels[st].expand_nibble(b & 0x0F));
                }
                Ok(out)
            }
            ImaLayout::Westwood => {
                if data.len() % nch != 0 {
                    return Err(LaoError::Malformed(format!(
                        "IMA 负载 {} 字节不能均分给 {nch} 个声道",
                        data.len()
                    )));
                }
                let mut out = vec![0i16; data.len() * 2];
                for (i, group) in data.chunks_exact(nch).enumerate() {
                    let base = i * 2 * nch;
                    for (ch, &b) in group.iter().enumerate() {
                        out[base + ch] = self.channels[ch].expand_nibble(b & 0x0F);
                        out[base + nch + ch] = self.channels[ch].expand_nibble(b >> 4);
                    }
                }
                Ok(out)
            }
            ImaLayout::WestwoodPlanar => {
                if data.len() % nch != 0 {
                    return Err(LaoError::Malformed(format!(
                        "IMA 负载 {} 字节不能均分给 {nch} 个声道",
                        data.len()
                    )));
                }
                let half = data.len() / nch;
                let mut planes = Vec::with_capacity(nch);
                for (ch, part) in data.chunks_exact(half.max(1)).take(nch).enumerate() {
                    let mut plane = Vec::with_capacity(part.len() * 2);
                    for &b in part {
                        plane.push(self.channels[ch].expand_nibble(b >> 4));
                        plane.push(self.channels[ch].expand_nibble(b & 0x0F));
                    }
                    planes.push(plane);
                }
                if half == 0 {
                    return Ok(Vec::new());
                }
                let refs: Vec<&[i16]> = planes.iter().map(Vec::as_slice).collect();
                interleave(&refs)
            }
        }
    }
}

/// IMA ADPCM 解码器
pub struct ImaDecoder {
    codec_id: CodecId,
}

impl ImaDecoder {
    /// 创建 Westwood 变体解码器
    pub fn new_ws() -> LaoResult<Box<dyn Decoder>> {
        Ok(Box::new(Self {
            codec_id: CodecId::AdpcmImaWs,
        }))
    }

    /// 创建 APC 变体解码器
    pub fn new_apc() -> LaoResult<Box<dyn Decoder>> {
        Ok(Box::new(Self {
            codec_id: CodecId::AdpcmImaApc,
        }))
    }
}

/// 截断到 18 位有符号范围
fn clip_intp2_18(v: i32) -> i32 {
    v.clamp(-(1 << 17), (1 << 17) - 1)
}

impl Decoder for ImaDecoder {
    fn codec_id(&self) -> CodecId {
        self.codec_id
    }

    fn name(&self) -> &str {
        self.codec_id.name()
    }

    fn create_state(&self, params: &CodecParameters) -> LaoResult<DecoderState> {
        let audio = params.require_audio()?;
        let extra = &params.extra_data;
        let (layout, predictors) = if self.codec_id == CodecId::AdpcmImaApc {
            let mut predictors = [0i32; 2];
            if extra.len() >= 8 {
                for (i, p) in predictors.iter_mut().enumerate() {
                    let raw = i32::from_le_bytes([
                        extra[i * 4],
                        extra[i * 4 + 1],
                        extra[i * 4 + 2],
                        extra[i * 4 + 3],
                    ]);
                    *p = clip_intp2_18(raw);
                }
            }
            (ImaLayout::Apc, predictors)
        } else {
            // VQA 把 VQHD 记录作为 extradata, 前两个字节是版本号
            let version = if extra.len() >= 2 {
                u16::from_le_bytes([extra[0], extra[1]])
            } else {
                0
            };
            let layout = if version == 3 {
                ImaLayout::WestwoodPlanar
            } else {
                ImaLayout::Westwood
            };
            (layout, [0, 0])
        };
        debug!(
            "打开 {} 解码器: {:?}, {} Hz, {} 声道",
            self.name(),
            layout,
            audio.sample_rate,
            audio.channel_layout.channels
        );
        Ok(DecoderState::new(CodecState::Ima(ImaState::new(
            layout,
            audio.sample_rate,
            audio.channel_layout,
            predictors,
        ))))
    }

    fn decode_sample(&self, state: &mut CodecState, packet: &Packet) -> LaoResult<Option<Frame>> {
        let CodecState::Ima(st) = state else {
            return Err(state.mismatch(self.codec_id));
        };
        let samples = st.decode_payload(&packet.data)?;
        Ok(Some(Frame::Audio(AudioFrame::from_s16(
            &samples,
            st.sample_rate,
            st.channel_layout,
        ))))
    }
}
