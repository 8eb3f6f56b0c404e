//! Westwood SND1 音频解码器.
//!
//! 每个负载以 `out_size, in_size` (小端 u16) 开头. 两者相等时其余字节就是
//! 无符号 8 位 PCM; 否则是一串操作码, 从 128 开始累加, 结果饱和到 0..=255:
//! - 0: 2 位 ADPCM, `count+1` 字节, 每字节 4 个采样
//! - 1: 4 位 ADPCM, `count+1` 字节, 每字节 2 个采样 (低半字节在前)
//! - 2: `count & 0x20` 时为 5 位有符号大差分, 否则原样拷贝 `count+1` 字节
//! - 3: 将当前值重复 `count+1` 次

use log::debug;
use lao_core::{ChannelLayout, LaoError, LaoResult};

use crate::codec_id::CodecId;
use crate::codec_parameters::CodecParameters;
use crate::decoder::Decoder;
use crate::frame::{AudioFrame, Frame};
use crate::packet::Packet;
use crate::state::{CodecState, DecoderState};

const ADPCM_2BIT: [i32; 4] = [-2, -1, 2, 1];
const ADPCM_4BIT: [i32; 16] = [-9, -8, -6, -5, -4, -3, -2, -1, 0, 1, 2, 3, 4, 5, 6, 8];

/// SND1 解码状态 (只有配置)
#[derive(Debug, Clone)]
pub struct Snd1State {
    sample_rate: u32,
}

/// 解码一个 SND1 负载
pub fn decode_snd1(data: &[u8]) -> LaoResult<Vec<u8>> {
    if data.len() < 4 {
        return Err(LaoError::truncated(4, data.len()));
    }
    let out_size = usize::from(u16::from_le_bytes([data[0], data[1]]));
    let in_size = usize::from(u16::from_le_bytes([data[2], data[3]]));
    let body = &data[4..];
    if in_size > body.len() {
        return Err(LaoError::Malformed(format!(
            "SND1 压缩长度 {in_size} 超过负载剩余 {}",
            body.len()
        )));
    }
    if in_size == out_size {
        return Ok(body[..out_size].to_vec());
    }

    let body = &body[..in_size];
    let mut out = Vec::with_capacity(out_size);
    let mut sample: i32 = 128;
    let mut pos = 0usize;
    let push = |out: &mut Vec<u8>, sample: &mut i32, delta: i32| {
        *sample = (*sample + delta).clamp(0, 255);
        out.push(*sample as u8);
    };

    while out.len() < out_size && pos < body.len() {
        let op = body[pos];
        pos += 1;
        let code = op >> 6;
        let count = usize::from(op & 0x3F);
        let produced = match code {
            0 => 4 * (count + 1),
            1 => 2 * (count + 1),
            2 if count & 0x20 != 0 => 1,
            _ => count + 1,
        };
        if out_size - out.len() < produced {
            break;
        }
        let consumed = if (code == 2 && count & 0x20 != 0) || code == 3 {
            0
        } else {
            count + 1
        };
        if pos + consumed > body.len() {
            break;
        }
        match code {
            0 => {
                for &b in &body[pos..pos + consumed] {
                    for shift in [0, 2, 4, 6] {
                        push(&mut out, &mut sample, ADPCM_2BIT[usize::from((b >> shift) & 3)]);
                    }
                }
            }
            1 => {
                for &b in &body[pos..pos + consumed] {
                    push(&mut out, &mut sample, ADPCM_4BIT[usize::from(b & 0x0F)]);
                    push(&mut out, &mut sample, ADPCM_4BIT[usize::from(b >> 4)]);
                }
            }
            2 if count & 0x20 != 0 => {
                // 低 5 位按有符号数扩展
                let delta = i32::from(((count as u8) << 3) as i8 >> 3);
                push(&mut out, &mut sample, delta);
            }
            2 => {
                let raw = &body[pos..pos + consumed];
                out.extend_from_slice(raw);
                sample = i32::from(raw[raw.len() - 1]);
            }
            _ => {
                out.resize(out.len() + produced, sample as u8);
            }
        }
        pos += consumed;
    }

    if out.len() < out_size {
        debug!("SND1 码流提前结束: 输出 {} / {}", out.len(), out_size);
        out.resize(out_size, sample as u8);
    }
    Ok(out)
}

/// Westwood SND1 解码器
pub struct Snd1Decoder;

impl Snd1Decoder {
    pub fn create() -> LaoResult<Box<dyn Decoder>> {
        Ok(Box::new(Self))
    }
}

impl Decoder for Snd1Decoder {
    fn codec_id(&self) -> CodecId {
        CodecId::WestwoodSnd1
    }

    fn name(&self) -> &str {
        "westwood_snd1"
    }

    fn create_state(&self, params: &CodecParameters) -> LaoResult<DecoderState> {
        let audio = params.require_audio()?;
        if audio.channel_layout.channels != 1 {
            return Err(LaoError::Unsupported("SND1 只支持单声道".into()));
        }
        Ok(DecoderState::new(CodecState::Snd1(Snd1State {
            sample_rate: audio.sample_rate,
        })))
    }

    fn decode_sample(&self, state: &mut CodecState, packet: &Packet) -> LaoResult<Option<Frame>> {
        let CodecState::Snd1(st) = state else {
            return Err(state.mismatch(CodecId::WestwoodSnd1));
        };
        let samples = decode_snd1(&packet.data)?;
        Ok(Some(Frame::Audio(AudioFrame::from_u8(
            samples,
            st.sample_rate,
            ChannelLayout::MONO,
        ))))
    }
}
