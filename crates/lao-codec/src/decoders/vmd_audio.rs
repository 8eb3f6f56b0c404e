//! Sierra VMD 音频解码器.
//!
//! 负载 = 帧记录的后 10 字节 + 音频数据, 首字节是块类型:
//! 1 为普通块, 2 为文件开头的预载块 (随后是 32 位静音掩码, 可以包含多个块),
//! 3 为一个静音块.
//!
//! 8 位流是原样的无符号 PCM; 16 位流每块先有各声道的小端初始值,
//! 之后每字节查表得到差分 (最高位为符号), 声道交替.

use lao_core::{ByteReader, ChannelLayout, LaoError, LaoResult};

use crate::codec_id::CodecId;
use crate::codec_parameters::CodecParameters;
use crate::decoder::Decoder;
use crate::frame::{AudioFrame, Frame};
use crate::packet::Packet;
use crate::state::{CodecState, DecoderState};

const SOL_AUD_STEPS16: [i16; 128] = [
    0x00, 0x08, 0x10, 0x20, 0x30, 0x40, 0x50, 0x60, 0x70, 0x80, 0x90, 0xA0, 0xB0, 0xC0, 0xD0,
    0xE0, 0xF0, 0x100, 0x110, 0x120, 0x130, 0x140, 0x150, 0x160, 0x170, 0x180, 0x190, 0x1A0,
    0x1B0, 0x1C0, 0x1D0, 0x1E0, 0x1F0, 0x200, 0x208, 0x210, 0x218, 0x220, 0x228, 0x230, 0x238,
    0x240, 0x248, 0x250, 0x258, 0x260, 0x268, 0x270, 0x278, 0x280, 0x288, 0x290, 0x298, 0x2A0,
    0x2A8, 0x2B0, 0x2B8, 0x2C0, 0x2C8, 0x2D0, 0x2D8, 0x2E0, 0x2E8, 0x2F0, 0x2F8, 0x300, 0x308,
    0x310, 0x318, 0x320, 0x328, 0x330, 0x338, 0x340, 0x348, 0x350, 0x358, 0x360, 0x368, 0x370,
    0x378, 0x380, 0x388, 0x390, 0x398, 0x3A0, 0x3A8, 0x3B0, 0x3B8, 0x3C0, 0x3C8, 0x3D0, 0x3D8,
    0x3E0, 0x3E8, 0x3F0, 0x3F8, 0x400, 0x440, 0x480, 0x4C0, 0x500, 0x540, 0x580, 0x5C0, 0x600,
    0x640, 0x680, 0x6C0, 0x700, 0x740, 0x780, 0x7C0, 0x800, 0x900, 0xA00, 0xB00, 0xC00, 0xD00,
    0xE00, 0xF00, 0x1000, 0x1400, 0x1800, 0x1C00, 0x2000, 0x3000, 0x4000,
];

/// 块类型
const BLOCK_AUDIO: u8 = 1;
const BLOCK_INITIAL: u8 = 2;
const BLOCK_SILENCE: u8 = 3;

/// 负载中块类型之后、音频数据之前的字节数
const RECORD_TAIL: usize = 10;

fn pred16(pred: i32, val: u8) -> i32 {
    let step = i32::from(SOL_AUD_STEPS16[usize::from(val & 0x7F)]);
    let p = if val & 0x80 != 0 { pred - step } else { pred + step };
    p.clamp(i32::from(i16::MIN), i32::from(i16::MAX))
}

/// VMD 音频解码状态 (只有配置, 每个块自带初始值)
#[derive(Debug, Clone)]
pub struct VmdAudioState {
    sample_rate: u32,
    channel_layout: ChannelLayout,
    bits16: bool,
    /// 每块的采样总数 (所有声道)
    block_samples: usize,
}

impl VmdAudioState {
    fn block_bytes(&self) -> usize {
        if self.bits16 {
            self.block_samples + self.channel_layout.channels as usize
        } else {
            self.block_samples
        }
    }

    fn decode_block16(&self, br: &mut ByteReader<'_>, out: &mut Vec<i16>) -> LaoResult<()> {
        let channels = self.channel_layout.channels as usize;
        let mut pred = [0i32; 2];
        for p in pred.iter_mut().take(channels) {
            let v = br.read_u16_le()? as i16;
            *p = i32::from(v);
            out.push(v);
        }
        let mut ch = 0;
        for _ in channels..self.block_samples {
            pred[ch] = pred16(pred[ch], br.read_u8()?);
            out.push(pred[ch] as i16);
            ch = (ch + 1) % channels;
        }
        Ok(())
    }

    /// 解码一个负载
    fn decode_payload(&self, data: &[u8]) -> LaoResult<Frame> {
        let mut br = ByteReader::new(data);
        let block_type = br.read_u8()?;
        br.skip(RECORD_TAIL - 1)?;
        let (mut mask, nblocks) = match block_type {
            BLOCK_INITIAL => {
                let mask = br.read_u32_le()?;
                let data_blocks = br.remaining() / self.block_bytes().max(1);
                (mask, mask.count_ones() as usize + data_blocks)
            }
            BLOCK_SILENCE => (1, 1),
            BLOCK_AUDIO => (0, 1),
            other => {
                return Err(LaoError::Malformed(format!("未知的 VMD 音频块类型 {other}")));
            }
        };

        let frame = if self.bits16 {
            let mut out = Vec::with_capacity(nblocks * self.block_samples);
            for _ in 0..nblocks {
                if mask & 1 != 0 {
                    out.resize(out.len() + self.block_samples, 0);
                } else {
                    self.decode_block16(&mut br, &mut out)?;
                }
                mask >>= 1;
            }
            AudioFrame::from_s16(&out, self.sample_rate, self.channel_layout)
        } else {
            let mut out = Vec::with_capacity(nblocks * self.block_samples);
            for _ in 0..nblocks {
                if mask & 1 != 0 {
                    out.resize(out.len() + self.block_samples, 128);
                } else {
                    out.extend_from_slice(br.read_bytes(self.block_samples)?);
                }
                mask >>= 1;
            }
            AudioFrame::from_u8(out, self.sample_rate, self.channel_layout)
        };
        Ok(Frame::Audio(frame))
    }
}

/// Sierra VMD 音频解码器
pub struct VmdAudioDecoder;

impl VmdAudioDecoder {
    pub fn create() -> LaoResult<Box<dyn Decoder>> {
        Ok(Box::new(Self))
    }
}

impl Decoder for VmdAudioDecoder {
    fn codec_id(&self) -> CodecId {
        CodecId::VmdAudio
    }

    fn name(&self) -> &str {
        "vmdaudio"
    }

    fn create_state(&self, params: &CodecParameters) -> LaoResult<DecoderState> {
        let audio = params.require_audio()?;
        let channels = audio.channel_layout.channels as usize;
        let block_samples = audio.block_align as usize;
        if block_samples == 0 || block_samples % channels != 0 || block_samples <= channels {
            return Err(LaoError::InvalidArgument(format!(
                "VMD 音频块大小无效: {block_samples}"
            )));
        }
        let bits16 = match audio.bits_per_sample {
            8 => false,
            16 => true,
            other => {
                return Err(LaoError::Unsupported(format!("VMD 音频位深 {other}")));
            }
        };
        Ok(DecoderState::new(CodecState::VmdAudio(VmdAudioState {
            sample_rate: audio.sample_rate,
            channel_layout: audio.channel_layout,
            bits16,
            block_samples,
        })))
    }

    fn decode_sample(&self, state: &mut CodecState, packet: &Packet) -> LaoResult<Option<Frame>> {
        let CodecState::VmdAudio(st) = state else {
            return Err(state.mismatch(CodecId::VmdAudio));
        };
        st.decode_payload(&packet.data).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state16(channels: u32, block_samples: usize) -> VmdAudioState {
        VmdAudioState {
            sample_rate: 22050,
            channel_layout: ChannelLayout::from_channels(channels),
            bits16: true,
            block_samples,
        }
    }

    fn payload(block_type: u8, body: &[u8]) -> Vec<u8> {
        let mut v = vec![block_type];
        v.extend_from_slice(&[0u8; RECORD_TAIL - 1]);
        v.extend_from_slice(body);
        v
    }

    #[test]
    fn test_16位块差分() {
        let st = state16(1, 3);
        let mut body = 1000i16.to_le_bytes().to_vec();
        body.extend_from_slice(&[0x01, 0x81]);
        let frame = st.decode_payload(&payload(BLOCK_AUDIO, &body)).unwrap();
        let Frame::Audio(a) = frame else {
            panic!("期望音频帧")
        };
        assert_eq!(a.samples_s16().unwrap(), vec![1000, 1008, 1000]);
    }

    #[test]
    fn test_预载块按掩码插入静音() {
        let st = state16(1, 2);
        // 掩码 0b01: 第一块静音, 第二块有数据
        let mut body = 1u32.to_le_bytes().to_vec();
        body.extend_from_slice(&7i16.to_le_bytes());
        body.push(0x02);
        let frame = st.decode_payload(&payload(BLOCK_INITIAL, &body)).unwrap();
        let Frame::Audio(a) = frame else {
            panic!("期望音频帧")
        };
        assert_eq!(a.samples_s16().unwrap(), vec![0, 0, 7, 7 + 0x10]);
    }

    #[test]
    fn test_8位静音块() {
        let st = VmdAudioState {
            sample_rate: 22050,
            channel_layout: ChannelLayout::MONO,
            bits16: false,
            block_samples: 4,
        };
        let frame = st.decode_payload(&payload(BLOCK_SILENCE, &[])).unwrap();
        let Frame::Audio(a) = frame else {
            panic!("期望音频帧")
        };
        assert_eq!(a.data[0], vec![128; 4]);
    }

    #[test]
    fn test_未知块类型() {
        let st = state16(1, 2);
        assert!(matches!(
            st.decode_payload(&payload(9, &[])),
            Err(LaoError::Malformed(_))
        ));
    }
}
