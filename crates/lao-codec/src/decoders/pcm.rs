//! PCM 音频解码器.
//!
//! 用于 VQA 的 SND0、FST 的声音块以及未压缩的 MVE 音频.
//! 三种 PCM 变体共用解码逻辑, 只在格式描述上有差异.

use log::debug;
use lao_core::{ChannelLayout, LaoError, LaoResult, SampleFormat};

use crate::codec_id::CodecId;
use crate::codec_parameters::CodecParameters;
use crate::decoder::Decoder;
use crate::frame::{AudioFrame, Frame};
use crate::packet::Packet;
use crate::state::{CodecState, DecoderState};

/// PCM 格式描述, 描述各 PCM 变体的差异
#[derive(Debug, Clone, Copy)]
struct PcmFormatDesc {
    /// 码流中每个样本的字节数
    bytes_per_sample: usize,
    /// 输出的采样格式
    output_format: SampleFormat,
    /// 解码转换函数: 将码流字节转换为输出格式字节
    decode_fn: fn(&[u8], &mut Vec<u8>),
}

/// 直接拷贝
fn decode_copy(src: &[u8], dst: &mut Vec<u8>) {
    dst.extend_from_slice(src);
}

/// S16 大端转小端: 每 2 字节翻转
fn decode_s16be(src: &[u8], dst: &mut Vec<u8>) {
    for chunk in src.chunks_exact(2) {
        dst.push(chunk[1]);
        dst.push(chunk[0]);
    }
}

/// 获取指定 CodecId 的 PCM 格式描述
fn pcm_format_desc(codec_id: CodecId) -> Option<PcmFormatDesc> {
    Some(match codec_id {
        CodecId::PcmU8 => PcmFormatDesc {
            bytes_per_sample: 1,
            output_format: SampleFormat::U8,
            decode_fn: decode_copy,
        },
        CodecId::PcmS16le => PcmFormatDesc {
            bytes_per_sample: 2,
            output_format: SampleFormat::S16,
            decode_fn: decode_copy,
        },
        CodecId::PcmS16be => PcmFormatDesc {
            bytes_per_sample: 2,
            output_format: SampleFormat::S16,
            decode_fn: decode_s16be,
        },
        _ => return None,
    })
}

/// PCM 解码状态 (只有配置, 样本之间互不依赖)
#[derive(Debug, Clone)]
pub struct PcmState {
    codec_id: CodecId,
    sample_rate: u32,
    channel_layout: ChannelLayout,
}

impl PcmState {
    /// 创建 PCM 状态
    pub fn new(codec_id: CodecId, sample_rate: u32, channel_layout: ChannelLayout) -> Self {
        Self {
            codec_id,
            sample_rate,
            channel_layout,
        }
    }
}

/// PCM 音频解码器
pub struct PcmDecoder {
    codec_id: CodecId,
    desc: PcmFormatDesc,
}

impl PcmDecoder {
    /// 创建指定 PCM 变体的解码器
    fn create(codec_id: CodecId) -> LaoResult<Box<dyn Decoder>> {
        let desc = pcm_format_desc(codec_id)
            .ok_or_else(|| LaoError::CodecNotFound(format!("不支持的 PCM 格式: {}", codec_id)))?;
        Ok(Box::new(Self { codec_id, desc }))
    }

    pub fn new_u8() -> LaoResult<Box<dyn Decoder>> {
        Self::create(CodecId::PcmU8)
    }

    pub fn new_s16le() -> LaoResult<Box<dyn Decoder>> {
        Self::create(CodecId::PcmS16le)
    }

    pub fn new_s16be() -> LaoResult<Box<dyn Decoder>> {
        Self::create(CodecId::PcmS16be)
    }
}

impl Decoder for PcmDecoder {
    fn codec_id(&self) -> CodecId {
        self.codec_id
    }

    fn name(&self) -> &str {
        self.codec_id.name()
    }

    fn create_state(&self, params: &CodecParameters) -> LaoResult<DecoderState> {
        let audio = params.require_audio()?;
        debug!(
            "打开 {} 解码器: {} Hz, {} 声道, 输出格式={}",
            self.name(),
            audio.sample_rate,
            audio.channel_layout.channels,
            self.desc.output_format,
        );
        Ok(DecoderState::new(CodecState::Pcm(PcmState::new(
            self.codec_id,
            audio.sample_rate,
            audio.channel_layout,
        ))))
    }

    fn decode_sample(&self, state: &mut CodecState, packet: &Packet) -> LaoResult<Option<Frame>> {
        let CodecState::Pcm(st) = state else {
            return Err(state.mismatch(self.codec_id));
        };
        if st.codec_id != self.codec_id {
            return Err(state.mismatch(self.codec_id));
        }

        let block_align = self.desc.bytes_per_sample * st.channel_layout.channels as usize;
        let data_len = packet.data.len();
        if data_len % block_align != 0 {
            return Err(LaoError::Malformed(format!(
                "数据大小 {} 不是 block_align {} 的整数倍",
                data_len, block_align,
            )));
        }

        let nb_samples = (data_len / block_align) as u32;
        let mut frame = AudioFrame::new(
            nb_samples,
            st.sample_rate,
            self.desc.output_format,
            st.channel_layout,
        );
        let mut decoded = Vec::with_capacity(data_len);
        (self.desc.decode_fn)(&packet.data, &mut decoded);
        frame.data[0] = decoded;
        Ok(Some(Frame::Audio(frame)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec_parameters::AudioCodecParams;
    use bytes::Bytes;
    use lao_core::Rational;

    fn make_audio_params(codec_id: CodecId, channels: u32) -> CodecParameters {
        CodecParameters::new_audio(
            codec_id,
            AudioCodecParams {
                sample_rate: 22050,
                channel_layout: ChannelLayout::from_channels(channels),
                sample_format: SampleFormat::None,
                bits_per_sample: 0,
                block_align: 0,
            },
        )
    }

    fn decode_one(dec: &dyn Decoder, channels: u32, pkt: Packet) -> LaoResult<AudioFrame> {
        let mut state = dec.create_state(&make_audio_params(dec.codec_id(), channels))?;
        match dec.decode(&mut state, &pkt)? {
            Some(Frame::Audio(af)) => Ok(af),
            other => panic!("期望音频帧, 实际 {other:?}"),
        }
    }

    #[test]
    fn test_pcm_u8_decode() {
        let dec = PcmDecoder::new_u8().unwrap();
        let data = vec![128u8, 64, 192, 255];
        let af = decode_one(dec.as_ref(), 1, Packet::key(Bytes::from(data.clone()))).unwrap();
        assert_eq!(af.nb_samples, 4);
        assert_eq!(af.sample_format, SampleFormat::U8);
        assert_eq!(af.data[0], data);
    }

    #[test]
    fn test_pcm_s16be_byte_order_swap() {
        let dec = PcmDecoder::new_s16be().unwrap();
        // 大端: [0x01, 0x00] -> 小端: [0x00, 0x01]
        let pkt = Packet::key(Bytes::from(vec![0x01, 0x00, 0x7F, 0xFF]));
        let af = decode_one(dec.as_ref(), 1, pkt).unwrap();
        assert_eq!(af.sample_format, SampleFormat::S16);
        assert_eq!(af.data[0], vec![0x00, 0x01, 0xFF, 0x7F]);
    }

    #[test]
    fn test_stereo_decode() {
        let dec = PcmDecoder::new_s16le().unwrap();
        // 2 声道, 每声道 1 采样 -> 4 字节
        let data = vec![0x01, 0x00, 0x02, 0x00];
        let mut pkt = Packet::key(Bytes::from(data.clone()));
        pkt.pts = 100;
        pkt.time_base = Rational::new(1, 22050);
        let af = decode_one(dec.as_ref(), 2, pkt).unwrap();
        assert_eq!(af.nb_samples, 1);
        assert_eq!(af.channel_layout.channels, 2);
        assert_eq!(af.pts, 100);
        assert_eq!(af.data[0], data);
    }

    #[test]
    fn test_零长度样本得到空帧() {
        let dec = PcmDecoder::new_u8().unwrap();
        let af = decode_one(dec.as_ref(), 1, Packet::key(Bytes::new())).unwrap();
        assert_eq!(af.nb_samples, 0);
    }

    #[test]
    fn test_data_alignment_error() {
        let dec = PcmDecoder::new_s16le().unwrap();
        // block_align = 2 * 2 = 4, 但数据大小为 3
        let err = decode_one(dec.as_ref(), 2, Packet::key(Bytes::from(vec![0u8; 3]))).unwrap_err();
        assert!(matches!(err, LaoError::Malformed(_)));
    }

    #[test]
    fn test_缺少音频参数() {
        let dec = PcmDecoder::new_u8().unwrap();
        let params = CodecParameters::new_video(
            CodecId::PcmU8,
            crate::codec_parameters::VideoCodecParams {
                width: 1,
                height: 1,
                pixel_format: lao_core::PixelFormat::Pal8,
                frame_rate: Rational::new(1, 1),
            },
        );
        assert!(matches!(
            dec.create_state(&params),
            Err(LaoError::InvalidArgument(_))
        ));
    }
}
