//! Delphine CIN 音频解码器.
//!
//! 16 位差分编码, 单个累加值贯穿整条流 (立体声时两个声道也共用它).
//! 流的第一个负载以一个原始小端采样开头, 之后每个字节查表得到差分.

use lao_core::{ChannelLayout, LaoError, LaoResult};

use crate::codec_id::CodecId;
use crate::codec_parameters::CodecParameters;
use crate::decoder::Decoder;
use crate::frame::{AudioFrame, Frame};
use crate::packet::Packet;
use crate::state::{CodecState, DecoderState};

/// 差分幅度, 由大到小; 表中 51..=127 为负值, 129..=205 为镜像正值
const DELTA_MAGNITUDES: [i16; 77] = [
    30210, 27853, 25680, 23677, 21829, 20126, 18556, 17108, 15774, 14543, 13408, 12362, 11398,
    10508, 9689, 8933, 8236, 7593, 7001, 6455, 5951, 5487, 5059, 4664, 4300, 3964, 3655, 3370,
    3107, 2865, 2641, 2435, 2245, 2070, 1908, 1759, 1622, 1495, 1379, 1271, 1172, 1080, 996, 918,
    847, 781, 720, 663, 612, 564, 520, 479, 442, 407, 376, 346, 319, 294, 271, 250, 230, 212, 196,
    181, 166, 153, 141, 130, 120, 111, 102, 94, 87, 80, 74, 68, 62,
];

const fn delta16_table() -> [i16; 256] {
    let mut table = [0i16; 256];
    let mut i = 0;
    while i < DELTA_MAGNITUDES.len() {
        table[51 + i] = -DELTA_MAGNITUDES[i];
        table[205 - i] = DELTA_MAGNITUDES[i];
        i += 1;
    }
    table
}

static DELTA16_TABLE: [i16; 256] = delta16_table();

/// CIN 音频解码状态
#[derive(Debug, Clone)]
pub struct CinAudioState {
    sample_rate: u32,
    channel_layout: ChannelLayout,
    /// 是否还没有读到流开头的原始采样
    initial: bool,
    delta: i32,
}

impl CinAudioState {
    /// 创建流开头的状态
    pub fn new(sample_rate: u32, channel_layout: ChannelLayout) -> Self {
        Self {
            sample_rate,
            channel_layout,
            initial: true,
            delta: 0,
        }
    }

    /// 解码一个负载, 返回交错采样
    pub fn decode_payload(&mut self, data: &[u8]) -> LaoResult<Vec<i16>> {
        let mut codes = data;
        let mut out = Vec::with_capacity(data.len());
        if self.initial {
            if data.len() < 2 {
                return Err(LaoError::truncated(2, data.len()));
            }
            let first = i16::from_le_bytes([data[0], data[1]]);
            self.delta = i32::from(first);
            self.initial = false;
            out.push(first);
            codes = &data[2..];
        }
        for &c in codes {
            self.delta = (self.delta + i32::from(DELTA16_TABLE[usize::from(c)]))
                .clamp(i32::from(i16::MIN), i32::from(i16::MAX));
            out.push(self.delta as i16);
        }
        Ok(out)
    }
}

/// Delphine CIN 音频解码器
pub struct CinAudioDecoder;

impl CinAudioDecoder {
    pub fn create() -> LaoResult<Box<dyn Decoder>> {
        Ok(Box::new(Self))
    }
}

impl Decoder for CinAudioDecoder {
    fn codec_id(&self) -> CodecId {
        CodecId::CinAudio
    }

    fn name(&self) -> &str {
        "dsicinaudio"
    }

    fn create_state(&self, params: &CodecParameters) -> LaoResult<DecoderState> {
        let audio = params.require_audio()?;
        Ok(DecoderState::new(CodecState::CinAudio(CinAudioState::new(
            audio.sample_rate,
            audio.channel_layout,
        ))))
    }

    fn decode_sample(&self, state: &mut CodecState, packet: &Packet) -> LaoResult<Option<Frame>> {
        let CodecState::CinAudio(st) = state else {
            return Err(state.mismatch(CodecId::CinAudio));
        };
        let samples = st.decode_payload(&packet.data)?;
        Ok(Some(Frame::Audio(AudioFrame::from_s16(
            &samples,
            st.sample_rate,
            st.channel_layout,
        ))))
    }
}
