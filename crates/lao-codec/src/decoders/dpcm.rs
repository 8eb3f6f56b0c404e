//! 游戏 DPCM 音频解码器 (RoQ 与 Interplay MVE).
//!
//! 两者都是 "预测值 + 查表差分" 结构, 每个样本自带初始预测值, 样本之间互不依赖.
//! 累加结果饱和到 i16 范围.

use log::debug;
use lao_core::{ChannelLayout, LaoError, LaoResult};

use crate::codec_id::CodecId;
use crate::codec_parameters::CodecParameters;
use crate::decoder::Decoder;
use crate::frame::{AudioFrame, Frame};
use crate::packet::Packet;
use crate::state::{CodecState, DecoderState};

/// RoQ 平方律差分表: `t[i] = i*i`, `t[i+128] = -i*i`
const fn roq_square_table() -> [i16; 256] {
    let mut table = [0i16; 256];
    let mut i = 0;
    while i < 128 {
        let sq = (i * i) as i16;
        table[i] = sq;
        table[i + 128] = -sq;
        i += 1;
    }
    table
}

static ROQ_SQUARE_TABLE: [i16; 256] = roq_square_table();

/// Interplay 差分表
static INTERPLAY_DELTA_TABLE: [i16; 256] = [
    0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20, 21, 22, 23, 24, 25,
    26, 27, 28, 29, 30, 31, 32, 33, 34, 35, 36, 37, 38, 39, 40, 41, 42, 43, 47, 51, 56, 61, 66,
    72, 79, 86, 94, 102, 112, 122, 133, 145, 158, 173, 189, 206, 225, 245, 267, 292, 318, 348,
    379, 414, 452, 493, 538, 587, 640, 699, 763, 832, 908, 991, 1081, 1180, 1288, 1405, 1534,
    1673, 1826, 1993, 2175, 2373, 2590, 2826, 3084, 3365, 3672, 4008, 4373, 4772, 5208, 5683,
    6202, 6767, 7385, 8059, 8794, 9597, 10472, 11428, 12471, 13609, 14851, 16206, 17685, 19298,
    21060, 22981, 25078, 27367, 29864, 32589, -29973, -26728, -23186, -19322, -15105, -10503,
    -5481, -1, 1, 1, 5481, 10503, 15105, 19322, 23186, 26728, 29973, -32589, -29864, -27367,
    -25078, -22981, -21060, -19298, -17685, -16206, -14851, -13609, -12471, -11428, -10472,
    -9597, -8794, -8059, -7385, -6767, -6202, -5683, -5208, -4772, -4373, -4008, -3672, -3365,
    -3084, -2826, -2590, -2373, -2175, -1993, -1826, -1673, -1534, -1405, -1288, -1180, -1081,
    -991, -908, -832, -763, -699, -640, -587, -538, -493, -452, -414, -379, -348, -318, -292,
    -267, -245, -225, -206, -189, -173, -158, -145, -133, -122, -112, -102, -94, -86, -79, -72,
    -66, -61, -56, -51, -47, -43, -42, -41, -40, -39, -38, -37, -36, -35, -34, -33, -32, -31,
    -30, -29, -28, -27, -26, -25, -24, -23, -22, -21, -20, -19, -18, -17, -16, -15, -14, -13,
    -12, -11, -10, -9, -8, -7, -6, -5, -4, -3, -2, -1,
];

/// 按差分表展开交错的码字, 声道轮流使用各自的预测值
fn expand_deltas(
    table: &[i16; 256],
    predictors: &mut [i32; 2],
    channels: usize,
    codes: &[u8],
    out: &mut Vec<i16>,
) {
    let mut ch = 0;
    for &code in codes {
        let p = (predictors[ch] + i32::from(table[usize::from(code)]))
            .clamp(i32::from(i16::MIN), i32::from(i16::MAX));
        predictors[ch] = p;
        out.push(p as i16);
        ch = (ch + 1) % channels;
    }
}

fn check_channel_split(len: usize, channels: usize) -> LaoResult<()> {
    if len % channels != 0 {
        return Err(LaoError::Malformed(format!(
            "DPCM 码字数 {len} 不能均分给 {channels} 个声道"
        )));
    }
    Ok(())
}

/// RoQ DPCM 解码状态 (只有配置)
#[derive(Debug, Clone)]
pub struct RoqDpcmState {
    sample_rate: u32,
    channel_layout: ChannelLayout,
}

/// Interplay DPCM 解码状态 (只有配置)
#[derive(Debug, Clone)]
pub struct InterplayDpcmState {
    sample_rate: u32,
    channel_layout: ChannelLayout,
}

/// RoQ DPCM 解码器
///
/// 负载为块头参数 `arg` (小端 u16) 加码字. 立体声时 `arg` 高字节左移 8 位为左声道
/// 初始预测值, 低字节为右声道; 单声道时 `arg` 本身就是预测值.
pub struct RoqDpcmDecoder;

impl RoqDpcmDecoder {
    pub fn create() -> LaoResult<Box<dyn Decoder>> {
        Ok(Box::new(Self))
    }

    /// 解码一个负载, 返回交错采样
    pub fn decode_payload(data: &[u8], channels: usize) -> LaoResult<Vec<i16>> {
        if data.len() < 2 {
            return Err(LaoError::truncated(2, data.len()));
        }
        let codes = &data[2..];
        check_channel_split(codes.len(), channels)?;
        let mut predictors = if channels == 2 {
            [
                i32::from((u16::from(data[1]) << 8) as i16),
                i32::from((u16::from(data[0]) << 8) as i16),
            ]
        } else {
            [i32::from(i16::from_le_bytes([data[0], data[1]])), 0]
        };
        let mut out = Vec::with_capacity(codes.len());
        expand_deltas(&ROQ_SQUARE_TABLE, &mut predictors, channels, codes, &mut out);
        Ok(out)
    }
}

impl Decoder for RoqDpcmDecoder {
    fn codec_id(&self) -> CodecId {
        CodecId::RoqDpcm
    }

    fn name(&self) -> &str {
        "roq_dpcm"
    }

    fn create_state(&self, params: &CodecParameters) -> LaoResult<DecoderState> {
        let audio = params.require_audio()?;
        debug!(
            "打开 roq_dpcm 解码器: {} Hz, {} 声道",
            audio.sample_rate, audio.channel_layout.channels
        );
        Ok(DecoderState::new(CodecState::RoqDpcm(RoqDpcmState {
            sample_rate: audio.sample_rate,
            channel_layout: audio.channel_layout,
        })))
    }

    fn decode_sample(&self, state: &mut CodecState, packet: &Packet) -> LaoResult<Option<Frame>> {
        let CodecState::RoqDpcm(st) = state else {
            return Err(state.mismatch(CodecId::RoqDpcm));
        };
        let samples =
            Self::decode_payload(&packet.data, st.channel_layout.channels as usize)?;
        Ok(Some(Frame::Audio(AudioFrame::from_s16(
            &samples,
            st.sample_rate,
            st.channel_layout,
        ))))
    }
}

/// Interplay MVE DPCM 解码器
///
/// 负载为音频操作码的完整内容: 6 字节 (序号, 流掩码, 流长度),
/// 每声道一个小端 i16 初始预测值 (直接作为第一个输出采样), 然后是码字.
pub struct InterplayDpcmDecoder;

impl InterplayDpcmDecoder {
    pub fn create() -> LaoResult<Box<dyn Decoder>> {
        Ok(Box::new(Self))
    }

    /// 解码一个负载, 返回交错采样
    pub fn decode_payload(data: &[u8], channels: usize) -> LaoResult<Vec<i16>> {
        let header = 6 + 2 * channels;
        if data.len() < header {
            return Err(LaoError::truncated(header, data.len()));
        }
        let codes = &data[header..];
        check_channel_split(codes.len(), channels)?;
        let mut predictors = [0i32; 2];
        let mut out = Vec::with_capacity(channels + codes.len());
        for (ch, p) in predictors.iter_mut().enumerate().take(channels) {
            let v = i16::from_le_bytes([data[6 + ch * 2], data[7 + ch * 2]]);
            *p = i32::from(v);
            out.push(v);
        }
        expand_deltas(
            &INTERPLAY_DELTA_TABLE,
            &mut predictors,
            channels,
            codes,
            &mut out,
        );
        Ok(out)
    }
}

impl Decoder for InterplayDpcmDecoder {
    fn codec_id(&self) -> CodecId {
        CodecId::InterplayDpcm
    }

    fn name(&self) -> &str {
        "interplay_dpcm"
    }

    fn create_state(&self, params: &CodecParameters) -> LaoResult<DecoderState> {
        let audio = params.require_audio()?;
        Ok(DecoderState::new(CodecState::InterplayDpcm(
            InterplayDpcmState {
                sample_rate: audio.sample_rate,
                channel_layout: audio.channel_layout,
            },
        )))
    }

    fn decode_sample(&self, state: &mut CodecState, packet: &Packet) -> LaoResult<Option<Frame>> {
        let CodecState::InterplayDpcm(st) = state else {
            return Err(state.mismatch(CodecId::InterplayDpcm));
        };
        let samples =
            Self::decode_payload(&packet.data, st.channel_layout.channels as usize)?;
        Ok(Some(Frame::Audio(AudioFrame::from_s16(
            &samples,
            st.sample_rate,
            st.channel_layout,
        ))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roq_平方律表() {
        assert_eq!(ROQ_SQUARE_TABLE[0], 0);
        assert_eq!(ROQ_SQUARE_TABLE[3], 9);
        assert_eq!(ROQ_SQUARE_TABLE[128 + 3], -9);
        assert_eq!(ROQ_SQUARE_TABLE[127], 16129);
    }

    #[test]
    fn test_roq_立体声预测值来自参数() {
        // arg = 0x0201: 左声道 0x0200, 右声道 0x0100
        let out = RoqDpcmDecoder::decode_payload(&[0x01, 0x02, 0x02, 0x82], 2).unwrap();
        assert_eq!(out, vec![0x200 + 4, 0x100 - 4]);
    }

    #[test]
    fn test_roq_零差分得到平直输出() {
        let out = RoqDpcmDecoder::decode_payload(&[0x00, 0x00, 0, 0, 0, 0], 2).unwrap();
        assert_eq!(out, vec![0; 4]);
    }

    #[test]
    fn test_roq_饱和() {
        // 单声道预测值 32767, 加 127^2 后饱和
        let out = RoqDpcmDecoder::decode_payload(&[0xFF, 0x7F, 127, 0xFF], 1).unwrap();
        assert_eq!(out, vec![i16::MAX, i16::MAX - 16129]);
    }

    #[test]
    fn test_roq_缺少参数() {
        assert!(matches!(
            RoqDpcmDecoder::decode_payload(&[0x01], 1),
            Err(LaoError::Truncated { .. })
        ));
    }

    #[test]
    fn test_interplay_初始预测值直接输出() {
        let mut data = vec![0u8; 6];
        data.extend_from_slice(&100i16.to_le_bytes());
        data.extend_from_slice(&(-100i16).to_le_bytes());
        data.extend_from_slice(&[5, 0xFF]);
        let out = InterplayDpcmDecoder::decode_payload(&data, 2).unwrap();
        assert_eq!(out, vec![100, -100, 105, -101]);
    }

    #[test]
    fn test_interplay_码字不能均分() {
        let mut data = vec![0u8; 10];
        data.push(1);
        assert!(matches!(
            InterplayDpcmDecoder::decode_payload(&data, 2),
            Err(LaoError::Malformed(_))
        ));
    }
}
