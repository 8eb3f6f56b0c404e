//! Westwood AUD 解封装器.
//!
//! 文件结构:
//! ```text
//! 12 字节文件头: u16 采样率, u32 数据大小, u32 输出大小, u8 标志, u8 编码
//!   标志: bit0 立体声, bit1 16 位; 编码: 1 = SND1, 99 = IMA ADPCM
//! 数据块: u16 压缩大小, u16 输出大小, u32 0x0000DEAF, 数据
//! ```
//!
//! SND1 的负载前面重新拼上 `输出大小, 压缩大小` 两个 u16, 解码器据此判断原样或压缩.

use lao_codec::CodecId;
use lao_core::{LaoError, LaoResult, Rational, SampleFormat};
use log::debug;

use crate::chunk;
use crate::format_id::FormatId;
use crate::io::IoContext;
use crate::plain::{PlainDemuxer, PlainLayout, RecordHeader};
use crate::probe::{FormatProbe, ProbeScore, SCORE_WEAK, extension_score};
use crate::stream::{AudioStreamParams, Stream};

const AUD_HEADER_SIZE: usize = 12;
const AUD_CHUNK_SIGNATURE: u32 = 0x0000_DEAF;

const AUD_CODEC_SND1: u8 = 1;
const AUD_CODEC_IMA: u8 = 99;

/// WS AUD 布局
#[derive(Debug, Default)]
pub struct WsAudLayout {
    codec: u8,
    channels: u32,
    sample_rate: u32,
    data_size: u32,
    /// 第一个数据块的位置
    first_record: u64,
}

impl PlainLayout for WsAudLayout {
    const FORMAT_ID: FormatId = FormatId::WsAud;
    const NAME: &'static str = "wsaud";

    fn read_header(&mut self, io: &mut IoContext) -> LaoResult<Vec<Stream>> {
        let header = io.peek_bytes(AUD_HEADER_SIZE + 8)?;
        if header.len() >= AUD_HEADER_SIZE && !header_plausible(&header) {
            return Err(LaoError::NotThisFormat("WS AUD 文件头不合理".into()));
        }
        let header = io.read_bytes(AUD_HEADER_SIZE)?;
        self.sample_rate = u32::from(u16::from_le_bytes([header[0], header[1]]));
        self.data_size = u32::from_le_bytes([header[2], header[3], header[4], header[5]]);
        let flags = header[10];
        self.codec = header[11];
        self.channels = if flags & 1 != 0 { 2 } else { 1 };
        self.first_record = io.position();

        let (codec_id, sample_format, bits) = match self.codec {
            AUD_CODEC_SND1 => {
                if self.channels != 1 {
                    return Err(LaoError::Unsupported("立体声 Westwood SND1".into()));
                }
                (CodecId::WestwoodSnd1, SampleFormat::U8, 8)
            }
            _ => (CodecId::AdpcmImaWs, SampleFormat::S16, 4),
        };
        debug!(
            "WS AUD: {}, {} Hz, {} 声道, 数据 {} 字节",
            codec_id, self.sample_rate, self.channels, self.data_size
        );

        let mut params = AudioStreamParams::new(self.sample_rate, self.channels, sample_format, bits);
        params.bit_rate = u64::from(self.sample_rate) * u64::from(self.channels) * u64::from(bits);
        Ok(vec![Stream::audio(
            0,
            codec_id,
            Rational::new(1, self.sample_rate as i32),
            params,
        )])
    }

    fn read_record(&mut self, io: &mut IoContext) -> LaoResult<RecordHeader> {
        chunk::ensure_more(io)?;
        let start = io.position();
        let chunk_size = io.read_u16_le()?;
        let out_size = io.read_u16_le()?;
        let signature = io.read_u32_le()?;
        if signature != AUD_CHUNK_SIGNATURE {
            return Err(LaoError::Malformed(format!(
                "WS AUD 块签名错误: {signature:#010x}"
            )));
        }

        // 文件头声明了数据区大小时以它为上限
        let bound = if self.data_size > 0 {
            u64::from(self.data_size)
        } else {
            u64::from(u16::MAX)
        };
        let record = if self.codec == AUD_CODEC_SND1 {
            let mut prefix = Vec::with_capacity(4);
            prefix.extend_from_slice(&out_size.to_le_bytes());
            prefix.extend_from_slice(&chunk_size.to_le_bytes());
            RecordHeader {
                stream_index: 0,
                payload_len: u64::from(chunk_size),
                bound,
                prefix,
                duration: i64::from(out_size),
                is_keyframe: true,
            }
        } else {
            RecordHeader {
                stream_index: 0,
                payload_len: u64::from(chunk_size),
                bound,
                prefix: Vec::new(),
                duration: i64::from(chunk_size) * 2 / i64::from(self.channels),
                is_keyframe: start == self.first_record,
            }
        };
        Ok(record)
    }
}

/// WS AUD 解封装器
pub type WsAudDemuxer = PlainDemuxer<WsAudLayout>;

/// 文件头数值范围检查 (需要文件头与第一个块头共 20 字节时同时检查块签名)
fn header_plausible(data: &[u8]) -> bool {
    if data.len() < AUD_HEADER_SIZE {
        return false;
    }
    let rate = u16::from_le_bytes([data[0], data[1]]);
    if !(4000..=48000).contains(&rate) {
        return false;
    }
    if data[10] & !3 != 0 || !matches!(data[11], AUD_CODEC_SND1 | AUD_CODEC_IMA) {
        return false;
    }
    if data.len() >= AUD_HEADER_SIZE + 8 {
        let sig = u32::from_le_bytes([data[16], data[17], data[18], data[19]]);
        return sig == AUD_CHUNK_SIGNATURE;
    }
    true
}

/// 签名检查
pub fn probe(data: &[u8]) -> Option<FormatId> {
    (data.len() >= AUD_HEADER_SIZE + 8 && header_plausible(data)).then_some(FormatId::WsAud)
}

/// WS AUD 格式探测器
///
/// 没有魔数, 只能检查数值范围和第一个块的签名, 置信度较低.
pub struct WsAudProbe;

impl FormatProbe for WsAudProbe {
    fn probe(&self, data: &[u8], filename: Option<&str>) -> Option<ProbeScore> {
        if probe(data).is_some() {
            return Some(SCORE_WEAK);
        }
        extension_score(FormatId::WsAud, filename)
    }

    fn format_id(&self) -> FormatId {
        FormatId::WsAud
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::demuxer::Demuxer;

    fn make_aud(codec: u8, chunks: &[(Vec<u8>, u16)]) -> Vec<u8> {
        let total: usize = chunks.iter().map(|(d, _)| d.len() + 8).sum();
        let mut buf = Vec::new();
        buf.extend_from_slice(&22050u16.to_le_bytes());
        buf.extend_from_slice(&(total as u32).to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.push(if codec == AUD_CODEC_IMA { 2 } else { 0 });
        buf.push(codec);
        for (data, out_size) in chunks {
            buf.extend_from_slice(&(data.len() as u16).to_le_bytes());
            buf.extend_from_slice(&out_size.to_le_bytes());
            buf.extend_from_slice(&AUD_CHUNK_SIGNATURE.to_le_bytes());
            buf.extend_from_slice(data);
        }
        buf
    }

    #[test]
    fn test_探测() {
        let aud = make_aud(AUD_CODEC_IMA, &[(vec![0; 4], 16)]);
        assert_eq!(probe(&aud), Some(FormatId::WsAud));
        assert_eq!(WsAudProbe.probe(&aud, None), Some(SCORE_WEAK));
        let mut bad = aud.clone();
        bad[11] = 7;
        assert_eq!(probe(&bad), None);
    }

    #[test]
    fn test_snd1_负载带长度前缀() {
        let aud = make_aud(AUD_CODEC_SND1, &[(vec![1, 2, 3], 6), (vec![4, 5], 4)]);
        let mut io = IoContext::from_memory(aud);
        let mut demuxer = WsAudDemuxer::new();
        demuxer.open(&mut io).unwrap();
        assert_eq!(demuxer.streams()[0].codec_id, CodecId::WestwoodSnd1);

        let p1 = demuxer.read_packet(&mut io).unwrap();
        assert_eq!(p1.data.as_ref(), &[6u8, 0, 3, 0, 1, 2, 3][..]);
        assert_eq!(p1.duration, 6);
        let p2 = demuxer.read_packet(&mut io).unwrap();
        assert_eq!(p2.pts, 6);
        assert!(p2.is_keyframe);
    }

    #[test]
    fn test_ima_时长与关键帧() {
        let aud = make_aud(AUD_CODEC_IMA, &[(vec![0; 10], 40), (vec![0; 10], 40)]);
        let mut io = IoContext::from_memory(aud);
        let mut demuxer = WsAudDemuxer::new();
        demuxer.open(&mut io).unwrap();
        let p1 = demuxer.read_packet(&mut io).unwrap();
        assert_eq!(p1.duration, 20);
        assert!(p1.is_keyframe);
        let p2 = demuxer.read_packet(&mut io).unwrap();
        assert!(!p2.is_keyframe);
        assert!(matches!(demuxer.read_packet(&mut io), Err(LaoError::Eof)));
    }

    #[test]
    fn test_块签名错误() {
        let mut aud = make_aud(AUD_CODEC_IMA, &[(vec![0; 4], 16)]);
        aud[16] = 0;
        let mut io = IoContext::from_memory(aud);
        let mut demuxer = WsAudDemuxer::new();
        assert!(matches!(
            demuxer.open(&mut io),
            Err(LaoError::NotThisFormat(_))
        ));
    }
}
