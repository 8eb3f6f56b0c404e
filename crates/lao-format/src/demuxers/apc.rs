//! Cryo APC 解封装器.
//!
//! 文件结构:
//! ```text
//! "CRYO_APC" "1.20"
//! u32 采样数, u32 采样率
//! i32 左声道初始预测值, i32 右声道初始预测值
//! u32 是否立体声
//! IMA ADPCM 数据 (按 4096 字节切分)
//! ```

use lao_codec::CodecId;
use lao_core::{LaoError, LaoResult, Rational, SampleFormat};
use log::debug;

use crate::chunk;
use crate::demuxer::read_signature;
use crate::format_id::FormatId;
use crate::io::IoContext;
use crate::plain::{PlainDemuxer, PlainLayout, RecordHeader};
use crate::probe::{FormatProbe, ProbeScore, SCORE_MAX, extension_score};
use crate::stream::{AudioStreamParams, Stream};

const APC_SIGNATURE: &[u8; 12] = b"CRYO_APC1.20";

/// 每个数据包最多读取的字节数
const APC_MAX_READ: u64 = 4096;

/// APC 布局
#[derive(Debug, Default)]
pub struct ApcLayout {
    channels: u32,
    sample_rate: u32,
    num_samples: u32,
    packets: u64,
}

impl PlainLayout for ApcLayout {
    const FORMAT_ID: FormatId = FormatId::Apc;
    const NAME: &'static str = "apc";

    fn read_header(&mut self, io: &mut IoContext) -> LaoResult<Vec<Stream>> {
        read_signature(io, APC_SIGNATURE, "APC")?;
        self.num_samples = io.read_u32_le()?;
        self.sample_rate = io.read_u32_le()?;
        if self.sample_rate == 0 {
            return Err(LaoError::Malformed("APC 采样率为 0".into()));
        }
        let predictors = io.read_bytes(8)?;
        self.channels = if io.read_u32_le()? != 0 { 2 } else { 1 };
        debug!(
            "APC: {} Hz, {} 声道, {} 个采样",
            self.sample_rate, self.channels, self.num_samples
        );

        let mut params = AudioStreamParams::new(self.sample_rate, self.channels, SampleFormat::S16, 4);
        params.block_align = 1;
        params.bit_rate = u64::from(self.sample_rate) * u64::from(self.channels) * 4;
        let mut stream = Stream::audio(
            0,
            CodecId::AdpcmImaApc,
            Rational::new(1, self.sample_rate as i32),
            params,
        )
        .with_extra_data(predictors);
        stream.duration = i64::from(self.num_samples);
        Ok(vec![stream])
    }

    fn read_record(&mut self, io: &mut IoContext) -> LaoResult<RecordHeader> {
        chunk::ensure_more(io)?;
        let len = io.remaining().min(APC_MAX_READ);
        // 单声道每字节两个采样, 立体声每字节左右各一个
        let samples = if self.channels == 2 { len } else { len * 2 };
        self.packets += 1;
        Ok(RecordHeader {
            stream_index: 0,
            payload_len: len,
            bound: APC_MAX_READ,
            prefix: Vec::new(),
            duration: samples as i64,
            // 预测值跨包连续, 只有第一个包能从零状态开始
            is_keyframe: self.packets == 1,
        })
    }

    fn duration(&self) -> Option<f64> {
        (self.sample_rate > 0).then(|| f64::from(self.num_samples) / f64::from(self.sample_rate))
    }
}

/// APC 解封装器
pub type ApcDemuxer = PlainDemuxer<ApcLayout>;

/// 签名检查
pub fn probe(data: &[u8]) -> Option<FormatId> {
    data.starts_with(b"CRYO_APC").then_some(FormatId::Apc)
}

/// APC 格式探测器
pub struct ApcProbe;

impl FormatProbe for ApcProbe {
    fn probe(&self, data: &[u8], filename: Option<&str>) -> Option<ProbeScore> {
        if probe(data).is_some() {
            return Some(SCORE_MAX);
        }
        extension_score(FormatId::Apc, filename)
    }

    fn format_id(&self) -> FormatId {
        FormatId::Apc
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::demuxer::Demuxer;

    fn make_apc(stereo: bool, data_len: usize) -> Vec<u8> {
        let mut buf = APC_SIGNATURE.to_vec();
        buf.extend_from_slice(&((data_len * 2) as u32).to_le_bytes());
        buf.extend_from_slice(&22050u32.to_le_bytes());
        buf.extend_from_slice(&100i32.to_le_bytes());
        buf.extend_from_slice(&(-100i32).to_le_bytes());
        buf.extend_from_slice(&u32::from(stereo).to_le_bytes());
        buf.extend(std::iter::repeat_n(0x88, data_len));
        buf
    }

    #[test]
    fn test_探测() {
        assert_eq!(probe(&make_apc(false, 4)), Some(FormatId::Apc));
        assert_eq!(ApcProbe.probe(b"RIFF", Some("a.apc")), Some(50));
        assert_eq!(ApcProbe.probe(b"RIFF", None), None);
    }

    #[test]
    fn test_流信息与初始预测值() {
        let mut io = IoContext::from_memory(make_apc(true, 16));
        let mut demuxer = ApcDemuxer::new();
        demuxer.open(&mut io).unwrap();
        let s = &demuxer.streams()[0];
        assert_eq!(s.codec_id, CodecId::AdpcmImaApc);
        assert_eq!(s.extra_data.len(), 8);
        assert_eq!(s.time_base, Rational::new(1, 22050));
        assert_eq!(s.audio_params().unwrap().channel_layout.channels, 2);
    }

    #[test]
    fn test_按_4096_字节切分() {
        let mut io = IoContext::from_memory(make_apc(false, 5000));
        let mut demuxer = ApcDemuxer::new();
        demuxer.open(&mut io).unwrap();
        let p1 = demuxer.read_packet(&mut io).unwrap();
        assert_eq!(p1.size(), 4096);
        assert!(p1.is_keyframe);
        assert_eq!(p1.duration, 8192);
        let p2 = demuxer.read_packet(&mut io).unwrap();
        assert_eq!(p2.size(), 904);
        assert_eq!(p2.pts, 8192);
        assert!(!p2.is_keyframe);
        assert!(matches!(demuxer.read_packet(&mut io), Err(LaoError::Eof)));
    }

    #[test]
    fn test_头部截断() {
        let data = make_apc(false, 0);
        let mut io = IoContext::from_memory(data[..20].to_vec());
        let mut demuxer = ApcDemuxer::new();
        assert!(matches!(
            demuxer.open(&mut io),
            Err(LaoError::Truncated { .. })
        ));
    }
}
