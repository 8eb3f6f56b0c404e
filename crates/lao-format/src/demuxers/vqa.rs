//! Westwood VQA 解封装器.
//!
//! IFF 风格, 块长度为大端且补齐到偶数:
//! ```text
//! "FORM" u32 长度 "WVQA"
//! "VQHD" 42 字节文件头
//! ... "FINF" 帧索引 (跳过)
//! "VQFR"/"VQFL" 视频, "SND0"/"SND1"/"SND2" 音频, 其余跳过
//! ```
//!
//! 音频编码由第一个声音块的标签决定, `open` 时向前扫描找到它.

use bytes::Bytes;
use lao_codec::decoders::vqa::{VQA_HEADER_SIZE, VqaHeader, has_full_codebook};
use lao_codec::{CodecId, Packet};
use lao_core::{LaoError, LaoResult, Rational, SampleFormat};
use log::{debug, warn};

use crate::chunk;
use crate::demuxer::{Demuxer, read_signature};
use crate::format_id::FormatId;
use crate::io::IoContext;
use crate::probe::{FormatProbe, ProbeScore, SCORE_MAX, extension_score};
use crate::stream::{AudioStreamParams, Stream, VideoStreamParams};

const TAG_FORM: [u8; 4] = *b"FORM";
const TAG_WVQA: [u8; 4] = *b"WVQA";
const TAG_VQHD: [u8; 4] = *b"VQHD";
const TAG_FINF: [u8; 4] = *b"FINF";
const TAG_VQFR: [u8; 4] = *b"VQFR";
const TAG_VQFL: [u8; 4] = *b"VQFL";
const TAG_SND0: [u8; 4] = *b"SND0";
const TAG_SND1: [u8; 4] = *b"SND1";
const TAG_SND2: [u8; 4] = *b"SND2";

const VQA_DEFAULT_FPS: u32 = 15;
const VQA_DEFAULT_SAMPLE_RATE: u32 = 22050;
/// 画面边长上限 (像素)
const VQA_MAX_DIMENSION: u16 = 2048;

/// 向前寻找声音块时最多查看的块数
const VQA_SCAN_CHUNKS: usize = 64;

fn is_sound_tag(tag: &[u8; 4]) -> bool {
    matches!(*tag, TAG_SND0 | TAG_SND1 | TAG_SND2)
}

/// 声音块的编码
fn audio_codec(tag: &[u8; 4], bits: u32) -> Option<(CodecId, SampleFormat, u32)> {
    match *tag {
        TAG_SND0 if bits == 16 => Some((CodecId::PcmS16le, SampleFormat::S16, 16)),
        TAG_SND0 => Some((CodecId::PcmU8, SampleFormat::U8, 8)),
        TAG_SND1 => Some((CodecId::WestwoodSnd1, SampleFormat::U8, 8)),
        TAG_SND2 => Some((CodecId::AdpcmImaWs, SampleFormat::S16, 4)),
        _ => None,
    }
}

/// VQA 解封装器
pub struct VqaDemuxer {
    streams: Vec<Stream>,
    header: Option<VqaHeader>,
    audio_index: Option<usize>,
    /// 首个声音块的标签
    sound_tag: Option<[u8; 4]>,
    /// FORM 声明的数据结束位置
    form_end: u64,
    frame_ticks: i64,
    sample_ticks: i64,
    video_pts: i64,
    audio_pts: i64,
}

impl VqaDemuxer {
    /// 创建 VQA 解封装器实例 (工厂函数)
    pub fn create() -> LaoResult<Box<dyn Demuxer>> {
        Ok(Box::new(Self::new()))
    }

    pub fn new() -> Self {
        Self {
            streams: Vec::new(),
            header: None,
            audio_index: None,
            sound_tag: None,
            form_end: 0,
            frame_ticks: 1,
            sample_ticks: 1,
            video_pts: 0,
            audio_pts: 0,
        }
    }

    /// 解析后的 VQHD 文件头
    pub fn header(&self) -> Option<&VqaHeader> {
        self.header.as_ref()
    }

    /// 块长度的上限: 不能超出 FORM 声明的范围
    fn bound(&self, io: &IoContext) -> u64 {
        self.form_end.saturating_sub(io.position())
    }

    /// 跳过块数据和补齐字节
    fn skip_chunk(&self, io: &mut IoContext, size: u64) -> LaoResult<()> {
        chunk::skip_payload(io, size, self.bound(io), "VQA 块")?;
        skip_pad(io, size)
    }

    /// 找到第一个声音块的标签, 返回后位置不变
    fn scan_sound_tag(io: &mut IoContext) -> LaoResult<Option<[u8; 4]>> {
        let start = io.position();
        let mut found = None;
        for _ in 0..VQA_SCAN_CHUNKS {
            if io.remaining() < 8 {
                break;
            }
            let tag = io.read_tag()?;
            let size = u64::from(io.read_u32_be()?);
            if is_sound_tag(&tag) {
                found = Some(tag);
                break;
            }
            let padded = size + (size & 1);
            if padded > io.remaining() {
                break;
            }
            io.skip(padded)?;
        }
        io.seek(start)?;
        Ok(found)
    }

    fn audio_duration(&self, tag: &[u8; 4], data: &[u8], index: usize) -> i64 {
        let Some(params) = self.streams[index].audio_params() else {
            return 0;
        };
        let channels = i64::from(params.channel_layout.channels.max(1));
        let samples = match *tag {
            TAG_SND0 => data.len() as i64 / (channels * i64::from(params.bits_per_sample / 8).max(1)),
            // 负载开头是 out_size, in_size
            TAG_SND1 if data.len() >= 2 => i64::from(u16::from_le_bytes([data[0], data[1]])),
            TAG_SND2 => data.len() as i64 * 2 / channels,
            _ => 0,
        };
        samples * self.sample_ticks
    }
}

impl Default for VqaDemuxer {
    fn default() -> Self {
        Self::new()
    }
}

/// 奇数长度的块后面有一个补齐字节, 文件末尾可能缺省
fn skip_pad(io: &mut IoContext, size: u64) -> LaoResult<()> {
    if size & 1 == 1 && !io.is_eof() {
        io.skip(1)?;
    }
    Ok(())
}

impl Demuxer for VqaDemuxer {
    fn format_id(&self) -> FormatId {
        FormatId::Vqa
    }

    fn name(&self) -> &str {
        "wsvqa"
    }

    fn open(&mut self, io: &mut IoContext) -> LaoResult<()> {
        read_signature(io, &TAG_FORM, "VQA")?;
        let form_size = u64::from(io.read_u32_be()?);
        read_signature(io, &TAG_WVQA, "VQA")?;
        self.form_end = 8 + form_size;

        if io.read_tag()? != TAG_VQHD {
            return Err(LaoError::Malformed("VQA 缺少 VQHD 块".into()));
        }
        let vqhd_size = u64::from(io.read_u32_be()?);
        if vqhd_size != VQA_HEADER_SIZE as u64 {
            return Err(LaoError::Malformed(format!("VQHD 长度 {vqhd_size} 不是 42")));
        }
        let extra = io.read_bytes(VQA_HEADER_SIZE)?;
        let header = VqaHeader::parse(&extra)?;
        if header.width == 0
            || header.height == 0
            || header.width > VQA_MAX_DIMENSION
            || header.height > VQA_MAX_DIMENSION
        {
            return Err(LaoError::Malformed(format!(
                "VQA 画面尺寸无效: {}x{}",
                header.width, header.height
            )));
        }

        // 跳到 FINF 之后
        loop {
            let tag = io.read_tag()?;
            let size = u64::from(io.read_u32_be()?);
            self.skip_chunk(io, size)?;
            if tag == TAG_FINF {
                break;
            }
        }

        let fps = match u32::from(header.fps) {
            0 => VQA_DEFAULT_FPS,
            f => f,
        };
        let sample_rate = match u32::from(header.sample_rate) {
            0 => VQA_DEFAULT_SAMPLE_RATE,
            r => r,
        };
        let channels = u32::from(header.channels.max(1));
        let sound_tag = Self::scan_sound_tag(io)?;
        let audio = sound_tag.and_then(|tag| {
            // 第 1 版及 bits 为 0 时按 8 位处理
            let bits = if header.bits == 16 { 16 } else { 8 };
            audio_codec(&tag, bits)
        });
        debug!(
            "VQA v{}: {}x{} @ {}fps, {} 帧, 音频: {:?}",
            header.version, header.width, header.height, fps, header.num_frames, audio
        );

        let frame_unit = Rational::new(1, fps as i32);
        let sample_unit = Rational::new(1, sample_rate as i32);
        let clock = match audio {
            Some(_) => frame_unit.common_time_base(sample_unit),
            None => Some(frame_unit),
        }
        .ok_or_else(|| LaoError::Malformed("VQA 帧率与采样率无法对齐".into()))?;
        self.frame_ticks = frame_unit.ticks_in(clock).unwrap_or(1);
        self.sample_ticks = sample_unit.ticks_in(clock).unwrap_or(1);

        self.streams.clear();
        let mut video = Stream::video(
            0,
            CodecId::VqaVideo,
            clock,
            VideoStreamParams::pal8(
                u32::from(header.width),
                u32::from(header.height),
                Rational::new(fps as i32, 1),
            ),
        )
        .with_extra_data(extra.clone());
        video.nb_frames = u64::from(header.num_frames);
        video.duration = i64::from(header.num_frames) * self.frame_ticks;
        self.streams.push(video);

        self.audio_index = audio.map(|(codec_id, fmt, bits)| {
            let params = AudioStreamParams::new(sample_rate, channels, fmt, bits);
            self.streams
                .push(Stream::audio(1, codec_id, clock, params).with_extra_data(extra.clone()));
            1
        });
        self.sound_tag = sound_tag.filter(|_| self.audio_index.is_some());
        self.header = Some(header);
        self.video_pts = 0;
        self.audio_pts = 0;
        Ok(())
    }

    fn streams(&self) -> &[Stream] {
        &self.streams
    }

    fn read_packet(&mut self, io: &mut IoContext) -> LaoResult<Packet> {
        loop {
            chunk::ensure_more(io)?;
            let start = io.position();
            let preamble = match io.read_bytes(8) {
                Ok(p) => p,
                Err(e) => {
                    io.seek(start)?;
                    return Err(e);
                }
            };
            let tag = [preamble[0], preamble[1], preamble[2], preamble[3]];
            let size = u64::from(u32::from_be_bytes([
                preamble[4],
                preamble[5],
                preamble[6],
                preamble[7],
            ]));

            let wanted = matches!(tag, TAG_VQFR | TAG_VQFL) || is_sound_tag(&tag);
            if !wanted {
                if tag != TAG_FINF {
                    debug!("VQA: 跳过块 {}", String::from_utf8_lossy(&tag));
                }
                self.skip_chunk(io, size)
                    .map_err(|e| chunk::rewind_if_truncated(io, start, e))?;
                continue;
            }

            let bound = self.bound(io);
            let data = match chunk::read_payload(io, size, bound, "VQA 块") {
                Ok(d) => d,
                Err(e @ LaoError::Truncated { .. }) => {
                    io.seek(start)?;
                    return Err(e);
                }
                Err(e) => return Err(e),
            };
            skip_pad(io, size)?;

            let (stream_index, pts, duration, is_keyframe) = if is_sound_tag(&tag) {
                let Some(index) = self.audio_index else {
                    warn!("VQA: 声音块出现在扫描范围之外, 跳过");
                    continue;
                };
                if self.sound_tag != Some(tag) {
                    warn!("VQA: 声音块 {} 与首个声音块编码不同, 跳过", String::from_utf8_lossy(&tag));
                    continue;
                }
                let duration = self.audio_duration(&tag, &data, index);
                let pts = self.audio_pts;
                self.audio_pts += duration;
                (index, pts, duration, true)
            } else {
                let pts = self.video_pts;
                self.video_pts += self.frame_ticks;
                (0, pts, self.frame_ticks, has_full_codebook(&data))
            };

            return Ok(Packet {
                data: Bytes::from(data),
                pts,
                dts: pts,
                duration,
                time_base: self.streams[stream_index].time_base,
                stream_index,
                is_keyframe,
                pos: start as i64,
            });
        }
    }

    fn duration(&self) -> Option<f64> {
        let header = self.header.as_ref()?;
        let fps = if header.fps == 0 {
            VQA_DEFAULT_FPS
        } else {
            u32::from(header.fps)
        };
        Some(f64::from(header.num_frames) / f64::from(fps))
    }
}

/// 签名检查
pub fn probe(data: &[u8]) -> Option<FormatId> {
    (data.len() >= 12 && data[0..4] == TAG_FORM && data[8..12] == TAG_WVQA).then_some(FormatId::Vqa)
}

/// VQA 格式探测器
pub struct VqaProbe;

impl FormatProbe for VqaProbe {
    fn probe(&self, data: &[u8], filename: Option<&str>) -> Option<ProbeScore> {
        if probe(data).is_some() {
            return Some(SCORE_MAX);
        }
        extension_score(FormatId::Vqa, filename)
    }

    fn format_id(&self) -> FormatId {
        FormatId::Vqa
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(tag: &[u8; 4], body: &[u8]) -> Vec<u8> {
        let mut v = tag.to_vec();
        v.extend_from_slice(&(body.len() as u32).to_be_bytes());
        v.extend_from_slice(body);
        if body.len() % 2 == 1 {
            v.push(0);
        }
        v
    }

    fn vqhd(fps: u8, rate: u16, channels: u8, bits: u8) -> Vec<u8> {
        let mut h = vec![0u8; VQA_HEADER_SIZE];
        h[0..2].copy_from_slice(&2u16.to_le_bytes());
        h[4..6].copy_from_slice(&2u16.to_le_bytes());
        h[6..8].copy_from_slice(&8u16.to_le_bytes());
        h[8..10].copy_from_slice(&4u16.to_le_bytes());
        h[10] = 4;
        h[11] = 2;
        h[12] = fps;
        h[13] = 8;
        h[24..26].copy_from_slice(&rate.to_le_bytes());
        h[26] = channels;
        h[27] = bits;
        h
    }

    fn make_vqa(body: &[Vec<u8>]) -> Vec<u8> {
        let mut inner = TAG_WVQA.to_vec();
        inner.extend(chunk(&TAG_VQHD, &vqhd(15, 22050, 1, 16)));
        inner.extend(chunk(&TAG_FINF, &[0; 8]));
        for b in body {
            inner.extend_from_slice(b);
        }
        let mut buf = TAG_FORM.to_vec();
        buf.extend_from_slice(&(inner.len() as u32).to_be_bytes());
        buf.extend(inner);
        buf
    }

    #[test]
    fn test_探测() {
        let data = make_vqa(&[]);
        assert_eq!(probe(&data), Some(FormatId::Vqa));
        assert_eq!(probe(b"FORM\0\0\0\0AIFF"), None);
    }

    #[test]
    fn test_音频编码由首个声音块决定() {
        let data = make_vqa(&[
            chunk(b"CAP0", &[1, 2, 3]),
            chunk(&TAG_SND2, &[0; 10]),
            chunk(&TAG_VQFR, &[0; 4]),
        ]);
        let mut io = IoContext::from_memory(data);
        let mut demuxer = VqaDemuxer::new();
        demuxer.open(&mut io).unwrap();
        let streams = demuxer.streams();
        assert_eq!(streams.len(), 2);
        assert_eq!(streams[1].codec_id, CodecId::AdpcmImaWs);
        assert_eq!(streams[0].extra_data.len(), VQA_HEADER_SIZE);
        // lcm(15, 22050) = 44100
        assert_eq!(streams[0].time_base, Rational::new(1, 44100));

        let audio = demuxer.read_packet(&mut io).unwrap();
        assert_eq!(audio.stream_index, 1);
        assert_eq!(audio.duration, 20 * 2);
        let video = demuxer.read_packet(&mut io).unwrap();
        assert_eq!(video.stream_index, 0);
        assert!(!video.is_keyframe);
        assert!(matches!(demuxer.read_packet(&mut io), Err(LaoError::Eof)));
    }

    #[test]
    fn test_无声音块() {
        let data = make_vqa(&[chunk(&TAG_VQFR, &[0; 3])]);
        let mut io = IoContext::from_memory(data);
        let mut demuxer = VqaDemuxer::new();
        demuxer.open(&mut io).unwrap();
        assert_eq!(demuxer.streams().len(), 1);
        let video = demuxer.read_packet(&mut io).unwrap();
        assert_eq!(video.size(), 3);
        assert!(matches!(demuxer.read_packet(&mut io), Err(LaoError::Eof)));
    }

    #[test]
    fn test_块长度超出_form() {
        let mut data = make_vqa(&[chunk(&TAG_VQFR, &[0; 4])]);
        let n = data.len();
        data[n - 8..n - 4].copy_from_slice(&0x7FFF_0000u32.to_be_bytes());
        let mut io = IoContext::from_memory(data);
        let mut demuxer = VqaDemuxer::new();
        demuxer.open(&mut io).unwrap();
        assert!(matches!(
            demuxer.read_packet(&mut io),
            Err(LaoError::Malformed(_))
        ));
        assert!(matches!(demuxer.read_packet(&mut io), Err(LaoError::Eof)));
    }

    #[test]
    fn test_画面尺寸过大() {
        let mut data = make_vqa(&[chunk(&TAG_VQFR, &[0; 4])]);
        // VQHD 记录从第 20 字节开始, 宽高位于其中 6..10
        data[26..30].copy_from_slice(&[0xFF, 0xFF, 0xFF, 0xFF]);
        let mut io = IoContext::from_memory(data);
        assert!(matches!(
            VqaDemuxer::new().open(&mut io),
            Err(LaoError::Malformed(_))
        ));
    }
}
