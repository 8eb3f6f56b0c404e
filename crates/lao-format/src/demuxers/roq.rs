//! id RoQ 解封装器.
//!
//! 文件结构:
//! ```text
//! 8 字节文件头: u16 0x1084, u32 0xFFFFFFFF, u16 帧率
//! 块: u16 标识, u32 长度, u16 参数, 数据
//!   0x1001 INFO: u16 宽, u16 高
//!   0x1002 码本, 0x1011 VQ 画面: 视频
//!   0x1020 / 0x1021: 单声道 / 立体声 DPCM 音频
//!   0x1012 JPEG: 跳过
//! ```
//!
//! 码本块与紧随的 VQ 块合成一个视频样本, 两个块都保留 8 字节块头.
//! 音频样本 = 参数 (小端 u16) + 数据. 音频固定 22050 Hz, 每字节一个采样.

use bytes::Bytes;
use lao_codec::decoders::roq::{ROQ_QUAD_CODEBOOK, ROQ_QUAD_VQ};
use lao_codec::{CodecId, Packet};
use lao_core::{LaoError, LaoResult, PixelFormat, Rational, SampleFormat};
use log::{debug, warn};

use crate::chunk;
use crate::demuxer::{Demuxer, read_signature};
use crate::format_id::FormatId;
use crate::io::IoContext;
use crate::probe::{FormatProbe, ProbeScore, SCORE_MAX, extension_score};
use crate::stream::{AudioStreamParams, Stream, VideoStreamParams};

const ROQ_MAGIC: [u8; 6] = [0x84, 0x10, 0xFF, 0xFF, 0xFF, 0xFF];
const ROQ_CHUNK_PREAMBLE_SIZE: usize = 8;

const ROQ_INFO: u16 = 0x1001;
const ROQ_JPEG: u16 = 0x1012;
const ROQ_SOUND_MONO: u16 = 0x1020;
const ROQ_SOUND_STEREO: u16 = 0x1021;

/// RoQ 音频固定采样率
pub const ROQ_SAMPLE_RATE: u32 = 22050;

/// 单个块的长度上限
const ROQ_MAX_CHUNK_SIZE: u64 = 16 * 1024 * 1024;

/// 画面边长上限 (像素)
const ROQ_MAX_DIMENSION: u32 = 2048;

/// `open` 时最多扫描的块数
const ROQ_SCAN_CHUNKS: usize = 64;

/// 块头
#[derive(Debug, Clone, Copy)]
struct Preamble {
    id: u16,
    size: u64,
    arg: u16,
    raw: [u8; ROQ_CHUNK_PREAMBLE_SIZE],
}

impl Preamble {
    fn parse(raw: [u8; ROQ_CHUNK_PREAMBLE_SIZE]) -> Self {
        Self {
            id: u16::from_le_bytes([raw[0], raw[1]]),
            size: u64::from(u32::from_le_bytes([raw[2], raw[3], raw[4], raw[5]])),
            arg: u16::from_le_bytes([raw[6], raw[7]]),
            raw,
        }
    }

    fn read(io: &mut IoContext) -> LaoResult<Self> {
        let mut raw = [0u8; ROQ_CHUNK_PREAMBLE_SIZE];
        io.read_exact(&mut raw)?;
        Ok(Self::parse(raw))
    }
}

/// RoQ 解封装器
pub struct RoqDemuxer {
    /// 流信息
    streams: Vec<Stream>,
    video_index: usize,
    audio_index: Option<usize>,
    /// 每帧的时钟刻度数
    frame_ticks: i64,
    /// 每个音频采样的时钟刻度数
    sample_ticks: i64,
    video_pts: i64,
    audio_pts: i64,
    video_frames: u64,
}

impl RoqDemuxer {
    /// 创建 RoQ 解封装器实例 (工厂函数)
    pub fn create() -> LaoResult<Box<dyn Demuxer>> {
        Ok(Box::new(Self::new()))
    }

    pub fn new() -> Self {
        Self {
            streams: Vec::new(),
            video_index: 0,
            audio_index: None,
            frame_ticks: 1,
            sample_ticks: 1,
            video_pts: 0,
            audio_pts: 0,
            video_frames: 0,
        }
    }

    /// 扫描数据区开头的块, 找出画面尺寸与声道数, 返回后位置不变
    fn scan(io: &mut IoContext) -> LaoResult<((u32, u32), Option<u32>)> {
        let start = io.position();
        let mut dims = None;
        let mut channels = None;
        let mut cut_short = false;

        for _ in 0..ROQ_SCAN_CHUNKS {
            if io.is_eof() {
                break;
            }
            let pre = match Preamble::read(io) {
                Ok(p) => p,
                Err(LaoError::Truncated { .. }) => {
                    cut_short = true;
                    break;
                }
                Err(e) => return Err(e),
            };
            if pre.size > ROQ_MAX_CHUNK_SIZE {
                break;
            }
            if pre.size > io.remaining() {
                cut_short = true;
                break;
            }
            match pre.id {
                ROQ_INFO if pre.size >= 4 && dims.is_none() => {
                    let w = u32::from(io.read_u16_le()?);
                    let h = u32::from(io.read_u16_le()?);
                    dims = Some((w, h));
                    io.skip(pre.size - 4)?;
                }
                ROQ_SOUND_MONO | ROQ_SOUND_STEREO if channels.is_none() => {
                    channels = Some(if pre.id == ROQ_SOUND_STEREO { 2 } else { 1 });
                    io.skip(pre.size)?;
                }
                _ => io.skip(pre.size)?,
            }
            if dims.is_some() && channels.is_some() {
                break;
            }
        }
        io.seek(start)?;

        match dims {
            Some(d) => Ok((d, channels)),
            None if cut_short => Err(LaoError::truncated(ROQ_CHUNK_PREAMBLE_SIZE, io.remaining() as usize)),
            None => Err(LaoError::Malformed("RoQ 缺少 INFO 块".into())),
        }
    }

    fn video_packet(&mut self, data: Vec<u8>, pos: u64) -> Packet {
        let pts = self.video_pts;
        self.video_pts += self.frame_ticks;
        self.video_frames += 1;
        Packet {
            data: Bytes::from(data),
            pts,
            dts: pts,
            duration: self.frame_ticks,
            time_base: self.streams[self.video_index].time_base,
            stream_index: self.video_index,
            is_keyframe: self.video_frames == 1,
            pos: pos as i64,
        }
    }

    fn audio_packet(&mut self, index: usize, channels: u32, data: Vec<u8>, pos: u64) -> Packet {
        // 负载含 2 字节参数
        let samples = (data.len() as i64 - 2) / i64::from(channels);
        let duration = samples * self.sample_ticks;
        let pts = self.audio_pts;
        self.audio_pts += duration;
        Packet {
            data: Bytes::from(data),
            pts,
            dts: pts,
            duration,
            time_base: self.streams[index].time_base,
            stream_index: index,
            is_keyframe: true,
            pos: pos as i64,
        }
    }

    fn read_body(io: &mut IoContext, pre: &Preamble, start: u64) -> LaoResult<Vec<u8>> {
        match chunk::read_payload(io, pre.size, ROQ_MAX_CHUNK_SIZE, "RoQ 块") {
            Err(e @ LaoError::Truncated { .. }) => {
                io.seek(start)?;
                Err(e)
            }
            other => other,
        }
    }
}

impl Default for RoqDemuxer {
    fn default() -> Self {
        Self::new()
    }
}

impl Demuxer for RoqDemuxer {
    fn format_id(&self) -> FormatId {
        FormatId::Roq
    }

    fn name(&self) -> &str {
        "roq"
    }

    fn open(&mut self, io: &mut IoContext) -> LaoResult<()> {
        read_signature(io, &ROQ_MAGIC, "RoQ")?;
        let mut fps = u32::from(io.read_u16_le()?);
        if fps == 0 {
            warn!("RoQ 帧率为 0, 按 30 处理");
            fps = 30;
        }
        let ((width, height), channels) = Self::scan(io)?;
        if width == 0 || height == 0 || width > ROQ_MAX_DIMENSION || height > ROQ_MAX_DIMENSION {
            return Err(LaoError::Malformed(format!("RoQ 画面尺寸无效: {width}x{height}")));
        }
        debug!("RoQ: {width}x{height} @ {fps}fps, 音频声道: {channels:?}");

        let frame_unit = Rational::new(1, fps as i32);
        let sample_unit = Rational::new(1, ROQ_SAMPLE_RATE as i32);
        let clock = if channels.is_some() {
            frame_unit.common_time_base(sample_unit)
        } else {
            Some(frame_unit)
        }
        .ok_or_else(|| LaoError::Malformed(format!("RoQ 帧率 {fps} 无法与音频时钟对齐")))?;
        self.frame_ticks = frame_unit.ticks_in(clock).unwrap_or(1);
        self.sample_ticks = sample_unit.ticks_in(clock).unwrap_or(1);

        self.streams.clear();
        self.video_index = 0;
        self.streams.push(Stream::video(
            0,
            CodecId::RoqVideo,
            clock,
            VideoStreamParams {
                width,
                height,
                pixel_format: PixelFormat::Yuv444p,
                frame_rate: Rational::new(fps as i32, 1),
                sample_aspect_ratio: Rational::new(1, 1),
                bit_rate: 0,
            },
        ));
        self.audio_index = channels.map(|ch| {
            let mut params = AudioStreamParams::new(ROQ_SAMPLE_RATE, ch, SampleFormat::S16, 8);
            params.bit_rate = u64::from(ROQ_SAMPLE_RATE) * u64::from(ch) * 8;
            self.streams
                .push(Stream::audio(1, CodecId::RoqDpcm, clock, params));
            1
        });
        self.video_pts = 0;
        self.audio_pts = 0;
        self.video_frames = 0;
        Ok(())
    }

    fn streams(&self) -> &[Stream] {
        &self.streams
    }

    fn read_packet(&mut self, io: &mut IoContext) -> LaoResult<Packet> {
        loop {
            chunk::ensure_more(io)?;
            let start = io.position();
            let pre = match Preamble::read(io) {
                Ok(p) => p,
                Err(e) => {
                    io.seek(start)?;
                    return Err(e);
                }
            };

            match pre.id {
                ROQ_QUAD_CODEBOOK => {
                    let mut data = pre.raw.to_vec();
                    data.extend_from_slice(&Self::read_body(io, &pre, start)?);
                    // 与紧随的 VQ 块合并
                    let next = io.peek_bytes(ROQ_CHUNK_PREAMBLE_SIZE)?;
                    if !next.is_empty() && next.len() < ROQ_CHUNK_PREAMBLE_SIZE {
                        // 下一块头不完整时无法判断是否要合并
                        io.seek(start)?;
                        return Err(LaoError::truncated(ROQ_CHUNK_PREAMBLE_SIZE, next.len()));
                    }
                    if next.len() == ROQ_CHUNK_PREAMBLE_SIZE
                        && u16::from_le_bytes([next[0], next[1]]) == ROQ_QUAD_VQ
                    {
                        let vq = Preamble::read(io)?;
                        data.extend_from_slice(&vq.raw);
                        data.extend_from_slice(&Self::read_body(io, &vq, start)?);
                    }
                    return Ok(self.video_packet(data, start));
                }
                ROQ_QUAD_VQ => {
                    let mut data = pre.raw.to_vec();
                    data.extend_from_slice(&Self::read_body(io, &pre, start)?);
                    return Ok(self.video_packet(data, start));
                }
                ROQ_SOUND_MONO | ROQ_SOUND_STEREO => {
                    let Some(index) = self.audio_index else {
                        warn!("RoQ: 扫描范围外才出现音频块, 跳过");
                        chunk::skip_payload(io, pre.size, ROQ_MAX_CHUNK_SIZE, "RoQ 音频块")
                            .map_err(|e| chunk::rewind_if_truncated(io, start, e))?;
                        continue;
                    };
                    let body = Self::read_body(io, &pre, start)?;
                    let mut data = pre.arg.to_le_bytes().to_vec();
                    data.extend_from_slice(&body);
                    let channels = if pre.id == ROQ_SOUND_STEREO { 2 } else { 1 };
                    return Ok(self.audio_packet(index, channels, data, start));
                }
                ROQ_INFO | ROQ_JPEG => {
                    chunk::skip_payload(io, pre.size, ROQ_MAX_CHUNK_SIZE, "RoQ 块")
                        .map_err(|e| chunk::rewind_if_truncated(io, start, e))?;
                }
                other => {
                    warn!("RoQ: 跳过未知块 {other:#06x}, 长度 {}", pre.size);
                    chunk::skip_payload(io, pre.size, ROQ_MAX_CHUNK_SIZE, "RoQ 块")
                        .map_err(|e| chunk::rewind_if_truncated(io, start, e))?;
                }
            }
        }
    }

    fn duration(&self) -> Option<f64> {
        None
    }
}

/// 签名检查
pub fn probe(data: &[u8]) -> Option<FormatId> {
    data.starts_with(&ROQ_MAGIC).then_some(FormatId::Roq)
}

/// RoQ 格式探测器
pub struct RoqProbe;

impl FormatProbe for RoqProbe {
    fn probe(&self, data: &[u8], filename: Option<&str>) -> Option<ProbeScore> {
        if probe(data).is_some() {
            return Some(SCORE_MAX);
        }
        extension_score(FormatId::Roq, filename)
    }

    fn format_id(&self) -> FormatId {
        FormatId::Roq
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lao_core::MediaType;

    fn chunk(id: u16, arg: u16, body: &[u8]) -> Vec<u8> {
        let mut v = id.to_le_bytes().to_vec();
        v.extend_from_slice(&(body.len() as u32).to_le_bytes());
        v.extend_from_slice(&arg.to_le_bytes());
        v.extend_from_slice(body);
        v
    }

    fn make_roq(with_audio: bool) -> Vec<u8> {
        let mut buf = ROQ_MAGIC.to_vec();
        buf.extend_from_slice(&30u16.to_le_bytes());
        buf.extend(chunk(ROQ_INFO, 0, &[16, 0, 16, 0, 8, 0, 4, 0]));
        buf.extend(chunk(ROQ_QUAD_CODEBOOK, 0x0100, &[0; 6]));
        buf.extend(chunk(ROQ_QUAD_VQ, 0, &[0; 4]));
        if with_audio {
            buf.extend(chunk(ROQ_SOUND_STEREO, 0, &[0; 8]));
        }
        buf.extend(chunk(0x7777, 0, &[1, 2, 3]));
        buf.extend(chunk(ROQ_QUAD_VQ, 0, &[0; 2]));
        buf
    }

    #[test]
    fn test_探测() {
        assert_eq!(probe(&make_roq(false)), Some(FormatId::Roq));
        assert_eq!(RoqProbe.probe(b"\x84\x10\x00", None), None);
    }

    #[test]
    fn test_流信息() {
        let mut io = IoContext::from_memory(make_roq(true));
        let mut demuxer = RoqDemuxer::new();
        demuxer.open(&mut io).unwrap();
        let streams = demuxer.streams();
        assert_eq!(streams.len(), 2);
        assert_eq!(streams[0].media_type, MediaType::Video);
        assert_eq!(streams[0].time_base, Rational::new(1, 22050));
        let v = streams[0].video_params().unwrap();
        assert_eq!((v.width, v.height), (16, 16));
        let a = streams[1].audio_params().unwrap();
        assert_eq!(a.channel_layout.channels, 2);
        // 扫描后回到数据区开头
        assert_eq!(io.position(), 8);
    }

    #[test]
    fn test_码本与画面合并() {
        let mut io = IoContext::from_memory(make_roq(true));
        let mut demuxer = RoqDemuxer::new();
        demuxer.open(&mut io).unwrap();

        let v1 = demuxer.read_packet(&mut io).unwrap();
        assert_eq!(v1.stream_index, 0);
        assert_eq!(v1.size(), 8 + 6 + 8 + 4);
        assert!(v1.is_keyframe);

        let a1 = demuxer.read_packet(&mut io).unwrap();
        assert_eq!(a1.stream_index, 1);
        assert_eq!(a1.size(), 2 + 8);
        assert_eq!(a1.duration, 4);

        // 未知块被跳过
        let v2 = demuxer.read_packet(&mut io).unwrap();
        assert_eq!(v2.pts, 735);
        assert!(!v2.is_keyframe);
        assert!(matches!(demuxer.read_packet(&mut io), Err(LaoError::Eof)));
    }

    #[test]
    fn test_无音频() {
        let mut io = IoContext::from_memory(make_roq(false));
        let mut demuxer = RoqDemuxer::new();
        demuxer.open(&mut io).unwrap();
        assert_eq!(demuxer.streams().len(), 1);
        assert_eq!(demuxer.streams()[0].time_base, Rational::new(1, 30));
    }

    #[test]
    fn test_缺少_info() {
        let mut buf = ROQ_MAGIC.to_vec();
        buf.extend_from_slice(&30u16.to_le_bytes());
        buf.extend(chunk(ROQ_QUAD_VQ, 0, &[0; 4]));
        let mut io = IoContext::from_memory(buf);
        assert!(matches!(
            RoqDemuxer::new().open(&mut io),
            Err(LaoError::Malformed(_))
        ));
    }

    #[test]
    fn test_码本后的块头不完整时可重试() {
        let mut buf = ROQ_MAGIC.to_vec();
        buf.extend_from_slice(&30u16.to_le_bytes());
        buf.extend(chunk(ROQ_INFO, 0, &[16, 0, 16, 0]));
        let data_start = buf.len() as u64;
        buf.extend(chunk(ROQ_QUAD_CODEBOOK, 0x0100, &[0; 6]));
        let full_len = buf.len();
        buf.extend(chunk(ROQ_QUAD_VQ, 0, &[0; 4]));

        let mut io = IoContext::from_memory(buf[..full_len + 4].to_vec());
        let mut demuxer = RoqDemuxer::new();
        demuxer.open(&mut io).unwrap();
        for _ in 0..2 {
            assert!(matches!(
                demuxer.read_packet(&mut io),
                Err(LaoError::Truncated { .. })
            ));
            assert_eq!(io.position(), data_start);
        }

        // 数据完整后得到合并的关键样本
        let mut io = IoContext::from_memory(buf);
        let mut demuxer = RoqDemuxer::new();
        demuxer.open(&mut io).unwrap();
        let v = demuxer.read_packet(&mut io).unwrap();
        assert!(v.is_keyframe);
        assert_eq!(v.size(), 8 + 6 + 8 + 4);
    }

    #[test]
    fn test_画面尺寸过大() {
        let mut buf = ROQ_MAGIC.to_vec();
        buf.extend_from_slice(&30u16.to_le_bytes());
        buf.extend(chunk(ROQ_INFO, 0, &[0xFF, 0xFF, 0xFF, 0xFF]));
        buf.extend(chunk(ROQ_QUAD_VQ, 0, &[0; 4]));
        let mut io = IoContext::from_memory(buf);
        assert!(matches!(
            RoqDemuxer::new().open(&mut io),
            Err(LaoError::Malformed(_))
        ));
    }
}
