//! Interplay MVE 解封装器.
//!
//! 文件结构:
//! ```text
//! 26 字节签名: "Interplay MVE File\x1A\0", 0x001A, 0x0100, 0x1133
//! 块: u16 长度, u16 类型, 若干操作码
//! 操作码: u16 长度, u8 类型, u8 版本, 数据
//! ```
//!
//! 视频帧由同一块里的调色板 (0x0C)、解码映射表 (0x0F) 和视频数据 (0x11) 拼成,
//! 在块结束时输出; 音频帧 (0x08) 遇到即输出, 因此先于同块的视频帧.
//! 静音帧 (0x09) 按声明的长度合成静音负载, 同样占用音频时间轴.

use std::collections::VecDeque;

use bytes::Bytes;
use lao_codec::{CodecId, Packet};
use lao_core::{ByteReader, LaoError, LaoResult, PixelFormat, Rational, SampleFormat};
use log::{debug, warn};

use crate::chunk;
use crate::demuxer::{Demuxer, read_signature};
use crate::format_id::FormatId;
use crate::io::IoContext;
use crate::probe::{FormatProbe, ProbeScore, SCORE_MAX, extension_score};
use crate::stream::{AudioStreamParams, Stream, VideoStreamParams};

const MVE_SIGNATURE: &[u8; 26] = b"Interplay MVE File\x1A\x00\x1A\x00\x00\x01\x33\x11";
const CHUNK_PREAMBLE_SIZE: u64 = 4;
const OPCODE_PREAMBLE_SIZE: usize = 4;

const CHUNK_INIT_AUDIO: u16 = 0x0000;
const CHUNK_INIT_VIDEO: u16 = 0x0002;

const OPCODE_END_OF_STREAM: u8 = 0x00;
const OPCODE_END_OF_CHUNK: u8 = 0x01;
const OPCODE_CREATE_TIMER: u8 = 0x02;
const OPCODE_INIT_AUDIO_BUFFERS: u8 = 0x03;
const OPCODE_INIT_VIDEO_BUFFERS: u8 = 0x05;
const OPCODE_AUDIO_FRAME: u8 = 0x08;
const OPCODE_SILENCE_FRAME: u8 = 0x09;
const OPCODE_SET_PALETTE: u8 = 0x0C;
const OPCODE_SET_DECODING_MAP: u8 = 0x0F;
const OPCODE_VIDEO_DATA: u8 = 0x11;

/// 音频帧操作码的头: u16 序号, u16 流掩码, u16 长度
const AUDIO_FRAME_HEADER: usize = 6;

/// 画面边长上限 (像素)
const MVE_MAX_DIMENSION: u32 = 2048;

/// 单帧时长上限 (微秒)
const MAX_FRAME_MICROS: u64 = 10_000_000;

#[derive(Debug, Clone, Copy)]
struct AudioFormat {
    sample_rate: u32,
    channels: u32,
    bits: u32,
    compressed: bool,
}

impl AudioFormat {
    fn codec_id(&self) -> CodecId {
        match (self.compressed, self.bits) {
            (true, _) => CodecId::InterplayDpcm,
            (false, 16) => CodecId::PcmS16le,
            (false, _) => CodecId::PcmU8,
        }
    }

    /// 一个音频帧操作码中的采样数
    fn samples(&self, body_len: usize) -> usize {
        let ch = self.channels as usize;
        let data = body_len.saturating_sub(AUDIO_FRAME_HEADER);
        if self.compressed {
            // 每声道一个初始值, 之后每字节一个采样
            data.saturating_sub(2 * ch) / ch + 1
        } else {
            data / (ch * (self.bits as usize / 8))
        }
    }
}

/// 一个块里尚未拼成视频帧的部分
#[derive(Debug, Default)]
struct PendingVideo {
    pal_start: u16,
    palette: Vec<u8>,
    map: Option<Vec<u8>>,
    video: Option<Vec<u8>>,
}

/// MVE 解封装器
pub struct MveDemuxer {
    streams: Vec<Stream>,
    audio_index: Option<usize>,
    audio: Option<AudioFormat>,
    frame_micros: u64,
    dims: Option<(u32, u32)>,
    frame_ticks: i64,
    sample_ticks: i64,
    video_pts: i64,
    audio_pts: i64,
    video_frames: u64,
    /// 已拼好、等待返回的数据包
    queue: VecDeque<Packet>,
    /// 跨块保留的调色板更新 (文件开头的初始化块里可能就有)
    carried: PendingVideo,
    ended: bool,
}

impl MveDemuxer {
    /// 创建 MVE 解封装器实例 (工厂函数)
    pub fn create() -> LaoResult<Box<dyn Demuxer>> {
        Ok(Box::new(Self::new()))
    }

    pub fn new() -> Self {
        Self {
            streams: Vec::new(),
            audio_index: None,
            audio: None,
            frame_micros: 0,
            dims: None,
            frame_ticks: 1,
            sample_ticks: 1,
            video_pts: 0,
            audio_pts: 0,
            video_frames: 0,
            queue: VecDeque::new(),
            carried: PendingVideo::default(),
            ended: false,
        }
    }

    /// 读取并处理一个完整的块; 数据不足时位置不变
    fn read_chunk(&mut self, io: &mut IoContext) -> LaoResult<()> {
        let start = io.position();
        let result = io.read_bytes(CHUNK_PREAMBLE_SIZE as usize).and_then(|pre| {
            let size = u16::from_le_bytes([pre[0], pre[1]]);
            io.read_bytes(usize::from(size))
        });
        let body = match result {
            Ok(v) => v,
            Err(e) => {
                io.seek(start)?;
                return Err(e);
            }
        };
        // 块已完整读入, 块内的长度错误都属于数据本身
        self.process_chunk(&body, start).map_err(|e| match e {
            LaoError::Truncated { needed, available } => LaoError::Malformed(format!(
                "MVE 块内数据不足: 需要 {needed} 字节, 只有 {available}"
            )),
            other => other,
        })
    }

    fn process_chunk(&mut self, body: &[u8], pos: u64) -> LaoResult<()> {
        let mut br = ByteReader::new(body);
        let mut pending = std::mem::take(&mut self.carried);
        let mut packets = Vec::new();

        while br.remaining() >= OPCODE_PREAMBLE_SIZE {
            let len = usize::from(br.read_u16_le()?);
            let kind = br.read_u8()?;
            let version = br.read_u8()?;
            if len > br.remaining() {
                return Err(LaoError::Malformed(format!(
                    "MVE 操作码 0x{kind:02X} 长度 {len} 超出块内剩余的 {} 字节",
                    br.remaining()
                )));
            }
            let data = br.read_bytes(len)?;
            match kind {
                OPCODE_END_OF_STREAM => {
                    self.ended = true;
                    break;
                }
                OPCODE_END_OF_CHUNK => break,
                OPCODE_CREATE_TIMER => self.create_timer(data)?,
                OPCODE_INIT_AUDIO_BUFFERS => self.init_audio(data, version)?,
                OPCODE_INIT_VIDEO_BUFFERS => self.init_video(data)?,
                OPCODE_AUDIO_FRAME => {
                    if let Some(p) = self.audio_packet(data, pos) {
                        packets.push(p);
                    }
                }
                OPCODE_SILENCE_FRAME => {
                    if let Some(p) = self.silence_packet(data, pos) {
                        packets.push(p);
                    }
                }
                OPCODE_SET_PALETTE => {
                    let mut pr = ByteReader::new(data);
                    let first = pr.read_u16_le()?;
                    let count = pr.read_u16_le()?;
                    if usize::from(first) + usize::from(count) > 256 {
                        return Err(LaoError::Malformed(format!(
                            "MVE 调色板范围 {first}+{count} 超出 256"
                        )));
                    }
                    pending.pal_start = first;
                    pending.palette = pr.read_bytes(usize::from(count) * 3)?.to_vec();
                }
                OPCODE_SET_DECODING_MAP => pending.map = Some(data.to_vec()),
                OPCODE_VIDEO_DATA => pending.video = Some(data.to_vec()),
                other => debug!("MVE: 忽略操作码 0x{other:02X} (版本 {version})"),
            }
        }

        match (pending.map.take(), pending.video.take()) {
            (Some(map), Some(video)) if !self.streams.is_empty() => {
                packets.push(self.video_packet(&pending, &map, &video, pos)?);
            }
            (None, None) => self.carried = pending,
            (Some(_), Some(_)) => warn!("MVE: 初始化块里出现视频帧, 丢弃"),
            _ => warn!("MVE: 块里只有映射表或视频数据之一, 丢弃"),
        }
        self.queue.extend(packets);
        Ok(())
    }

    fn create_timer(&mut self, data: &[u8]) -> LaoResult<()> {
        let mut br = ByteReader::new(data);
        let rate = u64::from(br.read_u32_le()?);
        let subdivision = u64::from(br.read_u16_le()?);
        let micros = rate * subdivision;
        if micros == 0 || micros > MAX_FRAME_MICROS {
            return Err(LaoError::Malformed(format!("MVE 帧时长 {micros}us 无效")));
        }
        self.frame_micros = micros;
        Ok(())
    }

    fn init_audio(&mut self, data: &[u8], version: u8) -> LaoResult<()> {
        let mut br = ByteReader::new(data);
        br.skip(2)?;
        let flags = br.read_u16_le()?;
        let sample_rate = u32::from(br.read_u16_le()?);
        if sample_rate == 0 {
            return Err(LaoError::Malformed("MVE 采样率为 0".into()));
        }
        self.audio = Some(AudioFormat {
            sample_rate,
            channels: if flags & 1 != 0 { 2 } else { 1 },
            bits: if flags & 2 != 0 { 16 } else { 8 },
            compressed: version > 0 && flags & 4 != 0,
        });
        Ok(())
    }

    fn init_video(&mut self, data: &[u8]) -> LaoResult<()> {
        let mut br = ByteReader::new(data);
        let width = u32::from(br.read_u16_le()?) * 8;
        let height = u32::from(br.read_u16_le()?) * 8;
        if width == 0 || height == 0 || width > MVE_MAX_DIMENSION || height > MVE_MAX_DIMENSION {
            return Err(LaoError::Malformed(format!("MVE 画面尺寸无效: {width}x{height}")));
        }
        if let Some((w, h)) = self.dims {
            if (w, h) != (width, height) {
                return Err(LaoError::Unsupported(format!(
                    "MVE 中途改变画面尺寸: {w}x{h} -> {width}x{height}"
                )));
            }
        }
        self.dims = Some((width, height));
        Ok(())
    }

    fn audio_packet(&mut self, data: &[u8], pos: u64) -> Option<Packet> {
        let (index, format) = (self.audio_index?, self.audio?);
        if data.len() < AUDIO_FRAME_HEADER {
            warn!("MVE: 音频帧只有 {} 字节, 跳过", data.len());
            return None;
        }
        let mask = u16::from_le_bytes([data[2], data[3]]);
        if mask & 1 == 0 {
            return None;
        }
        let duration = format.samples(data.len()) as i64 * self.sample_ticks;
        let payload = if format.compressed {
            data
        } else {
            &data[AUDIO_FRAME_HEADER..]
        };
        Some(self.timed_audio(index, Bytes::copy_from_slice(payload), duration, pos))
    }

    /// 静音帧: 按头部的流长度合成等长的静音负载, 交给同一个音频解码器
    fn silence_packet(&mut self, data: &[u8], pos: u64) -> Option<Packet> {
        let (index, format) = (self.audio_index?, self.audio?);
        if data.len() < AUDIO_FRAME_HEADER {
            warn!("MVE: 静音帧只有 {} 字节, 跳过", data.len());
            return None;
        }
        let mask = u16::from_le_bytes([data[2], data[3]]);
        if mask & 1 == 0 {
            return None;
        }
        let stream_len = usize::from(u16::from_le_bytes([data[4], data[5]]));
        let ch = format.channels as usize;
        let (payload, samples) = if format.compressed {
            // 解码输出为 16 位; 初始预测值为 0, 码字 0 的差分为 0
            let samples = stream_len / (2 * ch);
            let mut v = data[..AUDIO_FRAME_HEADER].to_vec();
            v.resize(AUDIO_FRAME_HEADER + 2 * ch + samples.saturating_sub(1) * ch, 0);
            (v, samples)
        } else {
            let frame_bytes = ch * (format.bits as usize / 8);
            let samples = stream_len / frame_bytes;
            let fill = if format.bits == 8 { 0x80 } else { 0 };
            (vec![fill; samples * frame_bytes], samples)
        };
        if samples == 0 {
            return None;
        }
        let duration = samples as i64 * self.sample_ticks;
        Some(self.timed_audio(index, Bytes::from(payload), duration, pos))
    }

    fn timed_audio(&mut self, index: usize, data: Bytes, duration: i64, pos: u64) -> Packet {
        let pts = self.audio_pts;
        self.audio_pts += duration;
        Packet {
            data,
            pts,
            dts: pts,
            duration,
            time_base: self.streams[index].time_base,
            stream_index: index,
            is_keyframe: true,
            pos: pos as i64,
        }
    }

    fn video_packet(&mut self, pending: &PendingVideo, map: &[u8], video: &[u8], pos: u64) -> LaoResult<Packet> {
        let map_len = u16::try_from(map.len())
            .map_err(|_| LaoError::Malformed(format!("MVE 解码映射表过长: {}", map.len())))?;
        let mut data = Vec::with_capacity(6 + pending.palette.len() + map.len() + video.len());
        data.extend_from_slice(&map_len.to_le_bytes());
        data.extend_from_slice(&pending.pal_start.to_le_bytes());
        data.extend_from_slice(&((pending.palette.len() / 3) as u16).to_le_bytes());
        data.extend_from_slice(&pending.palette);
        data.extend_from_slice(map);
        data.extend_from_slice(video);

        let pts = self.video_pts;
        self.video_pts += self.frame_ticks;
        self.video_frames += 1;
        Ok(Packet {
            data: Bytes::from(data),
            pts,
            dts: pts,
            duration: self.frame_ticks,
            time_base: self.streams[0].time_base,
            stream_index: 0,
            is_keyframe: self.video_frames == 1,
            pos: pos as i64,
        })
    }

    /// 初始化块处理完后建立流信息
    fn build_streams(&mut self) -> LaoResult<()> {
        let (width, height) = self
            .dims
            .ok_or_else(|| LaoError::Malformed("MVE 缺少视频初始化操作码".into()))?;
        if self.frame_micros == 0 {
            return Err(LaoError::Malformed("MVE 缺少计时器操作码".into()));
        }
        let frame_unit = Rational::new(self.frame_micros as i32, 1_000_000).reduce();
        let clock = match self.audio {
            Some(a) => frame_unit.common_time_base(Rational::new(1, a.sample_rate as i32)),
            None => Some(frame_unit),
        }
        .ok_or_else(|| LaoError::Malformed("MVE 帧时长与采样率无法对齐".into()))?;
        self.frame_ticks = frame_unit.ticks_in(clock).unwrap_or(1);

        self.streams = vec![Stream::video(
            0,
            CodecId::InterplayVideo,
            clock,
            VideoStreamParams {
                width,
                height,
                pixel_format: PixelFormat::Pal8,
                frame_rate: frame_unit.invert().reduce(),
                sample_aspect_ratio: Rational::new(1, 1),
                bit_rate: 0,
            },
        )];
        self.audio_index = self.audio.map(|a| {
            self.sample_ticks = Rational::new(1, a.sample_rate as i32)
                .ticks_in(clock)
                .unwrap_or(1);
            let fmt = if a.compressed || a.bits == 16 {
                SampleFormat::S16
            } else {
                SampleFormat::U8
            };
            self.streams.push(Stream::audio(
                1,
                a.codec_id(),
                clock,
                AudioStreamParams::new(a.sample_rate, a.channels, fmt, a.bits),
            ));
            1
        });
        debug!(
            "MVE: {}x{}, 帧时长 {}us, 音频: {:?}",
            width, height, self.frame_micros, self.audio
        );
        Ok(())
    }
}

impl Default for MveDemuxer {
    fn default() -> Self {
        Self::new()
    }
}

impl Demuxer for MveDemuxer {
    fn format_id(&self) -> FormatId {
        FormatId::Mve
    }

    fn name(&self) -> &str {
        "ipmovie"
    }

    fn open(&mut self, io: &mut IoContext) -> LaoResult<()> {
        read_signature(io, MVE_SIGNATURE, "MVE")?;
        *self = Self::new();
        // 依次处理开头的初始化块
        loop {
            let peek = io.peek_bytes(CHUNK_PREAMBLE_SIZE as usize)?;
            if peek.len() < CHUNK_PREAMBLE_SIZE as usize {
                break;
            }
            let kind = u16::from_le_bytes([peek[2], peek[3]]);
            if kind != CHUNK_INIT_AUDIO && kind != CHUNK_INIT_VIDEO {
                break;
            }
            self.read_chunk(io)?;
            if self.ended {
                break;
            }
        }
        self.build_streams()
    }

    fn streams(&self) -> &[Stream] {
        &self.streams
    }

    fn read_packet(&mut self, io: &mut IoContext) -> LaoResult<Packet> {
        loop {
            if let Some(p) = self.queue.pop_front() {
                return Ok(p);
            }
            if self.ended {
                return Err(LaoError::Eof);
            }
            chunk::ensure_more(io)?;
            self.read_chunk(io)?;
        }
    }

    fn duration(&self) -> Option<f64> {
        None
    }
}

/// 签名检查
pub fn probe(data: &[u8]) -> Option<FormatId> {
    data.starts_with(MVE_SIGNATURE).then_some(FormatId::Mve)
}

/// MVE 格式探测器
pub struct MveProbe;

impl FormatProbe for MveProbe {
    fn probe(&self, data: &[u8], filename: Option<&str>) -> Option<ProbeScore> {
        if probe(data).is_some() {
            return Some(SCORE_MAX);
        }
        extension_score(FormatId::Mve, filename)
    }

    fn format_id(&self) -> FormatId {
        FormatId::Mve
    }
}
