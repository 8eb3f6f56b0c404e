//! Origin FST 解封装器.
//!
//! 文件结构:
//! ```text
//! "2TSF", u32 宽, u32 高, u32 保留, u32 帧数, u32 帧率,
//! u32 采样率, u16 采样位数, u16 声道数
//! 交织表: 帧数 x { u32 图像长度, u16 声音长度 }
//! 数据: 按表的顺序, 每帧先图像后声音
//! ```
//!
//! 图像没有内置解码器, 原样作为 `FstVideo` 样本输出; 声音是 PCM.

use bytes::Bytes;
use lao_codec::{CodecId, Packet};
use lao_core::{LaoError, LaoResult, PixelFormat, Rational, SampleFormat};
use log::debug;

use crate::chunk;
use crate::demuxer::{Demuxer, read_signature};
use crate::format_id::FormatId;
use crate::io::IoContext;
use crate::probe::{FormatProbe, ProbeScore, SCORE_MAX, extension_score};
use crate::stream::{AudioStreamParams, Stream, VideoStreamParams};

const FST_SIGNATURE: &[u8; 4] = b"2TSF";
const FST_TABLE_ENTRY_SIZE: u64 = 6;

/// 图像长度上限的下限值
const FST_MIN_IMAGE_BOUND: u64 = 0x10000;

/// 交织表的一项
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TableEntry {
    image_size: u32,
    sound_size: u16,
}

/// 下一条要读的数据
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Image,
    Sound,
}

/// FST 解封装器
pub struct FstDemuxer {
    streams: Vec<Stream>,
    table: Vec<TableEntry>,
    entry: usize,
    slot: Slot,
    audio_index: Option<usize>,
    image_bound: u64,
    frame_ticks: i64,
    sample_ticks: i64,
    /// 每个采样帧的字节数 (各声道合计)
    sample_bytes: u32,
    fps: u32,
    audio_pts: i64,
}

impl FstDemuxer {
    /// 创建 FST 解封装器实例 (工厂函数)
    pub fn create() -> LaoResult<Box<dyn Demuxer>> {
        Ok(Box::new(Self::new()))
    }

    pub fn new() -> Self {
        Self {
            streams: Vec::new(),
            table: Vec::new(),
            entry: 0,
            slot: Slot::Image,
            audio_index: None,
            image_bound: FST_MIN_IMAGE_BOUND,
            frame_ticks: 1,
            sample_ticks: 1,
            sample_bytes: 1,
            fps: 0,
            audio_pts: 0,
        }
    }

    /// 推进到下一个位置
    fn advance(&mut self) {
        match self.slot {
            Slot::Image => self.slot = Slot::Sound,
            Slot::Sound => {
                self.slot = Slot::Image;
                self.entry += 1;
            }
        }
    }
}

impl Default for FstDemuxer {
    fn default() -> Self {
        Self::new()
    }
}

impl Demuxer for FstDemuxer {
    fn format_id(&self) -> FormatId {
        FormatId::Fst
    }

    fn name(&self) -> &str {
        "fst"
    }

    fn open(&mut self, io: &mut IoContext) -> LaoResult<()> {
        read_signature(io, FST_SIGNATURE, "FST")?;
        let width = io.read_u32_le()?;
        let height = io.read_u32_le()?;
        io.skip(4)?;
        let frames = io.read_u32_le()?;
        let fps = io.read_u32_le()?;
        let sample_rate = io.read_u32_le()?;
        let bits = u32::from(io.read_u16_le()?);
        let channels = u32::from(io.read_u16_le()?);

        if width == 0 || height == 0 || width > 0x4000 || height > 0x4000 {
            return Err(LaoError::Malformed(format!("FST 画面尺寸无效: {width}x{height}")));
        }
        if fps == 0 || fps > 1000 {
            return Err(LaoError::Malformed(format!("FST 帧率无效: {fps}")));
        }
        let table_size = u64::from(frames) * FST_TABLE_ENTRY_SIZE;
        if table_size > io.remaining() {
            return Err(LaoError::Malformed(format!(
                "FST 帧数 {frames} 的交织表超出文件剩余的 {} 字节",
                io.remaining()
            )));
        }
        let raw = io.read_bytes(table_size as usize)?;
        self.table = raw
            .chunks_exact(FST_TABLE_ENTRY_SIZE as usize)
            .map(|e| TableEntry {
                image_size: u32::from_le_bytes([e[0], e[1], e[2], e[3]]),
                sound_size: u16::from_le_bytes([e[4], e[5]]),
            })
            .collect();

        let has_audio = sample_rate > 0 && channels > 0 && (bits == 8 || bits == 16);
        let frame_unit = Rational::new(1, fps as i32);
        let sample_unit = Rational::new(1, sample_rate.max(1) as i32);
        let clock = if has_audio {
            frame_unit.common_time_base(sample_unit)
        } else {
            Some(frame_unit)
        }
        .ok_or_else(|| LaoError::Malformed("FST 帧率与采样率无法对齐".into()))?;
        self.frame_ticks = frame_unit.ticks_in(clock).unwrap_or(1);
        self.sample_ticks = sample_unit.ticks_in(clock).unwrap_or(1);
        self.image_bound = (u64::from(width) * u64::from(height) * 3).max(FST_MIN_IMAGE_BOUND);
        self.fps = fps;
        debug!(
            "FST: {width}x{height} @ {fps}fps, {frames} 帧, 音频 {sample_rate} Hz {bits} 位 {channels} 声道"
        );

        let mut video = Stream::video(
            0,
            CodecId::FstVideo,
            clock,
            VideoStreamParams {
                width,
                height,
                pixel_format: PixelFormat::None,
                frame_rate: Rational::new(fps as i32, 1),
                sample_aspect_ratio: Rational::new(1, 1),
                bit_rate: 0,
            },
        );
        video.nb_frames = u64::from(frames);
        video.duration = i64::from(frames) * self.frame_ticks;
        self.streams = vec![video];

        self.audio_index = None;
        if has_audio {
            let (codec, fmt) = if bits == 16 {
                (CodecId::PcmS16le, SampleFormat::S16)
            } else {
                (CodecId::PcmU8, SampleFormat::U8)
            };
            self.sample_bytes = channels * bits / 8;
            let mut params = AudioStreamParams::new(sample_rate, channels, fmt, bits);
            params.block_align = self.sample_bytes;
            self.streams.push(Stream::audio(1, codec, clock, params));
            self.audio_index = Some(1);
        }
        self.entry = 0;
        self.slot = Slot::Image;
        self.audio_pts = 0;
        Ok(())
    }

    fn streams(&self) -> &[Stream] {
        &self.streams
    }

    fn read_packet(&mut self, io: &mut IoContext) -> LaoResult<Packet> {
        loop {
            let Some(entry) = self.table.get(self.entry).copied() else {
                return Err(LaoError::Eof);
            };
            let start = io.position();
            let (stream_index, len, bound) = match self.slot {
                Slot::Image => (0, u64::from(entry.image_size), self.image_bound),
                Slot::Sound => match self.audio_index {
                    Some(index) if entry.sound_size > 0 => {
                        (index, u64::from(entry.sound_size), u64::from(u16::MAX))
                    }
                    _ => {
                        // 没有声音流时照样跳过表中声明的字节
                        if entry.sound_size > 0 {
                            io.skip(u64::from(entry.sound_size))?;
                        }
                        self.advance();
                        continue;
                    }
                },
            };

            let data = match chunk::read_payload(io, len, bound, "FST 数据") {
                Ok(d) => d,
                Err(e @ LaoError::Truncated { .. }) => {
                    io.seek(start)?;
                    return Err(e);
                }
                Err(e) => {
                    self.advance();
                    return Err(e);
                }
            };
            let frame = self.entry as i64;
            let slot = self.slot;
            self.advance();

            let (pts, duration) = match slot {
                Slot::Image => (frame * self.frame_ticks, self.frame_ticks),
                Slot::Sound => {
                    let samples = data.len() as i64 / i64::from(self.sample_bytes.max(1));
                    let pts = self.audio_pts;
                    self.audio_pts += samples * self.sample_ticks;
                    (pts, samples * self.sample_ticks)
                }
            };
            return Ok(Packet {
                data: Bytes::from(data),
                pts,
                dts: pts,
                duration,
                time_base: self.streams[stream_index].time_base,
                stream_index,
                is_keyframe: true,
                pos: start as i64,
            });
        }
    }

    fn duration(&self) -> Option<f64> {
        (self.fps > 0).then(|| self.table.len() as f64 / f64::from(self.fps))
    }
}

/// 签名检查
pub fn probe(data: &[u8]) -> Option<FormatId> {
    data.starts_with(FST_SIGNATURE).then_some(FormatId::Fst)
}

/// FST 格式探测器
pub struct FstProbe;

impl FormatProbe for FstProbe {
    fn probe(&self, data: &[u8], filename: Option<&str>) -> Option<ProbeScore> {
        if probe(data).is_some() {
            return Some(SCORE_MAX);
        }
        extension_score(FormatId::Fst, filename)
    }

    fn format_id(&self) -> FormatId {
        FormatId::Fst
    }
}
