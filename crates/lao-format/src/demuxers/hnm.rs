//! Cryo HNM4 解封装器.
//!
//! 文件结构:
//! ```text
//! 64 字节文件头: "HNM4", u8 版本, 3 字节保留, u16 宽, u16 高,
//!               u32 文件大小, u32 帧数, 44 字节保留
//! 超级块: u24 长度 (含 4 字节头), u8 保留, 若干块
//! 块: u24 长度 (含 8 字节头), u8 保留, u16 标识, u16 保留, 数据
//! ```
//!
//! `PL`/`IZ`/`IU` 块原样 (带块头) 作为视频样本; `SD` 声音块没有公开的编码, 跳过.

use bytes::Bytes;
use lao_codec::decoders::hnm::{
    HNM4_CHUNK_ID_IU, HNM4_CHUNK_ID_IZ, HNM4_CHUNK_ID_PL, HNM4_CHUNK_ID_SD, HNM4_VERSION,
    HNM4A_VERSION,
};
use lao_codec::{CodecId, Packet};
use lao_core::{LaoError, LaoResult, Rational};
use log::{debug, warn};

use crate::chunk;
use crate::demuxer::{Demuxer, read_signature};
use crate::format_id::FormatId;
use crate::io::IoContext;
use crate::probe::{FormatProbe, ProbeScore, SCORE_MAX, extension_score};
use crate::stream::{Stream, VideoStreamParams};

const HNM4_SIGNATURE: &[u8; 4] = b"HNM4";
const HNM4_HEADER_SIZE: u64 = 64;
const HNM4_SUPERCHUNK_HEADER_SIZE: u64 = 4;
const HNM4_CHUNK_HEADER_SIZE: u64 = 8;
const HNM4_FRAME_RATE: i32 = 15;
/// 画面边长上限 (像素)
const HNM4_MAX_DIMENSION: u32 = 2048;

/// HNM4 解封装器
pub struct HnmDemuxer {
    streams: Vec<Stream>,
    version: u8,
    frames: u32,
    current_frame: u32,
    /// 文件头声明的文件大小, 0 表示未声明
    declared_size: u64,
    /// 当前超级块剩余的字节数
    superchunk_remaining: u64,
}

impl HnmDemuxer {
    /// 创建 HNM4 解封装器实例 (工厂函数)
    pub fn create() -> LaoResult<Box<dyn Demuxer>> {
        Ok(Box::new(Self::new()))
    }

    pub fn new() -> Self {
        Self {
            streams: Vec::new(),
            version: HNM4_VERSION,
            frames: 0,
            current_frame: 0,
            declared_size: 0,
            superchunk_remaining: 0,
        }
    }

    fn superchunk_bound(&self, io: &IoContext) -> u64 {
        if self.declared_size > 0 {
            self.declared_size.saturating_sub(io.position())
        } else {
            u64::MAX
        }
    }

    /// 丢弃当前超级块的剩余部分
    fn abandon_superchunk(&mut self, io: &mut IoContext) -> LaoResult<()> {
        let end = io.position().saturating_add(self.superchunk_remaining).min(io.size());
        self.superchunk_remaining = 0;
        io.seek(end)
    }

    fn next_chunk(&mut self, io: &mut IoContext) -> LaoResult<Packet> {
        loop {
            if self.current_frame >= self.frames {
                return Err(LaoError::Eof);
            }
            chunk::ensure_more(io)?;

            if self.superchunk_remaining == 0 {
                let size = u64::from(io.read_u24_le()?);
                io.skip(1)?;
                if size < HNM4_SUPERCHUNK_HEADER_SIZE {
                    return Err(LaoError::Malformed(format!("HNM4 超级块长度 {size} 过小")));
                }
                let body = size - HNM4_SUPERCHUNK_HEADER_SIZE;
                if let Err(e) = chunk::check_length(body, self.superchunk_bound(io), "HNM4 超级块") {
                    warn!("{e}, 跳过余下数据");
                    io.seek(io.size())?;
                    return Err(e);
                }
                self.superchunk_remaining = body;
                continue;
            }

            let start = io.position();
            let size = u64::from(io.read_u24_le()?);
            io.skip(1)?;
            let id = io.read_u16_le()?;
            io.skip(2)?;
            if size < HNM4_CHUNK_HEADER_SIZE || size > self.superchunk_remaining {
                let err = LaoError::Malformed(format!(
                    "HNM4 块长度 {size} 超出超级块剩余的 {} 字节",
                    self.superchunk_remaining
                ));
                warn!("{err}, 跳过该超级块");
                io.seek(start)?;
                self.abandon_superchunk(io)?;
                return Err(err);
            }

            match id {
                HNM4_CHUNK_ID_PL | HNM4_CHUNK_ID_IZ | HNM4_CHUNK_ID_IU => {
                    io.seek(start)?;
                    let data = io.read_bytes(size as usize)?;
                    self.superchunk_remaining -= size;
                    let pts = i64::from(self.current_frame);
                    let is_picture = id != HNM4_CHUNK_ID_PL;
                    if is_picture {
                        self.current_frame += 1;
                    }
                    return Ok(Packet {
                        data: Bytes::from(data),
                        pts,
                        dts: pts,
                        duration: i64::from(is_picture),
                        time_base: self.streams[0].time_base,
                        stream_index: 0,
                        is_keyframe: id != HNM4_CHUNK_ID_IU,
                        pos: start as i64,
                    });
                }
                HNM4_CHUNK_ID_SD => {
                    io.skip(size - HNM4_CHUNK_HEADER_SIZE)?;
                    self.superchunk_remaining -= size;
                }
                other => {
                    warn!("HNM4: 跳过未知块 0x{other:04X}, 长度 {size}");
                    io.skip(size - HNM4_CHUNK_HEADER_SIZE)?;
                    self.superchunk_remaining -= size;
                }
            }
        }
    }
}

impl Default for HnmDemuxer {
    fn default() -> Self {
        Self::new()
    }
}

impl Demuxer for HnmDemuxer {
    fn format_id(&self) -> FormatId {
        FormatId::Hnm
    }

    fn name(&self) -> &str {
        "hnm"
    }

    fn open(&mut self, io: &mut IoContext) -> LaoResult<()> {
        read_signature(io, HNM4_SIGNATURE, "HNM4")?;
        let header = io.read_bytes((HNM4_HEADER_SIZE - 4) as usize)?;
        self.version = match header[0] {
            HNM4A_VERSION => HNM4A_VERSION,
            _ => HNM4_VERSION,
        };
        let width = u32::from(u16::from_le_bytes([header[4], header[5]]));
        let height = u32::from(u16::from_le_bytes([header[6], header[7]]));
        self.declared_size = u64::from(u32::from_le_bytes([header[8], header[9], header[10], header[11]]));
        self.frames = u32::from_le_bytes([header[12], header[13], header[14], header[15]]);
        if width == 0 || height == 0 || width > HNM4_MAX_DIMENSION || height > HNM4_MAX_DIMENSION {
            return Err(LaoError::Malformed(format!("HNM4 画面尺寸无效: {width}x{height}")));
        }
        // 每帧至少有一个块头
        let max_frames = io.remaining() / HNM4_CHUNK_HEADER_SIZE;
        if u64::from(self.frames) > max_frames {
            warn!("HNM4 帧数 {} 超出文件能容纳的 {}", self.frames, max_frames);
            self.frames = max_frames as u32;
        }
        debug!(
            "HNM4 (版本 0x{:02X}): {}x{}, {} 帧, 文件大小 {}",
            self.version, width, height, self.frames, self.declared_size
        );

        let time_base = Rational::new(1, HNM4_FRAME_RATE);
        let mut stream = Stream::video(
            0,
            CodecId::Hnm4Video,
            time_base,
            VideoStreamParams::pal8(width, height, Rational::new(HNM4_FRAME_RATE, 1)),
        )
        .with_extra_data(vec![self.version]);
        stream.nb_frames = u64::from(self.frames);
        stream.duration = i64::from(self.frames);
        self.streams = vec![stream];
        self.current_frame = 0;
        self.superchunk_remaining = 0;
        Ok(())
    }

    fn streams(&self) -> &[Stream] {
        &self.streams
    }

    fn read_packet(&mut self, io: &mut IoContext) -> LaoResult<Packet> {
        let start = io.position();
        let (frame, remaining) = (self.current_frame, self.superchunk_remaining);
        match self.next_chunk(io) {
            Err(e @ LaoError::Truncated { .. }) => {
                self.current_frame = frame;
                self.superchunk_remaining = remaining;
                io.seek(start)?;
                Err(e)
            }
            other => other,
        }
    }

    fn duration(&self) -> Option<f64> {
        Some(f64::from(self.frames) / f64::from(HNM4_FRAME_RATE))
    }
}

/// 签名检查
pub fn probe(data: &[u8]) -> Option<FormatId> {
    data.starts_with(HNM4_SIGNATURE).then_some(FormatId::Hnm)
}

/// HNM4 格式探测器
pub struct HnmProbe;

impl FormatProbe for HnmProbe {
    fn probe(&self, data: &[u8], filename: Option<&str>) -> Option<ProbeScore> {
        if probe(data).is_some() {
            return Some(SCORE_MAX);
        }
        extension_score(FormatId::Hnm, filename)
    }

    fn format_id(&self) -> FormatId {
        FormatId::Hnm
    }
}
