//! Delphine CIN 解封装器.
//!
//! 文件结构:
//! ```text
//! 文件头: u32 0x55AA0000, u32 视频帧最大长度, u16 宽, u16 高,
//!         u32 采样率, u8 采样位数, u8 立体声, u16 音频帧长度
//! 帧: u8 视频类型, u8 音频类型, i16 调色板颜色数, u32 视频长度,
//!     u32 音频长度, u32 0xAA55AA55, 调色板 + 位图, 音频
//! ```
//!
//! 颜色数为负时调色板每项带索引字节 (4 字节), 否则为连续的 3 字节项.
//! 视频样本 = `u8 调色板类型, u16 颜色数, u8 位图类型` + 调色板 + 位图.

use bytes::Bytes;
use lao_codec::decoders::cin_video::is_intra_type;
use lao_codec::{CodecId, Packet};
use lao_core::{LaoError, LaoResult, Rational, SampleFormat};
use log::debug;

use crate::chunk;
use crate::demuxer::{Demuxer, read_signature};
use crate::format_id::FormatId;
use crate::io::IoContext;
use crate::probe::{FormatProbe, ProbeScore, SCORE_MAX, extension_score};
use crate::stream::{AudioStreamParams, Stream, VideoStreamParams};

const CIN_FILE_MAGIC: [u8; 4] = 0x55AA_0000u32.to_le_bytes();
const CIN_FRAME_MARKER: u32 = 0xAA55_AA55;
const CIN_FRAME_HEADER_SIZE: usize = 16;
const CIN_FRAME_RATE: i32 = 12;
/// 画面边长上限 (像素)
const CIN_MAX_DIMENSION: u32 = 2048;

/// 音频块长度上限的下限值
const CIN_MIN_AUDIO_BOUND: u64 = 0x10000;

/// 读取进度
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// 下一个是帧头
    FrameHeader,
    /// 视频已读出, 接下来是本帧的音频
    Audio(u64),
}

/// CIN 解封装器
pub struct CinDemuxer {
    streams: Vec<Stream>,
    phase: Phase,
    max_video_size: u64,
    audio_bound: u64,
    frame_ticks: i64,
    sample_ticks: i64,
    video_pts: i64,
    audio_pts: i64,
}

impl CinDemuxer {
    /// 创建 CIN 解封装器实例 (工厂函数)
    pub fn create() -> LaoResult<Box<dyn Demuxer>> {
        Ok(Box::new(Self::new()))
    }

    pub fn new() -> Self {
        Self {
            streams: Vec::new(),
            phase: Phase::FrameHeader,
            max_video_size: 0,
            audio_bound: CIN_MIN_AUDIO_BOUND,
            frame_ticks: 1,
            sample_ticks: 1,
            video_pts: 0,
            audio_pts: 0,
        }
    }

    fn read_video(&mut self, io: &mut IoContext, start: u64) -> LaoResult<Packet> {
        let hdr = io.read_bytes(CIN_FRAME_HEADER_SIZE)?;
        let video_type = hdr[0];
        let pal_count = i16::from_le_bytes([hdr[2], hdr[3]]);
        let video_size = u64::from(u32::from_le_bytes([hdr[4], hdr[5], hdr[6], hdr[7]]));
        let audio_size = u64::from(u32::from_le_bytes([hdr[8], hdr[9], hdr[10], hdr[11]]));
        let marker = u32::from_le_bytes([hdr[12], hdr[13], hdr[14], hdr[15]]);
        if marker != CIN_FRAME_MARKER {
            return Err(LaoError::Malformed(format!("CIN 帧标记错误: 0x{marker:08X}")));
        }

        let (palette_type, colors) = if pal_count < 0 {
            (1u8, pal_count.unsigned_abs())
        } else {
            (0u8, pal_count as u16)
        };
        if colors > 256 {
            chunk::skip_payload(io, video_size, self.max_video_size, "CIN 视频块")?;
            self.phase = Phase::Audio(audio_size);
            return Err(LaoError::Malformed(format!("CIN 调色板颜色数 {colors} 超过 256")));
        }
        let palette_len = (u64::from(palette_type) + 3) * u64::from(colors);
        let body = match chunk::read_payload(
            io,
            palette_len + video_size,
            palette_len + self.max_video_size,
            "CIN 视频块",
        ) {
            // 坏视频块已被越过, 本帧的音频仍可读取
            Err(e @ LaoError::Malformed(_)) => {
                self.phase = Phase::Audio(audio_size);
                return Err(e);
            }
            other => other?,
        };

        let mut data = Vec::with_capacity(4 + body.len());
        data.push(palette_type);
        data.extend_from_slice(&colors.to_le_bytes());
        data.push(video_type);
        data.extend_from_slice(&body);

        let pts = self.video_pts;
        self.video_pts += self.frame_ticks;
        self.phase = Phase::Audio(audio_size);
        Ok(Packet {
            data: Bytes::from(data),
            pts,
            dts: pts,
            duration: self.frame_ticks,
            time_base: self.streams[0].time_base,
            stream_index: 0,
            is_keyframe: is_intra_type(video_type),
            pos: start as i64,
        })
    }

    fn read_audio(&mut self, io: &mut IoContext, size: u64, start: u64) -> LaoResult<Packet> {
        let data = match chunk::read_payload(io, size, self.audio_bound, "CIN 音频块") {
            Err(e @ LaoError::Malformed(_)) => {
                self.phase = Phase::FrameHeader;
                return Err(e);
            }
            other => other?,
        };
        self.phase = Phase::FrameHeader;
        // 流的第一个音频块以一个 16 位原始采样开头
        let samples = data.len() as i64 - i64::from(self.audio_pts == 0);
        let pts = self.audio_pts;
        self.audio_pts += samples * self.sample_ticks;
        Ok(Packet {
            data: Bytes::from(data),
            pts,
            dts: pts,
            duration: samples * self.sample_ticks,
            time_base: self.streams[1].time_base,
            stream_index: 1,
            is_keyframe: true,
            pos: start as i64,
        })
    }
}

impl Default for CinDemuxer {
    fn default() -> Self {
        Self::new()
    }
}

impl Demuxer for CinDemuxer {
    fn format_id(&self) -> FormatId {
        FormatId::Cin
    }

    fn name(&self) -> &str {
        "dsicin"
    }

    fn open(&mut self, io: &mut IoContext) -> LaoResult<()> {
        read_signature(io, &CIN_FILE_MAGIC, "CIN")?;
        self.max_video_size = u64::from(io.read_u32_le()?);
        let width = u32::from(io.read_u16_le()?);
        let height = u32::from(io.read_u16_le()?);
        let sample_rate = io.read_u32_le()?;
        let bits = io.read_u8()?;
        let stereo = io.read_u8()?;
        let _audio_frame_size = io.read_u16_le()?;

        if width == 0 || height == 0 || width > CIN_MAX_DIMENSION || height > CIN_MAX_DIMENSION {
            return Err(LaoError::Malformed(format!("CIN 画面尺寸无效: {width}x{height}")));
        }
        if bits != 16 {
            return Err(LaoError::Unsupported(format!("CIN 音频位数 {bits}")));
        }
        if sample_rate == 0 || sample_rate > 192_000 {
            return Err(LaoError::Malformed(format!("CIN 采样率无效: {sample_rate}")));
        }
        let channels = if stereo != 0 { 2 } else { 1 };
        debug!(
            "CIN: {width}x{height}, 视频帧最大 {} 字节, 音频 {sample_rate} Hz {channels} 声道",
            self.max_video_size
        );

        let frame_unit = Rational::new(1, CIN_FRAME_RATE);
        let sample_unit = Rational::new(1, sample_rate as i32);
        let clock = frame_unit
            .common_time_base(sample_unit)
            .ok_or_else(|| LaoError::Malformed("CIN 采样率无法与帧率对齐".into()))?;
        self.frame_ticks = frame_unit.ticks_in(clock).unwrap_or(1);
        self.sample_ticks = sample_unit.ticks_in(clock).unwrap_or(1);
        self.audio_bound = (u64::from(sample_rate) * 2 * u64::from(channels)).max(CIN_MIN_AUDIO_BOUND);

        self.streams = vec![
            Stream::video(
                0,
                CodecId::CinVideo,
                clock,
                VideoStreamParams::pal8(width, height, Rational::new(CIN_FRAME_RATE, 1)),
            ),
            Stream::audio(
                1,
                CodecId::CinAudio,
                clock,
                AudioStreamParams::new(sample_rate, channels, SampleFormat::S16, 16),
            ),
        ];
        self.phase = Phase::FrameHeader;
        self.video_pts = 0;
        self.audio_pts = 0;
        Ok(())
    }

    fn streams(&self) -> &[Stream] {
        &self.streams
    }

    fn read_packet(&mut self, io: &mut IoContext) -> LaoResult<Packet> {
        loop {
            let start = io.position();
            let result = match self.phase {
                Phase::FrameHeader => {
                    chunk::ensure_more(io)?;
                    self.read_video(io, start)
                }
                // 空音频块不输出
                Phase::Audio(0) => {
                    self.phase = Phase::FrameHeader;
                    continue;
                }
                Phase::Audio(size) => self.read_audio(io, size, start),
            };
            return match result {
                Err(e @ LaoError::Truncated { .. }) => {
                    io.seek(start)?;
                    Err(e)
                }
                other => other,
            };
        }
    }

    fn duration(&self) -> Option<f64> {
        None
    }
}

/// 签名检查
pub fn probe(data: &[u8]) -> Option<FormatId> {
    // 文件头之后紧跟第一帧的帧标记
    (data.len() >= 36 && data.starts_with(&CIN_FILE_MAGIC) && data[32..36] == CIN_FRAME_MARKER.to_le_bytes())
        .then_some(FormatId::Cin)
}

/// CIN 格式探测器
pub struct CinProbe;

impl FormatProbe for CinProbe {
    fn probe(&self, data: &[u8], filename: Option<&str>) -> Option<ProbeScore> {
        if probe(data).is_some() {
            return Some(SCORE_MAX);
        }
        extension_score(FormatId::Cin, filename)
    }

    fn format_id(&self) -> FormatId {
        FormatId::Cin
    }
}
