//! Sierra VMD 解封装器.
//!
//! 文件结构:
//! ```text
//! 0x330 字节文件头 (小端):
//!   0: u16 0x32E, 4: 版本, 6: u16 块数, 8/10: u16 画面偏移, 12/14: u16 宽高,
//!   18: u16 每块帧记录数, 28: 6 位调色板, 800: u32 LZ 缓冲大小,
//!   804: u16 采样率, 806: u16 音频块大小 (0x8000 置位为 16 位),
//!   808: u16 预载块数, 811: 0x80 置位为立体声, 812: u32 目录偏移
//! 目录: 块数 x 6 字节 (偏移在 +2), 之后是 块数 x 每块帧记录数 x 16 字节的帧记录
//! 帧记录: u8 类型 (1 音频, 2 视频), u8, u32 长度, 10 字节参数
//! ```
//!
//! 目录展开后的顺序即输出顺序. 数据包 = 帧记录的后 10 字节 + 数据.
//! 长度为 0 的视频记录 (重复上一帧) 也会输出.

use bytes::Bytes;
use lao_codec::decoders::vmd_video::VMD_HEADER_SIZE;
use lao_codec::{CodecId, Packet};
use lao_core::{LaoError, LaoResult, Rational, SampleFormat};
use log::{debug, warn};

use crate::chunk;
use crate::demuxer::Demuxer;
use crate::format_id::FormatId;
use crate::io::IoContext;
use crate::probe::{FormatProbe, ProbeScore, SCORE_EXTENSION, extension_score};
use crate::stream::{AudioStreamParams, Stream, VideoStreamParams};

const VMD_MAGIC: u16 = (VMD_HEADER_SIZE - 2) as u16;
const BLOCK_RECORD_SIZE: u64 = 6;
const FRAME_RECORD_SIZE: usize = 16;
/// 数据包里保留的帧记录部分
const RECORD_TAIL_OFFSET: usize = 6;

const FRAME_TYPE_AUDIO: u8 = 1;
const FRAME_TYPE_VIDEO: u8 = 2;
/// 音频负载首字节: 文件开头的预载块
const AUDIO_BLOCK_INITIAL: u8 = 2;

/// 没有音频时的视频帧率
const VMD_DEFAULT_FPS: i32 = 10;

/// 只凭文件头字段判断, 可信度不高
const SCORE_VMD: ProbeScore = SCORE_EXTENSION / 2;

/// 展开后的一项
#[derive(Debug, Clone)]
struct VmdEntry {
    stream_index: usize,
    offset: u64,
    size: u64,
    record: [u8; FRAME_RECORD_SIZE],
    pts: i64,
    duration: i64,
    is_keyframe: bool,
}

/// VMD 解封装器
pub struct VmdDemuxer {
    streams: Vec<Stream>,
    schedule: Vec<VmdEntry>,
    next: usize,
    /// 帧数据位于目录之前, 单项长度不会超过目录偏移
    data_bound: u64,
    blocks: u32,
}

impl VmdDemuxer {
    /// 创建 VMD 解封装器实例 (工厂函数)
    pub fn create() -> LaoResult<Box<dyn Demuxer>> {
        Ok(Box::new(Self::new()))
    }

    pub fn new() -> Self {
        Self {
            streams: Vec::new(),
            schedule: Vec::new(),
            next: 0,
            data_bound: 0,
            blocks: 0,
        }
    }

    /// 展开后的条目数
    pub fn schedule_len(&self) -> usize {
        self.schedule.len()
    }
}

impl Default for VmdDemuxer {
    fn default() -> Self {
        Self::new()
    }
}

fn le16(h: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([h[at], h[at + 1]])
}

fn le32(h: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([h[at], h[at + 1], h[at + 2], h[at + 3]])
}

impl Demuxer for VmdDemuxer {
    fn format_id(&self) -> FormatId {
        FormatId::Vmd
    }

    fn name(&self) -> &str {
        "vmd"
    }

    fn open(&mut self, io: &mut IoContext) -> LaoResult<()> {
        let prefix = io.peek_bytes(2)?;
        if prefix.len() == 2 && le16(&prefix, 0) != VMD_MAGIC {
            return Err(LaoError::NotThisFormat("VMD 文件头标记不符".into()));
        }
        let header = io.read_bytes(VMD_HEADER_SIZE)?;
        let width = u32::from(le16(&header, 12));
        let height = u32::from(le16(&header, 14));
        if width == 0 || height == 0 || width > 2048 || height > 2048 {
            return Err(LaoError::Malformed(format!("VMD 画面尺寸无效: {width}x{height}")));
        }
        let blocks = u32::from(le16(&header, 6));
        let frames_per_block = u64::from(le16(&header, 18));
        let sample_rate = u32::from(le16(&header, 804));
        let raw_align = le16(&header, 806);
        let sound_buffers = i64::from(le16(&header, 808));
        let toc_offset = u64::from(le32(&header, 812));

        // 音频参数与时钟
        let audio = (sample_rate > 0).then(|| {
            let (bits, block_align) = if raw_align & 0x8000 != 0 {
                (16, 0x10000 - u32::from(raw_align))
            } else {
                (8, u32::from(raw_align))
            };
            let channels = if header[811] & 0x80 != 0 { 2 } else { 1 };
            (bits, block_align, channels)
        });
        let clock = match audio {
            Some((_, block_align, channels)) if block_align > 0 => {
                Rational::new(block_align as i32, (sample_rate * channels) as i32).reduce()
            }
            Some(_) => return Err(LaoError::Malformed("VMD 音频块大小为 0".into())),
            None => Rational::new(1, VMD_DEFAULT_FPS),
        };

        // 目录
        let toc_size = u64::from(blocks) * (BLOCK_RECORD_SIZE + frames_per_block * FRAME_RECORD_SIZE as u64);
        if toc_offset < VMD_HEADER_SIZE as u64 || toc_offset.saturating_add(toc_size) > io.size() {
            return Err(LaoError::Malformed(format!(
                "VMD 目录 (偏移 {toc_offset}, {blocks} 块) 超出文件范围"
            )));
        }
        io.seek(toc_offset)?;
        let block_table = io.read_bytes((u64::from(blocks) * BLOCK_RECORD_SIZE) as usize)?;

        let mut schedule = Vec::new();
        let mut audio_pts = 0i64;
        let mut first_video = true;
        for block in 0..blocks as usize {
            let mut offset = u64::from(le32(&block_table, block * BLOCK_RECORD_SIZE as usize + 2));
            for _ in 0..frames_per_block {
                let mut record = [0u8; FRAME_RECORD_SIZE];
                io.read_exact(&mut record)?;
                let kind = record[0];
                let size = u64::from(le32(&record, 2));
                if size == 0 && kind != FRAME_TYPE_AUDIO && kind != FRAME_TYPE_VIDEO {
                    continue;
                }
                let entry = match kind {
                    FRAME_TYPE_AUDIO if audio.is_some() => {
                        // 预载块一次带多个音频块
                        let duration = if record[RECORD_TAIL_OFFSET] == AUDIO_BLOCK_INITIAL {
                            sound_buffers.max(1)
                        } else {
                            1
                        };
                        let pts = audio_pts;
                        audio_pts += duration;
                        Some((1, pts, duration, true))
                    }
                    FRAME_TYPE_VIDEO => {
                        let key = first_video && size > 0;
                        first_video &= size == 0;
                        Some((0, block as i64, 1, key))
                    }
                    FRAME_TYPE_AUDIO => None,
                    other => {
                        warn!("VMD: 跳过类型 {other} 的帧记录");
                        None
                    }
                };
                if let Some((stream_index, pts, duration, is_keyframe)) = entry {
                    schedule.push(VmdEntry {
                        stream_index,
                        offset,
                        size,
                        record,
                        pts,
                        duration,
                        is_keyframe,
                    });
                }
                offset = offset.saturating_add(size);
            }
        }
        debug!(
            "VMD: {width}x{height}, {blocks} 块, 每块 {frames_per_block} 条记录, 展开后 {} 项, 音频: {:?}",
            schedule.len(),
            audio
        );

        let mut video = Stream::video(
            0,
            CodecId::VmdVideo,
            clock,
            VideoStreamParams::pal8(width, height, clock.invert()),
        )
        .with_extra_data(header);
        video.nb_frames = u64::from(blocks);
        video.duration = i64::from(blocks);
        self.streams = vec![video];
        if let Some((bits, block_align, channels)) = audio {
            let fmt = if bits == 16 {
                SampleFormat::S16
            } else {
                SampleFormat::U8
            };
            let mut params = AudioStreamParams::new(sample_rate, channels, fmt, bits);
            params.block_align = block_align;
            params.frame_size = block_align / channels;
            self.streams.push(Stream::audio(1, CodecId::VmdAudio, clock, params));
        }
        self.schedule = schedule;
        self.next = 0;
        self.data_bound = toc_offset;
        self.blocks = blocks;
        Ok(())
    }

    fn streams(&self) -> &[Stream] {
        &self.streams
    }

    fn read_packet(&mut self, io: &mut IoContext) -> LaoResult<Packet> {
        let Some(entry) = self.schedule.get(self.next).cloned() else {
            return Err(LaoError::Eof);
        };
        let start = io.position();
        if entry.offset > io.size() {
            return Err(LaoError::truncated(
                (entry.offset - io.size()) as usize,
                0,
            ));
        }
        io.seek(entry.offset)?;
        let data = match chunk::read_payload(io, entry.size, self.data_bound, "VMD 帧") {
            Ok(d) => d,
            Err(e @ LaoError::Truncated { .. }) => {
                io.seek(start)?;
                return Err(e);
            }
            Err(e) => {
                self.next += 1;
                return Err(e);
            }
        };
        self.next += 1;

        let mut payload = Vec::with_capacity(FRAME_RECORD_SIZE - RECORD_TAIL_OFFSET + data.len());
        payload.extend_from_slice(&entry.record[RECORD_TAIL_OFFSET..]);
        payload.extend_from_slice(&data);
        Ok(Packet {
            data: Bytes::from(payload),
            pts: entry.pts,
            dts: entry.pts,
            duration: entry.duration,
            time_base: self.streams[entry.stream_index].time_base,
            stream_index: entry.stream_index,
            is_keyframe: entry.is_keyframe,
            pos: entry.offset as i64,
        })
    }

    fn duration(&self) -> Option<f64> {
        let tb = self.streams.first()?.time_base;
        Some(f64::from(self.blocks) * tb.to_f64())
    }
}

/// 文件头检查
pub fn probe(data: &[u8]) -> Option<FormatId> {
    if data.len() < 16 || le16(data, 0) != VMD_MAGIC {
        return None;
    }
    let (w, h) = (le16(data, 12), le16(data, 14));
    (w > 0 && w <= 2048 && h > 0 && h <= 2048).then_some(FormatId::Vmd)
}

/// VMD 格式探测器
pub struct VmdProbe;

impl FormatProbe for VmdProbe {
    fn probe(&self, data: &[u8], filename: Option<&str>) -> Option<ProbeScore> {
        let by_ext = extension_score(FormatId::Vmd, filename);
        let by_header = probe(data).map(|_| SCORE_VMD);
        by_ext.max(by_header)
    }

    fn format_id(&self) -> FormatId {
        FormatId::Vmd
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Record {
        kind: u8,
        tail: [u8; 10],
        data: Vec<u8>,
    }

    fn make_vmd(rate: u16, align: u16, blocks: &[Vec<Record>]) -> Vec<u8> {
        let per_block = blocks.iter().map(Vec::len).max().unwrap_or(0);
        let mut header = vec![0u8; VMD_HEADER_SIZE];
        header[0..2].copy_from_slice(&VMD_MAGIC.to_le_bytes());
        header[6..8].copy_from_slice(&(blocks.len() as u16).to_le_bytes());
        header[12..14].copy_from_slice(&8u16.to_le_bytes());
        header[14..16].copy_from_slice(&4u16.to_le_bytes());
        header[18..20].copy_from_slice(&(per_block as u16).to_le_bytes());
        header[804..806].copy_from_slice(&rate.to_le_bytes());
        header[806..808].copy_from_slice(&align.to_le_bytes());
        header[808..810].copy_from_slice(&3u16.to_le_bytes());

        let mut data = Vec::new();
        let mut table = Vec::new();
        let mut records = Vec::new();
        for block in blocks {
            let offset = (VMD_HEADER_SIZE + data.len()) as u32;
            table.extend_from_slice(&[0, 0]);
            table.extend_from_slice(&offset.to_le_bytes());
            for i in 0..per_block {
                let mut rec = [0u8; FRAME_RECORD_SIZE];
                if let Some(r) = block.get(i) {
                    rec[0] = r.kind;
                    rec[2..6].copy_from_slice(&(r.data.len() as u32).to_le_bytes());
                    rec[6..].copy_from_slice(&r.tail);
                    data.extend_from_slice(&r.data);
                }
                records.extend_from_slice(&rec);
            }
        }
        let toc = (VMD_HEADER_SIZE + data.len()) as u32;
        header[812..816].copy_from_slice(&toc.to_le_bytes());
        let mut buf = header;
        buf.extend(data);
        buf.extend(table);
        buf.extend(records);
        buf
    }

    fn audio(first: bool, n: usize) -> Record {
        let mut tail = [0u8; 10];
        tail[0] = if first { AUDIO_BLOCK_INITIAL } else { 1 };
        Record {
            kind: FRAME_TYPE_AUDIO,
            tail,
            data: vec![0x80; n],
        }
    }

    fn video(n: usize) -> Record {
        Record {
            kind: FRAME_TYPE_VIDEO,
            tail: [0, 0, 0, 0, 7, 0, 3, 0, 0, 0],
            data: vec![0; n],
        }
    }

    #[test]
    fn test_探测() {
        let data = make_vmd(0, 0, &[vec![video(4)]]);
        assert_eq!(probe(&data), Some(FormatId::Vmd));
        assert_eq!(VmdProbe.probe(&data, None), Some(SCORE_VMD));
        assert_eq!(VmdProbe.probe(&data, Some("intro.vmd")), Some(SCORE_EXTENSION));
    }

    #[test]
    fn test_按目录顺序输出() {
        let data = make_vmd(
            22050,
            735,
            &[vec![audio(true, 4), video(5)], vec![audio(false, 2), video(3)]],
        );
        let mut io = IoContext::from_memory(data);
        let mut demuxer = VmdDemuxer::new();
        demuxer.open(&mut io).unwrap();
        assert_eq!(demuxer.streams().len(), 2);
        // 735 / 22050 = 1/30
        assert_eq!(demuxer.streams()[0].time_base, Rational::new(1, 30));
        assert_eq!(demuxer.schedule_len(), 4);

        let a1 = demuxer.read_packet(&mut io).unwrap();
        assert_eq!((a1.stream_index, a1.pts, a1.duration), (1, 0, 3));
        assert_eq!(a1.size(), 10 + 4);
        let v1 = demuxer.read_packet(&mut io).unwrap();
        assert_eq!((v1.stream_index, v1.pts), (0, 0));
        assert!(v1.is_keyframe);
        assert_eq!(&v1.data[..10], &[0, 0, 0, 0, 7, 0, 3, 0, 0, 0]);
        let a2 = demuxer.read_packet(&mut io).unwrap();
        assert_eq!(a2.pts, 3);
        let v2 = demuxer.read_packet(&mut io).unwrap();
        assert_eq!(v2.pts, 1);
        assert!(!v2.is_keyframe);
        assert!(matches!(demuxer.read_packet(&mut io), Err(LaoError::Eof)));
    }

    #[test]
    fn test_空视频记录照常输出() {
        let data = make_vmd(0, 0, &[vec![video(4)], vec![video(0)], vec![video(4)]]);
        let mut io = IoContext::from_memory(data);
        let mut demuxer = VmdDemuxer::new();
        demuxer.open(&mut io).unwrap();
        assert_eq!(demuxer.schedule_len(), 3);

        let mut got = Vec::new();
        loop {
            match demuxer.read_packet(&mut io) {
                Ok(p) => got.push((p.pts, p.size(), p.is_keyframe)),
                Err(LaoError::Eof) => break,
                Err(e) => panic!("意外错误: {e}"),
            }
        }
        assert_eq!(got, vec![(0, 14, true), (1, 10, false), (2, 14, false)]);
    }

    #[test]
    fn test_十六位音频块大小() {
        let data = make_vmd(22050, 0x10000u32.wrapping_sub(1470) as u16, &[vec![video(1)]]);
        let mut io = IoContext::from_memory(data);
        let mut demuxer = VmdDemuxer::new();
        demuxer.open(&mut io).unwrap();
        let a = demuxer.streams()[1].audio_params().unwrap();
        assert_eq!((a.bits_per_sample, a.block_align), (16, 1470));
    }

    #[test]
    fn test_目录超出文件() {
        let mut data = make_vmd(0, 0, &[vec![video(4)]]);
        data[6..8].copy_from_slice(&5000u16.to_le_bytes());
        let mut io = IoContext::from_memory(data);
        assert!(matches!(
            VmdDemuxer::new().open(&mut io),
            Err(LaoError::Malformed(_))
        ));
    }

    #[test]
    fn test_非_vmd() {
        let mut io = IoContext::from_memory(vec![0u8; 64]);
        assert!(matches!(
            VmdDemuxer::new().open(&mut io),
            Err(LaoError::NotThisFormat(_))
        ));
    }
}
