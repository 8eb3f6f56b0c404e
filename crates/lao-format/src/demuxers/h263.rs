//! H.263 风格窄带视频裸流.
//!
//! 没有容器结构, 从一个图像起始码到下一个起始码之间的字节就是一个样本.
//! 图像头给出时间参考 (TR, 单位 1001/30000 秒, 8 位回绕)、源格式和编码类型.

use lao_codec::CodecId;
use lao_codec::parsers::h263::{H263PictureHeader, find_picture_start, is_picture_start, parse_picture_header};
use lao_core::{LaoError, LaoResult, PixelFormat, Rational};
use log::{debug, warn};

use crate::chunk;
use crate::format_id::FormatId;
use crate::io::IoContext;
use crate::plain::{PlainDemuxer, PlainLayout, RecordHeader};
use crate::probe::{FormatProbe, ProbeScore, SCORE_EXTENSION, SCORE_WEAK, extension_score};
use crate::stream::{Stream, VideoStreamParams};

/// 时钟: 一个 TR 单位
const H263_TIME_BASE: Rational = Rational::new(1001, 30000);

/// 查找下一个起始码时的初始窗口
const SCAN_WINDOW: usize = 0x10000;

/// 单个图像的长度上限
const MAX_PICTURE_SIZE: u64 = 4 * 1024 * 1024;

/// 解析图像头所需的字节数
const HEADER_PEEK: usize = 16;

/// H.263 裸流布局
#[derive(Debug, Default)]
pub struct H263Layout;

impl H263Layout {
    /// 查找当前图像的长度; 超过上限时返回 None
    fn picture_len(io: &mut IoContext) -> LaoResult<Option<u64>> {
        let mut window = SCAN_WINDOW;
        loop {
            let buf = io.peek_bytes(window)?;
            if let Some(next) = find_picture_start(&buf, 3) {
                return Ok(Some(next as u64));
            }
            if (buf.len() as u64) < window as u64 {
                // 最后一个图像延伸到流末尾
                return Ok(Some(buf.len() as u64));
            }
            if window as u64 > MAX_PICTURE_SIZE {
                return Ok(None);
            }
            window *= 2;
        }
    }

    /// 跳过起始码之前的垃圾字节
    fn resync(io: &mut IoContext) -> LaoResult<()> {
        let buf = io.peek_bytes(3)?;
        if is_picture_start(&buf, 0) {
            return Ok(());
        }
        let mut skipped = 0u64;
        loop {
            let buf = io.peek_bytes(SCAN_WINDOW)?;
            match find_picture_start(&buf, 0) {
                Some(at) => {
                    io.skip(at as u64)?;
                    skipped += at as u64;
                    break;
                }
                None if buf.len() < 3 => {
                    io.skip(buf.len() as u64)?;
                    skipped += buf.len() as u64;
                    break;
                }
                // 保留最后两个字节, 起始码可能跨窗口
                None => {
                    let step = buf.len() as u64 - 2;
                    io.skip(step)?;
                    skipped += step;
                }
            }
        }
        warn!("H.263: 跳过 {skipped} 字节到下一个图像起始码");
        Ok(())
    }

    fn header_at(io: &mut IoContext, offset: u64) -> LaoResult<Option<H263PictureHeader>> {
        let start = io.position();
        io.seek(start + offset)?;
        let buf = io.peek_bytes(HEADER_PEEK);
        io.seek(start)?;
        Ok(buf.ok().and_then(|b| parse_picture_header(&b).ok()))
    }
}

impl PlainLayout for H263Layout {
    const FORMAT_ID: FormatId = FormatId::H263;
    const NAME: &'static str = "h263";

    fn read_header(&mut self, io: &mut IoContext) -> LaoResult<Vec<Stream>> {
        let head = io.peek_bytes(HEADER_PEEK)?;
        if !is_picture_start(&head, 0) {
            return Err(LaoError::NotThisFormat("缺少 H.263 图像起始码".into()));
        }
        let header = parse_picture_header(&head)?;
        let (width, height) = header
            .source_format
            .and_then(|f| f.dimensions())
            .unwrap_or((0, 0));
        debug!("H.263: 首个图像 {header:?}, {width}x{height}");

        let params = VideoStreamParams {
            width,
            height,
            pixel_format: PixelFormat::None,
            frame_rate: H263_TIME_BASE.invert(),
            sample_aspect_ratio: Rational::new(12, 11),
            bit_rate: 0,
        };
        Ok(vec![Stream::video(0, CodecId::H263, H263_TIME_BASE, params)])
    }

    fn read_record(&mut self, io: &mut IoContext) -> LaoResult<RecordHeader> {
        chunk::ensure_more(io)?;
        Self::resync(io)?;
        chunk::ensure_more(io)?;

        let Some(len) = Self::picture_len(io)? else {
            // 找不到结尾, 交给长度检查报告并跳过
            return Ok(RecordHeader {
                stream_index: 0,
                payload_len: MAX_PICTURE_SIZE + 1,
                bound: MAX_PICTURE_SIZE,
                prefix: Vec::new(),
                duration: 0,
                is_keyframe: false,
            });
        };
        let Some(current) = Self::header_at(io, 0)? else {
            io.skip(len)?;
            return Err(LaoError::Malformed("H.263 图像头无法解析".into()));
        };
        // 时长取到下一个图像的 TR 差, TR 相同视为相邻帧
        let duration = match Self::header_at(io, len)? {
            Some(next) => match next.temporal_reference.wrapping_sub(current.temporal_reference) {
                0 => 1,
                d => i64::from(d),
            },
            None => 1,
        };
        Ok(RecordHeader {
            stream_index: 0,
            payload_len: len,
            bound: MAX_PICTURE_SIZE,
            prefix: Vec::new(),
            duration,
            is_keyframe: current.is_intra(),
        })
    }
}

/// H.263 裸流解封装器
pub type H263Demuxer = PlainDemuxer<H263Layout>;

/// 起始码与图像头检查
pub fn probe(data: &[u8]) -> Option<FormatId> {
    let header = parse_picture_header(data).ok()?;
    (is_picture_start(data, 0) && header.source_format.is_some()).then_some(FormatId::H263)
}

/// H.263 格式探测器
///
/// 22 位起始码很容易偶然出现, 缓冲区里还有第二个起始码时才给较高分数.
pub struct H263Probe;

impl FormatProbe for H263Probe {
    fn probe(&self, data: &[u8], filename: Option<&str>) -> Option<ProbeScore> {
        let by_ext = extension_score(FormatId::H263, filename);
        let by_data = probe(data).map(|_| {
            if find_picture_start(data, 3).is_some() {
                SCORE_WEAK
            } else {
                SCORE_EXTENSION / 2
            }
        });
        by_ext.max(by_data)
    }

    fn format_id(&self) -> FormatId {
        FormatId::H263
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::demuxer::Demuxer;

    /// 基本 PTYPE 的 QCIF 图像头 + 若干字节
    fn picture(tr: u8, intra: bool, body: usize) -> Vec<u8> {
        // PSC(22) TR(8) 1 0 000 010 type 0000 quant(5) = 48 位
        let mut bits: u64 = 0x20;
        bits = (bits << 8) | u64::from(tr);
        bits = (bits << 2) | 0b10;
        bits = (bits << 3) | 0;
        bits = (bits << 3) | 0b010;
        bits = (bits << 1) | u64::from(!intra);
        bits = (bits << 4) | 0;
        bits = (bits << 5) | 8;
        let mut v = bits.to_be_bytes()[2..].to_vec();
        v.extend(std::iter::repeat_n(0x55, body));
        v
    }

    fn open(data: Vec<u8>) -> (H263Demuxer, IoContext) {
        let mut io = IoContext::from_memory(data);
        let mut demuxer = H263Demuxer::new();
        demuxer.open(&mut io).unwrap();
        (demuxer, io)
    }

    #[test]
    fn test_探测() {
        let mut data = picture(0, true, 4);
        assert_eq!(probe(&data), Some(FormatId::H263));
        assert_eq!(H263Probe.probe(&data, None), Some(SCORE_EXTENSION / 2));
        data.extend(picture(1, false, 4));
        assert_eq!(H263Probe.probe(&data, None), Some(SCORE_WEAK));
        assert_eq!(probe(b"RIFF\0\0\0\0"), None);
    }

    #[test]
    fn test_按起始码切分() {
        let mut data = picture(0, true, 10);
        data.extend(picture(2, false, 5));
        data.extend(picture(3, false, 1));
        let (mut demuxer, mut io) = open(data);
        let v = demuxer.streams()[0].video_params().unwrap();
        assert_eq!((v.width, v.height), (176, 144));

        let p1 = demuxer.read_packet(&mut io).unwrap();
        assert_eq!(p1.size(), 16);
        assert!(p1.is_keyframe);
        assert_eq!((p1.pts, p1.duration), (0, 2));
        let p2 = demuxer.read_packet(&mut io).unwrap();
        assert_eq!((p2.pts, p2.size()), (2, 11));
        assert!(!p2.is_keyframe);
        let p3 = demuxer.read_packet(&mut io).unwrap();
        assert_eq!(p3.pts, 3);
        assert!(matches!(demuxer.read_packet(&mut io), Err(LaoError::Eof)));
    }

    #[test]
    fn test_时间参考回绕() {
        let mut data = picture(254, true, 2);
        data.extend(picture(1, false, 2));
        data.extend(picture(2, false, 2));
        let (mut demuxer, mut io) = open(data);
        let p1 = demuxer.read_packet(&mut io).unwrap();
        assert_eq!(p1.duration, 3);
        let p2 = demuxer.read_packet(&mut io).unwrap();
        assert_eq!(p2.pts, 3);
    }

    #[test]
    fn test_不是起始码() {
        let mut io = IoContext::from_memory(vec![0x12, 0x34, 0x56, 0x78]);
        assert!(matches!(
            H263Demuxer::new().open(&mut io),
            Err(LaoError::NotThisFormat(_))
        ));
    }
}
