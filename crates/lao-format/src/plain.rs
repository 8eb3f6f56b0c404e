//! 平铺容器的通用解封装器.
//!
//! 很多简单格式没有交织表, 每种媒体最多一条流, 数据区就是一串形状相同的
//! "记录头 + 负载". [`PlainLayout`] 只描述文件头和单条记录头的解析,
//! [`PlainDemuxer`] 负责扫描循环、时间戳累加、零长度负载的转发以及
//! `Truncated`/`Malformed` 的区分.

use bytes::Bytes;
use lao_codec::Packet;
use lao_core::{LaoError, LaoResult};

use crate::chunk;
use crate::demuxer::Demuxer;
use crate::format_id::FormatId;
use crate::io::IoContext;
use crate::stream::Stream;

/// 一条记录的头部信息
#[derive(Debug, Clone)]
pub struct RecordHeader {
    /// 所属流的索引
    pub stream_index: usize,
    /// 负载长度 (读取位置此时位于负载开头)
    pub payload_len: u64,
    /// 负载长度的合理上限, 超过即为 `Malformed`
    pub bound: u64,
    /// 放在负载前面的额外字节 (例如重新拼上的长度字段)
    pub prefix: Vec<u8>,
    /// 时长, 以容器时钟为单位
    pub duration: i64,
    /// 是否可以从这里开始解码
    pub is_keyframe: bool,
}

/// 平铺容器的布局描述
pub trait PlainLayout: Default + Send {
    /// 格式标识
    const FORMAT_ID: FormatId;
    /// 格式名称
    const NAME: &'static str;

    /// 解析文件头, 返回流信息; 返回后读取位置应在第一条记录处
    fn read_header(&mut self, io: &mut IoContext) -> LaoResult<Vec<Stream>>;

    /// 解析下一条记录头; 数据区结束时返回 `Eof`
    fn read_record(&mut self, io: &mut IoContext) -> LaoResult<RecordHeader>;

    /// 容器时长 (秒)
    fn duration(&self) -> Option<f64> {
        None
    }
}

/// 平铺容器解封装器
pub struct PlainDemuxer<L: PlainLayout> {
    layout: L,
    /// 流信息
    streams: Vec<Stream>,
    /// 每条流下一个数据包的时间戳
    next_pts: Vec<i64>,
}

impl<L: PlainLayout + 'static> PlainDemuxer<L> {
    /// 创建解封装器实例
    pub fn new() -> Self {
        Self {
            layout: L::default(),
            streams: Vec::new(),
            next_pts: Vec::new(),
        }
    }

    /// 工厂函数
    pub fn create() -> LaoResult<Box<dyn Demuxer>> {
        Ok(Box::new(Self::new()))
    }

    /// 布局的解析状态
    pub fn layout(&self) -> &L {
        &self.layout
    }
}

impl<L: PlainLayout + 'static> Default for PlainDemuxer<L> {
    fn default() -> Self {
        Self::new()
    }
}

impl<L: PlainLayout> Demuxer for PlainDemuxer<L> {
    fn format_id(&self) -> FormatId {
        L::FORMAT_ID
    }

    fn name(&self) -> &str {
        L::NAME
    }

    fn open(&mut self, io: &mut IoContext) -> LaoResult<()> {
        self.streams = self.layout.read_header(io)?;
        self.next_pts = vec![0; self.streams.len()];
        Ok(())
    }

    fn streams(&self) -> &[Stream] {
        &self.streams
    }

    fn read_packet(&mut self, io: &mut IoContext) -> LaoResult<Packet> {
        let start = io.position();
        let record = match self.layout.read_record(io) {
            Ok(r) => r,
            Err(e @ LaoError::Truncated { .. }) => {
                io.seek(start)?;
                return Err(e);
            }
            Err(e) => return Err(e),
        };
        let stream = self
            .streams
            .get(record.stream_index)
            .ok_or(LaoError::StreamNotFound(record.stream_index))?;

        let payload = match chunk::read_payload(io, record.payload_len, record.bound, L::NAME) {
            Ok(p) => p,
            Err(e @ LaoError::Truncated { .. }) => {
                // 回到记录头, 补齐数据后可以重读
                io.seek(start)?;
                return Err(e);
            }
            Err(e) => return Err(e),
        };
        let data = if record.prefix.is_empty() {
            payload
        } else {
            let mut data = record.prefix;
            data.extend_from_slice(&payload);
            data
        };

        let pts = self.next_pts[record.stream_index];
        self.next_pts[record.stream_index] += record.duration;
        Ok(Packet {
            data: Bytes::from(data),
            pts,
            dts: pts,
            duration: record.duration,
            time_base: stream.time_base,
            stream_index: record.stream_index,
            is_keyframe: record.is_keyframe,
            pos: start as i64,
        })
    }

    fn duration(&self) -> Option<f64> {
        self.layout.duration()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::AudioStreamParams;
    use lao_codec::CodecId;
    use lao_core::{Rational, SampleFormat};

    /// 测试用布局: 2 字节魔数 "PL", 然后是 `u8 长度` + 负载
    #[derive(Default)]
    struct ToyLayout {
        records: usize,
    }

    impl PlainLayout for ToyLayout {
        const FORMAT_ID: FormatId = FormatId::Apc;
        const NAME: &'static str = "toy";

        fn read_header(&mut self, io: &mut IoContext) -> LaoResult<Vec<Stream>> {
            crate::demuxer::read_signature(io, b"PL", "toy")?;
            Ok(vec![Stream::audio(
                0,
                CodecId::PcmU8,
                Rational::new(1, 8000),
                AudioStreamParams::new(8000, 1, SampleFormat::U8, 8),
            )])
        }

        fn read_record(&mut self, io: &mut IoContext) -> LaoResult<RecordHeader> {
            chunk::ensure_more(io)?;
            let len = u64::from(io.read_u8()?);
            self.records += 1;
            Ok(RecordHeader {
                stream_index: 0,
                payload_len: len,
                bound: 16,
                prefix: Vec::new(),
                duration: len as i64,
                is_keyframe: self.records == 1,
            })
        }
    }

    fn open(data: Vec<u8>) -> (PlainDemuxer<ToyLayout>, IoContext) {
        let mut io = IoContext::from_memory(data);
        let mut demuxer = PlainDemuxer::<ToyLayout>::new();
        demuxer.open(&mut io).unwrap();
        (demuxer, io)
    }

    #[test]
    fn test_逐条读取并累加时间戳() {
        let (mut demuxer, mut io) = open(vec![b'P', b'L', 2, 1, 2, 0, 3, 7, 8, 9]);
        let p1 = demuxer.read_packet(&mut io).unwrap();
        assert_eq!((p1.pts, p1.data.as_ref()), (0, &[1u8, 2][..]));
        assert!(p1.is_keyframe);
        // 零长度负载照样转发
        let p2 = demuxer.read_packet(&mut io).unwrap();
        assert!(p2.is_empty());
        assert_eq!(p2.pts, 2);
        let p3 = demuxer.read_packet(&mut io).unwrap();
        assert_eq!(p3.pts, 2);
        assert!(!p3.is_keyframe);
        assert!(matches!(demuxer.read_packet(&mut io), Err(LaoError::Eof)));
    }

    #[test]
    fn test_截断后可重读() {
        let (mut demuxer, mut io) = open(vec![b'P', b'L', 4, 1, 2]);
        assert!(matches!(
            demuxer.read_packet(&mut io),
            Err(LaoError::Truncated { .. })
        ));
        assert_eq!(io.position(), 2);
    }

    #[test]
    fn test_长度不可信后安全返回() {
        let (mut demuxer, mut io) = open(vec![b'P', b'L', 200, 1, 2]);
        assert!(matches!(
            demuxer.read_packet(&mut io),
            Err(LaoError::Malformed(_))
        ));
        assert!(matches!(demuxer.read_packet(&mut io), Err(LaoError::Eof)));
        assert!(matches!(demuxer.read_packet(&mut io), Err(LaoError::Eof)));
    }

    #[test]
    fn test_签名不符() {
        let mut io = IoContext::from_memory(vec![b'X', b'Y', 0]);
        let mut demuxer = PlainDemuxer::<ToyLayout>::new();
        assert!(matches!(
            demuxer.open(&mut io),
            Err(LaoError::NotThisFormat(_))
        ));
    }
}
