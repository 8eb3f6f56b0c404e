//! 容器句柄.
//!
//! [`Container`] 持有字节源和选中的解封装器. 解封装器是一个封闭的枚举
//! [`AnyDemuxer`], 每种格式一个变体, 不经过注册表也能打开任何内置格式.

use lao_codec::Packet;
use lao_core::{LaoError, LaoResult};
use log::{debug, warn};

use crate::demuxer::Demuxer;
use crate::demuxers::{apc, cin, fst, h263, hnm, mve, roq, vmd, vqa, wsaud};
use crate::format_id::FormatId;
use crate::io::IoContext;
use crate::probe::{FormatProbe, ProbeOptions, ProbeResult, ProbeScore};
use crate::stream::Stream;

/// 所有内置解封装器
pub enum AnyDemuxer {
    Roq(roq::RoqDemuxer),
    Vqa(vqa::VqaDemuxer),
    Hnm(hnm::HnmDemuxer),
    Mve(mve::MveDemuxer),
    Fst(fst::FstDemuxer),
    Vmd(vmd::VmdDemuxer),
    Cin(cin::CinDemuxer),
    Apc(apc::ApcDemuxer),
    WsAud(wsaud::WsAudDemuxer),
    H263(h263::H263Demuxer),
}

macro_rules! dispatch {
    ($self:expr, $d:ident => $body:expr) => {
        match $self {
            AnyDemuxer::Roq($d) => $body,
            AnyDemuxer::Vqa($d) => $body,
            AnyDemuxer::Hnm($d) => $body,
            AnyDemuxer::Mve($d) => $body,
            AnyDemuxer::Fst($d) => $body,
            AnyDemuxer::Vmd($d) => $body,
            AnyDemuxer::Cin($d) => $body,
            AnyDemuxer::Apc($d) => $body,
            AnyDemuxer::WsAud($d) => $body,
            AnyDemuxer::H263($d) => $body,
        }
    };
}

impl AnyDemuxer {
    /// 创建指定格式的解封装器 (尚未打开)
    pub fn new(format_id: FormatId) -> Self {
        match format_id {
            FormatId::Roq => Self::Roq(roq::RoqDemuxer::new()),
            FormatId::Vqa => Self::Vqa(vqa::VqaDemuxer::new()),
            FormatId::Hnm => Self::Hnm(hnm::HnmDemuxer::new()),
            FormatId::Mve => Self::Mve(mve::MveDemuxer::new()),
            FormatId::Fst => Self::Fst(fst::FstDemuxer::new()),
            FormatId::Vmd => Self::Vmd(vmd::VmdDemuxer::new()),
            FormatId::Cin => Self::Cin(cin::CinDemuxer::new()),
            FormatId::Apc => Self::Apc(apc::ApcDemuxer::new()),
            FormatId::WsAud => Self::WsAud(wsaud::WsAudDemuxer::new()),
            FormatId::H263 => Self::H263(h263::H263Demuxer::new()),
        }
    }
}

impl Demuxer for AnyDemuxer {
    fn format_id(&self) -> FormatId {
        dispatch!(self, d => d.format_id())
    }

    fn name(&self) -> &str {
        dispatch!(self, d => d.name())
    }

    fn open(&mut self, io: &mut IoContext) -> LaoResult<()> {
        dispatch!(self, d => d.open(io))
    }

    fn streams(&self) -> &[Stream] {
        dispatch!(self, d => d.streams())
    }

    fn read_packet(&mut self, io: &mut IoContext) -> LaoResult<Packet> {
        dispatch!(self, d => d.read_packet(io))
    }

    fn duration(&self) -> Option<f64> {
        dispatch!(self, d => d.duration())
    }

    fn metadata(&self) -> &[(String, String)] {
        dispatch!(self, d => d.metadata())
    }
}

/// 给出某种格式对探测数据的打分
fn probe_score(format_id: FormatId, data: &[u8], filename: Option<&str>) -> Option<ProbeScore> {
    match format_id {
        FormatId::Roq => roq::RoqProbe.probe(data, filename),
        FormatId::Vqa => vqa::VqaProbe.probe(data, filename),
        FormatId::Hnm => hnm::HnmProbe.probe(data, filename),
        FormatId::Mve => mve::MveProbe.probe(data, filename),
        FormatId::Fst => fst::FstProbe.probe(data, filename),
        FormatId::Vmd => vmd::VmdProbe.probe(data, filename),
        FormatId::Cin => cin::CinProbe.probe(data, filename),
        FormatId::Apc => apc::ApcProbe.probe(data, filename),
        FormatId::WsAud => wsaud::WsAudProbe.probe(data, filename),
        FormatId::H263 => h263::H263Probe.probe(data, filename),
    }
}

/// 对所有内置格式打分, 按分数从高到低排列
///
/// 分数相同的格式保持 [`FormatId::ALL`] 中的先后顺序.
pub fn rank_formats(data: &[u8], filename: Option<&str>) -> Vec<ProbeResult> {
    let mut ranked: Vec<ProbeResult> = FormatId::ALL
        .iter()
        .filter_map(|&format_id| {
            probe_score(format_id, data, filename).map(|score| ProbeResult { format_id, score })
        })
        .collect();
    // 稳定排序
    ranked.sort_by(|a, b| b.score.cmp(&a.score));
    ranked
}

/// 已打开的容器
///
/// 拥有字节源; `close` 消耗句柄, 此后不能再读取. 读取到的 [`Packet`] 自己持有数据,
/// 关闭后依然有效.
pub struct Container {
    io: IoContext,
    demuxer: AnyDemuxer,
}

impl Container {
    /// 探测格式并打开容器
    pub fn open(io: IoContext) -> LaoResult<Self> {
        Self::open_with(io, None, &ProbeOptions::default())
    }

    /// 探测格式并打开容器, 可提供文件名参与扩展名匹配
    ///
    /// 按探测分数依次尝试; 候选格式在 `open` 时报告 `NotThisFormat` 就换下一个.
    pub fn open_with(
        mut io: IoContext,
        filename: Option<&str>,
        options: &ProbeOptions,
    ) -> LaoResult<Self> {
        let start = io.position();
        let head = io.peek_bytes(options.probe_size)?;
        let ranked = rank_formats(&head, filename);
        if ranked.is_empty() {
            return Err(LaoError::NotThisFormat("没有格式能识别输入数据".into()));
        }

        let mut last_err = None;
        for candidate in ranked {
            debug!(
                "尝试以 {} 打开 (探测分数 {})",
                candidate.format_id, candidate.score
            );
            io.seek(start)?;
            let mut demuxer = AnyDemuxer::new(candidate.format_id);
            match demuxer.open(&mut io) {
                Ok(()) => return Ok(Self { io, demuxer }),
                Err(e @ LaoError::NotThisFormat(_)) => {
                    warn!("{} 不接受输入: {e}", candidate.format_id);
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err.unwrap_or_else(|| LaoError::NotThisFormat("没有格式能识别输入数据".into())))
    }

    /// 以指定格式打开容器, 不做探测
    pub fn open_format(format_id: FormatId, mut io: IoContext) -> LaoResult<Self> {
        let mut demuxer = AnyDemuxer::new(format_id);
        demuxer.open(&mut io)?;
        debug!("{format_id}: {} 条流", demuxer.streams().len());
        Ok(Self { io, demuxer })
    }

    /// 容器格式
    pub fn format_id(&self) -> FormatId {
        self.demuxer.format_id()
    }

    /// 所有流信息
    pub fn streams(&self) -> &[Stream] {
        self.demuxer.streams()
    }

    /// 按物理顺序读取下一个样本, 结束时返回 `Eof`
    pub fn next_sample(&mut self) -> LaoResult<Packet> {
        self.demuxer.read_packet(&mut self.io)
    }

    /// 容器时长 (秒)
    pub fn duration(&self) -> Option<f64> {
        self.demuxer.duration()
    }

    /// 容器元数据
    pub fn metadata(&self) -> &[(String, String)] {
        self.demuxer.metadata()
    }

    /// 当前读取位置
    pub fn position(&self) -> u64 {
        self.io.position()
    }

    /// 关闭容器, 取回字节源
    pub fn close(self) -> IoContext {
        debug!("关闭 {} 容器", self.demuxer.format_id());
        self.io
    }
}

impl Iterator for Container {
    type Item = LaoResult<Packet>;

    /// `Eof` 结束迭代, 其他错误照常交给调用方
    fn next(&mut self) -> Option<Self::Item> {
        match self.next_sample() {
            Err(LaoError::Eof) => None,
            other => Some(other),
        }
    }
}
