//! 解封装器实现模块.

pub mod apc;
pub mod cin;
pub mod fst;
pub mod h263;
pub mod hnm;
pub mod mve;
pub mod roq;
pub mod vmd;
pub mod vqa;
pub mod wsaud;

use crate::format_id::FormatId;
use crate::registry::FormatRegistry;

/// 注册所有内置解封装器
///
/// 注册顺序即 [`FormatId::ALL`] 的优先顺序, 探测分数相同时先注册的胜出.
pub fn register_all_demuxers(registry: &mut FormatRegistry) {
    registry.register_demuxer(FormatId::Roq, "roq", roq::RoqDemuxer::create);
    registry.register_probe(Box::new(roq::RoqProbe));

    registry.register_demuxer(FormatId::Vqa, "wsvqa", vqa::VqaDemuxer::create);
    registry.register_probe(Box::new(vqa::VqaProbe));

    registry.register_demuxer(FormatId::Hnm, "hnm", hnm::HnmDemuxer::create);
    registry.register_probe(Box::new(hnm::HnmProbe));

    registry.register_demuxer(FormatId::Mve, "ipmovie", mve::MveDemuxer::create);
    registry.register_probe(Box::new(mve::MveProbe));

    registry.register_demuxer(FormatId::Fst, "fst", fst::FstDemuxer::create);
    registry.register_probe(Box::new(fst::FstProbe));

    registry.register_demuxer(FormatId::Vmd, "vmd", vmd::VmdDemuxer::create);
    registry.register_probe(Box::new(vmd::VmdProbe));

    registry.register_demuxer(FormatId::Cin, "dsicin", cin::CinDemuxer::create);
    registry.register_probe(Box::new(cin::CinProbe));

    registry.register_demuxer(FormatId::Apc, "apc", apc::ApcDemuxer::create);
    registry.register_probe(Box::new(apc::ApcProbe));

    registry.register_demuxer(FormatId::WsAud, "wsaud", wsaud::WsAudDemuxer::create);
    registry.register_probe(Box::new(wsaud::WsAudProbe));

    registry.register_demuxer(FormatId::H263, "h263", h263::H263Demuxer::create);
    registry.register_probe(Box::new(h263::H263Probe));
}

/// 按签名识别格式, 依次尝试 [`FormatId::ALL`] 中的格式
pub fn probe(data: &[u8]) -> Option<FormatId> {
    FormatId::ALL.iter().copied().find(|id| match id {
        FormatId::Roq => roq::probe(data).is_some(),
        FormatId::Vqa => vqa::probe(data).is_some(),
        FormatId::Hnm => hnm::probe(data).is_some(),
        FormatId::Mve => mve::probe(data).is_some(),
        FormatId::Fst => fst::probe(data).is_some(),
        FormatId::Vmd => vmd::probe(data).is_some(),
        FormatId::Cin => cin::probe(data).is_some(),
        FormatId::Apc => apc::probe(data).is_some(),
        FormatId::WsAud => wsaud::probe(data).is_some(),
        FormatId::H263 => h263::probe(data).is_some(),
    })
}
