//! 解码状态机.
//!
//! 每条流的解码状态由调用方持有, 以 `&mut` 传入解码器. 状态分为三个阶段:
//! - `Fresh`: 尚未解码任何样本
//! - `Ready`: 上一次解码成功, 可以继续解码依赖前一帧的样本
//! - `Error`: 上一次解码失败, 只能从关键样本恢复
//!
//! 关键样本在 `Fresh`/`Error` 阶段会先把编解码状态重置为初始快照再解码;
//! 在 `Ready` 阶段直接在当前状态上解码, 以保留调色板等跨帧信息.

use lao_core::{LaoError, LaoResult};

use crate::codec_id::CodecId;
use crate::decoders::cin_audio::CinAudioState;
use crate::decoders::cin_video::CinVideoState;
use crate::decoders::dpcm::{InterplayDpcmState, RoqDpcmState};
use crate::decoders::hnm::HnmState;
use crate::decoders::ima::ImaState;
use crate::decoders::mve::MveState;
use crate::decoders::pcm::PcmState;
use crate::decoders::roq::RoqState;
use crate::decoders::snd1::Snd1State;
use crate::decoders::vmd_audio::VmdAudioState;
use crate::decoders::vmd_video::VmdVideoState;
use crate::decoders::vqa::VqaState;
use crate::frame::Frame;
use crate::packet::Packet;

/// 解码阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DecodePhase {
    /// 尚未解码任何样本
    Fresh,
    /// 上一次解码成功
    Ready,
    /// 上一次解码失败
    Error,
}

/// 各编解码器的私有状态
///
/// 封闭枚举, 每个变体对应一个解码器; 视频状态体积较大, 放在堆上.
#[derive(Debug, Clone)]
pub enum CodecState {
    /// PCM
    Pcm(PcmState),
    /// IMA ADPCM (APC / Westwood)
    Ima(ImaState),
    /// RoQ DPCM
    RoqDpcm(RoqDpcmState),
    /// Interplay DPCM
    InterplayDpcm(InterplayDpcmState),
    /// Westwood SND1
    Snd1(Snd1State),
    /// Delphine CIN 音频
    CinAudio(CinAudioState),
    /// Sierra VMD 音频
    VmdAudio(VmdAudioState),
    /// RoQ 视频
    Roq(Box<RoqState>),
    /// VQA 视频
    Vqa(Box<VqaState>),
    /// Interplay MVE 视频
    Mve(Box<MveState>),
    /// HNM4 视频
    Hnm(Box<HnmState>),
    /// Delphine CIN 视频
    Cin(Box<CinVideoState>),
    /// Sierra VMD 视频
    Vmd(Box<VmdVideoState>),
}

impl CodecState {
    /// 状态所属的编解码器名称, 用于错误信息
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Pcm(_) => "pcm",
            Self::Ima(_) => "ima",
            Self::RoqDpcm(_) => "roq_dpcm",
            Self::InterplayDpcm(_) => "interplay_dpcm",
            Self::Snd1(_) => "westwood_snd1",
            Self::CinAudio(_) => "dsicinaudio",
            Self::VmdAudio(_) => "vmdaudio",
            Self::Roq(_) => "roqvideo",
            Self::Vqa(_) => "vqavideo",
            Self::Mve(_) => "interplayvideo",
            Self::Hnm(_) => "hnm4video",
            Self::Cin(_) => "dsicinvideo",
            Self::Vmd(_) => "vmdvideo",
        }
    }

    /// 构造 "状态与解码器不匹配" 错误
    pub fn mismatch(&self, codec_id: CodecId) -> LaoError {
        LaoError::InvalidState(format!(
            "{codec_id} 解码器收到了 {} 的解码状态",
            self.kind()
        ))
    }
}

/// 一条流的解码状态
///
/// 保存初始快照 `initial` 与当前状态 `current`, 关键样本重置时从快照克隆.
#[derive(Debug, Clone)]
pub struct DecoderState {
    phase: DecodePhase,
    initial: CodecState,
    current: CodecState,
}

impl DecoderState {
    /// 以初始编解码状态创建
    pub fn new(initial: CodecState) -> Self {
        Self {
            phase: DecodePhase::Fresh,
            current: initial.clone(),
            initial,
        }
    }

    /// 当前阶段
    pub fn phase(&self) -> DecodePhase {
        self.phase
    }

    /// 当前编解码状态
    pub fn codec_state(&self) -> &CodecState {
        &self.current
    }

    /// 回到 `Fresh`, 丢弃所有跨样本信息
    pub fn reset(&mut self) {
        self.current = self.initial.clone();
        self.phase = DecodePhase::Fresh;
    }

    /// 按状态机规则执行一次解码
    ///
    /// `step` 只负责在编解码状态上解码负载; 阶段转换、关键样本重置和
    /// 输出帧的时间戳都在这里处理. 负载内部读越界报告为 `Malformed`.
    pub fn run<F>(&mut self, packet: &Packet, step: F) -> LaoResult<Option<Frame>>
    where
        F: FnOnce(&mut CodecState, &Packet) -> LaoResult<Option<Frame>>,
    {
        if packet.is_keyframe {
            if self.phase != DecodePhase::Ready {
                self.current = self.initial.clone();
            }
        } else if self.phase != DecodePhase::Ready {
            return Err(LaoError::InvalidState(format!(
                "{:?} 阶段不能解码非关键样本 (流 {})",
                self.phase, packet.stream_index
            )));
        }

        match step(&mut self.current, packet) {
            Ok(frame) => {
                self.phase = DecodePhase::Ready;
                Ok(frame.map(|mut f| {
                    f.set_timing(packet.pts, packet.duration, packet.time_base);
                    f
                }))
            }
            Err(e) => {
                self.phase = DecodePhase::Error;
                // 负载总是完整交给解码器的, 读到末尾说明负载本身自相矛盾
                Err(match e {
                    LaoError::Truncated { needed, available } => LaoError::Malformed(format!(
                        "负载提前结束: 需要 {needed} 字节, 剩余 {available} 字节"
                    )),
                    other => other,
                })
            }
        }
    }
}
