//! 编解码器标识符.
//!
//! 为每种老游戏视频里出现的压缩算法分配唯一标识, 解封装器按它选择解码器.

use std::fmt;
use lao_core::MediaType;

/// 编解码器标识符
///
/// 唯一标识一种编解码算法, 与容器格式无关.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum CodecId {
    /// 未知编解码器
    None,

    // ========================
    // 视频编解码器
    // ========================
    /// id RoQ 矢量量化视频
    RoqVideo,
    /// Westwood VQA 矢量量化视频
    VqaVideo,
    /// Interplay MVE 8 位视频
    InterplayVideo,
    /// Cryo HNM4 视频
    Hnm4Video,
    /// Delphine CIN 视频
    CinVideo,
    /// Sierra VMD 视频
    VmdVideo,
    /// Origin FST 图像 (无内置解码器)
    FstVideo,
    /// H.263 风格窄带视频 (仅解析图像头)
    H263,

    // ========================
    // 音频编解码器
    // ========================
    /// id RoQ DPCM
    RoqDpcm,
    /// Interplay MVE DPCM
    InterplayDpcm,
    /// Westwood SND1
    WestwoodSnd1,
    /// IMA ADPCM, Westwood 变体
    AdpcmImaWs,
    /// IMA ADPCM, Cryo APC 变体
    AdpcmImaApc,
    /// Delphine CIN 音频
    CinAudio,
    /// Sierra VMD 音频
    VmdAudio,
    /// PCM 无符号 8 位
    PcmU8,
    /// PCM 有符号 16 位小端
    PcmS16le,
    /// PCM 有符号 16 位大端
    PcmS16be,
}

impl CodecId {
    /// 全部已知编解码器 (不含 None)
    pub const ALL: &'static [CodecId] = &[
        Self::RoqVideo,
        Self::VqaVideo,
        Self::InterplayVideo,
        Self::Hnm4Video,
        Self::CinVideo,
        Self::VmdVideo,
        Self::FstVideo,
        Self::H263,
        Self::RoqDpcm,
        Self::InterplayDpcm,
        Self::WestwoodSnd1,
        Self::AdpcmImaWs,
        Self::AdpcmImaApc,
        Self::CinAudio,
        Self::VmdAudio,
        Self::PcmU8,
        Self::PcmS16le,
        Self::PcmS16be,
    ];

    /// 获取编解码器对应的媒体类型
    ///
    /// `None` 归为视频只是占位, 调用方应先排除它.
    pub const fn media_type(&self) -> MediaType {
        match self {
            Self::None
            | Self::RoqVideo
            | Self::VqaVideo
            | Self::InterplayVideo
            | Self::Hnm4Video
            | Self::CinVideo
            | Self::VmdVideo
            | Self::FstVideo
            | Self::H263 => MediaType::Video,

            Self::RoqDpcm
            | Self::InterplayDpcm
            | Self::WestwoodSnd1
            | Self::AdpcmImaWs
            | Self::AdpcmImaApc
            | Self::CinAudio
            | Self::VmdAudio
            | Self::PcmU8
            | Self::PcmS16le
            | Self::PcmS16be => MediaType::Audio,
        }
    }

    /// 获取编解码器的人类可读名称
    pub const fn name(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::RoqVideo => "roqvideo",
            Self::VqaVideo => "vqavideo",
            Self::InterplayVideo => "interplayvideo",
            Self::Hnm4Video => "hnm4video",
            Self::CinVideo => "dsicinvideo",
            Self::VmdVideo => "vmdvideo",
            Self::FstVideo => "fstvideo",
            Self::H263 => "h263",
            Self::RoqDpcm => "roq_dpcm",
            Self::InterplayDpcm => "interplay_dpcm",
            Self::WestwoodSnd1 => "westwood_snd1",
            Self::AdpcmImaWs => "adpcm_ima_ws",
            Self::AdpcmImaApc => "adpcm_ima_apc",
            Self::CinAudio => "dsicinaudio",
            Self::VmdAudio => "vmdaudio",
            Self::PcmU8 => "pcm_u8",
            Self::PcmS16le => "pcm_s16le",
            Self::PcmS16be => "pcm_s16be",
        }
    }
}

impl fmt::Display for CodecId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_媒体类型划分() {
        assert_eq!(CodecId::RoqVideo.media_type(), MediaType::Video);
        assert_eq!(CodecId::RoqDpcm.media_type(), MediaType::Audio);
        assert_eq!(CodecId::PcmU8.media_type(), MediaType::Audio);
    }

    #[test]
    fn test_名称唯一() {
        let mut names: Vec<&str> = CodecId::ALL.iter().map(|c| c.name()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), CodecId::ALL.len());
    }
}
