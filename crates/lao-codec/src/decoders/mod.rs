//! 解码器实现模块.

pub mod cin_audio;
pub mod cin_video;
pub mod dpcm;
pub mod hnm;
pub mod ima;
pub mod mve;
pub mod pcm;
pub mod roq;
pub mod snd1;
pub mod vmd_audio;
pub mod vmd_video;
pub mod vqa;

use crate::codec_id::CodecId;
use crate::registry::CodecRegistry;

/// 注册所有内置解码器
///
/// FST 图像与 H.263 宏块层没有内置解码器.
pub fn register_all_decoders(registry: &mut CodecRegistry) {
    // 视频
    registry.register_decoder(CodecId::RoqVideo, "roqvideo", roq::RoqVideoDecoder::create);
    registry.register_decoder(CodecId::VqaVideo, "vqavideo", vqa::VqaVideoDecoder::create);
    registry.register_decoder(
        CodecId::InterplayVideo,
        "interplayvideo",
        mve::InterplayVideoDecoder::create,
    );
    registry.register_decoder(CodecId::Hnm4Video, "hnm4video", hnm::Hnm4VideoDecoder::create);
    registry.register_decoder(CodecId::CinVideo, "dsicinvideo", cin_video::CinVideoDecoder::create);
    registry.register_decoder(CodecId::VmdVideo, "vmdvideo", vmd_video::VmdVideoDecoder::create);

    // 音频
    registry.register_decoder(CodecId::RoqDpcm, "roq_dpcm", dpcm::RoqDpcmDecoder::create);
    registry.register_decoder(
        CodecId::InterplayDpcm,
        "interplay_dpcm",
        dpcm::InterplayDpcmDecoder::create,
    );
    registry.register_decoder(CodecId::WestwoodSnd1, "westwood_snd1", snd1::Snd1Decoder::create);
    registry.register_decoder(CodecId::AdpcmImaWs, "adpcm_ima_ws", ima::ImaDecoder::new_ws);
    registry.register_decoder(CodecId::AdpcmImaApc, "adpcm_ima_apc", ima::ImaDecoder::new_apc);
    registry.register_decoder(CodecId::CinAudio, "dsicinaudio", cin_audio::CinAudioDecoder::create);
    registry.register_decoder(CodecId::VmdAudio, "vmdaudio", vmd_audio::VmdAudioDecoder::create);
    registry.register_decoder(CodecId::PcmU8, "pcm_u8", pcm::PcmDecoder::new_u8);
    registry.register_decoder(CodecId::PcmS16le, "pcm_s16le", pcm::PcmDecoder::new_s16le);
    registry.register_decoder(CodecId::PcmS16be, "pcm_s16be", pcm::PcmDecoder::new_s16be);
}
