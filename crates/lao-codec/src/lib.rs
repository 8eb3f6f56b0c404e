//! # lao-codec
//!
//! 老游戏视频的解码器库: Packet/Frame 抽象, 按流持有的解码状态机, 以及
//! RoQ, VQA, MVE, HNM4, CIN, VMD 视频与各类 ADPCM/DPCM 音频解码器.
//!
//! ## 使用示例
//!
//! ```rust
//! use lao_codec::{CodecId, CodecRegistry};
//!
//! let mut reg = CodecRegistry::new();
//! lao_codec::register_all(&mut reg);
//!
//! let decoder = reg.create_decoder(CodecId::RoqDpcm).unwrap();
//! assert_eq!(decoder.codec_id(), CodecId::RoqDpcm);
//! ```

pub mod codec_id;
pub mod codec_parameters;
pub mod decoder;
pub mod decoders;
pub mod frame;
pub mod interleave;
pub mod packet;
pub mod parsers;
pub mod registry;
pub mod state;

// 重导出常用类型
pub use codec_id::CodecId;
pub use codec_parameters::{AudioCodecParams, CodecParameters, CodecParamsType, VideoCodecParams};
pub use decoder::Decoder;
pub use frame::{AudioFrame, Frame, PictureType, VideoFrame};
pub use interleave::{deinterleave, interleave};
pub use packet::Packet;
pub use registry::CodecRegistry;
pub use state::{CodecState, DecodePhase, DecoderState};

/// 注册所有内置解码器
pub fn register_all(registry: &mut CodecRegistry) {
    decoders::register_all_decoders(registry);
}
