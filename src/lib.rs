//! # lao (老)
//!
//! 纯 Rust 实现的老游戏视频解封装与解码库.
//!
//! 支持 90 年代交互式视频常见的容器与编码:
//! - **容器**: id RoQ, Westwood VQA/AUD, Cryo HNM4/APC, Interplay MVE, Origin FST,
//!   Delphine CIN, Sierra VMD, H.263 裸流
//! - **音频**: IMA ADPCM (APC/Westwood 变体), Interplay/RoQ DPCM, Westwood SND1,
//!   CIN 与 VMD 音频, PCM
//! - **视频**: RoQ 与 VQA 矢量量化, MVE 块操作码, HNM4, CIN, VMD
//!
//! # 快速开始
//!
//! ```rust,no_run
//! use lao::codec::Frame;
//!
//! # fn main() -> lao::core::LaoResult<()> {
//! let mut container = lao::open_file("intro.roq")?;
//! let codecs = lao::default_codec_registry();
//! let mut decoders = container
//!     .streams()
//!     .iter()
//!     .map(|s| {
//!         let decoder = codecs.create_decoder(s.codec_id)?;
//!         let state = decoder.create_state(&s.codec_parameters())?;
//!         Ok((decoder, state))
//!     })
//!     .collect::<lao::core::LaoResult<Vec<_>>>()?;
//!
//! while let Ok(packet) = container.next_sample() {
//!     let (decoder, state) = &mut decoders[packet.stream_index];
//!     if let Some(Frame::Video(v)) = decoder.decode(state, &packet)? {
//!         println!("{}x{} @ {}", v.width, v.height, v.pts);
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Crate 结构
//!
//! | Crate | 功能 |
//! |-------|------|
//! | `lao-core` | 字节/位读取器, 错误类型, 有理数时钟, 像素与采样格式 |
//! | `lao-codec` | 样本与帧, 解码状态机, 全部解码器 |
//! | `lao-format` | 字节源, 块模型, 解封装器与格式探测 |

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

pub mod logging;

/// 核心类型与工具
pub use lao_core as core;

/// 解码器框架
pub use lao_codec as codec;

/// 容器解封装框架
pub use lao_format as format;

pub use lao_format::Container;

/// 获取 lao 版本号
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// 创建已注册所有内置解码器的注册表
pub fn default_codec_registry() -> lao_codec::CodecRegistry {
    let mut registry = lao_codec::CodecRegistry::new();
    lao_codec::register_all(&mut registry);
    registry
}

/// 创建已注册所有内置容器格式的注册表
pub fn default_format_registry() -> lao_format::FormatRegistry {
    let mut registry = lao_format::FormatRegistry::new();
    lao_format::register_all(&mut registry);
    registry
}

/// 探测内存中的数据并打开容器
pub fn open_container(data: impl Into<Vec<u8>>) -> lao_core::LaoResult<Container> {
    Container::open(lao_format::IoContext::from_memory(data))
}

/// 打开文件, 文件扩展名参与探测
pub fn open_file(path: impl AsRef<Path>) -> lao_core::LaoResult<Container> {
    let path = path.as_ref();
    let io = lao_format::IoContext::from_reader(BufReader::new(File::open(path)?))?;
    let filename = path.file_name().and_then(|n| n.to_str());
    Container::open_with(io, filename, &lao_format::ProbeOptions::default())
}
