//! # lao-core
//!
//! lao 老游戏视频解析库的核心类型与工具.
//!
//! 提供字节/比特游标、统一错误类型、有理数时钟, 以及音视频基础描述类型,
//! 供 lao-codec 与 lao-format 共用.

pub mod bitreader;
pub mod bytereader;
pub mod channel_layout;
pub mod error;
pub mod media_type;
pub mod palette;
pub mod pixel_format;
pub mod rational;
pub mod sample_format;
pub mod timestamp;

// 重导出常用类型
pub use bitreader::BitReader;
pub use bytereader::ByteReader;
pub use channel_layout::ChannelLayout;
pub use error::{LaoError, LaoResult};
pub use media_type::MediaType;
pub use palette::Palette;
pub use pixel_format::PixelFormat;
pub use rational::Rational;
pub use sample_format::SampleFormat;
pub use timestamp::Timestamp;
