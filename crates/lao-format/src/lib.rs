//! # lao-format
//!
//! 老游戏视频的容器解封装库: 字节源、块模型、解封装器框架、格式探测以及
//! RoQ, VQA, WS AUD, HNM4, MVE, FST, CIN, VMD, APC 和 H.263 裸流的解封装器.
//!
//! ## 使用示例
//!
//! ```rust,no_run
//! use lao_format::{Container, IoContext};
//!
//! # fn main() -> lao_core::LaoResult<()> {
//! let io = IoContext::from_reader(std::fs::File::open("intro.roq")?)?;
//! let mut container = Container::open(io)?;
//! for stream in container.streams() {
//!     println!("#{} {}", stream.index, stream.codec_id);
//! }
//! while let Ok(packet) = container.next_sample() {
//!     println!("流 {} pts {}", packet.stream_index, packet.pts);
//! }
//! # Ok(())
//! # }
//! ```

pub mod chunk;
pub mod container;
pub mod demuxer;
pub mod demuxers;
pub mod format_id;
pub mod io;
pub mod plain;
pub mod probe;
pub mod registry;
pub mod stream;

// 重导出常用类型
pub use container::{AnyDemuxer, Container};
pub use demuxer::Demuxer;
pub use format_id::FormatId;
pub use io::IoContext;
pub use plain::{PlainDemuxer, PlainLayout};
pub use probe::{ProbeOptions, ProbeResult};
pub use registry::FormatRegistry;
pub use stream::Stream;

/// 注册所有内置容器格式
pub fn register_all(registry: &mut FormatRegistry) {
    demuxers::register_all_demuxers(registry);
}
