//! 解码后的帧数据 (Frame).
//!
//! 视频帧是平面像素缓冲 (调色板格式附带当前调色板), 音频帧是交错 PCM.

use lao_core::timestamp::NOPTS_VALUE;
use lao_core::{ChannelLayout, Palette, PixelFormat, Rational, SampleFormat};

/// 视频帧
///
/// 包含解码后的原始像素数据, 支持多平面存储.
/// 例如 YUV444P 格式有 3 个平面: Y, U, V; PAL8 只有一个索引平面.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    /// 各平面的像素数据
    pub data: Vec<Vec<u8>>,
    /// 各平面每行的字节数 (linesize / stride)
    pub linesize: Vec<usize>,
    /// 宽度 (像素)
    pub width: u32,
    /// 高度 (像素)
    pub height: u32,
    /// 像素格式
    pub pixel_format: PixelFormat,
    /// 调色板, 像素格式为 PAL8 时总是存在
    pub palette: Option<Palette>,
    /// 显示时间戳 (PTS)
    pub pts: i64,
    /// 时间基
    pub time_base: Rational,
    /// 帧时长 (以 time_base 为单位)
    pub duration: i64,
    /// 是否为关键帧
    pub is_keyframe: bool,
    /// 图片类型
    pub picture_type: PictureType,
}

impl VideoFrame {
    /// 创建空的视频帧
    pub fn new(width: u32, height: u32, pixel_format: PixelFormat) -> Self {
        let plane_count = pixel_format.plane_count() as usize;
        Self {
            data: vec![Vec::new(); plane_count],
            linesize: vec![0; plane_count],
            width,
            height,
            pixel_format,
            palette: None,
            pts: NOPTS_VALUE,
            time_base: Rational::UNDEFINED,
            duration: 0,
            is_keyframe: false,
            picture_type: PictureType::None,
        }
    }

    /// 由紧凑的 8 位索引缓冲 (行宽等于图像宽度) 创建 PAL8 帧
    pub fn from_pal8(width: u32, height: u32, pixels: Vec<u8>, palette: &Palette) -> Self {
        let mut frame = Self::new(width, height, PixelFormat::Pal8);
        frame.data = vec![pixels];
        frame.linesize = vec![width as usize];
        frame.palette = Some(palette.clone());
        frame
    }

    /// 设置关键帧标记与图片类型
    pub fn with_picture_type(mut self, is_keyframe: bool) -> Self {
        self.is_keyframe = is_keyframe;
        self.picture_type = if is_keyframe {
            PictureType::I
        } else {
            PictureType::P
        };
        self
    }

    /// 读取指定平面上的一个像素
    pub fn pixel(&self, plane: usize, x: u32, y: u32) -> Option<u8> {
        let stride = *self.linesize.get(plane)?;
        self.data
            .get(plane)?
            .get(y as usize * stride + x as usize)
            .copied()
    }
}

/// 音频帧
///
/// 平面格式: data 中每个 Vec 对应一个声道.
/// 交错格式: data 中只有一个 Vec, 所有声道交替排列 (本库解码器只输出交错格式).
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// 音频采样数据
    pub data: Vec<Vec<u8>>,
    /// 本帧包含的采样数 (每声道)
    pub nb_samples: u32,
    /// 采样率 (Hz)
    pub sample_rate: u32,
    /// 采样格式
    pub sample_format: SampleFormat,
    /// 声道布局
    pub channel_layout: ChannelLayout,
    /// 显示时间戳 (PTS)
    pub pts: i64,
    /// 时间基
    pub time_base: Rational,
    /// 帧时长 (以 time_base 为单位)
    pub duration: i64,
}

impl AudioFrame {
    /// 创建空的音频帧
    pub fn new(
        nb_samples: u32,
        sample_rate: u32,
        sample_format: SampleFormat,
        channel_layout: ChannelLayout,
    ) -> Self {
        let plane_count = if sample_format.is_planar() {
            channel_layout.channels as usize
        } else {
            1
        };
        Self {
            data: vec![Vec::new(); plane_count],
            nb_samples,
            sample_rate,
            sample_format,
            channel_layout,
            pts: NOPTS_VALUE,
            time_base: Rational::UNDEFINED,
            duration: 0,
        }
    }

    /// 由交错的 16 位采样创建帧
    pub fn from_s16(samples: &[i16], sample_rate: u32, channel_layout: ChannelLayout) -> Self {
        let channels = channel_layout.channels.max(1) as usize;
        let mut frame = Self::new(
            (samples.len() / channels) as u32,
            sample_rate,
            SampleFormat::S16,
            channel_layout,
        );
        let mut bytes = Vec::with_capacity(samples.len() * 2);
        for s in samples {
            bytes.extend_from_slice(&s.to_le_bytes());
        }
        frame.data = vec![bytes];
        frame
    }

    /// 由交错的无符号 8 位采样创建帧
    pub fn from_u8(samples: Vec<u8>, sample_rate: u32, channel_layout: ChannelLayout) -> Self {
        let channels = channel_layout.channels.max(1) as usize;
        let mut frame = Self::new(
            (samples.len() / channels) as u32,
            sample_rate,
            SampleFormat::U8,
            channel_layout,
        );
        frame.data = vec![samples];
        frame
    }

    /// 以 16 位有符号整数读出交错采样, 非 S16 格式返回 None
    pub fn samples_s16(&self) -> Option<Vec<i16>> {
        if self.sample_format != SampleFormat::S16 {
            return None;
        }
        let plane = self.data.first()?;
        Some(
            plane
                .chunks_exact(2)
                .map(|c| i16::from_le_bytes([c[0], c[1]]))
                .collect(),
        )
    }
}

/// 帧 (视频帧或音频帧的统一包装)
#[derive(Debug, Clone)]
pub enum Frame {
    /// 视频帧
    Video(VideoFrame),
    /// 音频帧
    Audio(AudioFrame),
}

impl Frame {
    /// 设置时间信息
    pub fn set_timing(&mut self, pts: i64, duration: i64, time_base: Rational) {
        match self {
            Self::Video(v) => {
                v.pts = pts;
                v.duration = duration;
                v.time_base = time_base;
            }
            Self::Audio(a) => {
                a.pts = pts;
                a.duration = duration;
                a.time_base = time_base;
            }
        }
    }
}

/// 图片类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PictureType {
    /// 未指定
    #[default]
    None,
    /// 帧内编码
    I,
    /// 依赖前一帧
    P,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_s16_帧按声道计数() {
        let frame = AudioFrame::from_s16(&[1, -1, 2, -2], 22050, ChannelLayout::STEREO);
        assert_eq!(frame.nb_samples, 2);
        assert_eq!(frame.data[0].len(), 8);
        assert_eq!(frame.samples_s16().unwrap(), vec![1, -1, 2, -2]);
    }

    #[test]
    fn test_pal8_帧附带调色板() {
        let mut pal = Palette::new();
        pal.set(3, [1, 2, 3]);
        let frame = VideoFrame::from_pal8(2, 2, vec![3; 4], &pal).with_picture_type(true);
        assert_eq!(frame.palette.as_ref().map(|p| p.get(3)), Some([1, 2, 3]));
        assert_eq!(frame.pixel(0, 1, 1), Some(3));
        assert_eq!(frame.picture_type, PictureType::I);
        assert!(frame.is_keyframe);
    }
}
