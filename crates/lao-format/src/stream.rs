//! 流信息定义.
//!
//! 描述容器中的一条基本流. 打开容器后即固定, 在容器关闭前保持不变.

use lao_codec::{AudioCodecParams, CodecId, CodecParameters, VideoCodecParams};
use lao_core::{ChannelLayout, MediaType, PixelFormat, Rational, SampleFormat};

/// 流信息
#[derive(Debug, Clone, PartialEq)]
pub struct Stream {
    /// 流索引 (在容器中的位置, 从 0 开始)
    pub index: usize,
    /// 媒体类型
    pub media_type: MediaType,
    /// 编解码器标识
    pub codec_id: CodecId,
    /// 时间基 (容器统一时钟)
    pub time_base: Rational,
    /// 流时长 (以 time_base 为单位, -1 表示未知)
    pub duration: i64,
    /// 起始时间 (以 time_base 为单位)
    pub start_time: i64,
    /// 总帧数 (0 表示未知)
    pub nb_frames: u64,
    /// 编解码器私有数据 (如 VQHD 记录、VMD 文件头)
    pub extra_data: Vec<u8>,
    /// 流特定参数
    pub params: StreamParams,
    /// 元数据
    pub metadata: Vec<(String, String)>,
}

/// 流特定参数
#[derive(Debug, Clone, PartialEq)]
pub enum StreamParams {
    /// 视频流参数
    Video(VideoStreamParams),
    /// 音频流参数
    Audio(AudioStreamParams),
}

/// 视频流参数
#[derive(Debug, Clone, PartialEq)]
pub struct VideoStreamParams {
    /// 宽度 (像素)
    pub width: u32,
    /// 高度 (像素)
    pub height: u32,
    /// 像素格式
    pub pixel_format: PixelFormat,
    /// 帧率
    pub frame_rate: Rational,
    /// 采样宽高比 (SAR)
    pub sample_aspect_ratio: Rational,
    /// 码率 (bps, 0 表示未知)
    pub bit_rate: u64,
}

/// 音频流参数
#[derive(Debug, Clone, PartialEq)]
pub struct AudioStreamParams {
    /// 采样率 (Hz)
    pub sample_rate: u32,
    /// 声道布局
    pub channel_layout: ChannelLayout,
    /// 解码输出的采样格式
    pub sample_format: SampleFormat,
    /// 码流中每个采样的位数
    pub bits_per_sample: u32,
    /// 码率 (bps, 0 表示未知)
    pub bit_rate: u64,
    /// 每个数据包的采样数 (0 表示不固定)
    pub frame_size: u32,
    /// 块对齐 (0 表示无块结构)
    pub block_align: u32,
}

impl Stream {
    /// 创建视频流
    pub fn video(
        index: usize,
        codec_id: CodecId,
        time_base: Rational,
        params: VideoStreamParams,
    ) -> Self {
        Self {
            index,
            media_type: MediaType::Video,
            codec_id,
            time_base,
            duration: -1,
            start_time: 0,
            nb_frames: 0,
            extra_data: Vec::new(),
            params: StreamParams::Video(params),
            metadata: Vec::new(),
        }
    }

    /// 创建音频流
    pub fn audio(
        index: usize,
        codec_id: CodecId,
        time_base: Rational,
        params: AudioStreamParams,
    ) -> Self {
        Self {
            index,
            media_type: MediaType::Audio,
            codec_id,
            time_base,
            duration: -1,
            start_time: 0,
            nb_frames: 0,
            extra_data: Vec::new(),
            params: StreamParams::Audio(params),
            metadata: Vec::new(),
        }
    }

    /// 附加编解码器私有数据
    pub fn with_extra_data(mut self, extra_data: Vec<u8>) -> Self {
        self.extra_data = extra_data;
        self
    }

    /// 视频参数
    pub fn video_params(&self) -> Option<&VideoStreamParams> {
        match &self.params {
            StreamParams::Video(v) => Some(v),
            StreamParams::Audio(_) => None,
        }
    }

    /// 音频参数
    pub fn audio_params(&self) -> Option<&AudioStreamParams> {
        match &self.params {
            StreamParams::Audio(a) => Some(a),
            StreamParams::Video(_) => None,
        }
    }

    /// 生成打开解码器所需的参数
    pub fn codec_parameters(&self) -> CodecParameters {
        let mut params = match &self.params {
            StreamParams::Video(v) => CodecParameters::new_video(
                self.codec_id,
                VideoCodecParams {
                    width: v.width,
                    height: v.height,
                    pixel_format: v.pixel_format,
                    frame_rate: v.frame_rate,
                },
            ),
            StreamParams::Audio(a) => CodecParameters::new_audio(
                self.codec_id,
                AudioCodecParams {
                    sample_rate: a.sample_rate,
                    channel_layout: a.channel_layout,
                    sample_format: a.sample_format,
                    bits_per_sample: a.bits_per_sample,
                    block_align: a.block_align,
                },
            ),
        };
        params.extra_data = self.extra_data.clone();
        params
    }
}

impl VideoStreamParams {
    /// 8 位调色板视频
    pub fn pal8(width: u32, height: u32, frame_rate: Rational) -> Self {
        Self {
            width,
            height,
            pixel_format: PixelFormat::Pal8,
            frame_rate,
            sample_aspect_ratio: Rational::new(1, 1),
            bit_rate: 0,
        }
    }
}

impl AudioStreamParams {
    /// 按声道数与输出格式创建
    pub fn new(sample_rate: u32, channels: u32, sample_format: SampleFormat, bits_per_sample: u32) -> Self {
        Self {
            sample_rate,
            channel_layout: ChannelLayout::from_channels(channels),
            sample_format,
            bits_per_sample,
            bit_rate: 0,
            frame_size: 0,
            block_align: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_生成解码参数() {
        let stream = Stream::audio(
            1,
            CodecId::AdpcmImaApc,
            Rational::new(1, 22050),
            AudioStreamParams::new(22050, 2, SampleFormat::S16, 4),
        )
        .with_extra_data(vec![0; 8]);
        let params = stream.codec_parameters();
        assert_eq!(params.codec_id, CodecId::AdpcmImaApc);
        assert_eq!(params.extra_data.len(), 8);
        let audio = params.audio().unwrap();
        assert_eq!(audio.sample_rate, 22050);
        assert_eq!(audio.channel_layout.channels, 2);
        assert!(stream.video_params().is_none());
    }
}
