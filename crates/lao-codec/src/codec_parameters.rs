//! 编解码器参数.
//!
//! 解封装器从容器头中提取每条流的配置, 解码器据此建立初始状态.

use lao_core::{ChannelLayout, LaoError, LaoResult, PixelFormat, Rational, SampleFormat};

use crate::codec_id::CodecId;

/// 解码器接受的最大边长 (像素)
pub const MAX_FRAME_DIMENSION: u32 = 0x4000;

/// 解码器接受的最大画面面积 (像素), 参考帧等缓冲按此分配
pub const MAX_FRAME_AREA: u64 = 1 << 24;

/// 编解码器参数
#[derive(Debug, Clone)]
pub struct CodecParameters {
    /// 编解码器标识
    pub codec_id: CodecId,
    /// 额外数据 (如 VQA 的 VQHD 记录、VMD 的文件头、APC 的初始预测值)
    pub extra_data: Vec<u8>,
    /// 码率 (bits/s), 0 表示未知
    pub bit_rate: u64,
    /// 媒体类型特定参数
    pub params: CodecParamsType,
}

/// 媒体类型特定参数
#[derive(Debug, Clone)]
pub enum CodecParamsType {
    /// 视频参数
    Video(VideoCodecParams),
    /// 音频参数
    Audio(AudioCodecParams),
}

/// 视频编解码器参数
#[derive(Debug, Clone)]
pub struct VideoCodecParams {
    /// 宽度 (像素)
    pub width: u32,
    /// 高度 (像素)
    pub height: u32,
    /// 像素格式
    pub pixel_format: PixelFormat,
    /// 帧率
    pub frame_rate: Rational,
}

/// 音频编解码器参数
#[derive(Debug, Clone)]
pub struct AudioCodecParams {
    /// 采样率 (Hz)
    pub sample_rate: u32,
    /// 声道布局
    pub channel_layout: ChannelLayout,
    /// 输出采样格式
    pub sample_format: SampleFormat,
    /// 码流中每个采样的位数 (压缩格式为编码位数)
    pub bits_per_sample: u32,
    /// 块对齐字节数, 0 表示无块结构
    pub block_align: u32,
}

impl CodecParameters {
    /// 创建视频参数
    pub fn new_video(codec_id: CodecId, video: VideoCodecParams) -> Self {
        Self {
            codec_id,
            extra_data: Vec::new(),
            bit_rate: 0,
            params: CodecParamsType::Video(video),
        }
    }

    /// 创建音频参数
    pub fn new_audio(codec_id: CodecId, audio: AudioCodecParams) -> Self {
        Self {
            codec_id,
            extra_data: Vec::new(),
            bit_rate: 0,
            params: CodecParamsType::Audio(audio),
        }
    }

    /// 获取视频参数 (如果是视频流)
    pub fn video(&self) -> Option<&VideoCodecParams> {
        match &self.params {
            CodecParamsType::Video(v) => Some(v),
            CodecParamsType::Audio(_) => None,
        }
    }

    /// 获取音频参数 (如果是音频流)
    pub fn audio(&self) -> Option<&AudioCodecParams> {
        match &self.params {
            CodecParamsType::Audio(a) => Some(a),
            CodecParamsType::Video(_) => None,
        }
    }

    /// 获取视频参数, 并检查尺寸非零且不超过 [`MAX_FRAME_DIMENSION`] 与 [`MAX_FRAME_AREA`]
    pub fn require_video(&self) -> LaoResult<&VideoCodecParams> {
        let v = self.video().ok_or_else(|| {
            LaoError::InvalidArgument(format!("{} 解码器需要视频参数", self.codec_id))
        })?;
        if v.width == 0 || v.height == 0 {
            return Err(LaoError::InvalidArgument(format!(
                "{} 视频尺寸无效: {}x{}",
                self.codec_id, v.width, v.height
            )));
        }
        let area = u64::from(v.width).checked_mul(u64::from(v.height));
        let too_large = v.width > MAX_FRAME_DIMENSION
            || v.height > MAX_FRAME_DIMENSION
            || area.is_none_or(|a| a > MAX_FRAME_AREA);
        if too_large {
            return Err(LaoError::Unsupported(format!(
                "{} 视频尺寸过大: {}x{}",
                self.codec_id, v.width, v.height
            )));
        }
        Ok(v)
    }

    /// 获取音频参数, 并检查采样率与声道数
    pub fn require_audio(&self) -> LaoResult<&AudioCodecParams> {
        let a = self.audio().ok_or_else(|| {
            LaoError::InvalidArgument(format!("{} 解码器需要音频参数", self.codec_id))
        })?;
        if a.sample_rate == 0 {
            return Err(LaoError::InvalidArgument("采样率不能为 0".into()));
        }
        if !(1..=2).contains(&a.channel_layout.channels) {
            return Err(LaoError::InvalidArgument(format!(
                "不支持的声道数: {}",
                a.channel_layout.channels
            )));
        }
        Ok(a)
    }
}
