//! Westwood VQA 视频解码器.
//!
//! 每个视频样本 (VQFR/VQFL 块体) 由若干大端子块组成:
//! - `CBF0`/`CBFZ`: 完整码本 (原样 / LCW 压缩)
//! - `CBP0`/`CBPZ`: 码本片段, 累积 `cb_parts` 帧后整体替换码本
//! - `CPL0`: 6 位调色板
//! - `VPTZ`: LCW 压缩的向量索引表
//!
//! 画面由 4x2 或 4x4 的向量拼成, 输出 PAL8.

pub mod lcw;

use lao_core::{ByteReader, LaoError, LaoResult, Palette, PixelFormat};
use log::debug;

use crate::codec_id::CodecId;
use crate::codec_parameters::CodecParameters;
use crate::decoder::Decoder;
use crate::frame::{Frame, VideoFrame};
use crate::packet::Packet;
use crate::state::{CodecState, DecoderState};

/// VQHD 记录长度
pub const VQA_HEADER_SIZE: usize = 42;

/// 码本最多容纳的普通向量数, 其后 256 项为纯色向量
const MAX_CODEBOOK_VECTORS: usize = 0xFF00;
/// 4x2 向量的纯色区起点
const SOLID_COLOR_BASE_4X2: usize = 0xF00;

const fn tag(s: &[u8; 4]) -> u32 {
    u32::from_be_bytes(*s)
}

const CBF0: u32 = tag(b"CBF0");
const CBFZ: u32 = tag(b"CBFZ");
const CBP0: u32 = tag(b"CBP0");
const CBPZ: u32 = tag(b"CBPZ");
const CPL0: u32 = tag(b"CPL0");
const CPLZ: u32 = tag(b"CPLZ");
const VPTZ: u32 = tag(b"VPTZ");

/// VQHD 头记录
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VqaHeader {
    pub version: u16,
    pub flags: u16,
    pub num_frames: u16,
    pub width: u16,
    pub height: u16,
    pub block_width: u8,
    pub block_height: u8,
    pub fps: u8,
    /// 一个完整码本拆成的片段数
    pub cb_parts: u8,
    pub colors: u16,
    pub max_blocks: u16,
    pub sample_rate: u16,
    pub channels: u8,
    pub bits: u8,
}

impl VqaHeader {
    /// 解析 42 字节的 VQHD 记录
    pub fn parse(data: &[u8]) -> LaoResult<Self> {
        if data.len() < VQA_HEADER_SIZE {
            return Err(LaoError::InvalidArgument(format!(
                "VQHD 记录只有 {} 字节",
                data.len()
            )));
        }
        let mut br = ByteReader::new(data);
        let version = br.read_u16_le()?;
        let flags = br.read_u16_le()?;
        let num_frames = br.read_u16_le()?;
        let width = br.read_u16_le()?;
        let height = br.read_u16_le()?;
        let block_width = br.read_u8()?;
        let block_height = br.read_u8()?;
        let fps = br.read_u8()?;
        let cb_parts = br.read_u8()?;
        let colors = br.read_u16_le()?;
        let max_blocks = br.read_u16_le()?;
        br.seek(24)?;
        let sample_rate = br.read_u16_le()?;
        let channels = br.read_u8()?;
        let bits = br.read_u8()?;
        Ok(Self {
            version,
            flags,
            num_frames,
            width,
            height,
            block_width,
            block_height,
            fps,
            cb_parts,
            colors,
            max_blocks,
            sample_rate,
            channels,
            bits,
        })
    }

    /// 文件是否带音频
    pub fn has_audio(&self) -> bool {
        self.sample_rate != 0 || (self.version == 1 && self.flags == 1)
    }
}

/// VQA 解码状态
#[derive(Debug, Clone)]
pub struct VqaState {
    version: u16,
    width: usize,
    height: usize,
    vector_height: usize,
    /// 每个向量的字节数的对数 (4x2 为 3, 4x4 为 4)
    index_shift: u32,
    codebook: Vec<u8>,
    next_codebook: Vec<u8>,
    partial_count: u32,
    partial_countdown: u32,
    decode_buffer: Vec<u8>,
    palette: Palette,
}

/// 一个视频样本中找到的子块
#[derive(Default)]
struct SubChunks<'a> {
    cbf0: Option<&'a [u8]>,
    cbfz: Option<&'a [u8]>,
    cbp0: Option<&'a [u8]>,
    cbpz: Option<&'a [u8]>,
    cpl0: Option<&'a [u8]>,
    cplz: Option<&'a [u8]>,
    vptz: Option<&'a [u8]>,
}

impl<'a> SubChunks<'a> {
    fn scan(data: &'a [u8]) -> LaoResult<Self> {
        let mut chunks = Self::default();
        let mut br = ByteReader::new(data);
        while br.remaining() >= 8 {
            let chunk_type = br.read_u32_be()?;
            let size = br.read_u32_be()? as usize;
            if size > br.remaining() {
                return Err(LaoError::Malformed(format!(
                    "VQA 子块长度 {size} 超过剩余 {} 字节",
                    br.remaining()
                )));
            }
            let body = br.read_bytes(size)?;
            let slot = match chunk_type {
                CBF0 => &mut chunks.cbf0,
                CBFZ => &mut chunks.cbfz,
                CBP0 => &mut chunks.cbp0,
                CBPZ => &mut chunks.cbpz,
                CPL0 => &mut chunks.cpl0,
                CPLZ => &mut chunks.cplz,
                VPTZ => &mut chunks.vptz,
                other => {
                    debug!("VQA: 跳过未知子块 {:08X}, 长度 {size}", other);
                    br.skip((size & 1).min(br.remaining()))?;
                    continue;
                }
            };
            *slot = Some(body);
            br.skip((size & 1).min(br.remaining()))?;
        }
        Ok(chunks)
    }

    fn has_full_codebook(&self) -> bool {
        self.cbf0.is_some() || self.cbfz.is_some()
    }
}

fn both(a: Option<&[u8]>, b: Option<&[u8]>, what: &str) -> LaoResult<()> {
    if a.is_some() && b.is_some() {
        return Err(LaoError::Malformed(format!("VQA 帧同时包含两种{what}")));
    }
    Ok(())
}

impl VqaState {
    /// 由 VQHD 头建立状态
    pub fn new(header: &VqaHeader) -> LaoResult<Self> {
        if header.block_width != 4 || !matches!(header.block_height, 2 | 4) {
            return Err(LaoError::Unsupported(format!(
                "VQA 向量尺寸 {}x{}",
                header.block_width, header.block_height
            )));
        }
        if header.version >= 3 && header.colors == 0 {
            return Err(LaoError::Unsupported("高彩色 VQA".into()));
        }
        let width = usize::from(header.width);
        let height = usize::from(header.height);
        let vector_height = usize::from(header.block_height);
        if width == 0 || height == 0 || width % 4 != 0 || height % vector_height != 0 {
            return Err(LaoError::InvalidArgument(format!(
                "VQA 尺寸 {width}x{height} 不是向量尺寸的整数倍"
            )));
        }
        let index_shift = if vector_height == 4 { 4 } else { 3 };
        let vector_bytes = 1usize << index_shift;

        let mut codebook = vec![0u8; 0x10000 * vector_bytes];
        let solid_vectors = if vector_height == 4 {
            MAX_CODEBOOK_VECTORS
        } else {
            SOLID_COLOR_BASE_4X2
        };
        let solid_base = solid_vectors * vector_bytes;
        for (color, vector) in codebook[solid_base..solid_base + 256 * vector_bytes]
            .chunks_exact_mut(vector_bytes)
            .enumerate()
        {
            vector.fill(color as u8);
        }

        let blocks = (width / 4) * (height / vector_height);
        let partial_count = u32::from(header.cb_parts);
        Ok(Self {
            version: header.version,
            width,
            height,
            vector_height,
            index_shift,
            codebook,
            next_codebook: Vec::new(),
            partial_count,
            partial_countdown: partial_count,
            decode_buffer: vec![0; blocks * 2],
            palette: Palette::new(),
        })
    }

    fn codebook_limit(&self) -> usize {
        MAX_CODEBOOK_VECTORS << self.index_shift
    }

    /// 当前调色板
    pub fn palette(&self) -> &Palette {
        &self.palette
    }

    fn accumulate_partial(&mut self, part: &[u8], compressed: bool) -> LaoResult<()> {
        if self.next_codebook.len() + part.len() > self.codebook_limit() {
            return Err(LaoError::Malformed("VQA 码本片段累计超过码本容量".into()));
        }
        self.next_codebook.extend_from_slice(part);
        self.partial_countdown = self.partial_countdown.saturating_sub(1);
        if self.partial_countdown == 0 {
            let next = std::mem::take(&mut self.next_codebook);
            self.partial_countdown = self.partial_count;
            let limit = self.codebook_limit();
            if compressed {
                lcw::decompress(&next, &mut self.codebook[..limit])?;
            } else {
                self.codebook[..next.len()].copy_from_slice(&next);
            }
        }
        Ok(())
    }

    fn render(&self, pixels: &mut [u8]) -> LaoResult<()> {
        let blocks = self.decode_buffer.len() / 2;
        let vector_bytes = 1usize << self.index_shift;
        let mut block = 0usize;
        for y in (0..self.height).step_by(self.vector_height) {
            for x in (0..self.width).step_by(4) {
                let (lo, hi) = match self.version {
                    1 => (self.decode_buffer[block * 2], self.decode_buffer[block * 2 + 1]),
                    _ => (self.decode_buffer[block], self.decode_buffer[blocks + block]),
                };
                block += 1;

                if self.version == 1 && hi == 0xFF {
                    // 纯色块
                    for row in 0..self.vector_height {
                        let off = (y + row) * self.width + x;
                        pixels[off..off + 4].fill(255 - lo);
                    }
                    continue;
                }
                let raw = (usize::from(hi) << 8) | usize::from(lo);
                let index = if self.version == 1 { raw >> 3 } else { raw };
                let start = index << self.index_shift;
                let vector = self.codebook.get(start..start + vector_bytes).ok_or_else(|| {
                    LaoError::Malformed(format!("VQA 向量索引 {index} 越界"))
                })?;
                for (row, line) in vector.chunks_exact(4).enumerate() {
                    let off = (y + row) * self.width + x;
                    pixels[off..off + 4].copy_from_slice(line);
                }
            }
        }
        Ok(())
    }

    /// 解码一个视频样本
    pub fn decode_payload(&mut self, data: &[u8]) -> LaoResult<Frame> {
        let chunks = SubChunks::scan(data)?;
        both(chunks.cpl0, chunks.cplz, "调色板块")?;
        both(chunks.cbf0, chunks.cbfz, "完整码本")?;
        both(chunks.cbp0, chunks.cbpz, "码本片段")?;

        if chunks.cplz.is_some() {
            debug!("VQA: 忽略压缩调色板 CPLZ");
        }
        if let Some(pal) = chunks.cpl0 {
            if pal.len() / 3 > 256 {
                return Err(LaoError::Malformed(format!("VQA 调色板长度 {}", pal.len())));
            }
            self.palette.update_range(0, &pal[..pal.len() / 3 * 3], true)?;
        }

        let limit = self.codebook_limit();
        if let Some(cb) = chunks.cbfz {
            lcw::decompress(cb, &mut self.codebook[..limit])?;
        }
        if let Some(cb) = chunks.cbf0 {
            if cb.len() > limit {
                return Err(LaoError::Malformed(format!("VQA 完整码本长度 {}", cb.len())));
            }
            self.codebook[..cb.len()].copy_from_slice(cb);
        }

        let vptz = chunks
            .vptz
            .ok_or_else(|| LaoError::Malformed("VQA 帧缺少 VPTZ 块".into()))?;
        let written = lcw::decompress(vptz, &mut self.decode_buffer)?;
        if written < self.decode_buffer.len() {
            debug!("VQA: 向量表只有 {written}/{} 字节, 余下置零", self.decode_buffer.len());
            self.decode_buffer[written..].fill(0);
        }

        let mut pixels = vec![0u8; self.width * self.height];
        self.render(&mut pixels)?;

        if let Some(part) = chunks.cbp0 {
            self.accumulate_partial(part, false)?;
        }
        if let Some(part) = chunks.cbpz {
            self.accumulate_partial(part, true)?;
        }

        let frame = VideoFrame::from_pal8(self.width as u32, self.height as u32, pixels, &self.palette)
            .with_picture_type(chunks.has_full_codebook());
        Ok(Frame::Video(frame))
    }
}

/// 视频样本是否携带完整码本 (可独立解码)
pub fn has_full_codebook(data: &[u8]) -> bool {
    SubChunks::scan(data)
        .map(|c| c.has_full_codebook())
        .unwrap_or(false)
}

/// VQA 视频解码器
pub struct VqaVideoDecoder;

impl VqaVideoDecoder {
    pub fn create() -> LaoResult<Box<dyn Decoder>> {
        Ok(Box::new(Self))
    }
}

impl Decoder for VqaVideoDecoder {
    fn codec_id(&self) -> CodecId {
        CodecId::VqaVideo
    }

    fn name(&self) -> &str {
        "vqavideo"
    }

    fn create_state(&self, params: &CodecParameters) -> LaoResult<DecoderState> {
        let video = params.require_video()?;
        let header = VqaHeader::parse(&params.extra_data)?;
        if u32::from(header.width) != video.width || u32::from(header.height) != video.height {
            return Err(LaoError::InvalidArgument(format!(
                "VQHD 尺寸 {}x{} 与流参数 {}x{} 不一致",
                header.width, header.height, video.width, video.height
            )));
        }
        if video.pixel_format != PixelFormat::Pal8 {
            return Err(LaoError::InvalidArgument("VQA 只输出 PAL8".into()));
        }
        Ok(DecoderState::new(CodecState::Vqa(Box::new(VqaState::new(
            &header,
        )?))))
    }

    fn decode_sample(&self, state: &mut CodecState, packet: &Packet) -> LaoResult<Option<Frame>> {
        let CodecState::Vqa(st) = state else {
            return Err(state.mismatch(CodecId::VqaVideo));
        };
        st.decode_payload(&packet.data).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header_bytes(version: u16, w: u16, h: u16, bh: u8, cb_parts: u8) -> Vec<u8> {
        let mut v = vec![0u8; VQA_HEADER_SIZE];
        v[0..2].copy_from_slice(&version.to_le_bytes());
        v[4..6].copy_from_slice(&3u16.to_le_bytes());
        v[6..8].copy_from_slice(&w.to_le_bytes());
        v[8..10].copy_from_slice(&h.to_le_bytes());
        v[10] = 4;
        v[11] = bh;
        v[12] = 15;
        v[13] = cb_parts;
        v[14..16].copy_from_slice(&256u16.to_le_bytes());
        v[24..26].copy_from_slice(&22050u16.to_le_bytes());
        v[26] = 1;
        v[27] = 16;
        v
    }

    fn sub(tag: &[u8; 4], body: &[u8]) -> Vec<u8> {
        let mut v = tag.to_vec();
        v.extend_from_slice(&(body.len() as u32).to_be_bytes());
        v.extend_from_slice(body);
        if body.len() % 2 == 1 {
            v.push(0);
        }
        v
    }

    /// LCW 原样输出一段数据
    fn lcw_raw(data: &[u8]) -> Vec<u8> {
        let mut v = Vec::new();
        for part in data.chunks(0x3F) {
            v.push(0x80 | part.len() as u8);
            v.extend_from_slice(part);
        }
        v.push(0x80);
        v
    }

    #[test]
    fn test_解析_vqhd() {
        let h = VqaHeader::parse(&header_bytes(2, 320, 200, 2, 8)).unwrap();
        assert_eq!(h.version, 2);
        assert_eq!((h.width, h.height), (320, 200));
        assert_eq!((h.block_width, h.block_height), (4, 2));
        assert_eq!(h.cb_parts, 8);
        assert_eq!(h.sample_rate, 22050);
        assert_eq!(h.bits, 16);
        assert!(h.has_audio());
    }

    #[test]
    fn test_v2_完整码本与调色板() {
        let h = VqaHeader::parse(&header_bytes(2, 8, 2, 2, 8)).unwrap();
        let mut st = VqaState::new(&h).unwrap();
        // 码本: 向量 0 全 1, 向量 1 为 0..8
        let mut cb = vec![1u8; 8];
        cb.extend(0u8..8);
        let mut frame = sub(b"CPL0", &[0x3F, 0, 0, 0, 0x3F, 0]);
        frame.extend_from_slice(&sub(b"CBF0", &cb));
        // 两个向量: 低字节 [1, 0], 高字节 [0, 0]
        frame.extend_from_slice(&sub(b"VPTZ", &lcw_raw(&[1, 0, 0, 0])));
        let Frame::Video(v) = st.decode_payload(&frame).unwrap() else {
            panic!("期望视频帧")
        };
        assert!(v.is_keyframe);
        assert_eq!(&v.data[0][0..4], &[0, 1, 2, 3]);
        assert_eq!(&v.data[0][4..8], &[1, 1, 1, 1]);
        assert_eq!(&v.data[0][8..12], &[4, 5, 6, 7]);
        let pal = v.palette.unwrap();
        assert_eq!(pal.get(0), [255, 0, 0]);
        assert_eq!(pal.get(1), [0, 255, 0]);
    }

    #[test]
    fn test_纯色向量() {
        let h = VqaHeader::parse(&header_bytes(2, 4, 2, 2, 8)).unwrap();
        let mut st = VqaState::new(&h).unwrap();
        // 4x2 纯色区从 0xF00 开始, 0xF07 为颜色 7
        let frame = sub(b"VPTZ", &lcw_raw(&[0x07, 0x0F]));
        let Frame::Video(v) = st.decode_payload(&frame).unwrap() else {
            panic!("期望视频帧")
        };
        assert!(!v.is_keyframe);
        assert_eq!(v.data[0], vec![7; 8]);
    }

    #[test]
    fn test_v1_纯色填充() {
        let h = VqaHeader::parse(&header_bytes(1, 4, 4, 4, 8)).unwrap();
        let mut st = VqaState::new(&h).unwrap();
        let frame = sub(b"VPTZ", &lcw_raw(&[0x05, 0xFF]));
        let Frame::Video(v) = st.decode_payload(&frame).unwrap() else {
            panic!("期望视频帧")
        };
        assert_eq!(v.data[0], vec![250; 16]);
    }

    #[test]
    fn test_码本片段累积后替换() {
        let h = VqaHeader::parse(&header_bytes(2, 4, 2, 2, 2)).unwrap();
        let mut st = VqaState::new(&h).unwrap();
        let vptz = sub(b"VPTZ", &lcw_raw(&[0, 0]));

        let mut f1 = sub(b"CBP0", &[9, 9, 9, 9]);
        f1.extend_from_slice(&vptz);
        let Frame::Video(v) = st.decode_payload(&f1).unwrap() else {
            panic!("期望视频帧")
        };
        assert_eq!(v.data[0], vec![0; 8]);

        let mut f2 = sub(b"CBP0", &[9, 9, 9, 9]);
        f2.extend_from_slice(&vptz);
        st.decode_payload(&f2).unwrap();

        // 第三帧才使用新码本
        let Frame::Video(v) = st.decode_payload(&vptz).unwrap() else {
            panic!("期望视频帧")
        };
        assert_eq!(v.data[0], vec![9; 8]);
    }

    #[test]
    fn test_缺少_vptz() {
        let h = VqaHeader::parse(&header_bytes(2, 4, 2, 2, 8)).unwrap();
        let mut st = VqaState::new(&h).unwrap();
        assert!(matches!(
            st.decode_payload(&sub(b"CBF0", &[0; 8])),
            Err(LaoError::Malformed(_))
        ));
    }

    #[test]
    fn test_关键帧判定() {
        assert!(has_full_codebook(&sub(b"CBFZ", &[0x80])));
        assert!(!has_full_codebook(&sub(b"CBPZ", &[0x80])));
    }

    #[test]
    fn test_不支持的向量尺寸() {
        let mut bytes = header_bytes(2, 8, 8, 2, 8);
        bytes[10] = 2;
        let h = VqaHeader::parse(&bytes).unwrap();
        assert!(matches!(VqaState::new(&h), Err(LaoError::Unsupported(_))));
    }
}
