//! Delphine CIN 视频解码器.
//!
//! 负载: `u8 调色板类型, u16 颜色数, u8 位图类型`, 调色板, 位图数据.
//! 调色板类型 0 为从 0 开始的连续 BGR 三元组, 否则每项带一个索引字节.
//!
//! 位图类型:
//! - 9 / 34: RLE
//! - 35 / 36: 半字节 Huffman 后再 RLE
//! - 37: 半字节 Huffman
//! - 38 / 39: LZSS
//!
//! 34/36/39 是差分帧, 解出的位图逐字节加上上一帧. 位图自下而上存放.

use lao_core::{ByteReader, LaoError, LaoResult, Palette, PixelFormat};

use crate::codec_id::CodecId;
use crate::codec_parameters::CodecParameters;
use crate::decoder::Decoder;
use crate::frame::{Frame, VideoFrame};
use crate::packet::Packet;
use crate::state::{CodecState, DecoderState};

/// 位图类型
pub const CIN_RLE: u8 = 9;
pub const CIN_RLE_DELTA: u8 = 34;
pub const CIN_HUFFMAN_RLE: u8 = 35;
pub const CIN_HUFFMAN_RLE_DELTA: u8 = 36;
pub const CIN_HUFFMAN: u8 = 37;
pub const CIN_LZSS: u8 = 38;
pub const CIN_LZSS_DELTA: u8 = 39;

/// 是否为不依赖上一帧的位图类型
pub fn is_intra_type(bitmap_type: u8) -> bool {
    matches!(bitmap_type, CIN_RLE | CIN_HUFFMAN_RLE | CIN_HUFFMAN | CIN_LZSS)
}

/// 解出的数据不足输出的十分之一时视为损坏
fn check_fill(written: usize, dst_size: usize, what: &str) -> LaoResult<()> {
    if dst_size - written > dst_size - dst_size / 10 {
        return Err(LaoError::Malformed(format!(
            "CIN {what} 只解出 {written}/{dst_size} 字节"
        )));
    }
    Ok(())
}

/// 半字节 Huffman: 前 15 字节为码表, 半字节 15 表示随后的原样半字节对
pub fn decode_huffman(src: &[u8], dst: &mut [u8]) -> LaoResult<usize> {
    if src.len() < 15 {
        return Err(LaoError::truncated(15, src.len()));
    }
    let (table, body) = src.split_at(15);
    let mut br = ByteReader::new(body);
    let mut n = 0usize;

    while !br.is_empty() && n < dst.len() {
        let mut code = br.read_u8()?;
        if code >> 4 == 15 {
            let hi = code << 4;
            code = br.read_u8()?;
            dst[n] = hi | (code >> 4);
        } else {
            dst[n] = table[usize::from(code >> 4)];
        }
        n += 1;
        if n >= dst.len() {
            break;
        }

        let lo = code & 15;
        dst[n] = if lo == 15 {
            br.read_u8()?
        } else {
            table[usize::from(lo)]
        };
        n += 1;
    }
    Ok(n)
}

/// LZSS: 每个标志字节从低位起控制 8 项, 1 为字面字节, 0 为 `u16` 回溯引用
pub fn decode_lzss(src: &[u8], dst: &mut [u8]) -> LaoResult<()> {
    let mut br = ByteReader::new(src);
    let mut n = 0usize;

    while !br.is_empty() && n < dst.len() {
        let code = br.read_u8()?;
        for i in 0..8 {
            if br.is_empty() || n >= dst.len() {
                break;
            }
            if code & (1 << i) != 0 {
                dst[n] = br.read_u8()?;
                n += 1;
                continue;
            }
            let cmd = br.read_u16_le()?;
            let distance = usize::from(cmd >> 4) + 1;
            if distance > n {
                return Err(LaoError::Malformed(format!(
                    "CIN LZSS 回溯距离 {distance} 超过已输出的 {n} 字节"
                )));
            }
            let size = (usize::from(cmd & 0xF) + 2).min(dst.len() - n);
            // 回溯区可能与输出重叠, 逐字节复制以重复短序列
            for _ in 0..size {
                dst[n] = dst[n - distance];
                n += 1;
            }
        }
    }
    check_fill(n, dst.len(), "LZSS")
}

/// RLE: 最高位置位时重复下一字节 `code - 0x7F` 次, 否则原样复制 `code + 1` 字节
pub fn decode_rle(src: &[u8], dst: &mut [u8]) -> LaoResult<()> {
    let mut br = ByteReader::new(src);
    let mut n = 0usize;

    while br.remaining() > 1 && n < dst.len() {
        let code = br.read_u8()?;
        if code & 0x80 != 0 {
            let len = usize::from(code) - 0x7F;
            let v = br.read_u8()?;
            let end = (n + len).min(dst.len());
            dst[n..end].fill(v);
            n += len;
        } else {
            let len = usize::from(code) + 1;
            let data = br.read_bytes(len).map_err(|_| {
                LaoError::Malformed(format!("CIN RLE 原样段 {len} 字节超出数据"))
            })?;
            let end = (n + len).min(dst.len());
            dst[n..end].copy_from_slice(&data[..end - n]);
            n += len;
        }
    }
    check_fill(n.min(dst.len()), dst.len(), "RLE")
}

/// CIN 视频解码状态
#[derive(Debug, Clone)]
pub struct CinVideoState {
    width: usize,
    height: usize,
    current: Vec<u8>,
    previous: Vec<u8>,
    scratch: Vec<u8>,
    palette: Palette,
}

impl CinVideoState {
    /// 创建状态
    pub fn new(width: usize, height: usize) -> Self {
        let size = width * height;
        Self {
            width,
            height,
            current: vec![0; size],
            previous: vec![0; size],
            scratch: vec![0; size],
            palette: Palette::new(),
        }
    }

    /// 当前调色板
    pub fn palette(&self) -> &Palette {
        &self.palette
    }

    fn read_palette(&mut self, br: &mut ByteReader<'_>, palette_type: u8, count: usize) -> LaoResult<()> {
        let entry_size = if palette_type == 0 { 3 } else { 4 };
        if br.remaining() < count * entry_size {
            return Err(LaoError::Malformed(format!(
                "CIN 调色板 {count} 项超出负载"
            )));
        }
        if palette_type == 0 {
            if count > 256 {
                return Err(LaoError::Malformed(format!("CIN 调色板颜色数 {count}")));
            }
            for i in 0..count {
                let bgr = br.read_bytes(3)?;
                self.palette.set(i as u8, [bgr[2], bgr[1], bgr[0]]);
            }
        } else {
            for _ in 0..count {
                let e = br.read_bytes(4)?;
                self.palette.set(e[0], [e[3], e[2], e[1]]);
            }
        }
        Ok(())
    }

    fn apply_delta(&mut self) {
        for (cur, prev) in self.current.iter_mut().zip(&self.previous) {
            *cur = cur.wrapping_add(*prev);
        }
    }

    /// 解码一个视频样本
    pub fn decode_payload(&mut self, data: &[u8]) -> LaoResult<Frame> {
        let mut br = ByteReader::new(data);
        let palette_type = br.read_u8()?;
        let palette_count = usize::from(br.read_u16_le()?);
        let bitmap_type = br.read_u8()?;
        self.read_palette(&mut br, palette_type, palette_count)?;
        let bitmap = br.read_rest();

        match bitmap_type {
            CIN_RLE | CIN_RLE_DELTA => decode_rle(bitmap, &mut self.current)?,
            CIN_HUFFMAN_RLE | CIN_HUFFMAN_RLE_DELTA => {
                let n = decode_huffman(bitmap, &mut self.scratch)?;
                decode_rle(&self.scratch[..n], &mut self.current)?;
            }
            CIN_HUFFMAN => {
                decode_huffman(bitmap, &mut self.current)?;
            }
            CIN_LZSS | CIN_LZSS_DELTA => decode_lzss(bitmap, &mut self.current)?,
            other => {
                return Err(LaoError::Malformed(format!("CIN 未知位图类型 {other}")));
            }
        }
        if matches!(
            bitmap_type,
            CIN_RLE_DELTA | CIN_HUFFMAN_RLE_DELTA | CIN_LZSS_DELTA
        ) {
            self.apply_delta();
        }

        // 位图自下而上
        let w = self.width;
        let mut pixels = Vec::with_capacity(self.current.len());
        for row in self.current.chunks_exact(w).rev() {
            pixels.extend_from_slice(row);
        }
        let frame = VideoFrame::from_pal8(w as u32, self.height as u32, pixels, &self.palette)
            .with_picture_type(is_intra_type(bitmap_type));
        std::mem::swap(&mut self.current, &mut self.previous);
        Ok(Frame::Video(frame))
    }
}

/// Delphine CIN 视频解码器
pub struct CinVideoDecoder;

impl CinVideoDecoder {
    pub fn create() -> LaoResult<Box<dyn Decoder>> {
        Ok(Box::new(Self))
    }
}

impl Decoder for CinVideoDecoder {
    fn codec_id(&self) -> CodecId {
        CodecId::CinVideo
    }

    fn name(&self) -> &str {
        "dsicinvideo"
    }

    fn create_state(&self, params: &CodecParameters) -> LaoResult<DecoderState> {
        let video = params.require_video()?;
        if video.pixel_format != PixelFormat::Pal8 {
            return Err(LaoError::InvalidArgument("CIN 只输出 PAL8".into()));
        }
        Ok(DecoderState::new(CodecState::Cin(Box::new(CinVideoState::new(
            video.width as usize,
            video.height as usize,
        )))))
    }

    fn decode_sample(&self, state: &mut CodecState, packet: &Packet) -> LaoResult<Option<Frame>> {
        let CodecState::Cin(st) = state else {
            return Err(state.mismatch(CodecId::CinVideo));
        };
        st.decode_payload(&packet.data).map(Some)
    }
}
