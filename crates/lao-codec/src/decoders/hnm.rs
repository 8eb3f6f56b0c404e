//! Cryo HNM4 视频解码器.
//!
//! 每个样本是一个完整的块 (保留 8 字节块头, 块标识在偏移 4):
//! - `PL`: 调色板更新, 不产生画面
//! - `IZ`: 帧内编码, 32 位位队列驱动的 LZ
//! - `IU`: 帧间编码, 以像素对为单位从当前帧或上一帧复制
//!
//! HNM4 的缓冲区按两行交织存放, 输出前还原为逐行画面; HNM4A 不交织.

use lao_core::{ByteReader, LaoError, LaoResult, Palette, PixelFormat};

use crate::codec_id::CodecId;
use crate::codec_parameters::CodecParameters;
use crate::decoder::Decoder;
use crate::frame::{Frame, VideoFrame};
use crate::packet::Packet;
use crate::state::{CodecState, DecoderState};

/// 块标识 (小端读出的两个字符)
pub const HNM4_CHUNK_ID_PL: u16 = u16::from_le_bytes(*b"PL");
pub const HNM4_CHUNK_ID_IZ: u16 = u16::from_le_bytes(*b"IZ");
pub const HNM4_CHUNK_ID_IU: u16 = u16::from_le_bytes(*b"IU");
pub const HNM4_CHUNK_ID_SD: u16 = u16::from_le_bytes(*b"SD");

/// 普通 HNM4 与 HNM4A 的版本号
pub const HNM4_VERSION: u8 = 0x40;
pub const HNM4A_VERSION: u8 = 0x4A;

fn out_of_bounds(what: &str, pos: usize) -> LaoError {
    LaoError::Malformed(format!("HNM4 {what}越界: {pos}"))
}

/// 帧内数据的位队列, 每次补充一个小端 32 位字, 从最高位取
struct BitQueue {
    buf: u32,
    bits: u32,
}

impl BitQueue {
    fn get(&mut self, br: &mut ByteReader<'_>) -> LaoResult<u32> {
        if self.bits == 0 {
            self.buf = br.read_u32_le()?;
            self.bits = 32;
        }
        let bit = self.buf >> 31;
        self.buf <<= 1;
        self.bits -= 1;
        Ok(bit)
    }
}

/// HNM4 解码状态
#[derive(Debug, Clone)]
pub struct HnmState {
    version: u8,
    width: usize,
    height: usize,
    current: Vec<u8>,
    previous: Vec<u8>,
    palette: Palette,
}

impl HnmState {
    /// 创建状态
    pub fn new(version: u8, width: usize, height: usize) -> Self {
        Self {
            version,
            width,
            height,
            current: vec![0; width * height],
            previous: vec![0; width * height],
            palette: Palette::new(),
        }
    }

    /// 当前调色板
    pub fn palette(&self) -> &Palette {
        &self.palette
    }

    fn size(&self) -> usize {
        self.width * self.height
    }

    fn update_palette(&mut self, chunk: &[u8]) -> LaoResult<()> {
        let eight_bit = chunk[7] & 0x80 != 0 && self.version == HNM4A_VERSION;
        let mut br = ByteReader::new(&chunk[8..]);
        while !br.is_empty() {
            let start = br.read_u8()?;
            let count = br.read_u8()?;
            if start == 0xFF && count == 0xFF {
                break;
            }
            let count = if count == 0 { 256 } else { usize::from(count) };
            let mut index = start;
            for _ in 0..count {
                let rgb = br.read_bytes(3)?;
                let entry = if eight_bit {
                    [rgb[0], rgb[1], rgb[2]]
                } else {
                    rgb_vga6([rgb[0], rgb[1], rgb[2]])
                };
                self.palette.set(index, entry);
                index = index.wrapping_add(1);
            }
        }
        Ok(())
    }

    fn unpack_intraframe(&mut self, data: &[u8]) -> LaoResult<()> {
        let size = self.size();
        let mut br = ByteReader::new(data);
        let mut queue = BitQueue { buf: 0, bits: 0 };
        let mut write = 0usize;

        while !br.is_empty() {
            if queue.get(&mut br)? == 1 {
                if write >= size {
                    return Err(out_of_bounds("帧内写入", write));
                }
                self.current[write] = br.read_u8()?;
                write += 1;
                continue;
            }
            let (count, offset) = if queue.get(&mut br)? == 1 {
                let word = br.read_u16_le()?;
                let mut count = usize::from(word & 0x07);
                let offset = i64::from(word >> 3) - 0x2000;
                if count == 0 {
                    count = usize::from(br.read_u8()?);
                }
                if count == 0 {
                    // 结束标记
                    return Ok(());
                }
                (count, offset)
            } else {
                let count = (queue.get(&mut br)? << 1 | queue.get(&mut br)?) as usize;
                let offset = i64::from(br.read_u8()?) - 0x100;
                (count, offset)
            };
            let count = count + 2;
            let src = write as i64 + offset;
            if src < 0 || src as usize + count > size {
                return Err(out_of_bounds("帧内读取", src.max(0) as usize));
            }
            if write + count > size {
                return Err(out_of_bounds("帧内写入", write));
            }
            let src = src as usize;
            for i in 0..count {
                self.current[write + i] = self.current[src + i];
            }
            write += count;
        }
        Ok(())
    }

    fn decode_interframe_v4(&mut self, data: &[u8]) -> LaoResult<()> {
        let size = self.size();
        let width = self.width;
        let mut br = ByteReader::new(data);
        let mut write = 0usize;

        while !br.is_empty() {
            let head = br.peek_u8()?;
            let count = usize::from(head & 0x1F);
            if count == 0 {
                br.skip(1)?;
                match head >> 5 {
                    0 => {
                        if write + 2 > size {
                            return Err(out_of_bounds("帧间写入", write));
                        }
                        self.current[write] = br.read_u8()?;
                        self.current[write + 1] = br.read_u8()?;
                        write += 2;
                    }
                    1 => write += usize::from(br.read_u8()?) * 2,
                    2 => write += usize::from(br.read_u16_le()?) * 2,
                    3 => {
                        let n = usize::from(br.read_u8()?) * 2;
                        if write + n > size {
                            return Err(out_of_bounds("帧间写入", write));
                        }
                        let v = br.read_u8()?;
                        self.current[write..write + n].fill(v);
                        write += n;
                    }
                    _ => break,
                }
                if write > size {
                    return Err(out_of_bounds("帧间跳过", write));
                }
                continue;
            }

            let previous = head & 0x20 != 0;
            let backline = head & 0x40 != 0;
            let backward = head & 0x80 != 0;
            br.skip(1)?;
            let word = br.read_u16_le()?;
            let swap = word & 0x01 != 0;
            let mut offset = write as i64 + i64::from((word >> 1) & 0x7FFF) * 2 - 0x8000;

            let size_i = size as i64;
            let count_i = count as i64;
            let back = if backline { 2 * width as i64 - 1 } else { 0 };
            let bad = if backward {
                offset + 1 >= size_i || offset < back + 2 * (count_i - 1)
            } else {
                offset + 2 * count_i > size_i || offset < back
            };
            if bad || write + 2 * count > size {
                return Err(out_of_bounds("帧间复制", write));
            }

            for _ in 0..count {
                let o = offset as usize;
                let src = if previous { &self.previous } else { &self.current };
                let (a, b) = if backline {
                    (src[o + 1 - 2 * width], src[o])
                } else {
                    (src[o], src[o + 1])
                };
                self.current[write] = a;
                self.current[write + 1] = b;
                write += 2;
                offset += if backward { -2 } else { 2 };
            }

            if swap {
                for pair in self.current[write - 2 * count..write].chunks_exact_mut(2) {
                    pair.swap(0, 1);
                }
            }
        }
        Ok(())
    }

    fn decode_interframe_v4a(&mut self, data: &[u8]) -> LaoResult<()> {
        let size = self.size();
        let width = self.width;
        let mut br = ByteReader::new(data);
        let mut write = 0usize;

        while !br.is_empty() {
            let head = br.read_u8()?;
            let count = usize::from(head & 0x3F);
            if count == 0 {
                match head >> 6 {
                    0 => write += usize::from(br.read_u8()?),
                    1 => {
                        if write + width >= size {
                            return Err(out_of_bounds("帧间写入", write));
                        }
                        self.current[write] = br.read_u8()?;
                        self.current[write + width] = br.read_u8()?;
                        write += 1;
                    }
                    2 => write += width,
                    _ => break,
                }
                if write > size {
                    return Err(out_of_bounds("帧间跳过", write));
                }
                continue;
            }

            let delta = head & 0x80 != 0;
            let previous = head & 0x40 != 0;
            let mut offset = write + usize::from(br.read_u16_le()?);
            if delta {
                offset = offset
                    .checked_sub(0x10000)
                    .ok_or_else(|| out_of_bounds("帧间读取", offset))?;
            }
            if offset + width + count >= size || write + width + count >= size {
                return Err(out_of_bounds("帧间复制", write));
            }
            for _ in 0..count {
                let src = if previous { &self.previous } else { &self.current };
                let (a, b) = (src[offset], src[offset + width]);
                self.current[write] = a;
                self.current[write + width] = b;
                write += 1;
                offset += 1;
            }
        }
        Ok(())
    }

    /// HNM4 的两行交织还原: 偶数字节属于上一行, 奇数字节属于下一行
    fn deinterleave(&self) -> Vec<u8> {
        if self.version == HNM4A_VERSION {
            return self.current.clone();
        }
        let w = self.width;
        let mut out = vec![0u8; self.size()];
        for y in 0..self.height {
            let src = (y - y % 2) * w + y % 2;
            for x in 0..w {
                out[y * w + x] = self.current[src + 2 * x];
            }
        }
        out
    }

    fn output(&self, pixels: Vec<u8>, is_keyframe: bool) -> Frame {
        Frame::Video(
            VideoFrame::from_pal8(self.width as u32, self.height as u32, pixels, &self.palette)
                .with_picture_type(is_keyframe),
        )
    }

    /// 解码一个块样本
    pub fn decode_payload(&mut self, data: &[u8]) -> LaoResult<Option<Frame>> {
        if data.len() < 8 {
            return Err(LaoError::truncated(8, data.len()));
        }
        let chunk_id = u16::from_le_bytes([data[4], data[5]]);
        match chunk_id {
            HNM4_CHUNK_ID_PL => {
                self.update_palette(data)?;
                Ok(None)
            }
            HNM4_CHUNK_ID_IZ => {
                if data.len() < 12 {
                    return Err(LaoError::truncated(12, data.len()));
                }
                self.unpack_intraframe(&data[12..])?;
                self.previous.copy_from_slice(&self.current);
                let pixels = self.deinterleave();
                Ok(Some(self.output(pixels, true)))
            }
            HNM4_CHUNK_ID_IU => {
                if self.version == HNM4A_VERSION {
                    self.decode_interframe_v4a(&data[8..])?;
                } else {
                    self.decode_interframe_v4(&data[8..])?;
                }
                let pixels = self.deinterleave();
                std::mem::swap(&mut self.current, &mut self.previous);
                Ok(Some(self.output(pixels, false)))
            }
            other => Err(LaoError::Malformed(format!(
                "HNM4 视频样本的块标识无效: 0x{other:04X}"
            ))),
        }
    }
}

fn rgb_vga6(rgb: [u8; 3]) -> [u8; 3] {
    rgb.map(lao_core::palette::vga6_to_8)
}

/// HNM4 视频解码器
pub struct Hnm4VideoDecoder;

impl Hnm4VideoDecoder {
    pub fn create() -> LaoResult<Box<dyn Decoder>> {
        Ok(Box::new(Self))
    }
}

impl Decoder for Hnm4VideoDecoder {
    fn codec_id(&self) -> CodecId {
        CodecId::Hnm4Video
    }

    fn name(&self) -> &str {
        "hnm4video"
    }

    fn create_state(&self, params: &CodecParameters) -> LaoResult<DecoderState> {
        let video = params.require_video()?;
        let version = params.extra_data.first().copied().unwrap_or(HNM4_VERSION);
        if version != HNM4A_VERSION && video.height % 2 != 0 {
            return Err(LaoError::InvalidArgument(format!(
                "HNM4 高度必须是偶数: {}",
                video.height
            )));
        }
        if video.pixel_format != PixelFormat::Pal8 {
            return Err(LaoError::InvalidArgument("HNM4 只输出 PAL8".into()));
        }
        Ok(DecoderState::new(CodecState::Hnm(Box::new(HnmState::new(
            version,
            video.width as usize,
            video.height as usize,
        )))))
    }

    fn decode_sample(&self, state: &mut CodecState, packet: &Packet) -> LaoResult<Option<Frame>> {
        let CodecState::Hnm(st) = state else {
            return Err(state.mismatch(CodecId::Hnm4Video));
        };
        st.decode_payload(&packet.data)
    }
}
