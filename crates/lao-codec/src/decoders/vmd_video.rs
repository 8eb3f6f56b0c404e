//! Sierra VMD 视频解码器 (8 位调色板).
//!
//! 负载 = 帧记录的后 10 字节 (更新矩形 `x, y, 右, 下` 与标志) + 帧数据.
//! 没有帧数据的负载表示重复上一帧.
//! 标志 0x02 表示随后有 768 字节的 6 位调色板. 帧数据的首字节为方法号,
//! 最高位置位时其余数据先经过 4KB 窗口的 LZ 解压:
//! - 1: 每行由 "原样 / 跳过" 段组成
//! - 2: 整个矩形原样
//! - 3: 同 1, 但原样段可以是成对 RLE

use lao_core::{ByteReader, LaoError, LaoResult, Palette, PixelFormat};

use crate::codec_id::CodecId;
use crate::codec_parameters::CodecParameters;
use crate::decoder::Decoder;
use crate::frame::{Frame, VideoFrame};
use crate::packet::Packet;
use crate::state::{CodecState, DecoderState};

/// VMD 文件头长度, 也是视频流 extradata 的长度
pub const VMD_HEADER_SIZE: usize = 0x330;

/// 文件头中调色板与 LZ 缓冲大小的偏移
const HEADER_PALETTE_OFFSET: usize = 28;
const HEADER_UNPACK_SIZE_OFFSET: usize = 800;

/// 负载开头的帧记录参数长度
const RECORD_TAIL_SIZE: usize = 10;

const LZ_WINDOW_SIZE: usize = 0x1000;
const LZ_MAGIC: u32 = 0x5678_1234;

fn bad(msg: impl Into<String>) -> LaoError {
    LaoError::Malformed(msg.into())
}

/// LZ 输出端: 目标缓冲与滑动窗口同步写入
struct LzWriter<'a> {
    dst: &'a mut [u8],
    dst_size: usize,
    opos: usize,
    window: [u8; LZ_WINDOW_SIZE],
    wpos: usize,
}

impl LzWriter<'_> {
    fn put(&mut self, b: u8) -> LaoResult<()> {
        if self.opos >= self.dst_size {
            return Err(bad("VMD LZ 输出越界"));
        }
        self.dst[self.opos] = b;
        self.opos += 1;
        self.window[self.wpos] = b;
        self.wpos = (self.wpos + 1) & 0xFFF;
        Ok(())
    }
}

/// 4KB 滑动窗口 LZ 解压
///
/// 数据以 `u32` 解压长度开头; 紧随魔数 0x56781234 时窗口起点为 0x111,
/// 长度转义值为 15, 否则起点 0xFEE, 转义值 255.
pub fn lz_unpack(src: &[u8], dst: &mut [u8]) -> LaoResult<usize> {
    let mut br = ByteReader::new(src);

    let dst_size = br.read_u32_le()? as usize;
    if dst_size > dst.len() {
        return Err(bad(format!(
            "VMD LZ 解压长度 {dst_size} 超过缓冲 {}",
            dst.len()
        )));
    }
    let (wpos, esc_len) = if br.peek_u32_le().ok() == Some(LZ_MAGIC) {
        br.skip(4)?;
        (0x111usize, 15usize)
    } else {
        (0xFEE, 255)
    };
    let mut out = LzWriter {
        dst,
        dst_size,
        opos: 0,
        window: [0x20; LZ_WINDOW_SIZE],
        wpos,
    };

    while !br.is_empty() && out.opos < dst_size {
        let op = br.read_u8()?;
        if op == 0xFF && br.remaining() > 8 {
            for _ in 0..8 {
                out.put(br.read_u8()?)?;
            }
            continue;
        }
        for i in 0..8 {
            if out.opos == dst_size {
                break;
            }
            if (op >> i) & 1 != 0 {
                out.put(br.read_u8()?)?;
                continue;
            }
            let b0 = usize::from(br.read_u8()?);
            let b1 = usize::from(br.read_u8()?);
            let mut off = b0 | ((b1 & 0xF0) << 4);
            let mut len = b1 & 0xF;
            if len == esc_len {
                len = usize::from(br.read_u8()?) + esc_len;
            }
            for _ in 0..len + 3 {
                out.put(out.window[off])?;
                off = (off + 1) & 0xFFF;
            }
        }
    }
    Ok(out.opos)
}

/// 成对 RLE: 长度为奇数时先有一个原样字节
fn rle_unpack(br: &mut ByteReader<'_>, dst: &mut [u8]) -> LaoResult<()> {
    let len = dst.len();
    let mut dpos = 0usize;
    if len & 1 != 0 {
        dst[0] = br.read_u8()?;
        dpos = 1;
    }
    // 编码数据不会多于输出长度
    let end = br.position() + len;
    while dpos < len && br.position() < end {
        let val = br.read_u8()?;
        let n = usize::from(val & 0x7F) * 2;
        if dpos + n > len {
            return Err(bad("VMD RLE 段越过行尾"));
        }
        if val & 0x80 != 0 {
            br.read_into(&mut dst[dpos..dpos + n])?;
        } else {
            let pair = [br.read_u8()?, br.read_u8()?];
            for chunk in dst[dpos..dpos + n].chunks_exact_mut(2) {
                chunk.copy_from_slice(&pair);
            }
        }
        dpos += n;
    }
    Ok(())
}

/// VMD 视频解码状态
#[derive(Debug, Clone)]
pub struct VmdVideoState {
    width: usize,
    height: usize,
    xoff: usize,
    yoff: usize,
    framebuf: Vec<u8>,
    /// LZ 解压缓冲, 大小由文件头给出
    unpack_buf: Vec<u8>,
    palette: Palette,
}

/// 更新矩形
struct Rect {
    x: usize,
    y: usize,
    w: usize,
    h: usize,
}

impl VmdVideoState {
    /// 由 VMD 文件头建立状态
    pub fn from_header(header: &[u8], width: usize, height: usize) -> LaoResult<Self> {
        if header.len() < VMD_HEADER_SIZE {
            return Err(LaoError::InvalidArgument(format!(
                "VMD 文件头只有 {} 字节",
                header.len()
            )));
        }
        let ver2 = header[4];
        if ver2 >= 5 {
            return Err(LaoError::Unsupported(format!("VMD 真彩色变体 (版本 {ver2})")));
        }
        let unpack_size = u32::from_le_bytes([
            header[HEADER_UNPACK_SIZE_OFFSET],
            header[HEADER_UNPACK_SIZE_OFFSET + 1],
            header[HEADER_UNPACK_SIZE_OFFSET + 2],
            header[HEADER_UNPACK_SIZE_OFFSET + 3],
        ]) as usize;
        if unpack_size >= width * height * 4 + 64 {
            return Err(LaoError::InvalidArgument(format!(
                "VMD 解压缓冲大小 {unpack_size} 不合理"
            )));
        }
        let mut palette = Palette::new();
        palette.update_range(
            0,
            &header[HEADER_PALETTE_OFFSET..HEADER_PALETTE_OFFSET + 768],
            true,
        )?;
        Ok(Self {
            width,
            height,
            xoff: usize::from(u16::from_le_bytes([header[8], header[9]])),
            yoff: usize::from(u16::from_le_bytes([header[10], header[11]])),
            framebuf: vec![0; width * height],
            unpack_buf: vec![0; unpack_size],
            palette,
        })
    }

    /// 当前调色板
    pub fn palette(&self) -> &Palette {
        &self.palette
    }

    fn read_rect(&self, br: &mut ByteReader<'_>) -> LaoResult<Option<Rect>> {
        let x = usize::from(br.read_u16_le()?);
        let y = usize::from(br.read_u16_le()?);
        let r = usize::from(br.read_u16_le()?);
        let d = usize::from(br.read_u16_le()?);
        if [x, y, r, d].iter().all(|&v| v == 0xFFFF) {
            return Ok(None);
        }
        if x < self.xoff
            || y < self.yoff
            || r < x
            || d < y
            || r - self.xoff >= self.width
            || d - self.yoff >= self.height
        {
            return Err(bad(format!("VMD 更新矩形越界: ({x},{y})-({r},{d})")));
        }
        Ok(Some(Rect {
            x: x - self.xoff,
            y: y - self.yoff,
            w: r + 1 - x,
            h: d + 1 - y,
        }))
    }

    /// 按方法号把数据写入帧缓冲, 返回是否为整块原样 (帧内)
    fn decode_frame_data(&mut self, br: &mut ByteReader<'_>, rect: &Rect, method: u8) -> LaoResult<bool> {
        let stride = self.width;
        let mut dpos = rect.y * stride + rect.x;
        match method {
            1 | 3 => {
                for _ in 0..rect.h {
                    let mut x = 0;
                    while x < rect.w {
                        let val = br.read_u8()?;
                        let len = usize::from(val & 0x7F) + 1;
                        if x + len > rect.w {
                            return Err(bad("VMD 行内数据段越过矩形"));
                        }
                        if val & 0x80 != 0 {
                            let pix = &mut self.framebuf[dpos + x..dpos + x + len];
                            if method == 3 && br.peek_u8()? == 0xFF {
                                br.skip(1)?;
                                rle_unpack(br, pix)?;
                            } else {
                                br.read_into(pix)?;
                            }
                        }
                        x += len;
                    }
                    dpos += stride;
                }
                Ok(false)
            }
            2 => {
                for _ in 0..rect.h {
                    br.read_into(&mut self.framebuf[dpos..dpos + rect.w])?;
                    dpos += stride;
                }
                Ok(true)
            }
            other => Err(bad(format!("VMD 未知帧编码方法 {other}"))),
        }
    }

    /// 解码一个视频样本
    pub fn decode_payload(&mut self, data: &[u8]) -> LaoResult<Frame> {
        if data.len() == RECORD_TAIL_SIZE {
            return Ok(self.output(false));
        }
        let mut br = ByteReader::new(data);
        let rect = self.read_rect(&mut br)?;
        br.skip(1)?;
        let flags = br.read_u8()?;

        let mut intra = false;
        if let Some(rect) = rect {
            if flags & 0x02 != 0 {
                br.skip(2)?;
                let rgb = br.read_bytes(768)?;
                self.palette.update_range(0, rgb, true)?;
            }
            if !br.is_empty() {
                let method = br.read_u8()?;
                if method & 0x80 != 0 {
                    if self.unpack_buf.is_empty() {
                        return Err(bad("VMD 文件头未声明 LZ 缓冲"));
                    }
                    let mut unpack = std::mem::take(&mut self.unpack_buf);
                    let result = lz_unpack(br.read_rest(), &mut unpack).and_then(|n| {
                        let mut inner = ByteReader::new(&unpack[..n]);
                        self.decode_frame_data(&mut inner, &rect, method & 0x7F)
                    });
                    self.unpack_buf = unpack;
                    intra = result?;
                } else {
                    intra = self.decode_frame_data(&mut br, &rect, method)?;
                }
                intra = intra
                    && rect.x == 0
                    && rect.y == 0
                    && rect.w == self.width
                    && rect.h == self.height;
            }
        }

        Ok(self.output(intra))
    }

    fn output(&self, intra: bool) -> Frame {
        let frame = VideoFrame::from_pal8(
            self.width as u32,
            self.height as u32,
            self.framebuf.clone(),
            &self.palette,
        )
        .with_picture_type(intra);
        Frame::Video(frame)
    }
}

/// Sierra VMD 视频解码器
pub struct VmdVideoDecoder;

impl VmdVideoDecoder {
    pub fn create() -> LaoResult<Box<dyn Decoder>> {
        Ok(Box::new(Self))
    }
}

impl Decoder for VmdVideoDecoder {
    fn codec_id(&self) -> CodecId {
        CodecId::VmdVideo
    }

    fn name(&self) -> &str {
        "vmdvideo"
    }

    fn create_state(&self, params: &CodecParameters) -> LaoResult<DecoderState> {
        let video = params.require_video()?;
        if video.pixel_format != PixelFormat::Pal8 {
            return Err(LaoError::InvalidArgument("VMD 只输出 PAL8".into()));
        }
        let state = VmdVideoState::from_header(
            &params.extra_data,
            video.width as usize,
            video.height as usize,
        )?;
        Ok(DecoderState::new(CodecState::Vmd(Box::new(state))))
    }

    fn decode_sample(&self, state: &mut CodecState, packet: &Packet) -> LaoResult<Option<Frame>> {
        let CodecState::Vmd(st) = state else {
            return Err(state.mismatch(CodecId::VmdVideo));
        };
        st.decode_payload(&packet.data).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(unpack_size: u32) -> Vec<u8> {
        let mut h = vec![0u8; VMD_HEADER_SIZE];
        h[0..2].copy_from_slice(&0x32Eu16.to_le_bytes());
        h[HEADER_PALETTE_OFFSET + 3..HEADER_PALETTE_OFFSET + 6].copy_from_slice(&[0x3F, 0, 0]);
        h[HEADER_UNPACK_SIZE_OFFSET..HEADER_UNPACK_SIZE_OFFSET + 4]
            .copy_from_slice(&unpack_size.to_le_bytes());
        h
    }

    fn record(x: u16, y: u16, r: u16, d: u16, flags: u8) -> Vec<u8> {
        let mut v = Vec::new();
        for n in [x, y, r, d] {
            v.extend_from_slice(&n.to_le_bytes());
        }
        v.push(0);
        v.push(flags);
        v
    }

    fn pixels(frame: &Frame) -> &[u8] {
        match frame {
            Frame::Video(v) => &v.data[0],
            Frame::Audio(_) => panic!("期望视频帧"),
        }
    }

    #[test]
    fn test_文件头调色板() {
        let st = VmdVideoState::from_header(&header(0), 4, 2).unwrap();
        assert_eq!(st.palette().get(1), [255, 0, 0]);
    }

    #[test]
    fn test_原样整帧为帧内() {
        let mut st = VmdVideoState::from_header(&header(0), 4, 2).unwrap();
        let mut data = record(0, 0, 3, 1, 0);
        data.push(2);
        data.extend(1u8..=8);
        let frame = st.decode_payload(&data).unwrap();
        assert_eq!(pixels(&frame), &[1, 2, 3, 4, 5, 6, 7, 8]);
        let Frame::Video(v) = frame else { unreachable!() };
        assert!(v.is_keyframe);
    }

    #[test]
    fn test_跳过段保留旧像素() {
        let mut st = VmdVideoState::from_header(&header(0), 4, 1).unwrap();
        let mut data = record(0, 0, 3, 0, 0);
        data.extend_from_slice(&[2, 1, 2, 3, 4]);
        st.decode_payload(&data).unwrap();
        // 方法 1: 跳过 2 像素, 原样 2 像素
        let mut data = record(0, 0, 3, 0, 0);
        data.extend_from_slice(&[1, 0x01, 0x81, 9, 9]);
        let frame = st.decode_payload(&data).unwrap();
        assert_eq!(pixels(&frame), &[1, 2, 9, 9]);
    }

    #[test]
    fn test_方法3_成对_rle() {
        let mut st = VmdVideoState::from_header(&header(0), 4, 1).unwrap();
        let mut data = record(0, 0, 3, 0, 0);
        // 原样段 4 像素, 以 0xFF 引出 RLE: 重复 (5, 6) 两次
        data.extend_from_slice(&[3, 0x83, 0xFF, 0x02, 5, 6]);
        let frame = st.decode_payload(&data).unwrap();
        assert_eq!(pixels(&frame), &[5, 6, 5, 6]);
    }

    #[test]
    fn test_lz_解压() {
        // 两个字面字节, 然后从窗口起点 0xFEE 复制 3 字节
        let mut src = 5u32.to_le_bytes().to_vec();
        src.extend_from_slice(&[0b011, 7, 8, 0xEE, 0xF0]);
        let mut out = [0u8; 8];
        assert_eq!(lz_unpack(&src, &mut out).unwrap(), 5);
        assert_eq!(&out[..5], &[7, 8, 7, 8, 7]);
    }

    #[test]
    fn test_lz_压缩帧() {
        let mut st = VmdVideoState::from_header(&header(64), 2, 1).unwrap();
        let mut data = record(0, 0, 1, 0, 0);
        data.push(0x82);
        data.extend_from_slice(&2u32.to_le_bytes());
        data.extend_from_slice(&[0b11, 4, 5]);
        let frame = st.decode_payload(&data).unwrap();
        assert_eq!(pixels(&frame), &[4, 5]);
    }

    #[test]
    fn test_不变帧() {
        let mut st = VmdVideoState::from_header(&header(0), 2, 1).unwrap();
        let data = record(0xFFFF, 0xFFFF, 0xFFFF, 0xFFFF, 0);
        let frame = st.decode_payload(&data).unwrap();
        assert_eq!(pixels(&frame), &[0, 0]);
    }

    #[test]
    fn test_空帧重复上一帧() {
        let mut st = VmdVideoState::from_header(&header(0), 2, 1).unwrap();
        let mut data = record(0, 0, 1, 0, 0);
        data.extend_from_slice(&[2, 7, 9]);
        st.decode_payload(&data).unwrap();
        // 长度为 0 的帧记录, 矩形与标志字段可能是任意值
        let frame = st.decode_payload(&record(9, 9, 9, 9, 0x02)).unwrap();
        assert_eq!(pixels(&frame), &[7, 9]);
        let Frame::Video(v) = frame else { unreachable!() };
        assert!(!v.is_keyframe);
    }

    #[test]
    fn test_矩形越界() {
        let mut st = VmdVideoState::from_header(&header(0), 2, 1).unwrap();
        let mut data = record(0, 0, 5, 0, 0);
        data.extend_from_slice(&[2, 0, 0]);
        assert!(matches!(
            st.decode_payload(&data),
            Err(LaoError::Malformed(_))
        ));
    }
}
