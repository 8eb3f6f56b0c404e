//! Interplay MVE 视频解码器 (8 位调色板).
//!
//! 画面按 8x8 块编码, 解码映射表为每块给出 4 位操作码 (低半字节在前),
//! 块数据依次存放在视频数据中. 操作码 0x0-0x5 从上一帧、两帧前或当前帧
//! 按运动偏移复制, 0x7-0xF 为 2/4/16/64 色的直接编码.
//!
//! 运动偏移按线性地址计算, 水平越过边缘时会折到相邻行.

use lao_core::{ByteReader, LaoError, LaoResult, Palette};
use log::warn;

use crate::codec_id::CodecId;
use crate::codec_parameters::CodecParameters;
use crate::decoder::Decoder;
use crate::frame::{Frame, VideoFrame};
use crate::packet::Packet;
use crate::state::{CodecState, DecoderState};

/// 视频数据开头的帧信息长度
const VIDEO_DATA_HEADER: usize = 14;

/// 复制源
#[derive(Clone, Copy)]
enum Source {
    Last,
    SecondLast,
    Current,
}

/// MVE 解码状态: 两帧参考画面与调色板
#[derive(Debug, Clone)]
pub struct MveState {
    width: usize,
    height: usize,
    last: Vec<u8>,
    second_last: Vec<u8>,
    palette: Palette,
}

/// 正在解码的一个 8x8 块
struct Block<'a> {
    pixels: &'a mut [u8],
    stride: usize,
    offset: usize,
}

impl Block<'_> {
    fn put(&mut self, x: usize, y: usize, v: u8) {
        self.pixels[self.offset + y * self.stride + x] = v;
    }

    /// 2x2 像素
    fn put2x2(&mut self, x: usize, y: usize, v: u8) {
        self.put(x, y, v);
        self.put(x + 1, y, v);
        self.put(x, y + 1, v);
        self.put(x + 1, y + 1, v);
    }

    /// 按 1 位标志填充 4x4 象限, `quadrant` 依次为左上、左下、右上、右下
    fn quadrant_2color(&mut self, quadrant: usize, p: [u8; 2], mut flags: u32) {
        let (qx, qy) = ((quadrant / 2) * 4, (quadrant % 2) * 4);
        for y in 0..4 {
            for x in 0..4 {
                self.put(qx + x, qy + y, p[(flags & 1) as usize]);
                flags >>= 1;
            }
        }
    }

    fn quadrant_4color(&mut self, quadrant: usize, p: &[u8], mut flags: u32) {
        let (qx, qy) = ((quadrant / 2) * 4, (quadrant % 2) * 4);
        for y in 0..4 {
            for x in 0..4 {
                self.put(qx + x, qy + y, p[(flags & 3) as usize]);
                flags >>= 2;
            }
        }
    }
}

fn read4(br: &mut ByteReader<'_>) -> LaoResult<[u8; 4]> {
    let mut p = [0u8; 4];
    br.read_into(&mut p)?;
    Ok(p)
}

/// 0x2/0x3 的运动字节
fn motion_near(b: u8) -> (i32, i32) {
    let b = i32::from(b);
    if b < 56 {
        (8 + b % 7, b / 7)
    } else {
        (-14 + (b - 56) % 29, 8 + (b - 56) / 29)
    }
}

impl MveState {
    /// 创建状态, 参考帧初始为全 0
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            last: vec![0; width * height],
            second_last: vec![0; width * height],
            palette: Palette::new(),
        }
    }

    /// 当前调色板
    pub fn palette(&self) -> &Palette {
        &self.palette
    }

    fn copy_from(&self, cur: &mut [u8], source: Source, offset: usize, dx: i32, dy: i32) -> LaoResult<()> {
        let stride = self.width as i64;
        let motion = offset as i64 + i64::from(dy) * stride + i64::from(dx);
        let upper = (self.height as i64 - 8) * stride + (self.width as i64 - 8);
        if motion < 0 || motion > upper {
            return Err(LaoError::Malformed(format!(
                "MVE 运动偏移越界: ({dx}, {dy}) @ {offset}"
            )));
        }
        let motion = motion as usize;
        let w = self.width;
        for row in 0..8 {
            let s = motion + row * w;
            let d = offset + row * w;
            match source {
                Source::Last => cur[d..d + 8].copy_from_slice(&self.last[s..s + 8]),
                Source::SecondLast => cur[d..d + 8].copy_from_slice(&self.second_last[s..s + 8]),
                Source::Current => cur.copy_within(s..s + 8, d),
            }
        }
        Ok(())
    }

    fn decode_block(&self, opcode: u8, cur: &mut [u8], offset: usize, br: &mut ByteReader<'_>) -> LaoResult<()> {
        match opcode {
            0x0 => return self.copy_from(cur, Source::Last, offset, 0, 0),
            0x1 => return self.copy_from(cur, Source::SecondLast, offset, 0, 0),
            0x2 => {
                let (x, y) = motion_near(br.read_u8()?);
                return self.copy_from(cur, Source::SecondLast, offset, x, y);
            }
            0x3 => {
                let (x, y) = motion_near(br.read_u8()?);
                return self.copy_from(cur, Source::Current, offset, -x, -y);
            }
            0x4 => {
                let b = br.read_u8()?;
                let x = -8 + i32::from(b & 0x0F);
                let y = -8 + i32::from(b >> 4);
                return self.copy_from(cur, Source::Last, offset, x, y);
            }
            0x5 => {
                let x = i32::from(br.read_i8()?);
                let y = i32::from(br.read_i8()?);
                return self.copy_from(cur, Source::Last, offset, x, y);
            }
            0x6 => {
                warn!("MVE: 遇到未定义的块操作码 0x6, 跳过");
                return Ok(());
            }
            _ => {}
        }

        let mut blk = Block {
            pixels: cur,
            stride: self.width,
            offset,
        };
        match opcode {
            0x7 => {
                let p = [br.read_u8()?, br.read_u8()?];
                if p[0] <= p[1] {
                    for y in 0..8 {
                        let flags = br.read_u8()?;
                        for x in 0..8 {
                            blk.put(x, y, p[usize::from((flags >> x) & 1)]);
                        }
                    }
                } else {
                    let mut flags = br.read_u16_le()?;
                    for y in (0..8).step_by(2) {
                        for x in (0..8).step_by(2) {
                            blk.put2x2(x, y, p[usize::from(flags & 1)]);
                            flags >>= 1;
                        }
                    }
                }
            }
            0x8 => {
                let p = [br.read_u8()?, br.read_u8()?];
                if p[0] <= p[1] {
                    let mut colors = p;
                    for quadrant in 0..4 {
                        if quadrant > 0 {
                            colors = [br.read_u8()?, br.read_u8()?];
                        }
                        let flags = u32::from(br.read_u16_le()?);
                        blk.quadrant_2color(quadrant, colors, flags);
                    }
                } else {
                    let flags = br.read_u32_le()?;
                    let q = [br.read_u8()?, br.read_u8()?];
                    if q[0] <= q[1] {
                        // 左右两半
                        let right = br.read_u32_le()?;
                        Self::half_2color(&mut blk, 0, p, flags, true);
                        Self::half_2color(&mut blk, 1, q, right, true);
                    } else {
                        // 上下两半
                        let bottom = br.read_u32_le()?;
                        Self::half_2color(&mut blk, 0, p, flags, false);
                        Self::half_2color(&mut blk, 1, q, bottom, false);
                    }
                }
            }
            0x9 => {
                let p = read4(br)?;
                match (p[0] <= p[1], p[2] <= p[3]) {
                    (true, true) => {
                        for y in 0..8 {
                            let mut flags = br.read_u16_le()?;
                            for x in 0..8 {
                                blk.put(x, y, p[usize::from(flags & 3)]);
                                flags >>= 2;
                            }
                        }
                    }
                    (true, false) => {
                        let mut flags = br.read_u32_le()?;
                        for y in (0..8).step_by(2) {
                            for x in (0..8).step_by(2) {
                                blk.put2x2(x, y, p[(flags & 3) as usize]);
                                flags >>= 2;
                            }
                        }
                    }
                    (false, true) => {
                        let mut flags = br.read_u64_le()?;
                        for y in 0..8 {
                            for x in (0..8).step_by(2) {
                                let v = p[(flags & 3) as usize];
                                blk.put(x, y, v);
                                blk.put(x + 1, y, v);
                                flags >>= 2;
                            }
                        }
                    }
                    (false, false) => {
                        let mut flags = br.read_u64_le()?;
                        for y in (0..8).step_by(2) {
                            for x in 0..8 {
                                let v = p[(flags & 3) as usize];
                                blk.put(x, y, v);
                                blk.put(x, y + 1, v);
                                flags >>= 2;
                            }
                        }
                    }
                }
            }
            0xA => {
                let p = read4(br)?;
                if p[0] <= p[1] {
                    let mut colors = p;
                    for quadrant in 0..4 {
                        if quadrant > 0 {
                            colors = read4(br)?;
                        }
                        let flags = br.read_u32_le()?;
                        blk.quadrant_4color(quadrant, &colors, flags);
                    }
                } else {
                    let first = br.read_u64_le()?;
                    let q = read4(br)?;
                    let second = br.read_u64_le()?;
                    let vertical = q[0] <= q[1];
                    Self::half_4color(&mut blk, 0, &p, first, vertical);
                    Self::half_4color(&mut blk, 1, &q, second, vertical);
                }
            }
            0xB => {
                for y in 0..8 {
                    let row = br.read_bytes(8)?;
                    for (x, &v) in row.iter().enumerate() {
                        blk.put(x, y, v);
                    }
                }
            }
            0xC => {
                for y in (0..8).step_by(2) {
                    for x in (0..8).step_by(2) {
                        blk.put2x2(x, y, br.read_u8()?);
                    }
                }
            }
            0xD => {
                let mut p = [0u8; 2];
                for y in 0..8 {
                    if y % 4 == 0 {
                        p = [br.read_u8()?, br.read_u8()?];
                    }
                    for x in 0..8 {
                        blk.put(x, y, p[x / 4]);
                    }
                }
            }
            0xE => {
                let v = br.read_u8()?;
                for y in 0..8 {
                    for x in 0..8 {
                        blk.put(x, y, v);
                    }
                }
            }
            _ => {
                // 0xF: 两色棋盘抖动
                let sample = [br.read_u8()?, br.read_u8()?];
                for y in 0..8 {
                    for x in 0..8 {
                        blk.put(x, y, sample[(x + y) & 1]);
                    }
                }
            }
        }
        Ok(())
    }

    /// 2 色编码的半块: 竖直划分时为左/右 4x8, 否则为上/下 8x4
    fn half_2color(blk: &mut Block<'_>, half: usize, p: [u8; 2], mut flags: u32, vertical: bool) {
        let (w, h) = if vertical { (4, 8) } else { (8, 4) };
        let (ox, oy) = if vertical { (half * 4, 0) } else { (0, half * 4) };
        for y in 0..h {
            for x in 0..w {
                blk.put(ox + x, oy + y, p[(flags & 1) as usize]);
                flags >>= 1;
            }
        }
    }

    fn half_4color(blk: &mut Block<'_>, half: usize, p: &[u8], mut flags: u64, vertical: bool) {
        let (w, h) = if vertical { (4, 8) } else { (8, 4) };
        let (ox, oy) = if vertical { (half * 4, 0) } else { (0, half * 4) };
        for y in 0..h {
            for x in 0..w {
                blk.put(ox + x, oy + y, p[(flags & 3) as usize]);
                flags >>= 2;
            }
        }
    }

    /// 解码一个视频样本
    ///
    /// 负载: `u16 map_len, u16 pal_start, u16 pal_count`, 调色板, 解码映射表, 视频数据.
    pub fn decode_payload(&mut self, data: &[u8], is_keyframe: bool) -> LaoResult<Frame> {
        let mut br = ByteReader::new(data);
        let map_len = usize::from(br.read_u16_le()?);
        let pal_start = usize::from(br.read_u16_le()?);
        let pal_count = usize::from(br.read_u16_le()?);
        if pal_count > 0 {
            let rgb = br.read_bytes(pal_count * 3)?;
            self.palette.update_range(pal_start, rgb, true)?;
        }

        let blocks_x = self.width / 8;
        let blocks = blocks_x * (self.height / 8);
        let needed = blocks.div_ceil(2);
        if map_len < needed {
            return Err(LaoError::Malformed(format!(
                "MVE 解码映射表只有 {map_len} 字节, 需要 {needed}"
            )));
        }
        let map = br.read_bytes(map_len)?;
        br.skip(VIDEO_DATA_HEADER)?;

        let mut cur = vec![0u8; self.width * self.height];
        for block in 0..blocks {
            let byte = map[block / 2];
            let opcode = if block % 2 == 0 { byte & 0x0F } else { byte >> 4 };
            let offset = (block / blocks_x) * 8 * self.width + (block % blocks_x) * 8;
            self.decode_block(opcode, &mut cur, offset, &mut br)?;
        }

        let frame = VideoFrame::from_pal8(self.width as u32, self.height as u32, cur.clone(), &self.palette)
            .with_picture_type(is_keyframe);
        self.second_last = std::mem::replace(&mut self.last, cur);
        Ok(Frame::Video(frame))
    }
}

/// Interplay MVE 视频解码器
pub struct InterplayVideoDecoder;

impl InterplayVideoDecoder {
    pub fn create() -> LaoResult<Box<dyn Decoder>> {
        Ok(Box::new(Self))
    }
}

impl Decoder for InterplayVideoDecoder {
    fn codec_id(&self) -> CodecId {
        CodecId::InterplayVideo
    }

    fn name(&self) -> &str {
        "interplayvideo"
    }

    fn create_state(&self, params: &CodecParameters) -> LaoResult<DecoderState> {
        let video = params.require_video()?;
        if video.width % 8 != 0 || video.height % 8 != 0 {
            return Err(LaoError::InvalidArgument(format!(
                "MVE 尺寸必须是 8 的倍数: {}x{}",
                video.width, video.height
            )));
        }
        Ok(DecoderState::new(CodecState::Mve(Box::new(MveState::new(
            video.width as usize,
            video.height as usize,
        )))))
    }

    fn decode_sample(&self, state: &mut CodecState, packet: &Packet) -> LaoResult<Option<Frame>> {
        let CodecState::Mve(st) = state else {
            return Err(state.mismatch(CodecId::InterplayVideo));
        };
        st.decode_payload(&packet.data, packet.is_keyframe).map(Some)
    }
}
