//! id RoQ 视频解码器.
//!
//! 负载由若干块记录组成 (`u16 id, u32 size, u16 arg` + 数据), 可选的
//! CODEBOOK 块后跟一个 QUAD_VQ 块. 画面按 16x16 宏块扫描, 每个宏块分成
//! 四个 8x8 块, 每块用 2 位编码选择:
//! - MOT: 保持缓冲区原有内容
//! - FCC: 从上一帧按运动向量复制
//! - SLD: 用一个 4x4 码字 (四个放大的 2x2 码字) 填充
//! - CCC: 拆成四个 4x4 子块再分别编码
//!
//! 解码使用两块交替的画面缓冲, MOT 保留的是两帧之前的内容.

use lao_core::{ByteReader, LaoError, LaoResult, PixelFormat};

use crate::codec_id::CodecId;
use crate::codec_parameters::CodecParameters;
use crate::decoder::Decoder;
use crate::frame::{Frame, VideoFrame};
use crate::packet::Packet;
use crate::state::{CodecState, DecoderState};

/// 块标识
pub const ROQ_QUAD_CODEBOOK: u16 = 0x1002;
pub const ROQ_QUAD_VQ: u16 = 0x1011;

/// 块记录头长度
const CHUNK_HEADER_SIZE: usize = 8;

const ROQ_ID_MOT: u16 = 0;
const ROQ_ID_FCC: u16 = 1;
const ROQ_ID_SLD: u16 = 2;

/// 2x2 码字: 四个亮度值和一对色度
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Cell2x2 {
    pub y: [u8; 4],
    pub u: u8,
    pub v: u8,
}

/// YUV 4:4:4 画面
#[derive(Debug, Clone)]
struct Picture {
    planes: [Vec<u8>; 3],
}

impl Picture {
    fn blank(width: usize, height: usize) -> Self {
        let n = width * height;
        Self {
            planes: [vec![0; n], vec![128; n], vec![128; n]],
        }
    }
}

/// RoQ 解码状态: 码本与两块画面缓冲
#[derive(Debug, Clone)]
pub struct RoqState {
    width: usize,
    height: usize,
    cb2x2: [Cell2x2; 256],
    cb4x4: [[u8; 4]; 256],
    current: Picture,
    last: Picture,
    frames_decoded: u64,
}

/// 解析 VQ 编码位时使用的游标
struct VqFlags {
    bits: u16,
    pos: i32,
}

impl VqFlags {
    fn next(&mut self, br: &mut ByteReader<'_>) -> LaoResult<u16> {
        if self.pos < 0 {
            self.bits = br.read_u16_le()?;
            self.pos = 7;
        }
        let id = (self.bits >> (self.pos * 2)) & 0x3;
        self.pos -= 1;
        Ok(id)
    }
}

impl RoqState {
    /// 创建状态, 画面初始化为黑色
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            cb2x2: [Cell2x2::default(); 256],
            cb4x4: [[0; 4]; 256],
            current: Picture::blank(width, height),
            last: Picture::blank(width, height),
            frames_decoded: 0,
        }
    }

    /// 2x2 码本中的一项
    pub fn cell2x2(&self, index: u8) -> Cell2x2 {
        self.cb2x2[usize::from(index)]
    }

    fn read_codebook(&mut self, arg: u16, body: &[u8]) -> LaoResult<()> {
        let mut nv1 = usize::from(arg >> 8);
        if nv1 == 0 {
            nv1 = 256;
        }
        let mut nv2 = usize::from(arg & 0xFF);
        if nv2 == 0 && nv1 * 6 < body.len() {
            nv2 = 256;
        }
        let mut br = ByteReader::new(body);
        for cell in self.cb2x2.iter_mut().take(nv1) {
            br.read_into(&mut cell.y)?;
            cell.u = br.read_u8()?;
            cell.v = br.read_u8()?;
        }
        for cell in self.cb4x4.iter_mut().take(nv2) {
            br.read_into(cell)?;
        }
        Ok(())
    }

    fn apply_vector_2x2(&mut self, x: usize, y: usize, cell: Cell2x2) {
        let w = self.width;
        let [py, pu, pv] = &mut self.current.planes;
        for dy in 0..2 {
            let off = (y + dy) * w + x;
            py[off] = cell.y[dy * 2];
            py[off + 1] = cell.y[dy * 2 + 1];
            pu[off..off + 2].fill(cell.u);
            pv[off..off + 2].fill(cell.v);
        }
    }

    /// 2x2 码字放大两倍填充 4x4 区域
    fn apply_vector_4x4(&mut self, x: usize, y: usize, cell: Cell2x2) {
        let w = self.width;
        let [py, pu, pv] = &mut self.current.planes;
        for dy in 0..4 {
            let off = (y + dy) * w + x;
            let row = (dy / 2) * 2;
            py[off..off + 2].fill(cell.y[row]);
            py[off + 2..off + 4].fill(cell.y[row + 1]);
            pu[off..off + 4].fill(cell.u);
            pv[off..off + 4].fill(cell.v);
        }
    }

    fn apply_motion(&mut self, x: usize, y: usize, mx: i32, my: i32, size: usize) -> LaoResult<()> {
        let sx = x as i32 + mx;
        let sy = y as i32 + my;
        if sx < 0
            || sy < 0
            || sx as usize + size > self.width
            || sy as usize + size > self.height
        {
            return Err(LaoError::Malformed(format!(
                "RoQ 运动向量越界: ({x},{y}) + ({mx},{my})"
            )));
        }
        let (sx, sy) = (sx as usize, sy as usize);
        let w = self.width;
        for (dst, src) in self.current.planes.iter_mut().zip(self.last.planes.iter()) {
            for row in 0..size {
                let d = (y + row) * w + x;
                let s = (sy + row) * w + sx;
                dst[d..d + size].copy_from_slice(&src[s..s + size]);
            }
        }
        Ok(())
    }

    fn cb4x4_entry(&self, br: &mut ByteReader<'_>) -> LaoResult<[Cell2x2; 4]> {
        let q = self.cb4x4[usize::from(br.read_u8()?)];
        Ok(q.map(|i| self.cb2x2[usize::from(i)]))
    }

    fn motion(byte: u8, arg: u16) -> (i32, i32) {
        let mx = 8 - i32::from(byte >> 4) - i32::from((arg >> 8) as u8 as i8);
        let my = 8 - i32::from(byte & 0xF) - i32::from(arg as u8 as i8);
        (mx, my)
    }

    fn decode_vq(&mut self, arg: u16, body: &[u8]) -> LaoResult<()> {
        let mut br = ByteReader::new(body);
        let mut flags = VqFlags { bits: 0, pos: -1 };
        let (mut xpos, mut ypos) = (0usize, 0usize);

        while !br.is_empty() && ypos < self.height {
            for yp in [ypos, ypos + 8] {
                for xp in [xpos, xpos + 8] {
                    match flags.next(&mut br)? {
                        ROQ_ID_MOT => {}
                        ROQ_ID_FCC => {
                            let (mx, my) = Self::motion(br.read_u8()?, arg);
                            self.apply_motion(xp, yp, mx, my, 8)?;
                        }
                        ROQ_ID_SLD => {
                            let cells = self.cb4x4_entry(&mut br)?;
                            self.apply_vector_4x4(xp, yp, cells[0]);
                            self.apply_vector_4x4(xp + 4, yp, cells[1]);
                            self.apply_vector_4x4(xp, yp + 4, cells[2]);
                            self.apply_vector_4x4(xp + 4, yp + 4, cells[3]);
                        }
                        // CCC
                        _ => self.decode_subblocks(xp, yp, arg, &mut br, &mut flags)?,
                    }
                }
            }

            xpos += 16;
            if xpos >= self.width {
                xpos -= self.width;
                ypos += 16;
            }
        }
        Ok(())
    }

    /// CCC: 8x8 块拆成四个 4x4 子块
    fn decode_subblocks(
        &mut self,
        xp: usize,
        yp: usize,
        arg: u16,
        br: &mut ByteReader<'_>,
        flags: &mut VqFlags,
    ) -> LaoResult<()> {
        for k in 0..4 {
            let x = xp + if k & 1 != 0 { 4 } else { 0 };
            let y = yp + if k & 2 != 0 { 4 } else { 0 };
            match flags.next(br)? {
                ROQ_ID_MOT => {}
                ROQ_ID_FCC => {
                    let (mx, my) = Self::motion(br.read_u8()?, arg);
                    self.apply_motion(x, y, mx, my, 4)?;
                }
                ROQ_ID_SLD => {
                    let cells = self.cb4x4_entry(br)?;
                    self.apply_vector_2x2(x, y, cells[0]);
                    self.apply_vector_2x2(x + 2, y, cells[1]);
                    self.apply_vector_2x2(x, y + 2, cells[2]);
                    self.apply_vector_2x2(x + 2, y + 2, cells[3]);
                }
                _ => {
                    for (dx, dy) in [(0, 0), (2, 0), (0, 2), (2, 2)] {
                        let cell = self.cb2x2[usize::from(br.read_u8()?)];
                        self.apply_vector_2x2(x + dx, y + dy, cell);
                    }
                }
            }
        }
        Ok(())
    }

    fn output(&self) -> VideoFrame {
        let mut frame = VideoFrame::new(self.width as u32, self.height as u32, PixelFormat::Yuv444p);
        frame.data = self.current.planes.to_vec();
        frame.linesize = vec![self.width; 3];
        frame
    }

    /// 解码一个视频样本
    ///
    /// 只带码本的样本更新码本后返回 `None`.
    pub fn decode_payload(&mut self, data: &[u8], is_keyframe: bool) -> LaoResult<Option<Frame>> {
        let mut br = ByteReader::new(data);
        let mut vq = None;
        while br.remaining() >= CHUNK_HEADER_SIZE {
            let id = br.read_u16_le()?;
            let size = br.read_u32_le()? as usize;
            let arg = br.read_u16_le()?;
            let body = br.read_bytes(size)?;
            match id {
                ROQ_QUAD_CODEBOOK => self.read_codebook(arg, body)?,
                ROQ_QUAD_VQ => {
                    vq = Some((arg, body));
                    break;
                }
                other => {
                    return Err(LaoError::Malformed(format!(
                        "RoQ 视频样本中出现块 0x{other:04X}"
                    )));
                }
            }
        }
        let Some((arg, body)) = vq else {
            return Ok(None);
        };

        // 第二帧开始时缓冲区里还没有内容, 先取上一帧
        if self.frames_decoded == 1 {
            self.current = self.last.clone();
        }
        self.decode_vq(arg, body)?;
        let frame = self.output().with_picture_type(is_keyframe);
        std::mem::swap(&mut self.current, &mut self.last);
        self.frames_decoded += 1;
        Ok(Some(Frame::Video(frame)))
    }
}

/// RoQ 视频解码器
pub struct RoqVideoDecoder;

impl RoqVideoDecoder {
    pub fn create() -> LaoResult<Box<dyn Decoder>> {
        Ok(Box::new(Self))
    }
}

impl Decoder for RoqVideoDecoder {
    fn codec_id(&self) -> CodecId {
        CodecId::RoqVideo
    }

    fn name(&self) -> &str {
        "roqvideo"
    }

    fn create_state(&self, params: &CodecParameters) -> LaoResult<DecoderState> {
        let video = params.require_video()?;
        if video.width % 16 != 0 || video.height % 16 != 0 {
            return Err(LaoError::Unsupported(format!(
                "RoQ 尺寸必须是 16 的倍数: {}x{}",
                video.width, video.height
            )));
        }
        Ok(DecoderState::new(CodecState::Roq(Box::new(RoqState::new(
            video.width as usize,
            video.height as usize,
        )))))
    }

    fn decode_sample(&self, state: &mut CodecState, packet: &Packet) -> LaoResult<Option<Frame>> {
        let CodecState::Roq(st) = state else {
            return Err(state.mismatch(CodecId::RoqVideo));
        };
        st.decode_payload(&packet.data, packet.is_keyframe)
    }
}
