//! H.263 风格窄带视频的图像头解析.
//!
//! 只解析图像层头部 (PSC, TR, PTYPE, PQUANT), 宏块层不解码.
//! 解封装器据此切分图像并判断关键帧.

use lao_core::bitreader::BitReader;
use lao_core::{LaoError, LaoResult};

/// 图像起始码 (22 位)
pub const H263_PSC: u32 = 0x20;
/// 图像起始码位数
pub const H263_PSC_BITS: u32 = 22;

/// 源格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    /// 128x96
    SubQcif,
    /// 176x144
    Qcif,
    /// 352x288
    Cif,
    /// 704x576
    Cif4,
    /// 1408x1152
    Cif16,
    /// 自定义尺寸 (CPFMT), 宽高由后续字段给出
    Custom,
}

impl SourceFormat {
    fn from_code(code: u32) -> LaoResult<Self> {
        match code {
            1 => Ok(Self::SubQcif),
            2 => Ok(Self::Qcif),
            3 => Ok(Self::Cif),
            4 => Ok(Self::Cif4),
            5 => Ok(Self::Cif16),
            6 => Ok(Self::Custom),
            other => Err(LaoError::Malformed(format!("H.263 非法源格式 {other}"))),
        }
    }

    /// 标准源格式的图像尺寸
    pub fn dimensions(self) -> Option<(u32, u32)> {
        match self {
            Self::SubQcif => Some((128, 96)),
            Self::Qcif => Some((176, 144)),
            Self::Cif => Some((352, 288)),
            Self::Cif4 => Some((704, 576)),
            Self::Cif16 => Some((1408, 1152)),
            Self::Custom => None,
        }
    }
}

/// 图像编码类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum H263PictureType {
    /// 帧内
    Intra,
    /// 帧间
    Inter,
    /// 扩展类型 (PLUSPTYPE 的 B/EI/EP 等)
    Other(u8),
}

/// 解析出的图像头
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct H263PictureHeader {
    /// 时间参考 (8 位, 会回绕)
    pub temporal_reference: u8,
    /// 源格式; PLUSPTYPE 中 UFEP 为 0 时沿用上一图像, 为 None
    pub source_format: Option<SourceFormat>,
    /// 图像编码类型
    pub picture_type: H263PictureType,
    /// 量化参数 (仅基本 PTYPE)
    pub quant: Option<u8>,
}

impl H263PictureHeader {
    /// 是否为帧内图像
    pub fn is_intra(&self) -> bool {
        self.picture_type == H263PictureType::Intra
    }
}

/// 判断 `data[pos..]` 是否以字节对齐的图像起始码开头
pub fn is_picture_start(data: &[u8], pos: usize) -> bool {
    data.len() >= pos + 3 && data[pos] == 0 && data[pos + 1] == 0 && data[pos + 2] & 0xFC == 0x80
}

/// 从 `from` 开始查找下一个字节对齐的图像起始码
pub fn find_picture_start(data: &[u8], from: usize) -> Option<usize> {
    (from..data.len().saturating_sub(2)).find(|&i| is_picture_start(data, i))
}

/// 解析图像头
pub fn parse_picture_header(data: &[u8]) -> LaoResult<H263PictureHeader> {
    let mut br = BitReader::new(data);
    let psc = br.read_bits(H263_PSC_BITS)?;
    if psc != H263_PSC {
        return Err(LaoError::Malformed(format!("H.263 图像起始码错误: {psc:#x}")));
    }
    let temporal_reference = br.read_bits(8)? as u8;

    // PTYPE: 标记位 1, 区分位 0, 分屏, 文档摄像, 冻结释放
    if br.read_bit()? != 1 || br.read_bit()? != 0 {
        return Err(LaoError::Malformed("H.263 PTYPE 标记位错误".into()));
    }
    br.skip_bits(3)?;
    let format_code = br.read_bits(3)?;

    if format_code != 7 {
        let source_format = SourceFormat::from_code(format_code)?;
        if source_format == SourceFormat::Custom {
            return Err(LaoError::Malformed("H.263 基本 PTYPE 不允许自定义格式".into()));
        }
        let picture_type = if br.read_bit()? == 0 {
            H263PictureType::Intra
        } else {
            H263PictureType::Inter
        };
        // UMV, SAC, AP, PB
        br.skip_bits(4)?;
        let quant = br.read_bits(5)? as u8;
        return Ok(H263PictureHeader {
            temporal_reference,
            source_format: Some(source_format),
            picture_type,
            quant: Some(quant),
        });
    }

    // PLUSPTYPE
    let ufep = br.read_bits(3)?;
    let source_format = match ufep {
        0 => None,
        1 => {
            let fmt = SourceFormat::from_code(br.read_bits(3)?)?;
            // 11 个可选模式位, 然后固定的 1000
            br.skip_bits(11)?;
            if br.read_bits(4)? != 0b1000 {
                return Err(LaoError::Malformed("H.263 OPPTYPE 标记位错误".into()));
            }
            Some(fmt)
        }
        other => return Err(LaoError::Malformed(format!("H.263 非法 UFEP {other}"))),
    };
    let picture_type = match br.read_bits(3)? {
        0 => H263PictureType::Intra,
        1 => H263PictureType::Inter,
        other => H263PictureType::Other(other as u8),
    };
    Ok(H263PictureHeader {
        temporal_reference,
        source_format,
        picture_type,
        quant: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 按位拼出一个基本 PTYPE 的图像头
    fn basic_header(tr: u8, format: u32, inter: bool) -> Vec<u8> {
        let mut bits: u64 = 0;
        let mut n = 0;
        let mut push = |v: u64, len: u32| {
            bits = (bits << len) | v;
            n += len;
        };
        push(u64::from(H263_PSC), 22);
        push(u64::from(tr), 8);
        push(0b10, 2);
        push(0, 3);
        push(u64::from(format), 3);
        push(u64::from(inter), 1);
        push(0, 4);
        push(10, 5);
        push(0, 1);
        let bytes = n.div_ceil(8);
        let bits = bits << (bytes * 8 - n);
        (0..bytes)
            .rev()
            .map(|i| (bits >> (i * 8)) as u8)
            .collect()
    }

    #[test]
    fn test_解析帧内图像头() {
        let data = basic_header(5, 2, false);
        let hdr = parse_picture_header(&data).unwrap();
        assert_eq!(hdr.temporal_reference, 5);
        assert_eq!(hdr.source_format, Some(SourceFormat::Qcif));
        assert_eq!(hdr.source_format.and_then(SourceFormat::dimensions), Some((176, 144)));
        assert!(hdr.is_intra());
        assert_eq!(hdr.quant, Some(10));
    }

    #[test]
    fn test_解析帧间图像头() {
        let data = basic_header(200, 3, true);
        let hdr = parse_picture_header(&data).unwrap();
        assert_eq!(hdr.temporal_reference, 200);
        assert_eq!(hdr.picture_type, H263PictureType::Inter);
    }

    #[test]
    fn test_起始码查找() {
        let mut data = vec![0xAB, 0xCD];
        data.extend(basic_header(0, 1, false));
        assert!(!is_picture_start(&data, 0));
        assert_eq!(find_picture_start(&data, 0), Some(2));
        assert_eq!(find_picture_start(&data, 3), None);
    }

    #[test]
    fn test_错误起始码() {
        let data = [0x00, 0x01, 0x80, 0x00, 0x00];
        assert!(matches!(
            parse_picture_header(&data),
            Err(LaoError::Malformed(_))
        ));
    }

    #[test]
    fn test_头部不完整() {
        let data = basic_header(1, 2, false);
        assert!(matches!(
            parse_picture_header(&data[..3]),
            Err(LaoError::Truncated { .. })
        ));
    }
}
