//! 声道交织器.
//!
//! 纯函数: 把分别解码的各声道采样合成为交错 PCM, 或反向拆分.
//! 不保存任何状态, 可以脱离解码流程单独使用.

use lao_core::{LaoError, LaoResult};

/// 将各声道采样交织为 `c0 c1 .. c0 c1 ..` 的顺序
///
/// 所有声道长度必须一致, 否则返回 `Malformed`. 空声道列表得到空结果.
pub fn interleave<T: Copy>(channels: &[&[T]]) -> LaoResult<Vec<T>> {
    let Some(first) = channels.first() else {
        return Ok(Vec::new());
    };
    let len = first.len();
    if let Some((idx, ch)) = channels.iter().enumerate().find(|(_, c)| c.len() != len) {
        return Err(LaoError::Malformed(format!(
            "声道 {idx} 长度 {} 与声道 0 的长度 {len} 不一致",
            ch.len()
        )));
    }
    let mut out = Vec::with_capacity(len * channels.len());
    for i in 0..len {
        for ch in channels {
            out.push(ch[i]);
        }
    }
    Ok(out)
}

/// 将交错采样拆分为各声道
///
/// 采样数必须是声道数的整数倍.
pub fn deinterleave<T: Copy>(samples: &[T], channels: usize) -> LaoResult<Vec<Vec<T>>> {
    if channels == 0 {
        return Err(LaoError::InvalidArgument("声道数不能为 0".into()));
    }
    if samples.len() % channels != 0 {
        return Err(LaoError::Malformed(format!(
            "采样数 {} 不是声道数 {channels} 的整数倍",
            samples.len()
        )));
    }
    let per_channel = samples.len() / channels;
    let mut out = vec![Vec::with_capacity(per_channel); channels];
    for frame in samples.chunks_exact(channels) {
        for (ch, &s) in out.iter_mut().zip(frame) {
            ch.push(s);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_双声道交织() {
        let l = [1i16, 2, 3];
        let r = [-1i16, -2, -3];
        assert_eq!(interleave(&[&l, &r]).unwrap(), vec![1, -1, 2, -2, 3, -3]);
    }

    #[test]
    fn test_单声道原样返回() {
        let m = [5i16, 6];
        assert_eq!(interleave(&[&m]).unwrap(), vec![5, 6]);
        assert!(interleave::<i16>(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_长度不一致返回格式错误() {
        let l = [1i16, 2];
        let r = [1i16];
        assert!(matches!(
            interleave(&[&l, &r]),
            Err(LaoError::Malformed(_))
        ));
    }

    #[test]
    fn test_拆分后再交织得到原序列() {
        let samples = [1i16, 10, 2, 20, 3, 30];
        let planes = deinterleave(&samples, 2).unwrap();
        assert_eq!(planes, vec![vec![1, 2, 3], vec![10, 20, 30]]);
        let refs: Vec<&[i16]> = planes.iter().map(Vec::as_slice).collect();
        assert_eq!(interleave(&refs).unwrap(), samples.to_vec());
        assert!(deinterleave(&samples[..5], 2).is_err());
    }
}
