//! 容器健壮性集成测试.
//!
//! 用内存中构造的 VQA, FST, HNM4, WS AUD 文件验证:
//! - 重复打开得到相同的流信息和样本序列
//! - 数据在块中途结束时返回 `Truncated`, 且可以重试
//! - 块长度字段损坏时返回 `Malformed`, 之后的调用依然安全
//! - 任意截断的输入都不会让解析陷入死循环或崩溃

use lao::core::LaoError;
use lao::format::{Container, FormatId, IoContext};

// ============================================================
// 构造测试文件
// ============================================================

fn iff_chunk(tag: &[u8; 4], body: &[u8]) -> Vec<u8> {
    let mut v = tag.to_vec();
    v.extend_from_slice(&(body.len() as u32).to_be_bytes());
    v.extend_from_slice(body);
    if body.len() % 2 == 1 {
        v.push(0);
    }
    v
}

fn build_vqa(chunks: &[Vec<u8>]) -> Vec<u8> {
    let mut vqhd = vec![0u8; 42];
    vqhd[0..2].copy_from_slice(&2u16.to_le_bytes());
    vqhd[4..6].copy_from_slice(&2u16.to_le_bytes());
    vqhd[6..8].copy_from_slice(&8u16.to_le_bytes());
    vqhd[8..10].copy_from_slice(&4u16.to_le_bytes());
    vqhd[10] = 4;
    vqhd[11] = 2;
    vqhd[12] = 15;
    vqhd[13] = 8;
    vqhd[24..26].copy_from_slice(&22050u16.to_le_bytes());
    vqhd[26] = 1;
    vqhd[27] = 16;

    let mut inner = b"WVQA".to_vec();
    inner.extend(iff_chunk(b"VQHD", &vqhd));
    inner.extend(iff_chunk(b"FINF", &[0; 8]));
    for c in chunks {
        inner.extend_from_slice(c);
    }
    let mut buf = b"FORM".to_vec();
    buf.extend_from_slice(&(inner.len() as u32).to_be_bytes());
    buf.extend(inner);
    buf
}

fn sample_vqa() -> Vec<u8> {
    build_vqa(&[
        iff_chunk(b"SND2", &[0; 10]),
        iff_chunk(b"VQFR", &[1; 5]),
        iff_chunk(b"SND2", &[0; 10]),
        iff_chunk(b"VQFR", &[2; 4]),
    ])
}

fn sample_fst() -> Vec<u8> {
    let entries: [(u32, u16); 3] = [(6, 4), (0, 0), (3, 4)];
    let mut buf = b"2TSF".to_vec();
    for v in [4u32, 2, 0, entries.len() as u32, 10, 8000] {
        buf.extend_from_slice(&v.to_le_bytes());
    }
    buf.extend_from_slice(&8u16.to_le_bytes());
    buf.extend_from_slice(&1u16.to_le_bytes());
    for (img, snd) in entries {
        buf.extend_from_slice(&img.to_le_bytes());
        buf.extend_from_slice(&snd.to_le_bytes());
    }
    for (img, snd) in entries {
        buf.extend(std::iter::repeat_n(0x11, img as usize));
        buf.extend(std::iter::repeat_n(0x80, snd as usize));
    }
    buf
}

fn hnm_chunk(id: &[u8; 2], body: &[u8]) -> Vec<u8> {
    let mut v = ((8 + body.len()) as u32).to_le_bytes()[..3].to_vec();
    v.push(0);
    v.extend_from_slice(id);
    v.extend_from_slice(&[0, 0]);
    v.extend_from_slice(body);
    v
}

fn hnm_superchunk(chunks: &[Vec<u8>]) -> Vec<u8> {
    let body = chunks.concat();
    let mut v = ((body.len() + 4) as u32).to_le_bytes()[..3].to_vec();
    v.push(0);
    v.extend(body);
    v
}

fn sample_hnm() -> Vec<u8> {
    let mut buf = vec![0u8; 64];
    buf[0..4].copy_from_slice(b"HNM4");
    buf[8..10].copy_from_slice(&64u16.to_le_bytes());
    buf[10..12].copy_from_slice(&32u16.to_le_bytes());
    buf[16..20].copy_from_slice(&2u32.to_le_bytes());
    buf.extend(hnm_superchunk(&[
        hnm_chunk(b"PL", &[0xFF, 0xFF]),
        hnm_chunk(b"IZ", &[0; 6]),
    ]));
    buf.extend(hnm_superchunk(&[hnm_chunk(b"IU", &[0; 2])]));
    buf
}

fn sample_aud() -> Vec<u8> {
    let chunks: [&[u8]; 2] = [&[0x10; 6], &[0x20; 4]];
    let total: usize = chunks.iter().map(|c| c.len() + 8).sum();
    let mut buf = 22050u16.to_le_bytes().to_vec();
    buf.extend_from_slice(&(total as u32).to_le_bytes());
    buf.extend_from_slice(&0u32.to_le_bytes());
    buf.push(2);
    buf.push(99);
    for c in chunks {
        buf.extend_from_slice(&(c.len() as u16).to_le_bytes());
        buf.extend_from_slice(&((c.len() * 4) as u16).to_le_bytes());
        buf.extend_from_slice(&0x0000_DEAFu32.to_le_bytes());
        buf.extend_from_slice(c);
    }
    buf
}

fn samples() -> Vec<(FormatId, Vec<u8>)> {
    vec![
        (FormatId::Vqa, sample_vqa()),
        (FormatId::Fst, sample_fst()),
        (FormatId::Hnm, sample_hnm()),
        (FormatId::WsAud, sample_aud()),
    ]
}

/// 读完全部样本, 返回 (流索引, pts, 长度) 序列
fn drain(container: &mut Container) -> Vec<(usize, i64, usize)> {
    let mut out = Vec::new();
    loop {
        match container.next_sample() {
            Ok(p) => out.push((p.stream_index, p.pts, p.size())),
            Err(LaoError::Eof) => return out,
            Err(e) => panic!("意外错误: {e}"),
        }
    }
}

// ============================================================
// 测试
// ============================================================

#[test]
fn test_探测出正确的格式() {
    for (format_id, data) in samples() {
        let container = lao::open_container(data).unwrap();
        assert_eq!(container.format_id(), format_id);
    }
}

#[test]
fn test_重复打开结果一致() {
    for (format_id, data) in samples() {
        let mut a = lao::open_container(data.clone()).unwrap();
        let mut b = lao::open_container(data).unwrap();
        assert_eq!(a.streams(), b.streams(), "{format_id} 流信息不一致");
        let seq = drain(&mut a);
        assert!(!seq.is_empty(), "{format_id} 没有样本");
        assert_eq!(seq, drain(&mut b), "{format_id} 样本序列不一致");
    }
}

#[test]
fn test_每条流时间戳不减() {
    for (format_id, data) in samples() {
        let mut container = lao::open_container(data).unwrap();
        let mut last = vec![i64::MIN; container.streams().len()];
        for (index, pts, _) in drain(&mut container) {
            assert!(pts >= last[index], "{format_id} 流 {index} 时间戳倒退");
            last[index] = pts;
        }
    }
}

#[test]
fn test_块中途截断返回_truncated_并可重试() {
    let full = sample_vqa();
    // 截掉最后一个 VQFR 块的一部分负载
    let cut = &full[..full.len() - 2];
    let mut container = lao::open_container(cut.to_vec()).unwrap();
    let mut complete = 0;
    let err = loop {
        match container.next_sample() {
            Ok(_) => complete += 1,
            Err(e) => break e,
        }
    };
    assert_eq!(complete, 3);
    assert!(matches!(err, LaoError::Truncated { .. }));
    assert!(err.is_recoverable());

    let pos = container.position();
    assert!(matches!(
        container.next_sample(),
        Err(LaoError::Truncated { .. })
    ));
    assert_eq!(container.position(), pos);
}

#[test]
fn test_文件头截断() {
    let fst = sample_fst();
    let io = IoContext::from_memory(fst[..12].to_vec());
    assert!(matches!(
        Container::open_format(FormatId::Fst, io),
        Err(LaoError::Truncated { .. })
    ));
}

#[test]
fn test_块长度损坏返回_malformed_之后安全() {
    let mut data = build_vqa(&[iff_chunk(b"VQFR", &[0; 4]), iff_chunk(b"VQFR", &[0; 4])]);
    let n = data.len();
    // 第二个 VQFR 的长度改成远超 FORM 的值
    data[n - 8..n - 4].copy_from_slice(&0x4000_0000u32.to_be_bytes());
    let mut container = lao::open_container(data).unwrap();
    assert!(container.next_sample().is_ok());
    assert!(matches!(
        container.next_sample(),
        Err(LaoError::Malformed(_))
    ));
    for _ in 0..3 {
        assert!(matches!(container.next_sample(), Err(LaoError::Eof)));
    }
}

#[test]
fn test_fst_帧数超出文件() {
    let mut data = sample_fst();
    data[16..20].copy_from_slice(&0x00FF_FFFFu32.to_le_bytes());
    assert!(matches!(
        lao::open_container(data),
        Err(LaoError::Malformed(_))
    ));
}

#[test]
fn test_不认识的数据() {
    assert!(matches!(
        lao::open_container(vec![0x5A; 256]),
        Err(LaoError::NotThisFormat(_))
    ));
    assert!(matches!(
        lao::open_container(Vec::new()),
        Err(LaoError::NotThisFormat(_))
    ));
}

#[test]
fn test_任意截断都能结束() {
    for (format_id, data) in samples() {
        for len in 0..data.len() {
            let prefix = data[..len].to_vec();
            let mut container = match Container::open_format(format_id, IoContext::from_memory(prefix)) {
                Ok(c) => c,
                Err(
                    LaoError::NotThisFormat(_)
                    | LaoError::Truncated { .. }
                    | LaoError::Malformed(_)
                    | LaoError::Unsupported(_),
                ) => continue,
                Err(e) => panic!("{format_id} 截断到 {len} 字节时打开出现意外错误: {e}"),
            };
            let mut calls = 0;
            loop {
                calls += 1;
                assert!(calls < 1000, "{format_id} 截断到 {len} 字节时没有结束");
                match container.next_sample() {
                    Ok(_) | Err(LaoError::Malformed(_)) => {}
                    Err(LaoError::Eof | LaoError::Truncated { .. }) => break,
                    Err(e) => panic!("{format_id} 截断到 {len} 字节时出现意外错误: {e}"),
                }
            }
        }
    }
}
