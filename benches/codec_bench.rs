//! lao 解码器性能基准测试.
//!
//! 覆盖 ADPCM/DPCM 音频展开, LCW 解压和 RoQ 矢量量化画面重建.

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use lao::codec::decoders::dpcm::RoqDpcmDecoder;
use lao::codec::decoders::ima::{ImaLayout, ImaState};
use lao::codec::decoders::roq::RoqState;
use lao::codec::decoders::vqa::lcw;
use lao::core::ChannelLayout;

/// 伪随机字节, 让码字分布接近真实数据
fn noise(len: usize) -> Vec<u8> {
    let mut x = 0x1234_5678u32;
    (0..len)
        .map(|_| {
            x ^= x << 13;
            x ^= x >> 17;
            x ^= x << 5;
            x as u8
        })
        .collect()
}

fn bench_ima_apc(c: &mut Criterion) {
    let data = noise(65536);
    c.bench_function("ima_apc_stereo_64k", |b| {
        b.iter(|| {
            let mut st = ImaState::new(ImaLayout::Apc, 22050, ChannelLayout::STEREO, [0, 0]);
            st.decode_payload(black_box(&data)).unwrap()
        });
    });
}

fn bench_ima_ws_planar(c: &mut Criterion) {
    let data = noise(65536);
    c.bench_function("ima_ws_planar_stereo_64k", |b| {
        b.iter(|| {
            let mut st =
                ImaState::new(ImaLayout::WestwoodPlanar, 22050, ChannelLayout::STEREO, [0, 0]);
            st.decode_payload(black_box(&data)).unwrap()
        });
    });
}

fn bench_roq_dpcm(c: &mut Criterion) {
    let data = noise(44102);
    c.bench_function("roq_dpcm_stereo_44k", |b| {
        b.iter(|| RoqDpcmDecoder::decode_payload(black_box(&data), 2).unwrap());
    });
}

fn bench_lcw(c: &mut Criterion) {
    // 交替的长填充与短直接复制, 以结束码收尾
    let mut src = Vec::new();
    for i in 0..250u16 {
        src.push(0xFE);
        src.extend_from_slice(&200u16.to_le_bytes());
        src.push(i as u8);
        src.push(0x80 | 56);
        src.extend(noise(56));
    }
    src.push(0x80);
    let mut dest = vec![0u8; 64000];
    c.bench_function("lcw_64000", |b| {
        b.iter(|| lcw::decompress(black_box(&src), &mut dest).unwrap());
    });
}

fn roq_chunk(id: u16, arg: u16, body: &[u8]) -> Vec<u8> {
    let mut v = id.to_le_bytes().to_vec();
    v.extend_from_slice(&(body.len() as u32).to_le_bytes());
    v.extend_from_slice(&arg.to_le_bytes());
    v.extend_from_slice(body);
    v
}

fn bench_roq_frame(c: &mut Criterion) {
    let (width, height) = (320usize, 240usize);
    let mut payload = roq_chunk(0x1002, 0x0101, &[120, 120, 120, 120, 100, 150, 0, 0, 0, 0]);
    let mut vq = Vec::new();
    // 全部 8x8 块用 SLD, 一个 u16 装 8 个块的编码
    for _ in 0..(width / 8) * (height / 8) / 8 {
        vq.extend_from_slice(&0xAAAAu16.to_le_bytes());
        vq.extend_from_slice(&[0; 8]);
    }
    payload.extend(roq_chunk(0x1011, 0, &vq));

    c.bench_function("roq_keyframe_320x240", |b| {
        b.iter(|| {
            let mut st = RoqState::new(width, height);
            st.decode_payload(black_box(&payload), true).unwrap()
        });
    });
}

criterion_group!(
    benches,
    bench_ima_apc,
    bench_ima_ws_planar,
    bench_roq_dpcm,
    bench_lcw,
    bench_roq_frame,
);
criterion_main!(benches);
