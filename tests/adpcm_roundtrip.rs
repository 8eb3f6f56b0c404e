//! IMA ADPCM 往返测试.
//!
//! 测试内实现一个贪心编码器: 每个采样在 16 个码字里选误差最小的一个,
//! 编码结果包装成 APC 文件, 再经过探测, 解封装, 解码完整走一遍.

use lao::codec::Frame;
use lao::codec::decoders::ima::ImaChannel;
use lao::core::LaoError;
use lao::format::FormatId;

const SAMPLE_RATE: u32 = 22050;

/// 选出使下一个输出最接近目标的码字
fn encode_sample(channel: &mut ImaChannel, target: i16) -> u8 {
    let mut best = (0u8, i32::MAX);
    for nibble in 0..16u8 {
        let mut trial = *channel;
        let err = (i32::from(trial.expand_nibble(nibble)) - i32::from(target)).abs();
        if err < best.1 {
            best = (nibble, err);
        }
    }
    channel.expand_nibble(best.0);
    best.0
}

/// 单声道 APC 编码: 高半字节在前
fn encode_apc_mono(samples: &[i16]) -> Vec<u8> {
    let mut channel = ImaChannel::default();
    samples
        .chunks(2)
        .map(|pair| {
            let hi = encode_sample(&mut channel, pair[0]);
            let lo = pair.get(1).map_or(0, |&s| encode_sample(&mut channel, s));
            (hi << 4) | lo
        })
        .collect()
}

fn apc_file(samples: &[i16]) -> Vec<u8> {
    let mut data = b"CRYO_APC1.20".to_vec();
    for v in [samples.len() as u32, SAMPLE_RATE, 0, 0, 0] {
        data.extend_from_slice(&v.to_le_bytes());
    }
    data.extend(encode_apc_mono(samples));
    data
}

/// 打开 APC 数据并解码全部样本
fn decode_all(data: Vec<u8>) -> Vec<i16> {
    let mut container = lao::open_container(data).unwrap();
    assert_eq!(container.format_id(), FormatId::Apc);
    let stream = container.streams()[0].clone();
    let codecs = lao::default_codec_registry();
    let decoder = codecs.create_decoder(stream.codec_id).unwrap();
    let mut state = decoder.create_state(&stream.codec_parameters()).unwrap();

    let mut out = Vec::new();
    loop {
        match container.next_sample() {
            Ok(packet) => {
                let Some(Frame::Audio(frame)) = decoder.decode(&mut state, &packet).unwrap()
                else {
                    panic!("期望音频帧");
                };
                out.extend(frame.samples_s16().unwrap());
            }
            Err(LaoError::Eof) => return out,
            Err(e) => panic!("意外错误: {e}"),
        }
    }
}

fn tone(len: usize, freq: f64, amplitude: f64) -> Vec<i16> {
    (0..len)
        .map(|i| {
            let t = i as f64 / f64::from(SAMPLE_RATE);
            (amplitude * (2.0 * std::f64::consts::PI * freq * t).sin()).round() as i16
        })
        .collect()
}

#[test]
fn test_静音往返() {
    let silence = vec![0i16; 10_000];
    let decoded = decode_all(apc_file(&silence));
    assert_eq!(decoded.len(), silence.len());
    assert!(decoded.iter().all(|&s| s == 0));
}

#[test]
fn test_正弦波往返() {
    // 跨越多个 4096 字节的样本, 预测状态必须在样本之间延续
    let source = tone(20_000, 440.0, 8000.0);
    let decoded = decode_all(apc_file(&source));
    assert_eq!(decoded.len(), source.len());

    // 步长需要几十个采样才能追上信号
    let settled = &source[256..];
    let total: i64 = settled
        .iter()
        .zip(&decoded[256..])
        .map(|(&a, &b)| (i64::from(a) - i64::from(b)).abs())
        .sum();
    let mean = total / settled.len() as i64;
    assert!(mean < 500, "平均误差过大: {mean}");
}

#[test]
fn test_分段解码与整体解码一致() {
    let source = tone(4_000, 1000.0, 12000.0);
    let encoded = encode_apc_mono(&source);

    let codecs = lao::default_codec_registry();
    let decoder = codecs
        .create_decoder(lao::codec::CodecId::AdpcmImaApc)
        .unwrap();
    let params = {
        let container = lao::open_container(apc_file(&source)).unwrap();
        container.streams()[0].codec_parameters()
    };

    let mut whole_state = decoder.create_state(&params).unwrap();
    let whole = match decoder
        .decode(&mut whole_state, &lao::codec::Packet::key(encoded.clone()))
        .unwrap()
    {
        Some(Frame::Audio(f)) => f.samples_s16().unwrap(),
        _ => panic!("期望音频帧"),
    };

    let mut split_state = decoder.create_state(&params).unwrap();
    let mut split = Vec::new();
    for (i, part) in encoded.chunks(333).enumerate() {
        let packet = if i == 0 {
            lao::codec::Packet::key(part.to_vec())
        } else {
            lao::codec::Packet::from_data(part.to_vec())
        };
        match decoder.decode(&mut split_state, &packet).unwrap() {
            Some(Frame::Audio(f)) => split.extend(f.samples_s16().unwrap()),
            _ => panic!("期望音频帧"),
        }
    }
    assert_eq!(whole, split);
}
