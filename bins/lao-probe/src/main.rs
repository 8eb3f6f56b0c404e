//! lao-probe - 老游戏视频文件信息探测工具
//!
//! 输出容器格式、流信息, 可选地列出全部样本并把它们送进解码器.

use anyhow::{Context, Result, bail};
use clap::Parser;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;

use lao_codec::{CodecRegistry, Decoder, DecoderState, Frame, Packet};
use lao_core::{LaoError, MediaType};
use lao_format::container::rank_formats;
use lao_format::stream::{StreamParams, VideoStreamParams};
use lao_format::{Container, FormatId, IoContext, ProbeOptions, Stream};

/// 老游戏视频信息探测工具
#[derive(Parser, Debug)]
#[command(name = "lao-probe", version, about = "老游戏视频容器信息探测工具")]
struct Cli {
    /// 输入文件路径
    input: String,

    /// 指定容器格式 (例如 roq, wsvqa, hnm), 跳过探测
    #[arg(long)]
    format: Option<String>,

    /// 逐个列出数据包
    #[arg(long)]
    show_packets: bool,

    /// 把每个数据包送进对应的解码器并统计输出
    #[arg(long)]
    decode: bool,

    /// 输出 JSON 格式
    #[arg(long)]
    json: bool,

    /// 日志详细程度 (-v 为 debug, -vv 为 trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

// ============================================================
// 输出结构体
// ============================================================

#[derive(Serialize)]
struct ProbeOutput {
    format: FormatInfo,
    streams: Vec<StreamInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    packets: Option<Vec<PacketInfo>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<Vec<StreamSummary>>,
}

#[derive(Serialize)]
struct FormatInfo {
    filename: String,
    format_name: String,
    nb_streams: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    duration: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    probe_score: Option<u32>,
}

#[derive(Serialize)]
struct StreamInfo {
    index: usize,
    codec_type: &'static str,
    codec_name: String,
    time_base: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    height: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pixel_format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    frame_rate: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sample_rate: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    channels: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sample_format: Option<String>,
    nb_frames: u64,
    extradata_size: usize,
}

#[derive(Serialize)]
struct PacketInfo {
    stream_index: usize,
    pts: i64,
    duration: i64,
    size: usize,
    pos: i64,
    keyframe: bool,
}

/// 每条流的样本与解码统计
#[derive(Serialize, Default)]
struct StreamSummary {
    index: usize,
    packets: u64,
    bytes: u64,
    keyframes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    decoded_frames: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    decoded_samples: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    decode_errors: Option<u64>,
}

/// 一条流的解码器和状态
struct StreamDecoder {
    decoder: Box<dyn Decoder>,
    state: DecoderState,
}

// ============================================================
// 主逻辑
// ============================================================

fn main() {
    let cli = Cli::parse();
    init_logger(cli.verbose);
    if let Err(e) = run(&cli) {
        eprintln!("错误: {e:#}");
        std::process::exit(1);
    }
}

fn init_logger(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::new().filter_or("LAO_LOG", default)).init();
}

fn run(cli: &Cli) -> Result<()> {
    let file =
        File::open(&cli.input).with_context(|| format!("无法打开文件 '{}'", cli.input))?;
    let mut io = IoContext::from_reader(BufReader::new(file))?;

    let (mut container, probe_score) = match &cli.format {
        Some(name) => {
            let Some(format_id) = FormatId::from_name(name) else {
                bail!("未知格式: {name}");
            };
            (Container::open_format(format_id, io)?, None)
        }
        None => {
            let options = ProbeOptions::default();
            let head = io.peek_bytes(options.probe_size)?;
            let best = rank_formats(&head, Some(&cli.input)).first().map(|r| r.score);
            let container = Container::open_with(io, Some(&cli.input), &options)
                .context("无法识别文件格式")?;
            (container, best)
        }
    };

    let format = FormatInfo {
        filename: cli.input.clone(),
        format_name: container.format_id().name().to_string(),
        nb_streams: container.streams().len(),
        duration: container.duration(),
        probe_score,
    };
    let streams: Vec<StreamInfo> = container.streams().iter().map(build_stream_info).collect();

    let (packets, summary) = if cli.show_packets || cli.decode {
        let (packets, summary) = scan_packets(&mut container, cli.decode)?;
        (cli.show_packets.then_some(packets), Some(summary))
    } else {
        (None, None)
    };
    container.close();

    let output = ProbeOutput {
        format,
        streams,
        packets,
        summary,
    };
    if cli.json {
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        print_text(&output);
    }
    Ok(())
}

/// 读取全部样本, 按需解码
fn scan_packets(
    container: &mut Container,
    decode: bool,
) -> Result<(Vec<PacketInfo>, Vec<StreamSummary>)> {
    let mut summary: BTreeMap<usize, StreamSummary> = container
        .streams()
        .iter()
        .map(|s| {
            (
                s.index,
                StreamSummary {
                    index: s.index,
                    ..Default::default()
                },
            )
        })
        .collect();

    let mut decoders: BTreeMap<usize, StreamDecoder> = BTreeMap::new();
    if decode {
        let mut registry = CodecRegistry::new();
        lao_codec::register_all(&mut registry);
        for stream in container.streams() {
            if !registry.has_decoder(stream.codec_id) {
                log::warn!("流 #{}: 没有 {} 的解码器", stream.index, stream.codec_id);
                continue;
            }
            let decoder = registry.create_decoder(stream.codec_id)?;
            let state = decoder.create_state(&stream.codec_parameters())?;
            decoders.insert(stream.index, StreamDecoder { decoder, state });
        }
    }

    let mut packets = Vec::new();
    loop {
        let packet = match container.next_sample() {
            Ok(p) => p,
            Err(LaoError::Eof) => break,
            Err(e @ LaoError::Malformed(_)) => {
                log::warn!("跳过损坏的数据块: {e}");
                continue;
            }
            Err(e) => return Err(e.into()),
        };
        let entry = summary.entry(packet.stream_index).or_default();
        entry.index = packet.stream_index;
        entry.packets += 1;
        entry.bytes += packet.size() as u64;
        entry.keyframes += u64::from(packet.is_keyframe);

        if let Some(sd) = decoders.get_mut(&packet.stream_index) {
            decode_one(sd, &packet, entry);
        }
        packets.push(PacketInfo {
            stream_index: packet.stream_index,
            pts: packet.pts,
            duration: packet.duration,
            size: packet.size(),
            pos: packet.pos,
            keyframe: packet.is_keyframe,
        });
    }
    Ok((packets, summary.into_values().collect()))
}

fn decode_one(sd: &mut StreamDecoder, packet: &Packet, entry: &mut StreamSummary) {
    match sd.decoder.decode(&mut sd.state, packet) {
        Ok(Some(Frame::Audio(a))) => {
            *entry.decoded_frames.get_or_insert(0) += 1;
            *entry.decoded_samples.get_or_insert(0) += u64::from(a.nb_samples);
        }
        Ok(Some(Frame::Video(_))) => *entry.decoded_frames.get_or_insert(0) += 1,
        Ok(None) => {
            entry.decoded_frames.get_or_insert(0);
        }
        Err(e) => {
            log::warn!("流 #{} pts {} 解码失败: {e}", packet.stream_index, packet.pts);
            *entry.decode_errors.get_or_insert(0) += 1;
        }
    }
}

fn build_stream_info(stream: &Stream) -> StreamInfo {
    let mut info = StreamInfo {
        index: stream.index,
        codec_type: match stream.media_type {
            MediaType::Video => "video",
            MediaType::Audio => "audio",
        },
        codec_name: stream.codec_id.to_string(),
        time_base: stream.time_base.to_string(),
        width: None,
        height: None,
        pixel_format: None,
        frame_rate: None,
        sample_rate: None,
        channels: None,
        sample_format: None,
        nb_frames: stream.nb_frames,
        extradata_size: stream.extra_data.len(),
    };
    match &stream.params {
        StreamParams::Video(VideoStreamParams {
            width,
            height,
            pixel_format,
            frame_rate,
            ..
        }) => {
            info.width = Some(*width);
            info.height = Some(*height);
            info.pixel_format = Some(pixel_format.to_string());
            if frame_rate.is_valid() {
                info.frame_rate = Some(frame_rate.to_string());
            }
        }
        StreamParams::Audio(a) => {
            info.sample_rate = Some(a.sample_rate);
            info.channels = Some(a.channel_layout.channels);
            info.sample_format = Some(a.sample_format.to_string());
        }
    }
    info
}

fn print_text(output: &ProbeOutput) {
    let f = &output.format;
    println!("[FORMAT]");
    println!("  文件名       : {}", f.filename);
    println!("  格式名称     : {}", f.format_name);
    println!("  流数量       : {}", f.nb_streams);
    if let Some(dur) = f.duration {
        println!("  时长         : {dur:.3} 秒");
    }
    if let Some(score) = f.probe_score {
        println!("  探测置信度   : {score}");
    }
    println!("[/FORMAT]");

    for s in &output.streams {
        println!();
        println!("[STREAM #{}]", s.index);
        println!("  类型         : {}", s.codec_type);
        println!("  编解码器     : {}", s.codec_name);
        println!("  时钟         : {}", s.time_base);
        if let (Some(w), Some(h)) = (s.width, s.height) {
            println!("  分辨率       : {w}x{h}");
        }
        if let Some(ref pf) = s.pixel_format {
            println!("  像素格式     : {pf}");
        }
        if let Some(ref fr) = s.frame_rate {
            println!("  帧率         : {fr}");
        }
        if let Some(sr) = s.sample_rate {
            println!("  采样率       : {sr} Hz");
        }
        if let Some(ch) = s.channels {
            println!("  声道数       : {ch}");
        }
        if let Some(ref sf) = s.sample_format {
            println!("  采样格式     : {sf}");
        }
        if s.nb_frames > 0 {
            println!("  帧数         : {}", s.nb_frames);
        }
        if s.extradata_size > 0 {
            println!("  附加数据     : {} 字节", s.extradata_size);
        }
        println!("[/STREAM]");
    }

    if let Some(ref packets) = output.packets {
        println!();
        for p in packets {
            println!(
                "packet stream={} pts={} dur={} size={} pos={}{}",
                p.stream_index,
                p.pts,
                p.duration,
                p.size,
                p.pos,
                if p.keyframe { " K" } else { "" }
            );
        }
    }

    if let Some(ref summary) = output.summary {
        println!();
        println!("[PACKETS]");
        for s in summary {
            print!(
                "  #{}: {} 个包, {} 字节, {} 个关键包",
                s.index, s.packets, s.bytes, s.keyframes
            );
            if let Some(frames) = s.decoded_frames {
                print!(", 解码 {frames} 帧");
            }
            if let Some(samples) = s.decoded_samples {
                print!(" ({samples} 个采样)");
            }
            if let Some(errors) = s.decode_errors {
                print!(", {errors} 次解码失败");
            }
            println!();
        }
        println!("[/PACKETS]");
    }
}
