//! 容器格式注册表.
//!
//! 管理所有已注册的解封装器, 支持按格式标识查找和自动探测.

use std::collections::HashMap;

use lao_core::{LaoError, LaoResult};
use log::debug;

use crate::demuxer::Demuxer;
use crate::format_id::FormatId;
use crate::io::IoContext;
use crate::probe::{FormatProbe, ProbeOptions, ProbeResult};

/// 解封装器工厂函数类型
pub type DemuxerFactory = fn() -> LaoResult<Box<dyn Demuxer>>;

/// 容器格式注册表
pub struct FormatRegistry {
    /// 解封装器工厂映射
    demuxers: HashMap<FormatId, DemuxerEntry>,
    /// 格式探测器列表, 按注册顺序排列
    probes: Vec<Box<dyn FormatProbe + Send>>,
}

/// 解封装器注册条目
struct DemuxerEntry {
    /// 格式名称
    name: String,
    /// 工厂函数
    factory: DemuxerFactory,
}

impl FormatRegistry {
    /// 创建空的注册表
    pub fn new() -> Self {
        Self {
            demuxers: HashMap::new(),
            probes: Vec::new(),
        }
    }

    /// 注册一个解封装器
    pub fn register_demuxer(
        &mut self,
        format_id: FormatId,
        name: impl Into<String>,
        factory: DemuxerFactory,
    ) {
        self.demuxers.insert(
            format_id,
            DemuxerEntry {
                name: name.into(),
                factory,
            },
        );
    }

    /// 注册一个格式探测器
    pub fn register_probe(&mut self, probe: Box<dyn FormatProbe + Send>) {
        self.probes.push(probe);
    }

    /// 创建指定格式的解封装器实例
    pub fn create_demuxer(&self, format_id: FormatId) -> LaoResult<Box<dyn Demuxer>> {
        let entry = self.demuxers.get(&format_id).ok_or_else(|| {
            LaoError::FormatNotFound(format!("未找到 {format_id} 的解封装器"))
        })?;
        (entry.factory)()
    }

    /// 探测数据的容器格式
    ///
    /// 遍历所有已注册的探测器, 返回置信度最高的结果; 分数相同时先注册的胜出.
    pub fn probe(&self, data: &[u8], filename: Option<&str>) -> Option<ProbeResult> {
        self.rank(data, filename).into_iter().next()
    }

    /// 所有给出分数的格式, 按分数从高到低排列, 分数相同时保持注册顺序
    pub fn rank(&self, data: &[u8], filename: Option<&str>) -> Vec<ProbeResult> {
        let mut ranked: Vec<ProbeResult> = self
            .probes
            .iter()
            .filter_map(|probe| {
                probe.probe(data, filename).map(|score| ProbeResult {
                    format_id: probe.format_id(),
                    score,
                })
            })
            .collect();
        ranked.sort_by(|a, b| b.score.cmp(&a.score));
        ranked
    }

    /// 获取所有已注册的解封装器, 按格式优先顺序排列
    pub fn list_demuxers(&self) -> Vec<(FormatId, &str)> {
        FormatId::ALL
            .iter()
            .filter_map(|id| self.demuxers.get(id).map(|e| (*id, e.name.as_str())))
            .collect()
    }

    /// 探测输入格式 (不打开解封装器)
    ///
    /// 只预读文件头部, 读取位置保持不变.
    pub fn probe_input(
        &self,
        io: &mut IoContext,
        filename: Option<&str>,
        options: &ProbeOptions,
    ) -> LaoResult<ProbeResult> {
        let probe_buf = io.peek_bytes(options.probe_size)?;
        let result = self
            .probe(&probe_buf, filename)
            .ok_or_else(|| LaoError::FormatNotFound("无法识别输入文件格式".to_string()))?;
        debug!(
            "探测结果: {} (分数 {}, 读取 {} 字节)",
            result.format_id,
            result.score,
            probe_buf.len()
        );
        Ok(result)
    }

    /// 根据文件自动探测格式并创建解封装器
    ///
    /// 按探测分数依次创建解封装器并调用 `open()`; 候选格式报告 `NotThisFormat` 时换下一个.
    pub fn open_input(
        &self,
        io: &mut IoContext,
        filename: Option<&str>,
    ) -> LaoResult<Box<dyn Demuxer>> {
        let start = io.position();
        let head = io.peek_bytes(ProbeOptions::default().probe_size)?;
        let ranked = self.rank(&head, filename);
        if ranked.is_empty() {
            return Err(LaoError::FormatNotFound("无法识别输入文件格式".to_string()));
        }

        let mut last_err = None;
        for candidate in ranked {
            io.seek(start)?;
            let mut demuxer = self.create_demuxer(candidate.format_id)?;
            match demuxer.open(io) {
                Ok(()) => {
                    debug!("以 {} 打开 (探测分数 {})", candidate.format_id, candidate.score);
                    return Ok(demuxer);
                }
                Err(e @ LaoError::NotThisFormat(_)) => {
                    debug!("{} 不接受输入: {e}", candidate.format_id);
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err.unwrap_or_else(|| LaoError::FormatNotFound("无法识别输入文件格式".to_string())))
    }
}

impl Default for FormatRegistry {
    fn default() -> Self {
        Self::new()
    }
}
