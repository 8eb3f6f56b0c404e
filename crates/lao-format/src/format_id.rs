//! 容器格式标识符.

use std::fmt;

/// 容器格式标识符
///
/// 标识一种老游戏视频容器, 顺序即探测时的优先顺序 (强签名在前).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum FormatId {
    // ========================
    // 音视频容器
    // ========================
    /// id RoQ
    Roq,
    /// Westwood VQA
    Vqa,
    /// Cryo HNM4
    Hnm,
    /// Interplay MVE
    Mve,
    /// Origin FST
    Fst,
    /// Sierra VMD
    Vmd,
    /// Delphine CIN
    Cin,

    // ========================
    // 纯音频容器
    // ========================
    /// Cryo APC
    Apc,
    /// Westwood AUD
    WsAud,

    // ========================
    // 裸码流
    // ========================
    /// H.263 风格窄带视频
    H263,
}

impl FormatId {
    /// 所有已知格式标识的列表
    pub const ALL: &[FormatId] = &[
        Self::Roq,
        Self::Vqa,
        Self::Hnm,
        Self::Mve,
        Self::Fst,
        Self::Vmd,
        Self::Cin,
        Self::Apc,
        Self::WsAud,
        Self::H263,
    ];

    /// 获取格式的人类可读名称
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Roq => "roq",
            Self::Vqa => "wsvqa",
            Self::Hnm => "hnm",
            Self::Mve => "ipmovie",
            Self::Fst => "fst",
            Self::Vmd => "vmd",
            Self::Cin => "dsicin",
            Self::Apc => "apc",
            Self::WsAud => "wsaud",
            Self::H263 => "h263",
        }
    }

    /// 获取格式常用的文件扩展名
    pub const fn extensions(&self) -> &'static [&'static str] {
        match self {
            Self::Roq => &["roq"],
            Self::Vqa => &["vqa"],
            Self::Hnm => &["hnm"],
            Self::Mve => &["mve"],
            Self::Fst => &["fst"],
            Self::Vmd => &["vmd"],
            Self::Cin => &["cin"],
            Self::Apc => &["apc"],
            Self::WsAud => &["aud"],
            Self::H263 => &["263", "h263"],
        }
    }

    /// 根据文件扩展名猜测格式
    ///
    /// # 参数
    /// - `ext`: 文件扩展名 (不含 `.`, 如 "roq", "vqa")
    pub fn from_extension(ext: &str) -> Option<FormatId> {
        let ext_lower = ext.to_lowercase();
        Self::ALL
            .iter()
            .find(|id| id.extensions().contains(&ext_lower.as_str()))
            .copied()
    }

    /// 从文件路径猜测格式
    pub fn from_filename(filename: &str) -> Option<FormatId> {
        let ext = filename.rsplit('.').next()?;
        Self::from_extension(ext)
    }

    /// 按名称查找 (命令行 `--format` 使用)
    pub fn from_name(name: &str) -> Option<FormatId> {
        Self::ALL
            .iter()
            .find(|id| id.name().eq_ignore_ascii_case(name))
            .copied()
    }
}

impl fmt::Display for FormatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_扩展名识别() {
        assert_eq!(FormatId::from_filename("intro.RoQ"), Some(FormatId::Roq));
        assert_eq!(FormatId::from_filename("/data/speech.aud"), Some(FormatId::WsAud));
        assert_eq!(FormatId::from_filename("clip.263"), Some(FormatId::H263));
        assert_eq!(FormatId::from_filename("movie.mp4"), None);
    }

    #[test]
    fn test_名称查找() {
        assert_eq!(FormatId::from_name("ipmovie"), Some(FormatId::Mve));
        assert_eq!(FormatId::from_name("VMD"), Some(FormatId::Vmd));
        assert_eq!(FormatId::from_name("mp4"), None);
    }
}
