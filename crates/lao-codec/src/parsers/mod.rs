//! 码流解析器.

pub mod h263;
