//! 日志传输编解码
//!
//! 审计日志以 UTF-8 文本经 zlib 压缩后整体放入一条 `AuditReport`，
//! 在 JSON 中以 base64 字符串出现。不分块、不限制大小。

use std::fmt;
use std::io::{Read, Write};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, Result};

/// 压缩后的日志字节
#[derive(Clone, PartialEq, Eq)]
pub struct CompressedBytes(Vec<u8>);

impl CompressedBytes {
    pub fn from_vec(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

// 日志可能很大，Debug 只输出长度
impl fmt::Debug for CompressedBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CompressedBytes({} bytes)", self.0.len())
    }
}

impl Serialize for CompressedBytes {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(&self.0))
    }
}

impl<'de> Deserialize<'de> for CompressedBytes {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map(CompressedBytes)
            .map_err(serde::de::Error::custom)
    }
}

/// 压缩日志文本
pub fn encode(text: &str) -> Result<CompressedBytes> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(text.as_bytes())
        .map_err(|e| Error::Codec(format!("压缩失败: {}", e)))?;
    let bytes = encoder
        .finish()
        .map_err(|e| Error::Codec(format!("压缩失败: {}", e)))?;
    Ok(CompressedBytes(bytes))
}

/// 解压日志文本
pub fn decode(bytes: &CompressedBytes) -> Result<String> {
    let mut decoder = ZlibDecoder::new(bytes.as_bytes());
    let mut raw = Vec::new();
    decoder
        .read_to_end(&mut raw)
        .map_err(|e| Error::Codec(format!("解压失败: {}", e)))?;
    String::from_utf8(raw).map_err(|e| Error::Codec(format!("日志不是合法的 UTF-8: {}", e)))
}
