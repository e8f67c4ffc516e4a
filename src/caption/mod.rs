// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 图像描述 (Image Captioning)
//!
//! - `preprocess`: 裁剪 / 缩放 / 去均值 → NCHW 张量
//! - `onnx`: ONNX Runtime 推理 + 词表解码
//! - `worker`: 后台描述线程, 固定节拍读取最新任务

pub mod onnx;
pub mod preprocess;
pub mod worker;

pub use onnx::OnnxCaptioner;
pub use worker::{CaptionHandle, CaptionWorker, CaptureJob};

use std::collections::HashMap;
use std::path::PathBuf;

use image::RgbImage;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CaptionError {
    #[error("caption model not found: {0}")]
    ModelNotFound(PathBuf),
    #[error("vocabulary unavailable: {0}")]
    Vocabulary(String),
    #[error("unknown token id {0}")]
    UnknownToken(i64),
    #[error("capture region is empty")]
    EmptyRegion,
    #[error("preprocess failed: {0}")]
    Preprocess(String),
    #[error("model output not understood: {0}")]
    Output(String),
    #[error("captioner panicked: {0}")]
    Panicked(String),
    #[error("caption worker stopped")]
    WorkerStopped,
    #[error("onnx runtime: {0}")]
    Runtime(#[from] ort::Error),
}

/// 输入张量的通道顺序
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelOrder {
    Rgb,
    Bgr,
}

/// 描述模型参数
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptionConfig {
    pub interval_ms: u64,       // 描述线程节拍
    pub words_per_line: usize,  // 每行单词数
    pub input_size: u32,        // 模型输入边长 (模型声明固定尺寸时以模型为准)
    pub mean_bgr: [f32; 3],     // VGG 均值 (B, G, R)
    pub channel_order: ChannelOrder,
    pub max_tokens: usize,      // 最长输出
    pub end_token: Option<i64>, // 结束符, 缺省为 词表大小+1
    pub sample_max: bool,
    pub beam_size: i64,
    pub temperature: f32,
    pub cuda: bool,
    pub device_id: i32,
    pub vocab_path: Option<PathBuf>, // 词表文件, 缺省读取模型元数据
}

impl Default for CaptionConfig {
    fn default() -> Self {
        Self {
            interval_ms: 500,
            words_per_line: 5,
            input_size: 224,
            mean_bgr: [103.939, 116.779, 123.68],
            channel_order: ChannelOrder::Rgb,
            max_tokens: 16,
            end_token: None,
            sample_max: true,
            beam_size: 2,
            temperature: 1.0,
            cuda: false,
            device_id: 0,
            vocab_path: None,
        }
    }
}

/// 描述结果快照 (只读)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaptionText {
    pub generation: u64, // 对应的目标集合版本
    pub lines: Vec<String>,
}

impl CaptionText {
    pub fn new(generation: u64, text: &str, words_per_line: usize) -> Self {
        Self {
            generation,
            lines: wrap_words(text, words_per_line),
        }
    }

    pub fn empty(generation: u64) -> Self {
        Self {
            generation,
            lines: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn text(&self) -> String {
        self.lines.join(" ")
    }
}

/// 描述模型 Trait
pub trait Captioner: Send {
    /// 对裁剪后的区域生成一句描述
    fn caption(&mut self, image: &RgbImage) -> Result<String, CaptionError>;
}

/// 按固定单词数折行
pub fn wrap_words(text: &str, words_per_line: usize) -> Vec<String> {
    let words: Vec<&str> = text.split_whitespace().collect();
    words
        .chunks(words_per_line.max(1))
        .map(|chunk| chunk.join(" "))
        .collect()
}

/// 词表: token id → 单词
#[derive(Debug, Clone, Default)]
pub struct Vocabulary {
    words: HashMap<i64, String>,
}

impl Vocabulary {
    /// 解析 `{"1": "a", "2": "man", ...}`
    pub fn from_json(json: &str) -> Result<Self, CaptionError> {
        let raw: HashMap<String, String> =
            serde_json::from_str(json).map_err(|e| CaptionError::Vocabulary(e.to_string()))?;
        let words = raw
            .into_iter()
            .map(|(k, v)| {
                k.trim()
                    .parse::<i64>()
                    .map(|id| (id, v))
                    .map_err(|_| CaptionError::Vocabulary(format!("bad token id '{k}'")))
            })
            .collect::<Result<HashMap<_, _>, _>>()?;
        if words.is_empty() {
            return Err(CaptionError::Vocabulary("empty vocabulary".into()));
        }
        Ok(Self { words })
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn word(&self, id: i64) -> Option<&str> {
        self.words.get(&id).map(String::as_str)
    }

    /// 默认结束符: 词表大小 + 1
    pub fn end_token(&self) -> i64 {
        self.words.len() as i64 + 1
    }
}

/// token 序列 → 句子, 遇到 0 或结束符停止, 最多 max_tokens 个
///
/// 出现词表外的 token 时整句作废
pub fn decode_sequence(
    tokens: &[i64],
    vocab: &Vocabulary,
    end_token: i64,
    max_tokens: usize,
) -> Result<String, CaptionError> {
    let mut words = Vec::new();
    for &token in tokens.iter().take(max_tokens) {
        if token == 0 || token == end_token {
            break;
        }
        let word = vocab.word(token).ok_or(CaptionError::UnknownToken(token))?;
        words.push(word);
    }
    Ok(words.join(" "))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vocab() -> Vocabulary {
        Vocabulary::from_json(r#"{"1": "a", "2": "man", "3": "riding", "4": "horse"}"#).unwrap()
    }

    #[test]
    fn wrap_produces_ceil_lines_and_keeps_words() {
        let words: Vec<String> = (0..23).map(|i| format!("w{i}")).collect();
        let text = words.join(" ");
        for n in 0..=words.len() {
            let partial = words[..n].join(" ");
            let lines = wrap_words(&partial, 5);
            assert_eq!(lines.len(), n.div_ceil(5));
            assert!(lines.iter().all(|l| l.split(' ').count() <= 5));
            assert_eq!(lines.join(" "), partial);
        }
        assert_eq!(wrap_words(&text, 5)[4], "w20 w21 w22");
    }

    #[test]
    fn wrap_collapses_whitespace() {
        assert_eq!(
            wrap_words("  a  man\triding a\nhorse on the beach ", 5),
            vec!["a man riding a horse", "on the beach"]
        );
        assert!(wrap_words("   ", 5).is_empty());
    }

    #[test]
    fn decode_stops_at_zero_or_end() {
        let v = vocab();
        assert_eq!(v.end_token(), 5);
        assert_eq!(
            decode_sequence(&[1, 2, 3, 1, 4, 0, 2], &v, 5, 16).unwrap(),
            "a man riding a horse"
        );
        assert_eq!(decode_sequence(&[2, 5, 3], &v, 5, 16).unwrap(), "man");
        assert_eq!(decode_sequence(&[0], &v, 5, 16).unwrap(), "");
    }

    #[test]
    fn decode_respects_max_tokens() {
        let v = vocab();
        let tokens = vec![2; 40];
        let text = decode_sequence(&tokens, &v, 5, 16).unwrap();
        assert_eq!(text.split(' ').count(), 16);
    }

    #[test]
    fn unknown_token_is_an_error() {
        let v = vocab();
        assert!(matches!(
            decode_sequence(&[1, 42], &v, 5, 16),
            Err(CaptionError::UnknownToken(42))
        ));
    }

    #[test]
    fn vocabulary_rejects_bad_json() {
        assert!(Vocabulary::from_json("[]").is_err());
        assert!(Vocabulary::from_json(r#"{"x": "a"}"#).is_err());
        assert!(Vocabulary::from_json("{}").is_err());
    }

    #[test]
    fn caption_text_wraps() {
        let text = CaptionText::new(3, "a man riding a horse on the beach", 5);
        assert_eq!(text.generation, 3);
        assert_eq!(text.lines.len(), 2);
        assert_eq!(text.text(), "a man riding a horse on the beach");
        assert!(CaptionText::empty(3).is_empty());
    }
}
