// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
// ONNX Runtime 描述模型
//
// 一个 .onnx 文件包含特征网络 + 序列网络, 输入 NCHW 图像, 输出 token 序列

use std::fs;
use std::path::{Path, PathBuf};

use image::RgbImage;
use ort::execution_providers::{CPUExecutionProvider, CUDAExecutionProvider};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::tensor::TensorElementType;
use ort::value::{DynValue, Tensor, ValueType};

use super::preprocess;
use super::{decode_sequence, CaptionConfig, CaptionError, Captioner, Vocabulary};

/// 模型元数据中的词表键
const VOCAB_METADATA_KEY: &str = "vocab";

/// 模型声明的标量输入
struct ScalarInput {
    name: String,
    ty: TensorElementType,
    value: f64,
}

pub struct OnnxCaptioner {
    session: Session,
    vocab: Vocabulary,
    config: CaptionConfig,
    image_input: String,
    input_size: u32,
    options: Vec<ScalarInput>,
}

impl OnnxCaptioner {
    /// 加载模型与词表
    pub fn load(path: &Path, config: CaptionConfig) -> Result<Self, CaptionError> {
        if !path.is_file() {
            return Err(CaptionError::ModelNotFound(path.to_path_buf()));
        }

        let provider = if config.cuda {
            CUDAExecutionProvider::default()
                .with_device_id(config.device_id)
                .build()
        } else {
            CPUExecutionProvider::default().build()
        };

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_execution_providers([provider])?
            .commit_from_file(path)?;

        let vocab = load_vocabulary(&session, path, config.vocab_path.as_deref())?;

        // 图像输入: 第一个 4 维张量输入
        let (image_input, declared_size) = session
            .inputs
            .iter()
            .find_map(|input| match &input.input_type {
                ValueType::Tensor { dimensions, .. } if dimensions.len() == 4 => {
                    Some((input.name.clone(), dimensions[2]))
                }
                _ => None,
            })
            .ok_or_else(|| CaptionError::Output("model has no NCHW image input".into()))?;
        let input_size = if declared_size > 0 {
            declared_size as u32
        } else {
            config.input_size
        };

        let options = session
            .inputs
            .iter()
            .filter_map(|input| {
                let ValueType::Tensor { ty, .. } = &input.input_type else {
                    return None;
                };
                let value = match input.name.as_str() {
                    "sample_max" => config.sample_max as i64 as f64,
                    "beam_size" => config.beam_size as f64,
                    "temperature" => config.temperature as f64,
                    _ => return None,
                };
                Some(ScalarInput {
                    name: input.name.clone(),
                    ty: *ty,
                    value,
                })
            })
            .collect::<Vec<_>>();

        log::info!(
            "✅ 描述模型已加载: {} (输入 {}x{}, 词表 {} 词, 采样参数 {:?})",
            path.display(),
            input_size,
            input_size,
            vocab.len(),
            options.iter().map(|o| o.name.as_str()).collect::<Vec<_>>()
        );

        Ok(Self {
            session,
            vocab,
            config,
            image_input,
            input_size,
            options,
        })
    }

    pub fn vocabulary(&self) -> &Vocabulary {
        &self.vocab
    }

    fn end_token(&self) -> i64 {
        self.config.end_token.unwrap_or_else(|| self.vocab.end_token())
    }
}

impl Captioner for OnnxCaptioner {
    fn caption(&mut self, image: &RgbImage) -> Result<String, CaptionError> {
        let xs = preprocess::prepare(
            image,
            self.input_size,
            self.config.mean_bgr,
            self.config.channel_order,
        )?;

        let mut inputs: Vec<(String, DynValue)> = Vec::with_capacity(1 + self.options.len());
        inputs.push((
            self.image_input.clone(),
            Tensor::from_array(xs.into_dyn())?.into_dyn(),
        ));
        for option in &self.options {
            inputs.push((option.name.clone(), scalar_value(option.ty, option.value)?));
        }

        let outputs = self.session.run(inputs)?;
        let tokens = extract_tokens(&outputs[0])?;
        decode_sequence(&tokens, &self.vocab, self.end_token(), self.config.max_tokens)
    }
}

/// 按模型声明的类型构造 [1] 形状的标量张量
fn scalar_value(ty: TensorElementType, value: f64) -> Result<DynValue, CaptionError> {
    let shape = ndarray::IxDyn(&[1]);
    let v = match ty {
        TensorElementType::Bool => {
            Tensor::from_array(ndarray::Array::from_elem(shape, value != 0.0))?.into_dyn()
        }
        TensorElementType::Int64 => {
            Tensor::from_array(ndarray::Array::from_elem(shape, value as i64))?.into_dyn()
        }
        TensorElementType::Int32 => {
            Tensor::from_array(ndarray::Array::from_elem(shape, value as i32))?.into_dyn()
        }
        TensorElementType::Float32 => {
            Tensor::from_array(ndarray::Array::from_elem(shape, value as f32))?.into_dyn()
        }
        other => {
            return Err(CaptionError::Output(format!(
                "unsupported option input type {other:?}"
            )))
        }
    };
    Ok(v)
}

/// 输出张量 → token id (支持 int64 / int32 / float)
fn extract_tokens(output: &DynValue) -> Result<Vec<i64>, CaptionError> {
    if let Ok(view) = output.try_extract_tensor::<i64>() {
        return Ok(view.iter().copied().collect());
    }
    if let Ok(view) = output.try_extract_tensor::<i32>() {
        return Ok(view.iter().map(|&t| t as i64).collect());
    }
    let view = output
        .try_extract_tensor::<f32>()
        .map_err(|e| CaptionError::Output(e.to_string()))?;
    Ok(view.iter().map(|&t| t.round() as i64).collect())
}

/// 词表来源: 配置文件路径 > 模型元数据 > 同名 .vocab.json
fn load_vocabulary(
    session: &Session,
    model_path: &Path,
    explicit: Option<&Path>,
) -> Result<Vocabulary, CaptionError> {
    if let Some(path) = explicit {
        return read_vocabulary_file(path);
    }

    let embedded = session
        .metadata()
        .and_then(|meta| meta.custom(VOCAB_METADATA_KEY))
        .unwrap_or_else(|e| {
            log::warn!("⚠️ 读取模型元数据失败: {}", e);
            None
        });
    if let Some(json) = embedded {
        return Vocabulary::from_json(&json);
    }

    read_vocabulary_file(&sidecar_vocab_path(model_path))
}

/// `models/caption.onnx` → `models/caption.vocab.json`
pub fn sidecar_vocab_path(model_path: &Path) -> PathBuf {
    model_path.with_extension("vocab.json")
}

pub fn read_vocabulary_file(path: &Path) -> Result<Vocabulary, CaptionError> {
    let json = fs::read_to_string(path)
        .map_err(|e| CaptionError::Vocabulary(format!("{}: {}", path.display(), e)))?;
    Vocabulary::from_json(&json)
}
