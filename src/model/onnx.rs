// 该文件是 Chesun （车损巡检） 项目的一部分。
// src/model/onnx.rs - ONNX Runtime 推理后端
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::{marker::PhantomData, sync::Mutex};

use ndarray::{Array3, Array4, ArrayD, Ix3, Ix4};
use ort::{
  session::{Session, builder::GraphOptimizationLevel},
  value::Tensor,
};
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::InputTensor,
  model::{DamageModelOutput, Model, PartsModelOutput},
};

const ONNX_DEFAULT_INPUT_SIZE: u32 = 640;

#[derive(Error, Debug)]
pub enum OnnxModelError {
  #[error("ONNX Runtime 错误: {0}")]
  OrtError(#[from] ort::Error),
  #[error("模型路径错误: {0}")]
  ModelPathError(String),
  #[error("模型输出无效: {0}")]
  OutputInvalid(String),
  #[error("张量形状错误: {0}")]
  ShapeError(#[from] ndarray::ShapeError),
  #[error("推理会话锁已损坏")]
  SessionPoisoned,
}

/// 把原始输出张量整理成流水线使用的布局
pub trait FromOnnxOutputs: Sized {
  fn from_outputs(outputs: Vec<ArrayD<f32>>) -> Result<Self, OnnxModelError>;
}

/// YOLOv8 检测头 [1, C, N] -> [1, N, C]
fn transpose_head(raw: ArrayD<f32>) -> Result<Array3<f32>, OnnxModelError> {
  let head = raw.into_dimensionality::<Ix3>()?;
  Ok(head.permuted_axes([0, 2, 1]).as_standard_layout().into_owned())
}

impl FromOnnxOutputs for DamageModelOutput {
  fn from_outputs(outputs: Vec<ArrayD<f32>>) -> Result<Self, OnnxModelError> {
    let mut head = None;
    let mut protos = None;
    for output in outputs {
      match output.ndim() {
        3 if head.is_none() => head = Some(transpose_head(output)?),
        // [1, mc, h, w] -> [1, h, w, mc]
        4 if protos.is_none() => {
          let raw: Array4<f32> = output.into_dimensionality::<Ix4>()?;
          protos = Some(raw.permuted_axes([0, 2, 3, 1]).as_standard_layout().into_owned());
        }
        ndim => debug!("忽略 {} 维输出", ndim),
      }
    }

    match (head, protos) {
      (Some(head), Some(protos)) => Ok(DamageModelOutput { head, protos }),
      _ => Err(OnnxModelError::OutputInvalid(
        "分割模型需要一个三维检测头和一个四维原型掩码".to_string(),
      )),
    }
  }
}

impl FromOnnxOutputs for PartsModelOutput {
  fn from_outputs(outputs: Vec<ArrayD<f32>>) -> Result<Self, OnnxModelError> {
    let raw = outputs
      .into_iter()
      .find(|output| output.ndim() == 3)
      .ok_or_else(|| OnnxModelError::OutputInvalid("检测模型缺少三维检测头".to_string()))?;
    Ok(PartsModelOutput {
      head: transpose_head(raw)?,
    })
  }
}

pub struct OnnxModelBuilder {
  model_path: String,
  input_size: u32,
  threads: Option<usize>,
}

impl FromUrlWithScheme for OnnxModelBuilder {
  const SCHEME: &'static str = "onnx";
}

impl FromUrl for OnnxModelBuilder {
  type Error = OnnxModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(OnnxModelError::ModelPathError(format!(
        "模型路径必须使用 {} 方案",
        Self::SCHEME
      )));
    }

    let mut builder = OnnxModelBuilder {
      model_path: crate::decoded_path(url)
        .map_err(|e| OnnxModelError::ModelPathError(e.to_string()))?,
      input_size: ONNX_DEFAULT_INPUT_SIZE,
      threads: None,
    };

    for (key, value) in url.query_pairs() {
      match key.as_ref() {
        "size" => {
          builder.input_size = value
            .parse()
            .map_err(|_| OnnxModelError::ModelPathError(format!("无效的输入尺寸: {}", value)))?;
        }
        "threads" => {
          builder.threads = Some(
            value
              .parse()
              .map_err(|_| OnnxModelError::ModelPathError(format!("无效的线程数: {}", value)))?,
          );
        }
        _ => debug!("忽略模型参数: {}={}", key, value),
      }
    }

    Ok(builder)
  }
}

impl OnnxModelBuilder {
  pub fn input_size(mut self, input_size: u32) -> Self {
    self.input_size = input_size;
    self
  }

  pub fn build<O>(self) -> Result<OnnxModel<O>, OnnxModelError> {
    info!("加载模型文件: {}", self.model_path);
    let mut builder = Session::builder()?.with_optimization_level(GraphOptimizationLevel::Level3)?;
    if let Some(threads) = self.threads {
      builder = builder.with_intra_threads(threads)?;
    }
    let session = builder.commit_from_file(&self.model_path)?;
    info!("模型加载完成，输入尺寸 {0}x{0}", self.input_size);

    Ok(OnnxModel {
      session: Mutex::new(session),
      input_size: self.input_size,
      _phantom: PhantomData,
    })
  }
}

pub struct OnnxModel<O> {
  session: Mutex<Session>,
  input_size: u32,
  _phantom: PhantomData<O>,
}

impl<O: FromOnnxOutputs> Model for OnnxModel<O> {
  type Output = O;
  type Error = OnnxModelError;

  fn input_size(&self) -> (u32, u32) {
    (self.input_size, self.input_size)
  }

  async fn infer(&self, input: &InputTensor) -> Result<Self::Output, Self::Error> {
    debug!("设置模型输入");
    let tensor = Tensor::from_array(input.to_nchw())?;

    let arrays = {
      let mut session = self
        .session
        .lock()
        .map_err(|_| OnnxModelError::SessionPoisoned)?;
      let names: Vec<String> = session.outputs.iter().map(|o| o.name.clone()).collect();
      debug!("执行模型推理");
      let outputs = session.run(ort::inputs![tensor])?;
      let mut arrays = Vec::with_capacity(names.len());
      for name in &names {
        arrays.push(outputs[name.as_str()].try_extract_array::<f32>()?.into_owned());
      }
      arrays
    };

    debug!("获取模型输出: {} 个张量", arrays.len());
    O::from_outputs(arrays)
  }
}
