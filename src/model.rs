// 该文件是 Chesun （车损巡检） 项目的一部分。
// src/model.rs - 模型
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

use std::{path::Path, sync::Arc};

use ndarray::{Array3, Array4};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::frame::InputTensor;

pub mod decode;
pub mod nms;
pub mod preprocess;

#[cfg(feature = "model_onnx")]
mod onnx;
#[cfg(feature = "model_onnx")]
pub use self::onnx::{FromOnnxOutputs, OnnxModel, OnnxModelBuilder, OnnxModelError};

/// 推理后端
///
/// 推理可能在加速器上执行，调用方必须在此处 await。
#[allow(async_fn_in_trait)]
pub trait Model {
  type Output;
  type Error;

  /// 模型输入尺寸 (宽, 高)
  fn input_size(&self) -> (u32, u32);

  async fn infer(&self, input: &InputTensor) -> Result<Self::Output, Self::Error>;
}

/// 分割模型输出
#[derive(Debug, Clone)]
pub struct DamageModelOutput {
  /// [1, N, 4 + 类别数 + 掩码通道数]
  pub head: Array3<f32>,
  /// [1, segH, segW, 掩码通道数]
  pub protos: Array4<f32>,
}

/// 检测模型输出
#[derive(Debug, Clone)]
pub struct PartsModelOutput {
  /// [1, M, 4 + 类别数]
  pub head: Array3<f32>,
}

/// 角点形式的边界框，模型输入像素坐标
///
/// 原始解码结果可能出现 `x2 < x1` 或 `y2 < y1`，此时面积按 0 计。
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BBox {
  pub y1: f32,
  pub x1: f32,
  pub y2: f32,
  pub x2: f32,
}

impl BBox {
  pub fn new(y1: f32, x1: f32, y2: f32, x2: f32) -> Self {
    Self { y1, x1, y2, x2 }
  }

  /// 由中心点与宽高构造
  pub fn from_center(cx: f32, cy: f32, w: f32, h: f32) -> Self {
    let x1 = cx - w / 2.0;
    let y1 = cy - h / 2.0;
    Self {
      y1,
      x1,
      y2: y1 + h,
      x2: x1 + w,
    }
  }

  pub fn width(&self) -> f32 {
    self.x2 - self.x1
  }

  pub fn height(&self) -> f32 {
    self.y2 - self.y1
  }

  pub fn is_degenerate(&self) -> bool {
    !(self.width() > 0.0 && self.height() > 0.0)
  }

  pub fn area(&self) -> f32 {
    if self.is_degenerate() {
      0.0
    } else {
      self.width() * self.height()
    }
  }

  /// 闭区间包含判断
  pub fn contains(&self, x: f32, y: f32) -> bool {
    x >= self.x1 && x <= self.x2 && y >= self.y1 && y <= self.y2
  }

  pub fn iou(&self, other: &BBox) -> f32 {
    let area_a = self.area();
    let area_b = other.area();
    if area_a <= 0.0 || area_b <= 0.0 {
      return 0.0;
    }

    let x1 = self.x1.max(other.x1);
    let y1 = self.y1.max(other.y1);
    let x2 = self.x2.min(other.x2);
    let y2 = self.y2.min(other.y2);

    let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let union = area_a + area_b - intersection;

    if union > 0.0 {
      intersection / union
    } else {
      0.0
    }
  }

  pub fn scale(&self, x_scale: f32, y_scale: f32) -> BBox {
    BBox {
      y1: self.y1 * y_scale,
      x1: self.x1 * x_scale,
      y2: self.y2 * y_scale,
      x2: self.x2 * x_scale,
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectItem {
  pub class_id: u32,
  pub label: String,
  pub score: f32,
  pub bbox: BBox,
}

#[derive(Debug, Clone, Default)]
pub struct DetectResult {
  pub items: Box<[DetectItem]>,
}

impl DetectResult {
  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  pub fn len(&self) -> usize {
    self.items.len()
  }

  pub fn iter(&self) -> std::slice::Iter<'_, DetectItem> {
    self.items.iter()
  }
}

impl From<Vec<DetectItem>> for DetectResult {
  fn from(items: Vec<DetectItem>) -> Self {
    Self {
      items: items.into_boxed_slice(),
    }
  }
}

#[derive(Error, Debug)]
pub enum LabelError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("标签文件解析错误: {0}")]
  ParseError(#[from] serde_json::Error),
  #[error("标签表为空")]
  Empty,
  #[error("第 {0} 个标签为空")]
  BlankName(usize),
}

/// 按类别索引排列的标签名
#[derive(Debug, Clone)]
pub struct LabelTable {
  names: Arc<[String]>,
}

impl LabelTable {
  pub fn new(names: Vec<String>) -> Result<Self, LabelError> {
    if names.is_empty() {
      return Err(LabelError::Empty);
    }
    if let Some(idx) = names.iter().position(|name| name.trim().is_empty()) {
      return Err(LabelError::BlankName(idx));
    }
    Ok(Self {
      names: names.into(),
    })
  }

  /// 从 JSON 数组解析，例如 `["hood", "front_bumper"]`
  pub fn from_json_str(text: &str) -> Result<Self, LabelError> {
    let names: Vec<String> = serde_json::from_str(text)?;
    Self::new(names)
  }

  pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, LabelError> {
    let text = std::fs::read_to_string(path)?;
    Self::from_json_str(&text)
  }

  pub fn len(&self) -> usize {
    self.names.len()
  }

  pub fn is_empty(&self) -> bool {
    self.names.is_empty()
  }

  pub fn name(&self, class_id: u32) -> &str {
    self
      .names
      .get(class_id as usize)
      .map(String::as_str)
      .unwrap_or("unknown")
  }

  pub fn names(&self) -> &[String] {
    &self.names
  }
}
