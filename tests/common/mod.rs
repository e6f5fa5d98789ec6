#![allow(dead_code)]

use std::cell::Cell;

use chesun::{
  frame::{InputTensor, RawFrame},
  model::{DamageModelOutput, LabelTable, Model, PartsModelOutput},
  pipeline::Detectors,
};
use image::{Rgb, RgbImage};
use ndarray::{Array3, Array4};

pub const MODEL_SIZE: u32 = 64;
pub const SEG_SIZE: usize = 16;

#[derive(Debug, thiserror::Error)]
#[error("模型故障")]
pub struct ModelFault;

/// 每次推理都返回同一份输出
pub struct FixedModel<O> {
  size: (u32, u32),
  output: O,
  calls: Cell<usize>,
}

impl<O> FixedModel<O> {
  pub fn new(output: O) -> Self {
    Self {
      size: (MODEL_SIZE, MODEL_SIZE),
      output,
      calls: Cell::new(0),
    }
  }

  pub fn calls(&self) -> usize {
    self.calls.get()
  }
}

impl<O: Clone> Model for FixedModel<O> {
  type Output = O;
  type Error = ModelFault;

  fn input_size(&self) -> (u32, u32) {
    self.size
  }

  async fn infer(&self, input: &InputTensor) -> Result<Self::Output, Self::Error> {
    assert_eq!(input.width(), self.size.0 as usize);
    self.calls.set(self.calls.get() + 1);
    Ok(self.output.clone())
  }
}

/// 推理总是失败
pub struct FailingModel;

impl Model for FailingModel {
  type Output = DamageModelOutput;
  type Error = ModelFault;

  fn input_size(&self) -> (u32, u32) {
    (MODEL_SIZE, MODEL_SIZE)
  }

  async fn infer(&self, _input: &InputTensor) -> Result<Self::Output, Self::Error> {
    Err(ModelFault)
  }
}

/// 中心形式的一行检测: (cx, cy, w, h, 类别分数..., 掩码系数...)
pub type Row = Vec<f32>;

pub fn head(rows: &[Row]) -> Array3<f32> {
  let channels = rows.first().map(Vec::len).unwrap_or(6);
  Array3::from_shape_fn((1, rows.len(), channels), |(_, n, c)| rows[n][c])
}

/// 单类别 “dent”、单掩码通道，原型掩码全为 1
pub fn damage_output(rows: &[Row]) -> DamageModelOutput {
  DamageModelOutput {
    head: if rows.is_empty() {
      Array3::zeros((1, 0, 6))
    } else {
      head(rows)
    },
    protos: Array4::ones((1, SEG_SIZE, SEG_SIZE, 1)),
  }
}

pub fn parts_output(rows: &[Row]) -> PartsModelOutput {
  PartsModelOutput {
    head: if rows.is_empty() {
      Array3::zeros((1, 0, 6))
    } else {
      head(rows)
    },
  }
}

/// (16, 16)-(32, 32) 处的一块凹陷
pub fn dent_row() -> Row {
  vec![24.0, 24.0, 16.0, 16.0, 0.9, 1.0]
}

/// 覆盖凹陷的引擎盖 (14, 14)-(34, 34)
pub fn hood_row() -> Row {
  vec![24.0, 24.0, 20.0, 20.0, 0.8, 0.1]
}

/// 远离凹陷的车门 (50, 50)-(60, 60)
pub fn door_row() -> Row {
  vec![55.0, 55.0, 10.0, 10.0, 0.1, 0.7]
}

pub fn detectors<D, P>(damage: D, parts: P) -> Detectors<D, P> {
  Detectors {
    damage,
    parts,
    damage_labels: LabelTable::from_json_str(r#"["dent"]"#).unwrap(),
    parts_labels: LabelTable::from_json_str(r#"["hood", "door"]"#).unwrap(),
  }
}

pub fn frame(timestamp: f64) -> RawFrame {
  RawFrame::new(
    RgbImage::from_pixel(MODEL_SIZE, MODEL_SIZE, Rgb([90, 90, 90])),
    timestamp,
  )
}
