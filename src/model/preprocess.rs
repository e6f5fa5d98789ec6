// 该文件是 Chesun （车损巡检） 项目的一部分。
// src/model/preprocess.rs - 帧预处理
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

use image::{
  RgbImage,
  imageops::{self, FilterType},
};
use ndarray::Array4;
use thiserror::Error;
use tracing::debug;

use crate::frame::InputTensor;

#[derive(Error, Debug)]
pub enum PreprocessError {
  #[error("输入帧为空: {0}x{1}")]
  EmptyFrame(u32, u32),
  #[error("模型输入尺寸无效: {0}x{1}")]
  InvalidModelSize(u32, u32),
}

/// 右侧与下方补黑成正方形，双线性缩放到模型尺寸并归一化
pub fn preprocess(
  frame: &RgbImage,
  model_width: u32,
  model_height: u32,
) -> Result<InputTensor, PreprocessError> {
  let (width, height) = frame.dimensions();
  if width == 0 || height == 0 {
    return Err(PreprocessError::EmptyFrame(width, height));
  }
  if model_width == 0 || model_height == 0 {
    return Err(PreprocessError::InvalidModelSize(model_width, model_height));
  }

  let side = width.max(height);
  let mut padded = RgbImage::new(side, side);
  imageops::replace(&mut padded, frame, 0, 0);

  let resized = imageops::resize(&padded, model_width, model_height, FilterType::Triangle);

  let data = Array4::from_shape_fn(
    (1, model_height as usize, model_width as usize, 3),
    |(_, y, x, c)| resized.get_pixel(x as u32, y as u32)[c] as f32 / 255.0,
  );

  let x_ratio = side as f32 / width as f32;
  let y_ratio = side as f32 / height as f32;
  debug!(
    "预处理: {}x{} -> 补边 {} -> {}x{}, 比例 ({:.3}, {:.3})",
    width, height, side, model_width, model_height, x_ratio, y_ratio
  );

  Ok(InputTensor::new(data, x_ratio, y_ratio))
}
