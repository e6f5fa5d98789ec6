// 该文件是 Chesun （车损巡检） 项目的一部分。
// src/frame.rs - 原始帧与模型输入张量定义
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

use image::RgbImage;
use ndarray::{Array4, ArrayView4};

/// 一帧 RGB 图像及其播放时间戳（秒）
#[derive(Debug, Clone)]
pub struct RawFrame {
  image: RgbImage,
  timestamp: f64,
}

impl RawFrame {
  pub fn new(image: RgbImage, timestamp: f64) -> Self {
    Self { image, timestamp }
  }

  pub fn image(&self) -> &RgbImage {
    &self.image
  }

  pub fn timestamp(&self) -> f64 {
    self.timestamp
  }

  pub fn width(&self) -> u32 {
    self.image.width()
  }

  pub fn height(&self) -> u32 {
    self.image.height()
  }
}

impl From<RgbImage> for RawFrame {
  fn from(image: RgbImage) -> Self {
    Self::new(image, 0.0)
  }
}

/// NHWC 格式的模型输入，取值 0..1，batch 为 1
///
/// `x_ratio`/`y_ratio` 把模型坐标映射回原始帧坐标。
#[derive(Debug, Clone)]
pub struct InputTensor {
  data: Array4<f32>,
  x_ratio: f32,
  y_ratio: f32,
}

impl InputTensor {
  pub fn new(data: Array4<f32>, x_ratio: f32, y_ratio: f32) -> Self {
    Self {
      data,
      x_ratio,
      y_ratio,
    }
  }

  pub fn as_nhwc(&self) -> ArrayView4<'_, f32> {
    self.data.view()
  }

  /// 转换为 NCHW 布局的连续张量
  pub fn to_nchw(&self) -> Array4<f32> {
    self
      .data
      .view()
      .permuted_axes([0, 3, 1, 2])
      .as_standard_layout()
      .into_owned()
  }

  pub fn height(&self) -> usize {
    self.data.shape()[1]
  }

  pub fn width(&self) -> usize {
    self.data.shape()[2]
  }

  pub fn x_ratio(&self) -> f32 {
    self.x_ratio
  }

  pub fn y_ratio(&self) -> f32 {
    self.y_ratio
  }
}
