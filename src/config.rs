// 该文件是 Chesun （车损巡检） 项目的一部分。
// src/config.rs - 流水线参数配置
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

use std::time::Duration;

pub const NMS_MAX_OUTPUT: usize = 500;
pub const NMS_IOU_THRESHOLD: f32 = 0.45;
pub const NMS_SCORE_THRESHOLD: f32 = 0.2;
pub const MASK_THRESHOLD: f32 = 0.5;
pub const MASK_ALPHA: u8 = 150;
pub const OVERLAP_PERCENT: f32 = 20.0;
/// 播放状态下两帧之间的默认最小间隔
pub const FRAME_DELAY: Duration = Duration::from_millis(40);

/// 掩码极性：原型掩码值与阈值比较的方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum MaskPolarity {
  /// 值大于阈值视为损伤（常规约定）
  #[default]
  Foreground,
  /// 值小于阈值视为损伤，填充区域同样参与比较
  Inverted,
}

impl MaskPolarity {
  pub fn is_damaged(self, value: f32, threshold: f32) -> bool {
    match self {
      MaskPolarity::Foreground => value > threshold,
      MaskPolarity::Inverted => value < threshold,
    }
  }
}

/// 非极大值抑制参数
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NmsParams {
  pub max_output: usize,
  pub iou_threshold: f32,
  pub score_threshold: f32,
}

impl Default for NmsParams {
  fn default() -> Self {
    Self {
      max_output: NMS_MAX_OUTPUT,
      iou_threshold: NMS_IOU_THRESHOLD,
      score_threshold: NMS_SCORE_THRESHOLD,
    }
  }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
  pub nms: NmsParams,
  pub mask_threshold: f32,
  pub mask_polarity: MaskPolarity,
  pub mask_alpha: u8,
  /// 部件与损伤相交判定的百分比阈值
  pub overlap_percent: f32,
  /// 绘制画布尺寸 (宽, 高)，为空时使用损伤模型输入尺寸
  pub canvas_size: Option<(u32, u32)>,
  pub jpeg_quality: u8,
}

impl Default for PipelineConfig {
  fn default() -> Self {
    Self {
      nms: NmsParams::default(),
      mask_threshold: MASK_THRESHOLD,
      mask_polarity: MaskPolarity::default(),
      mask_alpha: MASK_ALPHA,
      overlap_percent: OVERLAP_PERCENT,
      canvas_size: None,
      jpeg_quality: 90,
    }
  }
}

impl PipelineConfig {
  pub fn with_mask_polarity(mut self, polarity: MaskPolarity) -> Self {
    self.mask_polarity = polarity;
    self
  }

  pub fn with_nms(mut self, nms: NmsParams) -> Self {
    self.nms = nms;
    self
  }

  pub fn with_canvas_size(mut self, canvas_size: Option<(u32, u32)>) -> Self {
    self.canvas_size = canvas_size;
    self
  }
}
