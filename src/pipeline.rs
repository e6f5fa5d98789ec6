// 该文件是 Chesun （车损巡检） 项目的一部分。
// src/pipeline.rs - 单帧检测流程
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

use std::time::Instant;

use imageproc::rect::Rect;
use thiserror::Error;
use tracing::{debug, info};

use crate::{
  config::PipelineConfig,
  correlate::correlate,
  frame::{InputTensor, RawFrame},
  mask::{self, CompositeParams, DamagePixelSet, MaskError},
  model::{
    DamageModelOutput, DetectItem, DetectResult, LabelTable, Model, PartsModelOutput,
    decode::{self, DecodeError},
    nms::non_max_suppression,
    preprocess::{PreprocessError, preprocess},
  },
  output::{
    draw::Draw,
    surface::{DrawingSurface, RasterSurface},
  },
  session::{DetectionRecord, SessionState},
};

type BoxedError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Error, Debug)]
pub enum PipelineError {
  #[error("预处理错误: {0}")]
  Preprocess(#[from] PreprocessError),
  #[error("解码错误: {0}")]
  Decode(#[from] DecodeError),
  #[error("掩码合成错误: {0}")]
  Mask(#[from] MaskError),
  #[error("模型推理错误: {0}")]
  Model(BoxedError),
  #[error("快照编码错误: {0}")]
  Snapshot(#[from] image::ImageError),
}

fn model_error<E: std::error::Error + Send + Sync + 'static>(err: E) -> PipelineError {
  PipelineError::Model(Box::new(err))
}

/// 损伤分割模型与部件检测模型及其标签
pub struct Detectors<D, P> {
  pub damage: D,
  pub parts: P,
  pub damage_labels: LabelTable,
  pub parts_labels: LabelTable,
}

/// 单帧处理结果
#[derive(Debug, Clone)]
pub struct FrameReport {
  pub timestamp: f64,
  /// 损伤检测，模型坐标
  pub damage: DetectResult,
  /// 与损伤相交的部件，画布坐标
  pub parts: DetectResult,
  pub pixels: DamagePixelSet,
  /// 本帧新记录的部件名
  pub new_parts: Vec<String>,
  /// 新记录在会话日志中的序号
  pub record: Option<usize>,
}

/// 一次巡检会话：模型、参数与去重状态
pub struct Session<'a, D, P> {
  detectors: &'a Detectors<D, P>,
  config: PipelineConfig,
  draw: Draw,
  state: SessionState,
}

impl<'a, D, P> Session<'a, D, P>
where
  D: Model<Output = DamageModelOutput>,
  D::Error: std::error::Error + Send + Sync + 'static,
  P: Model<Output = PartsModelOutput>,
  P::Error: std::error::Error + Send + Sync + 'static,
{
  pub fn new(detectors: &'a Detectors<D, P>, config: PipelineConfig) -> Self {
    Self {
      detectors,
      config,
      draw: Draw::default(),
      state: SessionState::new(),
    }
  }

  pub fn with_draw(mut self, draw: Draw) -> Self {
    self.draw = draw;
    self
  }

  pub fn config(&self) -> &PipelineConfig {
    &self.config
  }

  pub fn state(&self) -> &SessionState {
    &self.state
  }

  pub fn records(&self) -> &[DetectionRecord] {
    self.state.records()
  }

  /// 清空去重状态，开始新的会话
  pub fn reset(&mut self) {
    self.state.reset();
  }

  pub fn into_state(self) -> SessionState {
    self.state
  }

  /// 画布尺寸 (宽, 高)
  pub fn canvas_size(&self) -> (u32, u32) {
    match self.config.canvas_size {
      Some((w, h)) if w > 0 && h > 0 => (w, h),
      _ => self.detectors.damage.input_size(),
    }
  }

  /// 对一帧执行完整检测，并更新显示画布与会话记录
  pub async fn detect_frame<S: DrawingSurface>(
    &mut self,
    frame: &RawFrame,
    display: &mut S,
  ) -> Result<FrameReport, PipelineError> {
    let start = Instant::now();
    let detectors = self.detectors;
    let (model_w, model_h) = detectors.damage.input_size();
    let (canvas_w, canvas_h) = self.canvas_size();

    let input = preprocess(frame.image(), model_w, model_h)?;

    // 损伤分割
    let output = detectors.damage.infer(&input).await.map_err(model_error)?;
    let head = decode::squeeze_head(output.head.view())?;
    let protos = decode::prototype_view(output.protos.view())?;
    let num_classes = detectors.damage_labels.len();
    let mask_channels = protos.dim().0;
    decode::expect_channels(head, num_classes, mask_channels)?;

    let decoded = decode::decode_head(head, num_classes)?;
    let keep = non_max_suppression(&decoded.boxes, &decoded.scores, &self.config.nms).await;
    let damage = decoded.gather(&keep, &detectors.damage_labels);
    let coefficients = decode::mask_coefficients(head, num_classes, mask_channels, &keep)?;

    let params = CompositeParams {
      model_size: (model_w, model_h),
      canvas_size: (canvas_w, canvas_h),
      x_scale: input.x_ratio() * canvas_w as f32 / model_w as f32,
      y_scale: input.y_ratio() * canvas_h as f32 / model_h as f32,
      threshold: self.config.mask_threshold,
      polarity: self.config.mask_polarity,
      alpha: self.config.mask_alpha,
    };
    let composite = mask::composite(
      &damage,
      coefficients.view(),
      protos,
      self.draw.palette(),
      &params,
    )?;
    debug!("损伤检测 {} 个，损伤像素 {} 个", damage.len(), composite.pixels.len());

    let mut report = FrameReport {
      timestamp: frame.timestamp(),
      damage: damage.into(),
      parts: DetectResult::default(),
      pixels: composite.pixels,
      new_parts: Vec::new(),
      record: None,
    };

    if report.damage.is_empty() {
      display.clear();
      info!("{:.2}s 未检测到损伤，耗时 {:.2?}", frame.timestamp(), start.elapsed());
      return Ok(report);
    }

    // 部件检测
    let parts = self.detect_parts(frame, input, (canvas_w, canvas_h)).await?;
    let retained = correlate(&parts, &report.pixels, self.config.overlap_percent);

    display.clear();
    if retained.is_empty() {
      info!(
        "{:.2}s 损伤 {} 处，未关联到部件，耗时 {:.2?}",
        frame.timestamp(),
        report.damage.len(),
        start.elapsed()
      );
      return Ok(report);
    }
    display.put_pixels(&composite.overlay);
    self.draw.draw_detections(display, &retained);

    let names: Vec<&str> = retained.iter().map(|item| item.label.as_str()).collect();
    let draw = &self.draw;
    let pixels = &report.pixels;
    let quality = self.config.jpeg_quality;
    let admitted = self.state.admit(frame.timestamp(), names, |_| {
      render_snapshot(draw, frame, pixels, &retained, (canvas_w, canvas_h), quality)
    })?;
    if let Some(record) = admitted {
      report.new_parts = record.parts.clone();
      report.record = Some(self.state.records().len() - 1);
    }
    report.parts = retained.into();

    info!(
      "{:.2}s 损伤 {} 处，关联部件 {} 个，新部件 {} 个，耗时 {:.2?}",
      frame.timestamp(),
      report.damage.len(),
      report.parts.len(),
      report.new_parts.len(),
      start.elapsed()
    );
    Ok(report)
  }

  /// 部件检测，返回画布坐标下的部件框
  async fn detect_parts(
    &self,
    frame: &RawFrame,
    damage_input: InputTensor,
    (canvas_w, canvas_h): (u32, u32),
  ) -> Result<Vec<DetectItem>, PipelineError> {
    let detectors = self.detectors;
    let (parts_w, parts_h) = detectors.parts.input_size();

    // 输入尺寸一致时复用损伤模型的输入
    let input = if (damage_input.width(), damage_input.height()) == (parts_w as usize, parts_h as usize) {
      damage_input
    } else {
      drop(damage_input);
      preprocess(frame.image(), parts_w, parts_h)?
    };

    let output = detectors.parts.infer(&input).await.map_err(model_error)?;
    let head = decode::squeeze_head(output.head.view())?;
    let num_classes = detectors.parts_labels.len();
    decode::expect_channels(head, num_classes, 0)?;

    let decoded = decode::decode_head(head, num_classes)?;
    let keep = non_max_suppression(&decoded.boxes, &decoded.scores, &self.config.nms).await;

    let x_scale = input.x_ratio() * canvas_w as f32 / parts_w as f32;
    let y_scale = input.y_ratio() * canvas_h as f32 / parts_h as f32;
    let parts = decoded
      .gather(&keep, &detectors.parts_labels)
      .into_iter()
      .map(|item| DetectItem {
        bbox: item.bbox.scale(x_scale, y_scale),
        ..item
      })
      .collect::<Vec<_>>();
    debug!("部件检测 {} 个", parts.len());
    Ok(parts)
  }
}

/// 合成快照：原始帧、半透明损伤像素与部件框
pub fn render_snapshot(
  draw: &Draw,
  frame: &RawFrame,
  pixels: &DamagePixelSet,
  parts: &[DetectItem],
  (canvas_w, canvas_h): (u32, u32),
  quality: u8,
) -> Result<Vec<u8>, image::ImageError> {
  let mut surface = RasterSurface::new(canvas_w, canvas_h);
  surface.draw_image(frame.image(), Rect::at(0, 0).of_size(canvas_w, canvas_h));
  draw.fill_damage(&mut surface, pixels);
  draw.draw_detections(&mut surface, parts);
  surface.encode_jpeg(quality)
}
