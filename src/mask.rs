// 该文件是 Chesun （车损巡检） 项目的一部分。
// src/mask.rs - 分割掩码合成
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

use std::ops::Range;

use image::{Rgba, RgbaImage};
use ndarray::{Array2, ArrayView1, ArrayView2, ArrayView3, s};
use thiserror::Error;
use tracing::debug;

use crate::{
  config::MaskPolarity,
  model::{BBox, DetectItem},
  output::draw::Palette,
};

#[derive(Error, Debug)]
pub enum MaskError {
  #[error("掩码系数行数 {rows} 与检测数 {detections} 不一致")]
  CoefficientRows { detections: usize, rows: usize },
  #[error("掩码系数通道数 {coefficients} 与原型通道数 {prototypes} 不一致")]
  ChannelMismatch {
    coefficients: usize,
    prototypes: usize,
  },
}

/// 画布坐标下的损伤像素，按行优先顺序排列
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DamagePixelSet {
  points: Vec<(u32, u32)>,
  sentinel: bool,
}

impl DamagePixelSet {
  /// 没有任何损伤检测时的占位集合 `[(0, 0)]`
  pub fn sentinel() -> Self {
    Self {
      points: vec![(0, 0)],
      sentinel: true,
    }
  }

  pub fn from_points(points: Vec<(u32, u32)>) -> Self {
    Self {
      points,
      sentinel: false,
    }
  }

  pub fn is_sentinel(&self) -> bool {
    self.sentinel
  }

  pub fn len(&self) -> usize {
    self.points.len()
  }

  pub fn is_empty(&self) -> bool {
    self.points.is_empty()
  }

  pub fn points(&self) -> &[(u32, u32)] {
    &self.points
  }

  pub fn iter(&self) -> std::slice::Iter<'_, (u32, u32)> {
    self.points.iter()
  }
}

#[derive(Debug, Clone, Copy)]
pub struct CompositeParams {
  /// 模型输入尺寸 (宽, 高)
  pub model_size: (u32, u32),
  /// 画布尺寸 (宽, 高)
  pub canvas_size: (u32, u32),
  /// 模型坐标到画布坐标的缩放
  pub x_scale: f32,
  pub y_scale: f32,
  pub threshold: f32,
  pub polarity: MaskPolarity,
  pub alpha: u8,
}

#[derive(Debug, Clone)]
pub struct Composite {
  pub overlay: RgbaImage,
  pub pixels: DamagePixelSet,
}

/// 整数矩形 (y, x, h, w)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Region {
  y: i64,
  x: i64,
  h: i64,
  w: i64,
}

impl Region {
  /// 与 [0, height) x [0, width) 求交
  fn clamp(self, height: i64, width: i64) -> Option<Region> {
    let y0 = self.y.max(0);
    let x0 = self.x.max(0);
    let y1 = self.y.saturating_add(self.h).min(height);
    let x1 = self.x.saturating_add(self.w).min(width);
    (y1 > y0 && x1 > x0).then_some(Region {
      y: y0,
      x: x0,
      h: y1 - y0,
      w: x1 - x0,
    })
  }

  fn contains(&self, y: i64, x: i64) -> bool {
    y >= self.y && y < self.y + self.h && x >= self.x && x < self.x + self.w
  }
}

/// 模型坐标下的框映射到原型掩码坐标
fn downsampled(bbox: &BBox, model_size: (u32, u32), seg_h: usize, seg_w: usize) -> Region {
  let y_factor = seg_h as f32 / model_size.1 as f32;
  let x_factor = seg_w as f32 / model_size.0 as f32;
  Region {
    y: (bbox.y1 * y_factor).floor() as i64,
    x: (bbox.x1 * x_factor).floor() as i64,
    h: (bbox.height() * y_factor).round() as i64,
    w: (bbox.width() * x_factor).round() as i64,
  }
}

/// 模型坐标下的框映射到画布坐标
fn upsampled(bbox: &BBox, x_scale: f32, y_scale: f32) -> Region {
  Region {
    y: (bbox.y1 * y_scale).floor() as i64,
    x: (bbox.x1 * x_scale).floor() as i64,
    h: (bbox.height() * y_scale).round() as i64,
    w: (bbox.width() * x_scale).round() as i64,
  }
}

/// 双线性缩放，角点不对齐，采样位置 `out * in / out_size`
pub fn resize_bilinear(input: ArrayView2<'_, f32>, out_h: usize, out_w: usize) -> Array2<f32> {
  resize_bilinear_window(input, (out_h, out_w), 0..out_h, 0..out_w)
}

/// 只计算 `out_size` 输出中 `rows` x `cols` 窗口的双线性缩放结果
pub fn resize_bilinear_window(
  input: ArrayView2<'_, f32>,
  (out_h, out_w): (usize, usize),
  rows: Range<usize>,
  cols: Range<usize>,
) -> Array2<f32> {
  let rows = rows.start.min(out_h)..rows.end.min(out_h);
  let cols = cols.start.min(out_w)..cols.end.min(out_w);
  let shape = (rows.len(), cols.len());

  let (in_h, in_w) = input.dim();
  if in_h == 0 || in_w == 0 || shape.0 == 0 || shape.1 == 0 {
    return Array2::zeros(shape);
  }

  let y_step = in_h as f32 / out_h as f32;
  let x_step = in_w as f32 / out_w as f32;

  Array2::from_shape_fn(shape, |(wy, wx)| {
    let sy = (rows.start + wy) as f32 * y_step;
    let sx = (cols.start + wx) as f32 * x_step;
    let y0 = (sy.floor() as usize).min(in_h - 1);
    let x0 = (sx.floor() as usize).min(in_w - 1);
    let y1 = (y0 + 1).min(in_h - 1);
    let x1 = (x0 + 1).min(in_w - 1);
    let dy = sy - y0 as f32;
    let dx = sx - x0 as f32;

    let top = input[[y0, x0]] + (input[[y0, x1]] - input[[y0, x0]]) * dx;
    let bottom = input[[y1, x0]] + (input[[y1, x1]] - input[[y1, x0]]) * dx;
    top + (bottom - top) * dy
  })
}

/// 取出原型区域并与系数做线性组合，得到 [h, w] 的掩码片
fn prototype_patch(
  protos: ArrayView3<'_, f32>,
  coefficients: ArrayView1<'_, f32>,
  region: Region,
) -> Array2<f32> {
  let (y0, x0) = (region.y as usize, region.x as usize);
  let (y1, x1) = (y0 + region.h as usize, x0 + region.w as usize);
  let sliced = protos.slice(s![.., y0..y1, x0..x1]);

  let mut patch = Array2::zeros((region.h as usize, region.w as usize));
  for (plane, &weight) in sliced.outer_iter().zip(coefficients.iter()) {
    patch.scaled_add(weight, &plane);
  }
  patch
}

/// 合成损伤掩码叠加层，并收集损伤像素
///
/// `coefficients` 形状 [检测数, mc]，`protos` 形状 [mc, segH, segW]。
/// 后面的检测覆盖前面的检测。
pub fn composite(
  items: &[DetectItem],
  coefficients: ArrayView2<'_, f32>,
  protos: ArrayView3<'_, f32>,
  palette: &Palette,
  params: &CompositeParams,
) -> Result<Composite, MaskError> {
  let (canvas_w, canvas_h) = params.canvas_size;
  let mut overlay = RgbaImage::new(canvas_w, canvas_h);

  if items.is_empty() {
    return Ok(Composite {
      overlay,
      pixels: DamagePixelSet::sentinel(),
    });
  }

  if coefficients.nrows() != items.len() {
    return Err(MaskError::CoefficientRows {
      detections: items.len(),
      rows: coefficients.nrows(),
    });
  }
  let (mask_channels, seg_h, seg_w) = protos.dim();
  if coefficients.ncols() != mask_channels {
    return Err(MaskError::ChannelMismatch {
      coefficients: coefficients.ncols(),
      prototypes: mask_channels,
    });
  }

  let pad_damaged = params.polarity.is_damaged(0.0, params.threshold);
  let mut colors: Vec<Rgba<u8>> = Vec::new();

  for (item, coefficient) in items.iter().zip(coefficients.outer_iter()) {
    let Some(proto_region) =
      downsampled(&item.bbox, params.model_size, seg_h, seg_w).clamp(seg_h as i64, seg_w as i64)
    else {
      debug!("{} 的原型区域为空，跳过", item.label);
      continue;
    };
    let target = upsampled(&item.bbox, params.x_scale, params.y_scale);
    if target.h <= 0 || target.w <= 0 {
      debug!("{} 的绘制区域为空，跳过", item.label);
      continue;
    }

    // 只缩放画布内可见的部分
    let patch = prototype_patch(protos, coefficient, proto_region);
    let visible = target.clamp(canvas_h as i64, canvas_w as i64);
    let mask = visible.map(|v| {
      let (top, left) = ((v.y - target.y) as usize, (v.x - target.x) as usize);
      resize_bilinear_window(
        patch.view(),
        (target.h as usize, target.w as usize),
        top..top + v.h as usize,
        left..left + v.w as usize,
      )
    });

    let color = palette.rgba(item.class_id, params.alpha);
    if !colors.contains(&color) {
      colors.push(color);
    }

    // 填充区域的值为 0，只有当 0 也判为损伤时才需要扫描整个画布
    let bounds = if pad_damaged {
      Some(Region {
        y: 0,
        x: 0,
        h: canvas_h as i64,
        w: canvas_w as i64,
      })
    } else {
      visible
    };
    let Some(bounds) = bounds else {
      continue;
    };

    for y in bounds.y..bounds.y + bounds.h {
      for x in bounds.x..bounds.x + bounds.w {
        let value = match (visible, &mask) {
          (Some(v), Some(mask)) if v.contains(y, x) => mask[[(y - v.y) as usize, (x - v.x) as usize]],
          _ => 0.0,
        };
        if params.polarity.is_damaged(value, params.threshold) {
          overlay.put_pixel(x as u32, y as u32, color);
        }
      }
    }
  }

  let pixels = collect_pixels(&overlay, &colors);
  debug!("合成 {} 个损伤掩码，损伤像素 {} 个", items.len(), pixels.len());
  Ok(Composite { overlay, pixels })
}

/// 行优先扫描叠加层，收集颜色属于 `colors` 的像素
pub fn collect_pixels(overlay: &RgbaImage, colors: &[Rgba<u8>]) -> DamagePixelSet {
  let points = overlay
    .enumerate_pixels()
    .filter(|(_, _, pixel)| colors.contains(pixel))
    .map(|(x, y, _)| (x, y))
    .collect();
  DamagePixelSet::from_points(points)
}

#[cfg(test)]
mod tests {
  use super::*;
  use ndarray::{Array3, array};

  fn params(polarity: MaskPolarity) -> CompositeParams {
    CompositeParams {
      model_size: (8, 8),
      canvas_size: (8, 8),
      x_scale: 1.0,
      y_scale: 1.0,
      threshold: 0.5,
      polarity,
      alpha: 150,
    }
  }

  fn dent(bbox: BBox) -> DetectItem {
    DetectItem {
      class_id: 0,
      label: "dent".to_string(),
      score: 0.9,
      bbox,
    }
  }

  #[test]
  fn resize_keeps_constant_patches_and_interpolates() {
    let ones = Array2::<f32>::ones((2, 2));
    assert_eq!(resize_bilinear(ones.view(), 4, 4), Array2::<f32>::ones((4, 4)));

    let ramp = array![[0.0f32, 1.0]];
    let resized = resize_bilinear(ramp.view(), 1, 4);
    assert_eq!(resized, array![[0.0, 0.5, 1.0, 1.0]]);
  }

  #[test]
  fn no_detections_yield_the_sentinel() {
    let protos = Array3::<f32>::zeros((1, 4, 4));
    let coefficients = Array2::<f32>::zeros((0, 1));
    let composite = composite(
      &[],
      coefficients.view(),
      protos.view(),
      &Palette::default(),
      &params(MaskPolarity::Foreground),
    )
    .unwrap();
    assert!(composite.pixels.is_sentinel());
    assert_eq!(composite.pixels.points(), &[(0, 0)]);
  }

  #[test]
  fn foreground_mask_covers_the_box() {
    let protos = Array3::<f32>::ones((1, 4, 4));
    let coefficients = array![[1.0f32]];
    let palette = Palette::default();
    let composite = composite(
      &[dent(BBox::new(2.0, 2.0, 6.0, 6.0))],
      coefficients.view(),
      protos.view(),
      &palette,
      &params(MaskPolarity::Foreground),
    )
    .unwrap();

    assert_eq!(composite.pixels.len(), 16);
    assert_eq!(composite.pixels.points()[0], (2, 2));
    assert_eq!(composite.pixels.points()[15], (5, 5));
    assert_eq!(*composite.overlay.get_pixel(3, 3), palette.rgba(0, 150));
    assert_eq!(composite.overlay.get_pixel(0, 0)[3], 0);
  }

  #[test]
  fn inverted_mask_paints_the_padding() {
    let protos = Array3::<f32>::ones((1, 4, 4));
    let coefficients = array![[1.0f32]];
    let composite = composite(
      &[dent(BBox::new(2.0, 2.0, 6.0, 6.0))],
      coefficients.view(),
      protos.view(),
      &Palette::default(),
      &params(MaskPolarity::Inverted),
    )
    .unwrap();
    assert_eq!(composite.pixels.len(), 64 - 16);
    assert_eq!(composite.pixels.points()[0], (0, 0));
  }

  #[test]
  fn degenerate_boxes_are_skipped() {
    let protos = Array3::<f32>::ones((1, 4, 4));
    let coefficients = array![[1.0f32]];
    let composite = composite(
      &[dent(BBox::new(6.0, 6.0, 2.0, 2.0))],
      coefficients.view(),
      protos.view(),
      &Palette::default(),
      &params(MaskPolarity::Foreground),
    )
    .unwrap();
    assert!(composite.pixels.is_empty());
    assert!(!composite.pixels.is_sentinel());
  }

  #[test]
  fn later_detection_wins_on_overlap() {
    let protos = Array3::<f32>::ones((1, 4, 4));
    let coefficients = array![[1.0f32], [1.0]];
    let palette = Palette::default();
    let scratch = DetectItem {
      class_id: 1,
      label: "scratch".to_string(),
      score: 0.7,
      bbox: BBox::new(2.0, 2.0, 6.0, 6.0),
    };
    let composite = composite(
      &[dent(BBox::new(0.0, 0.0, 4.0, 4.0)), scratch],
      coefficients.view(),
      protos.view(),
      &palette,
      &params(MaskPolarity::Foreground),
    )
    .unwrap();

    assert_ne!(palette.rgba(0, 150), palette.rgba(1, 150));
    assert_eq!(*composite.overlay.get_pixel(0, 0), palette.rgba(0, 150));
    assert_eq!(*composite.overlay.get_pixel(3, 3), palette.rgba(1, 150));
    assert_eq!(*composite.overlay.get_pixel(5, 5), palette.rgba(1, 150));
    // 两种颜色的并集：16 + 16 - 4
    assert_eq!(composite.pixels.len(), 28);
    assert!(composite.pixels.points().contains(&(0, 0)));
    assert!(composite.pixels.points().contains(&(5, 5)));
    assert!(!composite.pixels.points().contains(&(5, 0)));
  }

  #[test]
  fn oversized_boxes_are_cut_to_the_canvas() {
    let protos = Array3::<f32>::ones((1, 4, 4));
    let coefficients = array![[1.0f32], [1.0]];
    let composite = composite(
      &[
        dent(BBox::new(0.0, 0.0, 1.0e12, 1.0e12)),
        dent(BBox::new(1.0, 1.0, f32::MAX, f32::MAX)),
      ],
      coefficients.view(),
      protos.view(),
      &Palette::default(),
      &params(MaskPolarity::Foreground),
    )
    .unwrap();
    assert_eq!(composite.pixels.len(), 64);
  }

  #[test]
  fn window_matches_the_full_resize() {
    let ramp = array![[0.0f32, 1.0, 2.0], [3.0, 4.0, 5.0]];
    let full = resize_bilinear(ramp.view(), 6, 9);
    let window = resize_bilinear_window(ramp.view(), (6, 9), 2..5, 3..7);
    assert_eq!(window, full.slice(s![2..5, 3..7]));
    assert_eq!(resize_bilinear_window(ramp.view(), (6, 9), 4..20, 8..20).dim(), (2, 1));
  }

  #[test]
  fn rejects_mismatched_coefficients() {
    let protos = Array3::<f32>::ones((2, 4, 4));
    let coefficients = array![[1.0f32]];
    let result = composite(
      &[dent(BBox::new(2.0, 2.0, 6.0, 6.0))],
      coefficients.view(),
      protos.view(),
      &Palette::default(),
      &params(MaskPolarity::Foreground),
    );
    assert!(matches!(result, Err(MaskError::ChannelMismatch { .. })));
  }
}
