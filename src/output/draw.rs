// 该文件是 Chesun （车损巡检） 项目的一部分。
// src/output/draw.rs - 检测结果可视化
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

use std::path::Path;

use ab_glyph::{FontArc, PxScale};
use image::{Rgb, Rgba};
use imageproc::rect::Rect;
use thiserror::Error;

use crate::{
  mask::DamagePixelSet,
  model::{BBox, DetectItem},
  output::surface::DrawingSurface,
};

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 16.0;
const LABEL_TEXT_HEIGHT: i32 = 20;
const LABEL_CHAR_WIDTH: f32 = 9.0; // 每字符平均宽度（粗略估计）
const LABEL_TEXT_VERTICAL_PADDING: i32 = 2;
const LABEL_TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
const BORDER_THICKNESS: u32 = 2;
const PALETTE_SIZE: usize = 80;

/// 快照中损伤像素的填充色与不透明度
pub const DAMAGE_FILL_COLOR: Rgb<u8> = Rgb([0xB2, 0x3B, 0x46]);
pub const DAMAGE_FILL_ALPHA: f32 = 0.75;

#[derive(Error, Debug)]
pub enum DrawError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("字体文件无效: {0}")]
  InvalidFont(#[from] ab_glyph::InvalidFont),
}

/// 类别颜色表
#[derive(Debug, Clone)]
pub struct Palette {
  colors: Vec<Rgb<u8>>,
}

impl Default for Palette {
  fn default() -> Self {
    Self::new(PALETTE_SIZE)
  }
}

impl Palette {
  /// 在色相环上均匀取 `size` 种颜色
  pub fn new(size: usize) -> Self {
    let size = size.max(1);
    let colors = (0..size)
      .map(|i| {
        let hue = (i as f32 / size as f32) * 360.0;
        Self::hsv_to_rgb(hue, 0.8, 0.9)
      })
      .collect();
    Self { colors }
  }

  /// HSV 转 RGB
  fn hsv_to_rgb(h: f32, s: f32, v: f32) -> Rgb<u8> {
    let c = v * s;
    let x = c * (1.0 - ((h / 60.0) % 2.0 - 1.0).abs());
    let m = v - c;

    let (r, g, b) = if h < 60.0 {
      (c, x, 0.0)
    } else if h < 120.0 {
      (x, c, 0.0)
    } else if h < 180.0 {
      (0.0, c, x)
    } else if h < 240.0 {
      (0.0, x, c)
    } else if h < 300.0 {
      (x, 0.0, c)
    } else {
      (c, 0.0, x)
    };

    Rgb([
      ((r + m) * 255.0) as u8,
      ((g + m) * 255.0) as u8,
      ((b + m) * 255.0) as u8,
    ])
  }

  pub fn color(&self, class_id: u32) -> Rgb<u8> {
    self.colors[class_id as usize % self.colors.len()]
  }

  pub fn rgba(&self, class_id: u32, alpha: u8) -> Rgba<u8> {
    let Rgb([r, g, b]) = self.color(class_id);
    Rgba([r, g, b, alpha])
  }
}

pub struct Draw {
  font: Option<FontArc>,
  font_scale: PxScale,
  label_text_height: i32,
  label_char_width: f32,
  label_text_vertical_padding: i32,
  palette: Palette,
}

impl Default for Draw {
  fn default() -> Self {
    Self {
      font: None,
      font_scale: PxScale::from(LABEL_FONT_SIZE),
      label_text_height: LABEL_TEXT_HEIGHT,
      label_char_width: LABEL_CHAR_WIDTH,
      label_text_vertical_padding: LABEL_TEXT_VERTICAL_PADDING,
      palette: Palette::default(),
    }
  }
}

impl Draw {
  /// 加载标签字体；未配置字体时只画边框
  pub fn with_font_file(self, path: impl AsRef<Path>) -> Result<Self, DrawError> {
    let data = std::fs::read(path)?;
    let font = FontArc::try_from_vec(data)?;
    Ok(self.with_font(font))
  }

  pub fn with_font(mut self, font: FontArc) -> Self {
    self.font = Some(font);
    self
  }

  pub fn palette(&self) -> &Palette {
    &self.palette
  }

  /// 绘制一个边框及其标签，bbox 为画布像素坐标
  pub fn draw_bbox_with_label<S: DrawingSurface>(
    &self,
    surface: &mut S,
    bbox: &BBox,
    label: &str,
    score: f32,
    color: Rgb<u8>,
  ) {
    let (w, h) = surface.size();
    if w == 0 || h == 0 {
      return;
    }

    let x_min = (bbox.x1.floor() as i32).clamp(0, w as i32 - 1);
    let y_min = (bbox.y1.floor() as i32).clamp(0, h as i32 - 1);
    let x_max = (bbox.x2.ceil() as i32).clamp(0, w as i32 - 1);
    let y_max = (bbox.y2.ceil() as i32).clamp(0, h as i32 - 1);

    if x_min >= x_max || y_min >= y_max {
      return;
    }

    let box_width = (x_max - x_min + 1) as u32;
    let box_height = (y_max - y_min + 1) as u32;
    let thickness = BORDER_THICKNESS.min(box_width).min(box_height);

    // 上下左右四条边
    surface.fill_rect(Rect::at(x_min, y_min).of_size(box_width, thickness), color, 1.0);
    surface.fill_rect(
      Rect::at(x_min, y_max - thickness as i32 + 1).of_size(box_width, thickness),
      color,
      1.0,
    );
    surface.fill_rect(Rect::at(x_min, y_min).of_size(thickness, box_height), color, 1.0);
    surface.fill_rect(
      Rect::at(x_max - thickness as i32 + 1, y_min).of_size(thickness, box_height),
      color,
      1.0,
    );

    let Some(font) = &self.font else {
      return;
    };

    let text = format!("{} {:.2}", label, score);
    let text_width = (text.chars().count() as f32 * self.label_char_width) as i32;

    // 标签放在边框上方
    let label_x = x_min;
    let label_y = (y_min - self.label_text_height).max(0);
    let label_width = text_width.min(w as i32 - label_x).max(0) as u32;

    if label_width > 0 {
      let rect = Rect::at(label_x, label_y).of_size(label_width, self.label_text_height as u32);
      surface.fill_rect(rect, color, 1.0);
      surface.fill_text(
        &text,
        label_x,
        label_y + self.label_text_vertical_padding,
        LABEL_TEXT_COLOR,
        font,
        self.font_scale,
      );
    }
  }

  pub fn draw_detections<S: DrawingSurface>(&self, surface: &mut S, items: &[DetectItem]) {
    for DetectItem {
      class_id,
      label,
      score,
      bbox,
    } in items
    {
      self.draw_bbox_with_label(surface, bbox, label, *score, self.palette.color(*class_id));
    }
  }

  /// 逐像素填充损伤区域
  pub fn fill_damage<S: DrawingSurface>(&self, surface: &mut S, pixels: &DamagePixelSet) {
    if pixels.is_sentinel() {
      return;
    }
    for &(x, y) in pixels.points() {
      surface.fill_rect(
        Rect::at(x as i32, y as i32).of_size(1, 1),
        DAMAGE_FILL_COLOR,
        DAMAGE_FILL_ALPHA,
      );
    }
  }
}
