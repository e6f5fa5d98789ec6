// 该文件是 Chesun （车损巡检） 项目的一部分。
// src/output/surface.rs - 绘制画布
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

use ab_glyph::{FontArc, PxScale};
use image::{
  DynamicImage, Pixel, Rgb, RgbImage, Rgba, RgbaImage,
  codecs::jpeg::JpegEncoder,
  imageops::{self, FilterType},
};
use imageproc::{drawing::draw_text_mut, rect::Rect};

/// 光栅绘制目标
pub trait DrawingSurface {
  fn size(&self) -> (u32, u32);

  /// 清空为全透明
  fn clear(&mut self);

  /// 把图像缩放到 `rect` 并绘制
  fn draw_image(&mut self, image: &RgbImage, rect: Rect);

  /// 从左上角开始直接写入像素，不做混合
  fn put_pixels(&mut self, pixels: &RgbaImage);

  fn fill_rect(&mut self, rect: Rect, color: Rgb<u8>, alpha: f32);

  fn fill_text(&mut self, text: &str, x: i32, y: i32, color: Rgb<u8>, font: &FontArc, scale: PxScale);

  fn encode_jpeg(&self, quality: u8) -> Result<Vec<u8>, image::ImageError>;
}

/// 内存中的 RGBA 画布
#[derive(Debug, Clone)]
pub struct RasterSurface {
  canvas: RgbaImage,
}

impl RasterSurface {
  pub fn new(width: u32, height: u32) -> Self {
    Self {
      canvas: RgbaImage::new(width, height),
    }
  }

  pub fn image(&self) -> &RgbaImage {
    &self.canvas
  }

  pub fn into_image(self) -> RgbaImage {
    self.canvas
  }

  /// 画布是否全透明
  pub fn is_blank(&self) -> bool {
    self.canvas.pixels().all(|pixel| pixel[3] == 0)
  }
}

impl DrawingSurface for RasterSurface {
  fn size(&self) -> (u32, u32) {
    self.canvas.dimensions()
  }

  fn clear(&mut self) {
    for pixel in self.canvas.pixels_mut() {
      *pixel = Rgba([0, 0, 0, 0]);
    }
  }

  fn draw_image(&mut self, image: &RgbImage, rect: Rect) {
    let resized = if image.dimensions() == (rect.width(), rect.height()) {
      image.clone()
    } else {
      imageops::resize(image, rect.width(), rect.height(), FilterType::Triangle)
    };
    let rgba = DynamicImage::ImageRgb8(resized).to_rgba8();
    imageops::replace(&mut self.canvas, &rgba, rect.left() as i64, rect.top() as i64);
  }

  fn put_pixels(&mut self, pixels: &RgbaImage) {
    imageops::replace(&mut self.canvas, pixels, 0, 0);
  }

  fn fill_rect(&mut self, rect: Rect, color: Rgb<u8>, alpha: f32) {
    let (width, height) = self.canvas.dimensions();
    let x0 = rect.left().max(0) as u32;
    let y0 = rect.top().max(0) as u32;
    let x1 = (rect.right() + 1).clamp(0, width as i32) as u32;
    let y1 = (rect.bottom() + 1).clamp(0, height as i32) as u32;

    let alpha = (alpha.clamp(0.0, 1.0) * 255.0).round() as u8;
    let source = Rgba([color[0], color[1], color[2], alpha]);
    for y in y0..y1 {
      for x in x0..x1 {
        self.canvas.get_pixel_mut(x, y).blend(&source);
      }
    }
  }

  fn fill_text(&mut self, text: &str, x: i32, y: i32, color: Rgb<u8>, font: &FontArc, scale: PxScale) {
    let color = Rgba([color[0], color[1], color[2], 255]);
    draw_text_mut(&mut self.canvas, color, x, y, scale, font, text);
  }

  fn encode_jpeg(&self, quality: u8) -> Result<Vec<u8>, image::ImageError> {
    let rgb = DynamicImage::ImageRgba8(self.canvas.clone()).to_rgb8();
    let mut buffer = Vec::new();
    JpegEncoder::new_with_quality(&mut buffer, quality).encode_image(&rgb)?;
    Ok(buffer)
  }
}
