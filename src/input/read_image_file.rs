// 该文件是 Chesun （车损巡检） 项目的一部分。
// src/input/read_image_file.rs - 图像文件输入
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

use image::{ImageReader, RgbImage};
use thiserror::Error;
use tracing::{error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::RawFrame,
  input::{FrameSource, SourceState},
};

#[derive(Error, Debug)]
pub enum ImageFileInputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("路径解码错误: {0}")]
  PathError(#[from] std::string::FromUtf8Error),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像加载错误: {0}")]
  ImageLoadError(#[from] image::ImageError),
}

/// 静态图片，始终处于暂停状态
pub struct ImageFileInput {
  image: RgbImage,
}

impl FromUrlWithScheme for ImageFileInput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for ImageFileInput {
  type Error = ImageFileInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!("URI 方案不匹配: 期望 '{}', 实际 '{}'", Self::SCHEME, url.scheme());
      return Err(ImageFileInputError::SchemeMismatch);
    }

    let path = crate::decoded_path(url)?;
    let image = ImageReader::open(&path)?.decode()?.to_rgb8();
    info!("读取图像 {}: {}x{}", path, image.width(), image.height());

    Ok(ImageFileInput { image })
  }
}

impl From<RgbImage> for ImageFileInput {
  fn from(image: RgbImage) -> Self {
    Self { image }
  }
}

impl FrameSource for ImageFileInput {
  type Error = ImageFileInputError;

  fn state(&self) -> SourceState {
    if self.image.width() == 0 {
      SourceState::Closed
    } else {
      SourceState::Paused
    }
  }

  fn current_frame(&mut self) -> Result<Option<RawFrame>, Self::Error> {
    Ok(Some(RawFrame::new(self.image.clone(), 0.0)))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::Rgb;

  #[test]
  fn loads_a_still_image_from_url() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("car.png");
    RgbImage::from_pixel(6, 4, Rgb([9, 9, 9])).save(&path).unwrap();

    let url = Url::from_file_path(&path).unwrap();
    let url = Url::parse(&format!("image://{}", url.path())).unwrap();
    let mut input = ImageFileInput::from_url(&url).unwrap();

    assert_eq!(input.state(), SourceState::Paused);
    let frame = input.current_frame().unwrap().unwrap();
    assert_eq!((frame.width(), frame.height()), (6, 4));
    assert_eq!(frame.timestamp(), 0.0);
  }

  #[test]
  fn rejects_other_schemes() {
    let url = Url::parse("frames:///tmp").unwrap();
    assert!(matches!(
      ImageFileInput::from_url(&url),
      Err(ImageFileInputError::SchemeMismatch)
    ));
  }
}
