// 该文件是 Chesun （车损巡检） 项目的一部分。
// src/input/image_sequence.rs - 图像序列输入
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

use std::path::{Path, PathBuf};

use image::ImageReader;
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::RawFrame,
  input::{FrameSource, SourceState},
};

const DEFAULT_FPS: f64 = 25.0;
const IMAGE_EXTENSIONS: [&str; 6] = ["jpg", "jpeg", "png", "bmp", "gif", "webp"];

#[derive(Error, Debug)]
pub enum ImageSequenceInputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("路径解码错误: {0}")]
  PathError(#[from] std::string::FromUtf8Error),
  #[error("无效的帧率: {0}")]
  InvalidFps(String),
  #[error("目录中没有图像文件: {0}")]
  NoImages(String),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像加载错误: {0}")]
  ImageLoadError(#[from] image::ImageError),
}

/// 按文件名排序的一组图像，模拟以固定帧率播放的视频
///
/// 第 `i` 帧的时间戳为 `i / fps` 秒。
pub struct ImageSequenceInput {
  frames: Vec<PathBuf>,
  fps: f64,
  position: usize,
  paused: bool,
}

impl FromUrlWithScheme for ImageSequenceInput {
  const SCHEME: &'static str = "frames";
}

impl FromUrl for ImageSequenceInput {
  type Error = ImageSequenceInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ImageSequenceInputError::SchemeMismatch);
    }

    let mut fps = DEFAULT_FPS;
    let mut paused = false;
    for (key, value) in url.query_pairs() {
      match key.as_ref() {
        "fps" => {
          fps = value
            .parse()
            .ok()
            .filter(|fps: &f64| *fps > 0.0)
            .ok_or_else(|| ImageSequenceInputError::InvalidFps(value.to_string()))?;
        }
        "paused" => paused = true,
        _ => debug!("忽略输入参数: {}={}", key, value),
      }
    }

    let directory = crate::decoded_path(url)?;
    let input = Self::open(&directory, fps)?;
    Ok(if paused { input.paused() } else { input })
  }
}

impl ImageSequenceInput {
  pub fn open(directory: impl AsRef<Path>, fps: f64) -> Result<Self, ImageSequenceInputError> {
    let directory = directory.as_ref();
    let mut frames = Vec::new();
    for entry in std::fs::read_dir(directory)? {
      let path = entry?.path();
      let is_image = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false);
      if path.is_file() && is_image {
        frames.push(path);
      }
    }

    if frames.is_empty() {
      return Err(ImageSequenceInputError::NoImages(
        directory.display().to_string(),
      ));
    }
    frames.sort();
    info!("图像序列 {}: {} 帧, {} fps", directory.display(), frames.len(), fps);

    Ok(Self {
      frames,
      fps,
      position: 0,
      paused: false,
    })
  }

  pub fn paused(mut self) -> Self {
    self.paused = true;
    self
  }

  pub fn pause(&mut self) {
    self.paused = true;
  }

  pub fn resume(&mut self) {
    self.paused = false;
  }

  /// 跳转到指定秒数
  pub fn seek(&mut self, seconds: f64) {
    let index = (seconds.max(0.0) * self.fps).floor() as usize;
    self.position = index.min(self.frames.len());
  }

  pub fn len(&self) -> usize {
    self.frames.len()
  }

  pub fn is_empty(&self) -> bool {
    self.frames.is_empty()
  }
}

impl FrameSource for ImageSequenceInput {
  type Error = ImageSequenceInputError;

  fn state(&self) -> SourceState {
    if self.position >= self.frames.len() {
      SourceState::Closed
    } else if self.paused {
      SourceState::Paused
    } else {
      SourceState::Playing
    }
  }

  fn current_frame(&mut self) -> Result<Option<RawFrame>, Self::Error> {
    let Some(path) = self.frames.get(self.position) else {
      return Ok(None);
    };

    let image = match ImageReader::open(path)?.decode() {
      Ok(image) => image.to_rgb8(),
      Err(e) => {
        warn!("读取帧 {} 失败: {}", path.display(), e);
        return Err(e.into());
      }
    };
    let timestamp = self.position as f64 / self.fps;

    if !self.paused {
      self.position += 1;
    }
    Ok(Some(RawFrame::new(image, timestamp)))
  }
}
