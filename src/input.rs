// 该文件是 Chesun （车损巡检） 项目的一部分。
// src/input.rs - 视频/图像输入
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

use thiserror::Error;

use crate::{FromUrl, FromUrlWithScheme, frame::RawFrame};

mod image_sequence;
mod read_image_file;

pub use self::image_sequence::{ImageSequenceInput, ImageSequenceInputError};
pub use self::read_image_file::{ImageFileInput, ImageFileInputError};

/// 帧源的播放状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceState {
  Playing,
  Paused,
  /// 宽度为 0 且没有流
  Closed,
}

/// 帧源
pub trait FrameSource {
  type Error;

  fn state(&self) -> SourceState;

  /// 当前帧；播放状态下同时前进到下一帧
  fn current_frame(&mut self) -> Result<Option<RawFrame>, Self::Error>;
}

#[derive(Error, Debug)]
pub enum InputError {
  #[error("图像文件输入错误: {0}")]
  ImageFileInputError(#[from] ImageFileInputError),
  #[error("图像序列输入错误: {0}")]
  ImageSequenceInputError(#[from] ImageSequenceInputError),
  #[error("URI 方案不匹配")]
  SchemeMismatch,
}

pub enum InputWrapper {
  ReadImageFile(ImageFileInput),
  ImageSequence(ImageSequenceInput),
}

impl FromUrl for InputWrapper {
  type Error = InputError;

  fn from_url(url: &url::Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      ImageFileInput::SCHEME => Ok(InputWrapper::ReadImageFile(ImageFileInput::from_url(url)?)),
      ImageSequenceInput::SCHEME => Ok(InputWrapper::ImageSequence(ImageSequenceInput::from_url(
        url,
      )?)),
      _ => Err(InputError::SchemeMismatch),
    }
  }
}

impl FrameSource for InputWrapper {
  type Error = InputError;

  fn state(&self) -> SourceState {
    match self {
      InputWrapper::ReadImageFile(input) => input.state(),
      InputWrapper::ImageSequence(input) => input.state(),
    }
  }

  fn current_frame(&mut self) -> Result<Option<RawFrame>, Self::Error> {
    match self {
      InputWrapper::ReadImageFile(input) => input.current_frame().map_err(InputError::from),
      InputWrapper::ImageSequence(input) => input.current_frame().map_err(InputError::from),
    }
  }
}
