// 该文件是 Chesun （车损巡检） 项目的一部分。
// src/output.rs - 输出定义
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

use thiserror::Error;
use tracing::info;
use url::Url;

#[cfg(feature = "directory_record")]
use crate::FromUrlWithScheme;
use crate::{
  FromUrl,
  session::{DetectionRecord, SessionLogEntry},
};

pub mod draw;
pub mod surface;

#[cfg(feature = "directory_record")]
mod directory_record;
#[cfg(feature = "directory_record")]
pub use self::directory_record::{DirectoryRecordOutput, DirectoryRecordOutputError};

/// 会话记录文件名
pub const SESSION_LOG_FILE: &str = "session.json";

/// 会话记录的持久化目标
pub trait OutputWriter {
  type Error;

  fn write_record(&mut self, index: usize, record: &DetectionRecord) -> Result<(), Self::Error>;

  /// 会话结束时调用
  fn finish(&mut self) -> Result<(), Self::Error>;
}

#[derive(Error, Debug)]
pub enum OutputError {
  #[cfg(feature = "directory_record")]
  #[error("目录记录输出错误: {0}")]
  DirectoryRecordOutputError(#[from] DirectoryRecordOutputError),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("会话记录解析错误: {0}")]
  ParseError(#[from] serde_json::Error),
  #[error("URI 方案不匹配")]
  SchemeMismatch,
}

/// 只写日志，不落盘
#[derive(Debug, Default)]
pub struct LogOutput {
  written: usize,
}

impl LogOutput {
  pub const SCHEME: &'static str = "log";
}

impl OutputWriter for LogOutput {
  type Error = OutputError;

  fn write_record(&mut self, index: usize, record: &DetectionRecord) -> Result<(), Self::Error> {
    info!(
      "记录 #{} @ {:.2}s: {} (快照 {} 字节)",
      index,
      record.timestamp,
      record.parts.join(", "),
      record.snapshot.len()
    );
    self.written += 1;
    Ok(())
  }

  fn finish(&mut self) -> Result<(), Self::Error> {
    info!("会话结束，共 {} 条记录", self.written);
    Ok(())
  }
}

pub enum OutputWrapper {
  #[cfg(feature = "directory_record")]
  DirectoryRecordOutput(DirectoryRecordOutput),
  LogOutput(LogOutput),
}

impl FromUrl for OutputWrapper {
  type Error = OutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      #[cfg(feature = "directory_record")]
      DirectoryRecordOutput::SCHEME => {
        let output = DirectoryRecordOutput::from_url(url)?;
        Ok(OutputWrapper::DirectoryRecordOutput(output))
      }
      LogOutput::SCHEME => Ok(OutputWrapper::LogOutput(LogOutput::default())),
      _ => Err(OutputError::SchemeMismatch),
    }
  }
}

impl OutputWriter for OutputWrapper {
  type Error = OutputError;

  fn write_record(&mut self, index: usize, record: &DetectionRecord) -> Result<(), Self::Error> {
    match self {
      #[cfg(feature = "directory_record")]
      OutputWrapper::DirectoryRecordOutput(output) => output
        .write_record(index, record)
        .map_err(OutputError::from),
      OutputWrapper::LogOutput(output) => output.write_record(index, record),
    }
  }

  fn finish(&mut self) -> Result<(), Self::Error> {
    match self {
      #[cfg(feature = "directory_record")]
      OutputWrapper::DirectoryRecordOutput(output) => output.finish().map_err(OutputError::from),
      OutputWrapper::LogOutput(output) => output.finish(),
    }
  }
}

/// 读取会话目录中的 `session.json`
pub fn read_session_log(directory: impl AsRef<Path>) -> Result<Vec<SessionLogEntry>, OutputError> {
  let text = std::fs::read_to_string(directory.as_ref().join(SESSION_LOG_FILE))?;
  Ok(serde_json::from_str(&text)?)
}
