// 该文件是 Chesun （车损巡检） 项目的一部分。
// src/output/directory_record.rs - 会话记录目录输出
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

use chrono::{Datelike, Local};
use thiserror::Error;
use tracing::info;

use crate::{
  FromUrl, FromUrlWithScheme,
  output::{OutputWriter, SESSION_LOG_FILE},
  session::{DetectionRecord, SessionLogEntry},
};

#[derive(Error, Debug)]
pub enum DirectoryRecordOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("路径解码错误: {0}")]
  PathError(#[from] std::string::FromUtf8Error),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("序列化错误: {0}")]
  SerializeError(#[from] serde_json::Error),
}

/// 把会话记录写到 `<根目录>/<年>/<月>/<日>/<时-分-秒>/`
///
/// 每条记录一个 `snapshot-NNNN.jpg`，会话结束时写 `session.json`。
/// 查询参数 `always` 表示没有任何记录时也写出空的 `session.json`。
pub struct DirectoryRecordOutput {
  root: PathBuf,
  session_dir: Option<PathBuf>,
  entries: Vec<SessionLogEntry>,
  always: bool,
}

impl FromUrlWithScheme for DirectoryRecordOutput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn from_url(uri: &url::Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(DirectoryRecordOutputError::SchemeMismatch);
    }

    let always = uri.query_pairs().any(|(k, _)| k == "always");
    Ok(Self::new(crate::decoded_path(uri)?).always(always))
  }
}

impl DirectoryRecordOutput {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self {
      root: root.into(),
      session_dir: None,
      entries: Vec::new(),
      always: false,
    }
  }

  pub fn always(mut self, always: bool) -> Self {
    self.always = always;
    self
  }

  /// 本次会话的目录，第一次写入时创建
  pub fn session_directory(&self) -> Option<&Path> {
    self.session_dir.as_deref()
  }

  fn ensure_session_dir(&mut self) -> Result<PathBuf, DirectoryRecordOutputError> {
    if let Some(directory) = &self.session_dir {
      return Ok(directory.clone());
    }

    let now = Local::now();
    let directory = self
      .root
      .join(now.year().to_string())
      .join(format!("{:02}", now.month()))
      .join(format!("{:02}", now.day()))
      .join(now.format("%H-%M-%S").to_string());
    std::fs::create_dir_all(&directory)?;
    info!("会话记录目录: {}", directory.display());

    self.session_dir = Some(directory.clone());
    Ok(directory)
  }
}

impl OutputWriter for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn write_record(&mut self, index: usize, record: &DetectionRecord) -> Result<(), Self::Error> {
    let directory = self.ensure_session_dir()?;
    let filename = format!("snapshot-{:04}.jpg", index);
    std::fs::write(directory.join(&filename), &record.snapshot)?;

    self.entries.push(SessionLogEntry {
      timestamp: record.timestamp,
      parts: record.parts.clone(),
      snapshot: filename,
    });
    Ok(())
  }

  fn finish(&mut self) -> Result<(), Self::Error> {
    if self.entries.is_empty() && !self.always {
      info!("没有新的损伤记录");
      return Ok(());
    }

    let directory = self.ensure_session_dir()?;
    let path = directory.join(SESSION_LOG_FILE);
    std::fs::write(&path, serde_json::to_string_pretty(&self.entries)?)?;
    info!("写入会话记录 {} ({} 条)", path.display(), self.entries.len());
    Ok(())
  }
}
