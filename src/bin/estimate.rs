// 该文件是 Chesun （车损巡检） 项目的一部分。
// src/bin/estimate.rs - 会话记录评估请求与结果合并
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

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use chesun::{
  estimate::{merge_assessments, parse_assessments, request_message},
  output::read_session_log,
  session::DetectionRecord,
};

/// Chesun 会话记录评估工具
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  #[command(subcommand)]
  pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
  /// 根据会话目录生成评估请求消息
  Request {
    /// 包含 session.json 的会话目录
    #[arg(long, value_name = "SESSION")]
    session: PathBuf,
    /// 输出文件，不指定时写到标准输出
    #[arg(long, value_name = "OUTPUT")]
    output: Option<PathBuf>,
  },
  /// 把评估服务的回答按顺序合并到会话记录
  Merge {
    #[arg(long, value_name = "SESSION")]
    session: PathBuf,
    /// 评估服务返回的文本
    #[arg(long, value_name = "RESPONSE")]
    response: PathBuf,
    #[arg(long, value_name = "OUTPUT")]
    output: Option<PathBuf>,
  },
}

fn emit(text: &str, output: Option<&Path>) -> Result<()> {
  match output {
    Some(path) => {
      std::fs::write(path, text).with_context(|| format!("无法写入 {}", path.display()))?;
      info!("已写入 {}", path.display());
    }
    None => println!("{}", text),
  }
  Ok(())
}

fn load_records(session: &Path) -> Result<Vec<DetectionRecord>> {
  let entries = read_session_log(session)
    .with_context(|| format!("无法读取会话记录 {}", session.display()))?;
  entries
    .into_iter()
    .map(|entry| {
      let path = session.join(&entry.snapshot);
      let snapshot =
        std::fs::read(&path).with_context(|| format!("无法读取快照 {}", path.display()))?;
      Ok(DetectionRecord {
        timestamp: entry.timestamp,
        parts: entry.parts,
        snapshot,
      })
    })
    .collect()
}

fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .init();

  let args = Args::parse();

  match args.command {
    Command::Request { session, output } => {
      let records = load_records(&session)?;
      info!("会话记录 {} 条", records.len());
      let message = request_message(&records)?;
      emit(&serde_json::to_string_pretty(&message)?, output.as_deref())?;
    }
    Command::Merge {
      session,
      response,
      output,
    } => {
      let entries = read_session_log(&session)
        .with_context(|| format!("无法读取会话记录 {}", session.display()))?;
      let text = std::fs::read_to_string(&response)
        .with_context(|| format!("无法读取评估结果 {}", response.display()))?;
      let assessments = parse_assessments(&text)?;
      info!("会话记录 {} 条，评估结果 {} 条", entries.len(), assessments.len());

      let merged = merge_assessments(entries, assessments);
      emit(&serde_json::to_string_pretty(&merged)?, output.as_deref())?;
    }
  }

  Ok(())
}
