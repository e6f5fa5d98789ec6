// 该文件是 Chesun （车损巡检） 项目的一部分。
// src/session.rs - 巡检会话与去重记录
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

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::info;

/// 一次 “新部件出现损伤” 记录，写入后不再修改
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionRecord {
  /// 帧时间戳（秒）
  pub timestamp: f64,
  pub parts: Vec<String>,
  /// JPEG 快照
  #[serde(skip)]
  pub snapshot: Vec<u8>,
}

/// 落盘后的会话记录条目，快照以文件名引用
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionLogEntry {
  pub timestamp: f64,
  pub parts: Vec<String>,
  pub snapshot: String,
}

#[derive(Debug, Default)]
pub struct SessionState {
  seen: HashSet<String>,
  log: Vec<DetectionRecord>,
}

impl SessionState {
  pub fn new() -> Self {
    Self::default()
  }

  /// 开始新的会话
  pub fn reset(&mut self) {
    self.seen.clear();
    self.log.clear();
  }

  pub fn records(&self) -> &[DetectionRecord] {
    &self.log
  }

  pub fn into_records(self) -> Vec<DetectionRecord> {
    self.log
  }

  pub fn has_seen(&self, name: &str) -> bool {
    self.seen.contains(name)
  }

  /// 本会话尚未记录过的部件名，按首次出现顺序，帧内重复只保留一个
  pub fn unseen<'a>(&self, names: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    let mut fresh: Vec<String> = Vec::new();
    for name in names {
      if !self.seen.contains(name) && !fresh.iter().any(|n| n == name) {
        fresh.push(name.to_string());
      }
    }
    fresh
  }

  /// 记录新出现的部件
  ///
  /// 没有新部件时返回 `None` 且不调用 `render`；否则渲染快照、追加记录并更新已见集合。
  pub fn admit<'a, E>(
    &mut self,
    timestamp: f64,
    names: impl IntoIterator<Item = &'a str>,
    render: impl FnOnce(&[String]) -> Result<Vec<u8>, E>,
  ) -> Result<Option<&DetectionRecord>, E> {
    let parts = self.unseen(names);
    if parts.is_empty() {
      return Ok(None);
    }

    let snapshot = render(&parts)?;
    info!("{:.2}s 发现新损伤部件: {}", timestamp, parts.join(", "));

    self.seen.extend(parts.iter().cloned());
    self.log.push(DetectionRecord {
      timestamp,
      parts,
      snapshot,
    });
    Ok(self.log.last())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::convert::Infallible;

  fn jpeg(_: &[String]) -> Result<Vec<u8>, Infallible> {
    Ok(vec![0xFF, 0xD8])
  }

  #[test]
  fn collapses_duplicates_within_a_frame() {
    let mut state = SessionState::new();
    let record = state
      .admit(0.5, ["hood", "door", "hood"], jpeg)
      .unwrap()
      .cloned()
      .unwrap();
    assert_eq!(record.parts, vec!["hood", "door"]);
    assert_eq!(record.snapshot, vec![0xFF, 0xD8]);
  }

  #[test]
  fn skips_render_when_nothing_is_new() {
    let mut state = SessionState::new();
    state.admit(0.0, ["hood"], jpeg).unwrap();
    let result: Result<_, Infallible> = state.admit(1.0, ["hood"], |_| panic!("不应渲染快照"));
    assert!(result.unwrap().is_none());
    assert_eq!(state.records().len(), 1);
  }

  #[test]
  fn render_failure_leaves_state_untouched() {
    let mut state = SessionState::new();
    let result = state.admit(0.0, ["hood"], |_| Err("encode failed"));
    assert_eq!(result.unwrap_err(), "encode failed");
    assert!(state.records().is_empty());
    assert!(!state.has_seen("hood"));
  }

  #[test]
  fn reset_starts_a_new_session() {
    let mut state = SessionState::new();
    state.admit(0.0, ["hood"], jpeg).unwrap();
    state.reset();
    assert!(state.records().is_empty());
    assert!(state.admit(1.0, ["hood"], jpeg).unwrap().is_some());
  }

  #[test]
  fn record_serializes_without_snapshot_bytes() {
    let record = DetectionRecord {
      timestamp: 2.0,
      parts: vec!["hood".to_string()],
      snapshot: vec![1, 2, 3],
    };
    let json = serde_json::to_value(&record).unwrap();
    assert_eq!(json, serde_json::json!({ "timestamp": 2.0, "parts": ["hood"] }));
  }
}
