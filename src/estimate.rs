// 该文件是 Chesun （车损巡检） 项目的一部分。
// src/estimate.rs - 损伤程度与维修费用评估
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

use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::session::DetectionRecord;

const ANSWER_TEMPLATE: &str = r#"[{
  FileName:"",
  Severity:"",
  Description:"",
  EstimationCost:"",
}]"#;

#[derive(Error, Debug)]
pub enum EstimateError {
  #[error("评估结果中没有 JSON 数组")]
  NoJsonArray,
  #[error("评估结果解析错误: {0}")]
  ParseError(#[from] serde_json::Error),
  #[error("评估服务错误: {0}")]
  Estimator(Box<dyn std::error::Error + Send + Sync>),
}

/// 单条记录的评估结果
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Assessment {
  #[serde(default)]
  pub file_name: String,
  #[serde(default)]
  pub severity: String,
  #[serde(default)]
  pub description: String,
  /// 费用可能以字符串或数字给出
  #[serde(default, deserialize_with = "string_or_number")]
  pub estimation_cost: String,
}

fn string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
  Ok(match Value::deserialize(deserializer)? {
    Value::String(text) => text,
    Value::Null => String::new(),
    other => other.to_string(),
  })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageSource {
  #[serde(rename = "type")]
  pub kind: String,
  pub media_type: String,
  pub data: String,
}

/// 评估请求中的一个内容块
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentBlock {
  Text { text: String },
  Image { source: ImageSource },
}

/// 评估提示词，按记录顺序列出全部部件
pub fn build_prompt(records: &[DetectionRecord]) -> String {
  let mut prompt = String::from("detect damage seviority of ");
  for part in records.iter().flat_map(|record| record.parts.iter()) {
    prompt.push_str(part);
    prompt.push(',');
  }
  prompt.push_str(&format!(
    "for given {} images and produce the array of json as below model, Answer in JSON format:\n{}",
    records.len(),
    ANSWER_TEMPLATE
  ));
  prompt
}

/// 提示词在前，之后每条记录一张 base64 JPEG
pub fn request_content(records: &[DetectionRecord]) -> Vec<ContentBlock> {
  let mut content = Vec::with_capacity(records.len() + 1);
  content.push(ContentBlock::Text {
    text: build_prompt(records),
  });
  content.extend(records.iter().map(|record| ContentBlock::Image {
    source: ImageSource {
      kind: "base64".to_string(),
      media_type: "image/jpeg".to_string(),
      data: STANDARD.encode(&record.snapshot),
    },
  }));
  content
}

/// 单条用户消息形式的请求
pub fn request_message(records: &[DetectionRecord]) -> Result<Value, EstimateError> {
  Ok(serde_json::json!({
    "role": "user",
    "content": serde_json::to_value(request_content(records))?,
  }))
}

/// 从评估文本中取出第一个 `[` 到最后一个 `]` 之间的 JSON 数组
pub fn parse_assessments(text: &str) -> Result<Vec<Assessment>, EstimateError> {
  let start = text.find('[').ok_or(EstimateError::NoJsonArray)?;
  let end = text.rfind(']').ok_or(EstimateError::NoJsonArray)?;
  if end < start {
    return Err(EstimateError::NoJsonArray);
  }
  let assessments: Vec<Assessment> = serde_json::from_str(&text[start..=end])?;
  debug!("解析到 {} 条评估结果", assessments.len());
  Ok(assessments)
}

/// 记录与其评估结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Assessed<T> {
  #[serde(flatten)]
  pub record: T,
  #[serde(flatten)]
  pub assessment: Option<Assessment>,
}

/// 按位置合并；多余的评估结果被丢弃，缺少评估的记录为 `None`
pub fn merge_assessments<T>(records: Vec<T>, assessments: Vec<Assessment>) -> Vec<Assessed<T>> {
  if assessments.len() > records.len() {
    warn!(
      "评估结果 {} 条多于记录 {} 条，多余部分被忽略",
      assessments.len(),
      records.len()
    );
  }

  let mut assessments = assessments.into_iter();
  records
    .into_iter()
    .map(|record| Assessed {
      record,
      assessment: assessments.next(),
    })
    .collect()
}

/// 外部评估服务
#[allow(async_fn_in_trait)]
pub trait SeverityEstimator {
  type Error;

  /// 返回服务的原始文本回答
  async fn estimate(&self, content: Vec<ContentBlock>) -> Result<String, Self::Error>;
}

/// 请求评估并解析结果，顺序与记录一致
pub async fn assess<E>(estimator: &E, records: &[DetectionRecord]) -> Result<Vec<Assessment>, EstimateError>
where
  E: SeverityEstimator,
  E::Error: std::error::Error + Send + Sync + 'static,
{
  let answer = estimator
    .estimate(request_content(records))
    .await
    .map_err(|e| EstimateError::Estimator(Box::new(e)))?;
  parse_assessments(&answer)
}
