// 该文件是 Chesun （车损巡检） 项目的一部分。
// src/model/decode.rs - 检测头解码
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

use ndarray::{Array2, ArrayView2, ArrayView3, ArrayView4, Axis, s};
use thiserror::Error;
use tracing::debug;

use crate::model::{BBox, DetectItem, LabelTable};

const BOX_CHANNELS: usize = 4;

#[derive(Error, Debug)]
pub enum DecodeError {
  #[error("输出张量形状不匹配: 期望 {expected}, 实际 {actual:?}")]
  Shape {
    expected: String,
    actual: Vec<usize>,
  },
}

impl DecodeError {
  fn shape(expected: impl Into<String>, actual: &[usize]) -> Self {
    DecodeError::Shape {
      expected: expected.into(),
      actual: actual.to_vec(),
    }
  }
}

/// 解码后的候选框，三个数组按检测序号一一对应
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Decoded {
  pub boxes: Vec<BBox>,
  pub scores: Vec<f32>,
  pub class_ids: Vec<u32>,
}

impl Decoded {
  pub fn len(&self) -> usize {
    self.boxes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.boxes.is_empty()
  }

  /// 按 NMS 保留的序号取出检测结果
  pub fn gather(&self, keep: &[usize], labels: &LabelTable) -> Vec<DetectItem> {
    keep
      .iter()
      .map(|&idx| {
        let class_id = self.class_ids[idx];
        DetectItem {
          class_id,
          label: labels.name(class_id).to_string(),
          score: self.scores[idx],
          bbox: self.boxes[idx],
        }
      })
      .collect()
  }
}

/// 去掉 batch 维度: [1, N, C] -> [N, C]
pub fn squeeze_head(head: ArrayView3<'_, f32>) -> Result<ArrayView2<'_, f32>, DecodeError> {
  if head.shape()[0] != 1 {
    return Err(DecodeError::shape("[1, N, C]", head.shape()));
  }
  Ok(head.index_axis_move(Axis(0), 0))
}

/// 原型掩码: [1, segH, segW, mc] -> [mc, segH, segW]
pub fn prototype_view(protos: ArrayView4<'_, f32>) -> Result<ArrayView3<'_, f32>, DecodeError> {
  if protos.shape()[0] != 1 {
    return Err(DecodeError::shape("[1, segH, segW, mc]", protos.shape()));
  }
  Ok(protos.index_axis_move(Axis(0), 0).permuted_axes([2, 0, 1]))
}

/// 校验检测头通道数是否等于 4 + 类别数 + 额外通道数
pub fn expect_channels(
  head: ArrayView2<'_, f32>,
  num_classes: usize,
  extra: usize,
) -> Result<(), DecodeError> {
  let expected = BOX_CHANNELS + num_classes + extra;
  if head.ncols() != expected {
    return Err(DecodeError::shape(
      format!("[N, {}] (4 + {} + {})", expected, num_classes, extra),
      head.shape(),
    ));
  }
  Ok(())
}

/// 解码 [N, 4 + 类别数 (+ 掩码通道)] 的检测头
///
/// 前四个通道为中心形式 (cx, cy, w, h)，分数取类别通道最大值，类别取其下标。
pub fn decode_head(head: ArrayView2<'_, f32>, num_classes: usize) -> Result<Decoded, DecodeError> {
  if num_classes == 0 || head.ncols() < BOX_CHANNELS + num_classes {
    return Err(DecodeError::shape(
      format!("[N, >= {}]", BOX_CHANNELS + num_classes),
      head.shape(),
    ));
  }

  let num_detections = head.nrows();
  let mut decoded = Decoded {
    boxes: Vec::with_capacity(num_detections),
    scores: Vec::with_capacity(num_detections),
    class_ids: Vec::with_capacity(num_detections),
  };

  for row in head.outer_iter() {
    decoded
      .boxes
      .push(BBox::from_center(row[0], row[1], row[2], row[3]));

    let (class_id, score) = row
      .slice(s![BOX_CHANNELS..BOX_CHANNELS + num_classes])
      .iter()
      .enumerate()
      .fold((0usize, f32::NEG_INFINITY), |best, (idx, &value)| {
        if value > best.1 { (idx, value) } else { best }
      });
    decoded.scores.push(score);
    decoded.class_ids.push(class_id as u32);
  }

  debug!("解码 {} 个候选框", decoded.len());
  Ok(decoded)
}

/// 取出保留检测的掩码系数，形状 [保留数, mc]
pub fn mask_coefficients(
  head: ArrayView2<'_, f32>,
  num_classes: usize,
  mask_channels: usize,
  keep: &[usize],
) -> Result<Array2<f32>, DecodeError> {
  let start = BOX_CHANNELS + num_classes;
  if head.ncols() < start + mask_channels {
    return Err(DecodeError::shape(
      format!("[N, >= {}]", start + mask_channels),
      head.shape(),
    ));
  }
  let coefficients = head.slice(s![.., start..start + mask_channels]);
  Ok(coefficients.select(Axis(0), keep))
}

#[cfg(test)]
mod tests {
  use super::*;
  use ndarray::{Array3, Array4, array};

  #[test]
  fn decodes_boxes_scores_and_classes() {
    let head = array![
      [50.0, 40.0, 20.0, 10.0, 0.1, 0.7, 0.3],
      [10.0, 10.0, 4.0, 4.0, 0.6, 0.6, 0.2],
    ];
    let decoded = decode_head(head.view(), 3).unwrap();
    assert_eq!(decoded.boxes[0], BBox::new(35.0, 40.0, 45.0, 60.0));
    assert_eq!(decoded.scores, vec![0.7, 0.6]);
    // 同分取第一个
    assert_eq!(decoded.class_ids, vec![1, 0]);
  }

  #[test]
  fn rejects_heads_narrower_than_the_label_table() {
    let head = Array2::<f32>::zeros((3, 5));
    assert!(decode_head(head.view(), 2).is_err());
    assert!(expect_channels(head.view(), 1, 0).is_ok());
    assert!(expect_channels(head.view(), 1, 1).is_err());
  }

  #[test]
  fn squeezes_batch_and_gathers_coefficients() {
    let head = Array3::from_shape_fn((1, 3, 7), |(_, n, c)| (n * 10 + c) as f32);
    let view = squeeze_head(head.view()).unwrap();
    let coefficients = mask_coefficients(view, 1, 2, &[2, 0]).unwrap();
    assert_eq!(coefficients, array![[25.0, 26.0], [5.0, 6.0]]);
  }

  #[test]
  fn prototype_view_moves_channels_first() {
    let protos = Array4::from_shape_fn((1, 2, 3, 4), |(_, y, x, c)| (y * 100 + x * 10 + c) as f32);
    let view = prototype_view(protos.view()).unwrap();
    assert_eq!(view.shape(), &[4, 2, 3]);
    assert_eq!(view[[3, 1, 2]], 123.0);
  }
}
