// 该文件是 Chesun （车损巡检） 项目的一部分。
// src/model/nms.rs - 非极大值抑制
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

use tracing::debug;

use crate::{config::NmsParams, model::BBox};

/// 贪心 NMS，返回保留的候选序号（按分数降序）
///
/// 分数低于阈值的候选直接丢弃；与已保留框 IoU 超过阈值的候选被抑制。
pub fn greedy_nms(boxes: &[BBox], scores: &[f32], params: &NmsParams) -> Vec<usize> {
  let mut order: Vec<usize> = (0..boxes.len().min(scores.len()))
    .filter(|&idx| scores[idx] >= params.score_threshold)
    .collect();
  order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));

  let mut suppressed = vec![false; order.len()];
  let mut keep = Vec::new();

  for (rank, &candidate) in order.iter().enumerate() {
    if keep.len() >= params.max_output {
      break;
    }
    if suppressed[rank] {
      continue;
    }
    keep.push(candidate);

    for (other_rank, &other) in order.iter().enumerate().skip(rank + 1) {
      if !suppressed[other_rank] && boxes[candidate].iou(&boxes[other]) > params.iou_threshold {
        suppressed[other_rank] = true;
      }
    }
  }

  debug!("NMS: {} 个候选 -> {} 个保留", order.len(), keep.len());
  keep
}

/// 让出执行权后运行 NMS
pub async fn non_max_suppression(boxes: &[BBox], scores: &[f32], params: &NmsParams) -> Vec<usize> {
  tokio::task::yield_now().await;
  greedy_nms(boxes, scores, params)
}
