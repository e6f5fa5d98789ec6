// 该文件是 Chesun （车损巡检） 项目的一部分。
// src/correlate.rs - 部件与损伤关联
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

use crate::{
  mask::DamagePixelSet,
  model::{BBox, DetectItem},
};

/// 一个部件框与损伤像素的重叠度量
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Overlap {
  /// 落在框内（含边界）的损伤像素数
  pub pixel_count: usize,
  pub box_area: f32,
  /// pixel_count / box_area * 100
  pub box_overlap_pct: f32,
  /// 所有损伤像素都在框内
  pub fully_contained: bool,
  /// pixel_count / |P| * 100
  pub damage_coverage_pct: f32,
}

impl Overlap {
  pub fn touches(&self, threshold_pct: f32) -> bool {
    self.box_overlap_pct > threshold_pct
      || self.fully_contained
      || self.damage_coverage_pct > threshold_pct
  }
}

/// 计算重叠度量；退化框返回 `None`
///
/// 空像素集视为完全包含于任意非退化框内。
pub fn measure(bbox: &BBox, pixels: &DamagePixelSet) -> Option<Overlap> {
  if bbox.is_degenerate() {
    return None;
  }

  let pixel_count = pixels
    .iter()
    .filter(|&&(x, y)| bbox.contains(x as f32, y as f32))
    .count();
  let box_area = bbox.area();

  Some(Overlap {
    pixel_count,
    box_area,
    box_overlap_pct: pixel_count as f32 / box_area * 100.0,
    fully_contained: pixel_count == pixels.len(),
    damage_coverage_pct: if pixels.is_empty() {
      0.0
    } else {
      pixel_count as f32 / pixels.len() as f32 * 100.0
    },
  })
}

/// 保留与损伤区域相交的部件，保持输入顺序
///
/// `parts` 的边框须与 `pixels` 处于同一画布坐标系。
pub fn correlate(parts: &[DetectItem], pixels: &DamagePixelSet, threshold_pct: f32) -> Vec<DetectItem> {
  parts
    .iter()
    .filter(|part| match measure(&part.bbox, pixels) {
      Some(overlap) => {
        let keep = overlap.touches(threshold_pct);
        debug!(
          "部件 {}: 框内损伤像素 {}, 框占比 {:.1}%, 损伤占比 {:.1}%, 保留 {}",
          part.label, overlap.pixel_count, overlap.box_overlap_pct, overlap.damage_coverage_pct, keep
        );
        keep
      }
      None => false,
    })
    .cloned()
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;

  fn part(label: &str, bbox: BBox) -> DetectItem {
    DetectItem {
      class_id: 0,
      label: label.to_string(),
      score: 0.8,
      bbox,
    }
  }

  fn square(x0: u32, y0: u32, side: u32) -> DamagePixelSet {
    let points = (y0..y0 + side)
      .flat_map(|y| (x0..x0 + side).map(move |x| (x, y)))
      .collect();
    DamagePixelSet::from_points(points)
  }

  #[test]
  fn measures_inclusive_bounds() {
    let pixels = square(0, 0, 4);
    let overlap = measure(&BBox::new(0.0, 0.0, 1.0, 1.0), &pixels).unwrap();
    assert_eq!(overlap.pixel_count, 4);
    assert_eq!(overlap.box_area, 1.0);
    assert!(!overlap.fully_contained);
    assert_eq!(overlap.damage_coverage_pct, 25.0);
  }

  #[test]
  fn empty_pixels_are_contained_in_every_box() {
    let empty = DamagePixelSet::from_points(Vec::new());
    let hood = BBox::new(0.0, 0.0, 10.0, 10.0);
    let overlap = measure(&hood, &empty).unwrap();
    assert_eq!(overlap.pixel_count, 0);
    assert!(overlap.fully_contained);
    assert_eq!(overlap.damage_coverage_pct, 0.0);
    assert_eq!(overlap.box_overlap_pct, 0.0);

    let parts = [part("hood", hood), part("door", BBox::new(10.0, 10.0, 0.0, 0.0))];
    let kept = correlate(&parts, &empty, 20.0);
    assert_eq!(kept.len(), 1);
    assert_eq!(kept[0].label, "hood");
  }

  #[test]
  fn degenerate_boxes_retain_nothing() {
    let pixels = square(0, 0, 4);
    let flipped = [part("door", BBox::new(10.0, 10.0, 0.0, 0.0))];
    assert!(correlate(&flipped, &pixels, 20.0).is_empty());
  }

  #[test]
  fn keeps_input_order() {
    let pixels = square(10, 10, 10);
    let parts = [
      part("hood", BBox::new(0.0, 0.0, 100.0, 100.0)),
      part("wheel", BBox::new(200.0, 200.0, 220.0, 220.0)),
      part("door", BBox::new(12.0, 12.0, 18.0, 18.0)),
    ];
    let kept: Vec<String> = correlate(&parts, &pixels, 20.0)
      .into_iter()
      .map(|item| item.label)
      .collect();
    assert_eq!(kept, vec!["hood", "door"]);
  }
}
