// 该文件是 Chesun （车损巡检） 项目的一部分。
// src/bin/inspect.rs - 视频/图片车损巡检
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

use std::{path::PathBuf, time::Duration};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;
use url::Url;

use chesun::{
  FromUrl,
  config::{MaskPolarity, PipelineConfig},
  input::InputWrapper,
  model::{DamageModelOutput, LabelTable, OnnxModelBuilder, PartsModelOutput},
  output::{
    OutputWrapper, OutputWriter,
    draw::Draw,
    surface::RasterSurface,
  },
  pipeline::{Detectors, Session},
  task::FrameLoop,
};

/// Chesun 车损巡检参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 损伤分割模型，例如 onnx:///models/damage.onnx?size=640
  #[arg(long, value_name = "MODEL")]
  pub damage_model: Url,
  /// 损伤类别标签 (JSON 数组)
  #[arg(long, value_name = "LABELS")]
  pub damage_labels: PathBuf,
  /// 部件检测模型
  #[arg(long, value_name = "MODEL")]
  pub parts_model: Url,
  /// 部件类别标签 (JSON 数组)
  #[arg(long, value_name = "LABELS")]
  pub parts_labels: PathBuf,
  /// 输入来源: image:///path/to/car.jpg 或 frames:///path/to/dir?fps=25
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 输出路径: folder:///path/to/records 或 log://
  #[arg(long, value_name = "OUTPUT", default_value = "log://")]
  pub output: Url,

  #[arg(long, value_name = "FRAME_NUMBER")]
  pub frame_number: Option<usize>,

  /// 两帧之间的最小间隔（毫秒）
  #[arg(long, value_name = "MS", default_value_t = 40)]
  pub frame_delay: u64,

  #[arg(long, value_enum, default_value_t = MaskPolarity::Foreground)]
  pub mask_polarity: MaskPolarity,

  /// 标签字体文件，不指定时只绘制边框
  #[arg(long, value_name = "FONT")]
  pub font: Option<PathBuf>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .init();

  let args = Args::parse();

  info!("损伤模型: {}", args.damage_model);
  info!("部件模型: {}", args.parts_model);
  info!("输入来源: {}", args.input);
  info!("输出路径: {}", args.output);

  let detectors = Detectors {
    damage: OnnxModelBuilder::from_url(&args.damage_model)?.build::<DamageModelOutput>()?,
    parts: OnnxModelBuilder::from_url(&args.parts_model)?.build::<PartsModelOutput>()?,
    damage_labels: LabelTable::from_json_file(&args.damage_labels)
      .with_context(|| format!("无法加载损伤标签 {}", args.damage_labels.display()))?,
    parts_labels: LabelTable::from_json_file(&args.parts_labels)
      .with_context(|| format!("无法加载部件标签 {}", args.parts_labels.display()))?,
  };

  let frame_delay = Duration::from_millis(args.frame_delay);
  let config = PipelineConfig::default().with_mask_polarity(args.mask_polarity);

  let draw = match &args.font {
    Some(font) => Draw::default()
      .with_font_file(font)
      .with_context(|| format!("无法加载字体 {}", font.display()))?,
    None => Draw::default(),
  };

  let mut source = InputWrapper::from_url(&args.input)?;
  let mut output = OutputWrapper::from_url(&args.output)?;

  let mut session = Session::new(&detectors, config).with_draw(draw);
  let (canvas_w, canvas_h) = session.canvas_size();
  let mut display = RasterSurface::new(canvas_w, canvas_h);

  let mut frame_loop = FrameLoop::new(frame_delay).with_frame_number(args.frame_number);
  frame_loop.handle().install_ctrlc()?;

  let state = frame_loop
    .drive(&mut session, &mut source, &mut display)
    .await?;
  info!("帧循环结束: {:?}, 共处理 {} 帧", state, frame_loop.frames());

  for (index, record) in session.records().iter().enumerate() {
    output.write_record(index + 1, record)?;
  }
  output.finish()?;

  info!("任务完成，退出");
  Ok(())
}
