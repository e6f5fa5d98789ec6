mod common;

use std::{convert::Infallible, time::Duration};

use chesun::{
  config::PipelineConfig,
  frame::RawFrame,
  input::{FrameSource, SourceState},
  output::surface::{DrawingSurface, RasterSurface},
  pipeline::Session,
  task::{FrameLoop, LoopState, TaskError},
};
use image::Rgb;
use imageproc::rect::Rect;

use common::*;

/// 内存中的帧序列
struct VecSource {
  frames: Vec<RawFrame>,
  position: usize,
  paused: bool,
}

impl VecSource {
  fn playing(count: usize) -> Self {
    Self {
      frames: (0..count).map(|i| frame(i as f64 * 0.04)).collect(),
      position: 0,
      paused: false,
    }
  }

  fn paused(count: usize) -> Self {
    Self {
      paused: true,
      ..Self::playing(count)
    }
  }
}

impl FrameSource for VecSource {
  type Error = Infallible;

  fn state(&self) -> SourceState {
    if self.position >= self.frames.len() {
      SourceState::Closed
    } else if self.paused {
      SourceState::Paused
    } else {
      SourceState::Playing
    }
  }

  fn current_frame(&mut self) -> Result<Option<RawFrame>, Self::Error> {
    let frame = self.frames.get(self.position).cloned();
    if !self.paused {
      self.position += 1;
    }
    Ok(frame)
  }
}

#[tokio::test(start_paused = true)]
async fn playing_source_is_processed_at_the_frame_delay() {
  let detectors = detectors(
    FixedModel::new(damage_output(&[dent_row()])),
    FixedModel::new(parts_output(&[hood_row()])),
  );
  let mut session = Session::new(&detectors, PipelineConfig::default());
  let mut display = RasterSurface::new(MODEL_SIZE, MODEL_SIZE);
  let mut source = VecSource::playing(3);
  let mut frame_loop = FrameLoop::new(Duration::from_millis(40));

  let start = tokio::time::Instant::now();
  let state = frame_loop
    .drive(&mut session, &mut source, &mut display)
    .await
    .unwrap();

  assert_eq!(state, LoopState::Stopped);
  assert_eq!(frame_loop.frames(), 3);
  assert!(start.elapsed() >= Duration::from_millis(120));
  assert_eq!(session.records().len(), 1);
  // 帧源关闭后显示画布被清空
  assert!(display.is_blank());
}

#[tokio::test(start_paused = true)]
async fn paused_source_runs_one_pass_then_idles() {
  let detectors = detectors(
    FixedModel::new(damage_output(&[dent_row()])),
    FixedModel::new(parts_output(&[hood_row()])),
  );
  let mut session = Session::new(&detectors, PipelineConfig::default());
  let mut display = RasterSurface::new(MODEL_SIZE, MODEL_SIZE);
  let mut source = VecSource::paused(3);
  let mut frame_loop = FrameLoop::default();

  let state = frame_loop
    .drive(&mut session, &mut source, &mut display)
    .await
    .unwrap();
  assert_eq!(state, LoopState::Idle);
  assert_eq!(frame_loop.frames(), 1);
  assert!(!display.is_blank());

  // 跳转后再次调度
  source.position = 2;
  frame_loop
    .drive(&mut session, &mut source, &mut display)
    .await
    .unwrap();
  assert_eq!(frame_loop.frames(), 2);
}

#[tokio::test]
async fn concurrent_pass_is_rejected() {
  let detectors = detectors(
    FixedModel::new(damage_output(&[dent_row()])),
    FixedModel::new(parts_output(&[hood_row()])),
  );
  let mut session = Session::new(&detectors, PipelineConfig::default());
  let mut display = RasterSurface::new(MODEL_SIZE, MODEL_SIZE);
  let mut frame_loop = FrameLoop::default();

  let handle = frame_loop.handle();
  let in_flight = handle.try_begin().unwrap();
  let result = frame_loop.run_still(&mut session, &frame(0.0), &mut display).await;
  assert!(matches!(result, Err(TaskError::Busy)));
  assert_eq!(detectors.damage.calls(), 0);

  drop(in_flight);
  let report = frame_loop
    .run_still(&mut session, &frame(0.0), &mut display)
    .await
    .unwrap();
  assert_eq!(report.record, Some(0));
  assert_eq!(frame_loop.state(), LoopState::Idle);
}

#[tokio::test(start_paused = true)]
async fn model_failure_stops_the_loop() {
  let detectors = detectors(FailingModel, FixedModel::new(parts_output(&[hood_row()])));
  let mut session = Session::new(&detectors, PipelineConfig::default());
  let mut display = RasterSurface::new(MODEL_SIZE, MODEL_SIZE);
  let mut source = VecSource::playing(5);
  let mut frame_loop = FrameLoop::default();

  let result = frame_loop.drive(&mut session, &mut source, &mut display).await;
  assert!(matches!(result, Err(TaskError::Pipeline(_))));
  assert_eq!(frame_loop.state(), LoopState::Stopped);
  assert_eq!(frame_loop.frames(), 1);
  assert!(!frame_loop.handle().is_busy());
}

#[tokio::test(start_paused = true)]
async fn stop_request_ends_scheduling() {
  let detectors = detectors(
    FixedModel::new(damage_output(&[dent_row()])),
    FixedModel::new(parts_output(&[hood_row()])),
  );
  let mut session = Session::new(&detectors, PipelineConfig::default());
  let mut display = RasterSurface::new(MODEL_SIZE, MODEL_SIZE);
  let mut source = VecSource::playing(5);
  let mut frame_loop = FrameLoop::default().with_frame_number(Some(2));

  let state = frame_loop
    .drive(&mut session, &mut source, &mut display)
    .await
    .unwrap();
  assert_eq!(state, LoopState::Stopped);
  assert_eq!(frame_loop.frames(), 2);

  frame_loop.handle().stop();
  let state = frame_loop
    .drive(&mut session, &mut source, &mut display)
    .await
    .unwrap();
  assert_eq!(state, LoopState::Stopped);
  assert_eq!(frame_loop.frames(), 2);
}

#[tokio::test]
async fn closed_source_clears_the_display() {
  let detectors = detectors(
    FixedModel::new(damage_output(&[dent_row()])),
    FixedModel::new(parts_output(&[hood_row()])),
  );
  let mut session = Session::new(&detectors, PipelineConfig::default());
  let mut display = RasterSurface::new(MODEL_SIZE, MODEL_SIZE);
  display.fill_rect(Rect::at(0, 0).of_size(4, 4), Rgb([1, 2, 3]), 1.0);
  let mut source = VecSource::playing(0);
  let mut frame_loop = FrameLoop::default();

  let state = frame_loop
    .drive(&mut session, &mut source, &mut display)
    .await
    .unwrap();
  assert_eq!(state, LoopState::Stopped);
  assert_eq!(frame_loop.frames(), 0);
  assert!(display.is_blank());
}
