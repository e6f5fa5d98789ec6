// 该文件是 Chesun （车损巡检） 项目的一部分。
// src/task.rs - 帧循环调度
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

use std::{
  sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
  },
  thread,
  time::Duration,
};

use thiserror::Error;
use tracing::{info, warn};

use crate::{
  config::FRAME_DELAY,
  frame::RawFrame,
  input::{FrameSource, SourceState},
  model::{DamageModelOutput, Model, PartsModelOutput},
  output::surface::DrawingSurface,
  pipeline::{FrameReport, PipelineError, Session},
};

#[derive(Error, Debug)]
pub enum TaskError {
  #[error("上一帧仍在处理中")]
  Busy,
  #[error("流水线错误: {0}")]
  Pipeline(#[from] PipelineError),
  #[error("帧源错误: {0}")]
  Source(Box<dyn std::error::Error + Send + Sync>),
}

/// 帧循环状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoopState {
  #[default]
  Idle,
  Running,
  /// 播放中，等待下一帧
  ScheduledNext,
  Stopped,
}

/// 处理中标记，离开作用域时清除
pub struct InFlight<'a> {
  flag: &'a AtomicBool,
}

impl Drop for InFlight<'_> {
  fn drop(&mut self) {
    self.flag.store(false, Ordering::Release);
  }
}

/// 帧循环的共享句柄：停止请求与处理中标记
#[derive(Debug, Clone, Default)]
pub struct LoopHandle {
  stop: Arc<AtomicBool>,
  busy: Arc<AtomicBool>,
}

impl LoopHandle {
  /// 当前处理结束后不再调度下一帧
  pub fn stop(&self) {
    self.stop.store(true, Ordering::Release);
  }

  pub fn is_stopped(&self) -> bool {
    self.stop.load(Ordering::Acquire)
  }

  pub fn is_busy(&self) -> bool {
    self.busy.load(Ordering::Acquire)
  }

  /// 标记开始处理一帧；已有处理中的帧时返回 `None`
  pub fn try_begin(&self) -> Option<InFlight<'_>> {
    self
      .busy
      .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
      .ok()
      .map(|_| InFlight { flag: &self.busy })
  }

  /// Ctrl-C 时请求停止，30 秒后仍未退出则强制退出
  pub fn install_ctrlc(&self) -> Result<(), ctrlc::Error> {
    let handle = self.clone();
    ctrlc::set_handler(move || {
      info!("收到中断信号，准备退出...");
      handle.stop();
      thread::spawn(|| {
        thread::sleep(Duration::from_secs(30));
        warn!("强制退出程序");
        std::process::exit(1);
      });
    })
  }
}

pub struct FrameLoop {
  frame_delay: Duration,
  frame_number: Option<usize>,
  state: LoopState,
  frames: usize,
  handle: LoopHandle,
}

impl Default for FrameLoop {
  fn default() -> Self {
    Self::new(FRAME_DELAY)
  }
}

impl FrameLoop {
  pub fn new(frame_delay: Duration) -> Self {
    Self {
      frame_delay,
      frame_number: None,
      state: LoopState::Idle,
      frames: 0,
      handle: LoopHandle::default(),
    }
  }

  /// 处理指定帧数后停止
  pub fn with_frame_number(mut self, frame_number: Option<usize>) -> Self {
    self.frame_number = frame_number;
    self
  }

  pub fn with_handle(mut self, handle: LoopHandle) -> Self {
    self.handle = handle;
    self
  }

  pub fn handle(&self) -> LoopHandle {
    self.handle.clone()
  }

  pub fn state(&self) -> LoopState {
    self.state
  }

  /// 已处理的帧数
  pub fn frames(&self) -> usize {
    self.frames
  }

  /// 播放状态下两帧之间的最小间隔
  pub fn frame_delay(&self) -> Duration {
    self.frame_delay
  }

  fn fail(&mut self, err: TaskError) -> TaskError {
    warn!("帧循环因错误停止: {}", err);
    self.state = LoopState::Stopped;
    err
  }

  async fn pass<D, P, S>(
    &mut self,
    session: &mut Session<'_, D, P>,
    frame: &RawFrame,
    display: &mut S,
  ) -> Result<FrameReport, TaskError>
  where
    D: Model<Output = DamageModelOutput>,
    D::Error: std::error::Error + Send + Sync + 'static,
    P: Model<Output = PartsModelOutput>,
    P::Error: std::error::Error + Send + Sync + 'static,
    S: DrawingSurface,
  {
    let handle = self.handle.clone();
    let Some(_in_flight) = handle.try_begin() else {
      warn!("上一帧仍在处理中，拒绝本次调度");
      return Err(TaskError::Busy);
    };

    self.state = LoopState::Running;
    self.frames += 1;
    info!("处理第 {} 帧图像 ({:.2}s)", self.frames, frame.timestamp());
    match session.detect_frame(frame, display).await {
      Ok(report) => Ok(report),
      Err(e) => Err(self.fail(e.into())),
    }
  }

  /// 对单张图片执行一次检测
  pub async fn run_still<D, P, S>(
    &mut self,
    session: &mut Session<'_, D, P>,
    frame: &RawFrame,
    display: &mut S,
  ) -> Result<FrameReport, TaskError>
  where
    D: Model<Output = DamageModelOutput>,
    D::Error: std::error::Error + Send + Sync + 'static,
    P: Model<Output = PartsModelOutput>,
    P::Error: std::error::Error + Send + Sync + 'static,
    S: DrawingSurface,
  {
    let report = self.pass(session, frame, display).await?;
    self.state = LoopState::Idle;
    Ok(report)
  }

  /// 按帧源状态调度检测
  ///
  /// 播放中：每帧处理后至少等待 `frame_delay` 再处理下一帧；
  /// 暂停：只处理当前帧，回到 `Idle`，跳转后需再次调用；
  /// 关闭：清空显示画布并停止。
  pub async fn drive<D, P, Src, S>(
    &mut self,
    session: &mut Session<'_, D, P>,
    source: &mut Src,
    display: &mut S,
  ) -> Result<LoopState, TaskError>
  where
    D: Model<Output = DamageModelOutput>,
    D::Error: std::error::Error + Send + Sync + 'static,
    P: Model<Output = PartsModelOutput>,
    P::Error: std::error::Error + Send + Sync + 'static,
    Src: FrameSource,
    Src::Error: std::error::Error + Send + Sync + 'static,
    S: DrawingSurface,
  {
    info!("开始帧循环...");
    loop {
      if self.handle.is_stopped() {
        warn!("中断信号接收，退出帧循环");
        self.state = LoopState::Stopped;
        return Ok(self.state);
      }

      let source_state = source.state();
      if source_state == SourceState::Closed {
        info!("帧源已关闭，退出帧循环");
        display.clear();
        self.state = LoopState::Stopped;
        return Ok(self.state);
      }

      let frame = match source.current_frame() {
        Ok(Some(frame)) => frame,
        Ok(None) => {
          display.clear();
          self.state = LoopState::Stopped;
          return Ok(self.state);
        }
        Err(e) => return Err(self.fail(TaskError::Source(Box::new(e)))),
      };
      self.pass(session, &frame, display).await?;

      if source_state == SourceState::Paused {
        self.state = LoopState::Idle;
        return Ok(self.state);
      }

      if self.frame_number.map(|n| self.frames >= n).unwrap_or(false) {
        info!("达到指定帧数 {}, 退出帧循环", self.frames);
        self.state = LoopState::Stopped;
        return Ok(self.state);
      }

      self.state = LoopState::ScheduledNext;
      tokio::time::sleep(self.frame_delay).await;
    }
  }
}
