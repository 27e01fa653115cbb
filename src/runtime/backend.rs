use std::time::Duration;

use crate::error::Result;

use super::clock::ManualClock;

/// The graphics side of the frame loop. Drawing itself is out of scope; the
/// loop only needs to know when to begin, whether a 3D scene is up, and when
/// to present.
pub trait RenderBackend {
    /// Start a frame. `Ok(false)` skips drawing for this frame (e.g. a minimized window).
    fn begin_frame(&mut self) -> Result<bool>;

    /// Whether a 3D scene is active, which makes the loop dispatch `draw-3d`.
    fn scene_active(&self) -> bool {
        false
    }

    fn begin_scene(&mut self) -> Result<()> {
        Ok(())
    }

    fn end_scene(&mut self) -> Result<()> {
        Ok(())
    }

    fn draw_ui(&mut self) -> Result<()>;

    fn present(&mut self) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendCall {
    BeginFrame,
    BeginScene,
    EndScene,
    DrawUi,
    Present,
}

/// Backend without a window. Records every call and can charge a fixed
/// present cost to a [`ManualClock`].
#[derive(Debug, Default)]
pub struct HeadlessBackend {
    calls: Vec<BackendCall>,
    scene_active: bool,
    skip_frames: bool,
    present_cost: Option<(ManualClock, Duration)>,
}

impl HeadlessBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_scene(mut self, active: bool) -> Self {
        self.scene_active = active;
        self
    }

    pub fn with_present_cost(mut self, clock: ManualClock, cost: Duration) -> Self {
        self.present_cost = Some((clock, cost));
        self
    }

    pub fn set_scene_active(&mut self, active: bool) {
        self.scene_active = active;
    }

    /// Make `begin_frame` refuse frames until called again with `false`.
    pub fn set_skip_frames(&mut self, skip: bool) {
        self.skip_frames = skip;
    }

    pub fn calls(&self) -> &[BackendCall] {
        &self.calls
    }

    pub fn presented(&self) -> usize {
        self.calls
            .iter()
            .filter(|call| **call == BackendCall::Present)
            .count()
    }

    pub fn clear(&mut self) {
        self.calls.clear();
    }
}

impl RenderBackend for HeadlessBackend {
    fn begin_frame(&mut self) -> Result<bool> {
        self.calls.push(BackendCall::BeginFrame);
        Ok(!self.skip_frames)
    }

    fn scene_active(&self) -> bool {
        self.scene_active
    }

    fn begin_scene(&mut self) -> Result<()> {
        self.calls.push(BackendCall::BeginScene);
        Ok(())
    }

    fn end_scene(&mut self) -> Result<()> {
        self.calls.push(BackendCall::EndScene);
        Ok(())
    }

    fn draw_ui(&mut self) -> Result<()> {
        self.calls.push(BackendCall::DrawUi);
        Ok(())
    }

    fn present(&mut self) -> Result<()> {
        self.calls.push(BackendCall::Present);
        if let Some((clock, cost)) = self.present_cost.as_ref() {
            clock.advance(*cost);
        }
        Ok(())
    }
}
