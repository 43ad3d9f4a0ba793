//! The I/O boundary the navigation runtime drives. Implementing
//! this trait is how a caller wires the runtime to an actual target window
//! (screen capture + synthetic input); this crate only depends on the
//! trait, not on any particular capture/injection backend.

use async_trait::async_trait;

use acine_core::image_match::Bitmap;

/// Frame capture and synthetic input, the runtime's only window onto the
/// outside world.
#[async_trait]
pub trait Controller: Send {
    async fn get_frame(&mut self) -> anyhow::Result<Bitmap>;
    async fn mouse_move(&mut self, x: i64, y: i64) -> anyhow::Result<()>;
    async fn mouse_down(&mut self) -> anyhow::Result<()>;
    async fn mouse_up(&mut self) -> anyhow::Result<()>;
}

/// In-memory test double: replays a fixed sequence of frames (repeating the
/// last one once exhausted) and records every input call it receives.
#[derive(Debug, Default)]
pub struct FakeController {
    frames: Vec<Bitmap>,
    cursor: usize,
    pub calls: Vec<FakeCall>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FakeCall {
    Move(i64, i64),
    Down,
    Up,
}

impl FakeController {
    pub fn new(frames: Vec<Bitmap>) -> Self {
        Self {
            frames,
            cursor: 0,
            calls: Vec::new(),
        }
    }

    /// Appends a frame to the end of the playback sequence, useful for
    /// tests that want the observed frame to change partway through.
    pub fn push_frame(&mut self, frame: Bitmap) {
        self.frames.push(frame);
    }
}

#[async_trait]
impl Controller for FakeController {
    async fn get_frame(&mut self) -> anyhow::Result<Bitmap> {
        let frame = self
            .frames
            .get(self.cursor)
            .or_else(|| self.frames.last())
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("FakeController has no frames configured"))?;
        if self.cursor + 1 < self.frames.len() {
            self.cursor += 1;
        }
        Ok(frame)
    }

    async fn mouse_move(&mut self, x: i64, y: i64) -> anyhow::Result<()> {
        self.calls.push(FakeCall::Move(x, y));
        Ok(())
    }

    async fn mouse_down(&mut self) -> anyhow::Result<()> {
        self.calls.push(FakeCall::Down);
        Ok(())
    }

    async fn mouse_up(&mut self) -> anyhow::Result<()> {
        self.calls.push(FakeCall::Up);
        Ok(())
    }
}
