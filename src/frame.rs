//! Per-frame callback driver

use crate::backend::GraphicsDevice;
use crate::command::CommandList;
use crate::error::PipelineResult;
use crate::pipeline::Pipeline;
use crate::pool::Pool;
use std::sync::Arc;
use std::time::Instant;

/// Work recorded once per frame: `(device, list, elapsed_ms)`
pub type FrameCallback =
    Box<dyn FnMut(&dyn GraphicsDevice, &mut CommandList, f64) -> PipelineResult<()> + Send>;

/// Runs registered callbacks once per frame and presents
///
/// Each frame takes one command list from the pool, hands it to every
/// callback in registration order, returns it and then swaps buffers.
/// A failing callback is logged and the remaining callbacks still run.
pub struct FrameLoop {
    device: Arc<dyn GraphicsDevice>,
    pool: Arc<Pool<CommandList>>,
    callbacks: Vec<FrameCallback>,
    start: Instant,
    frames: u64,
}

impl FrameLoop {
    pub fn new(device: Arc<dyn GraphicsDevice>, pool: Arc<Pool<CommandList>>) -> Self {
        Self {
            device,
            pool,
            callbacks: Vec::new(),
            start: Instant::now(),
            frames: 0,
        }
    }

    pub fn device(&self) -> &Arc<dyn GraphicsDevice> {
        &self.device
    }

    pub fn pool(&self) -> &Arc<Pool<CommandList>> {
        &self.pool
    }

    /// Register a callback; callbacks run in registration order
    pub fn add_callback(
        &mut self,
        callback: impl FnMut(&dyn GraphicsDevice, &mut CommandList, f64) -> PipelineResult<()>
            + Send
            + 'static,
    ) {
        self.callbacks.push(Box::new(callback));
    }

    /// Render `pipeline` every frame; the loop takes ownership of it
    pub fn add_pipeline(&mut self, pipeline: Pipeline) {
        self.add_callback(move |device, list, elapsed_ms| pipeline.render(device, list, elapsed_ms));
    }

    pub fn callback_count(&self) -> usize {
        self.callbacks.len()
    }

    /// Frames completed so far
    pub fn frame_count(&self) -> u64 {
        self.frames
    }

    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }

    /// Run one frame
    ///
    /// Only failing to obtain a command list or to present is returned as an
    /// error.
    pub fn frame(&mut self) -> PipelineResult<()> {
        let elapsed_ms = self.elapsed_ms();
        {
            let mut list = self.pool.take()?;
            for (index, callback) in self.callbacks.iter_mut().enumerate() {
                if let Err(e) = callback(self.device.as_ref(), &mut *list, elapsed_ms) {
                    log::error!("Frame {}: callback {} failed: {}", self.frames, index, e);
                }
            }
        }
        self.device.swap_buffers()?;
        self.frames += 1;
        Ok(())
    }

    /// Forward a new target size to the device
    pub fn resize(&self, width: u32, height: u32) {
        log::debug!("Resizing to {}x{}", width, height);
        self.device.resize(width, height);
    }
}

impl std::fmt::Debug for FrameLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameLoop")
            .field("device", &self.device.name())
            .field("callbacks", &self.callbacks.len())
            .field("frames", &self.frames)
            .finish()
    }
}
