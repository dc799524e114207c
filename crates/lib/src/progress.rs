//! Step-based progress reporting for a running generation job.
//!
//! The generator calls [`ProgressReporter::on_step`] after each denoising step; the
//! reporter turns the step into a percentage and updates the thread's card.

use std::sync::Arc;
use std::time::Instant;

use image::DynamicImage;

use crate::message::IncomingMessage;
use crate::reply::{MessageKind, ReplyCoordinator, ReplyState};

pub struct ProgressReporter {
    coordinator: Arc<ReplyCoordinator>,
    message: IncomingMessage,
    total_steps: u32,
    image_count: usize,
    started: Instant,
}

impl ProgressReporter {
    pub fn new(
        coordinator: Arc<ReplyCoordinator>,
        message: IncomingMessage,
        total_steps: u32,
        image_count: usize,
    ) -> Self {
        Self {
            coordinator,
            message,
            total_steps,
            image_count,
            started: Instant::now(),
        }
    }

    /// Measure elapsed time from `started` instead of from construction.
    pub fn started_at(mut self, started: Instant) -> Self {
        self.started = started;
        self
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }

    pub fn message(&self) -> &IncomingMessage {
        &self.message
    }

    /// Percentage shown for a step callback, or None when the step is out of range.
    /// Steps are reported 1-based by the generator; step N shows (N-1)/total.
    pub fn percent(&self, step: u32) -> Option<u32> {
        if self.total_steps == 0 || step > self.total_steps {
            return None;
        }
        let done = step.saturating_sub(1);
        Some(((done as u64 * 100) / self.total_steps as u64) as u32)
    }

    /// Create the card at 0%.
    pub async fn start(&self) -> ReplyState {
        self.coordinator
            .reply_progress(true, Some("0%"), self.image_count, self.elapsed_secs(), &self.message)
            .await
    }

    /// Update the card for a finished step. Out-of-range steps are ignored (None).
    pub async fn on_step(&self, step: u32) -> Option<ReplyState> {
        let percent = self.percent(step)?;
        let label = format!("{}%", percent);
        Some(
            self.coordinator
                .reply_progress(false, Some(&label), self.image_count, self.elapsed_secs(), &self.message)
                .await,
        )
    }

    /// Deliver the final images with the total elapsed time.
    pub async fn finish(&self, kind: MessageKind, images: &[DynamicImage]) -> ReplyState {
        self.coordinator
            .reply(kind, images, self.elapsed_secs(), &self.message)
            .await
    }
}
