//! Frame orchestration
//!
//! One frame is: wait for the previous frame, acquire an image, submit its pre-recorded
//! command buffer, present. An out-of-date acquisition rebuilds the swapchain-dependent
//! resources and retries until an image is acquired. Submit and present failures are logged
//! and the frame is dropped; a failed submit also schedules a rebuild.

use crate::config::FramePacing;
use crate::foundation::logging::targets;
use crate::foundation::time::{Clock, FpsCounter, SystemClock};
use crate::render::vulkan::VulkanResult;

/// Result of an image acquisition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// An image is ready to render into
    Acquired {
        /// Swapchain image index
        image_index: u32,
        /// The swapchain still works but no longer matches the surface
        suboptimal: bool,
    },
    /// The swapchain no longer matches the surface and must be rebuilt
    OutOfDate,
}

/// Result of a presentation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    /// Presented and the swapchain still matches the surface
    Presented,
    /// Presented (or discarded) but the swapchain needs rebuilding
    Stale,
}

/// What happened to one frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// The image was submitted and presented
    Presented {
        /// Swapchain image index
        image_index: u32,
    },
    /// Submission failed; nothing was presented
    SubmitFailed {
        /// Swapchain image index
        image_index: u32,
    },
    /// Submission succeeded but presentation failed
    PresentFailed {
        /// Swapchain image index
        image_index: u32,
    },
}

/// Device side of the draw loop
pub trait FrameBackend {
    /// Block until the previous frame's GPU work is done
    fn wait_for_previous_frame(&mut self, pacing: FramePacing) -> VulkanResult<()>;

    /// Acquire the next swapchain image, waiting without a timeout
    fn acquire_next_image(&mut self) -> VulkanResult<AcquireOutcome>;

    /// Tear down and rebuild the swapchain, pipeline and drawing environment
    fn rebuild(&mut self) -> VulkanResult<()>;

    /// Submit the pre-recorded command buffer for an image
    fn submit(&mut self, image_index: u32, pacing: FramePacing) -> VulkanResult<()>;

    /// Present a rendered image
    fn present(&mut self, image_index: u32) -> VulkanResult<PresentOutcome>;
}

/// Draw loop state machine
pub struct FrameOrchestrator<C: Clock = SystemClock> {
    pacing: FramePacing,
    fps: FpsCounter<C>,
    stale: bool,
    rebuilds: u64,
    frames: u64,
}

impl FrameOrchestrator<SystemClock> {
    /// Orchestrator timed by the system clock
    pub fn new(pacing: FramePacing) -> Self {
        Self::with_clock(pacing, SystemClock)
    }
}

impl<C: Clock> FrameOrchestrator<C> {
    /// Orchestrator timed by an injected clock
    pub fn with_clock(pacing: FramePacing, clock: C) -> Self {
        Self {
            pacing,
            fps: FpsCounter::with_clock(clock),
            stale: false,
            rebuilds: 0,
            frames: 0,
        }
    }

    /// Render and present one frame
    ///
    /// Only waits, acquisition and rebuild failures are returned as errors.
    pub fn draw<B: FrameBackend>(&mut self, backend: &mut B) -> VulkanResult<FrameOutcome> {
        if self.stale {
            log::debug!(target: targets::FRAME, "Swapchain marked stale, rebuilding before acquire");
            self.rebuild(backend)?;
        }

        backend.wait_for_previous_frame(self.pacing)?;

        let image_index = loop {
            match backend.acquire_next_image()? {
                AcquireOutcome::Acquired { image_index, suboptimal } => {
                    if suboptimal {
                        self.stale = true;
                    }
                    break image_index;
                }
                AcquireOutcome::OutOfDate => {
                    log::info!(target: targets::FRAME, "Swapchain out of date, rebuilding");
                    self.rebuild(backend)?;
                }
            }
        };

        if let Err(e) = backend.submit(image_index, self.pacing) {
            log::error!(target: targets::FRAME, "Failed to submit frame for image {image_index}: {e}");
            // Nothing waited on the acquire semaphore; rebuilding replaces it before the next acquire.
            self.stale = true;
            return Ok(FrameOutcome::SubmitFailed { image_index });
        }

        match backend.present(image_index) {
            Ok(PresentOutcome::Presented) => {}
            Ok(PresentOutcome::Stale) => self.stale = true,
            Err(e) => {
                log::error!(target: targets::FRAME, "Failed to present image {image_index}: {e}");
                return Ok(FrameOutcome::PresentFailed { image_index });
            }
        }

        self.frames += 1;
        if let Some(fps) = self.fps.tick() {
            log::info!(target: targets::FRAME, "{fps} FPS");
        }
        Ok(FrameOutcome::Presented { image_index })
    }

    fn rebuild<B: FrameBackend>(&mut self, backend: &mut B) -> VulkanResult<()> {
        backend.rebuild()?;
        self.rebuilds += 1;
        self.stale = false;
        Ok(())
    }

    /// Rebuild before the next acquisition, e.g. after a window resize
    pub fn request_rebuild(&mut self) {
        self.stale = true;
    }

    /// Whether a rebuild is pending
    pub const fn is_stale(&self) -> bool {
        self.stale
    }

    /// Rebuilds performed so far
    pub const fn rebuild_count(&self) -> u64 {
        self.rebuilds
    }

    /// Frames presented so far
    pub const fn frame_count(&self) -> u64 {
        self.frames
    }

    /// Frame pacing in use
    pub const fn pacing(&self) -> FramePacing {
        self.pacing
    }

    /// Most recently reported frame rate
    pub const fn fps(&self) -> u32 {
        self.fps.fps()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::vulkan::VulkanError;
    use ash::vk;
    use std::collections::VecDeque;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        Wait(FramePacing),
        Acquire,
        Rebuild,
        Submit(u32, FramePacing),
        Present(u32),
    }

    #[derive(Default)]
    struct MockBackend {
        calls: Vec<Call>,
        acquires: VecDeque<AcquireOutcome>,
        next_image: u32,
        fail_submit: bool,
        present_result: Option<Result<PresentOutcome, vk::Result>>,
        fail_rebuild: bool,
    }

    impl MockBackend {
        fn with_acquires(acquires: impl IntoIterator<Item = AcquireOutcome>) -> Self {
            Self {
                acquires: acquires.into_iter().collect(),
                ..Default::default()
            }
        }
    }

    impl FrameBackend for MockBackend {
        fn wait_for_previous_frame(&mut self, pacing: FramePacing) -> VulkanResult<()> {
            self.calls.push(Call::Wait(pacing));
            Ok(())
        }

        fn acquire_next_image(&mut self) -> VulkanResult<AcquireOutcome> {
            self.calls.push(Call::Acquire);
            Ok(self.acquires.pop_front().unwrap_or_else(|| {
                let image_index = self.next_image;
                self.next_image = (self.next_image + 1) % 3;
                AcquireOutcome::Acquired {
                    image_index,
                    suboptimal: false,
                }
            }))
        }

        fn rebuild(&mut self) -> VulkanResult<()> {
            self.calls.push(Call::Rebuild);
            if self.fail_rebuild {
                return Err(VulkanError::Api(vk::Result::ERROR_SURFACE_LOST_KHR));
            }
            Ok(())
        }

        fn submit(&mut self, image_index: u32, pacing: FramePacing) -> VulkanResult<()> {
            self.calls.push(Call::Submit(image_index, pacing));
            if self.fail_submit {
                return Err(VulkanError::Api(vk::Result::ERROR_DEVICE_LOST));
            }
            Ok(())
        }

        fn present(&mut self, image_index: u32) -> VulkanResult<PresentOutcome> {
            self.calls.push(Call::Present(image_index));
            match self.present_result {
                Some(Err(e)) => Err(VulkanError::Api(e)),
                Some(Ok(outcome)) => Ok(outcome),
                None => Ok(PresentOutcome::Presented),
            }
        }
    }

    #[test]
    fn test_steady_state_frame() {
        let mut backend = MockBackend::default();
        let mut frames = FrameOrchestrator::new(FramePacing::QueueIdle);

        let outcome = frames.draw(&mut backend).unwrap();

        assert_eq!(outcome, FrameOutcome::Presented { image_index: 0 });
        assert_eq!(
            backend.calls,
            vec![
                Call::Wait(FramePacing::QueueIdle),
                Call::Acquire,
                Call::Submit(0, FramePacing::QueueIdle),
                Call::Present(0),
            ]
        );
        assert_eq!(frames.rebuild_count(), 0);
        assert_eq!(frames.frame_count(), 1);
    }

    #[test]
    fn test_out_of_date_rebuilds_once_then_retries() {
        let mut backend = MockBackend::with_acquires([
            AcquireOutcome::OutOfDate,
            AcquireOutcome::Acquired {
                image_index: 2,
                suboptimal: false,
            },
        ]);
        let mut frames = FrameOrchestrator::new(FramePacing::QueueIdle);

        let outcome = frames.draw(&mut backend).unwrap();

        assert_eq!(outcome, FrameOutcome::Presented { image_index: 2 });
        assert_eq!(frames.rebuild_count(), 1);
        assert_eq!(
            backend.calls,
            vec![
                Call::Wait(FramePacing::QueueIdle),
                Call::Acquire,
                Call::Rebuild,
                Call::Acquire,
                Call::Submit(2, FramePacing::QueueIdle),
                Call::Present(2),
            ]
        );
    }

    #[test]
    fn test_retry_until_acquired() {
        let mut backend = MockBackend::with_acquires([AcquireOutcome::OutOfDate; 3]);
        let mut frames = FrameOrchestrator::new(FramePacing::QueueIdle);

        frames.draw(&mut backend).unwrap();

        assert_eq!(frames.rebuild_count(), 3);
        assert_eq!(backend.calls.iter().filter(|c| **c == Call::Acquire).count(), 4);
    }

    #[test]
    fn test_fence_pacing_is_forwarded() {
        let mut backend = MockBackend::default();
        let mut frames = FrameOrchestrator::new(FramePacing::Fence);

        frames.draw(&mut backend).unwrap();

        assert_eq!(backend.calls[0], Call::Wait(FramePacing::Fence));
        assert_eq!(backend.calls[2], Call::Submit(0, FramePacing::Fence));
    }

    #[test]
    fn test_every_frame_waits_before_acquiring() {
        let mut backend = MockBackend::default();
        let mut frames = FrameOrchestrator::new(FramePacing::QueueIdle);

        for _ in 0..3 {
            frames.draw(&mut backend).unwrap();
        }

        let waits: Vec<usize> = backend
            .calls
            .iter()
            .enumerate()
            .filter(|(_, c)| matches!(c, Call::Wait(_)))
            .map(|(i, _)| i)
            .collect();
        assert_eq!(waits, vec![0, 4, 8]);
        for &i in &waits {
            assert_eq!(backend.calls[i + 1], Call::Acquire);
        }
    }

    #[test]
    fn test_submit_failure_is_swallowed() {
        let mut backend = MockBackend {
            fail_submit: true,
            ..Default::default()
        };
        let mut frames = FrameOrchestrator::new(FramePacing::QueueIdle);

        let outcome = frames.draw(&mut backend).unwrap();

        assert_eq!(outcome, FrameOutcome::SubmitFailed { image_index: 0 });
        assert!(!backend.calls.iter().any(|c| matches!(c, Call::Present(_))));
        assert_eq!(frames.frame_count(), 0);
    }

    #[test]
    fn test_submit_failure_rebuilds_before_next_acquire() {
        let mut backend = MockBackend {
            fail_submit: true,
            ..Default::default()
        };
        let mut frames = FrameOrchestrator::new(FramePacing::QueueIdle);

        frames.draw(&mut backend).unwrap();
        assert!(frames.is_stale());

        backend.fail_submit = false;
        backend.calls.clear();
        let outcome = frames.draw(&mut backend).unwrap();

        assert_eq!(backend.calls[0], Call::Rebuild);
        assert_eq!(backend.calls[2], Call::Acquire);
        assert_eq!(outcome, FrameOutcome::Presented { image_index: 1 });
        assert_eq!(frames.rebuild_count(), 1);
        assert!(!frames.is_stale());
    }

    #[test]
    fn test_present_failure_is_swallowed() {
        let mut backend = MockBackend {
            present_result: Some(Err(vk::Result::ERROR_DEVICE_LOST)),
            ..Default::default()
        };
        let mut frames = FrameOrchestrator::new(FramePacing::QueueIdle);

        let outcome = frames.draw(&mut backend).unwrap();
        assert_eq!(outcome, FrameOutcome::PresentFailed { image_index: 0 });
    }

    #[test]
    fn test_stale_present_rebuilds_next_frame() {
        let mut backend = MockBackend {
            present_result: Some(Ok(PresentOutcome::Stale)),
            ..Default::default()
        };
        let mut frames = FrameOrchestrator::new(FramePacing::QueueIdle);

        frames.draw(&mut backend).unwrap();
        assert!(frames.is_stale());

        backend.present_result = None;
        backend.calls.clear();
        frames.draw(&mut backend).unwrap();

        assert_eq!(backend.calls[0], Call::Rebuild);
        assert_eq!(frames.rebuild_count(), 1);
        assert!(!frames.is_stale());
    }

    #[test]
    fn test_suboptimal_acquire_marks_stale() {
        let mut backend = MockBackend::with_acquires([AcquireOutcome::Acquired {
            image_index: 1,
            suboptimal: true,
        }]);
        let mut frames = FrameOrchestrator::new(FramePacing::QueueIdle);

        let outcome = frames.draw(&mut backend).unwrap();

        assert_eq!(outcome, FrameOutcome::Presented { image_index: 1 });
        assert!(frames.is_stale());
    }

    #[test]
    fn test_requested_rebuild() {
        let mut backend = MockBackend::default();
        let mut frames = FrameOrchestrator::new(FramePacing::QueueIdle);

        frames.request_rebuild();
        frames.draw(&mut backend).unwrap();

        assert_eq!(backend.calls[0], Call::Rebuild);
        assert_eq!(frames.rebuild_count(), 1);
    }

    #[test]
    fn test_rebuild_failure_propagates() {
        let mut backend = MockBackend {
            acquires: VecDeque::from([AcquireOutcome::OutOfDate]),
            fail_rebuild: true,
            ..Default::default()
        };
        let mut frames = FrameOrchestrator::new(FramePacing::QueueIdle);

        assert!(frames.draw(&mut backend).is_err());
        assert_eq!(frames.rebuild_count(), 0);
    }
}
