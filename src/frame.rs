// =============================================================================
// FRAME SCHEDULER - acquire -> record -> submit -> present
// =============================================================================
//
// Owns the in-flight frame slots' bookkeeping and drives one frame per call.
// The GPU side is behind `FrameBackend` so the state machine itself has no
// Vulkan handles in it.
//
// FRAME TIMELINE (one slot):
// ┌──────────────────────────────────────────────────────────────────────────┐
// │ wait fence ─> acquire ─> reset+record ─> submit ─> present ─> advance    │
// │   (CPU)         │                          │          │                  │
// │                 └─ image_available ────────┘          │                  │
// │                                   render_finished ────┘                  │
// └──────────────────────────────────────────────────────────────────────────┘
//
// The fence wait is the only place the CPU blocks on the GPU. Everything
// after it is ordered on the GPU by the semaphore pair.

use anyhow::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::backend::{AcquireOutcome, PresentOutcome};

/// GPU operations the scheduler sequences. `slot` is always the current
/// frame slot index, `image_index` the swapchain image acquired for it.
pub trait FrameBackend {
    /// Block until the slot's completion fence is signalled
    fn wait_for_slot(&mut self, slot: usize) -> Result<()>;

    /// Ask for the next image, signalling the slot's image-available semaphore
    fn acquire_image(&mut self, slot: usize) -> Result<AcquireOutcome>;

    /// Unsignal the fence and reset the slot's command buffer
    fn reset_slot(&mut self, slot: usize) -> Result<()>;

    /// Record the draw into the slot's command buffer targeting `image_index`
    fn record(&mut self, slot: usize, image_index: u32) -> Result<()>;

    /// Submit the slot's commands: wait image-available, signal
    /// render-finished and the fence
    fn submit(&mut self, slot: usize) -> Result<()>;

    /// Queue `image_index` for display once render-finished signals
    fn present(&mut self, slot: usize, image_index: u32) -> Result<PresentOutcome>;

    /// Idle the device and rebuild every extent-dependent resource.
    ///
    /// The device is idled even when the rebuild is deferred.
    fn rebuild_swapchain(&mut self) -> Result<RebuildOutcome>;
}

/// Whether a requested rebuild actually replaced the swapchain
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RebuildOutcome {
    Rebuilt,
    /// Nothing to build for yet (zero-sized window); the request stays latched
    Deferred,
}

/// Window resize notification.
///
/// Set from the event handler, read-and-cleared by the scheduler once per
/// frame after presenting.
#[derive(Debug, Default)]
pub struct ResizeLatch(AtomicBool);

impl ResizeLatch {
    pub fn notify(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Returns whether a resize was pending, clearing it
    pub fn take(&self) -> bool {
        self.0.swap(false, Ordering::AcqRel)
    }

    #[cfg(test)]
    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Index of the current frame slot, modulo the number of slots
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameCounter {
    current: usize,
    frames_in_flight: usize,
}

impl FrameCounter {
    pub fn new(frames_in_flight: usize) -> Self {
        Self {
            current: 0,
            frames_in_flight: frames_in_flight.max(1),
        }
    }

    #[inline]
    pub fn current(&self) -> usize {
        self.current
    }

    #[inline]
    pub fn frames_in_flight(&self) -> usize {
        self.frames_in_flight
    }

    pub fn advance(&mut self) {
        self.current = (self.current + 1) % self.frames_in_flight;
    }
}

/// Where a frame slot is in its cycle
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotState {
    /// Fence signalled, slot reusable
    Idle,
    Acquiring,
    Recording,
    /// Fence unsignalled, GPU owns the slot
    Submitted,
}

/// What one `draw_frame` call did
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    Presented,
    /// Presented, then rebuilt for staleness or a resize
    PresentedAndRebuilt,
    /// The chain was out of date at acquire; nothing was drawn
    Rebuilt,
}

pub struct FrameScheduler {
    counter: FrameCounter,
    slots: Vec<SlotState>,
    resize: Arc<ResizeLatch>,
    rebuilds: u64,
}

impl FrameScheduler {
    pub fn new(frames_in_flight: usize, resize: Arc<ResizeLatch>) -> Self {
        let counter = FrameCounter::new(frames_in_flight);
        Self {
            slots: vec![SlotState::Idle; counter.frames_in_flight()],
            counter,
            resize,
            rebuilds: 0,
        }
    }

    #[cfg(test)]
    pub fn counter(&self) -> FrameCounter {
        self.counter
    }

    #[cfg(test)]
    pub fn slot_state(&self, slot: usize) -> SlotState {
        self.slots[slot]
    }

    /// Slots whose GPU work has not been confirmed complete
    pub fn in_flight(&self) -> usize {
        self.slots.iter().filter(|&&s| s == SlotState::Submitted).count()
    }

    /// Rebuilds that replaced the swapchain; deferred requests are not counted
    pub fn rebuilds(&self) -> u64 {
        self.rebuilds
    }

    /// Run one iteration of the frame loop.
    ///
    /// Staleness is handled here by rebuilding; any error returned is fatal.
    pub fn draw_frame<B: FrameBackend>(&mut self, backend: &mut B) -> Result<FrameOutcome> {
        let slot = self.counter.current();

        // Step 1: Wait until this slot's previous submit finished
        backend.wait_for_slot(slot)?;
        self.slots[slot] = SlotState::Idle;

        // Step 2: Acquire
        self.slots[slot] = SlotState::Acquiring;
        let image_index = match backend.acquire_image(slot)? {
            AcquireOutcome::Acquired {
                image_index,
                suboptimal,
            } => {
                if suboptimal {
                    log::trace!("Acquired image {} from a suboptimal swapchain", image_index);
                }
                image_index
            }
            AcquireOutcome::OutOfDate => {
                // Fence untouched, so the slot is still reusable as-is
                self.slots[slot] = SlotState::Idle;
                log::debug!("Swapchain out of date at acquire");
                self.rebuild(backend)?;
                return Ok(FrameOutcome::Rebuilt);
            }
        };

        // Step 3: Reset & record
        self.slots[slot] = SlotState::Recording;
        backend.reset_slot(slot)?;
        backend.record(slot, image_index)?;

        // Step 4: Submit
        backend.submit(slot)?;
        self.slots[slot] = SlotState::Submitted;
        log::trace!("Submitted slot {}, {} in flight", slot, self.in_flight());

        // Step 5: Present. The resize latch is consulted whatever present said
        let presented = backend.present(slot, image_index)?;
        let resized = self.resize.take();

        let outcome = if presented.is_stale() || resized {
            log::debug!("Rebuilding after present: {:?}, resized: {}", presented, resized);
            self.rebuild(backend)?;
            FrameOutcome::PresentedAndRebuilt
        } else {
            FrameOutcome::Presented
        };

        // Step 6: Advance
        self.counter.advance();

        Ok(outcome)
    }

    fn rebuild<B: FrameBackend>(&mut self, backend: &mut B) -> Result<()> {
        if backend.rebuild_swapchain()? == RebuildOutcome::Rebuilt {
            self.rebuilds += 1;
        }
        // Rebuilding idles the device, so every fence is signalled
        self.slots.fill(SlotState::Idle);
        Ok(())
    }
}

/// Frames-per-second readout, reported at most once per interval
pub struct FrameStats {
    interval: Duration,
    frame_count: u32,
    last_report: Instant,
    last_frame: Instant,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FpsReport {
    pub fps: f32,
    pub frame_time_ms: f32,
}

impl FrameStats {
    pub fn new(now: Instant) -> Self {
        Self::with_interval(now, Duration::from_secs(1))
    }

    pub fn with_interval(now: Instant, interval: Duration) -> Self {
        Self {
            interval,
            frame_count: 0,
            last_report: now,
            last_frame: now,
        }
    }

    /// Count a presented frame; returns a report once per interval
    pub fn frame_presented(&mut self, now: Instant) -> Option<FpsReport> {
        let frame_time = now.saturating_duration_since(self.last_frame);
        self.last_frame = now;
        self.frame_count += 1;

        let elapsed = now.saturating_duration_since(self.last_report);
        if elapsed < self.interval {
            return None;
        }

        let report = FpsReport {
            fps: self.frame_count as f32 / elapsed.as_secs_f32(),
            frame_time_ms: frame_time.as_secs_f32() * 1000.0,
        };
        self.frame_count = 0;
        self.last_report = now;
        Some(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    enum Call {
        Wait(usize),
        Acquire(usize),
        Reset(usize),
        Record(usize, u32),
        Submit(usize),
        Present(usize, u32),
        Rebuild,
        DeferredRebuild,
    }

    #[derive(Clone, Copy, Debug)]
    enum Scripted<T> {
        Return(T),
        Fail,
    }

    /// Models fences the way a GPU would: submit unsignals a slot's fence,
    /// and work only completes when the CPU waits on it or the device idles.
    struct FakeGpu {
        frames_in_flight: usize,
        image_count: u32,
        next_image: u32,
        fence_signaled: Vec<bool>,
        acquires: VecDeque<Scripted<AcquireOutcome>>,
        presents: VecDeque<Scripted<PresentOutcome>>,
        calls: Vec<Call>,
        max_outstanding: usize,
        resize_while_recording: Option<Arc<ResizeLatch>>,
        /// While set, rebuilds are deferred and re-arm this latch
        minimized: Option<Arc<ResizeLatch>>,
    }

    impl FakeGpu {
        fn new(frames_in_flight: usize) -> Self {
            Self {
                frames_in_flight,
                image_count: 3,
                next_image: 0,
                fence_signaled: vec![true; frames_in_flight],
                acquires: VecDeque::new(),
                presents: VecDeque::new(),
                calls: Vec::new(),
                max_outstanding: 0,
                resize_while_recording: None,
                minimized: None,
            }
        }

        fn outstanding(&self) -> usize {
            self.fence_signaled.iter().filter(|&&s| !s).count()
        }

        fn rebuild_count(&self) -> usize {
            self.calls.iter().filter(|&&c| c == Call::Rebuild).count()
        }

        fn take_calls(&mut self) -> Vec<Call> {
            std::mem::take(&mut self.calls)
        }
    }

    impl FrameBackend for FakeGpu {
        fn wait_for_slot(&mut self, slot: usize) -> Result<()> {
            self.calls.push(Call::Wait(slot));
            self.fence_signaled[slot] = true;
            Ok(())
        }

        fn acquire_image(&mut self, slot: usize) -> Result<AcquireOutcome> {
            self.calls.push(Call::Acquire(slot));
            match self.acquires.pop_front() {
                Some(Scripted::Return(outcome)) => Ok(outcome),
                Some(Scripted::Fail) => anyhow::bail!("device lost"),
                None => {
                    let image_index = self.next_image;
                    self.next_image = (self.next_image + 1) % self.image_count;
                    Ok(AcquireOutcome::Acquired {
                        image_index,
                        suboptimal: false,
                    })
                }
            }
        }

        fn reset_slot(&mut self, slot: usize) -> Result<()> {
            self.calls.push(Call::Reset(slot));
            assert!(self.fence_signaled[slot], "slot {} reset while in flight", slot);
            self.fence_signaled[slot] = false;
            Ok(())
        }

        fn record(&mut self, slot: usize, image_index: u32) -> Result<()> {
            self.calls.push(Call::Record(slot, image_index));
            assert!(!self.fence_signaled[slot], "recording without reset");
            if let Some(latch) = &self.resize_while_recording {
                latch.notify();
            }
            Ok(())
        }

        fn submit(&mut self, slot: usize) -> Result<()> {
            self.calls.push(Call::Submit(slot));
            let outstanding = self.outstanding();
            assert!(outstanding <= self.frames_in_flight);
            self.max_outstanding = self.max_outstanding.max(outstanding);
            Ok(())
        }

        fn present(&mut self, slot: usize, image_index: u32) -> Result<PresentOutcome> {
            self.calls.push(Call::Present(slot, image_index));
            match self.presents.pop_front() {
                Some(Scripted::Return(outcome)) => Ok(outcome),
                Some(Scripted::Fail) => anyhow::bail!("surface lost"),
                None => Ok(PresentOutcome::Presented),
            }
        }

        fn rebuild_swapchain(&mut self) -> Result<RebuildOutcome> {
            self.fence_signaled.fill(true);
            if let Some(latch) = &self.minimized {
                self.calls.push(Call::DeferredRebuild);
                latch.notify();
                return Ok(RebuildOutcome::Deferred);
            }
            self.calls.push(Call::Rebuild);
            self.next_image = 0;
            Ok(RebuildOutcome::Rebuilt)
        }
    }

    fn scheduler(frames_in_flight: usize) -> (FrameScheduler, Arc<ResizeLatch>) {
        let latch = Arc::new(ResizeLatch::default());
        (FrameScheduler::new(frames_in_flight, latch.clone()), latch)
    }

    #[test]
    fn frame_runs_steps_in_order() {
        let (mut frames, _) = scheduler(2);
        let mut gpu = FakeGpu::new(2);

        assert_eq!(frames.draw_frame(&mut gpu).unwrap(), FrameOutcome::Presented);
        assert_eq!(
            gpu.take_calls(),
            vec![
                Call::Wait(0),
                Call::Acquire(0),
                Call::Reset(0),
                Call::Record(0, 0),
                Call::Submit(0),
                Call::Present(0, 0),
            ]
        );
        assert_eq!(frames.counter().current(), 1);
        assert_eq!(frames.slot_state(0), SlotState::Submitted);
        assert_eq!(frames.slot_state(1), SlotState::Idle);
    }

    #[test]
    fn slots_cycle_modulo_frames_in_flight() {
        let (mut frames, _) = scheduler(2);
        let mut gpu = FakeGpu::new(2);

        let mut waited = Vec::new();
        for _ in 0..5 {
            frames.draw_frame(&mut gpu).unwrap();
            waited.extend(gpu.take_calls().into_iter().filter_map(|c| match c {
                Call::Wait(slot) => Some(slot),
                _ => None,
            }));
        }
        assert_eq!(waited, vec![0, 1, 0, 1, 0]);
        assert_eq!(frames.counter().current(), 1);
    }

    #[test]
    fn never_more_than_n_frames_outstanding() {
        for n in 1..=4 {
            let (mut frames, _) = scheduler(n);
            let mut gpu = FakeGpu::new(n);

            for _ in 0..50 {
                frames.draw_frame(&mut gpu).unwrap();
                assert!(frames.in_flight() <= n);
                assert!(gpu.outstanding() <= n);
            }
            assert_eq!(gpu.max_outstanding, n);
        }
    }

    #[test]
    fn out_of_date_acquire_rebuilds_without_advancing() {
        let (mut frames, _) = scheduler(2);
        let mut gpu = FakeGpu::new(2);

        frames.draw_frame(&mut gpu).unwrap();
        gpu.take_calls();

        let before = frames.counter();
        gpu.acquires.push_back(Scripted::Return(AcquireOutcome::OutOfDate));

        assert_eq!(frames.draw_frame(&mut gpu).unwrap(), FrameOutcome::Rebuilt);
        assert_eq!(frames.counter(), before);
        assert_eq!(
            gpu.take_calls(),
            vec![Call::Wait(1), Call::Acquire(1), Call::Rebuild]
        );

        // The next frame retries the same slot against the new chain
        frames.draw_frame(&mut gpu).unwrap();
        let calls = gpu.take_calls();
        assert_eq!(calls[0], Call::Wait(1));
        assert_eq!(calls[1], Call::Acquire(1));
        assert_eq!(frames.rebuilds(), 1);
    }

    #[test]
    fn suboptimal_present_alone_triggers_rebuild() {
        let (mut frames, latch) = scheduler(2);
        let mut gpu = FakeGpu::new(2);
        gpu.presents.push_back(Scripted::Return(PresentOutcome::Suboptimal));

        assert!(!latch.is_set());
        assert_eq!(
            frames.draw_frame(&mut gpu).unwrap(),
            FrameOutcome::PresentedAndRebuilt
        );
        assert_eq!(gpu.calls.last(), Some(&Call::Rebuild));
        // Counter still advances after a completed submit+present
        assert_eq!(frames.counter().current(), 1);
    }

    #[test]
    fn out_of_date_present_triggers_rebuild() {
        let (mut frames, _) = scheduler(2);
        let mut gpu = FakeGpu::new(2);
        gpu.presents.push_back(Scripted::Return(PresentOutcome::OutOfDate));

        assert_eq!(
            frames.draw_frame(&mut gpu).unwrap(),
            FrameOutcome::PresentedAndRebuilt
        );
        assert_eq!(gpu.rebuild_count(), 1);
        assert_eq!(frames.in_flight(), 0);
    }

    #[test]
    fn resize_latch_rebuilds_once_and_clears() {
        let (mut frames, latch) = scheduler(2);
        let mut gpu = FakeGpu::new(2);

        latch.notify();
        assert_eq!(
            frames.draw_frame(&mut gpu).unwrap(),
            FrameOutcome::PresentedAndRebuilt
        );
        assert!(!latch.is_set());

        assert_eq!(frames.draw_frame(&mut gpu).unwrap(), FrameOutcome::Presented);
        assert_eq!(gpu.rebuild_count(), 1);
    }

    #[test]
    fn resize_during_frame_is_honored_before_next_acquire() {
        let (mut frames, latch) = scheduler(2);
        let mut gpu = FakeGpu::new(2);
        gpu.resize_while_recording = Some(latch.clone());

        frames.draw_frame(&mut gpu).unwrap();
        let calls = gpu.take_calls();
        assert_eq!(&calls[calls.len() - 2..], &[Call::Present(0, 0), Call::Rebuild]);
    }

    #[test]
    fn rebuild_while_minimized_is_retried_after_restore() {
        let (mut frames, latch) = scheduler(2);
        let mut gpu = FakeGpu::new(2);

        gpu.minimized = Some(latch.clone());
        latch.notify();
        assert_eq!(
            frames.draw_frame(&mut gpu).unwrap(),
            FrameOutcome::PresentedAndRebuilt
        );
        assert!(latch.is_set());
        assert_eq!(gpu.calls.last(), Some(&Call::DeferredRebuild));
        assert_eq!(gpu.rebuild_count(), 0);
        assert_eq!(frames.rebuilds(), 0);
        assert_eq!(frames.in_flight(), 0);

        // Restored: the re-armed latch forces the real rebuild
        gpu.minimized = None;
        assert_eq!(
            frames.draw_frame(&mut gpu).unwrap(),
            FrameOutcome::PresentedAndRebuilt
        );
        assert!(!latch.is_set());
        assert_eq!(gpu.rebuild_count(), 1);
        assert_eq!(frames.rebuilds(), 1);

        assert_eq!(frames.draw_frame(&mut gpu).unwrap(), FrameOutcome::Presented);
        assert_eq!(gpu.rebuild_count(), 1);
    }

    #[test]
    fn suboptimal_acquire_still_draws() {
        let (mut frames, _) = scheduler(2);
        let mut gpu = FakeGpu::new(2);
        gpu.acquires.push_back(Scripted::Return(AcquireOutcome::Acquired {
            image_index: 2,
            suboptimal: true,
        }));

        assert_eq!(frames.draw_frame(&mut gpu).unwrap(), FrameOutcome::Presented);
        assert!(gpu.calls.contains(&Call::Record(0, 2)));
        assert!(gpu.calls.contains(&Call::Present(0, 2)));
        assert_eq!(gpu.rebuild_count(), 0);
    }

    #[test]
    fn acquire_failure_is_fatal() {
        let (mut frames, _) = scheduler(2);
        let mut gpu = FakeGpu::new(2);
        gpu.acquires.push_back(Scripted::Fail);

        let err = frames.draw_frame(&mut gpu).unwrap_err();
        assert!(err.to_string().contains("device lost"));
        assert_eq!(frames.counter().current(), 0);
        assert!(!gpu.calls.iter().any(|c| matches!(c, Call::Submit(_) | Call::Rebuild)));
    }

    #[test]
    fn present_failure_is_fatal() {
        let (mut frames, latch) = scheduler(2);
        let mut gpu = FakeGpu::new(2);
        gpu.presents.push_back(Scripted::Fail);
        latch.notify();

        assert!(frames.draw_frame(&mut gpu).is_err());
        assert_eq!(gpu.rebuild_count(), 0);
        assert_eq!(frames.counter().current(), 0);
    }

    #[test]
    fn frame_counter_wraps() {
        let mut counter = FrameCounter::new(3);
        let seen: Vec<usize> = (0..7)
            .map(|_| {
                let current = counter.current();
                counter.advance();
                current
            })
            .collect();
        assert_eq!(seen, vec![0, 1, 2, 0, 1, 2, 0]);

        // Zero slots would make the modulus meaningless
        assert_eq!(FrameCounter::new(0).frames_in_flight(), 1);
    }

    #[test]
    fn resize_latch_crosses_threads() {
        let latch = Arc::new(ResizeLatch::default());
        let producer = latch.clone();
        std::thread::spawn(move || producer.notify()).join().unwrap();

        assert!(latch.take());
        assert!(!latch.take());
    }

    #[test]
    fn fps_reported_once_per_interval() {
        let start = Instant::now();
        let mut stats = FrameStats::with_interval(start, Duration::from_secs(1));

        for i in 1..10 {
            assert_eq!(stats.frame_presented(start + Duration::from_millis(i * 100)), None);
        }
        let report = stats
            .frame_presented(start + Duration::from_millis(1000))
            .unwrap();
        assert!((report.fps - 10.0).abs() < 0.01);
        assert!((report.frame_time_ms - 100.0).abs() < 0.01);

        // Counting restarts after a report
        assert_eq!(stats.frame_presented(start + Duration::from_millis(1100)), None);
    }
}
