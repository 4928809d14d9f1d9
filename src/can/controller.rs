//! CAN controller abstraction.

use std::collections::VecDeque;
use std::sync::Mutex;

use crate::frame::Frame;

/// A non-blocking CAN controller FIFO. `try_recv` drains at most one frame
/// per call and returns `Ok(None)` when the FIFO is empty, mirroring the
/// ACAN2515-style driver the RX task loop is built around.
pub trait CanController: Send {
    fn try_recv(&mut self) -> Result<Option<Frame>, String>;
}

/// A software stand-in for a real CAN transceiver. Frames are queued ahead
/// of time (tests) or generated on demand by a load-pattern closure.
pub struct MockController {
    queue: Mutex<VecDeque<Frame>>,
}

impl MockController {
    pub fn with_queue(frames: Vec<Frame>) -> Self {
        Self {
            queue: Mutex::new(frames.into_iter().collect()),
        }
    }

    pub fn empty() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
        }
    }

    /// Push a frame to be returned by a future `try_recv`. Lets tests and
    /// the synthetic load generator feed the controller incrementally.
    pub fn push(&self, frame: Frame) {
        self.queue.lock().unwrap().push_back(frame);
    }
}

impl CanController for MockController {
    fn try_recv(&mut self) -> Result<Option<Frame>, String> {
        Ok(self.queue.lock().unwrap().pop_front())
    }
}
