use std::collections::VecDeque;

use super::FrameDriver;
use crate::wire::ETHERNET_FRAME_SIZE;

type Frame = [u8; ETHERNET_FRAME_SIZE];

/// In-memory [`FrameDriver`]. Sent frames are recorded; injected frames are
/// handed out by `receive_frame` in order.
#[derive(Debug)]
pub struct LoopbackDriver {
    sent: Vec<Frame>,
    rx: VecDeque<Frame>,
    accepting: bool,
}

impl Default for LoopbackDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackDriver {
    pub fn new() -> Self {
        Self {
            sent: Vec::new(),
            rx: VecDeque::new(),
            accepting: true,
        }
    }

    /// Queue a frame as if it arrived on the wire.
    pub fn inject(&mut self, frame: Frame) {
        self.rx.push_back(frame);
    }

    pub fn pending_rx(&self) -> usize {
        self.rx.len()
    }

    pub fn sent(&self) -> &[Frame] {
        &self.sent
    }

    pub fn take_sent(&mut self) -> Vec<Frame> {
        std::mem::take(&mut self.sent)
    }

    /// Make `send_frame` refuse (or accept again) every frame.
    pub fn set_accepting(&mut self, accepting: bool) {
        self.accepting = accepting;
    }
}

impl FrameDriver for LoopbackDriver {
    fn send_frame(&mut self, frame: &Frame) -> bool {
        if self.accepting {
            self.sent.push(*frame);
        }
        self.accepting
    }

    fn receive_frame(&mut self) -> Option<(usize, Frame)> {
        self.rx.pop_front().map(|f| (ETHERNET_FRAME_SIZE, f))
    }
}
