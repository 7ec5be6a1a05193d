use shared::protocol::DirectMessageFrame;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchDecision {
    /// First item of a new batch; the caller arms the debounce timer.
    ArmTimer,
    /// Timer already armed, keep buffering.
    Pending,
    /// Size threshold reached; flush now and cancel the timer.
    FlushNow,
}

/// Buffer for inbound direct messages. Timing is owned by the caller; this
/// only tracks contents and whether a timer is considered armed.
#[derive(Debug)]
pub struct InboundBatcher {
    buffer: Vec<DirectMessageFrame>,
    max_items: usize,
    timer_armed: bool,
}

impl InboundBatcher {
    pub fn new(max_items: usize) -> Self {
        Self {
            buffer: Vec::new(),
            max_items: max_items.max(1),
            timer_armed: false,
        }
    }

    pub fn push(&mut self, frame: DirectMessageFrame) -> BatchDecision {
        self.buffer.push(frame);
        if self.buffer.len() >= self.max_items {
            return BatchDecision::FlushNow;
        }
        if self.timer_armed {
            BatchDecision::Pending
        } else {
            self.timer_armed = true;
            BatchDecision::ArmTimer
        }
    }

    pub fn take(&mut self) -> Vec<DirectMessageFrame> {
        self.timer_armed = false;
        std::mem::take(&mut self.buffer)
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn is_timer_armed(&self) -> bool {
        self.timer_armed
    }
}
