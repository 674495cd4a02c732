use std::collections::VecDeque;

/// Continuation ids issued against image-bearing requests, and the head-image
/// turn they were issued under.
///
/// Only the responses-style adapter owns one of these. It is the single piece
/// of state that survives between calls.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeadImageSession {
    image_turn_index: Option<usize>,
    continuation_ids: VecDeque<String>,
}

impl HeadImageSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn image_turn_index(&self) -> Option<usize> {
        self.image_turn_index
    }

    pub fn continuation_ids(&self) -> &VecDeque<String> {
        &self.continuation_ids
    }

    pub fn is_empty(&self) -> bool {
        self.continuation_ids.is_empty()
    }

    /// The window slid past the recorded head image.
    pub fn has_slid(&self, head_image_index: Option<usize>) -> bool {
        !self.continuation_ids.is_empty() && self.image_turn_index != head_image_index
    }

    /// Dequeue the oldest id if the window slid; the caller releases it server-side.
    pub fn take_stale(&mut self, head_image_index: Option<usize>) -> Option<String> {
        if self.has_slid(head_image_index) {
            self.continuation_ids.pop_front()
        } else {
            None
        }
    }

    /// Record an id returned for an image-bearing request and restamp the head index.
    pub fn record(&mut self, head_image_index: Option<usize>, continuation_id: String) {
        self.image_turn_index = head_image_index;
        self.continuation_ids.push_back(continuation_id);
    }

    pub fn reset(&mut self) {
        self.image_turn_index = None;
        self.continuation_ids.clear();
    }
}
