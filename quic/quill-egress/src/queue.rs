// Copyright the quill authors. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Per-level send state: the pending frame queues, the staging list for
//! the datagram being built, and the in-flight list.
//!
//! Pending frames live in sub-queues drained round-robin: the default
//! sub-queue (handshake data, control frames, ACKs) plus one sub-queue per
//! active stream. A non-default sub-queue that has delivered
//! `stream_shuffle` frames in a row rotates to the back. All queue
//! operations the hot path performs are O(1).
//!
//! A frame is always in exactly one place: a sub-queue, the staging list
//! (`sending`), or the in-flight list (`sent`) - or it has been freed.

use crate::conn::Congestion;
use hashbrown::HashMap;
use quill_core::{
    frame::{AckRange, Frame},
    time::Timestamp,
    Level,
};
use std::collections::VecDeque;

/// Slot of the default sub-queue; never rotated, never detached from its
/// stream map entry (it has none)
const DEFAULT_SLOT: usize = 0;

#[derive(Debug, Default)]
struct FrameQueue {
    frames: VecDeque<Frame>,
    /// Frames drained consecutively since the last rotation
    count: u64,
    attached: bool,
}

/// The pending frames of one encryption level
#[derive(Debug, Default)]
pub struct SendQueue {
    slots: Vec<FrameQueue>,
    /// Attached (non-empty) sub-queues in drain order
    order: VecDeque<usize>,
    by_stream: HashMap<u64, usize>,
    /// Length of the high-priority run at the head of the default
    /// sub-queue; priority frames bypass congestion throttling
    last_priority: usize,
}

/// Rotation state captured before a build, for an exact revert
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueueSnapshot {
    order: VecDeque<usize>,
    counts: Vec<u64>,
    last_priority: usize,
}

impl SendQueue {
    pub fn new() -> Self {
        Self {
            slots: vec![FrameQueue::default()],
            order: VecDeque::new(),
            by_stream: HashMap::new(),
            last_priority: 0,
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    #[inline]
    pub fn has_priority(&self) -> bool {
        self.last_priority > 0
    }

    /// All pending frames, in no particular cross-queue order
    pub fn frames(&self) -> impl Iterator<Item = &Frame> {
        self.order
            .iter()
            .flat_map(move |slot| self.slots[*slot].frames.iter())
    }

    pub fn has_ack_eliciting(&self) -> bool {
        self.frames().any(|frame| frame.need_ack)
    }

    /// Returns true once the pending bytes reach `threshold`; stops
    /// scanning as soon as the answer is known
    pub fn pending_bytes_reach(&self, threshold: usize) -> bool {
        let mut bytes = 0;
        for frame in self.frames() {
            bytes += frame.encoding_size();
            if bytes >= threshold {
                return true;
            }
        }
        false
    }

    fn attach(&mut self, slot: usize) {
        if !self.slots[slot].attached {
            self.slots[slot].attached = true;
            self.order.push_back(slot);
        }
    }

    /// Queues a frame on the default sub-queue
    pub fn push(&mut self, frame: Frame) {
        self.slots[DEFAULT_SLOT].frames.push_back(frame);
        self.attach(DEFAULT_SLOT);
    }

    /// Queues a frame behind the existing priority run at the head of the
    /// default sub-queue
    pub fn push_priority(&mut self, frame: Frame) {
        let at = self.last_priority;
        self.slots[DEFAULT_SLOT].frames.insert(at, frame);
        self.last_priority += 1;
        self.attach(DEFAULT_SLOT);
    }

    /// Queues a frame on the sub-queue of `stream_id`, creating it on
    /// first use
    pub fn push_stream(&mut self, stream_id: u64, frame: Frame) {
        let slot = match self.by_stream.get(&stream_id) {
            Some(slot) => *slot,
            None => {
                self.slots.push(FrameQueue::default());
                let slot = self.slots.len() - 1;
                self.by_stream.insert(stream_id, slot);
                slot
            }
        };
        self.slots[slot].frames.push_back(frame);
        self.attach(slot);
    }

    /// The next frame the builder would take
    pub fn peek(&self) -> Option<&Frame> {
        let slot = *self.order.front()?;
        self.slots[slot].frames.front()
    }

    /// Splits the head frame so it fits in `max` bytes, leaving the
    /// remainder right behind it; returns false if the frame declines
    pub(crate) fn split_head(&mut self, max: usize) -> bool {
        let Some(slot) = self.order.front().copied() else {
            return false;
        };
        let Some(head) = self.slots[slot].frames.front_mut() else {
            return false;
        };
        let Some(remainder) = head.split_off(max) else {
            return false;
        };
        self.slots[slot].frames.insert(1, remainder);
        true
    }

    /// Removes the head frame of the head sub-queue and applies the
    /// round-robin bookkeeping; returns the frame with its origin slot
    pub(crate) fn pop_head(&mut self, stream_shuffle: u64) -> Option<(Frame, usize)> {
        let slot = *self.order.front()?;
        let frame = self.slots[slot].frames.pop_front()?;

        self.slots[slot].count += 1;

        if slot == DEFAULT_SLOT {
            self.last_priority = self.last_priority.saturating_sub(1);
        }

        if self.slots[slot].frames.is_empty() {
            self.order.pop_front();
            self.slots[slot].attached = false;
        } else if slot != DEFAULT_SLOT && self.slots[slot].count > stream_shuffle {
            self.order.pop_front();
            self.order.push_back(slot);
            self.slots[slot].count = 0;
        }

        Some((frame, slot))
    }

    /// Returns a frame to the head of its origin sub-queue; rotation state
    /// is restored separately via [`Self::restore`]
    fn unpop(&mut self, frame: Frame, origin: usize) {
        self.slots[origin].frames.push_front(frame);
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            order: self.order.clone(),
            counts: self.slots.iter().map(|queue| queue.count).collect(),
            last_priority: self.last_priority,
        }
    }

    /// Restores the drain order, rotation counters, and priority run
    /// captured by [`Self::snapshot`]
    ///
    /// No sub-queue is created between a snapshot and its restore, so the
    /// slot count matches.
    pub fn restore(&mut self, snapshot: &QueueSnapshot) {
        debug_assert_eq!(snapshot.counts.len(), self.slots.len());

        for queue in &mut self.slots {
            queue.attached = false;
        }
        self.order.clear();
        for slot in &snapshot.order {
            self.slots[*slot].attached = true;
            self.order.push_back(*slot);
        }
        for (queue, count) in self.slots.iter_mut().zip(&snapshot.counts) {
            queue.count = *count;
        }
        self.last_priority = snapshot.last_priority;
    }
}

/// A frame drained into the datagram currently being built, remembering
/// where it came from so a revert can put it back exactly
#[derive(Debug)]
pub(crate) struct Staged {
    pub frame: Frame,
    pub origin: usize,
}

/// Everything captured before building into one datagram
#[derive(Clone, Debug)]
pub(crate) struct CtxSnapshot {
    pub pnum: u64,
    pub sending_len: usize,
    pub queue: QueueSnapshot,
}

/// The send half of one encryption level
#[derive(Debug)]
pub struct SendCtx {
    pub level: Level,
    /// Next packet number to assign; strictly monotonic, never reused
    pub pnum: u64,
    /// Largest packet number the peer has acknowledged, for truncation
    pub largest_ack: u64,
    /// Arrival time of the packet bounding `largest_range`
    pub largest_received_at: Timestamp,
    /// ACK-range bookkeeping maintained by the ingress collaborator
    pub largest_range: u64,
    pub first_range: u64,
    pub ranges: Vec<AckRange>,
    /// An ACK should be generated before the next packing pass
    pub ack_pending: bool,
    pub queue: SendQueue,
    pub(crate) sending: Vec<Staged>,
    /// In-flight frames awaiting ACK or loss
    pub sent: VecDeque<Frame>,
}

impl SendCtx {
    pub fn new(level: Level) -> Self {
        Self {
            level,
            pnum: 0,
            largest_ack: 0,
            largest_received_at: Timestamp::ZERO,
            largest_range: 0,
            first_range: 0,
            ranges: Vec::new(),
            ack_pending: false,
            queue: SendQueue::new(),
            sending: Vec::new(),
            sent: VecDeque::new(),
        }
    }

    /// Number of frames staged into the datagram being built
    pub fn staged_len(&self) -> usize {
        self.sending.len()
    }

    pub(crate) fn snapshot(&self) -> CtxSnapshot {
        CtxSnapshot {
            pnum: self.pnum,
            sending_len: self.sending.len(),
            queue: self.queue.snapshot(),
        }
    }

    /// Rewinds to `snapshot`: staged frames beyond it return to the head
    /// of their origin sub-queues in their original order, the rotation
    /// state is restored, and the packet numbers they consumed are
    /// released
    pub(crate) fn revert_to(&mut self, snapshot: &CtxSnapshot) {
        while self.sending.len() > snapshot.sending_len {
            let staged = self.sending.pop().expect("length checked");
            self.queue.unpop(staged.frame, staged.origin);
        }
        self.queue.restore(&snapshot.queue);
        self.pnum = snapshot.pnum;
    }

    /// Moves every staged frame out of the staging list: ack-eliciting
    /// packets' frames go to the in-flight list and count toward
    /// congestion; the rest are freed. A closing connection frees
    /// everything - nothing will be retransmitted.
    pub(crate) fn commit(&mut self, congestion: &mut Congestion, closing: bool) {
        for staged in self.sending.drain(..) {
            let frame = staged.frame;
            if frame.pkt_need_ack && !closing {
                congestion.in_flight += frame.plen;
                self.sent.push_back(frame);
            }
        }
    }
}
