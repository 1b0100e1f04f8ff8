//! Minibatch slots
//!
//! A slot is one entry of the loader's ring: staging buffers the decoder
//! writes into, optional device-side buffers the consumer reads from, and a
//! lifecycle state. Exactly one side owns a slot at a time; ownership moves
//! between worker and consumer through channels, so the state field is a
//! checked record of the lifecycle rather than a synchronization primitive.

use crate::buffer::Buffer;

/// Lifecycle state of a minibatch slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// Free and waiting for the worker
    Empty,
    /// Worker is decoding into the slot
    Filling,
    /// Committed and waiting for the consumer
    Ready,
    /// Exposed to the consumer
    Draining,
}

impl SlotState {
    /// Whether `next` is a legal successor in the slot cycle. Ready and
    /// Filling may fall back to Empty when a minibatch is recycled by a
    /// reset or a failed fill.
    fn permits(self, next: SlotState) -> bool {
        matches!(
            (self, next),
            (SlotState::Empty, SlotState::Filling)
                | (SlotState::Filling, SlotState::Ready)
                | (SlotState::Ready, SlotState::Draining)
                | (SlotState::Draining, SlotState::Empty)
                | (SlotState::Ready, SlotState::Empty)
                | (SlotState::Filling, SlotState::Empty)
        )
    }
}

/// One entry in the loader's slot ring
pub struct MinibatchSlot {
    data: Buffer,
    labels: Buffer,
    device_data: Option<Buffer>,
    device_labels: Option<Buffer>,
    state: SlotState,
    epoch: u64,
}

impl MinibatchSlot {
    /// Assemble a slot from its buffers. Device buffers come in pairs: both
    /// present (accelerator) or both absent (host).
    pub fn new(
        data: Buffer,
        labels: Buffer,
        device_data: Option<Buffer>,
        device_labels: Option<Buffer>,
    ) -> Self {
        debug_assert_eq!(device_data.is_some(), device_labels.is_some());
        Self {
            data,
            labels,
            device_data,
            device_labels,
            state: SlotState::Empty,
            epoch: 0,
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> SlotState {
        self.state
    }

    /// Advance the lifecycle. A transition outside the slot cycle is a logic
    /// bug in the pipeline, not a recoverable condition.
    pub fn set_state(&mut self, next: SlotState) {
        debug_assert!(
            self.state.permits(next),
            "illegal slot transition {:?} -> {:?}",
            self.state,
            next
        );
        self.state = next;
    }

    /// Epoch the slot's contents were filled in
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Stamp the fill epoch
    pub fn set_epoch(&mut self, epoch: u64) {
        self.epoch = epoch;
    }

    /// Staging region the decoder writes pixel output into
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Staging region for label bytes
    pub fn labels_mut(&mut self) -> &mut [u8] {
        &mut self.labels
    }

    /// Copy the staging buffers into the device-side pair, if present
    pub fn transfer_to_device(&mut self) {
        if let Some(device_data) = &mut self.device_data {
            device_data.copy_from_slice(&self.data);
        }
        if let Some(device_labels) = &mut self.device_labels {
            device_labels.copy_from_slice(&self.labels);
        }
    }

    /// Whether the slot carries a separate device-side copy
    pub fn has_device_copy(&self) -> bool {
        self.device_data.is_some()
    }

    /// Pixel bytes the consumer reads: device memory when present, the
    /// staging buffer otherwise
    pub fn payload(&self) -> &[u8] {
        self.device_data.as_deref().unwrap_or(&self.data)
    }

    /// Label bytes the consumer reads
    pub fn label_payload(&self) -> &[u8] {
        self.device_labels.as_deref().unwrap_or(&self.labels)
    }
}
