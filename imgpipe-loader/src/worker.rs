//! The fill thread
//!
//! The worker owns the reader, the decoder, and the device handle. It pulls
//! empty slots from the free channel, fills and commits them, and pushes
//! them to the ready channel. Both slot channels are bounded at the pipeline
//! depth and only that many slots exist, so slot sends can never block; the
//! worker parks only when every slot is filled and waiting on the consumer.

use std::sync::Arc;

use crossbeam::channel::{Receiver, Sender};
use crossbeam::select;
use tracing::{debug, error, warn};

use imgpipe_core::{
    Device, Error, LoaderConfig, MinibatchSlot, RecordDecoder, RecordReader, Result, SlotState,
};

/// Control messages, delivered out of band from the slot flow
pub(crate) enum Command {
    /// Rewind the reader and open a new generation. The ack carries the
    /// rewind status and the generation that starts after it.
    Reset { ack: Sender<(Result<()>, u64)> },
    /// Exit the fill loop
    Stop,
}

/// One filled (or failed) slot on its way to the consumer
pub(crate) struct Delivery {
    pub slot: MinibatchSlot,
    pub generation: u64,
    pub error: Option<Error>,
}

pub(crate) struct Worker {
    reader: Box<dyn RecordReader>,
    decoder: Box<dyn RecordDecoder>,
    device: Arc<dyn Device>,
    config: LoaderConfig,
    generation: u64,
}

impl Worker {
    pub(crate) fn new(
        reader: Box<dyn RecordReader>,
        decoder: Box<dyn RecordDecoder>,
        device: Arc<dyn Device>,
        config: LoaderConfig,
    ) -> Self {
        Self {
            reader,
            decoder,
            device,
            config,
            generation: 0,
        }
    }

    /// Fill loop. Returns when told to stop or when the consumer side hangs
    /// up; slots held at that point drop back into the pool.
    pub(crate) fn run(
        mut self,
        cmd_rx: Receiver<Command>,
        free_rx: Receiver<MinibatchSlot>,
        ready_tx: Sender<Delivery>,
    ) {
        debug!("fill thread started");
        loop {
            let mut slot = select! {
                recv(cmd_rx) -> cmd => match cmd {
                    Ok(Command::Reset { ack }) => {
                        self.handle_reset(ack);
                        continue;
                    }
                    Ok(Command::Stop) | Err(_) => return,
                },
                recv(free_rx) -> slot => match slot {
                    Ok(slot) => slot,
                    Err(_) => return,
                },
            };

            // commands queued while we waited outrank the fill; a reset must
            // not be delayed behind a minibatch of the old generation
            while let Ok(cmd) = cmd_rx.try_recv() {
                match cmd {
                    Command::Reset { ack } => self.handle_reset(ack),
                    Command::Stop => return,
                }
            }

            let error = match self.fill(&mut slot) {
                Ok(()) => None,
                Err(err) => {
                    error!(error = %err, "minibatch fill failed");
                    if slot.state() != SlotState::Empty {
                        slot.set_state(SlotState::Empty);
                    }
                    Some(err)
                }
            };
            let delivery = Delivery {
                slot,
                generation: self.generation,
                error,
            };
            if ready_tx.send(delivery).is_err() {
                return;
            }
        }
    }

    fn handle_reset(&mut self, ack: Sender<(Result<()>, u64)>) {
        let status = self.reader.reset();
        self.generation += 1;
        debug!(generation = self.generation, "reader rewound");
        let _ = ack.send((status, self.generation));
    }

    /// Decode exactly one minibatch into `slot` and commit it. The reader
    /// returns short batches at epoch boundaries, so the fill loops until the
    /// slot holds `minibatch_size` items; the slot is stamped with the epoch
    /// its final record came from.
    fn fill(&mut self, slot: &mut MinibatchSlot) -> Result<()> {
        slot.set_state(SlotState::Filling);
        let item_size = self.config.item_max_size();
        let label_stride = self.config.label_stride();
        let want = self.config.minibatch_size;

        let mut filled = 0;
        while filled < want {
            let records = self.next_records(want - filled)?;
            if records.is_empty() {
                return Err(Error::InvalidOperation(
                    "reader produced an empty batch mid-epoch".into(),
                ));
            }
            for record in &records {
                let dest = &mut slot.data_mut()[filled * item_size..(filled + 1) * item_size];
                self.decoder.decode_into(&record.bytes, dest)?;

                let copy = record.label.len().min(label_stride);
                let offset = filled * label_stride;
                slot.labels_mut()[offset..offset + copy].copy_from_slice(&record.label[..copy]);
                filled += 1;
            }
        }

        self.device.stage_and_commit(slot)?;
        slot.set_epoch(self.reader.epoch());
        slot.set_state(SlotState::Ready);
        debug!(epoch = slot.epoch(), items = filled, "minibatch staged");
        Ok(())
    }

    /// Batches are all-or-nothing, so a failed read left the cursor at the
    /// batch start; retry the same position once before surfacing the error.
    fn next_records(&mut self, want: usize) -> Result<Vec<imgpipe_core::Record>> {
        match self.reader.next_batch(want) {
            Ok(records) => Ok(records),
            Err(err) => {
                warn!(error = %err, "record batch failed, retrying once");
                self.reader.next_batch(want)
            }
        }
    }
}
