//! Loader handle and slot ring
//!
//! The loader owns the consumer side of the pipeline: it allocates the slot
//! ring, spawns the fill thread, and moves slots between the two through a
//! pair of bounded channels. Ownership of a slot is carried by the channels
//! themselves; whoever holds the value holds the slot, so no lock guards the
//! buffers.
//!
//! Reset is generation-tagged: the loader stamps every delivery with the
//! worker's generation counter and discards deliveries filled before the
//! most recent reset, recycling their slots instead of exposing stale data.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use tracing::{debug, info};

use imgpipe_core::{
    open_device, BufferPool, DeviceParams, Error, LoaderConfig, MinibatchSlot, PoolStats,
    RecordDecoder, RecordReader, Result, SlotState,
};

use crate::worker::{Command, Delivery, Worker};

/// Upper bound on how long a reset waits for the fill thread to rewind
#[cfg(not(test))]
const RESET_ACK_TIMEOUT: Duration = Duration::from_secs(30);
#[cfg(test)]
const RESET_ACK_TIMEOUT: Duration = Duration::from_millis(50);

/// A borrowed view of the minibatch currently exposed to the consumer
///
/// The view borrows the loader; the underlying slot stays pinned until the
/// next call to [`Loader::next`], [`Loader::reset`], or [`Loader::stop`].
#[derive(Debug)]
pub struct Minibatch<'a> {
    /// Planar pixel bytes, `minibatch_size` items of `item_max_size` each
    pub data: &'a [u8],
    /// Label bytes, `minibatch_size` items of `label_stride` each
    pub labels: &'a [u8],
    /// Epoch the minibatch was filled in
    pub epoch: u64,
}

/// Handle to a running pipeline
///
/// Constructed only by [`Loader::start`], so a handle always refers to a
/// spawned fill thread; there is no unstarted state to misuse.
pub struct Loader {
    config: LoaderConfig,
    pool: Arc<BufferPool>,
    free_tx: Sender<MinibatchSlot>,
    ready_rx: Receiver<Delivery>,
    cmd_tx: Sender<Command>,
    current: Option<MinibatchSlot>,
    generation: u64,
    /// Ack channel of a reset that timed out; the late ack carries the
    /// generation the worker moved to
    pending_ack: Option<Receiver<(Result<()>, u64)>>,
    worker: Option<JoinHandle<()>>,
}

impl Loader {
    /// Validate the configuration, allocate `pipeline_depth` slots, and
    /// spawn the fill thread. The first minibatch starts decoding before
    /// this returns.
    pub fn start(
        config: LoaderConfig,
        reader: Box<dyn RecordReader>,
        decoder: Box<dyn RecordDecoder>,
        device_params: &DeviceParams,
    ) -> Result<Self> {
        config.validate()?;
        if decoder.output_size() != config.item_max_size() {
            return Err(Error::SizeMismatch {
                configured: config.item_max_size(),
                actual: decoder.output_size(),
            });
        }
        if reader.num_records() == 0 {
            return Err(Error::InvalidConfig("source holds no records".into()));
        }

        let pool = BufferPool::new();
        let device = open_device(device_params, Arc::clone(&pool));

        let depth = config.pipeline_depth;
        let (free_tx, free_rx) = bounded(depth);
        let (ready_tx, ready_rx) = bounded(depth);
        let (cmd_tx, cmd_rx) = unbounded();

        let data_bytes = config.minibatch_size * config.item_max_size();
        let label_bytes = config.minibatch_size * config.label_stride();
        for _ in 0..depth {
            let slot = device.allocate_slot(data_bytes, label_bytes)?;
            // capacity equals depth, the send cannot block
            free_tx.send(slot).map_err(|_| Error::WorkerGone)?;
        }

        info!(
            minibatch_size = config.minibatch_size,
            pipeline_depth = depth,
            records = reader.num_records(),
            "pipeline started"
        );

        let worker = Worker::new(reader, decoder, device, config.clone());
        let handle = thread::Builder::new()
            .name("imgpipe-fill".into())
            .spawn(move || worker.run(cmd_rx, free_rx, ready_tx))?;

        Ok(Self {
            config,
            pool,
            free_tx,
            ready_rx,
            cmd_tx,
            current: None,
            generation: 0,
            pending_ack: None,
            worker: Some(handle),
        })
    }

    /// Release the previous minibatch and block until the next one is ready.
    ///
    /// A fill error is returned once and consumes that minibatch's records;
    /// the following call delivers the batch the worker filled after the
    /// failure.
    pub fn next(&mut self) -> Result<Minibatch<'_>> {
        self.recycle_current();
        loop {
            let delivery = self.ready_rx.recv().map_err(|_| Error::WorkerGone)?;
            if delivery.generation != self.generation {
                // the worker acks a rewind before it fills the new
                // generation, so a newer delivery means a late ack from a
                // timed-out reset is already waiting
                self.adopt_pending_generation();
            }
            if delivery.generation != self.generation {
                // filled before the last reset, never expose it
                self.recycle(delivery.slot);
                continue;
            }
            if let Some(error) = delivery.error {
                self.recycle(delivery.slot);
                return Err(error);
            }
            let mut slot = delivery.slot;
            slot.set_state(SlotState::Draining);
            let slot = self.current.insert(slot);
            return Ok(Minibatch {
                data: slot.payload(),
                labels: slot.label_payload(),
                epoch: slot.epoch(),
            });
        }
    }

    /// The minibatch most recently returned by [`Loader::next`], if it has
    /// not been released since.
    pub fn current(&self) -> Option<Minibatch<'_>> {
        self.current.as_ref().map(|slot| Minibatch {
            data: slot.payload(),
            labels: slot.label_payload(),
            epoch: slot.epoch(),
        })
    }

    /// Rewind the source to the start of its current epoch and discard every
    /// minibatch filled before the rewind, including prefetched ones.
    ///
    /// A timeout does not wedge the pipeline: the worker's acknowledgment is
    /// adopted whenever it eventually arrives.
    pub fn reset(&mut self) -> Result<()> {
        self.recycle_current();
        self.adopt_pending_generation();
        let (ack_tx, ack_rx) = bounded(1);
        self.cmd_tx
            .send(Command::Reset { ack: ack_tx })
            .map_err(|_| Error::WorkerGone)?;

        // hand queued deliveries straight back so the worker is never
        // starved of slots while we wait for the ack
        while let Ok(delivery) = self.ready_rx.try_recv() {
            self.recycle(delivery.slot);
        }

        match ack_rx.recv_timeout(RESET_ACK_TIMEOUT) {
            Ok((status, generation)) => {
                self.generation = generation;
                self.pending_ack = None;
                debug!(generation, "reset acknowledged");
                status
            }
            Err(RecvTimeoutError::Timeout) => {
                // keep the channel; the worker will still ack once it gets
                // to the command, and the generation is adopted then
                self.pending_ack = Some(ack_rx);
                Err(Error::ResetTimedOut)
            }
            Err(RecvTimeoutError::Disconnected) => Err(Error::WorkerGone),
        }
    }

    /// Catch up with a rewind whose ack arrived after its reset timed out.
    /// The rewind status was already reported as the timeout, so only the
    /// generation is taken from the late ack.
    fn adopt_pending_generation(&mut self) {
        let Some(ack) = &self.pending_ack else { return };
        match ack.try_recv() {
            Ok((_, generation)) => {
                self.generation = generation;
                self.pending_ack = None;
                debug!(generation, "late reset acknowledgment adopted");
            }
            Err(TryRecvError::Empty) => {}
            Err(TryRecvError::Disconnected) => self.pending_ack = None,
        }
    }

    /// Stop the fill thread and release every slot. Consumes the handle; an
    /// error means the fill thread panicked, not that teardown was skipped.
    pub fn stop(mut self) -> Result<()> {
        self.shutdown()
    }

    /// Configuration the pipeline was started with
    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// Allocation accounting for the pipeline's buffer pool
    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// The pipeline's buffer pool, which outlives the handle
    pub fn pool(&self) -> Arc<BufferPool> {
        Arc::clone(&self.pool)
    }

    fn recycle_current(&mut self) {
        if let Some(slot) = self.current.take() {
            self.recycle(slot);
        }
    }

    /// Return a slot to the free channel. Discarded deliveries arrive Ready
    /// and the current slot arrives Draining; both fall back to Empty.
    fn recycle(&self, mut slot: MinibatchSlot) {
        if slot.state() != SlotState::Empty {
            slot.set_state(SlotState::Empty);
        }
        let _ = self.free_tx.send(slot);
    }

    fn shutdown(&mut self) -> Result<()> {
        let Some(handle) = self.worker.take() else {
            return Ok(());
        };
        self.recycle_current();
        let _ = self.cmd_tx.send(Command::Stop);
        debug!("waiting for fill thread");
        handle.join().map_err(|_| Error::WorkerGone)
    }
}

impl Drop for Loader {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}
