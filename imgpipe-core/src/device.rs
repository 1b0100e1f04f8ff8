//! Device abstraction for minibatch memory
//!
//! The device decides where the consumer-visible copy of a minibatch lives.
//! The variant is picked once at construction from [`DeviceParams`] and held
//! as a trait object; the two concrete variants are host memory only, and
//! host memory plus a separate device-side copy.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::buffer::{BufferPool, PoolStats};
use crate::error::Result;
use crate::slot::MinibatchSlot;

/// Where minibatch memory lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceKind {
    /// Consumer reads the staging buffers directly
    Host,
    /// Consumer reads a separate device-side copy, committed per minibatch
    Accelerator,
}

/// Device selection, fixed at construction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceParams {
    /// Which device variant to construct
    pub kind: DeviceKind,

    /// Ordinal of the target device, for deployments with several
    pub device_id: u32,
}

impl Default for DeviceParams {
    fn default() -> Self {
        Self {
            kind: DeviceKind::Host,
            device_id: 0,
        }
    }
}

/// Buffer lifecycle for minibatch slots
pub trait Device: Send + Sync {
    /// Allocate one slot's buffers. Failure is fatal and surfaces through
    /// `start`.
    fn allocate_slot(&self, data_bytes: usize, label_bytes: usize) -> Result<MinibatchSlot>;

    /// Make a filled slot's bytes addressable to the consumer. The commit
    /// must be complete when this returns; a slot is never marked Ready with
    /// a partial transfer.
    fn stage_and_commit(&self, slot: &mut MinibatchSlot) -> Result<()>;

    /// Allocation accounting for this device's pool
    fn pool_stats(&self) -> PoolStats;
}

/// Construct the device variant selected by `params`
pub fn open_device(params: &DeviceParams, pool: Arc<BufferPool>) -> Arc<dyn Device> {
    match params.kind {
        DeviceKind::Host => Arc::new(HostDevice { pool }),
        DeviceKind::Accelerator => Arc::new(TransferDevice {
            pool,
            device_id: params.device_id,
        }),
    }
}

/// Host-memory device: the staging buffer is the buffer the consumer reads
pub struct HostDevice {
    pool: Arc<BufferPool>,
}

impl Device for HostDevice {
    fn allocate_slot(&self, data_bytes: usize, label_bytes: usize) -> Result<MinibatchSlot> {
        Ok(MinibatchSlot::new(
            self.pool.allocate(data_bytes)?,
            self.pool.allocate(label_bytes)?,
            None,
            None,
        ))
    }

    fn stage_and_commit(&self, _slot: &mut MinibatchSlot) -> Result<()> {
        // the decode already wrote the addressable buffer
        Ok(())
    }

    fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }
}

/// Device with separate addressable memory
///
/// Commit copies the staging pair into the device-side pair and returns only
/// once the copy is complete.
pub struct TransferDevice {
    pool: Arc<BufferPool>,
    device_id: u32,
}

impl Device for TransferDevice {
    fn allocate_slot(&self, data_bytes: usize, label_bytes: usize) -> Result<MinibatchSlot> {
        Ok(MinibatchSlot::new(
            self.pool.allocate(data_bytes)?,
            self.pool.allocate(label_bytes)?,
            Some(self.pool.allocate(data_bytes)?),
            Some(self.pool.allocate(label_bytes)?),
        ))
    }

    fn stage_and_commit(&self, slot: &mut MinibatchSlot) -> Result<()> {
        slot.transfer_to_device();
        trace!(device_id = self.device_id, "minibatch committed to device");
        Ok(())
    }

    fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_device_exposes_staging_directly() {
        let pool = BufferPool::new();
        let device = open_device(&DeviceParams::default(), Arc::clone(&pool));

        let mut slot = device.allocate_slot(8, 4).unwrap();
        assert!(!slot.has_device_copy());
        assert_eq!(pool.stats().outstanding_buffers, 2);

        slot.data_mut().copy_from_slice(&[1; 8]);
        device.stage_and_commit(&mut slot).unwrap();
        assert_eq!(slot.payload(), &[1; 8]);
    }

    #[test]
    fn test_transfer_device_commits_a_full_copy() {
        let pool = BufferPool::new();
        let params = DeviceParams {
            kind: DeviceKind::Accelerator,
            device_id: 0,
        };
        let device = open_device(&params, Arc::clone(&pool));

        let mut slot = device.allocate_slot(8, 4).unwrap();
        assert!(slot.has_device_copy());
        assert_eq!(pool.stats().outstanding_buffers, 4);

        slot.data_mut().copy_from_slice(&[7; 8]);
        slot.labels_mut().copy_from_slice(&[3; 4]);

        // nothing is visible before the commit
        assert_eq!(slot.payload(), &[0; 8]);

        device.stage_and_commit(&mut slot).unwrap();
        assert_eq!(slot.payload(), &[7; 8]);
        assert_eq!(slot.label_payload(), &[3; 4]);
    }

    #[test]
    fn test_dropping_slots_returns_all_buffers() {
        let pool = BufferPool::new();
        let params = DeviceParams {
            kind: DeviceKind::Accelerator,
            device_id: 1,
        };
        let device = open_device(&params, Arc::clone(&pool));

        let slots: Vec<_> = (0..3)
            .map(|_| device.allocate_slot(16, 4).unwrap())
            .collect();
        assert_eq!(pool.stats().outstanding_buffers, 12);

        drop(slots);
        assert_eq!(pool.stats().outstanding_buffers, 0);
        assert_eq!(pool.stats().outstanding_bytes, 0);
    }
}
