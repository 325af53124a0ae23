//! Fixed pool of driver buffers shared with the capture hardware
//!
//! Each slot is owned by exactly one side at a time. `dequeue` moves a slot
//! from hardware to software, `requeue` moves it back; these (plus the bulk
//! transitions used around stream on/off) are the only ownership mutators.

use crate::driver::{CaptureDriver, DequeuedBuffer};
use crate::error::{CaptureError, Result};
use std::io;
use std::ops::Deref;

/// Which side may currently touch a buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    /// Queued to the driver, which may write into it
    Hardware,
    /// Held by the process, readable
    Software,
}

struct Slot<M> {
    mapping: M,
    ownership: Ownership,
}

/// Pool of memory-mapped capture buffers
pub struct BufferPool<M> {
    slots: Vec<Slot<M>>,
}

impl<M> Default for BufferPool<M> {
    fn default() -> Self {
        Self { slots: Vec::new() }
    }
}

impl<M: Deref<Target = [u8]>> BufferPool<M> {
    /// Create an empty, uninitialized pool
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate, map and queue `count` driver buffers
    ///
    /// On any failure every buffer mapped so far is unmapped and the driver's
    /// allocation is released before the error is returned.
    pub fn init<D>(&mut self, driver: &mut D, count: u32, min_buffers: u32) -> Result<()>
    where
        D: CaptureDriver<Mapping = M>,
    {
        if self.is_initialized() {
            log::debug!("Buffer pool already initialized, tearing down first");
            self.uninit(driver);
        }

        let granted = driver
            .request_buffers(count)
            .map_err(|e| CaptureError::BufferAllocation(e.to_string()))?;

        if granted < min_buffers.max(1) {
            release_driver_buffers(driver);
            return Err(CaptureError::BufferAllocation(format!(
                "driver granted {} of {} buffers",
                granted, count
            )));
        }

        if let Err(e) = self.map_and_queue(driver, granted) {
            // The driver holds buffers even when none got mapped
            self.slots.clear();
            release_driver_buffers(driver);
            return Err(e);
        }

        log::info!("Buffer pool ready: {} buffers", granted);
        Ok(())
    }

    fn map_and_queue<D>(&mut self, driver: &mut D, granted: u32) -> Result<()>
    where
        D: CaptureDriver<Mapping = M>,
    {
        self.slots.reserve_exact(granted as usize);

        for index in 0..granted {
            let info = driver
                .query_buffer(index)
                .map_err(|source| CaptureError::BufferMap { index, source })?;
            let mapping = driver
                .map_buffer(&info)
                .map_err(|source| CaptureError::BufferMap { index, source })?;

            self.slots.push(Slot {
                mapping,
                ownership: Ownership::Software,
            });
            self.requeue(driver, index)?;
        }

        Ok(())
    }

    /// Unmap every buffer and release the driver's allocation
    ///
    /// No-op on a pool that holds no buffers.
    pub fn uninit<D>(&mut self, driver: &mut D)
    where
        D: CaptureDriver<Mapping = M>,
    {
        if self.slots.is_empty() {
            return;
        }

        // Mappings must be gone before the driver frees the buffers
        self.slots.clear();
        release_driver_buffers(driver);
    }

    /// Unmap every buffer without talking to the driver
    pub fn unmap_all(&mut self) {
        self.slots.clear();
    }

    /// Take the next filled buffer back from the driver
    pub fn dequeue<D>(&mut self, driver: &mut D) -> Result<DequeuedBuffer>
    where
        D: CaptureDriver<Mapping = M>,
    {
        let buffer = driver.dequeue_buffer().map_err(CaptureError::Dequeue)?;

        let slot = self.slots.get_mut(buffer.index as usize).ok_or_else(|| {
            CaptureError::Dequeue(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("driver returned unknown buffer {}", buffer.index),
            ))
        })?;

        if slot.ownership != Ownership::Hardware {
            return Err(CaptureError::Dequeue(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("driver returned buffer {} that was not queued", buffer.index),
            )));
        }

        slot.ownership = Ownership::Software;
        Ok(buffer)
    }

    /// Hand a software-owned buffer back to the driver
    pub fn requeue<D>(&mut self, driver: &mut D, index: u32) -> Result<()>
    where
        D: CaptureDriver<Mapping = M>,
    {
        let slot = self.slots.get_mut(index as usize).ok_or_else(|| CaptureError::Requeue {
            index,
            source: io::Error::new(io::ErrorKind::InvalidInput, "no such buffer"),
        })?;

        if slot.ownership != Ownership::Software {
            return Err(CaptureError::Requeue {
                index,
                source: io::Error::new(io::ErrorKind::InvalidInput, "buffer is already queued"),
            });
        }

        driver
            .queue_buffer(index)
            .map_err(|source| CaptureError::Requeue { index, source })?;
        slot.ownership = Ownership::Hardware;
        Ok(())
    }

    /// Queue every software-owned buffer, e.g. before restarting a stream
    pub fn requeue_all<D>(&mut self, driver: &mut D) -> Result<()>
    where
        D: CaptureDriver<Mapping = M>,
    {
        for index in 0..self.slots.len() as u32 {
            if self.slots[index as usize].ownership == Ownership::Software {
                self.requeue(driver, index)?;
            }
        }
        Ok(())
    }

    /// Mark every buffer software-owned after the driver dropped its queue
    pub fn reclaim_all(&mut self) {
        for slot in &mut self.slots {
            slot.ownership = Ownership::Software;
        }
    }

    /// Contents of a software-owned buffer
    pub fn bytes(&self, index: u32) -> Option<&[u8]> {
        self.slots
            .get(index as usize)
            .filter(|slot| slot.ownership == Ownership::Software)
            .map(|slot| &*slot.mapping)
    }

    pub fn ownership(&self, index: u32) -> Option<Ownership> {
        self.slots.get(index as usize).map(|slot| slot.ownership)
    }

    pub fn is_initialized(&self) -> bool {
        !self.slots.is_empty()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Get pool statistics
    pub fn stats(&self) -> PoolStats {
        let hardware = self
            .slots
            .iter()
            .filter(|slot| slot.ownership == Ownership::Hardware)
            .count();

        PoolStats {
            capacity: self.slots.len(),
            hardware,
            software: self.slots.len() - hardware,
        }
    }
}

fn release_driver_buffers<D: CaptureDriver>(driver: &mut D) {
    if let Err(e) = driver.request_buffers(0) {
        log::warn!("Failed to release driver buffers: {}", e);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub capacity: usize,
    pub hardware: usize,
    pub software: usize,
}
