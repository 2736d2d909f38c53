//! Handle table and stream readiness interface.
//!
//! `select` only needs two things from a handle: whether a non-blocking
//! read/write/except would make progress right now, and (optionally) a
//! condition variable that fires when that might have changed. Both are
//! the `Stream` trait. Handles live in a fixed-size per-process fd table
//! and are reference-counted, so a resolved handle stays valid even if
//! the fd is closed while a waiter sleeps.

pub mod pipe;

extern crate alloc;

use alloc::sync::Arc;

use bitflags::bitflags;

use crate::sync::{CondVar, Mutex};

/// Size of the per-process fd table.
pub const MAX_HANDLES: usize = 64;

bitflags! {
    /// Readiness bits reported by `Stream::poll`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ReadyMask: u8 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const EXCEPT = 1 << 2;
    }
}

/// One of the three readiness kinds select can wait for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyKind {
    Read,
    Write,
    Except,
}

impl ReadyKind {
    pub const ALL: [ReadyKind; 3] = [ReadyKind::Read, ReadyKind::Write, ReadyKind::Except];

    pub fn mask(self) -> ReadyMask {
        match self {
            ReadyKind::Read => ReadyMask::READ,
            ReadyKind::Write => ReadyMask::WRITE,
            ReadyKind::Except => ReadyMask::EXCEPT,
        }
    }
}

/// Readiness interface of an open handle.
#[cfg_attr(test, mockall::automock)]
pub trait Stream: Send + Sync {
    /// Current readiness snapshot.
    fn poll(&self) -> ReadyMask;

    /// Condition variable signaled when readiness of `kind` may have
    /// changed, if the stream supports waiting for it.
    fn ready_cond(&self, kind: ReadyKind) -> Option<Arc<CondVar>>;
}

impl dyn Stream {
    pub fn is_ready(&self, kind: ReadyKind) -> bool {
        self.poll().contains(kind.mask())
    }
}

/// Fixed-size table of open handles.
pub struct FdTable {
    slots: [Option<Arc<dyn Stream>>; MAX_HANDLES],
}

impl FdTable {
    pub fn new() -> Self {
        Self {
            slots: [const { None }; MAX_HANDLES],
        }
    }

    /// Install a stream in the lowest free slot.
    pub fn install(&mut self, stream: Arc<dyn Stream>) -> Option<usize> {
        let fd = self.slots.iter().position(|s| s.is_none())?;
        self.slots[fd] = Some(stream);
        Some(fd)
    }

    /// Install a stream at a specific fd, replacing any previous one.
    pub fn install_at(&mut self, fd: usize, stream: Arc<dyn Stream>) {
        if fd < MAX_HANDLES {
            self.slots[fd] = Some(stream);
        }
    }

    pub fn close(&mut self, fd: usize) -> bool {
        if fd < MAX_HANDLES {
            self.slots[fd].take().is_some()
        } else {
            false
        }
    }

    pub fn get(&self, fd: usize) -> Option<Arc<dyn Stream>> {
        self.slots.get(fd)?.clone()
    }

    pub fn clear(&mut self) {
        self.slots = [const { None }; MAX_HANDLES];
    }
}

impl Default for FdTable {
    fn default() -> Self {
        Self::new()
    }
}

lazy_static::lazy_static! {
    /// The process-wide fd table.
    pub static ref FD_TABLE: Mutex<FdTable> = Mutex::new(FdTable::new());
}
