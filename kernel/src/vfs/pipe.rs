//! Unidirectional pipe with readiness condition variables.
//!
//! A bounded ring buffer shared by a read end and a write end. Writing
//! signals the read-readiness condition, reading frees space and signals
//! the write-readiness condition, and closing either end signals the
//! other so blocked waiters re-evaluate.

extern crate alloc;

use alloc::sync::Arc;

use crate::sync::{CondVar, Mutex};
use crate::vfs::{ReadyKind, ReadyMask, Stream};

pub const PIPE_SIZE: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipeClosed;

struct PipeBuffer {
    data: [u8; PIPE_SIZE],
    nread: usize,
    nwrite: usize,
    readopen: bool,
    writeopen: bool,
}

impl PipeBuffer {
    fn available(&self) -> usize {
        self.nwrite - self.nread
    }

    fn space(&self) -> usize {
        PIPE_SIZE - self.available()
    }
}

pub struct Pipe {
    buf: Mutex<PipeBuffer>,
    read_ready: Arc<CondVar>,
    write_ready: Arc<CondVar>,
}

impl Pipe {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            buf: Mutex::new(PipeBuffer {
                data: [0; PIPE_SIZE],
                nread: 0,
                nwrite: 0,
                readopen: true,
                writeopen: true,
            }),
            read_ready: Arc::new(CondVar::new()),
            write_ready: Arc::new(CondVar::new()),
        })
    }

    /// Non-blocking write; stores what fits and reports it.
    pub fn write(&self, data: &[u8]) -> Result<usize, PipeClosed> {
        let written = {
            let mut buf = self.buf.lock();
            if !buf.readopen {
                return Err(PipeClosed);
            }
            let n = data.len().min(buf.space());
            for &byte in &data[..n] {
                let at = buf.nwrite % PIPE_SIZE;
                buf.data[at] = byte;
                buf.nwrite += 1;
            }
            n
        };
        if written > 0 {
            self.read_ready.signal();
        }
        Ok(written)
    }

    /// Non-blocking read; drains what is buffered.
    pub fn read(&self, out: &mut [u8]) -> usize {
        let nread = {
            let mut buf = self.buf.lock();
            let n = out.len().min(buf.available());
            for slot in out[..n].iter_mut() {
                *slot = buf.data[buf.nread % PIPE_SIZE];
                buf.nread += 1;
            }
            n
        };
        if nread > 0 {
            self.write_ready.signal();
        }
        nread
    }

    pub fn close_read(&self) {
        self.buf.lock().readopen = false;
        self.write_ready.signal();
    }

    pub fn close_write(&self) {
        self.buf.lock().writeopen = false;
        self.read_ready.signal();
    }
}

/// Read end of a pipe: readable when data is buffered or the write end is
/// gone (EOF reads without blocking).
pub struct PipeReader {
    pipe: Arc<Pipe>,
}

impl PipeReader {
    pub fn read(&self, out: &mut [u8]) -> usize {
        self.pipe.read(out)
    }

    pub fn close(&self) {
        self.pipe.close_read();
    }
}

impl Stream for PipeReader {
    fn poll(&self) -> ReadyMask {
        let buf = self.pipe.buf.lock();
        if buf.available() > 0 || !buf.writeopen {
            ReadyMask::READ
        } else {
            ReadyMask::empty()
        }
    }

    fn ready_cond(&self, kind: ReadyKind) -> Option<Arc<CondVar>> {
        match kind {
            ReadyKind::Read => Some(self.pipe.read_ready.clone()),
            ReadyKind::Write | ReadyKind::Except => None,
        }
    }
}

/// Write end of a pipe: writable when buffer space exists or the read end
/// is gone (the write fails without blocking).
pub struct PipeWriter {
    pipe: Arc<Pipe>,
}

impl PipeWriter {
    pub fn write(&self, data: &[u8]) -> Result<usize, PipeClosed> {
        self.pipe.write(data)
    }

    pub fn close(&self) {
        self.pipe.close_write();
    }
}

impl Stream for PipeWriter {
    fn poll(&self) -> ReadyMask {
        let buf = self.pipe.buf.lock();
        if buf.space() > 0 || !buf.readopen {
            ReadyMask::WRITE
        } else {
            ReadyMask::empty()
        }
    }

    fn ready_cond(&self, kind: ReadyKind) -> Option<Arc<CondVar>> {
        match kind {
            ReadyKind::Write => Some(self.pipe.write_ready.clone()),
            ReadyKind::Read | ReadyKind::Except => None,
        }
    }
}

/// Create a connected pipe pair.
pub fn pipe() -> (Arc<PipeReader>, Arc<PipeWriter>) {
    let inner = Pipe::new();
    (
        Arc::new(PipeReader {
            pipe: inner.clone(),
        }),
        Arc::new(PipeWriter { pipe: inner }),
    )
}
