//! Unified kernel error type.
//!
//! Subsystems keep their own error enums; everything converts into
//! `KernelError` at the boundaries so callers that span subsystems can use
//! `?` without bespoke plumbing.

use crate::mm::Fault;
use crate::pci::PciError;
use crate::sched::SchedError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    InvalidArgument,
    BadHandle,
    OutOfMemory,
    /// User-memory access failed
    Fault,
    NotSupported,
    /// Hardware or backend not initialized/available
    NotReady,
}

impl From<Fault> for KernelError {
    fn from(_: Fault) -> Self {
        KernelError::Fault
    }
}

impl From<PciError> for KernelError {
    fn from(err: PciError) -> Self {
        match err {
            PciError::UnalignedOffset | PciError::OffsetOutOfRange | PciError::BadSegment => {
                KernelError::InvalidArgument
            }
            PciError::NoConfigBackend => KernelError::NotReady,
        }
    }
}

impl From<SchedError> for KernelError {
    fn from(err: SchedError) -> Self {
        match err {
            SchedError::TooManyThreads => KernelError::OutOfMemory,
        }
    }
}
