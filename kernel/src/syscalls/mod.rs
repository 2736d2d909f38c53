//! System call surface.
//!
//! Numeric dispatch over the time and multiplexing calls this core
//! provides. Arguments arrive as raw `u64` words; every user pointer goes
//! through `mm` copy helpers before any blocking, and results map to the
//! familiar 0-or-negative-errno convention.

pub mod select;
pub mod time;

use crate::error::KernelError;
use crate::mm::Fault;
use crate::posix;

// Syscall numbers: time group, then I/O multiplexing.
pub const SYS_TIME: u32 = 0x6000;
pub const SYS_GETTIMEOFDAY: u32 = 0x6001;
pub const SYS_CLOCK_GETTIME: u32 = 0x6003;
pub const SYS_CLOCK_GETRES: u32 = 0x6005;
pub const SYS_NANOSLEEP: u32 = 0x6006;
pub const SYS_SELECT: u32 = 0x5003;

/// Syscall error kinds with their POSIX mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyscallError {
    InvalidSyscall,    // ENOSYS
    InvalidArgument,   // EINVAL
    BadFileDescriptor, // EBADF
    OutOfMemory,       // ENOMEM
    BadAddress,        // EFAULT
    NotSupported,      // EOPNOTSUPP
    Interrupted,       // EINTR
}

impl SyscallError {
    pub fn errno(self) -> i64 {
        match self {
            SyscallError::InvalidSyscall => posix::ENOSYS,
            SyscallError::InvalidArgument => posix::EINVAL,
            SyscallError::BadFileDescriptor => posix::EBADF,
            SyscallError::OutOfMemory => posix::ENOMEM,
            SyscallError::BadAddress => posix::EFAULT,
            SyscallError::NotSupported => posix::EOPNOTSUPP,
            SyscallError::Interrupted => posix::EINTR,
        }
    }
}

impl From<Fault> for SyscallError {
    fn from(_: Fault) -> Self {
        SyscallError::BadAddress
    }
}

impl From<KernelError> for SyscallError {
    fn from(err: KernelError) -> Self {
        match err {
            KernelError::InvalidArgument => SyscallError::InvalidArgument,
            KernelError::BadHandle => SyscallError::BadFileDescriptor,
            KernelError::OutOfMemory => SyscallError::OutOfMemory,
            KernelError::Fault => SyscallError::BadAddress,
            KernelError::NotSupported | KernelError::NotReady => SyscallError::NotSupported,
        }
    }
}

pub type SyscallResult = Result<u64, SyscallError>;

/// Flatten a syscall result to the kernel/user ABI value.
pub fn result_to_raw(result: SyscallResult) -> i64 {
    match result {
        Ok(value) => value as i64,
        Err(err) => -err.errno(),
    }
}

/// Require exactly `count` argument words.
fn extract_args(args: &[u64], count: usize) -> Result<&[u64], SyscallError> {
    if args.len() < count {
        return Err(SyscallError::InvalidArgument);
    }
    Ok(&args[..count])
}

/// Dispatch a syscall by number.
pub fn dispatch(syscall_id: u32, args: &[u64]) -> SyscallResult {
    match syscall_id {
        SYS_TIME => time::sys_time(args),
        SYS_GETTIMEOFDAY => time::sys_gettimeofday(args),
        SYS_CLOCK_GETTIME => time::sys_clock_gettime(args),
        SYS_CLOCK_GETRES => time::sys_clock_getres(args),
        SYS_NANOSLEEP => time::sys_nanosleep(args),
        SYS_SELECT => select::sys_select(args),
        _ => Err(SyscallError::InvalidSyscall),
    }
}
