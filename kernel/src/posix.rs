//! POSIX-facing types and constants shared by the syscall layer
//! and the in-kernel time/readiness machinery.

use crate::vfs::MAX_HANDLES;

/// Nanosecond-precision time value (clock_gettime and friends)
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Timespec {
    pub tv_sec: i64,
    pub tv_nsec: i64,
}

/// Microsecond-precision time value (gettimeofday, select)
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Timeval {
    pub tv_sec: i64,
    pub tv_usec: i64,
}

impl Timeval {
    pub const ZERO: Timeval = Timeval { tv_sec: 0, tv_usec: 0 };

    pub fn is_zero(&self) -> bool {
        self.tv_sec == 0 && self.tv_usec == 0
    }
}

/// Obsolete timezone argument of gettimeofday; always reported as zeros.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Timezone {
    pub tz_minuteswest: i32,
    pub tz_dsttime: i32,
}

// Clock IDs (Linux numbering)
pub const CLOCK_REALTIME: i32 = 0;
pub const CLOCK_MONOTONIC: i32 = 1;
pub const CLOCK_PROCESS_CPUTIME_ID: i32 = 2;
pub const CLOCK_THREAD_CPUTIME_ID: i32 = 3;
pub const CLOCK_MONOTONIC_RAW: i32 = 4;
pub const CLOCK_REALTIME_COARSE: i32 = 5;
pub const CLOCK_MONOTONIC_COARSE: i32 = 6;

// errno values (Linux numbering)
pub const EINTR: i64 = 4;
pub const EBADF: i64 = 9;
pub const ENOMEM: i64 = 12;
pub const EFAULT: i64 = 14;
pub const EINVAL: i64 = 22;
pub const ENOSYS: i64 = 38;
pub const EOPNOTSUPP: i64 = 95;

/// Size of an fd set, bound to the per-process handle table.
pub const FD_SETSIZE: usize = MAX_HANDLES;

const FDSET_BITS_PER_WORD: usize = u64::BITS as usize;
const FDSET_WORDS: usize = FD_SETSIZE.div_ceil(FDSET_BITS_PER_WORD);

/// Fixed-size fd bitset with the familiar FD_SET/FD_CLR/FD_ISSET operations.
///
/// `repr(C)` so the syscall layer can copy it to and from user memory as a
/// flat word array.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FdSet {
    bits: [u64; FDSET_WORDS],
}

impl FdSet {
    pub const fn new() -> Self {
        Self {
            bits: [0; FDSET_WORDS],
        }
    }

    pub fn set(&mut self, fd: usize) {
        if fd < FD_SETSIZE {
            self.bits[fd / FDSET_BITS_PER_WORD] |= 1 << (fd % FDSET_BITS_PER_WORD);
        }
    }

    pub fn clear(&mut self, fd: usize) {
        if fd < FD_SETSIZE {
            self.bits[fd / FDSET_BITS_PER_WORD] &= !(1 << (fd % FDSET_BITS_PER_WORD));
        }
    }

    pub fn is_set(&self, fd: usize) -> bool {
        fd < FD_SETSIZE && self.bits[fd / FDSET_BITS_PER_WORD] & (1 << (fd % FDSET_BITS_PER_WORD)) != 0
    }

    pub fn zero(&mut self) {
        self.bits = [0; FDSET_WORDS];
    }

    /// Number of set bits below `nfds`.
    pub fn count_upto(&self, nfds: usize) -> usize {
        (0..nfds.min(FD_SETSIZE)).filter(|&fd| self.is_set(fd)).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fdset_set_clear_isset() {
        let mut set = FdSet::new();
        assert!(!set.is_set(3));
        set.set(3);
        set.set(0);
        set.set(FD_SETSIZE - 1);
        assert!(set.is_set(3));
        assert!(set.is_set(0));
        assert!(set.is_set(FD_SETSIZE - 1));
        assert_eq!(set.count_upto(FD_SETSIZE), 3);
        set.clear(3);
        assert!(!set.is_set(3));
        assert_eq!(set.count_upto(FD_SETSIZE), 2);
    }

    #[test]
    fn fdset_out_of_range_is_ignored() {
        let mut set = FdSet::new();
        set.set(FD_SETSIZE);
        assert!(!set.is_set(FD_SETSIZE));
        assert_eq!(set.count_upto(FD_SETSIZE + 10), 0);
    }

    #[test]
    fn fdset_count_respects_nfds() {
        let mut set = FdSet::new();
        set.set(1);
        set.set(5);
        assert_eq!(set.count_upto(2), 1);
        assert_eq!(set.count_upto(6), 2);
    }
}
