//! Time-related syscalls.

use super::{extract_args, SyscallError, SyscallResult};
use crate::mm::{copy_in, copy_out};
use crate::posix::{Timespec, Timeval, Timezone};
use crate::sched;
use crate::time::{self, BILLION, TIMER_HZ};

/// time(tloc) - seconds since the epoch, optionally stored to `tloc`.
pub fn sys_time(args: &[u64]) -> SyscallResult {
    let args = extract_args(args, 1)?;
    let tloc = args[0] as usize;

    let seconds = time::system_clock().get_timestamp();
    if tloc != 0 {
        copy_out(tloc, &seconds)?;
    }
    Ok(seconds as u64)
}

/// gettimeofday(tv, tz) - realtime clock with microsecond precision.
/// The timezone result is obsolete and reported as zeros.
pub fn sys_gettimeofday(args: &[u64]) -> SyscallResult {
    let args = extract_args(args, 2)?;
    let tv_ptr = args[0] as usize;
    let tz_ptr = args[1] as usize;

    if tv_ptr != 0 {
        let ts = time::system_clock().real_time_timespec();
        let tv = Timeval {
            tv_sec: ts.tv_sec,
            tv_usec: ts.tv_nsec / 1_000,
        };
        copy_out(tv_ptr, &tv)?;
    }
    if tz_ptr != 0 {
        copy_out(tz_ptr, &Timezone::default())?;
    }
    Ok(0)
}

/// clock_gettime(clk_id, tp)
pub fn sys_clock_gettime(args: &[u64]) -> SyscallResult {
    let args = extract_args(args, 2)?;
    let clock_id = args[0] as i32;
    let tp_ptr = args[1] as usize;

    let ts = time::clock_gettime(
        time::system_clock(),
        sched::kernel_scheduler(),
        clock_id,
    )?;
    copy_out(tp_ptr, &ts)?;
    Ok(0)
}

/// clock_getres(clk_id, res)
pub fn sys_clock_getres(args: &[u64]) -> SyscallResult {
    let args = extract_args(args, 2)?;
    let clock_id = args[0] as i32;
    let res_ptr = args[1] as usize;

    let res = time::clock_getres(clock_id)?;
    if res_ptr != 0 {
        copy_out(res_ptr, &res)?;
    }
    Ok(0)
}

/// nanosleep(req, rem) - tick-granular sleep. Signals are out of scope, so
/// the sleep always completes and a non-null `rem` reads back as zero.
pub fn sys_nanosleep(args: &[u64]) -> SyscallResult {
    let args = extract_args(args, 2)?;
    let req_ptr = args[0] as usize;
    let rem_ptr = args[1] as usize;

    let req: Timespec = copy_in(req_ptr)?;
    if req.tv_sec < 0 || req.tv_nsec < 0 || req.tv_nsec >= BILLION as i64 {
        return Err(SyscallError::InvalidArgument);
    }

    let total_ns = req.tv_sec as u64 * BILLION + req.tv_nsec as u64;
    let tick_ns = BILLION / TIMER_HZ as u64;
    let ticks = total_ns.div_ceil(tick_ns);
    if ticks > 0 {
        sched::kernel_sleep(ticks);
    }

    if rem_ptr != 0 {
        copy_out(rem_ptr, &Timespec::default())?;
    }
    Ok(0)
}
