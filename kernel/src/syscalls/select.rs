//! select() - blocking readiness multiplexing.
//!
//! The call runs in four phases: translate the fd sets into resolved
//! handles and count their condition variables, convert the timeout to
//! ticks, wait on a multi-object waiter (tolerating spurious signals),
//! and finally re-poll every requested fd to build the result sets. All
//! user memory is copied in before any blocking and copied back at the
//! end.

extern crate alloc;

use alloc::sync::Arc;
use alloc::vec::Vec;

use super::{extract_args, SyscallError, SyscallResult};
use crate::mm::{copy_in, copy_out};
use crate::posix::{FdSet, Timeval};
use crate::sched::Scheduler;
use crate::sync::{CondVar, MultiWaiter, Mutex, WakeSource};
use crate::time::TIMER_HZ;
use crate::vfs::{FdTable, ReadyKind, Stream, MAX_HANDLES};

const USEC_PER_SEC: u64 = 1_000_000;
const USEC_PER_TICK: u64 = USEC_PER_SEC / TIMER_HZ as u64;

/// Kernel-side mirror of one select invocation: the three optional fd
/// sets and the optional timeout, updated in place.
pub struct SelectCtx {
    pub nfds: usize,
    pub readfds: Option<FdSet>,
    pub writefds: Option<FdSet>,
    pub exceptfds: Option<FdSet>,
    pub timeout: Option<Timeval>,
}

/// One requested (fd, kind) pair with its resolved handle.
struct WaitEntry {
    fd: usize,
    kind: ReadyKind,
    stream: Arc<dyn Stream>,
    cond: Option<Arc<CondVar>>,
}

fn timeval_to_ticks(tv: &Timeval) -> Result<u32, SyscallError> {
    if tv.tv_sec < 0 || tv.tv_usec < 0 || tv.tv_usec >= USEC_PER_SEC as i64 {
        return Err(SyscallError::InvalidArgument);
    }
    let ticks = (tv.tv_sec as u64)
        .saturating_mul(TIMER_HZ as u64)
        .saturating_add(tv.tv_usec as u64 / USEC_PER_TICK);
    Ok(ticks.min(u32::MAX as u64) as u32)
}

fn ticks_to_timeval(ticks: u64) -> Timeval {
    Timeval {
        tv_sec: (ticks / TIMER_HZ as u64) as i64,
        tv_usec: ((ticks % TIMER_HZ as u64) * USEC_PER_TICK) as i64,
    }
}

/// Phase 1: resolve every set bit to a handle and collect its readiness
/// condition, if it has one.
fn collect_entries(table: &Mutex<FdTable>, ctx: &SelectCtx) -> Result<Vec<WaitEntry>, SyscallError> {
    let mut entries = Vec::new();
    let table = table.lock();
    let sets = [
        (ReadyKind::Read, ctx.readfds.as_ref()),
        (ReadyKind::Write, ctx.writefds.as_ref()),
        (ReadyKind::Except, ctx.exceptfds.as_ref()),
    ];
    for (kind, set) in sets {
        let Some(set) = set else { continue };
        for fd in 0..ctx.nfds {
            if !set.is_set(fd) {
                continue;
            }
            let stream = table.get(fd).ok_or(SyscallError::BadFileDescriptor)?;
            let cond = stream.ready_cond(kind);
            entries.push(WaitEntry {
                fd,
                kind,
                stream,
                cond,
            });
        }
    }
    Ok(entries)
}

fn count_ready(entries: &[WaitEntry]) -> usize {
    entries
        .iter()
        .filter(|e| e.stream.is_ready(e.kind))
        .count()
}

/// The select core over an explicit scheduler and fd table. Returns the
/// number of ready (fd, kind) pairs; `ctx` sets and timeout are updated
/// for copy-out.
pub fn do_select(
    sched: &dyn Scheduler,
    table: &Mutex<FdTable>,
    ctx: &mut SelectCtx,
) -> Result<usize, SyscallError> {
    if ctx.nfds > MAX_HANDLES {
        return Err(SyscallError::InvalidArgument);
    }

    let entries = collect_entries(table, ctx)?;
    let cond_cnt = entries.iter().filter(|e| e.cond.is_some()).count();

    let timeout_ticks = match &ctx.timeout {
        Some(tv) => Some(timeval_to_ticks(tv)?),
        None => None,
    };

    // A zero timeout is a pure poll; skip the wait phase entirely.
    if timeout_ticks != Some(0) {
        if cond_cnt > 0 {
            wait_for_readiness(sched, &entries, cond_cnt, timeout_ticks, ctx)?;
        } else if let Some(ticks) = timeout_ticks {
            // Nothing to wait on but a timeout: plain sleep
            // (select(0, ...) as a portable sub-second sleep).
            sched.sleep_ticks(ticks as u64);
            if let Some(tv) = &mut ctx.timeout {
                *tv = Timeval::ZERO;
            }
        }
    }

    // Phase 4: drop the bits whose handle is not ready right now.
    let mut ready = 0;
    for entry in &entries {
        if entry.stream.is_ready(entry.kind) {
            ready += 1;
        } else {
            let set = match entry.kind {
                ReadyKind::Read => ctx.readfds.as_mut(),
                ReadyKind::Write => ctx.writefds.as_mut(),
                ReadyKind::Except => ctx.exceptfds.as_mut(),
            };
            if let Some(set) = set {
                set.clear(entry.fd);
            }
        }
    }
    Ok(ready)
}

/// Phase 3: sleep on every collected condition until something is ready
/// or the timeout expires. Spurious signals re-sleep with the original
/// deadline still armed.
fn wait_for_readiness(
    sched: &dyn Scheduler,
    entries: &[WaitEntry],
    cond_cnt: usize,
    timeout_ticks: Option<u32>,
    ctx: &mut SelectCtx,
) -> Result<(), SyscallError> {
    let mut waiter = MultiWaiter::try_new(cond_cnt).map_err(|_| SyscallError::OutOfMemory)?;
    let mut slot = 0;
    for entry in entries {
        if let Some(cond) = &entry.cond {
            waiter.bind(slot, cond.clone());
            slot += 1;
        }
    }

    let deadline = timeout_ticks.map(|t| sched.now_ticks() + t as u64);
    loop {
        match waiter.sleep(sched, deadline) {
            WakeSource::Timeout => {
                if let Some(tv) = &mut ctx.timeout {
                    *tv = Timeval::ZERO;
                }
                return Ok(());
            }
            WakeSource::Signal(_) => {
                if count_ready(entries) == 0 {
                    // Spurious: nothing actually ready, keep waiting.
                    continue;
                }
                if let (Some(d), Some(tv)) = (deadline, &mut ctx.timeout) {
                    *tv = ticks_to_timeval(d.saturating_sub(sched.now_ticks()));
                }
                return Ok(());
            }
        }
    }
}

/// select(nfds, readfds, writefds, exceptfds, timeout)
pub fn sys_select(args: &[u64]) -> SyscallResult {
    let args = extract_args(args, 5)?;
    let nfds = args[0] as i64;
    let (r_ptr, w_ptr, e_ptr, tv_ptr) =
        (args[1] as usize, args[2] as usize, args[3] as usize, args[4] as usize);

    if nfds < 0 || nfds as usize > MAX_HANDLES {
        return Err(SyscallError::InvalidArgument);
    }

    let copy_set = |ptr: usize| -> Result<Option<FdSet>, SyscallError> {
        if ptr == 0 {
            Ok(None)
        } else {
            Ok(Some(copy_in::<FdSet>(ptr)?))
        }
    };

    let mut ctx = SelectCtx {
        nfds: nfds as usize,
        readfds: copy_set(r_ptr)?,
        writefds: copy_set(w_ptr)?,
        exceptfds: copy_set(e_ptr)?,
        timeout: if tv_ptr == 0 {
            None
        } else {
            Some(copy_in::<Timeval>(tv_ptr)?)
        },
    };

    let ready = do_select(
        crate::sched::kernel_scheduler(),
        &crate::vfs::FD_TABLE,
        &mut ctx,
    )?;

    if let Some(set) = &ctx.readfds {
        copy_out(r_ptr, set)?;
    }
    if let Some(set) = &ctx.writefds {
        copy_out(w_ptr, set)?;
    }
    if let Some(set) = &ctx.exceptfds {
        copy_out(e_ptr, set)?;
    }
    if let Some(tv) = &ctx.timeout {
        copy_out(tv_ptr, tv)?;
    }
    Ok(ready as u64)
}
