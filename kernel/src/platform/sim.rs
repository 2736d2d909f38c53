//! Deterministic machine simulation for hosted builds.
//!
//! The simulation owns virtual time: each `step` runs the tick interrupt
//! body once, then any events scripted for that tick. Port I/O emulates the
//! legacy PCI configuration mechanism (0xCF8/0xCFC), MMIO emulates ECAM
//! windows over the same per-device configuration spaces, and the RTC
//! derives its integer-second value from the tick counter, so every
//! time/PCI/select scenario is reproducible without hardware.

extern crate alloc;

use alloc::boxed::Box;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

use hashbrown::HashMap;

use crate::platform::{AccessWidth, Machine, McfgAllocation};
use crate::sched::Scheduler;
use crate::sync::Mutex;
use crate::time::{SystemClock, TIMER_HZ};

const PCI_CONFIG_ADDRESS: u16 = 0xCF8;
const PCI_CONFIG_DATA: u16 = 0xCFC;
const CONSOLE_KEEP_LINES: usize = 256;

/// A single device's 256-byte configuration space.
#[derive(Clone)]
pub struct ConfigSpace {
    bytes: [u8; 256],
}

impl ConfigSpace {
    pub fn new(vendor: u16, device: u16) -> Self {
        let mut cs = Self { bytes: [0; 256] };
        cs.write(0x00, AccessWidth::W16, vendor as u32);
        cs.write(0x02, AccessWidth::W16, device as u32);
        cs
    }

    pub fn with_class(mut self, class: u8, subclass: u8, progif: u8, revision: u8) -> Self {
        self.write(0x08, AccessWidth::W8, revision as u32);
        self.write(0x09, AccessWidth::W8, progif as u32);
        self.write(0x0A, AccessWidth::W8, subclass as u32);
        self.write(0x0B, AccessWidth::W8, class as u32);
        self
    }

    pub fn with_multi_function(mut self) -> Self {
        let ht = self.read(0x0E, AccessWidth::W8) | 0x80;
        self.write(0x0E, AccessWidth::W8, ht);
        self
    }

    /// Header type 1 bridge with the given secondary/subordinate bus range.
    pub fn with_bus_range(mut self, secondary: u8, subordinate: u8) -> Self {
        let multi = self.read(0x0E, AccessWidth::W8) & 0x80;
        self.write(0x0E, AccessWidth::W8, (0x01 | multi) as u32);
        self.write(0x19, AccessWidth::W8, secondary as u32);
        self.write(0x1A, AccessWidth::W8, subordinate as u32);
        self
    }

    pub fn read(&self, off: usize, width: AccessWidth) -> u32 {
        let mut value = 0u32;
        for i in 0..width.bytes() as usize {
            value |= (self.bytes[off + i] as u32) << (8 * i);
        }
        value
    }

    pub fn write(&mut self, off: usize, width: AccessWidth, value: u32) {
        for i in 0..width.bytes() as usize {
            self.bytes[off + i] = (value >> (8 * i)) as u8;
        }
    }
}

type BdfKey = (u16, u8, u8, u8);

struct Event {
    tick: u64,
    run: Box<dyn FnOnce() + Send>,
}

struct SimState {
    ticks: u64,
    events: Vec<Event>,
    rtc_base: i64,
    /// Tick offset of the RTC second boundary relative to tick 0.
    rtc_phase_ticks: u64,
    cf8: u32,
    config: HashMap<BdfKey, ConfigSpace>,
    mcfg: Option<Vec<McfgAllocation>>,
    console: Vec<String>,
}

/// The simulated machine. Implements both `Machine` (hardware access) and
/// `Scheduler` (virtual time): sleeping on it advances the tick engine.
pub struct SimMachine {
    clock: Arc<SystemClock>,
    state: Mutex<SimState>,
}

impl SimMachine {
    pub fn new(clock: Arc<SystemClock>) -> Self {
        Self {
            clock,
            state: Mutex::new(SimState {
                ticks: 0,
                events: Vec::new(),
                rtc_base: 1_000_000_000, // 2001-09-09, comfortably past the sanity floor
                rtc_phase_ticks: 0,
                cf8: 0,
                config: HashMap::new(),
                mcfg: None,
                console: Vec::new(),
            }),
        }
    }

    pub fn clock(&self) -> &Arc<SystemClock> {
        &self.clock
    }

    /// Advance virtual time by one tick: run the tick interrupt body, then
    /// any events scripted for the new tick.
    pub fn step(&self) {
        let due = {
            let mut st = self.state.lock();
            st.ticks += 1;
            let now = st.ticks;
            let mut due = Vec::new();
            let mut i = 0;
            while i < st.events.len() {
                if st.events[i].tick <= now {
                    due.push(st.events.swap_remove(i));
                } else {
                    i += 1;
                }
            }
            due
        };
        self.clock.tick();
        for ev in due {
            (ev.run)();
        }
    }

    /// Script `f` to run when the tick counter reaches `tick`.
    pub fn at_tick<F: FnOnce() + Send + 'static>(&self, tick: u64, f: F) {
        self.state.lock().events.push(Event {
            tick,
            run: Box::new(f),
        });
    }

    /// Set the RTC base timestamp and the tick offset of its next second
    /// boundary.
    pub fn set_rtc(&self, base_seconds: i64, phase_ticks: u64) {
        let mut st = self.state.lock();
        st.rtc_base = base_seconds;
        st.rtc_phase_ticks = phase_ticks;
    }

    pub fn add_pci_device(&self, segment: u16, bus: u8, device: u8, function: u8, cs: ConfigSpace) {
        self.state
            .lock()
            .config
            .insert((segment, bus, device, function), cs);
    }

    pub fn set_mcfg(&self, allocations: Vec<McfgAllocation>) {
        self.state.lock().mcfg = Some(allocations);
    }

    pub fn clear_mcfg(&self) {
        self.state.lock().mcfg = None;
    }

    pub fn clear_pci(&self) {
        let mut st = self.state.lock();
        st.config.clear();
        st.mcfg = None;
    }

    pub fn console_lines(&self) -> Vec<String> {
        self.state.lock().console.clone()
    }

    fn config_read(&self, key: BdfKey, off: usize, width: AccessWidth) -> u32 {
        let st = self.state.lock();
        match st.config.get(&key) {
            Some(cs) if off + width.bytes() as usize <= 256 => cs.read(off, width),
            _ => width.ones(),
        }
    }

    fn config_write(&self, key: BdfKey, off: usize, width: AccessWidth, value: u32) {
        let mut st = self.state.lock();
        if let Some(cs) = st.config.get_mut(&key) {
            if off + width.bytes() as usize <= 256 {
                cs.write(off, width, value);
            }
        }
    }

    /// Decode the latched CONFIG_ADDRESS plus the data-port byte lane.
    fn cf8_target(&self, port: u16) -> Option<(BdfKey, usize)> {
        let cf8 = self.state.lock().cf8;
        if cf8 & 0x8000_0000 == 0 {
            return None;
        }
        let bus = ((cf8 >> 16) & 0xFF) as u8;
        let device = ((cf8 >> 11) & 0x1F) as u8;
        let function = ((cf8 >> 8) & 0x07) as u8;
        let reg = (cf8 & 0xFC) as usize;
        Some(((0, bus, device, function), reg + (port - PCI_CONFIG_DATA) as usize))
    }

    /// Resolve a physical address inside a configured ECAM window.
    fn ecam_target(&self, paddr: u64) -> Option<(BdfKey, usize)> {
        let st = self.state.lock();
        let mcfg = st.mcfg.as_ref()?;
        for alloc in mcfg {
            let buses = (alloc.end_bus - alloc.start_bus) as u64 + 1;
            let span = buses << 20;
            if paddr < alloc.base_paddr || paddr >= alloc.base_paddr + span {
                continue;
            }
            let rel = paddr - alloc.base_paddr;
            let bus = alloc.start_bus + (rel >> 20) as u8;
            let device = ((rel >> 15) & 0x1F) as u8;
            let function = ((rel >> 12) & 0x07) as u8;
            let reg = (rel & 0xFFF) as usize;
            return Some(((alloc.segment, bus, device, function), reg));
        }
        None
    }
}

impl Machine for SimMachine {
    fn port_read(&self, port: u16, width: AccessWidth) -> u32 {
        match port {
            PCI_CONFIG_ADDRESS => self.state.lock().cf8 & width.ones(),
            p if (PCI_CONFIG_DATA..PCI_CONFIG_DATA + 4).contains(&p) => {
                match self.cf8_target(port) {
                    Some((key, off)) => self.config_read(key, off, width),
                    None => width.ones(),
                }
            }
            _ => width.ones(),
        }
    }

    fn port_write(&self, port: u16, width: AccessWidth, value: u32) {
        match port {
            PCI_CONFIG_ADDRESS if width == AccessWidth::W32 => {
                self.state.lock().cf8 = value;
            }
            p if (PCI_CONFIG_DATA..PCI_CONFIG_DATA + 4).contains(&p) => {
                if let Some((key, off)) = self.cf8_target(port) {
                    self.config_write(key, off, width, value);
                }
            }
            _ => {}
        }
    }

    fn mmio_read(&self, paddr: u64, width: AccessWidth) -> u32 {
        match self.ecam_target(paddr) {
            Some((key, reg)) => self.config_read(key, reg, width),
            None => width.ones(),
        }
    }

    fn mmio_write(&self, paddr: u64, width: AccessWidth, value: u32) {
        if let Some((key, reg)) = self.ecam_target(paddr) {
            self.config_write(key, reg, width, value);
        }
    }

    fn rtc_read_seconds(&self) -> i64 {
        let st = self.state.lock();
        st.rtc_base + ((st.ticks + st.rtc_phase_ticks) / TIMER_HZ as u64) as i64
    }

    fn mcfg_allocations(&self) -> Option<Vec<McfgAllocation>> {
        self.state.lock().mcfg.clone()
    }

    fn console_write(&self, line: &str) {
        let mut st = self.state.lock();
        if st.console.len() == CONSOLE_KEEP_LINES {
            st.console.remove(0);
        }
        st.console.push(String::from(line));
    }
}

impl Scheduler for SimMachine {
    fn now_ticks(&self) -> u64 {
        self.state.lock().ticks
    }

    fn sleep_ticks(&self, ticks: u64) {
        for _ in 0..ticks {
            self.step();
        }
    }

    fn yield_now(&self) -> bool {
        self.step();
        false
    }

    fn current_task_ticks(&self) -> u64 {
        self.now_ticks()
    }
}

lazy_static::lazy_static! {
    static ref MACHINE: SimMachine = SimMachine::new(crate::time::system_clock().clone());
}

/// The process-wide simulated machine.
pub fn machine() -> &'static SimMachine {
    &MACHINE
}
