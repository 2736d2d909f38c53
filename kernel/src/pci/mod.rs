//! PCI/PCIe bus enumeration.
//!
//! Discovery walks every reachable bus starting from the host bridge(s) on
//! bus 0, breadth-first: a PCI-to-PCI bridge marks its secondary through
//! subordinate bus range to-visit, and a FIFO worklist drains the marks so
//! sibling buses are enumerated before grandchildren. Each present function
//! is decoded, named from the class/vendor tables, logged, and recorded in
//! the device registry.

pub mod config;
pub mod ids;

extern crate alloc;

use alloc::vec::Vec;

use crate::platform::{self, AccessWidth, McfgAllocation};
use crate::sync::Mutex;

pub use config::{ConfigAccess, Ecam, PciError, PciLocation, PortCam};
pub use ids::{lookup_class, lookup_vendor, DeviceNames};

/// Capacity of the ECAM segment table.
pub const MAX_ECAM_SEGMENTS: usize = 8;

const DEVICES_PER_BUS: u8 = 32;
const FUNCTIONS_PER_DEVICE: u8 = 8;

const VENDOR_NONE: u16 = 0x0000;
const VENDOR_INVALID: u16 = 0xFFFF;

const HEADER_TYPE_MULTI_FUNCTION: u8 = 0x80;

const CLASS_BRIDGE: u8 = 0x06;
const SUBCLASS_PCI_TO_PCI: u8 = 0x04;

// Standard header offsets
const REG_VENDOR_DEVICE: u16 = 0x00;
const REG_CLASS_REVISION: u16 = 0x08;
const REG_HEADER_TYPE: u16 = 0x0E;
// Header type 1 (bridge) offsets
const REG_SECONDARY_BUS: u16 = 0x19;
const REG_SUBORDINATE_BUS: u16 = 0x1A;

/// Decoded identity of one PCI function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PciDeviceInfo {
    pub loc: PciLocation,
    pub vendor_id: u16,
    pub device_id: u16,
    pub class_id: u8,
    pub subclass_id: u8,
    pub progif_id: u8,
    pub revision: u8,
    pub header_type: u8,
    pub multi_func: bool,
}

impl PciDeviceInfo {
    pub fn is_pci_bridge(&self) -> bool {
        self.class_id == CLASS_BRIDGE && self.subclass_id == SUBCLASS_PCI_TO_PCI
    }
}

/// Visitation state of one bus number during a segment scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusState {
    NotVisited,
    ToVisit,
    Visited,
}

/// Result of enumerating one segment: functions in discovery order plus
/// the final bus-state vector.
pub struct BusScan {
    pub devices: Vec<PciDeviceInfo>,
    pub bus_states: [BusState; 256],
}

impl BusScan {
    fn new() -> Self {
        Self {
            devices: Vec::new(),
            bus_states: [BusState::NotVisited; 256],
        }
    }
}

/// FIFO of buses marked to-visit. Each bus number enters at most once
/// (guarded by the state vector), so capacity 256 cannot overflow.
struct BusQueue {
    items: heapless::Vec<u8, 256>,
    head: usize,
}

impl BusQueue {
    fn new() -> Self {
        Self {
            items: heapless::Vec::new(),
            head: 0,
        }
    }

    fn push(&mut self, bus: u8) {
        let _ = self.items.push(bus);
    }

    fn pop(&mut self) -> Option<u8> {
        let bus = self.items.get(self.head).copied()?;
        self.head += 1;
        Some(bus)
    }
}

/// Probe one function. Present iff the vendor id reads as something other
/// than all-zeros or all-ones.
fn probe_function(
    cfg: &dyn ConfigAccess,
    loc: PciLocation,
) -> Result<Option<PciDeviceInfo>, PciError> {
    let vendor_device = cfg.read(loc, REG_VENDOR_DEVICE, AccessWidth::W32)?;
    let vendor_id = (vendor_device & 0xFFFF) as u16;
    if vendor_id == VENDOR_NONE || vendor_id == VENDOR_INVALID {
        return Ok(None);
    }

    let class_revision = cfg.read(loc, REG_CLASS_REVISION, AccessWidth::W32)?;
    let header_type = cfg.read(loc, REG_HEADER_TYPE, AccessWidth::W8)? as u8;

    Ok(Some(PciDeviceInfo {
        loc,
        vendor_id,
        device_id: (vendor_device >> 16) as u16,
        class_id: (class_revision >> 24) as u8,
        subclass_id: (class_revision >> 16) as u8,
        progif_id: (class_revision >> 8) as u8,
        revision: class_revision as u8,
        header_type: header_type & !HEADER_TYPE_MULTI_FUNCTION,
        multi_func: header_type & HEADER_TYPE_MULTI_FUNCTION != 0,
    }))
}

fn log_device(info: &PciDeviceInfo) {
    let vendor = lookup_vendor(info.vendor_id).unwrap_or("unknown vendor");
    match lookup_class(info.class_id, info.subclass_id, info.progif_id) {
        Some(names) => log::info!(
            "pci: {} {:04x}:{:04x} {} - {} ({})",
            info.loc,
            info.vendor_id,
            info.device_id,
            names.subclass.unwrap_or(names.class),
            vendor,
            names.progif.unwrap_or("-"),
        ),
        None => log::info!(
            "pci: {} {:04x}:{:04x} unknown device - {}",
            info.loc,
            info.vendor_id,
            info.device_id,
            vendor,
        ),
    }
}

/// Record a discovered function; a PCI-to-PCI bridge marks its secondary
/// through subordinate buses to-visit.
fn record_function(
    cfg: &dyn ConfigAccess,
    info: PciDeviceInfo,
    scan: &mut BusScan,
    queue: &mut BusQueue,
) -> Result<(), PciError> {
    log_device(&info);

    if info.is_pci_bridge() {
        let secondary = cfg.read(info.loc, REG_SECONDARY_BUS, AccessWidth::W8)? as u8;
        let subordinate = cfg.read(info.loc, REG_SUBORDINATE_BUS, AccessWidth::W8)? as u8;
        for bus in secondary..=subordinate {
            if scan.bus_states[bus as usize] == BusState::NotVisited {
                scan.bus_states[bus as usize] = BusState::ToVisit;
                queue.push(bus);
            }
        }
    }

    scan.devices.push(info);
    Ok(())
}

/// Enumerate one bus: every device slot, and every extra function of
/// multi-function devices.
fn visit_bus(
    cfg: &dyn ConfigAccess,
    segment: u16,
    bus: u8,
    scan: &mut BusScan,
    queue: &mut BusQueue,
) -> Result<(), PciError> {
    scan.bus_states[bus as usize] = BusState::Visited;

    for device in 0..DEVICES_PER_BUS {
        let loc = PciLocation::new(segment, bus, device, 0);
        let Some(info) = probe_function(cfg, loc)? else {
            continue;
        };
        let multi = info.multi_func;
        record_function(cfg, info, scan, queue)?;

        if multi {
            for function in 1..FUNCTIONS_PER_DEVICE {
                let loc = PciLocation::new(segment, bus, device, function);
                if let Some(info) = probe_function(cfg, loc)? {
                    record_function(cfg, info, scan, queue)?;
                }
            }
        }
    }
    Ok(())
}

/// Enumerate every bus reachable in `segment`.
///
/// A multi-function device at 0:0.0 means the platform exposes one host
/// bridge per function, rooting buses 0..=7 at the matching function
/// index; otherwise bus 0 is the single root.
pub fn discover_segment(cfg: &dyn ConfigAccess, segment: u16) -> Result<BusScan, PciError> {
    let mut scan = BusScan::new();
    let mut queue = BusQueue::new();

    let root = probe_function(cfg, PciLocation::new(segment, 0, 0, 0))?;
    match root {
        Some(info) if info.multi_func => {
            for function in 0..FUNCTIONS_PER_DEVICE {
                let loc = PciLocation::new(segment, 0, 0, function);
                if probe_function(cfg, loc)?.is_some() {
                    let bus = function;
                    if scan.bus_states[bus as usize] == BusState::NotVisited {
                        scan.bus_states[bus as usize] = BusState::ToVisit;
                        queue.push(bus);
                    }
                }
            }
        }
        _ => {
            scan.bus_states[0] = BusState::ToVisit;
            queue.push(0);
        }
    }

    while let Some(bus) = queue.pop() {
        visit_bus(cfg, segment, bus, &mut scan, &mut queue)?;
    }
    Ok(scan)
}

// ============================================================================
// Boot-time wiring
// ============================================================================

/// The backend selected at init; the variant is fixed for the life of the
/// system.
pub enum ConfigBackend {
    Port(PortCam<'static>),
    Ecam(Ecam<'static>),
}

impl ConfigAccess for ConfigBackend {
    fn read(&self, loc: PciLocation, offset: u16, width: AccessWidth) -> Result<u32, PciError> {
        match self {
            ConfigBackend::Port(cam) => cam.read(loc, offset, width),
            ConfigBackend::Ecam(ecam) => ecam.read(loc, offset, width),
        }
    }

    fn write(
        &self,
        loc: PciLocation,
        offset: u16,
        width: AccessWidth,
        value: u32,
    ) -> Result<(), PciError> {
        match self {
            ConfigBackend::Port(cam) => cam.write(loc, offset, width, value),
            ConfigBackend::Ecam(ecam) => ecam.write(loc, offset, width, value),
        }
    }
}

lazy_static::lazy_static! {
    static ref ACTIVE_BACKEND: Mutex<Option<ConfigBackend>> = Mutex::new(None);
    static ref PCI_DEVICES: Mutex<Vec<PciDeviceInfo>> = Mutex::new(Vec::new());
}

/// Configuration-space read through the backend selected by `init_pci`.
pub fn read_config(loc: PciLocation, offset: u16, width: AccessWidth) -> Result<u32, PciError> {
    match ACTIVE_BACKEND.lock().as_ref() {
        Some(backend) => backend.read(loc, offset, width),
        None => Err(PciError::NoConfigBackend),
    }
}

/// Configuration-space write through the backend selected by `init_pci`.
pub fn write_config(
    loc: PciLocation,
    offset: u16,
    width: AccessWidth,
    value: u32,
) -> Result<(), PciError> {
    match ACTIVE_BACKEND.lock().as_ref() {
        Some(backend) => backend.write(loc, offset, width, value),
        None => Err(PciError::NoConfigBackend),
    }
}

/// Snapshot of every function found by the last enumeration.
pub fn devices() -> Vec<PciDeviceInfo> {
    PCI_DEVICES.lock().clone()
}

/// Fold the ACPI walker's allocations into the bounded segment table.
/// Overflow follows the out-of-memory policy: drop ECAM entirely and fall
/// back to the legacy mechanism.
fn build_segment_table(
    allocations: Vec<McfgAllocation>,
) -> Option<heapless::Vec<McfgAllocation, MAX_ECAM_SEGMENTS>> {
    let mut table = heapless::Vec::new();
    for alloc in allocations {
        if table.push(alloc).is_err() {
            log::error!(
                "pci: MCFG has more than {} allocations, disabling ECAM",
                MAX_ECAM_SEGMENTS
            );
            return None;
        }
    }
    if table.is_empty() { None } else { Some(table) }
}

/// Select a configuration-space backend and enumerate every segment.
pub fn init_pci() {
    let machine = platform::machine();

    let backend = match machine.mcfg_allocations().and_then(build_segment_table) {
        Some(table) => {
            log::info!("pci: ECAM config access, {} segment(s)", table.len());
            ConfigBackend::Ecam(Ecam::new(machine, table))
        }
        None => {
            log::info!("pci: legacy port config access");
            ConfigBackend::Port(PortCam::new(machine))
        }
    };

    let segments: heapless::Vec<u16, MAX_ECAM_SEGMENTS> = match &backend {
        ConfigBackend::Ecam(ecam) => ecam.segments().iter().map(|a| a.segment).collect(),
        ConfigBackend::Port(_) => {
            let mut only_zero = heapless::Vec::new();
            let _ = only_zero.push(0);
            only_zero
        }
    };

    let mut found = Vec::new();
    for segment in segments {
        match discover_segment(&backend, segment) {
            Ok(scan) => found.extend(scan.devices),
            Err(err) => log::error!("pci: segment {:04x} enumeration failed: {:?}", segment, err),
        }
    }
    log::info!("pci: {} function(s) discovered", found.len());

    *PCI_DEVICES.lock() = found;
    *ACTIVE_BACKEND.lock() = Some(backend);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::sim::{ConfigSpace, SimMachine};
    use crate::time::SystemClock;
    use alloc::sync::Arc;
    use proptest::prelude::*;

    fn sim() -> SimMachine {
        SimMachine::new(Arc::new(SystemClock::new()))
    }

    fn host_bridge() -> ConfigSpace {
        ConfigSpace::new(0x8086, 0x29C0).with_class(0x06, 0x00, 0, 2)
    }

    fn bridge(secondary: u8, subordinate: u8) -> ConfigSpace {
        ConfigSpace::new(0x8086, 0x244E)
            .with_class(0x06, 0x04, 0, 0)
            .with_bus_range(secondary, subordinate)
    }

    fn nic() -> ConfigSpace {
        ConfigSpace::new(0x10EC, 0x8139).with_class(0x02, 0x00, 0, 0x10)
    }

    #[test]
    fn single_controller_visits_bus_zero_only() {
        let sim = sim();
        sim.add_pci_device(0, 0, 0, 0, host_bridge());
        let cam = PortCam::new(&sim);

        let scan = discover_segment(&cam, 0).unwrap();
        assert_eq!(scan.devices.len(), 1);
        assert_eq!(scan.devices[0].class_id, 0x06);
        assert_eq!(scan.devices[0].subclass_id, 0x00);
        assert!(!scan.devices[0].multi_func);
        assert_eq!(scan.bus_states[0], BusState::Visited);
        assert!(scan.bus_states[1..]
            .iter()
            .all(|s| *s == BusState::NotVisited));
    }

    #[test]
    fn bridge_expands_secondary_range_breadth_first() {
        let sim = sim();
        sim.add_pci_device(0, 0, 0, 0, host_bridge());
        sim.add_pci_device(0, 0, 2, 0, bridge(1, 3));
        sim.add_pci_device(0, 1, 0, 0, nic());
        sim.add_pci_device(0, 3, 5, 0, nic());
        let cam = PortCam::new(&sim);

        let scan = discover_segment(&cam, 0).unwrap();
        // visit order: bus 0 first, then 1, 2, 3
        let buses: Vec<u8> = scan.devices.iter().map(|d| d.loc.bus).collect();
        assert_eq!(buses, vec![0, 0, 1, 3]);
        for bus in 0..=3usize {
            assert_eq!(scan.bus_states[bus], BusState::Visited, "bus {}", bus);
        }
        assert!(scan.bus_states[4..]
            .iter()
            .all(|s| *s == BusState::NotVisited));
    }

    #[test]
    fn multi_function_device_probes_all_functions() {
        let sim = sim();
        sim.add_pci_device(0, 0, 0, 0, host_bridge());
        sim.add_pci_device(
            0,
            0,
            4,
            0,
            ConfigSpace::new(0x8086, 0x2934)
                .with_class(0x0C, 0x03, 0x00, 2)
                .with_multi_function(),
        );
        sim.add_pci_device(
            0,
            0,
            4,
            3,
            ConfigSpace::new(0x8086, 0x2937).with_class(0x0C, 0x03, 0x20, 2),
        );
        let cam = PortCam::new(&sim);

        let scan = discover_segment(&cam, 0).unwrap();
        let funcs: Vec<(u8, u8)> = scan
            .devices
            .iter()
            .map(|d| (d.loc.device, d.loc.function))
            .collect();
        assert_eq!(funcs, vec![(0, 0), (4, 0), (4, 3)]);
    }

    #[test]
    fn multi_function_host_bridge_roots_one_bus_per_function() {
        let sim = sim();
        sim.add_pci_device(0, 0, 0, 0, host_bridge().with_multi_function());
        sim.add_pci_device(0, 0, 0, 2, host_bridge());
        // a device on bus 2 reachable only through the second controller
        sim.add_pci_device(0, 2, 1, 0, nic());
        let cam = PortCam::new(&sim);

        let scan = discover_segment(&cam, 0).unwrap();
        assert_eq!(scan.bus_states[0], BusState::Visited);
        assert_eq!(scan.bus_states[2], BusState::Visited);
        assert_eq!(scan.bus_states[1], BusState::NotVisited);
        assert!(scan.devices.iter().any(|d| d.loc.bus == 2 && d.loc.device == 1));
    }

    #[test]
    fn enumeration_leaves_no_pending_marks() {
        let sim = sim();
        sim.add_pci_device(0, 0, 0, 0, host_bridge());
        sim.add_pci_device(0, 0, 1, 0, bridge(1, 4));
        sim.add_pci_device(0, 1, 2, 0, bridge(2, 3));
        sim.add_pci_device(0, 2, 0, 0, nic());
        sim.add_pci_device(0, 4, 0, 0, nic());
        let cam = PortCam::new(&sim);

        let scan = discover_segment(&cam, 0).unwrap();
        assert!(scan
            .bus_states
            .iter()
            .all(|s| *s != BusState::ToVisit));
        for bus in 0..=4usize {
            assert_eq!(scan.bus_states[bus], BusState::Visited);
        }
    }

    #[test]
    fn absent_function_probes_vendor_id_only() {
        use crate::pci::config::MockConfigAccess;
        let mut cfg = MockConfigAccess::new();
        // a single vendor/device dword read, nothing further
        cfg.expect_read()
            .times(1)
            .returning(|_, _, width| Ok(width.ones()));
        let probed = probe_function(&cfg, PciLocation::new(0, 0, 9, 0)).unwrap();
        assert!(probed.is_none());

        let mut cfg = MockConfigAccess::new();
        cfg.expect_read().times(1).returning(|_, _, _| Ok(0));
        let probed = probe_function(&cfg, PciLocation::new(0, 0, 9, 0)).unwrap();
        assert!(probed.is_none());
    }

    #[test]
    fn init_pci_prefers_ecam_and_fills_registry() {
        let _guard = crate::testing::GLOBAL_LOCK.lock();
        let sim = crate::platform::sim::machine();
        sim.clear_pci();
        sim.set_mcfg(vec![McfgAllocation {
            base_paddr: 0xE000_0000,
            segment: 0,
            start_bus: 0,
            end_bus: 255,
        }]);
        sim.add_pci_device(0, 0, 0, 0, host_bridge());
        sim.add_pci_device(0, 0, 3, 0, nic());

        init_pci();
        let devs = devices();
        assert_eq!(devs.len(), 2);
        assert!(devs.iter().any(|d| d.vendor_id == 0x10EC));
        // post-init config access goes through the selected backend
        let vd = read_config(PciLocation::new(0, 0, 3, 0), 0, AccessWidth::W32).unwrap();
        assert_eq!(vd, 0x8139_10EC);
        sim.clear_pci();
    }

    #[test]
    fn init_pci_without_mcfg_uses_legacy_ports() {
        let _guard = crate::testing::GLOBAL_LOCK.lock();
        let sim = crate::platform::sim::machine();
        sim.clear_pci();
        sim.add_pci_device(0, 0, 0, 0, host_bridge());

        init_pci();
        assert_eq!(devices().len(), 1);
        assert!(matches!(
            &*ACTIVE_BACKEND.lock(),
            Some(ConfigBackend::Port(_))
        ));
        sim.clear_pci();
    }

    /// A bridge tree over buses 1..=n where each bridge's range covers its
    /// subtree, mirroring how firmware assigns subordinate numbers.
    fn tree_strategy() -> impl Strategy<Value = Vec<(u8, u8, u8)>> {
        // (parent_bus, secondary, subordinate) triples, chain topology
        (1u8..6).prop_map(|depth| {
            (0..depth)
                .map(|i| (i, i + 1, depth))
                .collect()
        })
    }

    proptest! {
        #[test]
        fn every_reachable_bus_visited_exactly_once(bridges in tree_strategy()) {
            let sim = sim();
            sim.add_pci_device(0, 0, 0, 0, host_bridge());
            let max_bus = bridges.last().map(|&(_, _, sub)| sub).unwrap_or(0);
            for (i, &(parent, secondary, subordinate)) in bridges.iter().enumerate() {
                sim.add_pci_device(0, parent, 2 + i as u8, 0, bridge(secondary, subordinate));
            }
            let cam = PortCam::new(&sim);
            let scan = discover_segment(&cam, 0).unwrap();

            for bus in 0..=max_bus as usize {
                prop_assert_eq!(scan.bus_states[bus], BusState::Visited);
            }
            prop_assert!(scan.bus_states.iter().all(|s| *s != BusState::ToVisit));
            // each bridge function recorded exactly once
            let bridge_count = scan.devices.iter().filter(|d| d.is_pci_bridge()).count();
            prop_assert_eq!(bridge_count, bridges.len());
        }
    }
}
