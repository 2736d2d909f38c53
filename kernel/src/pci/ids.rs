//! PCI class and vendor name tables.
//!
//! `PCI_CLASSES` is kept in class-major order so resolution is a single
//! forward scan: find the class, keep scanning the same class for the
//! subclass, keep scanning the same subclass for the prog-if. Unknown
//! subclass or prog-if degrades to the names found so far; an unknown
//! class means an unknown device.

pub struct ClassRecord {
    pub class: u8,
    pub subclass: u8,
    pub progif: u8,
    pub class_name: &'static str,
    pub subclass_name: &'static str,
    pub progif_name: &'static str,
}

const fn rec(
    class: u8,
    subclass: u8,
    progif: u8,
    class_name: &'static str,
    subclass_name: &'static str,
    progif_name: &'static str,
) -> ClassRecord {
    ClassRecord {
        class,
        subclass,
        progif,
        class_name,
        subclass_name,
        progif_name,
    }
}

pub(crate) static PCI_CLASSES: &[ClassRecord] = &[
    rec(0x00, 0x00, 0x00, "Unclassified", "Non-VGA-Compatible", ""),
    rec(0x00, 0x01, 0x00, "Unclassified", "VGA-Compatible", ""),
    rec(0x01, 0x00, 0x00, "Mass Storage Controller", "SCSI Bus Controller", ""),
    rec(0x01, 0x01, 0x00, "Mass Storage Controller", "IDE Controller", "ISA Compatibility Mode"),
    rec(0x01, 0x01, 0x05, "Mass Storage Controller", "IDE Controller", "PCI Native Mode"),
    rec(0x01, 0x01, 0x8A, "Mass Storage Controller", "IDE Controller", "ISA Mode w/ Bus Mastering"),
    rec(0x01, 0x02, 0x00, "Mass Storage Controller", "Floppy Disk Controller", ""),
    rec(0x01, 0x03, 0x00, "Mass Storage Controller", "IPI Bus Controller", ""),
    rec(0x01, 0x04, 0x00, "Mass Storage Controller", "RAID Controller", ""),
    rec(0x01, 0x05, 0x20, "Mass Storage Controller", "ATA Controller", "Single DMA"),
    rec(0x01, 0x05, 0x30, "Mass Storage Controller", "ATA Controller", "Chained DMA"),
    rec(0x01, 0x06, 0x00, "Mass Storage Controller", "SATA Controller", "Vendor Specific"),
    rec(0x01, 0x06, 0x01, "Mass Storage Controller", "SATA Controller", "AHCI 1.0"),
    rec(0x01, 0x07, 0x00, "Mass Storage Controller", "Serial Attached SCSI", ""),
    rec(0x01, 0x08, 0x01, "Mass Storage Controller", "Non-Volatile Memory Controller", "NVMHCI"),
    rec(0x01, 0x08, 0x02, "Mass Storage Controller", "Non-Volatile Memory Controller", "NVM Express"),
    rec(0x01, 0x80, 0x00, "Mass Storage Controller", "Other", ""),
    rec(0x02, 0x00, 0x00, "Network Controller", "Ethernet Controller", ""),
    rec(0x02, 0x01, 0x00, "Network Controller", "Token Ring Controller", ""),
    rec(0x02, 0x02, 0x00, "Network Controller", "FDDI Controller", ""),
    rec(0x02, 0x03, 0x00, "Network Controller", "ATM Controller", ""),
    rec(0x02, 0x80, 0x00, "Network Controller", "Other", ""),
    rec(0x03, 0x00, 0x00, "Display Controller", "VGA Compatible Controller", "VGA Controller"),
    rec(0x03, 0x00, 0x01, "Display Controller", "VGA Compatible Controller", "8514 Compatible"),
    rec(0x03, 0x01, 0x00, "Display Controller", "XGA Controller", ""),
    rec(0x03, 0x02, 0x00, "Display Controller", "3D Controller", ""),
    rec(0x03, 0x80, 0x00, "Display Controller", "Other", ""),
    rec(0x04, 0x00, 0x00, "Multimedia Controller", "Video Controller", ""),
    rec(0x04, 0x01, 0x00, "Multimedia Controller", "Audio Controller", ""),
    rec(0x04, 0x03, 0x00, "Multimedia Controller", "Audio Device", ""),
    rec(0x05, 0x00, 0x00, "Memory Controller", "RAM Controller", ""),
    rec(0x05, 0x01, 0x00, "Memory Controller", "Flash Controller", ""),
    rec(0x06, 0x00, 0x00, "Bridge", "Host Bridge", ""),
    rec(0x06, 0x01, 0x00, "Bridge", "ISA Bridge", ""),
    rec(0x06, 0x02, 0x00, "Bridge", "EISA Bridge", ""),
    rec(0x06, 0x03, 0x00, "Bridge", "MCA Bridge", ""),
    rec(0x06, 0x04, 0x00, "Bridge", "PCI-to-PCI Bridge", "Normal Decode"),
    rec(0x06, 0x04, 0x01, "Bridge", "PCI-to-PCI Bridge", "Subtractive Decode"),
    rec(0x06, 0x05, 0x00, "Bridge", "PCMCIA Bridge", ""),
    rec(0x06, 0x07, 0x00, "Bridge", "CardBus Bridge", ""),
    rec(0x06, 0x80, 0x00, "Bridge", "Other", ""),
    rec(0x07, 0x00, 0x00, "Simple Communication Controller", "Serial Controller", "8250 UART"),
    rec(0x07, 0x00, 0x02, "Simple Communication Controller", "Serial Controller", "16550 UART"),
    rec(0x07, 0x01, 0x00, "Simple Communication Controller", "Parallel Controller", ""),
    rec(0x07, 0x03, 0x00, "Simple Communication Controller", "Modem", ""),
    rec(0x08, 0x00, 0x00, "Base System Peripheral", "Interrupt Controller", "8259 PIC"),
    rec(0x08, 0x00, 0x20, "Base System Peripheral", "Interrupt Controller", "I/O APIC"),
    rec(0x08, 0x01, 0x00, "Base System Peripheral", "DMA Controller", ""),
    rec(0x08, 0x02, 0x00, "Base System Peripheral", "Timer", ""),
    rec(0x08, 0x03, 0x00, "Base System Peripheral", "RTC Controller", ""),
    rec(0x09, 0x00, 0x00, "Input Device Controller", "Keyboard Controller", ""),
    rec(0x09, 0x02, 0x00, "Input Device Controller", "Mouse Controller", ""),
    rec(0x0A, 0x00, 0x00, "Docking Station", "Generic", ""),
    rec(0x0B, 0x00, 0x00, "Processor", "386", ""),
    rec(0x0B, 0x40, 0x00, "Processor", "Co-Processor", ""),
    rec(0x0C, 0x00, 0x00, "Serial Bus Controller", "FireWire Controller", ""),
    rec(0x0C, 0x03, 0x00, "Serial Bus Controller", "USB Controller", "UHCI"),
    rec(0x0C, 0x03, 0x10, "Serial Bus Controller", "USB Controller", "OHCI"),
    rec(0x0C, 0x03, 0x20, "Serial Bus Controller", "USB Controller", "EHCI"),
    rec(0x0C, 0x03, 0x30, "Serial Bus Controller", "USB Controller", "XHCI"),
    rec(0x0C, 0x05, 0x00, "Serial Bus Controller", "SMBus Controller", ""),
    rec(0x0D, 0x00, 0x00, "Wireless Controller", "iRDA Controller", ""),
    rec(0x0D, 0x11, 0x00, "Wireless Controller", "Bluetooth Controller", ""),
    rec(0x0D, 0x80, 0x00, "Wireless Controller", "Other", ""),
    rec(0x10, 0x00, 0x00, "Encryption Controller", "Network and Computing", ""),
    rec(0x11, 0x00, 0x00, "Signal Processing Controller", "DPIO Modules", ""),
    rec(0x12, 0x00, 0x00, "Processing Accelerator", "Generic", ""),
    rec(0x13, 0x00, 0x00, "Non-Essential Instrumentation", "Generic", ""),
    rec(0xFF, 0x00, 0x00, "Vendor Specific", "", ""),
];

static PCI_VENDORS: &[(u16, &str)] = &[
    (0x1000, "Broadcom / LSI"),
    (0x1002, "AMD/ATI"),
    (0x1022, "AMD"),
    (0x102B, "Matrox"),
    (0x104C, "Texas Instruments"),
    (0x10DE, "NVIDIA"),
    (0x10EC, "Realtek"),
    (0x1106, "VIA Technologies"),
    (0x111D, "IDT"),
    (0x1234, "QEMU"),
    (0x14E4, "Broadcom"),
    (0x15AD, "VMware"),
    (0x168C, "Qualcomm Atheros"),
    (0x1AF4, "Red Hat (virtio)"),
    (0x1B36, "Red Hat (QEMU)"),
    (0x1D0F, "Amazon Annapurna Labs"),
    (0x8086, "Intel"),
    (0x80EE, "VirtualBox"),
];

/// Resolved names for a (class, subclass, progif) triple. Subclass and
/// prog-if may be absent; the class name is always present for a known
/// class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceNames {
    pub class: &'static str,
    pub subclass: Option<&'static str>,
    pub progif: Option<&'static str>,
}

fn non_empty(name: &'static str) -> Option<&'static str> {
    if name.is_empty() { None } else { Some(name) }
}

/// Resolve a class triple by forward scan of the class-major table.
/// Returns None (unknown device) only when the class itself is unknown.
pub fn lookup_class(class: u8, subclass: u8, progif: u8) -> Option<DeviceNames> {
    let start = PCI_CLASSES.iter().position(|r| r.class == class)?;
    let mut names = DeviceNames {
        class: PCI_CLASSES[start].class_name,
        subclass: None,
        progif: None,
    };

    let mut idx = start;
    while idx < PCI_CLASSES.len() && PCI_CLASSES[idx].class == class {
        if PCI_CLASSES[idx].subclass == subclass {
            names.subclass = non_empty(PCI_CLASSES[idx].subclass_name);
            break;
        }
        idx += 1;
    }

    while idx < PCI_CLASSES.len()
        && PCI_CLASSES[idx].class == class
        && PCI_CLASSES[idx].subclass == subclass
    {
        if PCI_CLASSES[idx].progif == progif {
            names.progif = non_empty(PCI_CLASSES[idx].progif_name);
            break;
        }
        idx += 1;
    }

    Some(names)
}

pub fn lookup_vendor(vendor_id: u16) -> Option<&'static str> {
    PCI_VENDORS
        .iter()
        .find(|(id, _)| *id == vendor_id)
        .map(|(_, name)| *name)
}
