//! Kernel core bring-up.

use log::LevelFilter;

use crate::time::drift;

/// Boot-time configuration for the core subsystems.
pub struct KernelConfig {
    pub log_level: LevelFilter,
    /// Drift compensator steady-state re-measurement period.
    pub drift_loop_delay_ticks: u64,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            log_level: LevelFilter::Info,
            drift_loop_delay_ticks: drift::DEFAULT_LOOP_DELAY_TICKS,
        }
    }
}

/// Initialize the core subsystems in dependency order: logging, the
/// system clock and its drift compensator, then PCI enumeration.
pub fn init_kernel(config: &KernelConfig) {
    crate::logger::init(config.log_level);
    drift::set_loop_delay_ticks(config.drift_loop_delay_ticks);
    crate::time::init_system_time();
    crate::pci::init_pci();
    log::info!("kernel core ready");
}
