//! Modules shipped in this library

use cdchook_core::modules::{Module, ModuleFactory, ModuleKind};

/// Reports lifecycle progress to the console
#[derive(Debug, Default)]
pub struct LogModule {
    frames: u64,
    ticks: u64,
}

/// Frames between progress lines
const REPORT_INTERVAL: u64 = 3600;

impl Module for LogModule {
    fn on_post_initialize(&mut self) {
        match cdchook_engine::engine().and_then(|g| g.device_manager_ptr()) {
            Some(device) => tracing::info!("Device ready at {:p}, modules initialized", device),
            None => tracing::info!("Device ready, modules initialized"),
        }
    }

    fn on_frame(&mut self) {
        self.frames += 1;
        if self.frames % REPORT_INTERVAL == 0 {
            tracing::debug!("{} frames, {} ticks", self.frames, self.ticks);
        }
    }

    fn on_loop(&mut self) {
        self.ticks += 1;
    }
}

/// Creates the modules this build ships
#[derive(Debug, Default)]
pub struct ShippedModules;

impl ModuleFactory for ShippedModules {
    fn create(&mut self, kind: ModuleKind) -> Option<Box<dyn Module>> {
        match kind {
            ModuleKind::Log => Some(Box::new(LogModule::default())),
            _ => None,
        }
    }
}
