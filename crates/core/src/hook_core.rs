//! The Hook Core
//!
//! Owns the module registry, the entity sweep and the host connection, and
//! drives them through a fixed lifecycle:
//!
//! ```text
//! Uninitialized -> Scanning -> HookInstalled -> AwaitingDevice -> Running
//! ```
//!
//! [`HookCore::initialize`] runs once at injection time and ends with the
//! device-init hook enabled. The game then calls the hooked routine; the
//! detour calls the original and hands control to
//! [`HookHandle::intercept_init`], which performs the device-ready
//! transition the first time. From then on the host pipelines dispatch into
//! the core every message, frame and tick.
//!
//! Dispatch never blocks: if the core is already borrowed (a host callback
//! re-entering from inside a module), the nested call is skipped. The
//! device-ready transition is the exception. The game calls device init
//! once, so it waits for the startup sequence to release the core.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, MutexGuard};

use cdchook_engine::EngineError;
use cdchook_sdk::{PCDeviceManager, WindowMessage};

use crate::config::{ConfigError, HookConfig};
use crate::entities::EntitySweep;
use crate::gamedata::{find_signature, Gamedata, GamedataError, ScanError};
use crate::hooks::{DetourSlot, HookError, HookInstaller};
use crate::host::{Host, Menu};
use crate::memory::ProcessImage;
use crate::modules::{register_plan, ModuleError, ModuleFactory, ModuleRegistry};

/// Dispatch passes slower than this are reported
const SLOW_DISPATCH: Duration = Duration::from_millis(1);

/// Lifecycle of the Hook Core
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookState {
    Uninitialized,
    Scanning,
    HookInstalled,
    AwaitingDevice,
    Running,
}

/// Errors raised while bringing the hook up
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error(transparent)]
    Module(#[from] ModuleError),

    #[error(transparent)]
    Scan(#[from] ScanError),

    #[error(transparent)]
    Hook(#[from] HookError),

    #[error(transparent)]
    Gamedata(#[from] GamedataError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("Hook core is {actual:?}, expected {expected:?}")]
    InvalidState {
        expected: HookState,
        actual: HookState,
    },

    #[error("Device manager slot at {0:#x} is unreadable")]
    DeviceUnavailable(usize),
}

/// A detour to install for a named signature
#[derive(Clone, Copy)]
pub struct HookTarget<'a> {
    /// Gamedata signature name
    pub name: &'a str,
    /// Replacement function
    pub detour: *const (),
    /// Receives the original function before the hook is enabled
    pub slot: &'a DetourSlot,
}

impl fmt::Debug for HookTarget<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookTarget")
            .field("name", &self.name)
            .field("detour", &self.detour)
            .finish()
    }
}

/// Hook state, modules and dispatch
pub struct HookCore {
    state: HookState,
    config: HookConfig,
    registry: ModuleRegistry,
    host: Box<dyn Host>,
    menu: Option<Box<dyn Menu>>,
    sweep: Option<EntitySweep>,

    /// Address holding the device manager pointer, found by the scan
    device_slot: Option<usize>,

    frame_count: u64,
    loop_count: u64,
}

impl HookCore {
    pub fn new(config: HookConfig, host: Box<dyn Host>) -> Self {
        Self {
            state: HookState::Uninitialized,
            config,
            registry: ModuleRegistry::new(),
            host,
            menu: None,
            sweep: None,
            device_slot: None,
            frame_count: 0,
            loop_count: 0,
        }
    }

    pub fn state(&self) -> HookState {
        self.state
    }

    pub fn config(&self) -> &HookConfig {
        &self.config
    }

    pub fn registry(&self) -> &ModuleRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut ModuleRegistry {
        &mut self.registry
    }

    /// Attach the entity sweep run after every tick's modules
    pub fn set_sweep(&mut self, sweep: Option<EntitySweep>) {
        self.sweep = sweep;
    }

    pub fn sweep(&self) -> Option<&EntitySweep> {
        self.sweep.as_ref()
    }

    pub fn device_slot(&self) -> Option<usize> {
        self.device_slot
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn loop_count(&self) -> u64 {
        self.loop_count
    }

    fn expect_state(&self, expected: HookState) -> Result<(), CoreError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(CoreError::InvalidState {
                expected,
                actual: self.state,
            })
        }
    }

    /// Register modules, locate the device-init routine and hook it
    ///
    /// Optional targets are hooked when gamedata has a signature for them;
    /// a missing or mismatched optional signature is skipped with a warning.
    /// Nothing is written to game code until every hook has been created,
    /// so a failure leaves the process untouched.
    #[tracing::instrument(skip_all)]
    pub fn initialize(
        &mut self,
        image: &dyn ProcessImage,
        gamedata: &Gamedata,
        factory: &mut dyn ModuleFactory,
        installer: &mut dyn HookInstaller,
        device_init: HookTarget<'_>,
        optional: &[HookTarget<'_>],
    ) -> Result<(), CoreError> {
        self.expect_state(HookState::Uninitialized)?;

        register_plan(&mut self.registry, self.config.variant, factory)?;

        self.state = HookState::Scanning;
        let site = find_signature(image, gamedata, device_init.name)?;
        let device_slot = site.operand_address(image)?;
        tracing::info!(
            "{} at {:#x}, device manager slot {:#x}",
            device_init.name,
            site.first(),
            device_slot
        );

        // SAFETY: the site passed the match-count check for this build
        unsafe {
            installer.create_hook(
                device_init.name,
                site.first(),
                device_init.detour,
                device_init.slot,
            )?;
        }
        self.device_slot = Some(device_slot);
        self.state = HookState::HookInstalled;

        for target in optional {
            if !gamedata.has_signature(target.name) {
                tracing::debug!("No signature for {}, pipeline unavailable", target.name);
                continue;
            }
            let site = match find_signature(image, gamedata, target.name) {
                Ok(site) => site,
                Err(e) => {
                    tracing::warn!("Skipping {}: {}", target.name, e);
                    continue;
                }
            };
            // SAFETY: as above
            unsafe {
                installer.create_hook(target.name, site.first(), target.detour, target.slot)?;
            }
        }

        installer.enable_all()?;
        self.state = HookState::AwaitingDevice;

        tracing::info!(
            "Hook installed for {} with {} modules",
            self.config.variant,
            self.registry.len()
        );
        Ok(())
    }

    /// Deliver a window message: menu first, then every module
    pub fn on_message(&mut self, message: &WindowMessage) {
        if self.state != HookState::Running {
            return;
        }
        if let Some(menu) = self.menu.as_mut() {
            menu.on_message(message);
        }
        self.registry.input_all(message);
    }

    /// Render flush: every module's frame hook, then the draw batch
    pub fn on_frame(&mut self) {
        if self.state != HookState::Running {
            return;
        }
        let start = Instant::now();
        self.frame_count += 1;

        self.registry.frame_all();
        if self.config.batch_draw_calls {
            self.host.flush_draw_batch();
        }

        warn_if_slow("Frame", start, self.frame_count);
    }

    /// Logic tick: every module's loop hook, then the entity sweep
    pub fn on_loop(&mut self) {
        if self.state != HookState::Running {
            return;
        }
        let start = Instant::now();
        self.loop_count += 1;

        self.registry.loop_all();
        if let Some(report) = self.sweep.as_mut().and_then(EntitySweep::tick) {
            if report.collected > 0 {
                tracing::debug!(
                    "Sweep on tick {}: {} collected, {} removed, {} skipped",
                    self.loop_count,
                    report.collected,
                    report.removed,
                    report.skipped
                );
            }
        }

        warn_if_slow("Loop", start, self.loop_count);
    }
}

fn warn_if_slow(what: &str, start: Instant, count: u64) {
    let elapsed = start.elapsed();
    if elapsed > SLOW_DISPATCH {
        tracing::warn!("{} took {}ms ({} {})", what, elapsed.as_millis(), what.to_lowercase(), count);
    }
}

impl fmt::Debug for HookCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookCore")
            .field("state", &self.state)
            .field("variant", &self.config.variant)
            .field("modules", &self.registry)
            .field("frame_count", &self.frame_count)
            .field("loop_count", &self.loop_count)
            .finish()
    }
}

/// Shared owner of the Hook Core
///
/// Host subscriptions hold a weak reference, so dropping the last handle
/// turns them into no-ops.
#[derive(Clone)]
pub struct HookHandle(Arc<Shared>);

struct Shared {
    core: Mutex<HookCore>,
    /// Set once the device-ready transition has completed
    running: AtomicBool,
}

impl HookHandle {
    pub fn new(core: HookCore) -> Self {
        Self(Arc::new(Shared {
            core: Mutex::new(core),
            running: AtomicBool::new(false),
        }))
    }

    /// Exclusive access for startup
    pub fn lock(&self) -> MutexGuard<'_, HookCore> {
        self.0.core.lock()
    }

    pub fn state(&self) -> Option<HookState> {
        self.0.core.try_lock().map(|core| core.state)
    }

    fn downgrade(&self) -> Weak<Shared> {
        Arc::downgrade(&self.0)
    }

    /// Body of the device-init detour
    ///
    /// Runs the original routine, then the device-ready transition, and
    /// returns the original result unchanged.
    pub fn intercept_init<F>(&self, image: &dyn ProcessImage, original: F) -> bool
    where
        F: FnOnce() -> bool,
    {
        let result = original();

        match self.device_ready(image) {
            Ok(true) => tracing::info!("Device ready, hook running"),
            Ok(false) => tracing::trace!("Device init called again, already running"),
            Err(e) => tracing::error!("Device-ready transition failed: {}", e),
        }

        result
    }

    /// Publish the device, subscribe to the host pipelines and post-initialize
    /// every module
    ///
    /// Returns `Ok(false)` if the transition already happened.
    ///
    /// Before the transition the only other holder of the core is the
    /// startup sequence, so this blocks until it is released. Once running,
    /// it returns without touching the lock, which keeps a device-init call
    /// made from inside a dispatch from deadlocking.
    pub fn device_ready(&self, image: &dyn ProcessImage) -> Result<bool, CoreError> {
        if self.0.running.load(Ordering::Acquire) {
            return Ok(false);
        }
        let mut guard = self.0.core.lock();
        let core = &mut *guard;

        if core.state == HookState::Running {
            return Ok(false);
        }
        core.expect_state(HookState::AwaitingDevice)?;

        let slot = core.device_slot.ok_or(CoreError::DeviceUnavailable(0))?;
        let device = image
            .read_pointer(slot)
            .ok_or(CoreError::DeviceUnavailable(slot))?;
        core.host
            .publish_device_manager(device as *mut PCDeviceManager);

        core.menu = Some(core.host.create_menu());

        let weak = self.downgrade();
        core.host.subscribe_message(Box::new(move |message| {
            if let Some(core) = weak.upgrade() {
                HookHandle(core).on_message(message);
            }
        }));
        let weak = self.downgrade();
        core.host.subscribe_flush(Box::new(move || {
            if let Some(core) = weak.upgrade() {
                HookHandle(core).on_frame();
            }
        }));
        let weak = self.downgrade();
        core.host.subscribe_loop(Box::new(move || {
            if let Some(core) = weak.upgrade() {
                HookHandle(core).on_loop();
            }
        }));

        core.state = HookState::Running;
        self.0.running.store(true, Ordering::Release);
        core.registry.post_initialize_all();

        Ok(true)
    }

    fn dispatch(&self, what: &str, f: impl FnOnce(&mut HookCore)) -> bool {
        match self.0.core.try_lock() {
            Some(mut core) => {
                f(&mut *core);
                true
            }
            None => {
                tracing::trace!("Skipping re-entrant {} dispatch", what);
                false
            }
        }
    }

    /// Returns false if the call was skipped
    pub fn on_message(&self, message: &WindowMessage) -> bool {
        self.dispatch("message", |core| core.on_message(message))
    }

    pub fn on_frame(&self) -> bool {
        self.dispatch("frame", HookCore::on_frame)
    }

    pub fn on_loop(&self) -> bool {
        self.dispatch("loop", HookCore::on_loop)
    }
}

impl fmt::Debug for HookHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.core.try_lock() {
            Some(core) => core.fmt(f),
            None => f.write_str("HookHandle(<locked>)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cdchook_sdk::signatures::names;

    use crate::config::SweepConfig;
    use crate::entities::{EntityDestroyer, EntityHandle, EntityList, PointerValidator, VisitedEntity};
    use crate::gamedata::GameVariant;
    use crate::host::{MessageHandler, TickHandler};
    use crate::memory::tests::FakeImage;
    use crate::modules::tests::{CallLog, Recorder};
    use crate::modules::{Module, ModuleKind};

    const BASE: usize = 0x0040_1000;
    const SLOT: u32 = 0x00C0_FFE0;
    const DEVICE: usize = 0x0BAD_F00D;

    /// Bytes matching the Legend device-init pattern once, slot at +7
    fn legend_image() -> FakeImage {
        let mut bytes = vec![0xCC; 16];
        bytes.extend_from_slice(&[0xA1, 0x10, 0x20, 0x30, 0x40, 0x8B, 0x0D]);
        bytes.extend_from_slice(&SLOT.to_le_bytes());
        bytes.extend_from_slice(&[0x68, 0, 0, 0, 0, 0x50, 0xE8]);
        bytes.extend_from_slice(&[0xCC; 16]);
        FakeImage::new(BASE, bytes).with_pointer(SLOT as usize, DEVICE)
    }

    const SITE: usize = BASE + 16;

    #[derive(Default)]
    struct Pipelines {
        message: Option<MessageHandler>,
        flush: Option<TickHandler>,
        tick: Option<TickHandler>,
    }

    struct FakeHost {
        log: CallLog,
        pipelines: Arc<Mutex<Pipelines>>,
    }

    struct FakeMenu {
        log: CallLog,
    }

    impl Menu for FakeMenu {
        fn on_message(&mut self, message: &WindowMessage) {
            self.log.lock().push(format!("menu:input({:#x})", message.msg));
        }
    }

    impl Host for FakeHost {
        fn create_menu(&mut self) -> Box<dyn Menu> {
            self.log.lock().push("host:menu".to_string());
            Box::new(FakeMenu {
                log: Arc::clone(&self.log),
            })
        }

        fn subscribe_message(&mut self, handler: MessageHandler) {
            self.log.lock().push("host:subscribe_message".to_string());
            self.pipelines.lock().message = Some(handler);
        }

        fn subscribe_flush(&mut self, handler: TickHandler) {
            self.log.lock().push("host:subscribe_flush".to_string());
            self.pipelines.lock().flush = Some(handler);
        }

        fn subscribe_loop(&mut self, handler: TickHandler) {
            self.log.lock().push("host:subscribe_loop".to_string());
            self.pipelines.lock().tick = Some(handler);
        }

        fn publish_device_manager(&mut self, device: *mut PCDeviceManager) {
            self.log.lock().push(format!("host:publish({:#x})", device as usize));
        }

        fn flush_draw_batch(&mut self) {
            self.log.lock().push("host:flush_batch".to_string());
        }
    }

    /// Provides recorders for the first `limit` kinds of the plan
    struct RecorderFactory {
        log: CallLog,
        limit: usize,
        created: usize,
    }

    impl ModuleFactory for RecorderFactory {
        fn create(&mut self, kind: ModuleKind) -> Option<Box<dyn Module>> {
            if self.created == self.limit {
                return None;
            }
            self.created += 1;
            Some(Box::new(Recorder::new(kind.name(), &self.log)))
        }
    }

    #[derive(Default)]
    struct RecordingInstaller {
        calls: Vec<String>,
    }

    impl HookInstaller for RecordingInstaller {
        unsafe fn create_hook(
            &mut self,
            name: &str,
            target: usize,
            _detour: *const (),
            slot: &DetourSlot,
        ) -> Result<(), HookError> {
            self.calls.push(format!("create:{}@{:#x}", name, target));
            slot.set((target + 0x1000) as *const ());
            Ok(())
        }

        fn enable_all(&mut self) -> Result<(), HookError> {
            self.calls.push("enable_all".to_string());
            Ok(())
        }

        fn disable_all(&mut self) -> Result<(), HookError> {
            self.calls.push("disable_all".to_string());
            Ok(())
        }
    }

    struct Fixture {
        handle: HookHandle,
        log: CallLog,
        pipelines: Arc<Mutex<Pipelines>>,
        installer: RecordingInstaller,
        image: FakeImage,
    }

    fn config() -> HookConfig {
        HookConfig {
            variant: GameVariant::Legend,
            batch_draw_calls: false,
            ..HookConfig::default()
        }
    }

    fn fixture(config: HookConfig, modules: usize) -> (Fixture, Result<(), CoreError>) {
        let log = CallLog::default();
        let pipelines = Arc::new(Mutex::new(Pipelines::default()));
        let host = FakeHost {
            log: Arc::clone(&log),
            pipelines: Arc::clone(&pipelines),
        };
        let handle = HookHandle::new(HookCore::new(config, Box::new(host)));
        let image = legend_image();
        let mut installer = RecordingInstaller::default();
        let mut factory = RecorderFactory {
            log: Arc::clone(&log),
            limit: modules,
            created: 0,
        };

        static DEVICE_INIT: DetourSlot = DetourSlot::new();
        let result = handle.lock().initialize(
            &image,
            &Gamedata::builtin(GameVariant::Legend),
            &mut factory,
            &mut installer,
            HookTarget {
                name: names::DEVICE_INIT,
                detour: 0x1234 as *const (),
                slot: &DEVICE_INIT,
            },
            &[],
        );

        (
            Fixture {
                handle,
                log,
                pipelines,
                installer,
                image,
            },
            result,
        )
    }

    fn running(config: HookConfig, modules: usize) -> Fixture {
        let (fixture, result) = fixture(config, modules);
        result.unwrap();
        assert!(fixture.handle.intercept_init(&fixture.image, || true));
        fixture.log.lock().clear();
        fixture
    }

    #[test]
    fn test_initialize_hooks_device_init() {
        let (f, result) = fixture(config(), 3);
        result.unwrap();

        let core = f.handle.lock();
        assert_eq!(core.state(), HookState::AwaitingDevice);
        assert_eq!(core.device_slot(), Some(SLOT as usize));
        assert_eq!(core.registry().names().collect::<Vec<_>>(), ["Log", "Options", "MainMenu"]);
        assert_eq!(
            f.installer.calls,
            [format!("create:DeviceInit@{:#x}", SITE), "enable_all".to_string()]
        );
    }

    #[test]
    fn test_scan_mismatch_aborts_before_hooking() {
        let log = CallLog::default();
        let host = FakeHost {
            log: Arc::clone(&log),
            pipelines: Arc::default(),
        };
        let mut core = HookCore::new(config(), Box::new(host));
        let image = FakeImage::new(BASE, vec![0x90; 64]);
        let mut installer = RecordingInstaller::default();
        let slot = DetourSlot::new();

        let result = core.initialize(
            &image,
            &Gamedata::builtin(GameVariant::Legend),
            &mut RecorderFactory {
                log,
                limit: 1,
                created: 0,
            },
            &mut installer,
            HookTarget {
                name: names::DEVICE_INIT,
                detour: 0x1234 as *const (),
                slot: &slot,
            },
            &[],
        );

        assert!(matches!(
            result,
            Err(CoreError::Scan(ScanError::CountMismatch { found: 0, .. }))
        ));
        assert!(installer.calls.is_empty());
        assert!(!slot.is_set());
        assert_eq!(core.state(), HookState::Scanning);
    }

    #[test]
    fn test_duplicate_module_aborts_startup() {
        let log = CallLog::default();
        let host = FakeHost {
            log: Arc::clone(&log),
            pipelines: Arc::default(),
        };
        let mut core = HookCore::new(config(), Box::new(host));
        core.registry_mut()
            .register(ModuleKind::Log, Recorder::new("Log", &log))
            .unwrap();

        let mut installer = RecordingInstaller::default();
        let slot = DetourSlot::new();
        let result = core.initialize(
            &legend_image(),
            &Gamedata::builtin(GameVariant::Legend),
            &mut RecorderFactory {
                log,
                limit: 2,
                created: 0,
            },
            &mut installer,
            HookTarget {
                name: names::DEVICE_INIT,
                detour: 0x1234 as *const (),
                slot: &slot,
            },
            &[],
        );

        assert!(matches!(result, Err(CoreError::Module(ModuleError::Duplicate { .. }))));
        assert!(installer.calls.is_empty());
        assert_eq!(core.state(), HookState::Uninitialized);
    }

    #[test]
    fn test_initialize_twice_rejected() {
        let (f, result) = fixture(config(), 1);
        result.unwrap();

        let slot = DetourSlot::new();
        let err = f
            .handle
            .lock()
            .initialize(
                &f.image,
                &Gamedata::builtin(GameVariant::Legend),
                &mut RecorderFactory {
                    log: CallLog::default(),
                    limit: 0,
                    created: 0,
                },
                &mut RecordingInstaller::default(),
                HookTarget {
                    name: names::DEVICE_INIT,
                    detour: 0x1234 as *const (),
                    slot: &slot,
                },
                &[],
            )
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidState { .. }));
    }

    #[test]
    fn test_optional_targets_skipped_without_signature() {
        let log = CallLog::default();
        let host = FakeHost {
            log: Arc::clone(&log),
            pipelines: Arc::default(),
        };
        let mut core = HookCore::new(config(), Box::new(host));
        let mut installer = RecordingInstaller::default();
        let device = DetourSlot::new();
        let game_loop = DetourSlot::new();
        let font_flush = DetourSlot::new();

        // FontFlush is known but does not match; GameLoop points at the same site
        let json = r#"{ "signatures": {
            "GameLoop": { "pattern": "A1 ? ? ? ? 8B 0D" },
            "FontFlush": { "pattern": "DE AD BE EF" }
        } }"#;
        let gamedata = Gamedata::load_from_str(GameVariant::Legend, json).unwrap();

        core.initialize(
            &legend_image(),
            &gamedata,
            &mut RecorderFactory {
                log,
                limit: 0,
                created: 0,
            },
            &mut installer,
            HookTarget {
                name: names::DEVICE_INIT,
                detour: 0x1 as *const (),
                slot: &device,
            },
            &[
                HookTarget {
                    name: names::GAME_LOOP,
                    detour: 0x2 as *const (),
                    slot: &game_loop,
                },
                HookTarget {
                    name: names::FONT_FLUSH,
                    detour: 0x3 as *const (),
                    slot: &font_flush,
                },
                HookTarget {
                    name: names::WND_PROC,
                    detour: 0x4 as *const (),
                    slot: &font_flush,
                },
            ],
        )
        .unwrap();

        assert_eq!(installer.calls.len(), 3);
        assert_eq!(installer.calls[1], format!("create:GameLoop@{:#x}", SITE));
        assert_eq!(installer.calls[2], "enable_all");
        assert!(game_loop.is_set());
        assert!(!font_flush.is_set());
    }

    #[test]
    fn test_device_ready_after_original_before_post_init() {
        let (f, result) = fixture(config(), 2);
        result.unwrap();

        let log = Arc::clone(&f.log);
        let returned = f.handle.intercept_init(&f.image, || {
            log.lock().push("original".to_string());
            false
        });
        assert!(!returned, "original result must be passed through");

        assert_eq!(
            *f.log.lock(),
            [
                "original".to_string(),
                format!("host:publish({:#x})", DEVICE),
                "host:menu".to_string(),
                "host:subscribe_message".to_string(),
                "host:subscribe_flush".to_string(),
                "host:subscribe_loop".to_string(),
                "Log:post_init".to_string(),
                "Options:post_init".to_string(),
            ]
        );
        assert_eq!(f.handle.state(), Some(HookState::Running));
    }

    #[test]
    fn test_device_ready_happens_once() {
        let (f, result) = fixture(config(), 1);
        result.unwrap();

        let mut originals = 0;
        for _ in 0..3 {
            f.handle.intercept_init(&f.image, || {
                originals += 1;
                true
            });
        }

        assert_eq!(originals, 3);
        let post_inits = f
            .log
            .lock()
            .iter()
            .filter(|e| e.ends_with("post_init"))
            .count();
        assert_eq!(post_inits, 1);
        let publishes = f.log.lock().iter().filter(|e| e.starts_with("host:publish")).count();
        assert_eq!(publishes, 1);
    }

    #[test]
    fn test_device_ready_waits_for_startup_lock() {
        let (f, result) = fixture(config(), 2);
        result.unwrap();

        let guard = f.handle.lock();
        std::thread::scope(|scope| {
            let game = scope.spawn(|| f.handle.intercept_init(&f.image, || true));
            std::thread::sleep(Duration::from_millis(50));
            assert!(f.log.lock().is_empty(), "transition must wait for startup");
            drop(guard);
            assert!(game.join().unwrap());
        });

        assert_eq!(f.handle.state(), Some(HookState::Running));
        f.log.lock().clear();
        for _ in 0..3 {
            assert!(f.handle.on_frame());
        }
        assert_eq!(f.log.lock().len(), 6);
        assert_eq!(f.handle.lock().frame_count(), 3);
    }

    #[test]
    fn test_device_ready_inside_dispatch_does_not_block() {
        let f = running(config(), 1);
        let guard = f.handle.lock();
        assert!(!f.handle.device_ready(&f.image).unwrap());
        drop(guard);
    }

    #[test]
    fn test_unreadable_device_slot() {
        let (f, result) = fixture(config(), 1);
        result.unwrap();

        let empty = FakeImage::new(BASE, Vec::new());
        assert!(matches!(
            f.handle.device_ready(&empty),
            Err(CoreError::DeviceUnavailable(slot)) if slot == SLOT as usize
        ));
        assert_eq!(f.handle.state(), Some(HookState::AwaitingDevice));
    }

    #[test]
    fn test_message_goes_to_menu_then_modules() {
        let f = running(config(), 3);
        let message = WindowMessage::new(0x10, 0x100, 0x41, 0);

        let mut pipelines = f.pipelines.lock();
        (pipelines.message.as_mut().unwrap())(&message);

        assert_eq!(
            *f.log.lock(),
            [
                "menu:input(0x100)",
                "Log:input(0x100)",
                "Options:input(0x100)",
                "MainMenu:input(0x100)"
            ]
        );
    }

    #[test]
    fn test_frame_dispatch_and_batch_flush() {
        let f = running(
            HookConfig {
                batch_draw_calls: true,
                ..config()
            },
            2,
        );

        (f.pipelines.lock().flush.as_mut().unwrap())();
        assert_eq!(
            *f.log.lock(),
            ["Log:frame", "Options:frame", "host:flush_batch"]
        );
        assert_eq!(f.handle.lock().frame_count(), 1);
    }

    #[test]
    fn test_frame_without_batching() {
        let f = running(config(), 1);
        f.handle.on_frame();
        assert_eq!(*f.log.lock(), ["Log:frame"]);
    }

    struct LoggingList {
        log: CallLog,
    }

    impl EntityList for LoggingList {
        fn for_each(&self, visitor: &mut dyn FnMut(VisitedEntity<'_>)) {
            self.log.lock().push("sweep".to_string());
            visitor(VisitedEntity {
                handle: EntityHandle::new(0x1000),
                name: Some(b"shark"),
            });
        }
    }

    struct LoggingDestroyer {
        log: CallLog,
    }

    impl EntityDestroyer for LoggingDestroyer {
        fn destroy(&mut self, handle: EntityHandle, _reserved: i32, _graceful: bool) {
            self.log.lock().push(format!("destroy:{}", handle));
        }
    }

    struct AlwaysValid;

    impl PointerValidator for AlwaysValid {
        fn is_valid(&self, _handle: EntityHandle, _size: usize) -> bool {
            true
        }
    }

    #[test]
    fn test_loop_runs_modules_then_sweep() {
        let f = running(config(), 2);
        let sweep = EntitySweep::new(
            &SweepConfig::default(),
            16,
            Box::new(LoggingList {
                log: Arc::clone(&f.log),
            }),
            Box::new(LoggingDestroyer {
                log: Arc::clone(&f.log),
            }),
            Box::new(AlwaysValid),
        );
        f.handle.lock().set_sweep(Some(sweep));

        (f.pipelines.lock().tick.as_mut().unwrap())();
        assert_eq!(
            *f.log.lock(),
            ["Log:loop", "Options:loop", "sweep", "destroy:0x1000"]
        );
        assert_eq!(f.handle.lock().loop_count(), 1);
    }

    #[test]
    fn test_dispatch_ignored_before_running() {
        let (f, result) = fixture(config(), 2);
        result.unwrap();

        assert!(f.handle.on_frame());
        assert!(f.handle.on_loop());
        assert!(f.handle.on_message(&WindowMessage::new(0, 1, 0, 0)));
        assert!(f.log.lock().is_empty());
        assert_eq!(f.handle.lock().frame_count(), 0);
    }

    #[test]
    fn test_reentrant_dispatch_skipped() {
        let f = running(config(), 1);
        let guard = f.handle.lock();
        assert!(!f.handle.on_frame());
        assert!(!f.handle.on_loop());
        drop(guard);
        assert!(f.handle.on_frame());
    }

    #[test]
    fn test_subscriptions_do_not_keep_core_alive() {
        let f = running(config(), 1);
        let pipelines = Arc::clone(&f.pipelines);
        let log = Arc::clone(&f.log);
        drop(f);

        (pipelines.lock().flush.as_mut().unwrap())();
        assert!(log.lock().is_empty());
    }
}
