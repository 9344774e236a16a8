//! Host pipelines backed by the game's own call sites
//!
//! Each pipeline is a single subscriber slot. The detours feed the slots;
//! the Hook Core subscribes to them during the device-ready transition.

use parking_lot::Mutex;

use cdchook_engine as engine;
use cdchook_core::host::{Host, Menu, MessageHandler, TickHandler};
use cdchook_sdk::{PCDeviceManager, WindowMessage};

/// A deferred draw call, run at the end of the frame
pub type DrawCall = Box<dyn FnOnce() + Send>;

/// One-subscriber callback slot
struct Slot<H> {
    name: &'static str,
    handler: Mutex<Option<H>>,
}

impl<H> Slot<H> {
    const fn new(name: &'static str) -> Self {
        Self {
            name,
            handler: Mutex::new(None),
        }
    }

    fn subscribe(&self, handler: H) {
        if self.handler.lock().replace(handler).is_some() {
            tracing::warn!("{} pipeline already had a subscriber, replaced", self.name);
        } else {
            tracing::debug!("Subscribed to {} pipeline", self.name);
        }
    }

    /// Run the handler without blocking; a busy slot means re-entry
    fn with(&self, f: impl FnOnce(&mut H)) {
        match self.handler.try_lock() {
            Some(mut handler) => {
                if let Some(handler) = handler.as_mut() {
                    f(handler);
                }
            }
            None => tracing::trace!("Skipping re-entrant {} dispatch", self.name),
        }
    }
}

static MESSAGE: Slot<MessageHandler> = Slot::new("message");
static FLUSH: Slot<TickHandler> = Slot::new("flush");
static LOOP: Slot<TickHandler> = Slot::new("loop");

/// Draw calls queued by modules during the current frame
static DRAW_BATCH: Mutex<Vec<DrawCall>> = Mutex::new(Vec::new());

/// Feed a window message into the message pipeline
pub fn dispatch_message(message: &WindowMessage) {
    MESSAGE.with(|handler| handler(message));
}

/// Feed a render flush into the flush pipeline
pub fn dispatch_flush() {
    FLUSH.with(|handler| handler());
}

/// Feed a logic tick into the loop pipeline
pub fn dispatch_loop() {
    LOOP.with(|handler| handler());
}

/// Queue a draw call for the end of the frame
pub fn queue_draw(call: impl FnOnce() + Send + 'static) {
    DRAW_BATCH.lock().push(Box::new(call));
}

/// Run and clear every queued draw call, returning how many ran
pub fn flush_draw_batch() -> usize {
    let calls = std::mem::take(&mut *DRAW_BATCH.lock());
    let count = calls.len();
    for call in calls {
        call();
    }
    count
}

/// F8 toggles the menu
const VK_F8: usize = 0x77;
const WM_KEYUP: u32 = 0x0101;

/// The in-game menu
#[derive(Debug, Default)]
pub struct OverlayMenu {
    visible: bool,
}

impl OverlayMenu {
    pub fn is_visible(&self) -> bool {
        self.visible
    }
}

impl Menu for OverlayMenu {
    fn on_message(&mut self, message: &WindowMessage) {
        if message.msg == WM_KEYUP && message.wparam == VK_F8 {
            self.visible = !self.visible;
            tracing::info!("Menu {}", if self.visible { "opened" } else { "closed" });
        }
    }
}

/// The running game, as seen by the Hook Core
#[derive(Debug, Default)]
pub struct GameHost;

impl Host for GameHost {
    fn create_menu(&mut self) -> Box<dyn Menu> {
        Box::new(OverlayMenu::default())
    }

    fn subscribe_message(&mut self, handler: MessageHandler) {
        MESSAGE.subscribe(handler);
    }

    fn subscribe_flush(&mut self, handler: TickHandler) {
        FLUSH.subscribe(handler);
    }

    fn subscribe_loop(&mut self, handler: TickHandler) {
        LOOP.subscribe(handler);
    }

    fn publish_device_manager(&mut self, device: *mut PCDeviceManager) {
        match engine::engine() {
            Some(globals) => globals.set_device_manager(device),
            None => tracing::error!("Engine globals missing, cannot publish device manager"),
        }
    }

    fn flush_draw_batch(&mut self) {
        let count = flush_draw_batch();
        if count > 0 {
            tracing::trace!("Flushed {} draw calls", count);
        }
    }
}
