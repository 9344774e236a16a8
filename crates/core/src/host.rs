//! Host process integration points
//!
//! The game drives the hook through three pipelines: window messages, the
//! render flush, and the logic tick. Each pipeline accepts one subscriber.

use cdchook_sdk::{PCDeviceManager, WindowMessage};

/// Subscriber for the input-message pipeline
pub type MessageHandler = Box<dyn FnMut(&WindowMessage) + Send>;

/// Subscriber for the render-flush and tick pipelines
pub type TickHandler = Box<dyn FnMut() + Send>;

/// The in-game menu, first to see every window message
pub trait Menu: Send {
    fn on_message(&mut self, message: &WindowMessage);
}

/// Services the game process provides to the Hook Core
pub trait Host: Send {
    /// Construct the menu once the device exists
    fn create_menu(&mut self) -> Box<dyn Menu>;

    fn subscribe_message(&mut self, handler: MessageHandler);

    fn subscribe_flush(&mut self, handler: TickHandler);

    fn subscribe_loop(&mut self, handler: TickHandler);

    /// Make the live device manager available to the rest of the process
    fn publish_device_manager(&mut self, device: *mut PCDeviceManager);

    /// Submit the batched draw calls collected this frame
    fn flush_draw_batch(&mut self);
}
