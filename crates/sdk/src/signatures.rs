//! Byte patterns and gamedata entry names
//!
//! These patterns must match exactly what the supported game builds
//! contain. `?` marks a wildcard byte.

/// Device initialization, Legend build.
/// The match is the function entry; the `mov ecx, [..]` operand at +7 is the
/// address of the device manager instance pointer.
pub const LEGEND_DEVICE_INIT: &str = "A1 ? ? ? ? 8B 0D ? ? ? ? 68 ? ? ? ? 50 E8";

/// Operand offset of the device manager slot in [`LEGEND_DEVICE_INIT`]
pub const LEGEND_DEVICE_MANAGER_OPERAND: usize = 7;

/// Device initialization, Underworld build
pub const UNDERWORLD_DEVICE_INIT: &str = "8B 0D ? ? ? ? 8B 01 8B 15 ? ? ? ? 8B 00 68";

/// Operand offset of the device manager slot in [`UNDERWORLD_DEVICE_INIT`]
pub const UNDERWORLD_DEVICE_MANAGER_OPERAND: usize = 2;

/// Signature names used in gamedata
pub mod names {
    pub const DEVICE_INIT: &str = "DeviceInit";
    pub const GAME_LOOP: &str = "GameLoop";
    pub const FONT_FLUSH: &str = "FontFlush";
    pub const WND_PROC: &str = "WndProc";
}

/// Offset names used in gamedata
pub mod offsets {
    /// RVA of the pointer to the first active instance
    pub const INSTANCE_LIST: &str = "InstanceList";
    /// RVA of INSTANCE_ReallyRemoveInstance
    pub const REMOVE_INSTANCE: &str = "RemoveInstance";
    /// Instance::next
    pub const INSTANCE_NEXT: &str = "InstanceNext";
    /// Instance::object
    pub const INSTANCE_OBJECT: &str = "InstanceObject";
    /// Object::name
    pub const OBJECT_NAME: &str = "ObjectName";
    /// sizeof(Instance)
    pub const INSTANCE_SIZE: &str = "InstanceSize";
}

/// Built-in device-init signatures for iteration: (build, pattern, operand offset)
pub const BUILTIN_SIGNATURES: &[(&str, &str, usize)] = &[
    ("legend", LEGEND_DEVICE_INIT, LEGEND_DEVICE_MANAGER_OPERAND),
    ("underworld", UNDERWORLD_DEVICE_INIT, UNDERWORLD_DEVICE_MANAGER_OPERAND),
];
