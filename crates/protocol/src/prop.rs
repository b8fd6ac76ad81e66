//! Well-known string property keys interpreted by the scheduler.

/// Informational node name.
pub const NODE_NAME: &str = "node.name";

/// Whether the node is paused when it goes idle. Defaults to true.
pub const NODE_PAUSE_ON_IDLE: &str = "node.pause-on-idle";

/// Whether the node can drive a graph. Defaults to false.
pub const NODE_DRIVER: &str = "node.driver";

/// Whether the node wants to be scheduled even in an otherwise idle
/// component.
pub const NODE_ALWAYS_PROCESS: &str = "node.always-process";

/// Requested latency as a `"num/denom"` fraction, determines the quantum.
pub const NODE_LATENCY: &str = "node.latency";

/// Opaque factory name, passed through to the plugin loader.
pub const FACTORY_NAME: &str = "factory.name";

/// Opaque library name, passed through to the plugin loader.
pub const LIBRARY_NAME: &str = "library.name";

/// Opaque device api, passed through to the plugin loader.
pub const DEVICE_API: &str = "device.api";

/// Opaque media class, passed through to the plugin loader.
pub const MEDIA_CLASS: &str = "media.class";

/// Name of the connecting application.
pub const APPLICATION_NAME: &str = "application.name";
