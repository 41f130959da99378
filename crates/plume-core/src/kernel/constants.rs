/// Application name
pub const APP_NAME: &str = "Plume";

/// Application version
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Descriptor file names probed in a plugin directory, in order of preference.
pub const DESCRIPTOR_FILE_NAMES: &[&str] = &["plugin.json", "plugin.toml", "plugin.yaml", "plugin.yml"];

/// File holding the persisted descriptor cache lines
pub const CACHE_FILE_NAME: &str = "plugin-cache";

/// File holding the ids of plugins that were active at shutdown
pub const ACTIVE_PLUGINS_FILE_NAME: &str = "active-plugins";

/// Default directory searched for plugins when no configuration names one
pub const DEFAULT_PLUGINS_DIR: &str = "plugins";

/// Default directory for persisted plugin state
pub const DEFAULT_STATE_DIR: &str = ".plume";

/// Bootstrap loader backed by an in-process module table
pub const STATIC_LOADER_TAG: &str = "static";

/// Bootstrap loader backed by shared libraries
pub const NATIVE_LOADER_TAG: &str = "native";

/// Opener priority used when a descriptor does not declare one
pub const DEFAULT_OPENER_PRIORITY: i32 = 50;

/// Highest priority a file opener may declare
pub const MAX_OPENER_PRIORITY: i32 = 100;
