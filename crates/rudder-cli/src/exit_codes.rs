//! Standard exit codes for CLI operations
//!
//! These exit codes follow Unix conventions and sysexits.h where applicable.

/// Success - operation completed without errors
pub const SUCCESS: i32 = 0;

/// General error - unspecified failure
pub const ERROR: i32 = 1;

/// Values error - an overlay could not be loaded or parsed
pub const VALUES_ERROR: i32 = 2;

/// Template error - template rendering failed
pub const TEMPLATE_ERROR: i32 = 3;

/// Chart error - invalid chart structure or Chart.yaml
pub const CHART_ERROR: i32 = 4;

/// IO error - file not found, permission denied, etc.
pub const IO_ERROR: i32 = 5;

/// Release error - release missing, already present, or busy
pub const RELEASE_ERROR: i32 = 6;

/// Cluster error - applying manifests failed
pub const CLUSTER_ERROR: i32 = 7;

/// Usage error - invalid arguments or options (following sysexits.h convention)
pub const USAGE_ERROR: i32 = 64;

/// Configuration error (sysexits.h EX_CONFIG)
pub const CONFIG_ERROR: i32 = 78;
