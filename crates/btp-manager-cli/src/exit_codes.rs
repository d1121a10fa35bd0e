//! Process exit codes
//!
//! These follow Unix conventions and sysexits.h where applicable.

/// General error
pub const ERROR: i32 = 1;

/// Configuration could not be loaded or is invalid (EX_CONFIG)
pub const CONFIG_ERROR: i32 = 78;

/// Cluster unreachable or the controller stopped with an error (EX_UNAVAILABLE)
pub const CLUSTER_ERROR: i32 = 69;
