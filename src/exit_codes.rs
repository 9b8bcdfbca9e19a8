//! Exit code constants for the muster CLI.
//!
//! - 0: Success
//! - 1: Configuration or definition error
//! - 2: No matching agent
//! - 3: Git or isolation failure
//! - 4: Task execution failure
//! - 5: Conflicting definitions

/// Successful execution.
pub const SUCCESS: i32 = 0;

/// Configuration error: bad arguments, unreadable hierarchy, malformed definition.
pub const CONFIG_ERROR: i32 = 1;

/// No agent matched the requested name or capability query.
pub const NOT_FOUND: i32 = 2;

/// Git operation or isolation acquisition/release failure.
pub const GIT_FAILURE: i32 = 3;

/// Task execution failure: dispatch error, timeout, or backend outage.
pub const TASK_FAILURE: i32 = 4;

/// Conflicting definitions at the same tier.
pub const CONFLICT: i32 = 5;
