//! # Engine Primitives
//!
//! Fixed runtime constants for the engine. They are compiled into the
//! binary and are immutable at runtime.

/// First identifier handed out by a fresh store.
///
/// Zero is never a valid store identifier.
pub const FIRST_UID: u64 = 1;

/// Maximum nesting depth accepted when rebuilding a graph from a tree.
///
/// Bounds recursion on hand-built or hostile input.
pub const MAX_TREE_DEPTH: usize = 1024;

// =============================================================================
// INPUT VALIDATION LIMITS
// =============================================================================

/// Default cap on the size of a JSON tree accepted for import (64 MB).
pub const MAX_IMPORT_BYTES: u64 = 64 * 1024 * 1024;

/// Maximum length of an alternate key.
///
/// Stores reject longer keys rather than index them.
pub const MAX_ALT_ID_LENGTH: usize = 4096;
