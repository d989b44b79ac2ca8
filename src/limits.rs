//! Absolute ceilings from the WebAssembly specification, and implementation
//! limits that keep a malformed producer from claiming unrealistic counts.

// =============================================================================
// Specification ceilings
// =============================================================================

/// Largest memory size, in 64KiB pages, addressable with 32-bit indices
pub const MAX_MEMORY_PAGES: u64 = 65_536;

/// Largest table size: table indices are u32
pub const MAX_TABLE_SIZE: u64 = u32::MAX as u64;

/// Lane indices of `i8x16.shuffle` address two concatenated vectors
pub const MAX_SHUFFLE_LANE: u8 = 32;

/// Local indices are u32, so parameters plus declared locals fit in one
pub const MAX_FUNCTION_LOCALS: u64 = u32::MAX as u64;

// =============================================================================
// Implementation limits
// =============================================================================

/// Maximum number of labels in a br_table instruction
pub const MAX_BR_TABLE_LABELS: u32 = 65_536;

/// Maximum number of entries the binary producer will read for any vector
pub const MAX_VECTOR_ENTRIES: u32 = 1_000_000;
