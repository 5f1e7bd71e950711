//! Packed 32-bit detector element addresses.
//!
//! Field layout, starting at the least significant bit:
//!
//! | field       | bits |
//! |-------------|------|
//! | system      | 4    |
//! | unit        | 6    |
//! | ladder      | 5    |
//! | half-ladder | 1    |
//! | module      | 5    |
//! | sensor      | 4    |
//! | side        | 1    |

/// System identifier of the strip tracker.
pub const SYSTEM_ID: u32 = 1;

const SYSTEM_BITS: u32 = 4;
const UNIT_BITS: u32 = 6;
const LADDER_BITS: u32 = 5;
const HALF_LADDER_BITS: u32 = 1;
const MODULE_BITS: u32 = 5;
const SENSOR_BITS: u32 = 4;
const SIDE_BITS: u32 = 1;

const UNIT_SHIFT: u32 = SYSTEM_BITS;
const LADDER_SHIFT: u32 = UNIT_SHIFT + UNIT_BITS;
const HALF_LADDER_SHIFT: u32 = LADDER_SHIFT + LADDER_BITS;
const MODULE_SHIFT: u32 = HALF_LADDER_SHIFT + HALF_LADDER_BITS;
const SENSOR_SHIFT: u32 = MODULE_SHIFT + MODULE_BITS;
const SIDE_SHIFT: u32 = SENSOR_SHIFT + SENSOR_BITS;

/// Bits that identify a module (everything up to and including the module field).
const MODULE_MASK: u32 = (1 << SENSOR_SHIFT) - 1;

#[inline]
const fn mask(bits: u32) -> u32 {
    (1 << bits) - 1
}

/// Returns the system identifier of an address.
#[inline]
#[must_use]
pub const fn system_id(address: u32) -> u32 {
    address & mask(SYSTEM_BITS)
}

/// Returns true if the address belongs to the strip tracker.
#[inline]
#[must_use]
pub const fn is_strip_address(address: u32) -> bool {
    system_id(address) == SYSTEM_ID
}

/// Reduces an address to module granularity (sensor and side cleared).
#[inline]
#[must_use]
pub const fn module_address(address: u32) -> u32 {
    address & MODULE_MASK
}

/// Builds a module address from its hierarchy indices.
///
/// Indices wider than their field are truncated.
#[must_use]
pub const fn build_module_address(unit: u32, ladder: u32, half_ladder: u32, module: u32) -> u32 {
    SYSTEM_ID
        | (unit & mask(UNIT_BITS)) << UNIT_SHIFT
        | (ladder & mask(LADDER_BITS)) << LADDER_SHIFT
        | (half_ladder & mask(HALF_LADDER_BITS)) << HALF_LADDER_SHIFT
        | (module & mask(MODULE_BITS)) << MODULE_SHIFT
}

/// Extends a module address down to sensor and side level.
#[must_use]
pub const fn with_sensor(module_address: u32, sensor: u32, side: u32) -> u32 {
    module_address
        | (sensor & mask(SENSOR_BITS)) << SENSOR_SHIFT
        | (side & mask(SIDE_BITS)) << SIDE_SHIFT
}

/// Returns the unit index of an address.
#[inline]
#[must_use]
pub const fn unit(address: u32) -> u32 {
    (address >> UNIT_SHIFT) & mask(UNIT_BITS)
}

/// Returns the module index within its half-ladder.
#[inline]
#[must_use]
pub const fn module_index(address: u32) -> u32 {
    (address >> MODULE_SHIFT) & mask(MODULE_BITS)
}
