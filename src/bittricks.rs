/*!
alignment rounding.

todo: should this be a crate?
*/

/// Rounds `value` up to the next multiple of `alignment`.
///
/// `alignment` must be a power of two.
pub const fn align_up(value: u64, alignment: u64) -> u64 {
    debug_assert!(alignment.is_power_of_two());
    (value + alignment - 1) & !(alignment - 1)
}

pub const fn is_aligned(value: u64, alignment: u64) -> bool {
    value & (alignment - 1) == 0
}
