//! Turn a signature match into a module data address.
//!
//! Operands are read with bounds checks so a match too close to the end of `data` for its
//! operand resolves to nothing rather than panicking.

use crate::scanner::{self, Pattern};

fn read<const N: usize>(data: &[u8], address: usize) -> Option<[u8; N]> {
    data.get(address..address.checked_add(N)?)?.try_into().ok()
}

fn i32_le(data: &[u8], address: usize) -> Option<i32> {
    read(data, address).map(i32::from_le_bytes)
}

fn u32_le(data: &[u8], address: usize) -> Option<u32> {
    read(data, address).map(u32::from_le_bytes)
}

fn u16_be(data: &[u8], address: usize) -> Option<u16> {
    read(data, address).map(u16::from_be_bytes)
}

/// Resolve a RIP relative displacement at `m + disp_offset`. The displacement is relative to
/// the instruction following the match at `m + next_insn_offset`, and `section_base` turns
/// the section offset into a virtual address.
pub fn resolve_rip_relative(
    data: &[u8],
    m: usize,
    disp_offset: usize,
    next_insn_offset: usize,
    section_base: u64,
) -> Option<u64> {
    let disp = i32_le(data, m + disp_offset)?;
    let next_insn = (m + next_insn_offset) as u64;
    let address = next_insn
        .wrapping_add(section_base)
        .wrapping_add_signed(disp.into());
    tracing::trace!(m, disp, "rip relative address {address:#x}");
    Some(address)
}

/// Read the absolute address at `m + ptr_offset`, once for every `loop_pattern` match
/// starting less than `loop_max_distance` bytes after `m`.
///
/// The address is returned as stored; no section base is applied.
pub fn resolve_absolute_with_loop(
    data: &[u8],
    m: usize,
    ptr_offset: usize,
    loop_pattern: &Pattern,
    loop_max_distance: usize,
) -> Vec<u64> {
    let rest = data.get(m..).unwrap_or_default();
    // only loop matches starting before the bound are of interest
    let window = loop_max_distance
        .saturating_add(loop_pattern.len() - 1)
        .min(rest.len());

    scanner::scan(&rest[..window], loop_pattern, |distance| {
        if distance < loop_max_distance {
            u32_le(data, m + ptr_offset).map(u64::from)
        } else {
            tracing::trace!(m, distance, "loop too far from module data load");
            None
        }
    })
}

/// Rebuild a 32-bit constant split into a `lis` high half at `m + hi_offset` and a signed
/// `addi` low half at `m + lo_offset`, both big endian.
///
/// The address is returned as stored; no section base is applied.
pub fn resolve_split_immediate(
    data: &[u8],
    m: usize,
    hi_offset: usize,
    lo_offset: usize,
) -> Option<u64> {
    let hi = i64::from(u16_be(data, m + hi_offset)?);
    // addi sign extends its immediate
    let lo = i64::from(u16_be(data, m + lo_offset)? as i16);
    Some(((hi << 16) + lo) as u64)
}
