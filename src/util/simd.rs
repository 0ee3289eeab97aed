//! Thin layer over `wide` for the 16-ray packets.
//! A packet is 4 groups of `f32x4`, masks live either in lanes (all bits set / all clear)
//! or as one bit per ray in a `u16`.

use wide::{f32x4, i32x4};

pub const SIMD_WIDTH: usize = 4;
pub const PACKET_SIZE: usize = 16;
pub const PACKET_GROUPS: usize = PACKET_SIZE / SIMD_WIDTH;

/// One value per ray of a packet.
pub type Lanes = [f32x4; PACKET_GROUPS];
/// Integer payload per ray of a packet.
pub type IntLanes = [i32x4; PACKET_GROUPS];
/// One bit per ray of a packet, bit `i` is ray `i`.
pub type PacketMask = u16;

pub const FULL_PACKET_MASK: PacketMask = PacketMask::MAX;

const GROUP_BITS: u32 = (1 << SIMD_WIDTH) - 1;

/// Lane mask with lane `i` set iff bit `i` of `bits` is set.
#[inline(always)]
pub fn lane_mask(bits: u32) -> f32x4 {
    let set = f32::from_bits(u32::MAX);
    f32x4::from(std::array::from_fn::<f32, SIMD_WIDTH, _>(|i| {
        if (bits >> i) & 1 != 0 { set } else { 0.0 }
    }))
}

/// Sign bits of the lanes as an integer, lane `i` is bit `i`.
#[inline(always)]
pub fn move_mask(mask: f32x4) -> u32 {
    mask.move_mask() as u32 & GROUP_BITS
}

/// Splits a packet mask into lane masks for each SIMD group.
#[inline(always)]
pub fn packet_mask_to_lanes(mask: PacketMask) -> Lanes {
    std::array::from_fn(|group| lane_mask((mask as u32 >> (group * SIMD_WIDTH)) & GROUP_BITS))
}

/// Collapses lane masks of all groups into a packet mask.
#[inline(always)]
pub fn lanes_to_packet_mask(lanes: &Lanes) -> PacketMask {
    lanes
        .iter()
        .enumerate()
        .fold(0, |acc, (group, mask)| {
            acc | (move_mask(*mask) << (group * SIMD_WIDTH))
        }) as PacketMask
}

/// Per-lane select for integer payloads driven by a float comparison mask.
#[inline(always)]
pub fn select_int(mask: f32x4, t: i32x4, f: i32x4) -> i32x4 {
    bytemuck::cast::<f32x4, i32x4>(mask).blend(t, f)
}

/// Reads a single value of a packet.
#[inline(always)]
pub fn lane(lanes: &Lanes, ray: usize) -> f32 {
    lanes[ray / SIMD_WIDTH].as_array_ref()[ray % SIMD_WIDTH]
}

#[inline(always)]
pub fn int_lane(lanes: &IntLanes, ray: usize) -> i32 {
    lanes[ray / SIMD_WIDTH].as_array_ref()[ray % SIMD_WIDTH]
}

/// Writes a single value of a packet.
#[inline(always)]
pub fn set_lane(lanes: &mut Lanes, ray: usize, value: f32) {
    lanes[ray / SIMD_WIDTH].as_array_mut()[ray % SIMD_WIDTH] = value;
}

pub fn splat_lanes(value: f32) -> Lanes {
    [f32x4::splat(value); PACKET_GROUPS]
}
