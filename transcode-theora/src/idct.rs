//! Bit-exact VP3 integer inverse DCT.
//!
//! Input coefficients are quantized values in zig-zag order; they are
//! dequantized on the way in. Output is the natural-order residual block.
//!
//! Four entry points are selected by the block's end-of-block position.
//! The pruned variants only read the coefficients their region can hold and
//! skip butterfly terms that are known to be zero, so they agree exactly with
//! [`idct_slow`] on any input that fits their region. Every variant routes a
//! block without AC energy through [`idct1`].

use crate::quant::DequantTable;
use crate::ZIGZAG;

const C1S7: i32 = 64277;
const C2S6: i32 = 60547;
const C3S5: i32 = 54491;
const C4S4: i32 = 46341;
const C5S3: i32 = 36410;
const C6S2: i32 = 25080;
const C7S1: i32 = 12785;

/// 16.16 fixed-point multiply, wrapping like the 32-bit reference.
#[inline(always)]
fn mul(c: i32, x: i32) -> i32 {
    c.wrapping_mul(x) >> 16
}

/// Truncate to 16 bits, as the reference does on intermediate sums.
#[inline(always)]
fn s16(x: i32) -> i32 {
    x as i16 as i32
}

#[inline(always)]
fn finish(a: i32, b: i32, c: i32, d: i32, e: i32, f: i32, g: i32, h: i32) -> [i32; 8] {
    let ad = mul(C4S4, s16(a - c));
    let bd = mul(C4S4, s16(b - d));
    let cd = a + c;
    let dd = b + d;

    let ed = e - g;
    let gd = e + g;
    let add = f + ad;
    let bdd = bd - h;
    let fd = f - ad;
    let hd = bd + h;

    [
        gd + cd,
        add + hd,
        add - hd,
        ed + dd,
        ed - dd,
        fd + bdd,
        fd - bdd,
        gd - cd,
    ]
}

/// Full 8-point butterfly.
#[inline(always)]
fn kernel8(ip: &[i32; 8]) -> [i32; 8] {
    let a = mul(C1S7, ip[1]) + mul(C7S1, ip[7]);
    let b = mul(C7S1, ip[1]) - mul(C1S7, ip[7]);
    let c = mul(C3S5, ip[3]) + mul(C5S3, ip[5]);
    let d = mul(C3S5, ip[5]) - mul(C5S3, ip[3]);
    let e = mul(C4S4, s16(ip[0] + ip[4]));
    let f = mul(C4S4, s16(ip[0] - ip[4]));
    let g = mul(C2S6, ip[2]) + mul(C6S2, ip[6]);
    let h = mul(C6S2, ip[2]) - mul(C2S6, ip[6]);
    finish(a, b, c, d, e, f, g, h)
}

/// Butterfly with inputs 4..8 known to be zero.
#[inline(always)]
fn kernel4(ip: &[i32; 8]) -> [i32; 8] {
    let a = mul(C1S7, ip[1]);
    let b = mul(C7S1, ip[1]);
    let c = mul(C3S5, ip[3]);
    let d = -mul(C5S3, ip[3]);
    let e = mul(C4S4, s16(ip[0]));
    let g = mul(C2S6, ip[2]);
    let h = mul(C6S2, ip[2]);
    finish(a, b, c, d, e, e, g, h)
}

/// Butterfly with inputs 2..8 known to be zero.
#[inline(always)]
fn kernel2(ip: &[i32; 8]) -> [i32; 8] {
    let a = mul(C1S7, ip[1]);
    let b = mul(C7S1, ip[1]);
    let e = mul(C4S4, s16(ip[0]));
    finish(a, b, 0, 0, e, e, 0, 0)
}

/// Dequantize the first `limit` zig-zag coefficients into natural order.
fn dequantize(coeffs: &[i16; 64], dq: &DequantTable, limit: usize) -> [i32; 64] {
    let mut out = [0i32; 64];
    for zz in 0..limit {
        out[ZIGZAG[zz]] = coeffs[zz] as i32 * dq.coeffs[zz] as i32;
    }
    out
}

/// Two-pass transform over the top-left `rows` x `rows` region.
fn transform(data: &[i32; 64], rows: usize, kernel: fn(&[i32; 8]) -> [i32; 8]) -> [i16; 64] {
    let mut tmp = [0i32; 64];
    for r in 0..rows {
        let row = &data[r * 8..r * 8 + 8];
        if row.iter().all(|&v| v == 0) {
            continue;
        }
        let mut ip = [0i32; 8];
        ip.copy_from_slice(row);
        let op = kernel(&ip);
        for c in 0..8 {
            tmp[r * 8 + c] = s16(op[c]);
        }
    }

    let mut out = [0i16; 64];
    for c in 0..8 {
        let mut ip = [0i32; 8];
        for r in 0..rows {
            ip[r] = tmp[r * 8 + c];
        }
        if ip.iter().all(|&v| v == 0) {
            continue;
        }
        let op = kernel(&ip);
        for r in 0..8 {
            out[r * 8 + c] = ((op[r] + 8) >> 4) as i16;
        }
    }
    out
}

#[inline]
fn ac_is_zero(coeffs: &[i16; 64], limit: usize) -> bool {
    coeffs[1..limit].iter().all(|&c| c == 0)
}

/// DC-only transform: every sample is `(dc * dq + 15) >> 5`.
pub fn idct1(coeffs: &[i16; 64], dq: &DequantTable) -> [i16; 64] {
    let v = (coeffs[0] as i32 * dq.dc() as i32 + 15) >> 5;
    [v as i16; 64]
}

/// Transform for blocks whose nonzero coefficients lie in zig-zag 0..3.
pub fn idct3(coeffs: &[i16; 64], dq: &DequantTable) -> [i16; 64] {
    if ac_is_zero(coeffs, 3) {
        return idct1(coeffs, dq);
    }
    transform(&dequantize(coeffs, dq, 3), 2, kernel2)
}

/// Transform for blocks whose nonzero coefficients lie in zig-zag 0..10.
pub fn idct10(coeffs: &[i16; 64], dq: &DequantTable) -> [i16; 64] {
    if ac_is_zero(coeffs, 10) {
        return idct1(coeffs, dq);
    }
    transform(&dequantize(coeffs, dq, 10), 4, kernel4)
}

/// Full transform.
pub fn idct_slow(coeffs: &[i16; 64], dq: &DequantTable) -> [i16; 64] {
    if ac_is_zero(coeffs, 64) {
        return idct1(coeffs, dq);
    }
    transform(&dequantize(coeffs, dq, 64), 8, kernel8)
}

/// Pick the cheapest exact variant for an end-of-block position.
pub fn idct(eob: usize, coeffs: &[i16; 64], dq: &DequantTable) -> [i16; 64] {
    match eob {
        0 | 1 => idct1(coeffs, dq),
        2 | 3 => idct3(coeffs, dq),
        4..=10 => idct10(coeffs, dq),
        _ => idct_slow(coeffs, dq),
    }
}

/// Position one past the last nonzero zig-zag coefficient.
pub fn end_of_block(coeffs: &[i16; 64]) -> usize {
    coeffs.iter().rposition(|&c| c != 0).map_or(0, |i| i + 1)
}
