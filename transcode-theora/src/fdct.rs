//! VP3 integer forward DCT.
//!
//! Produces coefficients on the same scale the inverse transform expects:
//! a flat block of value `v` yields a DC of roughly `32 * v`.

const C1S7: i32 = 64277;
const C2S6: i32 = 60547;
const C3S5: i32 = 54491;
const C4S4: i32 = 46341;
const C5S3: i32 = 36410;
const C6S2: i32 = 25080;
const C7S1: i32 = 12785;

/// Fixed-point multiply rounding toward zero.
#[inline(always)]
fn mul(c: i32, x: i32) -> i32 {
    let p = c.wrapping_mul(x);
    (p + ((p >> 31) & 0xffff)) >> 16
}

#[inline(always)]
fn fdct_1d(ip: &[i32; 8]) -> [i32; 8] {
    let is07 = ip[0] + ip[7];
    let is12 = ip[1] + ip[2];
    let is34 = ip[3] + ip[4];
    let is56 = ip[5] + ip[6];

    let id07 = ip[0] - ip[7];
    let id12 = ip[1] - ip[2];
    let id34 = ip[3] - ip[4];
    let id56 = ip[5] - ip[6];

    let is0734 = is07 + is34;
    let is1256 = is12 + is56;

    let common1 = mul(C4S4, is12 - is56);
    let common2 = mul(C4S4, id12 + id56);

    let mut op = [0i32; 8];
    op[0] = mul(C4S4, is0734 + is1256);
    op[4] = mul(C4S4, is0734 - is1256);

    let x = id12 - id56;
    let y = is07 - is34;
    op[2] = mul(C6S2, x) + mul(C2S6, y);
    op[6] = mul(C6S2, y) - mul(C2S6, x);

    let x = common1 + id07;
    let y = -(id34 + common2);
    op[1] = mul(C1S7, x) - mul(C7S1, y);
    op[7] = mul(C7S1, x) + mul(C1S7, y);

    let x = id07 - common1;
    let y = id34 - common2;
    op[3] = mul(C3S5, x) - mul(C5S3, y);
    op[5] = mul(C5S3, x) + mul(C3S5, y);

    op
}

/// Forward transform of a natural-order residual block.
pub fn fdct(input: &[i16; 64]) -> [i16; 64] {
    let mut tmp = [0i32; 64];
    for r in 0..8 {
        let mut ip = [0i32; 8];
        for c in 0..8 {
            ip[c] = input[r * 8 + c] as i32;
        }
        tmp[r * 8..r * 8 + 8].copy_from_slice(&fdct_1d(&ip));
    }

    let mut out = [0i16; 64];
    for c in 0..8 {
        let mut ip = [0i32; 8];
        for r in 0..8 {
            ip[r] = tmp[r * 8 + c];
        }
        let op = fdct_1d(&ip);
        for r in 0..8 {
            out[r * 8 + c] = op[r] as i16;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::idct::idct_slow;
    use crate::quant::DequantTable;
    use crate::ZIGZAG;

    #[test]
    fn test_flat_block() {
        let out = fdct(&[10; 64]);
        assert_eq!(out[0], 316);
        assert!(out[1..].iter().all(|&c| c == 0));
    }

    #[test]
    fn test_zero_block() {
        assert_eq!(fdct(&[0; 64]), [0; 64]);
    }

    #[test]
    fn test_negative_rounding_is_symmetric() {
        let pos = fdct(&[10; 64]);
        let neg = fdct(&[-10; 64]);
        assert_eq!(neg[0], -pos[0]);
    }

    #[test]
    fn test_inverse_roundtrip() {
        let unit = DequantTable { coeffs: [1; 64] };
        let mut seed = 7u32;
        for _ in 0..50 {
            let mut block = [0i16; 64];
            for v in block.iter_mut() {
                seed = seed.wrapping_mul(1664525).wrapping_add(1013904223);
                *v = ((seed >> 24) % 128) as i16 - 64;
            }
            let coeffs = fdct(&block);
            let mut zz = [0i16; 64];
            for i in 0..64 {
                zz[i] = coeffs[ZIGZAG[i]];
            }
            let back = idct_slow(&zz, &unit);
            for i in 0..64 {
                assert!(
                    (back[i] - block[i]).abs() <= 3,
                    "sample {}: {} vs {}",
                    i,
                    back[i],
                    block[i]
                );
            }
        }
    }
}
