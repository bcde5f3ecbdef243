//! Publisher key normalization (C2): accept either 64 hex chars or a
//! `"npub1"`-prefixed 5-bit group-encoded string, producing canonical
//! lowercase 32-byte hex either way.
//!
//! The source this is grounded on treats the npub form as a bare
//! 5-bit-group encoding and never verifies its checksum, so this is a
//! hand-rolled regroup rather than a call into a general bech32
//! decoder (which would reject an unverified checksum outright).

use crate::error::Error;

const CHARSET: &str = "qpzry9x8gf2tvdw0s3jn54khce6mua7l";
const NPUB_PREFIX: &str = "npub1";
const CHECKSUM_LEN: usize = 6;

/// Normalize a publisher key string (hex or npub) to 32 raw bytes.
pub fn parse_pubkey(s: &str) -> Result<[u8; 32], Error> {
    if s.len() == 64 && s.bytes().all(|b| b.is_ascii_hexdigit()) {
        return decode_hex(s);
    }
    if let Some(body) = s.strip_prefix(NPUB_PREFIX) {
        return decode_npub_body(body);
    }
    Err(Error::BadKey(format!(
        "key is neither 64-char hex nor npub1-prefixed: {s}"
    )))
}

/// Canonical lowercase hex encoding of a 32-byte key.
pub fn to_hex(bytes: &[u8; 32]) -> String {
    hex::encode(bytes)
}

fn decode_hex(s: &str) -> Result<[u8; 32], Error> {
    let bytes = hex::decode(s).map_err(|e| Error::BadKey(format!("hex decode failed: {e}")))?;
    bytes
        .try_into()
        .map_err(|_| Error::BadKey("hex key did not decode to 32 bytes".to_string()))
}

fn decode_npub_body(body: &str) -> Result<[u8; 32], Error> {
    if body.len() <= CHECKSUM_LEN {
        return Err(Error::BadKey("npub body too short".to_string()));
    }
    let data_part = &body[..body.len() - CHECKSUM_LEN];

    let mut fivebit = Vec::with_capacity(data_part.len());
    for c in data_part.chars() {
        let v = CHARSET
            .find(c)
            .ok_or_else(|| Error::BadKey(format!("invalid npub character: {c}")))?;
        fivebit.push(v as u8);
    }

    let bytes = regroup_bits(&fivebit, 5, 8, false)
        .map_err(|e| Error::BadKey(format!("npub regroup failed: {e}")))?;

    bytes
        .try_into()
        .map_err(|v: Vec<u8>| Error::BadKey(format!("npub decoded to {} bytes, want 32", v.len())))
}

/// Encode 32 raw bytes as an `npub1...` string, including a real
/// bech32 checksum (decode above never checks it, but producing a
/// genuine one keeps round-trip vectors realistic).
pub fn encode_npub(bytes: &[u8; 32]) -> String {
    let fivebit = regroup_bits(bytes, 8, 5, true).expect("regroup of 32 bytes cannot fail");
    let checksum = bech32_checksum(&fivebit);

    let mut out = String::with_capacity(NPUB_PREFIX.len() + fivebit.len() + CHECKSUM_LEN);
    out.push_str(NPUB_PREFIX);
    for v in fivebit.iter().chain(checksum.iter()) {
        out.push(CHARSET.as_bytes()[*v as usize] as char);
    }
    out
}

/// Regroups a sequence of `from`-bit values into `to`-bit values,
/// MSB-first, as used on both sides of the npub conversion.
fn regroup_bits(data: &[u8], from: u32, to: u32, pad: bool) -> Result<Vec<u8>, &'static str> {
    let mut acc: u32 = 0;
    let mut bits: u32 = 0;
    let mut out = Vec::new();
    let maxv = (1u32 << to) - 1;

    for &value in data {
        if (value as u32) >> from != 0 {
            return Err("input value exceeds `from` bits");
        }
        acc = (acc << from) | value as u32;
        bits += from;
        while bits >= to {
            bits -= to;
            out.push(((acc >> bits) & maxv) as u8);
        }
    }

    if pad && bits > 0 {
        out.push(((acc << (to - bits)) & maxv) as u8);
    }
    // when not padding (decode direction), any leftover bits are
    // discarded rather than validated: the source never checks the
    // npub checksum, and this regroup is equally lenient about trailing
    // slack bits.

    Ok(out)
}

const BECH32_GEN: [u32; 5] = [0x3b6a57b2, 0x26508e6d, 0x1ea119fa, 0x3d4233dd, 0x2a1462b3];

fn bech32_polymod(values: &[u8]) -> u32 {
    let mut chk: u32 = 1;
    for &v in values {
        let top = chk >> 25;
        chk = (chk & 0x1ffffff) << 5 ^ (v as u32);
        for i in 0..5 {
            if (top >> i) & 1 != 0 {
                chk ^= BECH32_GEN[i];
            }
        }
    }
    chk
}

fn hrp_expand(hrp: &str) -> Vec<u8> {
    let mut out: Vec<u8> = hrp.bytes().map(|b| b >> 5).collect();
    out.push(0);
    out.extend(hrp.bytes().map(|b| b & 31));
    out
}

fn bech32_checksum(data: &[u8]) -> [u8; CHECKSUM_LEN] {
    let hrp = "npub";
    let mut values = hrp_expand(hrp);
    values.extend_from_slice(data);
    values.extend_from_slice(&[0u8; CHECKSUM_LEN]);
    let polymod = bech32_polymod(&values) ^ 1;
    let mut checksum = [0u8; CHECKSUM_LEN];
    for (i, slot) in checksum.iter_mut().enumerate() {
        *slot = ((polymod >> (5 * (5 - i))) & 31) as u8;
    }
    checksum
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEX_KEY: &str = "3bf0c63fcb93463407af97a5e5ee64fa883d107ef9e558472c4eb9aaaefa459";

    #[test]
    fn parses_hex_key() {
        let bytes = parse_pubkey(HEX_KEY).unwrap();
        assert_eq!(to_hex(&bytes), HEX_KEY);
    }

    #[test]
    fn rejects_short_hex() {
        assert!(parse_pubkey("deadbeef").is_err());
    }

    #[test]
    fn rejects_non_hex_non_npub() {
        assert!(parse_pubkey("not a key at all").is_err());
    }

    #[test]
    fn npub_round_trips_for_every_byte_pattern() {
        let patterns: [[u8; 32]; 3] = [[0u8; 32], [0xffu8; 32], {
            let mut b = [0u8; 32];
            for (i, slot) in b.iter_mut().enumerate() {
                *slot = i as u8;
            }
            b
        }];

        for bytes in patterns {
            let npub = encode_npub(&bytes);
            assert!(npub.starts_with(NPUB_PREFIX));
            let decoded = parse_pubkey(&npub).unwrap();
            assert_eq!(decoded, bytes);
        }
    }

    #[test]
    fn npub_decode_ignores_checksum_correctness() {
        let bytes = [7u8; 32];
        let mut npub = encode_npub(&bytes);
        // corrupt the checksum tail; decode must still succeed since
        // this source never verifies it
        npub.truncate(npub.len() - 1);
        npub.push(if npub.ends_with('q') { 'p' } else { 'q' });
        assert_eq!(parse_pubkey(&npub).unwrap(), bytes);
    }

    #[test]
    fn rejects_npub_with_wrong_byte_length() {
        // too few data characters after stripping checksum can't
        // regroup to exactly 32 bytes
        let bad = format!("{NPUB_PREFIX}{}", "q".repeat(10));
        assert!(parse_pubkey(&bad).is_err());
    }
}
