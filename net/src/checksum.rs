// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Internet checksum arithmetic (RFC 1071) and incremental updates
//! (RFC 1624).

/// One's-complement accumulator over byte slices.
///
/// Fold with [`Accumulator::finish`] once every contribution is added.
#[derive(Debug, Default, Clone, Copy)]
pub struct Accumulator(u64);

impl Accumulator {
    /// Fresh accumulator with a zero sum.
    #[must_use]
    pub fn new() -> Self {
        Self(0)
    }

    /// Add `data`, treating a trailing odd byte as the high octet of a
    /// zero-padded word.
    #[must_use]
    pub fn add_bytes(mut self, data: &[u8]) -> Self {
        let mut chunks = data.chunks_exact(2);
        for chunk in &mut chunks {
            self.0 += u64::from(u16::from_be_bytes([chunk[0], chunk[1]]));
        }
        if let [last] = chunks.remainder() {
            self.0 += u64::from(u16::from_be_bytes([*last, 0]));
        }
        self
    }

    /// Add a single big-endian word.
    #[must_use]
    pub fn add_u16(mut self, word: u16) -> Self {
        self.0 += u64::from(word);
        self
    }

    /// Add a 32-bit value as two words.
    #[must_use]
    pub fn add_u32(self, value: u32) -> Self {
        #[allow(clippy::cast_possible_truncation)] // truncation is intentional
        self.add_u16((value >> 16) as u16).add_u16(value as u16)
    }

    /// Fold to 16 bits and complement.
    #[must_use]
    pub fn finish(self) -> u16 {
        let mut sum = self.0;
        while sum > 0xffff {
            sum = (sum & 0xffff) + (sum >> 16);
        }
        #[allow(clippy::cast_possible_truncation)] // folded above
        !(sum as u16)
    }
}

/// Checksum of an IPv4 header, with the checksum field itself zeroed by the
/// caller or skipped here by position (bytes 10..12).
#[must_use]
pub fn ipv4_header_checksum(header: &[u8]) -> u16 {
    Accumulator::new()
        .add_bytes(&header[..10])
        .add_bytes(&header[12..])
        .finish()
}

/// Pseudo-header sum for an IPv4-carried transport segment.
#[must_use]
pub fn pseudo_header_v4(src: [u8; 4], dst: [u8; 4], protocol: u8, l4_len: u16) -> Accumulator {
    Accumulator::new()
        .add_bytes(&src)
        .add_bytes(&dst)
        .add_u16(u16::from(protocol))
        .add_u16(l4_len)
}

/// Pseudo-header sum for an IPv6-carried transport segment.
#[must_use]
pub fn pseudo_header_v6(src: [u8; 16], dst: [u8; 16], next_header: u8, l4_len: u32) -> Accumulator {
    Accumulator::new()
        .add_bytes(&src)
        .add_bytes(&dst)
        .add_u32(l4_len)
        .add_u16(u16::from(next_header))
}

/// Incremental checksum update for a changed 16-bit field, per RFC 1624.
//
// From RFC 1624:
//
//     HC  - old checksum in header
//     m   - old value of a 16-bit field
//     m'  - new value of a 16-bit field
//
//     HC' = HC - ~m - m'    --    [Eqn. 4]
//
// computed by subtracting complements with borrow.
#[must_use]
pub fn incremental_update(checksum: u16, old_value: u16, new_value: u16) -> u16 {
    // First subtraction: HC - ~m
    let (mut tmp, borrow) = checksum.overflowing_sub(!old_value);
    if borrow {
        tmp = tmp.wrapping_sub(1);
    }

    // Second subtraction: tmp - m'
    let (mut result, borrow) = tmp.overflowing_sub(new_value);
    if borrow {
        result = result.wrapping_sub(1);
    }

    result
}

/// Incremental update for a changed 32-bit field, word by word.
#[must_use]
pub fn incremental_update32(checksum: u16, old_value: u32, new_value: u32) -> u16 {
    #[allow(clippy::cast_possible_truncation)] // truncation is intentional
    let halves = [
        ((old_value >> 16) as u16, (new_value >> 16) as u16),
        (old_value as u16, new_value as u16),
    ];
    halves
        .iter()
        .fold(checksum, |cks, &(old, new)| incremental_update(cks, old, new))
}

/// Incremental update for a changed 128-bit field (IPv6 addresses).
#[must_use]
pub fn incremental_update128(checksum: u16, old_value: [u8; 16], new_value: [u8; 16]) -> u16 {
    old_value
        .chunks_exact(2)
        .zip(new_value.chunks_exact(2))
        .fold(checksum, |cks, (old, new)| {
            incremental_update(
                cks,
                u16::from_be_bytes([old[0], old[1]]),
                u16::from_be_bytes([new[0], new[1]]),
            )
        })
}

#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#[cfg(test)]
mod test {
    use super::*;

    // Reference header from RFC 1071 examples, checksum field zeroed.
    const IPV4_HEADER: [u8; 20] = [
        0x45, 0x00, 0x00, 0x73, 0x00, 0x00, 0x40, 0x00, 0x40, 0x11, 0x00, 0x00, 0xc0, 0xa8, 0x00,
        0x01, 0xc0, 0xa8, 0x00, 0xc7,
    ];

    #[test]
    fn known_ipv4_header_checksum() {
        assert_eq!(ipv4_header_checksum(&IPV4_HEADER), 0xb861);
    }

    #[test]
    fn verify_sums_to_zero() {
        let mut header = IPV4_HEADER;
        let cks = ipv4_header_checksum(&header);
        header[10..12].copy_from_slice(&cks.to_be_bytes());
        assert_eq!(Accumulator::new().add_bytes(&header).finish(), 0);
    }

    #[test]
    fn odd_length_pads_with_zero() {
        let odd = Accumulator::new().add_bytes(&[0xab, 0xcd, 0xef]).finish();
        let even = Accumulator::new()
            .add_bytes(&[0xab, 0xcd, 0xef, 0x00])
            .finish();
        assert_eq!(odd, even);
    }

    fn full_checksum(header: &[u8; 20]) -> u16 {
        ipv4_header_checksum(header)
    }

    #[test]
    fn incremental_matches_full_recompute() {
        bolero::check!()
            .with_type::<(u16, u32)>()
            .for_each(|&(new_len, new_dst)| {
                let mut header = IPV4_HEADER;
                let cks = full_checksum(&header);

                // 16-bit field: total length
                let old_len = u16::from_be_bytes([header[2], header[3]]);
                header[2..4].copy_from_slice(&new_len.to_be_bytes());
                let cks = incremental_update(cks, old_len, new_len);
                assert_eq!(cks, full_checksum(&header));

                // 32-bit field: destination address
                let old_dst = u32::from_be_bytes([header[16], header[17], header[18], header[19]]);
                header[16..20].copy_from_slice(&new_dst.to_be_bytes());
                let cks = incremental_update32(cks, old_dst, new_dst);
                assert_eq!(cks, full_checksum(&header));
            });
    }
}
