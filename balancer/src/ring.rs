// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Weighted consistent-hash ring.
//!
//! Each real claims `weight` slots at pseudo-random positions derived only
//! from `(real, replica)`, probing linearly past collisions. Because a
//! slot position never depends on the other reals, changing one real's
//! weight rewrites only that real's slots and sessions mapped onto other
//! reals keep their targets.

use crate::module::RealId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Claim {
    real: RealId,
    replica: u32,
}

/// The ring: a bounded array of real indices probed by `hash % capacity`.
#[derive(Debug, Clone)]
pub struct Ring {
    slots: Vec<Option<Claim>>,
}

// SplitMix64: stable, seedless slot placement for (real, replica).
fn mix(real: RealId, replica: u32) -> u64 {
    let mut z = ((u64::from(real) << 32) | u64::from(replica)).wrapping_add(0x9e37_79b9_7f4a_7c15);
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

impl Ring {
    /// An empty ring with room for `capacity` claims; capacity is rounded
    /// up to a power of two and must exceed the aggregate weight.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(8).next_power_of_two();
        Self {
            slots: vec![None; capacity],
        }
    }

    /// Build a ring sized for the given aggregate weight.
    #[must_use]
    pub fn build(weights: &[(RealId, u32)]) -> Self {
        let total: u32 = weights.iter().map(|(_, w)| *w).sum();
        // headroom keeps probe chains short as weights change
        #[allow(clippy::cast_possible_truncation)]
        let mut ring = Self::with_capacity((total as usize).saturating_mul(2));
        for &(real, weight) in weights {
            ring.set_weight(real, 0, weight);
        }
        ring
    }

    /// Ring capacity in slots.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Claimed slots.
    #[must_use]
    pub fn claimed(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    fn place(&mut self, claim: Claim) {
        let mask = self.slots.len() - 1;
        #[allow(clippy::cast_possible_truncation)]
        let mut idx = (mix(claim.real, claim.replica) as usize) & mask;
        for _ in 0..self.slots.len() {
            if self.slots[idx].is_none() {
                self.slots[idx] = Some(claim);
                return;
            }
            idx = (idx + 1) & mask;
        }
        // ring full: the claim is silently dropped; build() sizes with
        // 2x headroom so this only happens under pathological weights
    }

    /// Move a real from `old_weight` to `new_weight` claims, touching only
    /// that real's slots.
    pub fn set_weight(&mut self, real: RealId, old_weight: u32, new_weight: u32) {
        if new_weight < old_weight {
            for slot in &mut self.slots {
                if let Some(claim) = slot
                    && claim.real == real
                    && claim.replica >= new_weight
                {
                    *slot = None;
                }
            }
        } else {
            for replica in old_weight..new_weight {
                self.place(Claim { real, replica });
            }
        }
    }

    /// Pick the real whose claim a hash probes to, skipping reals the
    /// caller rejects (disabled ones). `None` when no acceptable claim
    /// exists.
    #[must_use]
    pub fn lookup(&self, hash: u64, accept: impl Fn(RealId) -> bool) -> Option<RealId> {
        let mask = self.slots.len() - 1;
        #[allow(clippy::cast_possible_truncation)]
        let start = (hash as usize) & mask;
        for step in 0..self.slots.len() {
            if let Some(claim) = self.slots[(start + step) & mask]
                && accept(claim.real)
            {
                return Some(claim.real);
            }
        }
        None
    }

    /// The slot assignment of one real, for continuity checks.
    #[must_use]
    pub fn slots_of(&self, real: RealId) -> Vec<usize> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(idx, slot)| match slot {
                Some(claim) if claim.real == real => Some(idx),
                _ => None,
            })
            .collect()
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn weights_shape_the_distribution() {
        let ring = Ring::build(&[(0, 30), (1, 10)]);
        assert_eq!(ring.claimed(), 40);

        let mut hits = [0u32; 2];
        for hash in 0..10_000u64 {
            let real = ring
                .lookup(hash.wrapping_mul(0x2545_f491_4f6c_dd1d), |_| true)
                .unwrap();
            hits[usize::try_from(real).unwrap()] += 1;
        }
        // 3:1 weights land roughly 3:1; generous tolerance, placement is
        // hash-driven
        assert!(hits[0] > hits[1] * 2, "{hits:?}");
    }

    #[test]
    fn weight_change_preserves_other_reals_slots() {
        let mut ring = Ring::build(&[(0, 8), (1, 8), (2, 8)]);
        let before_0 = ring.slots_of(0);
        let before_2 = ring.slots_of(2);

        ring.set_weight(1, 8, 0);

        assert_eq!(ring.slots_of(0), before_0);
        assert_eq!(ring.slots_of(2), before_2);
        assert!(ring.slots_of(1).is_empty());
    }

    #[test]
    fn lookup_skips_rejected_reals() {
        let ring = Ring::build(&[(0, 4), (1, 4)]);
        for hash in 0..256u64 {
            assert_eq!(ring.lookup(hash, |r| r == 1), Some(1));
        }
        assert_eq!(ring.lookup(7, |_| false), None);
    }

    #[test]
    fn same_hash_same_real() {
        let ring = Ring::build(&[(0, 16), (1, 16)]);
        let hash = 0xdead_beef_cafe_f00d;
        let first = ring.lookup(hash, |_| true);
        for _ in 0..10 {
            assert_eq!(ring.lookup(hash, |_| true), first);
        }
    }

    #[test]
    fn grow_weight_only_adds_new_replicas() {
        let mut ring = Ring::build(&[(0, 4), (1, 4)]);
        let before = ring.slots_of(0);
        ring.set_weight(1, 4, 8);
        // real 0 untouched by real 1 growth
        assert_eq!(ring.slots_of(0), before);
        assert_eq!(ring.slots_of(1).len(), 8);
    }
}
