//! A classic Bloom filter over serialized keys, sized from a target false-positive rate (§4.3).

use super::FilterPolicy;


/// 32-bit mix function (the same constant-multiply-and-rotate hash LSM engines conventionally
/// use for Bloom filters): cheap, well-distributed, and not cryptographically motivated.
#[must_use]
fn hash32(data: &[u8], seed: u32) -> u32 {
    const M: u32 = 0xc6a4_a793;
    const R: u32 = 24;

    let mut h = seed ^ (data.len() as u32).wrapping_mul(M);
    let mut chunks = data.chunks_exact(4);
    for chunk in &mut chunks {
        #[expect(clippy::unwrap_used, reason = "chunk has exactly 4 bytes")]
        let w = u32::from_le_bytes(chunk.try_into().unwrap());
        h = h.wrapping_add(w);
        h = h.wrapping_mul(M);
        h ^= h >> 16;
    }
    let remainder = chunks.remainder();
    let mut last = 0_u32;
    for (i, &byte) in remainder.iter().enumerate() {
        last |= u32::from(byte) << (8 * i);
    }
    if !remainder.is_empty() {
        h = h.wrapping_add(last);
        h = h.wrapping_mul(M);
        h ^= h >> R;
    }
    h
}

/// A Bloom filter policy parameterized by bits-per-key, derived from a target false-positive
/// rate per `-ln(p) / ln(2)^2` (§4.3, "bloom-filter params" in the cell-store trailer).
#[derive(Debug, Clone, Copy)]
pub struct BloomPolicy {
    bits_per_key: u32,
}

impl BloomPolicy {
    /// Builds a policy sized to approximately achieve `false_positive_rate` (clamped to
    /// `(0, 1)`) once the filter is full.
    #[must_use]
    pub fn from_false_positive_rate(false_positive_rate: f64) -> Self {
        let p = false_positive_rate.clamp(1e-6, 0.5);
        let bits_per_key = (-(p.ln()) / (std::f64::consts::LN_2 * std::f64::consts::LN_2)).ceil();
        #[expect(clippy::as_conversions, clippy::cast_possible_truncation, reason = "bounded above")]
        Self { bits_per_key: (bits_per_key as u32).clamp(2, 30) }
    }

    #[must_use]
    fn num_probes(&self) -> u32 {
        // ln(2) * bits_per_key, clamped to a sane range.
        (f64::from(self.bits_per_key) * std::f64::consts::LN_2).round().clamp(1.0, 30.0) as u32
    }
}

impl FilterPolicy for BloomPolicy {
    fn name(&self) -> &'static str {
        "tablet.BloomFilter"
    }

    fn create_filter(&self, keys: &[u8], key_offsets: &[usize]) -> Vec<u8> {
        let num_keys = key_offsets.len();
        if num_keys == 0 {
            return vec![0]; // A zero-probe-count filter matches nothing.
        }
        let num_probes = self.num_probes();
        let num_bits = (num_keys * self.bits_per_key as usize).max(64);
        let num_bytes = num_bits.div_ceil(8);
        let num_bits = num_bytes * 8;

        let mut filter = vec![0_u8; num_bytes + 1];
        #[expect(clippy::as_conversions, clippy::cast_possible_truncation, reason = "probes <= 30")]
        { filter[num_bytes] = num_probes as u8; }

        for window in 0..num_keys {
            let start = key_offsets[window];
            let end = key_offsets.get(window + 1).copied().unwrap_or(keys.len());
            #[expect(clippy::indexing_slicing, reason = "offsets derived from keys.len()")]
            let key = &keys[start..end];

            let mut h = hash32(key, 0xbc9f_1d34);
            let delta = h.rotate_left(15);
            for _ in 0..num_probes {
                let bit_pos = (h as usize) % num_bits;
                #[expect(clippy::indexing_slicing, reason = "bit_pos / 8 < num_bytes by construction")]
                { filter[bit_pos / 8] |= 1 << (bit_pos % 8); }
                h = h.wrapping_add(delta);
            }
        }
        filter
    }

    fn key_may_match(&self, key: &[u8], filter: &[u8]) -> bool {
        let Some((&num_probes, bits)) = filter.split_last() else { return true };
        if bits.is_empty() {
            return false;
        }
        let num_bits = bits.len() * 8;
        let mut h = hash32(key, 0xbc9f_1d34);
        let delta = h.rotate_left(15);
        for _ in 0..num_probes {
            let bit_pos = (h as usize) % num_bits;
            #[expect(clippy::indexing_slicing, reason = "bit_pos / 8 < bits.len() by construction")]
            if bits[bit_pos / 8] & (1 << (bit_pos % 8)) == 0 {
                return false;
            }
            h = h.wrapping_add(delta);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn present_keys_always_match() {
        let policy = BloomPolicy::from_false_positive_rate(0.01);
        let keys: Vec<&[u8]> = vec![b"alpha", b"beta", b"gamma", b"delta"];
        let mut packed = Vec::new();
        let mut offsets = Vec::new();
        for key in &keys {
            offsets.push(packed.len());
            packed.extend_from_slice(key);
        }
        let filter = policy.create_filter(&packed, &offsets);
        for key in &keys {
            assert!(policy.key_may_match(key, &filter));
        }
    }

    #[test]
    fn false_positive_rate_is_roughly_bounded() {
        let policy = BloomPolicy::from_false_positive_rate(0.01);
        let mut packed = Vec::new();
        let mut offsets = Vec::new();
        for i in 0..1000_u32 {
            offsets.push(packed.len());
            packed.extend_from_slice(&i.to_le_bytes());
        }
        let filter = policy.create_filter(&packed, &offsets);

        let mut false_positives = 0;
        for i in 1_000_000..1_001_000_u32 {
            if policy.key_may_match(&i.to_le_bytes(), &filter) {
                false_positives += 1;
            }
        }
        assert!(false_positives < 100, "false positive rate far exceeds target: {false_positives}/1000");
    }
}
