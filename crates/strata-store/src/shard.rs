use strata_types::BlobId;

use crate::error::{StoreError, StoreResult};

/// Fixed substitution table used to disperse blob ids over shards.
///
/// A permutation of `0..=255`. Changing it moves every existing blob.
const SUBSTITUTION: [u8; 256] = [
    0x77, 0xd3, 0x2d, 0x08, 0xb1, 0xfe, 0x52, 0x4c, 0x2e, 0x98, 0x69, 0x8d, 0x9f, 0xbd, 0xb4, 0x80,
    0xb0, 0x76, 0xf5, 0x4e, 0x00, 0x11, 0xeb, 0x83, 0xca, 0x2f, 0xec, 0x9c, 0xd7, 0x7d, 0x6a, 0xa6,
    0x53, 0x12, 0xf7, 0x36, 0x26, 0x45, 0x46, 0x5c, 0xc0, 0x61, 0x82, 0xb9, 0x5d, 0x0b, 0xc9, 0x19,
    0xfa, 0x88, 0x1d, 0xa1, 0x17, 0x09, 0x15, 0xa9, 0xe1, 0x7e, 0xb3, 0x07, 0x67, 0x8b, 0x3d, 0xb7,
    0x7f, 0x6e, 0x13, 0x05, 0x27, 0x1e, 0x78, 0x5b, 0xdf, 0x16, 0xf6, 0x04, 0x28, 0x6c, 0x03, 0xe4,
    0xd4, 0x85, 0xe2, 0xd5, 0x30, 0x2c, 0x62, 0x14, 0x20, 0x8e, 0x7c, 0x4d, 0x8c, 0x6d, 0x59, 0xf2,
    0xa7, 0x37, 0xc6, 0x54, 0x3a, 0xe3, 0x89, 0xbc, 0x8f, 0x2a, 0x71, 0x2b, 0xae, 0xba, 0xed, 0x66,
    0x23, 0x49, 0x8a, 0xe8, 0x79, 0x96, 0x01, 0x10, 0xcf, 0x41, 0x60, 0xb5, 0xf9, 0x1f, 0xd6, 0x90,
    0x4b, 0x4a, 0x87, 0xac, 0xe9, 0x97, 0x22, 0x5e, 0x57, 0x44, 0x25, 0xaf, 0xc2, 0xcd, 0xf8, 0xd9,
    0x18, 0x9b, 0xa8, 0x70, 0x86, 0x92, 0x29, 0x06, 0xdb, 0x84, 0xfb, 0x34, 0x7a, 0xf4, 0x33, 0x0f,
    0x73, 0xc5, 0xb8, 0xc4, 0xde, 0x50, 0xdc, 0xea, 0xf0, 0xe5, 0x3f, 0x56, 0x91, 0x1a, 0xff, 0xb6,
    0x75, 0x93, 0x43, 0xd2, 0x02, 0x72, 0x35, 0x81, 0x21, 0xee, 0xb2, 0x3b, 0x6f, 0x0a, 0x1b, 0x64,
    0xab, 0x3c, 0xad, 0xf1, 0xd8, 0x5a, 0x51, 0x63, 0x1c, 0x31, 0x0d, 0xaa, 0xc7, 0x9a, 0xbe, 0xa0,
    0x40, 0x5f, 0x0c, 0x3e, 0xa5, 0xcc, 0xf3, 0x24, 0x47, 0xc1, 0x42, 0xbf, 0xcb, 0xe7, 0xef, 0x0e,
    0xd0, 0x39, 0x55, 0x9e, 0x74, 0xe6, 0x65, 0x99, 0xa3, 0xa2, 0x94, 0xfc, 0xbb, 0xe0, 0x38, 0x58,
    0xce, 0xc3, 0xc8, 0xfd, 0x4f, 0x7b, 0xa4, 0x6b, 0xd1, 0xdd, 0x95, 0x32, 0x68, 0x9d, 0xda, 0x48,
];

/// Maps blob ids onto `N` shard directories, `N` a power of two in `1..=256`.
///
/// The shard is an XOR-fold of every id byte through [`SUBSTITUTION`],
/// masked to `N - 1`. Uniform, not cryptographic.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ShardMap {
    mask: u8,
}

impl ShardMap {
    /// Create a shard map for `limit` shards.
    pub fn new(limit: usize) -> StoreResult<Self> {
        if limit == 0 || limit > 256 || !limit.is_power_of_two() {
            return Err(StoreError::InvalidShardLimit(limit));
        }
        Ok(Self {
            mask: (limit - 1) as u8,
        })
    }

    /// Number of shards.
    pub fn limit(&self) -> usize {
        self.mask as usize + 1
    }

    /// The shard index of `id`, in `0..limit`.
    pub fn shard_for(&self, id: &BlobId) -> u8 {
        let mut hash: u8 = 0;
        for &byte in id.as_bytes() {
            // Table index is the byte read as signed, shifted up by 128.
            hash ^= SUBSTITUTION[(byte ^ 0x80) as usize];
        }
        // Masking happens on the sign-extended hash. With all 256 shards in
        // use the sign survives the mask, and the +128 bias maps it back so
        // that `00` stays the lowest directory name.
        let mask = self.mask as i8 as i32;
        let folded = (hash as i8 as i32) & mask;
        (folded + (128 & mask)) as u8
    }

    /// Two-hex-digit directory name of `id`'s shard.
    pub fn dir_name(&self, id: &BlobId) -> String {
        format!("{:02x}", self.shard_for(id))
    }

    /// Returns `true` if `name` is a directory name this map can produce.
    pub fn is_shard_name(&self, name: &str) -> bool {
        name.len() == 2
            && u8::from_str_radix(name, 16)
                .map(|v| (v as usize) < self.limit())
                .unwrap_or(false)
    }
}
