//! Content-addressed resource handles.
//!
//! A [`ResourceHandle`] is the xxh3-128 digest of a descriptor's canonical
//! field sequence. Fields are fed to the hasher through their `Hash`
//! implementations in declaration order, enum discriminants included, so two
//! descriptors hash equal exactly when every field matches.
//!
//! The hash alone is never trusted: the builder keeps the full descriptor
//! next to its handle and compares on every lookup. When two different
//! descriptors land on the same digest the newcomer is re-hashed with the next
//! salt until a free or matching slot is found.

use std::fmt;
use std::hash::Hash;

use xxhash_rust::xxh3::Xxh3;

use super::descriptor::ResourceDescriptor;

/// Identifies one logical resource slot for the lifetime of a graph.
///
/// Swapchain-backed textures and framebuffers occupy a run of consecutive
/// handles, one per swapchain image; see [`ResourceHandle::offset`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceHandle(pub(crate) u128);

impl ResourceHandle {
    /// Compute the handle of a descriptor with the default salt.
    pub fn of(descriptor: &ResourceDescriptor) -> Self {
        Self::salted(descriptor, 0)
    }

    /// Compute the handle of a descriptor with an explicit salt.
    ///
    /// Salt `0` is the canonical handle; higher salts are only used to move a
    /// descriptor out of a collision.
    pub fn salted(descriptor: &ResourceDescriptor, salt: u64) -> Self {
        let mut hasher = Xxh3::with_seed(salt);
        descriptor.hash(&mut hasher);
        Self(hasher.digest128())
    }

    /// Handle of the `index`-th entry of a per-swapchain-image run.
    ///
    /// `offset(0)` is the handle itself.
    pub fn offset(self, index: u32) -> Self {
        Self(self.0.wrapping_add(index as u128))
    }

    /// Raw 128-bit value.
    pub fn raw(self) -> u128 {
        self.0
    }
}

impl fmt::Debug for ResourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ResourceHandle({:032x})", self.0)
    }
}

impl fmt::Display for ResourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // The low 48 bits are enough to tell handles apart in logs.
        write!(f, "#{:012x}", self.0 & 0xFFFF_FFFF_FFFF)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::descriptor::{SizeSpec, TextureDesc};
    use crate::types::TextureFormat;

    fn depth(name: &str) -> ResourceDescriptor {
        ResourceDescriptor::Texture(TextureDesc::depth_target(
            name,
            TextureFormat::Depth32Float,
            SizeSpec::Absolute {
                width: 2048,
                height: 2048,
            },
        ))
    }

    #[test]
    fn test_equal_descriptors_hash_equal() {
        assert_eq!(ResourceHandle::of(&depth("shadow")), ResourceHandle::of(&depth("shadow")));
    }

    #[test]
    fn test_any_field_changes_hash() {
        assert_ne!(ResourceHandle::of(&depth("shadow")), ResourceHandle::of(&depth("shadow2")));

        let mut other = depth("shadow");
        if let ResourceDescriptor::Texture(desc) = &mut other {
            desc.array_layers = 4;
        }
        assert_ne!(ResourceHandle::of(&depth("shadow")), ResourceHandle::of(&other));
    }

    #[test]
    fn test_salt_moves_handle() {
        let desc = depth("shadow");
        assert_ne!(ResourceHandle::salted(&desc, 0), ResourceHandle::salted(&desc, 1));
        assert_eq!(ResourceHandle::salted(&desc, 0), ResourceHandle::of(&desc));
    }

    #[test]
    fn test_offset() {
        let handle = ResourceHandle(10);
        assert_eq!(handle.offset(0), handle);
        assert_eq!(handle.offset(2), ResourceHandle(12));
        assert_eq!(ResourceHandle(u128::MAX).offset(1), ResourceHandle(0));
    }
}
