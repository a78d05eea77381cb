//! Core type aliases, id newtypes and re-exports

use std::fmt;

use serde::{Deserialize, Serialize};

pub use glam::{Mat4, Quat, Vec3};

/// Standard Result type for the crate
pub type Result<T> = std::result::Result<T, crate::core::error::Error>;

/// Identifier of a scene graph node. `0` is reserved as "unassigned".
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u64);

impl NodeId {
    pub const INVALID: NodeId = NodeId(0);

    pub fn is_valid(self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node#{}", self.0)
    }
}

/// Hierarchies are keyed by their root node.
pub type HierarchyId = NodeId;

/// Identifier of a connected remote client. `0` means "nobody".
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClientId(pub u64);

impl ClientId {
    pub const NONE: ClientId = ClientId(0);

    pub fn is_some(self) -> bool {
        self.0 != 0
    }

    pub fn is_none(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client#{}", self.0)
    }
}

/// Stable id under which a node is known to a remote client.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceId(pub u64);

impl ResourceId {
    pub fn is_valid(self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "res#{}", self.0)
    }
}

/// Scene layer used by admission policies and spatial layer masks.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LayerId(pub u32);

impl LayerId {
    pub const DEFAULT: LayerId = LayerId(0);
    pub const INTERACTABLE: LayerId = LayerId(1);
    pub const AVATAR: LayerId = LayerId(2);
    pub const UI: LayerId = LayerId(5);

    /// Bit of this layer inside a 32-bit layer mask.
    pub fn mask_bit(self) -> u32 {
        1u32 << (self.0 & 31)
    }

    pub fn in_mask(self, mask: u32) -> bool {
        mask & self.mask_bit() != 0
    }
}

/// Mask that admits every layer.
pub const ALL_LAYERS: u32 = u32::MAX;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_ids_are_invalid() {
        assert!(!NodeId(0).is_valid());
        assert!(NodeId(3).is_valid());
        assert!(ClientId::NONE.is_none());
        assert!(ClientId(9).is_some());
        assert!(!ResourceId::default().is_valid());
    }

    #[test]
    fn test_layer_mask() {
        let mask = LayerId::DEFAULT.mask_bit() | LayerId::AVATAR.mask_bit();
        assert!(LayerId::DEFAULT.in_mask(mask));
        assert!(LayerId::AVATAR.in_mask(mask));
        assert!(!LayerId::INTERACTABLE.in_mask(mask));
        assert!(LayerId::UI.in_mask(ALL_LAYERS));
    }
}
