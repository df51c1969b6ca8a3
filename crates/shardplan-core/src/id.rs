//! Strongly-typed identifiers used across the compiler.
//!
//! Downstream crates should *not* use raw integers for node handles or wire ids.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! new_id {
    ($name:ident) => {
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Ord, PartialOrd,
        )]
        #[serde(transparent)]
        pub struct $name(u64);

        impl $name {
            pub const fn new(v: u64) -> Self {
                Self(v)
            }
            pub const fn get(self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }
    };
}

// Handle into a `PlanArena`. Stable for the lifetime of the arena; two
// structurally equal operators always have distinct handles.
new_id!(NodeId);

// Wire-level operator id, assigned in first-reference order during compilation.
new_id!(OpId);

impl NodeId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}
