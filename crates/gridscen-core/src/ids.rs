//! Newtype identifiers for every table of the grid.
//!
//! Ids are plain integers in the source data; wrapping them keeps a plant id
//! from being looked up in the bus table.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(usize);

        impl $name {
            #[inline]
            pub fn new(value: usize) -> Self {
                $name(value)
            }
            #[inline]
            pub fn value(&self) -> usize {
                self.0
            }
            /// The id immediately following this one.
            #[inline]
            pub fn next(&self) -> Self {
                $name(self.0 + 1)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = std::num::ParseIntError;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.trim().parse::<usize>().map($name)
            }
        }

        impl From<usize> for $name {
            fn from(value: usize) -> Self {
                $name(value)
            }
        }

        impl $name {
            pub const LABEL: &'static str = $label;
        }
    };
}

define_id!(BusId, "bus");
define_id!(
    /// Substation id
    SubId,
    "substation"
);
define_id!(BranchId, "branch");
define_id!(DcLineId, "dcline");
define_id!(PlantId, "plant");
define_id!(
    /// Row of the storage generator table
    StorageId,
    "storage"
);
define_id!(
    /// Load zone id, unique within a grid model
    ZoneId,
    "zone"
);

/// Id following the largest key of an ordered table, or `first` for an empty one.
pub fn next_id<I, V>(table: &std::collections::BTreeMap<I, V>, first: I) -> I
where
    I: Copy + Ord + IdLike,
{
    table
        .keys()
        .next_back()
        .map(|last| last.successor())
        .unwrap_or(first)
}

/// Shared behaviour of the id newtypes used by generic table helpers.
pub trait IdLike {
    fn successor(&self) -> Self;
}

macro_rules! impl_id_like {
    ($($name:ident),*) => {
        $(impl IdLike for $name {
            fn successor(&self) -> Self {
                self.next()
            }
        })*
    };
}

impl_id_like!(BusId, SubId, BranchId, DcLineId, PlantId, StorageId, ZoneId);

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn ids_parse_and_display() {
        let id: PlantId = " 42 ".parse().unwrap();
        assert_eq!(id, PlantId::new(42));
        assert_eq!(id.to_string(), "42");
        assert_eq!(BusId::LABEL, "bus");
    }

    #[test]
    fn next_id_follows_largest_key() {
        let mut table = BTreeMap::new();
        assert_eq!(next_id(&table, BranchId::new(0)), BranchId::new(0));
        table.insert(BranchId::new(3), ());
        table.insert(BranchId::new(11), ());
        assert_eq!(next_id(&table, BranchId::new(0)), BranchId::new(12));
    }

    #[test]
    fn ids_serialize_transparently() {
        let json = serde_json::to_string(&ZoneId::new(301)).unwrap();
        assert_eq!(json, "301");
        let mut map = BTreeMap::new();
        map.insert(ZoneId::new(301), 1.5);
        let json = serde_json::to_string(&map).unwrap();
        let back: BTreeMap<ZoneId, f64> = serde_json::from_str(&json).unwrap();
        assert_eq!(back[&ZoneId::new(301)], 1.5);
    }
}
