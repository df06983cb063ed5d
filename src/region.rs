// src/region.rs — heap regions and their allocation sizes.
//
// A snapshot is only loadable if the loader reserves at least as much space
// per region as the serialized heap occupied. The writer therefore records,
// next to the two byte listings, the allocation offset of every region at
// serialization time. Order is fixed and part of the output contract.

/// A heap region (allocation space) of the embedded runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Region {
    New,
    OldPointer,
    OldData,
    Code,
    Map,
    Cell,
    LargeObject,
}

impl Region {
    /// All regions in canonical output order.
    pub const ALL: [Region; 7] = [
        Region::New,
        Region::OldPointer,
        Region::OldData,
        Region::Code,
        Region::Map,
        Region::Cell,
        Region::LargeObject,
    ];

    /// Stable lowercase name used in output identifiers and counter names.
    pub fn name(&self) -> &'static str {
        match self {
            Region::New => "new",
            Region::OldPointer => "old_pointer",
            Region::OldData => "old_data",
            Region::Code => "code",
            Region::Map => "map",
            Region::Cell => "cell",
            Region::LargeObject => "large_object",
        }
    }
}

/// Per-region allocation offsets, captured once after both serialization
/// passes have completed (capturing earlier would under-report).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegionSizes {
    pub new_space: u64,
    pub old_pointer_space: u64,
    pub old_data_space: u64,
    pub code_space: u64,
    pub map_space: u64,
    pub cell_space: u64,
    pub large_object_space: u64,
}

impl RegionSizes {
    /// Collect sizes by querying `f` for every region in canonical order.
    pub fn from_query(mut f: impl FnMut(Region) -> u64) -> Self {
        RegionSizes {
            new_space: f(Region::New),
            old_pointer_space: f(Region::OldPointer),
            old_data_space: f(Region::OldData),
            code_space: f(Region::Code),
            map_space: f(Region::Map),
            cell_space: f(Region::Cell),
            large_object_space: f(Region::LargeObject),
        }
    }

    pub fn get(&self, region: Region) -> u64 {
        match region {
            Region::New => self.new_space,
            Region::OldPointer => self.old_pointer_space,
            Region::OldData => self.old_data_space,
            Region::Code => self.code_space,
            Region::Map => self.map_space,
            Region::Cell => self.cell_space,
            Region::LargeObject => self.large_object_space,
        }
    }

    /// (region name, used bytes) pairs in canonical order.
    pub fn entries(&self) -> [(&'static str, u64); 7] {
        let mut out = [("", 0u64); 7];
        for (slot, r) in out.iter_mut().zip(Region::ALL) {
            *slot = (r.name(), self.get(r));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_order_and_names() {
        let names: Vec<&str> = Region::ALL.iter().map(|r| r.name()).collect();
        assert_eq!(
            names,
            vec![
                "new",
                "old_pointer",
                "old_data",
                "code",
                "map",
                "cell",
                "large_object"
            ]
        );
    }

    #[test]
    fn from_query_fills_every_region() {
        let sizes = RegionSizes::from_query(|r| match r {
            Region::New => 1,
            Region::OldPointer => 2,
            Region::OldData => 3,
            Region::Code => 4,
            Region::Map => 5,
            Region::Cell => 6,
            Region::LargeObject => 7,
        });
        assert_eq!(sizes.new_space, 1);
        assert_eq!(sizes.large_object_space, 7);
        let entries = sizes.entries();
        assert_eq!(entries[0], ("new", 1));
        assert_eq!(entries[6], ("large_object", 7));
        for (i, (_, v)) in entries.iter().enumerate() {
            assert_eq!(*v, (i + 1) as u64);
        }
    }
}
