//! Allocation tags
//!
//! Every runtime subsystem that keeps its bookkeeping in page-backed slots
//! gets its own tag, and every tag gets its own arena. Subsystems therefore
//! never share pages.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Logical owner of an arena
///
/// Add a variant (and a marker in [`tags`]) when a new subsystem needs
/// its own slot memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u32)]
pub enum AllocationTag {
    /// Containers owned by the finalizer processor
    FinalizerProcessor,
    /// General-purpose runtime allocator bookkeeping
    Allocator,
    /// The list of registered mutators
    MutatorList,
    /// GC mark and write-barrier work stacks
    GcWorkStack,
    /// GC task queues
    GcTaskQueue,
    /// Native stack regions used while growing stacks
    StackPtr,
}

impl AllocationTag {
    /// Number of tags
    pub const COUNT: usize = 6;

    /// All tags, in index order
    pub const ALL: [AllocationTag; Self::COUNT] = [
        AllocationTag::FinalizerProcessor,
        AllocationTag::Allocator,
        AllocationTag::MutatorList,
        AllocationTag::GcWorkStack,
        AllocationTag::GcTaskQueue,
        AllocationTag::StackPtr,
    ];

    /// Dense index of this tag, `0..COUNT`
    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Stable name used in logs and metric labels
    pub const fn name(self) -> &'static str {
        match self {
            AllocationTag::FinalizerProcessor => "finalizer_processor",
            AllocationTag::Allocator => "allocator",
            AllocationTag::MutatorList => "mutator_list",
            AllocationTag::GcWorkStack => "gc_work_stack",
            AllocationTag::GcTaskQueue => "gc_task_queue",
            AllocationTag::StackPtr => "stack_ptr",
        }
    }
}

impl fmt::Display for AllocationTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Compile-time tag carried by [`ContainerAllocator`](crate::ContainerAllocator)
pub trait Tag: Send + Sync + 'static {
    /// The arena this marker selects
    const TAG: AllocationTag;
}

/// Zero-sized markers, one per [`AllocationTag`]
pub mod tags {
    use super::{AllocationTag, Tag};

    macro_rules! tag_markers {
        ($($(#[$doc:meta])* $name:ident => $variant:ident),+ $(,)?) => {
            $(
                $(#[$doc])*
                #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
                pub struct $name;

                impl Tag for $name {
                    const TAG: AllocationTag = AllocationTag::$variant;
                }
            )+
        };
    }

    tag_markers! {
        /// Marker for [`AllocationTag::FinalizerProcessor`]
        FinalizerProcessor => FinalizerProcessor,
        /// Marker for [`AllocationTag::Allocator`]
        Allocator => Allocator,
        /// Marker for [`AllocationTag::MutatorList`]
        MutatorList => MutatorList,
        /// Marker for [`AllocationTag::GcWorkStack`]
        GcWorkStack => GcWorkStack,
        /// Marker for [`AllocationTag::GcTaskQueue`]
        GcTaskQueue => GcTaskQueue,
        /// Marker for [`AllocationTag::StackPtr`]
        StackPtr => StackPtr,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_indices_are_dense() {
        for (i, tag) in AllocationTag::ALL.iter().enumerate() {
            assert_eq!(tag.index(), i);
        }
    }

    #[test]
    fn test_names_are_unique() {
        let mut names: Vec<_> = AllocationTag::ALL.iter().map(|t| t.name()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), AllocationTag::COUNT);
    }

    #[test]
    fn test_markers_map_to_variants() {
        assert_eq!(<tags::GcWorkStack as Tag>::TAG, AllocationTag::GcWorkStack);
        assert_eq!(<tags::MutatorList as Tag>::TAG, AllocationTag::MutatorList);
        assert_eq!(<tags::StackPtr as Tag>::TAG, AllocationTag::StackPtr);
    }

    #[test]
    fn test_serde_name() {
        let json = serde_json::to_string(&AllocationTag::GcTaskQueue).unwrap();
        assert_eq!(json, "\"gc_task_queue\"");
        assert_eq!(AllocationTag::GcTaskQueue.to_string(), "gc_task_queue");
    }
}
