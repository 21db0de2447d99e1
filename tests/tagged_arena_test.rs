//! Integration tests for tagged arenas and the container adapter

use pagealloc::metrics::{export_metrics, init_metrics};
use pagealloc::{
    tags, AggregateAllocator, AllocationTag, ContainerAllocator, CountingPagePool, TaggedVec,
};
use std::sync::Arc;
use std::thread;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[test]
fn test_tags_never_share_pages() {
    init_tracing();

    let a = pagealloc::allocate(AllocationTag::GcWorkStack, 32).unwrap();
    let b = pagealloc::allocate(AllocationTag::MutatorList, 32).unwrap();

    let index = AggregateAllocator::class_index(32).unwrap();
    let work_stack = AggregateAllocator::instance(AllocationTag::GcWorkStack).size_class(index);
    let mutators = AggregateAllocator::instance(AllocationTag::MutatorList).size_class(index);

    assert!(!std::ptr::eq(work_stack, mutators));
    assert_ne!(work_stack.page_address(a), mutators.page_address(b));

    unsafe {
        pagealloc::deallocate(AllocationTag::GcWorkStack, a, 32);
        pagealloc::deallocate(AllocationTag::MutatorList, b, 32);
    }
}

#[test]
fn test_every_size_up_to_large_round_trips() {
    let pool = Arc::new(CountingPagePool::new());
    let arena = AggregateAllocator::new(pool.clone());

    let blocks: Vec<_> = (0..=3000usize)
        .step_by(7)
        .map(|size| (arena.allocate(size).unwrap(), size))
        .collect();

    for &(block, size) in &blocks {
        assert_eq!(block.as_ptr() as usize % 8, 0);
        let bytes = unsafe { std::slice::from_raw_parts(block.as_ptr(), size) };
        assert!(bytes.iter().all(|&b| b == 0), "{}-byte block not zeroed", size);
    }

    for (block, size) in blocks {
        unsafe { arena.deallocate(block, size) };
    }

    assert_eq!(arena.stats().live_pages, 0);
    assert_eq!(pool.live_pages(), 0);
    assert_eq!(pool.blocks_obtained(), pool.blocks_returned());
    assert_eq!(pool.double_returns(), 0);
}

#[test]
fn test_concurrent_size_classes() {
    init_tracing();
    let pool = Arc::new(CountingPagePool::new());
    let arena = Arc::new(AggregateAllocator::new(pool.clone()));

    let handles: Vec<_> = (0..8usize)
        .map(|t| {
            let arena = Arc::clone(&arena);
            thread::spawn(move || {
                // Half the threads share a class, the rest spread out
                let size = if t % 2 == 0 { 48 } else { 64 * (t + 1) };
                for round in 0..50 {
                    let blocks: Vec<usize> = (0..64)
                        .map(|_| {
                            let p = arena.allocate(size).unwrap();
                            unsafe { p.as_ptr().write((t + round) as u8) };
                            p.as_ptr() as usize
                        })
                        .collect();
                    for addr in blocks {
                        let p = std::ptr::NonNull::new(addr as *mut u8).unwrap();
                        assert_eq!(unsafe { p.as_ptr().read() }, (t + round) as u8);
                        unsafe { arena.deallocate(p, size) };
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(arena.stats().live_pages, 0);
    assert_eq!(pool.pages_obtained(), pool.pages_returned());
    assert_eq!(pool.double_returns(), 0);
}

#[test]
fn test_tagged_vecs_across_threads() {
    let handles: Vec<_> = (0..4u64)
        .map(|t| {
            thread::spawn(move || {
                let mut queue: TaggedVec<u64, tags::GcTaskQueue> =
                    TaggedVec::new_in(ContainerAllocator::new());
                for i in 0..5_000 {
                    queue.push(t * 10_000 + i);
                }
                queue.iter().copied().sum::<u64>()
            })
        })
        .collect();

    for (t, handle) in handles.into_iter().enumerate() {
        let t = t as u64;
        let expected = (0..5_000u64).map(|i| t * 10_000 + i).sum::<u64>();
        assert_eq!(handle.join().unwrap(), expected);
    }
}

#[test]
fn test_swapped_containers_free_into_same_arena() {
    let alloc = ContainerAllocator::<String, tags::FinalizerProcessor>::new();
    let mut a: TaggedVec<String, tags::FinalizerProcessor> = TaggedVec::new_in(alloc);
    let mut b: TaggedVec<String, tags::FinalizerProcessor> = TaggedVec::new_in(alloc);

    a.push("first".to_string());
    b.extend(["x", "y", "z"].iter().map(|s| s.to_string()));
    std::mem::swap(&mut a, &mut b);

    assert_eq!(a.len(), 3);
    assert_eq!(b[0], "first");
    assert!(*a.allocator() == *b.allocator());
}

#[test]
fn test_metrics_export_after_allocation() {
    init_metrics();
    let p = pagealloc::allocate(AllocationTag::Allocator, 16).unwrap();

    let exported = export_metrics();
    assert!(exported.contains("pagealloc_live_pages"));
    assert!(exported.contains("tag=\"allocator\""));

    unsafe { pagealloc::deallocate(AllocationTag::Allocator, p, 16) };
}
