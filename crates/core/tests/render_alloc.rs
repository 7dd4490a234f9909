//! The output callback must not touch the heap, including when segments finish.

use parley_core::{AudioSegment, PlaybackQueue};
use std::alloc::{GlobalAlloc, Layout, System};
use std::cell::Cell;
use std::sync::atomic::{AtomicUsize, Ordering};

struct CountingAlloc;

static ALLOCS: AtomicUsize = AtomicUsize::new(0);
static FREES: AtomicUsize = AtomicUsize::new(0);

thread_local! {
    static COUNTING: Cell<bool> = const { Cell::new(false) };
}

fn counting() -> bool {
    COUNTING.try_with(Cell::get).unwrap_or(false)
}

unsafe impl GlobalAlloc for CountingAlloc {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if counting() {
            ALLOCS.fetch_add(1, Ordering::Relaxed);
        }
        unsafe { System.alloc(layout) }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        if counting() {
            FREES.fetch_add(1, Ordering::Relaxed);
        }
        unsafe { System.dealloc(ptr, layout) }
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        if counting() {
            ALLOCS.fetch_add(1, Ordering::Relaxed);
            FREES.fetch_add(1, Ordering::Relaxed);
        }
        unsafe { System.realloc(ptr, layout, new_size) }
    }
}

#[global_allocator]
static GLOBAL: CountingAlloc = CountingAlloc;

#[test]
fn test_render_does_not_allocate_or_free() {
    let queue = PlaybackQueue::new(64);
    for i in 0..40 {
        queue
            .enqueue(AudioSegment::new(format!("item_{}", i % 3), 0, vec![1; 10]))
            .unwrap();
    }
    let mut out = vec![0i16; 400];

    COUNTING.with(|c| c.set(true));
    let rendered = queue.render(&mut out);
    COUNTING.with(|c| c.set(false));

    assert_eq!(rendered, 400);
    assert_eq!(ALLOCS.load(Ordering::Relaxed), 0);
    assert_eq!(FREES.load(Ordering::Relaxed), 0);
    assert!(queue.is_empty());
    assert_eq!(queue.reclaim(), 40);
}
