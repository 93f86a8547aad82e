/*!
 * Memory Manager Tests
 * Registry, scoped overrides, and the pluggable manager surface
 */

use membuf::core::types::{BufferResult, Size};
use membuf::memory::{
    self, HeapMemory, MemoryManager, MemoryManagerExt, MemoryManagers, Region,
};
use membuf::{BufferAllocator, BufferError};
use pretty_assertions::assert_eq;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// A manager that counts every region it hands out, for observing which
/// manager an allocator actually talks to.
#[derive(Debug)]
struct CountingManager {
    inner: HeapMemory,
    allocated: AtomicUsize,
    released: AtomicUsize,
}

impl CountingManager {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: HeapMemory::new(),
            allocated: AtomicUsize::new(0),
            released: AtomicUsize::new(0),
        })
    }
}

impl MemoryManager for CountingManager {
    fn implementation_name(&self) -> &'static str {
        "counting-heap"
    }

    fn is_native(&self) -> bool {
        false
    }

    fn allocate_region(&self, size: Size, align: Size) -> BufferResult<Region> {
        self.allocated.fetch_add(1, Ordering::SeqCst);
        self.inner.allocate_region(size, align)
    }

    fn release_region(&self, region: Region) {
        self.released.fetch_add(1, Ordering::SeqCst);
        self.inner.release_region(region);
    }
}

#[test]
fn test_registry_lists_builtin_managers() {
    let names = memory::available_managers();
    assert!(names.contains(&"heap"));
    assert!(names.contains(&"native"));
    assert!(memory::lookup_manager("heap").is_some());
    assert!(memory::lookup_manager("nonexistent").is_none());
}

#[test]
fn test_custom_manager_registration_and_use() {
    let manager = CountingManager::new();
    memory::register_manager(manager.clone());
    let found = memory::lookup_manager("counting-heap").expect("registered manager");

    let allocator = BufferAllocator::with_manager(found);
    let mut buf = allocator.allocate(32).unwrap();
    buf.write_u32(7).unwrap();
    assert_eq!(manager.allocated.load(Ordering::SeqCst), 1);
    drop(buf);
    assert_eq!(manager.released.load(Ordering::SeqCst), 1);
}

#[test]
fn test_scoped_override_redirects_allocators() {
    let manager = CountingManager::new();
    let context = MemoryManagers::new(
        manager.clone() as Arc<dyn MemoryManager>,
        MemoryManagers::defaults().native_manager(),
    );

    let buf = MemoryManagers::using(context, || {
        // Inside the scope, the plain heap factory resolves to the
        // overriding manager.
        let allocator = BufferAllocator::heap();
        allocator.allocate(16).unwrap()
    });
    assert_eq!(manager.allocated.load(Ordering::SeqCst), 1);
    drop(buf);
    assert_eq!(manager.released.load(Ordering::SeqCst), 1);

    // Outside the scope, the default manager is back.
    let allocator = BufferAllocator::heap();
    drop(allocator.allocate(16).unwrap());
    assert_eq!(manager.allocated.load(Ordering::SeqCst), 1);
}

#[test]
fn test_allocators_report_native_backing() {
    assert!(!BufferAllocator::heap().is_native());
    assert!(BufferAllocator::direct().is_native());
    let mut direct = BufferAllocator::direct().allocate(16).unwrap();
    assert_ne!(direct.native_address(), 0);
    direct.write_u8(1).unwrap();
    let heap = BufferAllocator::heap().allocate(16).unwrap();
    assert_eq!(heap.native_address(), 0);
}

#[test]
fn test_const_child_requires_read_only_parent() {
    let manager = MemoryManagers::current().heap_manager();
    let allocator = BufferAllocator::heap();

    let mut parent = allocator.allocate(4).unwrap();
    parent.write_bytes(&[1, 2, 3, 4]).unwrap();
    assert!(matches!(
        manager.allocate_const_child(&parent),
        Err(BufferError::Unsupported(_))
    ));

    parent.make_read_only();
    let mut child = manager.allocate_const_child(&parent).unwrap();
    assert!(child.read_only());
    assert!(child.is_owned());
    assert_eq!(child.read_u32().unwrap(), parent.get_u32(0).unwrap());
}
