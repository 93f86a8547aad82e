/*!
 * Size Classes
 * Canonical buckets routing requests to subpages, runs, or the manager
 */

use crate::core::types::Size;

/// Small classes below 512 bytes are spaced 16 bytes apart
const QUANTUM: Size = 16;
/// First power-of-two small class
const SMALL_POW2_BASE: Size = 512;
/// Number of quantum-spaced classes: 16, 32, .., 496
const QUANTUM_CLASSES: usize = 31;

/// How an allocation request is serviced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SizeClass {
    /// Subpage element; carries the class index and the element size
    Small { index: usize, elem_size: Size },
    /// Buddy run of whole pages; carries the normalized run size
    Normal { run_size: Size },
    /// Beyond the chunk size; served unpooled by the memory manager
    Huge,
}

/// Size classification for one arena geometry.
#[derive(Debug, Clone)]
pub(crate) struct SizeClasses {
    page_size: Size,
    page_shifts: u32,
    chunk_size: Size,
    small_class_count: usize,
}

impl SizeClasses {
    pub fn new(page_size: Size, page_shifts: u32, chunk_size: Size) -> Self {
        // Power-of-two classes from 512 to half a page.
        let pow2_classes = (page_shifts - SMALL_POW2_BASE.trailing_zeros()) as usize;
        Self {
            page_size,
            page_shifts,
            chunk_size,
            small_class_count: QUANTUM_CLASSES + pow2_classes,
        }
    }

    /// Number of distinct small classes
    pub fn small_class_count(&self) -> usize {
        self.small_class_count
    }

    /// Number of normal classes a thread cache can hold: page_size << i
    /// for each i with the result no larger than `max_cached`
    pub fn normal_cache_classes(&self, max_cached: Size) -> usize {
        let mut count = 0;
        let mut size = self.page_size;
        while size <= max_cached && size <= self.chunk_size {
            count += 1;
            size <<= 1;
        }
        count
    }

    /// Classify a request, normalizing its size
    pub fn classify(&self, size: Size) -> SizeClass {
        if size > self.chunk_size {
            return SizeClass::Huge;
        }
        if size < SMALL_POW2_BASE {
            let elem_size = round_up(size.max(1), QUANTUM);
            return SizeClass::Small {
                index: elem_size / QUANTUM - 1,
                elem_size,
            };
        }
        let norm = size.next_power_of_two();
        if norm < self.page_size {
            return SizeClass::Small {
                index: QUANTUM_CLASSES
                    + (norm.trailing_zeros() - SMALL_POW2_BASE.trailing_zeros()) as usize,
                elem_size: norm,
            };
        }
        SizeClass::Normal { run_size: norm }
    }

    /// Element size of a small class
    pub fn small_elem_size(&self, index: usize) -> Size {
        if index < QUANTUM_CLASSES {
            (index + 1) * QUANTUM
        } else {
            SMALL_POW2_BASE << (index - QUANTUM_CLASSES)
        }
    }

    /// Cache bin index for a normalized run size
    pub fn normal_cache_index(&self, run_size: Size) -> usize {
        (run_size.trailing_zeros() - self.page_shifts) as usize
    }

    /// Buddy depth that fits a normalized run size
    pub fn depth_for_run(&self, max_order: u32, run_size: Size) -> u32 {
        max_order - (run_size.trailing_zeros() - self.page_shifts)
    }
}

#[inline]
pub(crate) fn round_up(size: Size, multiple: Size) -> Size {
    (size + multiple - 1) / multiple * multiple
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classes() -> SizeClasses {
        SizeClasses::new(8192, 13, 8192 << 9)
    }

    #[test]
    fn test_quantum_classes() {
        let sc = classes();
        assert_eq!(
            sc.classify(1),
            SizeClass::Small {
                index: 0,
                elem_size: 16
            }
        );
        assert_eq!(
            sc.classify(16),
            SizeClass::Small {
                index: 0,
                elem_size: 16
            }
        );
        assert_eq!(
            sc.classify(17),
            SizeClass::Small {
                index: 1,
                elem_size: 32
            }
        );
        assert_eq!(
            sc.classify(496),
            SizeClass::Small {
                index: 30,
                elem_size: 496
            }
        );
    }

    #[test]
    fn test_pow2_small_classes() {
        let sc = classes();
        assert_eq!(
            sc.classify(497),
            SizeClass::Small {
                index: 31,
                elem_size: 512
            }
        );
        assert_eq!(
            sc.classify(4096),
            SizeClass::Small {
                index: 34,
                elem_size: 4096
            }
        );
        assert_eq!(sc.small_class_count(), 35);
    }

    #[test]
    fn test_page_boundary_is_normal() {
        let sc = classes();
        // 4097..8192 normalizes to a full page: a buddy run, not a subpage.
        assert_eq!(sc.classify(4097), SizeClass::Normal { run_size: 8192 });
        assert_eq!(sc.classify(8192), SizeClass::Normal { run_size: 8192 });
        assert_eq!(sc.classify(8193), SizeClass::Normal { run_size: 16384 });
    }

    #[test]
    fn test_chunk_boundary_is_huge() {
        let sc = classes();
        let chunk = 8192 << 9;
        assert_eq!(sc.classify(chunk), SizeClass::Normal { run_size: chunk });
        assert_eq!(sc.classify(chunk + 1), SizeClass::Huge);
    }

    #[test]
    fn test_class_round_trip() {
        let sc = classes();
        for index in 0..sc.small_class_count() {
            let elem = sc.small_elem_size(index);
            assert_eq!(
                sc.classify(elem),
                SizeClass::Small {
                    index,
                    elem_size: elem
                }
            );
        }
    }

    #[test]
    fn test_normal_cache_classes() {
        let sc = classes();
        // 8 KiB, 16 KiB, 32 KiB fit under the 32 KiB cache cap.
        assert_eq!(sc.normal_cache_classes(32 * 1024), 3);
    }

    #[test]
    fn test_depth_for_run() {
        let sc = classes();
        assert_eq!(sc.depth_for_run(9, 8192), 9);
        assert_eq!(sc.depth_for_run(9, 8192 << 9), 0);
    }
}
