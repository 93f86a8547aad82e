/*!
 * Composite Buffer Tests
 * Composition rules, torn access, component splits, and growth
 */

use membuf::{Buffer, BufferAllocator, BufferError, ByteOrder, CompositeBuffer};
use pretty_assertions::assert_eq;

fn heap() -> BufferAllocator {
    BufferAllocator::heap()
}

/// A fully written buffer holding the given bytes, in big-endian order
fn filled(allocator: &BufferAllocator, bytes: &[u8]) -> Buffer {
    let mut buf = allocator
        .allocate_with_order(bytes.len(), ByteOrder::BigEndian)
        .unwrap();
    buf.write_bytes(bytes).unwrap();
    buf
}

#[test]
fn test_capacity_is_component_sum() {
    let allocator = heap();
    let composite = CompositeBuffer::compose(
        &allocator,
        vec![
            filled(&allocator, &[1, 2, 3]),
            filled(&allocator, &[4, 5]),
            filled(&allocator, &[6, 7, 8, 9]),
        ],
    )
    .unwrap();
    assert_eq!(composite.capacity(), 9);
    assert_eq!(composite.count_components(), 3);
    assert_eq!(composite.readable_bytes(), 9);
    for i in 0..9 {
        assert_eq!(composite.get_u8(i).unwrap(), 1 + i as u8);
    }
}

#[test]
fn test_torn_read_across_three_components() {
    let allocator = heap();
    let composite = CompositeBuffer::compose(
        &allocator,
        vec![
            filled(&allocator, &[0x01, 0x02, 0x03]),
            filled(&allocator, &[0x04, 0x05, 0x06]),
            filled(&allocator, &[0x07, 0x08, 0x09]),
        ],
    )
    .unwrap();
    // An 8-byte read at offset 1 straddles both boundaries.
    assert_eq!(composite.get_u64(1).unwrap(), 0x0203040506070809);
    // Bit-for-bit identical to the contiguous case in the other order too.
    let mut composite = composite;
    composite.set_order(ByteOrder::LittleEndian);
    assert_eq!(composite.get_u64(1).unwrap(), 0x0908070605040302);
}

#[test]
fn test_torn_write_matches_contiguous_layout() {
    let allocator = heap();
    let mut composite = CompositeBuffer::compose(
        &allocator,
        vec![
            allocator.allocate_with_order(3, ByteOrder::BigEndian).unwrap(),
            allocator.allocate_with_order(5, ByteOrder::BigEndian).unwrap(),
        ],
    )
    .unwrap();
    composite.write_u64(0x1112131415161718).unwrap();
    let mut contiguous = allocator
        .allocate_with_order(8, ByteOrder::BigEndian)
        .unwrap();
    contiguous.write_u64(0x1112131415161718).unwrap();
    for i in 0..8 {
        assert_eq!(
            composite.get_u8(i).unwrap(),
            contiguous.get_u8(i).unwrap()
        );
    }
}

#[test]
fn test_streaming_reads_advance_component_cursors() {
    let allocator = heap();
    let mut composite = CompositeBuffer::compose(
        &allocator,
        vec![
            filled(&allocator, &[1, 2, 3]),
            filled(&allocator, &[4, 5, 6]),
        ],
    )
    .unwrap();
    assert_eq!(composite.read_u16().unwrap(), 0x0102);
    // This one straddles the boundary.
    assert_eq!(composite.read_u16().unwrap(), 0x0304);
    assert_eq!(composite.read_u16().unwrap(), 0x0506);
    assert_eq!(composite.read_offset(), 6);
    assert!(composite.read_u8().is_err());
}

#[test]
fn test_single_component_behaves_like_the_buffer() {
    let allocator = heap();
    let single = filled(&allocator, &[10, 20, 30, 40]);
    let expected: Vec<u8> = (0..4).map(|i| single.get_u8(i).unwrap()).collect();
    let composite = CompositeBuffer::compose(&allocator, vec![single]).unwrap();
    for (i, want) in expected.iter().enumerate() {
        assert_eq!(composite.get_u8(i).unwrap(), *want);
    }
}

#[test]
fn test_empty_components_are_filtered() {
    let allocator = heap();
    let composite = CompositeBuffer::compose(
        &allocator,
        vec![
            filled(&allocator, &[1]),
            allocator.allocate(4).unwrap().split(0).unwrap(), // zero capacity
            filled(&allocator, &[2]),
        ],
    )
    .unwrap();
    assert_eq!(composite.count_components(), 2);
    assert_eq!(composite.capacity(), 2);
}

#[test]
fn test_order_mismatch_is_rejected() {
    let allocator = heap();
    let a = allocator
        .allocate_with_order(4, ByteOrder::BigEndian)
        .unwrap();
    let b = allocator
        .allocate_with_order(4, ByteOrder::LittleEndian)
        .unwrap();
    let result = CompositeBuffer::compose(&allocator, vec![a, b]);
    assert!(matches!(result, Err(BufferError::InvalidComposition(_))));
}

#[test]
fn test_read_only_mismatch_is_rejected() {
    let allocator = heap();
    let a = filled(&allocator, &[1, 2]);
    let mut b = filled(&allocator, &[3, 4]);
    b.make_read_only();
    let result = CompositeBuffer::compose(&allocator, vec![a, b]);
    assert!(matches!(result, Err(BufferError::InvalidComposition(_))));
}

#[test]
fn test_gap_is_rejected() {
    let allocator = heap();
    // Two half-written buffers leave an unwritten gap in the middle.
    let mut a = allocator
        .allocate_with_order(4, ByteOrder::BigEndian)
        .unwrap();
    a.write_u16(1).unwrap();
    let mut b = allocator
        .allocate_with_order(4, ByteOrder::BigEndian)
        .unwrap();
    b.write_u16(2).unwrap();
    let result = CompositeBuffer::compose(&allocator, vec![a, b]);
    assert!(matches!(result, Err(BufferError::InvalidComposition(_))));
}

#[test]
fn test_compose_infers_cursor_midpoints() {
    let allocator = heap();
    // Fully written, half written, untouched: a valid arrangement.
    let a = filled(&allocator, &[1, 2, 3, 4]);
    let mut b = allocator
        .allocate_with_order(4, ByteOrder::BigEndian)
        .unwrap();
    b.write_u16(0x0506).unwrap();
    let c = allocator
        .allocate_with_order(4, ByteOrder::BigEndian)
        .unwrap();
    let composite = CompositeBuffer::compose(&allocator, vec![a, b, c]).unwrap();
    assert_eq!(composite.write_offset(), 6);
    assert_eq!(composite.read_offset(), 0);
    assert_eq!(composite.writable_bytes(), 6);
}

#[test]
fn test_empty_composite_adopts_first_extension() {
    let allocator = heap();
    let mut composite = CompositeBuffer::compose_empty(&allocator);
    assert_eq!(composite.capacity(), 0);

    let ext = allocator
        .allocate_with_order(4, ByteOrder::BigEndian)
        .unwrap();
    composite.extend_with(ext).unwrap();
    assert_eq!(composite.order(), ByteOrder::BigEndian);
    assert_eq!(composite.capacity(), 4);
    composite.write_u32(0x0A0B0C0D).unwrap();
    assert_eq!(composite.get_u32(0).unwrap(), 0x0A0B0C0D);
}

#[test]
fn test_extend_with_respects_order_and_read_only() {
    let allocator = heap();
    let mut composite =
        CompositeBuffer::compose(&allocator, vec![filled(&allocator, &[1, 2])]).unwrap();

    let wrong_order = allocator
        .allocate_with_order(2, ByteOrder::LittleEndian)
        .unwrap();
    assert!(matches!(
        composite.extend_with(wrong_order),
        Err(BufferError::InvalidComposition(_))
    ));

    let mut frozen = allocator
        .allocate_with_order(2, ByteOrder::BigEndian)
        .unwrap();
    frozen.make_read_only();
    assert!(matches!(
        composite.extend_with(frozen),
        Err(BufferError::InvalidComposition(_))
    ));

    // A matching extension lands at the end.
    composite
        .extend_with(filled(&allocator, &[3, 4]))
        .unwrap();
    assert_eq!(composite.capacity(), 4);
    assert_eq!(composite.get_u8(2).unwrap(), 3);
}

#[test]
fn test_extend_with_composite_flattens() {
    let allocator = heap();
    let mut outer =
        CompositeBuffer::compose(&allocator, vec![filled(&allocator, &[1, 2])]).unwrap();
    let inner = CompositeBuffer::compose(
        &allocator,
        vec![
            filled(&allocator, &[3, 4]),
            filled(&allocator, &[5, 6]),
        ],
    )
    .unwrap();
    outer.extend_with_composite(inner).unwrap();
    assert_eq!(outer.count_components(), 3);
    assert_eq!(outer.capacity(), 6);
    for i in 0..6 {
        assert_eq!(outer.get_u8(i).unwrap(), 1 + i as u8);
    }
}

#[test]
fn test_split_at_component_boundary() {
    let allocator = heap();
    let mut composite = CompositeBuffer::compose(
        &allocator,
        vec![
            filled(&allocator, &[1, 2, 3]),
            filled(&allocator, &[4, 5, 6]),
        ],
    )
    .unwrap();
    let front = composite.split(3).unwrap();
    assert_eq!(front.capacity(), 3);
    assert_eq!(front.count_components(), 1);
    assert_eq!(composite.capacity(), 3);
    assert_eq!(composite.get_u8(0).unwrap(), 4);
}

#[test]
fn test_split_straddling_component() {
    let allocator = heap();
    let mut composite = CompositeBuffer::compose(
        &allocator,
        vec![
            filled(&allocator, &[1, 2, 3]),
            filled(&allocator, &[4, 5, 6]),
        ],
    )
    .unwrap();
    composite.set_read_offset(2).unwrap();

    let front = composite.split(4).unwrap();
    assert_eq!(front.capacity(), 4);
    assert_eq!(front.read_offset(), 2);
    assert_eq!(front.write_offset(), 4);
    for i in 0..4 {
        assert_eq!(front.get_u8(i).unwrap(), 1 + i as u8);
    }

    assert_eq!(composite.capacity(), 2);
    assert_eq!(composite.read_offset(), 0);
    assert_eq!(composite.write_offset(), 2);
    assert_eq!(composite.get_u8(0).unwrap(), 5);
    assert_eq!(composite.get_u8(1).unwrap(), 6);
}

#[test]
fn test_split_components_floor_and_ceil() {
    let allocator = heap();
    let mut composite = CompositeBuffer::compose(
        &allocator,
        vec![
            filled(&allocator, &[1, 2, 3]),
            filled(&allocator, &[4, 5, 6]),
            filled(&allocator, &[7, 8, 9]),
        ],
    )
    .unwrap();

    // Floor snaps down to the previous boundary; no component breaks.
    let front = composite.split_components_floor(4).unwrap();
    assert_eq!(front.capacity(), 3);
    assert_eq!(composite.capacity(), 6);

    // Ceil snaps up to the next boundary.
    let front = composite.split_components_ceil(1).unwrap();
    assert_eq!(front.capacity(), 3);
    assert_eq!(composite.capacity(), 3);
}

#[test]
fn test_split_components_floor_zero_is_empty() {
    let allocator = heap();
    let mut composite =
        CompositeBuffer::compose(&allocator, vec![filled(&allocator, &[1, 2, 3])]).unwrap();
    let front = composite.split_components_floor(0).unwrap();
    assert_eq!(front.capacity(), 0);
    assert_eq!(front.count_components(), 0);
    assert_eq!(composite.capacity(), 3);
}

#[test]
fn test_compact_walks_components() {
    let allocator = heap();
    let mut composite = CompositeBuffer::compose(
        &allocator,
        vec![
            filled(&allocator, &[1, 2, 3, 4, 5]),
            filled(&allocator, &[6, 7, 8, 9, 10]),
        ],
    )
    .unwrap();
    composite.set_read_offset(6).unwrap();
    composite.compact().unwrap();
    assert_eq!(composite.read_offset(), 0);
    assert_eq!(composite.write_offset(), 4);
    for i in 0..4 {
        assert_eq!(composite.get_u8(i).unwrap(), 7 + i as u8);
    }
}

#[test]
fn test_ensure_writable_recycles_consumed_components() {
    let allocator = heap();
    let mut composite = CompositeBuffer::compose(
        &allocator,
        vec![
            filled(&allocator, &[1, 2, 3, 4]),
            filled(&allocator, &[5, 6, 7, 8]),
        ],
    )
    .unwrap();
    // Consume the first component entirely.
    composite.set_read_offset(4).unwrap();
    composite.ensure_writable(4).unwrap();
    // The consumed component was rotated to the rear and reset; capacity
    // did not grow.
    assert_eq!(composite.capacity(), 8);
    assert_eq!(composite.count_components(), 2);
    assert_eq!(composite.writable_bytes(), 4);
    assert_eq!(composite.read_offset(), 0);
    for i in 0..4 {
        assert_eq!(composite.get_u8(i).unwrap(), 5 + i as u8);
    }
}

#[test]
fn test_ensure_writable_appends_extension() {
    let allocator = heap();
    let mut composite =
        CompositeBuffer::compose(&allocator, vec![filled(&allocator, &[1, 2, 3, 4])]).unwrap();
    assert_eq!(composite.writable_bytes(), 0);
    composite.ensure_writable_with(16, 16, false).unwrap();
    assert_eq!(composite.count_components(), 2);
    assert!(composite.writable_bytes() >= 16);
    composite.write_u32(0xCAFE_BABE).unwrap();
    assert_eq!(composite.get_u32(4).unwrap(), 0xCAFE_BABE);
}

#[test]
fn test_for_each_readable_visits_components() {
    let allocator = heap();
    let composite = CompositeBuffer::compose(
        &allocator,
        vec![
            filled(&allocator, &[1, 2]),
            filled(&allocator, &[3, 4]),
            filled(&allocator, &[5, 6]),
        ],
    )
    .unwrap();
    let mut seen = Vec::new();
    let visited = composite
        .for_each_readable(0, |index, component| {
            seen.push((index, component.readable_bytes().to_vec()));
            true
        })
        .unwrap();
    assert_eq!(visited, 3);
    assert_eq!(
        seen,
        vec![
            (0, vec![1, 2]),
            (1, vec![3, 4]),
            (2, vec![5, 6]),
        ]
    );

    // Early stop reports the negated count.
    let mut count = 0;
    let stopped = composite
        .for_each_readable(0, |_, _| {
            count += 1;
            count < 2
        })
        .unwrap();
    assert_eq!(stopped, -2);
}

#[test]
fn test_for_each_writable_scatter_gather() {
    let allocator = heap();
    let mut composite = CompositeBuffer::compose(
        &allocator,
        vec![allocator.allocate(2).unwrap(), allocator.allocate(2).unwrap()],
    )
    .unwrap();
    let mut fill_byte = 1u8;
    let visited = composite
        .for_each_writable(0, |_, component| {
            for byte in component.writable_bytes().iter_mut() {
                *byte = fill_byte;
                fill_byte += 1;
            }
            true
        })
        .unwrap();
    assert_eq!(visited, 2);
    composite.set_write_offset(4).unwrap();
    for i in 0..4 {
        assert_eq!(composite.get_u8(i).unwrap(), 1 + i as u8);
    }
}

#[test]
fn test_copy_into_slice_and_buffer() {
    let allocator = heap();
    let composite = CompositeBuffer::compose(
        &allocator,
        vec![
            filled(&allocator, &[1, 2, 3]),
            filled(&allocator, &[4, 5, 6, 7]),
        ],
    )
    .unwrap();

    let mut out = [0u8; 5];
    composite.copy_into(1, &mut out, 0, 5).unwrap();
    assert_eq!(out, [2, 3, 4, 5, 6]);

    let mut dst = allocator.allocate(8).unwrap();
    composite.copy_into_buffer(0, &mut dst, 1, 7).unwrap();
    for i in 0..7 {
        assert_eq!(dst.get_u8(1 + i).unwrap(), 1 + i as u8);
    }
}

#[test]
fn test_composite_cursors_chain_components() {
    let allocator = heap();
    let composite = CompositeBuffer::compose(
        &allocator,
        vec![
            filled(&allocator, &[1, 2, 3]),
            filled(&allocator, &[4, 5, 6]),
            filled(&allocator, &[7, 8, 9, 10]),
        ],
    )
    .unwrap();

    let mut forward = Vec::new();
    let mut cursor = composite.open_cursor().unwrap();
    while let Some(value) = cursor.read_u64() {
        forward.extend_from_slice(&value.to_be_bytes());
    }
    while let Some(byte) = cursor.read_u8() {
        forward.push(byte);
    }
    assert_eq!(forward, vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10]);

    let mut backward = Vec::new();
    let mut cursor = composite.open_reverse_cursor().unwrap();
    while let Some(byte) = cursor.read_u8() {
        backward.push(byte);
    }
    assert_eq!(backward, vec![10, 9, 8, 7, 6, 5, 4, 3, 2, 1]);
}

#[test]
fn test_composite_slice_is_read_only_view() {
    let allocator = heap();
    let composite = CompositeBuffer::compose(
        &allocator,
        vec![
            filled(&allocator, &[1, 2, 3]),
            filled(&allocator, &[4, 5, 6]),
        ],
    )
    .unwrap();
    let slice = composite.slice(2, 3).unwrap();
    assert_eq!(slice.capacity(), 3);
    assert!(slice.read_only());
    assert_eq!(slice.get_u8(0).unwrap(), 3);
    assert_eq!(slice.get_u8(2).unwrap(), 5);
    // The source is borrowed while the slice is live.
    assert!(!composite.is_owned());
}

#[test]
fn test_make_read_only_propagates() {
    let allocator = heap();
    let mut composite = CompositeBuffer::compose(
        &allocator,
        vec![filled(&allocator, &[1]), filled(&allocator, &[2])],
    )
    .unwrap();
    composite.make_read_only();
    assert!(composite.read_only());
    assert_eq!(composite.set_u8(0, 9), Err(BufferError::ReadOnly));
    assert_eq!(composite.fill(0), Err(BufferError::ReadOnly));
}

#[test]
fn test_close_composite_closes_components() {
    let allocator = heap();
    let mut composite = CompositeBuffer::compose(
        &allocator,
        vec![filled(&allocator, &[1]), filled(&allocator, &[2])],
    )
    .unwrap();
    composite.close().unwrap();
    assert!(!composite.is_accessible());
    assert_eq!(composite.capacity(), 0);
    assert_eq!(composite.get_u8(0), Err(BufferError::BufferClosed));
    assert_eq!(composite.close(), Err(BufferError::BufferClosed));
}

#[test]
fn test_set_offsets_propagate_to_components() {
    let allocator = heap();
    let mut composite = CompositeBuffer::compose(
        &allocator,
        vec![
            filled(&allocator, &[1, 2, 3]),
            filled(&allocator, &[4, 5, 6]),
        ],
    )
    .unwrap();
    composite.set_read_offset(4).unwrap();
    assert_eq!(composite.read_offset(), 4);
    assert_eq!(composite.read_u8().unwrap(), 5);
    assert!(composite.set_read_offset(7).is_err());
}
