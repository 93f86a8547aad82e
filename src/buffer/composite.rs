/*!
 * Composite Buffer
 *
 * Non-copy concatenation of constituent buffers behind the single-buffer
 * contract.
 *
 * An offset index maps absolute positions to components through a binary
 * search. Multi-byte accesses that straddle a component boundary fall back
 * to torn accessors that move one byte at a time through the owning
 * component's pass-through accessors and never re-enter the composite
 * dispatch. Streaming operations keep the component cursors in lockstep
 * with the composite cursors, so the gap invariant holds at all times:
 * components before the cursor midpoint are fully consumed, components
 * after it are untouched.
 */

use super::accessors::{medium_accessor_matrix, standard_accessor_matrix};
use super::cursor::{ByteCursor, ReverseByteCursor};
use super::send::SendToken;
use super::Buffer;
use super::{ReadableComponent, WritableComponent};
use crate::alloc::BufferAllocator;
use crate::core::errors::BufferError;
use crate::core::limits;
use crate::core::types::{BufferResult, ByteOrder, Size};

/// A buffer composed of other buffers, without copying their contents.
pub struct CompositeBuffer {
    allocator: BufferAllocator,
    bufs: Vec<Buffer>,
    /// offsets[i] is the absolute position where component i starts
    offsets: Vec<Size>,
    capacity: Size,
    roff: Size,
    woff: Size,
    order: ByteOrder,
    read_only: bool,
    closed: bool,
}

impl CompositeBuffer {
    // ---- construction ------------------------------------------------

    /// Compose the given buffers into a single zero-copy view.
    ///
    /// The components are consumed; the composite owns them until it is
    /// closed or sent. Zero-capacity components are filtered out. Fails
    /// when the components disagree on byte order or read-only state, when
    /// writable components overlap in memory, when their cursors leave a
    /// gap, or when the combined capacity exceeds the library maximum.
    pub fn compose(
        allocator: &BufferAllocator,
        bufs: impl IntoIterator<Item = Buffer>,
    ) -> BufferResult<CompositeBuffer> {
        Self::build(allocator.clone(), bufs.into_iter().collect(), true)
    }

    /// Compose buffers arriving through transfer tokens.
    ///
    /// Each token is received here; if any token was already consumed, the
    /// remaining tokens are discarded, the already-received buffers are
    /// closed, and the error is surfaced.
    pub fn compose_sends(
        allocator: &BufferAllocator,
        sends: Vec<SendToken<Buffer>>,
    ) -> BufferResult<CompositeBuffer> {
        let mut bufs = Vec::with_capacity(sends.len());
        let mut failure = None;
        for send in &sends {
            if failure.is_none() {
                match send.receive() {
                    Ok(buf) => bufs.push(buf),
                    Err(e) => {
                        failure = Some(e);
                        // Close what we already received.
                        bufs.clear();
                    }
                }
            } else {
                // Discard the rest; dropping a received buffer closes it.
                let _ = send.receive();
            }
        }
        if let Some(e) = failure {
            return Err(e);
        }
        Self::build(allocator.clone(), bufs, true)
    }

    /// An empty composite with zero capacity. It adopts byte order and
    /// read-only state from its first extension.
    pub fn compose_empty(allocator: &BufferAllocator) -> CompositeBuffer {
        CompositeBuffer {
            allocator: allocator.clone(),
            bufs: Vec::new(),
            offsets: Vec::new(),
            capacity: 0,
            roff: 0,
            woff: 0,
            order: ByteOrder::native(),
            read_only: false,
            closed: false,
        }
    }

    fn build(
        allocator: BufferAllocator,
        mut bufs: Vec<Buffer>,
        filter_empty: bool,
    ) -> BufferResult<CompositeBuffer> {
        if filter_empty {
            // Dropped components are closed by their own drop protocol.
            bufs.retain(|b| b.capacity() > 0);
        }
        for buf in &bufs {
            if !buf.is_accessible() {
                return Err(BufferError::BufferClosed);
            }
        }
        if let Some(first) = bufs.first() {
            let order = first.order();
            if bufs.iter().any(|b| b.order() != order) {
                return Err(BufferError::InvalidComposition(
                    "constituent buffers have inconsistent byte order".into(),
                ));
            }
            let read_only = first.read_only();
            if bufs.iter().any(|b| b.read_only() != read_only) {
                return Err(BufferError::InvalidComposition(
                    "constituent buffers have inconsistent read-only state".into(),
                ));
            }
        }
        check_overlap(&bufs)?;
        let mut composite = CompositeBuffer {
            order: bufs.first().map(|b| b.order()).unwrap_or_default(),
            read_only: bufs.first().map(|b| b.read_only()).unwrap_or(false),
            allocator,
            bufs,
            offsets: Vec::new(),
            capacity: 0,
            roff: 0,
            woff: 0,
            closed: false,
        };
        composite.compute_offsets()?;
        Ok(composite)
    }

    /// Rebuild a composite around components that already satisfy the
    /// construction invariants, preserving this composite's order and
    /// read-only state even when `parts` is empty.
    fn assemble(&self, parts: Vec<Buffer>) -> BufferResult<CompositeBuffer> {
        let mut composite = CompositeBuffer {
            allocator: self.allocator.clone(),
            bufs: parts,
            offsets: Vec::new(),
            capacity: 0,
            roff: 0,
            woff: 0,
            order: self.order,
            read_only: self.read_only,
            closed: false,
        };
        composite.compute_offsets()?;
        Ok(composite)
    }

    /// Recompute the offset index, composite cursors, and capacity from the
    /// component states, enforcing the gap rule: at most one component may
    /// hold a cursor midpoint, with everything before it fully consumed and
    /// everything after it untouched.
    fn compute_offsets(&mut self) -> BufferResult<()> {
        if self.bufs.is_empty() {
            self.roff = 0;
            self.woff = 0;
            self.offsets.clear();
            self.capacity = 0;
            return Ok(());
        }

        let mut woff = 0;
        let mut woff_midpoint = false;
        for buf in &self.bufs {
            if buf.writable_bytes() == 0 {
                woff += buf.capacity();
            } else if !woff_midpoint {
                woff += buf.write_offset();
                woff_midpoint = true;
            } else if buf.write_offset() != 0 {
                return Err(BufferError::InvalidComposition(
                    "the given buffers leave an unwritten gap".into(),
                ));
            }
        }

        let mut roff = 0;
        let mut roff_midpoint = false;
        for buf in &self.bufs {
            if buf.readable_bytes() == 0 && buf.writable_bytes() == 0 {
                roff += buf.capacity();
            } else if !roff_midpoint {
                roff += buf.read_offset();
                roff_midpoint = true;
            } else if buf.read_offset() != 0 {
                return Err(BufferError::InvalidComposition(
                    "the given buffers leave an unread gap".into(),
                ));
            }
        }

        if roff > woff {
            return Err(BufferError::InvalidComposition(
                "the given buffers place the read offset ahead of the write offset".into(),
            ));
        }

        self.woff = woff;
        self.roff = roff;

        self.offsets.clear();
        let mut cap: u64 = 0;
        for buf in &self.bufs {
            self.offsets.push(cap as Size);
            cap += buf.capacity() as u64;
        }
        if cap > limits::MAX_BUFFER_CAPACITY as u64 {
            return Err(BufferError::InvalidComposition(format!(
                "combined capacity {} exceeds the maximum of {}",
                cap,
                limits::MAX_BUFFER_CAPACITY
            )));
        }
        self.capacity = cap as Size;
        Ok(())
    }

    // ---- geometry ----------------------------------------------------

    #[inline]
    pub fn capacity(&self) -> Size {
        self.capacity
    }

    #[inline]
    pub fn read_offset(&self) -> Size {
        self.roff
    }

    /// Move the composite read cursor and every component cursor with it
    pub fn set_read_offset(&mut self, offset: Size) -> BufferResult<()> {
        self.check_read(offset, 0)?;
        let mut left = offset;
        for buf in &mut self.bufs {
            buf.set_read_offset(left.min(buf.capacity()))?;
            left = left.saturating_sub(buf.capacity());
        }
        self.roff = offset;
        Ok(())
    }

    #[inline]
    pub fn write_offset(&self) -> Size {
        self.woff
    }

    /// Move the composite write cursor and every component cursor with it
    pub fn set_write_offset(&mut self, offset: Size) -> BufferResult<()> {
        self.check_write(offset, 0)?;
        if offset < self.roff {
            return Err(BufferError::out_of_bounds(offset, self.woff, self.capacity));
        }
        let mut left = offset;
        for buf in &mut self.bufs {
            buf.set_write_offset(left.min(buf.capacity()))?;
            left = left.saturating_sub(buf.capacity());
        }
        self.woff = offset;
        Ok(())
    }

    #[inline]
    pub fn readable_bytes(&self) -> Size {
        self.woff - self.roff
    }

    #[inline]
    pub fn writable_bytes(&self) -> Size {
        self.capacity - self.woff
    }

    #[inline]
    pub fn order(&self) -> ByteOrder {
        self.order
    }

    /// Change the byte order of this composite and all of its components
    pub fn set_order(&mut self, order: ByteOrder) {
        self.order = order;
        for buf in &mut self.bufs {
            buf.set_order(order);
        }
    }

    /// Composite memory is never contiguous native memory
    pub fn native_address(&self) -> usize {
        0
    }

    // ---- flags and ownership -----------------------------------------

    /// Make this composite and every component read-only. Monotonic.
    pub fn make_read_only(&mut self) {
        for buf in &mut self.bufs {
            buf.make_read_only();
        }
        self.read_only = true;
    }

    #[inline]
    pub fn read_only(&self) -> bool {
        self.read_only
    }

    #[inline]
    pub fn is_accessible(&self) -> bool {
        !self.closed
    }

    /// Owned means the composite is accessible and every component is the
    /// sole handle to its region.
    pub fn is_owned(&self) -> bool {
        !self.closed && self.bufs.iter().all(Buffer::is_owned)
    }

    /// Number of constituent components
    pub fn count_components(&self) -> usize {
        self.bufs.len()
    }

    /// Components with at least one readable byte
    pub fn count_readable_components(&self) -> usize {
        self.bufs.iter().filter(|b| b.readable_bytes() > 0).count()
    }

    /// Components with at least one writable byte
    pub fn count_writable_components(&self) -> usize {
        self.bufs.iter().filter(|b| b.writable_bytes() > 0).count()
    }

    // ---- whole-buffer operations -------------------------------------

    /// Set every byte of every component to `value`
    pub fn fill(&mut self, value: u8) -> BufferResult<()> {
        if self.closed {
            return Err(BufferError::BufferClosed);
        }
        if self.read_only {
            return Err(BufferError::ReadOnly);
        }
        for buf in &mut self.bufs {
            buf.fill(value)?;
        }
        Ok(())
    }

    /// Rewind both composite cursors (and all component cursors) to zero
    pub fn reset(&mut self) -> BufferResult<()> {
        if self.closed {
            return Err(BufferError::BufferClosed);
        }
        for buf in &mut self.bufs {
            buf.reset()?;
        }
        self.roff = 0;
        self.woff = 0;
        Ok(())
    }

    /// A read-only composite view over `[offset, offset + len)`, built from
    /// borrowed slices of the covered components.
    pub fn slice(&self, offset: Size, len: Size) -> BufferResult<CompositeBuffer> {
        self.check_get(offset, len)?;
        let mut slices = Vec::new();
        if len > 0 {
            let mut i = self.search_offsets(offset);
            let mut off = offset - self.offsets[i];
            let mut remaining = len;
            while remaining > 0 {
                let buf = &self.bufs[i];
                let take = remaining.min(buf.capacity() - off);
                slices.push(buf.slice(off, take)?);
                remaining -= take;
                off = 0;
                i += 1;
            }
        } else if !self.bufs.is_empty() {
            // A zero-length slice still pins one component, so the source
            // composite stays borrowed while the slice is live.
            let i = self.search_offsets(offset.min(self.capacity.saturating_sub(1)));
            let off = offset - self.offsets[i];
            slices.push(self.bufs[i].slice(off, 0)?);
        }
        // Keep empty slices: filtering them out would give up the borrow.
        Self::build(self.allocator.clone(), slices, false)
    }

    /// Copy `len` bytes starting at `src_pos` into a byte slice
    pub fn copy_into(
        &self,
        src_pos: Size,
        dest: &mut [u8],
        dest_pos: Size,
        len: Size,
    ) -> BufferResult<()> {
        self.check_copy_bounds(src_pos, len)?;
        if dest_pos.checked_add(len).map_or(true, |end| end > dest.len()) {
            return Err(BufferError::out_of_bounds(dest_pos, dest.len(), dest.len()));
        }
        let mut src = src_pos;
        let mut dst = dest_pos;
        let mut remaining = len;
        while remaining > 0 {
            let i = self.search_offsets(src);
            let sub = src - self.offsets[i];
            let take = remaining.min(self.bufs[i].capacity() - sub);
            self.bufs[i].copy_into(sub, dest, dst, take)?;
            src += take;
            dst += take;
            remaining -= take;
        }
        Ok(())
    }

    /// Copy `len` bytes starting at `src_pos` into another buffer.
    ///
    /// The copy iterates in reverse through a reverse cursor, so a
    /// destination overlapping this composite's memory is handled
    /// correctly.
    pub fn copy_into_buffer(
        &self,
        src_pos: Size,
        dest: &mut Buffer,
        dest_pos: Size,
        len: Size,
    ) -> BufferResult<()> {
        if !dest.is_accessible() {
            return Err(BufferError::BufferClosed);
        }
        if dest.read_only() {
            return Err(BufferError::ReadOnly);
        }
        self.check_copy_bounds(src_pos, len)?;
        if dest_pos.checked_add(len).map_or(true, |end| end > dest.capacity()) {
            return Err(BufferError::out_of_bounds(
                dest_pos,
                dest.capacity(),
                dest.capacity(),
            ));
        }
        if len == 0 {
            return Ok(());
        }
        // The reverse cursor yields 8-byte batches with the byte sequence
        // reversed; writing them little-endian restores the forward order.
        let mut cursor = self.reverse_cursor_parts(src_pos + len - 1, len);
        let prev_order = dest.order();
        dest.set_order(ByteOrder::LittleEndian);
        let result = (|| -> BufferResult<()> {
            let mut remaining = len;
            while let Some(value) = cursor.read_u64() {
                remaining -= 8;
                dest.set_u64(dest_pos + remaining, value)?;
            }
            while let Some(value) = cursor.read_u8() {
                remaining -= 1;
                dest.set_u8(dest_pos + remaining, value)?;
            }
            Ok(())
        })();
        dest.set_order(prev_order);
        result
    }

    // ---- cursors ------------------------------------------------------

    /// Iterate the readable bytes
    pub fn open_cursor(&self) -> BufferResult<CompositeByteCursor<'_>> {
        self.open_cursor_at(self.roff, self.readable_bytes())
    }

    /// Iterate `len` bytes starting at `from`, chaining component cursors
    pub fn open_cursor_at(&self, from: Size, len: Size) -> BufferResult<CompositeByteCursor<'_>> {
        if self.closed {
            return Err(BufferError::BufferClosed);
        }
        if from.checked_add(len).map_or(true, |end| end > self.capacity) {
            return Err(BufferError::out_of_bounds(from, self.woff, self.capacity));
        }
        Ok(self.cursor_parts(from, len))
    }

    fn cursor_parts(&self, from: Size, len: Size) -> CompositeByteCursor<'_> {
        let (buffer_index, cursor) = if len > 0 {
            let i = self.search_offsets(from);
            let off = from - self.offsets[i];
            let buf = &self.bufs[i];
            (i, buf.cursor_unchecked(off, len.min(buf.capacity() - off)))
        } else {
            (0, ByteCursor::new(std::ptr::null(), 0, 0))
        };
        CompositeByteCursor {
            bufs: &self.bufs,
            index: from,
            end: from + len,
            buffer_index,
            cursor,
        }
    }

    /// Iterate the readable bytes in reverse
    pub fn open_reverse_cursor(&self) -> BufferResult<CompositeReverseCursor<'_>> {
        if self.readable_bytes() == 0 {
            return self.open_reverse_cursor_at(0, 0);
        }
        self.open_reverse_cursor_at(self.woff - 1, self.readable_bytes())
    }

    /// Iterate `len` bytes in reverse, starting at `from` and walking down
    pub fn open_reverse_cursor_at(
        &self,
        from: Size,
        len: Size,
    ) -> BufferResult<CompositeReverseCursor<'_>> {
        if self.closed {
            return Err(BufferError::BufferClosed);
        }
        if len > 0 && from >= self.capacity {
            return Err(BufferError::out_of_bounds(from, self.woff, self.capacity));
        }
        if (from as i64) - (len as i64) < -1 {
            return Err(BufferError::out_of_bounds(from, self.woff, self.capacity));
        }
        Ok(self.reverse_cursor_parts(from, len))
    }

    fn reverse_cursor_parts(&self, from: Size, len: Size) -> CompositeReverseCursor<'_> {
        let (buffer_index, cursor) = if len > 0 {
            let i = self.search_offsets(from);
            let off = from - self.offsets[i];
            let buf = &self.bufs[i];
            (i, buf.reverse_cursor_unchecked(off, len.min(off + 1)))
        } else {
            (0, ReverseByteCursor::new(std::ptr::null(), 0, 0))
        };
        CompositeReverseCursor {
            bufs: &self.bufs,
            index: from as isize,
            end: from as isize - len as isize,
            buffer_index,
            cursor,
        }
    }

    // ---- growth and reshaping ----------------------------------------

    /// Guarantee room for `size` writable bytes, recycling consumed
    /// components when compaction is allowed and appending a freshly
    /// allocated component otherwise.
    pub fn ensure_writable(&mut self, size: Size) -> BufferResult<()> {
        self.ensure_writable_with(size, 1, true)
    }

    /// See [`CompositeBuffer::ensure_writable`]; growth appends a component
    /// of `max(size - writable_bytes, min_growth)` bytes from the
    /// composite's allocator.
    pub fn ensure_writable_with(
        &mut self,
        size: Size,
        min_growth: Size,
        allow_compaction: bool,
    ) -> BufferResult<()> {
        if self.closed {
            return Err(BufferError::BufferClosed);
        }
        if !self.is_owned() {
            return Err(BufferError::not_owned("ensure writable"));
        }
        if self.read_only {
            return Err(BufferError::ReadOnly);
        }
        if self.writable_bytes() >= size {
            return Ok(());
        }

        if allow_compaction && size <= self.roff {
            // Recycle as much as possible regardless of the requested size;
            // the work is amortized over future calls.
            let consumed = self
                .bufs
                .iter()
                .take_while(|b| b.capacity() == b.read_offset())
                .count();
            if consumed > 0 {
                let keep = self.bufs.len() - consumed;
                self.bufs.rotate_left(consumed);
                for buf in &mut self.bufs[keep..] {
                    buf.reset()?;
                }
                self.compute_offsets()?;
                if self.writable_bytes() >= size {
                    return Ok(());
                }
            } else if self.bufs.len() == 1 {
                // A single component can safely compact in place.
                self.bufs[0].compact()?;
                self.compute_offsets()?;
                if self.writable_bytes() >= size {
                    return Ok(());
                }
            }
        }

        let growth = (size - self.writable_bytes()).max(min_growth);
        limits::check_buffer_size(self.capacity as u64 + growth as u64)?;
        let mut extension = self.allocator.allocate(growth)?;
        extension.set_order(self.order);
        self.push_component(extension)
    }

    /// Append an externally allocated buffer as a new component, in place.
    ///
    /// Works as if the extension had been part of the original composition.
    /// Requires an owned composite; an empty composite adopts the
    /// extension's byte order and read-only state.
    pub fn extend_with(&mut self, extension: Buffer) -> BufferResult<()> {
        if self.closed {
            return Err(BufferError::BufferClosed);
        }
        if !self.is_owned() {
            return Err(BufferError::not_owned("extend"));
        }
        if !extension.is_accessible() {
            return Err(BufferError::BufferClosed);
        }
        if !self.bufs.is_empty() && extension.order() != self.order {
            return Err(BufferError::InvalidComposition(format!(
                "this buffer uses {} byte order and cannot be extended with {}",
                self.order,
                extension.order()
            )));
        }
        if !self.bufs.is_empty() && extension.read_only() != self.read_only {
            return Err(BufferError::InvalidComposition(
                "read-only state of the extension does not match".into(),
            ));
        }
        if extension.capacity() == 0 {
            // A zero-capacity extension changes nothing; dropping it here
            // closes it.
            return Ok(());
        }
        limits::check_buffer_size(self.capacity as u64 + extension.capacity() as u64)?;
        let adopt = self.bufs.is_empty();
        self.push_component(extension)?;
        if adopt {
            self.order = self.bufs[0].order();
            self.read_only = self.bufs[0].read_only();
        }
        Ok(())
    }

    /// Append every component of another composite, flattening it
    pub fn extend_with_composite(&mut self, extension: CompositeBuffer) -> BufferResult<()> {
        if self.closed {
            return Err(BufferError::BufferClosed);
        }
        if !self.is_owned() {
            return Err(BufferError::not_owned("extend"));
        }
        if extension.closed {
            return Err(BufferError::BufferClosed);
        }
        if !self.bufs.is_empty() && !extension.bufs.is_empty() {
            if extension.order != self.order {
                return Err(BufferError::InvalidComposition(
                    "byte order of the extension does not match".into(),
                ));
            }
            if extension.read_only != self.read_only {
                return Err(BufferError::InvalidComposition(
                    "read-only state of the extension does not match".into(),
                ));
            }
        }
        limits::check_buffer_size(self.capacity as u64 + extension.capacity as u64)?;
        let adopt = self.bufs.is_empty();
        let previous = self.bufs.len();
        let mut extension = extension;
        self.bufs.append(&mut extension.bufs);
        extension.closed = true;
        if let Err(e) = self.validate_after_extend() {
            self.bufs.truncate(previous);
            self.compute_offsets()
                .expect("restoring a previously valid composition cannot fail");
            return Err(e);
        }
        if adopt {
            if let Some(first) = self.bufs.first() {
                self.order = first.order();
                self.read_only = first.read_only();
            }
        }
        Ok(())
    }

    fn push_component(&mut self, extension: Buffer) -> BufferResult<()> {
        self.bufs.push(extension);
        if let Err(e) = self.validate_after_extend() {
            // Restore the previous composition; the rejected extension is
            // closed as it drops.
            self.bufs.pop();
            self.compute_offsets()
                .expect("restoring a previously valid composition cannot fail");
            return Err(e);
        }
        Ok(())
    }

    fn validate_after_extend(&mut self) -> BufferResult<()> {
        check_overlap(&self.bufs)?;
        self.compute_offsets()
    }

    // ---- split -------------------------------------------------------

    fn check_split(&self, at: Size) -> BufferResult<()> {
        if self.closed {
            return Err(BufferError::BufferClosed);
        }
        if at > self.capacity {
            return Err(BufferError::out_of_bounds(at, self.woff, self.capacity));
        }
        if !self.is_owned() {
            return Err(BufferError::not_owned("split"));
        }
        Ok(())
    }

    /// Partition into two disjoint owned composites: whole components ahead
    /// of the split move out, the straddling component is itself split, and
    /// the rest stays here with cursors shifted.
    pub fn split(&mut self, at: Size) -> BufferResult<CompositeBuffer> {
        self.check_split(at)?;
        if self.bufs.is_empty() {
            return self.assemble(Vec::new());
        }
        let i = self.search_offsets(at);
        let off = at - self.offsets[i];
        let fronts: Vec<Buffer> = if off == self.bufs[i].capacity() {
            self.bufs.drain(..=i).collect()
        } else if off == 0 {
            self.bufs.drain(..i).collect()
        } else {
            let mut fronts: Vec<Buffer> = self.bufs.drain(..i).collect();
            fronts.push(self.bufs[0].split(off)?);
            fronts
        };
        self.compute_offsets()?;
        self.assemble(fronts)
    }

    /// Split at the nearest component boundary at or below `at`;
    /// no component is ever broken.
    pub fn split_components_floor(&mut self, at: Size) -> BufferResult<CompositeBuffer> {
        self.check_split(at)?;
        if self.bufs.is_empty() {
            return self.assemble(Vec::new());
        }
        let mut i = self.search_offsets(at);
        if at - self.offsets[i] == self.bufs[i].capacity() {
            i += 1;
        }
        let fronts: Vec<Buffer> = self.bufs.drain(..i).collect();
        self.compute_offsets()?;
        self.assemble(fronts)
    }

    /// Split at the nearest component boundary at or above `at`;
    /// no component is ever broken.
    pub fn split_components_ceil(&mut self, at: Size) -> BufferResult<CompositeBuffer> {
        self.check_split(at)?;
        if self.bufs.is_empty() {
            return self.assemble(Vec::new());
        }
        let mut i = self.search_offsets(at);
        let off = at - self.offsets[i];
        if off > 0 && off <= self.bufs[i].capacity() {
            i += 1;
        }
        let fronts: Vec<Buffer> = self.bufs.drain(..i).collect();
        self.compute_offsets()?;
        self.assemble(fronts)
    }

    // ---- compact -----------------------------------------------------

    /// Move the readable bytes to the front of the composite.
    ///
    /// Bytes are walked front-to-back in 8-byte batches through the torn
    /// dispatch, then both cursors rewind. Consumed leading components are
    /// not deallocated; ensure-writable's recycling pass reuses them.
    pub fn compact(&mut self) -> BufferResult<()> {
        if self.closed {
            return Err(BufferError::BufferClosed);
        }
        if !self.is_owned() {
            return Err(BufferError::not_owned("compact"));
        }
        if self.read_only {
            return Err(BufferError::ReadOnly);
        }
        let distance = self.roff;
        if distance == 0 {
            return Ok(());
        }
        let readable = self.woff - self.roff;
        let mut pos = 0;
        while pos + 8 <= readable {
            let raw: [u8; 8] = self.get_raw(distance + pos)?;
            self.set_raw(pos, raw)?;
            pos += 8;
        }
        while pos < readable {
            let raw: [u8; 1] = self.get_raw(distance + pos)?;
            self.set_raw(pos, raw)?;
            pos += 1;
        }
        self.set_read_offset(0)?;
        self.set_write_offset(readable)?;
        Ok(())
    }

    // ---- component visits --------------------------------------------

    /// Visit every component with readable bytes. Returns the number of
    /// components visited, negated when the visitor stopped early.
    pub fn for_each_readable(
        &self,
        initial_index: usize,
        mut f: impl FnMut(usize, &ReadableComponent) -> bool,
    ) -> BufferResult<isize> {
        self.check_read(self.roff, self.readable_bytes().max(1))?;
        let mut visited: isize = 0;
        for buf in &self.bufs {
            if buf.readable_bytes() > 0 {
                let count = buf.for_each_readable(visited as usize + initial_index, &mut f)?;
                if count > 0 {
                    visited += count;
                } else {
                    visited = -visited + count;
                    break;
                }
            }
        }
        Ok(visited)
    }

    /// Visit every component with writable bytes, same protocol as
    /// [`CompositeBuffer::for_each_readable`].
    pub fn for_each_writable(
        &mut self,
        initial_index: usize,
        mut f: impl FnMut(usize, &mut WritableComponent) -> bool,
    ) -> BufferResult<isize> {
        self.check_write(self.woff, self.writable_bytes().max(1))?;
        let mut visited: isize = 0;
        for buf in &mut self.bufs {
            if buf.writable_bytes() > 0 {
                let count = buf.for_each_writable(visited as usize + initial_index, &mut f)?;
                if count > 0 {
                    visited += count;
                } else {
                    visited = -visited + count;
                    break;
                }
            }
        }
        Ok(visited)
    }

    // ---- ownership transitions ---------------------------------------

    /// Invalidate this composite and hand all components to a one-shot
    /// transfer token. Requires the composite and every component to be
    /// owned.
    pub fn send(&mut self) -> BufferResult<SendToken<CompositeBuffer>> {
        if self.closed {
            return Err(BufferError::BufferClosed);
        }
        if !self.is_owned() {
            return Err(BufferError::not_owned("send"));
        }
        let payload = CompositeBuffer {
            allocator: self.allocator.clone(),
            bufs: std::mem::take(&mut self.bufs),
            offsets: std::mem::take(&mut self.offsets),
            capacity: self.capacity,
            roff: self.roff,
            woff: self.woff,
            order: self.order,
            read_only: self.read_only,
            closed: false,
        };
        self.make_inaccessible();
        Ok(SendToken::new(payload))
    }

    /// Close this composite and every component it holds
    pub fn close(&mut self) -> BufferResult<()> {
        if self.closed {
            return Err(BufferError::BufferClosed);
        }
        self.bufs.clear();
        self.make_inaccessible();
        Ok(())
    }

    fn make_inaccessible(&mut self) {
        self.bufs.clear();
        self.offsets.clear();
        self.capacity = 0;
        self.roff = 0;
        self.woff = 0;
        self.read_only = false;
        self.closed = true;
    }

    // ---- dispatch ----------------------------------------------------

    #[inline]
    fn search_offsets(&self, index: Size) -> usize {
        self.offsets.partition_point(|&o| o <= index) - 1
    }

    // Raw transfer layer shared with the generated accessors. Streaming
    // forms keep component cursors in lockstep; indexed forms touch no
    // cursor. Boundary-straddling accesses are torn into single bytes that
    // go through the owning component's own accessors.

    pub(crate) fn read_raw<const N: usize>(&mut self) -> BufferResult<[u8; N]> {
        self.check_read(self.roff, N)?;
        let mut out = [0u8; N];
        let i = self.search_offsets(self.roff);
        let sub = self.roff - self.offsets[i];
        if sub + N <= self.bufs[i].capacity() {
            debug_assert_eq!(self.bufs[i].read_offset(), sub);
            out = self.bufs[i].read_raw::<N>()?;
        } else {
            for (j, slot) in out.iter_mut().enumerate() {
                let k = self.search_offsets(self.roff + j);
                *slot = self.bufs[k].read_u8()?;
            }
        }
        self.roff += N;
        Ok(out)
    }

    pub(crate) fn write_raw<const N: usize>(&mut self, bytes: [u8; N]) -> BufferResult<()> {
        self.check_write(self.woff, N)?;
        let i = self.search_offsets(self.woff);
        let sub = self.woff - self.offsets[i];
        if sub + N <= self.bufs[i].capacity() {
            debug_assert_eq!(self.bufs[i].write_offset(), sub);
            self.bufs[i].write_raw::<N>(bytes)?;
        } else {
            for (j, byte) in bytes.iter().enumerate() {
                let k = self.search_offsets(self.woff + j);
                self.bufs[k].write_u8(*byte)?;
            }
        }
        self.woff += N;
        Ok(())
    }

    pub(crate) fn get_raw<const N: usize>(&self, index: Size) -> BufferResult<[u8; N]> {
        self.check_get(index, N)?;
        let mut out = [0u8; N];
        let i = self.search_offsets(index);
        let sub = index - self.offsets[i];
        if sub + N <= self.bufs[i].capacity() {
            out = self.bufs[i].get_raw::<N>(sub)?;
        } else {
            for (j, slot) in out.iter_mut().enumerate() {
                let k = self.search_offsets(index + j);
                *slot = self.bufs[k].get_u8(index + j - self.offsets[k])?;
            }
        }
        Ok(out)
    }

    pub(crate) fn set_raw<const N: usize>(&mut self, index: Size, bytes: [u8; N]) -> BufferResult<()> {
        self.check_set(index, N)?;
        let i = self.search_offsets(index);
        let sub = index - self.offsets[i];
        if sub + N <= self.bufs[i].capacity() {
            self.bufs[i].set_raw::<N>(sub, bytes)?;
        } else {
            for (j, byte) in bytes.iter().enumerate() {
                let k = self.search_offsets(index + j);
                self.bufs[k].set_u8(index + j - self.offsets[k], *byte)?;
            }
        }
        Ok(())
    }

    // ---- bounds discipline -------------------------------------------

    #[inline]
    fn check_read(&self, index: Size, size: Size) -> BufferResult<()> {
        if self.closed {
            return Err(BufferError::BufferClosed);
        }
        if index.checked_add(size).map_or(true, |end| end > self.woff) {
            return Err(BufferError::out_of_bounds(index, self.woff, self.capacity));
        }
        Ok(())
    }

    #[inline]
    fn check_get(&self, index: Size, size: Size) -> BufferResult<()> {
        if self.closed {
            return Err(BufferError::BufferClosed);
        }
        if index.checked_add(size).map_or(true, |end| end > self.capacity) {
            return Err(BufferError::out_of_bounds(index, self.woff, self.capacity));
        }
        Ok(())
    }

    #[inline]
    fn check_write(&self, index: Size, size: Size) -> BufferResult<()> {
        if self.closed {
            return Err(BufferError::BufferClosed);
        }
        if self.read_only {
            return Err(BufferError::ReadOnly);
        }
        if index.checked_add(size).map_or(true, |end| end > self.capacity) {
            return Err(BufferError::out_of_bounds(index, self.woff, self.capacity));
        }
        Ok(())
    }

    #[inline]
    fn check_set(&self, index: Size, size: Size) -> BufferResult<()> {
        self.check_write(index, size)
    }

    fn check_copy_bounds(&self, src_pos: Size, len: Size) -> BufferResult<()> {
        if self.closed {
            return Err(BufferError::BufferClosed);
        }
        if src_pos.checked_add(len).map_or(true, |end| end > self.capacity) {
            return Err(BufferError::out_of_bounds(src_pos, self.woff, self.capacity));
        }
        Ok(())
    }
}

standard_accessor_matrix!(CompositeBuffer);
medium_accessor_matrix!(CompositeBuffer);

/// Writable components must not overlap in memory: with move semantics,
/// duplicate component objects cannot exist, so overlapping writable
/// regions are what duplicate detection means here. Read-only components
/// may alias freely.
fn check_overlap(bufs: &[Buffer]) -> BufferResult<()> {
    let mut ranges: Vec<(usize, usize)> = bufs
        .iter()
        .filter(|b| !b.read_only())
        .map(|b| {
            let start = b.region.as_ptr() as usize;
            (start, start + b.capacity())
        })
        .collect();
    ranges.sort_unstable();
    for pair in ranges.windows(2) {
        if pair[1].0 < pair[0].1 {
            return Err(BufferError::InvalidComposition(
                "constituent buffers overlap in memory".into(),
            ));
        }
    }
    Ok(())
}

impl std::fmt::Debug for CompositeBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "CompositeBuffer[roff:{}, woff:{}, cap:{}, components:{}]",
            self.roff,
            self.woff,
            self.capacity,
            self.bufs.len()
        )
    }
}

/// Forward cursor chaining the component cursors of a composite.
pub struct CompositeByteCursor<'a> {
    bufs: &'a [Buffer],
    index: Size,
    end: Size,
    buffer_index: usize,
    cursor: ByteCursor<'a>,
}

impl<'a> CompositeByteCursor<'a> {
    /// Next 8 bytes as a big-endian value, if at least 8 remain.
    /// Boundary-straddling batches are assembled byte by byte.
    pub fn read_u64(&mut self) -> Option<u64> {
        if let Some(value) = self.cursor.read_u64() {
            self.index += 8;
            return Some(value);
        }
        if self.bytes_left() >= 8 {
            if self.cursor.bytes_left() == 0 {
                self.next_cursor();
                if let Some(value) = self.cursor.read_u64() {
                    self.index += 8;
                    return Some(value);
                }
            }
            let mut value = 0u64;
            for _ in 0..8 {
                value = value << 8 | self.read_u8().expect("8 bytes were available") as u64;
            }
            return Some(value);
        }
        None
    }

    /// Next byte, crossing component boundaries as needed
    pub fn read_u8(&mut self) -> Option<u8> {
        if let Some(value) = self.cursor.read_u8() {
            self.index += 1;
            return Some(value);
        }
        if self.bytes_left() > 0 {
            self.next_cursor();
            let value = self.cursor.read_u8().expect("next component is non-empty");
            self.index += 1;
            return Some(value);
        }
        None
    }

    fn next_cursor(&mut self) {
        self.buffer_index += 1;
        let buf = &self.bufs[self.buffer_index];
        let len = buf.capacity().min(self.end - self.index);
        self.cursor = buf.cursor_unchecked(0, len);
    }

    /// Offset of the next unread byte
    pub fn current_offset(&self) -> Size {
        self.index
    }

    /// Bytes remaining
    pub fn bytes_left(&self) -> Size {
        self.end - self.index
    }
}

/// Reverse cursor chaining the component cursors of a composite.
pub struct CompositeReverseCursor<'a> {
    bufs: &'a [Buffer],
    index: isize,
    end: isize,
    buffer_index: usize,
    cursor: ReverseByteCursor<'a>,
}

impl<'a> CompositeReverseCursor<'a> {
    /// Next 8 bytes walking downward, reversed into big-endian packing
    pub fn read_u64(&mut self) -> Option<u64> {
        if let Some(value) = self.cursor.read_u64() {
            self.index -= 8;
            return Some(value);
        }
        if self.bytes_left() >= 8 {
            if self.cursor.bytes_left() == 0 {
                self.next_cursor();
                if let Some(value) = self.cursor.read_u64() {
                    self.index -= 8;
                    return Some(value);
                }
            }
            let mut value = 0u64;
            for _ in 0..8 {
                value = value << 8 | self.read_u8().expect("8 bytes were available") as u64;
            }
            return Some(value);
        }
        None
    }

    /// Next byte walking downward, crossing component boundaries
    pub fn read_u8(&mut self) -> Option<u8> {
        if let Some(value) = self.cursor.read_u8() {
            self.index -= 1;
            return Some(value);
        }
        if self.bytes_left() > 0 {
            self.next_cursor();
            let value = self.cursor.read_u8().expect("next component is non-empty");
            self.index -= 1;
            return Some(value);
        }
        None
    }

    fn next_cursor(&mut self) {
        self.buffer_index -= 1;
        let buf = &self.bufs[self.buffer_index];
        let len = buf.capacity().min(self.bytes_left());
        self.cursor = buf.reverse_cursor_unchecked(buf.capacity() - 1, len);
    }

    /// Offset of the next unread byte; -1 once exhausted at the front
    pub fn current_offset(&self) -> isize {
        self.index
    }

    /// Bytes remaining
    pub fn bytes_left(&self) -> Size {
        (self.index - self.end) as Size
    }
}
