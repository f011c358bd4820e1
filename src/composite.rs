//! Components B and C: the position/limit buffer surface, and the
//! composite buffer built over it.
//!
//! A composite presents a chain of [`Segment`]s -- each a window
//! `[mark, limit)` into a refcounted [`Region`] -- as one logical buffer.
//! Splitting, inserting, and deleting never copy region bytes: they only
//! rearrange segment metadata, which is why `put`/`delete` are the
//! backbone the MIME parser (component D) uses to grow its input window
//! one chunk at a time and shed consumed bytes without reallocating.
//!
//! Segments live in an arena (`Vec<Option<Segment>>` plus a free list) and
//! are linked by index rather than by intrusive `Rc`/`RefCell` pointers,
//! per the design notes: no cyclic strong ownership, explicit indices.
//!
//! `Composite` is also this crate's sole implementation of the
//! position/limit/mark "cursor" surface (component B): nothing downstream
//! ever needs a standalone single-region cursor distinct from a
//! one-segment composite, so there is no separate `CursorBuffer` type --
//! see `DESIGN.md`. `slices`/`slices_from` satisfy the "exactly one
//! native slice for a plain buffer, many for a composite" iteration
//! requirement uniformly: a composite with one live segment yields one
//! slice.

use crate::error::Error;
use crate::region::Region;

/// Shared read/write position-and-limit surface (the "capability set" the
/// design notes call for, without an inheritance hierarchy).
pub trait Buffer {
    fn position(&self) -> usize;
    fn set_position(&mut self, pos: usize) -> Result<(), Error>;
    fn limit(&self) -> usize;
    fn set_limit(&mut self, lim: usize) -> Result<(), Error>;
    fn capacity(&self) -> usize;
    fn is_read_only(&self) -> bool;

    fn remaining(&self) -> usize {
        self.limit() - self.position()
    }

    fn has_remaining(&self) -> bool {
        self.remaining() > 0
    }
}

/// One window `[mark, limit)` into a region, linked into the composite's chain.
struct Segment {
    region: Region,
    mark: usize,
    limit: usize,
    prev: Option<usize>,
    next: Option<usize>,
}

impl Segment {
    fn len(&self) -> usize {
        self.limit - self.mark
    }

    fn byte_at(&self, region_abs: usize) -> u8 {
        self.region.bytes()[region_abs]
    }
}

/// The composite byte buffer (component C).
pub struct Composite {
    arena: Vec<Option<Segment>>,
    free: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
    current: Option<usize>,
    current_start: usize,
    position: usize,
    limit: usize,
    capacity: usize,
    read_only: bool,
}

impl Composite {
    pub fn empty() -> Composite {
        Composite {
            arena: Vec::new(),
            free: Vec::new(),
            head: None,
            tail: None,
            current: None,
            current_start: 0,
            position: 0,
            limit: 0,
            capacity: 0,
            read_only: false,
        }
    }

    fn alloc(&mut self, seg: Segment) -> usize {
        if let Some(idx) = self.free.pop() {
            self.arena[idx] = Some(seg);
            idx
        } else {
            self.arena.push(Some(seg));
            self.arena.len() - 1
        }
    }

    fn seg(&self, idx: usize) -> &Segment {
        self.arena[idx].as_ref().expect("dangling segment index")
    }

    fn seg_mut(&mut self, idx: usize) -> &mut Segment {
        self.arena[idx].as_mut().expect("dangling segment index")
    }

    /// Locate the segment covering logical position `pos`, or the next
    /// non-empty segment if `pos` lands exactly on a boundary. Refreshes
    /// `current`/`current_start`.
    fn locate(&mut self, pos: usize) {
        let mut idx = self.head;
        let mut start = 0usize;
        while let Some(i) = idx {
            let len = self.seg(i).len();
            if len == 0 {
                idx = self.seg(i).next;
                continue;
            }
            if pos < start + len {
                self.current = Some(i);
                self.current_start = start;
                return;
            }
            start += len;
            idx = self.seg(i).next;
        }
        self.current = None;
        self.current_start = start;
    }

    /// Append a whole region as a new tail segment, unconditionally.
    fn append_region(&mut self, region: Region) {
        let len = region.len();
        let idx = self.alloc(Segment {
            region,
            mark: 0,
            limit: len,
            prev: self.tail,
            next: None,
        });
        match self.tail {
            Some(t) => self.seg_mut(t).next = Some(idx),
            None => self.head = Some(idx),
        }
        self.tail = Some(idx);
    }

    /// Offer a chunk of freshly-arrived bytes into the composite, as a new
    /// tail segment wrapping a fresh [`Region`] (refcount 1, owned by this
    /// composite alone until the caller retains it further).
    pub fn offer(&mut self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        let region = Region::new(bytes.to_vec());
        let len = region.len();
        self.append_region(region);
        self.capacity += len;
        self.limit += len;
        if self.current.is_none() {
            self.locate(self.position);
        }
    }

    /// Absolute get (component C §4.3.1): walk from head, translating the
    /// composite-absolute index into a region-absolute index.
    pub fn get(&self, i: usize) -> Result<u8, Error> {
        if i >= self.limit {
            return Err(Error::InvalidBoundaryRange);
        }
        let mut idx = self.head;
        let mut acc = 0usize;
        while let Some(s) = idx {
            let seg = self.seg(s);
            let len = seg.len();
            if i < acc + len {
                return Ok(seg.byte_at(seg.mark + (i - acc)));
            }
            acc += len;
            idx = seg.next;
        }
        Err(Error::InvalidBoundaryRange)
    }

    /// Relative get (component C §4.3.2): reads at `position`, advances it.
    pub fn get_relative(&mut self) -> Result<u8, Error> {
        if self.position >= self.limit {
            return Err(Error::BufferUnderflow);
        }
        if self.current.is_none() || self.position < self.current_start {
            self.locate(self.position);
        }
        let cur = self.current.ok_or(Error::BufferUnderflow)?;
        if self.position >= self.current_start + self.seg(cur).len() {
            self.locate(self.position);
        }
        let cur = self.current.ok_or(Error::BufferUnderflow)?;
        let seg = self.seg(cur);
        let local = self.position - self.current_start;
        let byte = seg.byte_at(seg.mark + local);
        self.position += 1;
        Ok(byte)
    }

    /// Copy `len` bytes starting at absolute `pos`, without moving `position`.
    pub fn copy_range(&self, pos: usize, len: usize) -> Result<Vec<u8>, Error> {
        if pos + len > self.limit {
            return Err(Error::InvalidBoundaryRange);
        }
        let mut out = Vec::with_capacity(len);
        let mut idx = self.head;
        let mut acc = 0usize;
        while let Some(s) = idx {
            let seg = self.seg(s);
            let seg_len = seg.len();
            let seg_start = acc;
            let seg_end = acc + seg_len;
            let want_start = pos.max(seg_start);
            let want_end = (pos + len).min(seg_end);
            if want_start < want_end {
                let lo = seg.mark + (want_start - seg_start);
                let hi = seg.mark + (want_end - seg_start);
                out.extend_from_slice(&seg.region.bytes()[lo..hi]);
            }
            if seg_end >= pos + len {
                break;
            }
            acc = seg_end;
            idx = seg.next;
        }
        Ok(out)
    }

    /// Component C §4.3.3: move `position`, refreshing `current`.
    pub fn position_to(&mut self, new_pos: usize) -> Result<(), Error> {
        if new_pos > self.limit {
            return Err(Error::InvalidBoundaryRange);
        }
        self.position = new_pos;
        self.locate(new_pos);
        Ok(())
    }

    /// Insert `region` at absolute position `pos` without copying bytes
    /// (component C §4.3.4).
    pub fn put(&mut self, region: Region, pos: usize) -> Result<(), Error> {
        if self.read_only {
            return Err(Error::ReadOnlyViolation);
        }
        if pos > self.limit {
            return Err(Error::InvalidBoundaryRange);
        }
        let inserted_len = region.len();

        if pos == 0 {
            let idx = self.alloc(Segment {
                region,
                mark: 0,
                limit: inserted_len,
                prev: None,
                next: self.head,
            });
            if let Some(h) = self.head {
                self.seg_mut(h).prev = Some(idx);
            }
            self.head = Some(idx);
            if self.tail.is_none() {
                self.tail = Some(idx);
            }
        } else if pos == self.limit {
            self.append_region(region);
        } else {
            // Locate the segment containing pos and its logical start.
            let mut idx = self.head;
            let mut start = 0usize;
            loop {
                let i = idx.expect("pos within limit must hit a segment");
                let len = self.seg(i).len();
                if pos < start + len || (pos == start && len > 0) {
                    break;
                }
                start += len;
                idx = self.seg(i).next;
            }
            let at = idx.unwrap();

            if pos == start {
                // Insert the new segment directly before `at`.
                let new_idx = self.alloc(Segment {
                    region,
                    mark: 0,
                    limit: inserted_len,
                    prev: self.seg(at).prev,
                    next: Some(at),
                });
                let prev = self.seg(at).prev;
                if let Some(p) = prev {
                    self.seg_mut(p).next = Some(new_idx);
                } else {
                    self.head = Some(new_idx);
                }
                self.seg_mut(at).prev = Some(new_idx);
            } else {
                // Split `at` at local offset `pos - start`.
                let local = pos - start;
                let (orig_mark, orig_limit, orig_region, orig_next) = {
                    let seg = self.seg(at);
                    (seg.mark, seg.limit, seg.region.clone(), seg.next)
                };
                let split_point = orig_mark + local;

                self.seg_mut(at).limit = split_point;

                let new_idx = self.alloc(Segment {
                    region,
                    mark: 0,
                    limit: inserted_len,
                    prev: Some(at),
                    next: None, // linked below
                });
                let tail_idx = self.alloc(Segment {
                    region: orig_region,
                    mark: split_point,
                    limit: orig_limit,
                    prev: Some(new_idx),
                    next: orig_next,
                });
                self.seg_mut(new_idx).next = Some(tail_idx);
                self.seg_mut(at).next = Some(new_idx);
                match orig_next {
                    Some(n) => self.seg_mut(n).prev = Some(tail_idx),
                    None => self.tail = Some(tail_idx),
                }
            }
        }

        self.capacity += inserted_len;
        self.limit += inserted_len;
        if self.position > pos {
            self.position += inserted_len;
        }
        self.locate(self.position);
        Ok(())
    }

    /// Remove `len` bytes starting at absolute `pos`, without copying the
    /// surviving bytes (component C §4.3.5).
    pub fn delete(&mut self, pos: usize, len: usize) -> Result<(), Error> {
        if self.read_only {
            return Err(Error::ReadOnlyViolation);
        }
        if len == 0 {
            return Ok(());
        }
        if pos + len > self.capacity {
            return Err(Error::InvalidBoundaryRange);
        }

        // Find the first segment touched and its logical start.
        let mut idx = self.head;
        let mut start = 0usize;
        loop {
            let i = idx.expect("pos within capacity must hit a segment");
            let seg_len = self.seg(i).len();
            if pos < start + seg_len || (pos == start && seg_len == 0 && pos == start) {
                break;
            }
            start += seg_len;
            idx = self.seg(i).next;
        }

        let mut remaining = len;
        let mut cur = idx;
        let mut cur_start = start;

        while remaining > 0 {
            let i = cur.expect("ran out of segments before deleting requested length");
            let (mark, limit, next, prev) = {
                let s = self.seg(i);
                (s.mark, s.limit, s.next, s.prev)
            };
            let seg_len = limit - mark;
            let local_offset = pos.max(cur_start) - cur_start;
            let available = seg_len - local_offset;
            let take = remaining.min(available);

            let next_cur = if local_offset == 0 && take == seg_len {
                // Remove entirely.
                if let Some(p) = prev {
                    self.seg_mut(p).next = next;
                } else {
                    self.head = next;
                }
                if let Some(n) = next {
                    self.seg_mut(n).prev = prev;
                } else {
                    self.tail = prev;
                }
                self.arena[i] = None;
                self.free.push(i);
                next
            } else if local_offset == 0 {
                // Shrink left: deleted prefix starts at the segment base.
                self.seg_mut(i).mark = mark + take;
                next
            } else if local_offset + take == seg_len {
                // Shrink right: deleted suffix reaches the segment limit.
                self.seg_mut(i).limit = limit - take;
                next
            } else {
                // Interior hole: split into two read-only segments around it.
                let region = self.seg(i).region.clone();
                let left_limit = mark + local_offset;
                let right_mark = left_limit + take;
                self.seg_mut(i).limit = left_limit;
                let right_idx = self.alloc(Segment {
                    region,
                    mark: right_mark,
                    limit,
                    prev: Some(i),
                    next,
                });
                self.seg_mut(i).next = Some(right_idx);
                match next {
                    Some(n) => self.seg_mut(n).prev = Some(right_idx),
                    None => self.tail = Some(right_idx),
                }
                Some(right_idx)
            };

            cur_start += seg_len;
            remaining -= take;
            cur = next_cur;
        }

        self.capacity -= len;
        self.limit -= len;
        if self.position >= pos + len {
            self.position -= len;
        } else if self.position >= pos {
            self.position = pos;
        }
        self.locate(self.position);
        Ok(())
    }

    /// A read-only projection. Idempotent: calling it again on an
    /// already-read-only composite yields an equivalent read-only one.
    pub fn as_read_only(&self) -> Composite {
        let mut dup = self.duplicate();
        dup.read_only = true;
        dup
    }

    /// Deep-copies the segment chain, retaining each underlying region
    /// (component C §4.3.7). The duplicate's `current` mirrors the original's.
    pub fn duplicate(&self) -> Composite {
        let mut arena = Vec::with_capacity(self.arena.len());
        for slot in &self.arena {
            arena.push(slot.as_ref().map(|seg| {
                seg.region.retain(1);
                Segment {
                    region: seg.region.clone(),
                    mark: seg.mark,
                    limit: seg.limit,
                    prev: seg.prev,
                    next: seg.next,
                }
            }));
        }
        Composite {
            arena,
            free: self.free.clone(),
            head: self.head,
            tail: self.tail,
            current: self.current,
            current_start: self.current_start,
            position: self.position,
            limit: self.limit,
            capacity: self.capacity,
            read_only: self.read_only,
        }
    }

    /// Forward `retain` to every live segment's region (component C §4.3.8).
    pub fn retain(&self, k: usize) {
        for slot in &self.arena {
            if let Some(seg) = slot {
                seg.region.retain(k);
            }
        }
    }

    /// Forward `release` to every live segment's region (component C §4.3.8).
    pub fn release(&self, k: usize) {
        for slot in &self.arena {
            if let Some(seg) = slot {
                seg.region.release(k);
            }
        }
    }

    /// Flatten the full `[0, capacity)` window into one owned `Vec<u8>`.
    /// For tests and small debugging aids only -- production code paths
    /// should prefer `copy_range`/`get`/`slices` to stay zero-copy.
    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.capacity);
        let mut idx = self.head;
        while let Some(i) = idx {
            let seg = self.seg(i);
            out.extend_from_slice(&seg.region.bytes()[seg.mark..seg.limit]);
            idx = seg.next;
        }
        out
    }

    /// Iterate the native slices backing `[0, limit)`, borrowed straight
    /// out of each segment's region: one slice for a single-segment
    /// composite, one per live segment otherwise. No bytes are copied.
    pub fn slices(&self) -> Slices<'_> {
        self.slices_from(0)
    }

    /// As [`Composite::slices`], but starting at absolute position `pos`
    /// instead of `0`. This is what the MIME parser scans over: it avoids
    /// materializing `[position, limit)` into an owned buffer on every
    /// search, which `copy_range` would do unconditionally.
    pub fn slices_from(&self, pos: usize) -> Slices<'_> {
        let mut idx = self.head;
        let mut start = 0usize;
        while let Some(i) = idx {
            let len = self.seg(i).len();
            if len == 0 {
                idx = self.seg(i).next;
                continue;
            }
            if pos < start + len {
                break;
            }
            start += len;
            idx = self.seg(i).next;
        }
        Slices {
            composite: self,
            idx,
            seg_start: start,
            pos,
            limit: self.limit,
        }
    }
}

/// Borrowed iterator over a composite's native backing slices, yielded by
/// [`Composite::slices`]/[`Composite::slices_from`].
pub struct Slices<'a> {
    composite: &'a Composite,
    idx: Option<usize>,
    seg_start: usize,
    pos: usize,
    limit: usize,
}

impl<'a> Iterator for Slices<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<&'a [u8]> {
        loop {
            let i = self.idx?;
            if self.pos >= self.limit || self.seg_start >= self.limit {
                return None;
            }
            let seg = self.composite.seg(i);
            let len = seg.len();
            if len == 0 {
                self.idx = seg.next;
                continue;
            }
            let seg_end = self.seg_start + len;
            let local_start = self.pos.max(self.seg_start) - self.seg_start;
            let local_end = self.limit.min(seg_end) - self.seg_start;
            self.idx = seg.next;
            if local_start >= local_end {
                self.seg_start = seg_end;
                continue;
            }
            let lo = seg.mark + local_start;
            let hi = seg.mark + local_end;
            self.pos = self.seg_start + local_end;
            self.seg_start = seg_end;
            return Some(&seg.region.bytes()[lo..hi]);
        }
    }
}

impl Buffer for Composite {
    fn position(&self) -> usize {
        self.position
    }

    fn set_position(&mut self, pos: usize) -> Result<(), Error> {
        self.position_to(pos)
    }

    fn limit(&self) -> usize {
        self.limit
    }

    fn set_limit(&mut self, lim: usize) -> Result<(), Error> {
        if lim > self.capacity {
            return Err(Error::InvalidBoundaryRange);
        }
        self.limit = lim;
        if self.position > lim {
            self.position = lim;
        }
        Ok(())
    }

    fn capacity(&self) -> usize {
        self.capacity
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }
}
