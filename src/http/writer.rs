//! Two-slot scatter/gather write state.
//!
//! Slot 0 is the serialized head (status line and headers), slot 1 the body.
//! A vectored write may stop anywhere; [`IoSegments::advance`] records how
//! far each slot got so the next attempt resumes at the exact byte.

use std::io::{self, IoSlice, Write};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Segment {
    pub offset: usize,
    pub len: usize,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct IoSegments {
    slots: [Segment; 2],
    count: usize,
}

impl IoSegments {
    pub fn new(head_len: usize, body_len: usize) -> Self {
        Self {
            slots: [
                Segment {
                    offset: 0,
                    len: head_len,
                },
                Segment {
                    offset: 0,
                    len: body_len,
                },
            ],
            count: if body_len > 0 { 2 } else { 1 },
        }
    }

    /// Number of active slots.
    pub fn count(&self) -> usize {
        self.count
    }

    pub fn segment(&self, i: usize) -> Segment {
        self.slots[i]
    }

    /// Bytes still to be written across both slots.
    pub fn remaining(&self) -> usize {
        self.slots[0].len + self.slots[1].len
    }

    pub fn is_done(&self) -> bool {
        self.remaining() == 0
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Accounts for `n` written bytes, head first.
    pub fn advance(&mut self, n: usize) {
        let [head, body] = &mut self.slots;
        if n > head.len {
            let into_body = (n - head.len).min(body.len);
            body.offset += into_body;
            body.len -= into_body;
            head.offset += head.len;
            head.len = 0;
        } else {
            head.offset += n;
            head.len -= n;
        }
    }

    /// One vectored write of the pending parts of `head` and `body`.
    ///
    /// `head` and `body` must be the same slices on every call of one exchange.
    pub fn write_to<W: Write + ?Sized>(
        &mut self,
        dst: &mut W,
        head: &[u8],
        body: &[u8],
    ) -> io::Result<usize> {
        let [h, b] = self.slots;
        let slices = [
            IoSlice::new(&head[h.offset..h.offset + h.len]),
            IoSlice::new(&body[b.offset..b.offset + b.len]),
        ];
        let n = dst.write_vectored(&slices[..self.count])?;
        self.advance(n);
        Ok(n)
    }
}
