use core::marker::PhantomData;

use crate::headers::{Header, Ipv4Hdr};

/// Why a header could not be taken from the remaining span.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CursorError {
    /// The header would extend past the end of the packet.
    OutOfBounds,
    /// The header fits but describes itself inconsistently (wrong IP
    /// version, IHL below the fixed header size).
    Malformed,
}

/// Borrowed window `[start, end)` over one packet.
///
/// The lifetime ties every header view derived from it to the buffer, so
/// views cannot outlive the invocation that produced them.
#[derive(Copy, Clone, Debug)]
pub struct PacketView<'a> {
    start: usize,
    end: usize,
    _bytes: PhantomData<&'a [u8]>,
}

impl<'a> PacketView<'a> {
    pub fn from_slice(bytes: &'a [u8]) -> Self {
        let start = bytes.as_ptr() as usize;
        Self {
            start,
            end: start + bytes.len(),
            _bytes: PhantomData,
        }
    }

    /// Builds a view from the raw `data`/`data_end` pair of a packet context.
    ///
    /// # Safety
    ///
    /// `[start, end)` must be readable for `'a` and must not be written while
    /// the view or anything derived from it is alive.
    #[inline(always)]
    pub unsafe fn from_raw(start: usize, end: usize) -> Self {
        Self {
            start,
            end,
            _bytes: PhantomData,
        }
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline(always)]
    pub fn cursor(&self) -> HeaderCursor<'a> {
        HeaderCursor {
            pos: self.start,
            end: self.end,
            _bytes: PhantomData,
        }
    }
}

/// Position inside a [`PacketView`]. Advancing consumes the cursor and
/// returns a new one, and only after the bytes being skipped were proven to
/// lie inside the view.
#[derive(Copy, Clone, Debug)]
pub struct HeaderCursor<'a> {
    pos: usize,
    end: usize,
    _bytes: PhantomData<&'a [u8]>,
}

impl<'a> HeaderCursor<'a> {
    #[inline(always)]
    pub fn remaining(&self) -> usize {
        self.end.saturating_sub(self.pos)
    }

    /// Views a `T` at the cursor and advances past it.
    ///
    /// The comparison is written against `end` directly so the verifier sees
    /// a packet-pointer bound check before the access.
    #[inline(always)]
    pub fn take<T: Header>(self) -> Result<(&'a T, HeaderCursor<'a>), CursorError> {
        if self.pos + T::LEN > self.end {
            return Err(CursorError::OutOfBounds);
        }
        // SAFETY: `[pos, pos + LEN)` lies inside the view, `T` has alignment 1
        // and is valid for any byte pattern.
        let header = unsafe { &*(self.pos as *const T) };
        Ok((
            header,
            HeaderCursor {
                pos: self.pos + T::LEN,
                ..self
            },
        ))
    }

    /// Views an IPv4 header and advances past its declared length, options
    /// included.
    ///
    /// Two bounds checks run before the cursor moves: the fixed 20 bytes, then
    /// the full `ihl * 4` bytes.
    #[inline(always)]
    pub fn take_ipv4(self) -> Result<(&'a Ipv4Hdr, HeaderCursor<'a>), CursorError> {
        let (ip, _) = self.take::<Ipv4Hdr>()?;
        if ip.version() != 4 {
            return Err(CursorError::Malformed);
        }
        let header_len = ip.header_len();
        if header_len < Ipv4Hdr::LEN {
            return Err(CursorError::Malformed);
        }
        if self.pos + header_len > self.end {
            return Err(CursorError::OutOfBounds);
        }
        Ok((
            ip,
            HeaderCursor {
                pos: self.pos + header_len,
                ..self
            },
        ))
    }
}
