// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Packet buffer abstraction.
//!
//! The forwarding core never owns driver memory directly: it works against
//! these traits, and the driver supplies the concrete buffer type. The
//! [`TestBuffer`] implementation (behind the `test_buffer` feature) backs the
//! loopback driver and every unit test.

/// Read access to a contiguous frame.
pub trait PacketBuffer {
    /// The frame bytes, L2 header first.
    fn as_slice(&self) -> &[u8];

    /// Total frame length in bytes.
    fn len(&self) -> usize {
        self.as_slice().len()
    }

    /// True if the frame holds no bytes.
    fn is_empty(&self) -> bool {
        self.as_slice().is_empty()
    }
}

/// Mutable access plus the two reshaping operations header rewriting needs.
///
/// `open_gap` and `close_gap` move the bytes *in front of* the edit point,
/// which is always the smaller side for L3 encap/decap.
pub trait PacketBufferMut: PacketBuffer {
    /// The frame bytes, mutable.
    fn as_mut_slice(&mut self) -> &mut [u8];

    /// Open a `len`-byte gap starting at byte `at`, growing the frame.
    ///
    /// Bytes `[0, at)` shift toward the front (into headroom); the gap's
    /// contents are unspecified until written.
    ///
    /// # Errors
    ///
    /// Returns [`BufferError`] when headroom is exhausted or `at` is out of
    /// bounds.
    fn open_gap(&mut self, at: usize, len: usize) -> Result<(), BufferError>;

    /// Remove `len` bytes starting at byte `at`, shrinking the frame.
    ///
    /// Bytes `[0, at)` shift toward the back.
    ///
    /// # Errors
    ///
    /// Returns [`BufferError`] when the range is out of bounds.
    fn close_gap(&mut self, at: usize, len: usize) -> Result<(), BufferError>;
}

/// Reshaping failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum BufferError {
    /// Not enough headroom to grow the frame.
    #[error("insufficient headroom: need {needed}, have {available}")]
    NoHeadroom {
        /// Bytes the edit required.
        needed: usize,
        /// Bytes of headroom left.
        available: usize,
    },
    /// An edit range fell outside the frame.
    #[error("range {at}+{len} out of bounds for frame of {frame_len} bytes")]
    OutOfBounds {
        /// Edit start offset.
        at: usize,
        /// Edit length.
        len: usize,
        /// Frame length at the time of the edit.
        frame_len: usize,
    },
}

#[cfg(any(test, feature = "test_buffer"))]
pub use test_buffer::TestBuffer;

#[cfg(any(test, feature = "test_buffer"))]
mod test_buffer {
    use super::{BufferError, PacketBuffer, PacketBufferMut};

    /// Heap-backed buffer with fixed headroom, mirroring how a driver mbuf
    /// reserves space in front of the frame for encapsulation.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct TestBuffer {
        data: Vec<u8>,
        head: usize,
    }

    impl TestBuffer {
        /// Headroom reserved in front of the frame.
        pub const HEADROOM: usize = 128;

        /// Build a buffer holding a copy of `frame`.
        #[must_use]
        pub fn from_frame(frame: &[u8]) -> Self {
            let mut data = vec![0u8; Self::HEADROOM + frame.len()];
            data[Self::HEADROOM..].copy_from_slice(frame);
            Self {
                data,
                head: Self::HEADROOM,
            }
        }
    }

    impl PacketBuffer for TestBuffer {
        fn as_slice(&self) -> &[u8] {
            &self.data[self.head..]
        }
    }

    impl PacketBufferMut for TestBuffer {
        fn as_mut_slice(&mut self) -> &mut [u8] {
            &mut self.data[self.head..]
        }

        fn open_gap(&mut self, at: usize, len: usize) -> Result<(), BufferError> {
            let frame_len = self.len();
            if at > frame_len {
                return Err(BufferError::OutOfBounds { at, len, frame_len });
            }
            if len > self.head {
                return Err(BufferError::NoHeadroom {
                    needed: len,
                    available: self.head,
                });
            }
            let new_head = self.head - len;
            self.data
                .copy_within(self.head..self.head + at, new_head);
            self.head = new_head;
            Ok(())
        }

        fn close_gap(&mut self, at: usize, len: usize) -> Result<(), BufferError> {
            let frame_len = self.len();
            if at.saturating_add(len) > frame_len {
                return Err(BufferError::OutOfBounds { at, len, frame_len });
            }
            let new_head = self.head + len;
            self.data
                .copy_within(self.head..self.head + at, new_head);
            self.head = new_head;
            Ok(())
        }
    }

    #[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
    #[cfg(test)]
    mod test {
        use super::*;

        #[test]
        fn open_gap_preserves_both_sides() {
            let mut buf = TestBuffer::from_frame(&[1, 2, 3, 4, 5, 6]);
            buf.open_gap(2, 3).unwrap();
            assert_eq!(buf.len(), 9);
            assert_eq!(&buf.as_slice()[..2], &[1, 2]);
            assert_eq!(&buf.as_slice()[5..], &[3, 4, 5, 6]);
        }

        #[test]
        fn close_gap_removes_range() {
            let mut buf = TestBuffer::from_frame(&[1, 2, 3, 4, 5, 6]);
            buf.close_gap(2, 2).unwrap();
            assert_eq!(buf.as_slice(), &[1, 2, 5, 6]);
        }

        #[test]
        fn open_gap_rejects_exhausted_headroom() {
            let mut buf = TestBuffer::from_frame(&[0u8; 8]);
            let err = buf.open_gap(0, TestBuffer::HEADROOM + 1).unwrap_err();
            assert!(matches!(err, BufferError::NoHeadroom { .. }));
        }

        #[test]
        fn gap_round_trip_is_identity() {
            let frame: Vec<u8> = (0..64).collect();
            let mut buf = TestBuffer::from_frame(&frame);
            buf.open_gap(14, 20).unwrap();
            buf.close_gap(14, 20).unwrap();
            assert_eq!(buf.as_slice(), frame.as_slice());
        }
    }
}
