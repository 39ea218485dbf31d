//! Bit flags for cancellation and submission.

use core::ops::{BitOr, BitOrAssign};

/// Which request kinds `Socket::cancel` should walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct CancelFlags(u8);

impl CancelFlags {
    pub const RECV: CancelFlags = CancelFlags(0x01);
    pub const SEND: CancelFlags = CancelFlags(0x02);
    pub const ACCEPT: CancelFlags = CancelFlags(0x04);
    pub const CONNECT: CancelFlags = CancelFlags(0x08);
    pub const ALL: CancelFlags = CancelFlags(0x0f);
    pub const NONE: CancelFlags = CancelFlags(0);

    #[inline]
    pub const fn contains(self, other: CancelFlags) -> bool {
        self.0 & other.0 == other.0 && other.0 != 0
    }

    #[inline]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for CancelFlags {
    type Output = CancelFlags;
    fn bitor(self, rhs: Self) -> Self {
        CancelFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for CancelFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// Submission behaviour for `recv_with` / `send_with`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SubmitFlags(u8);

impl SubmitFlags {
    pub const NONE: SubmitFlags = SubmitFlags(0);
    /// Return the event directly when the operation finishes during
    /// submission instead of routing it through the completion.
    pub const IMMEDIATE: SubmitFlags = SubmitFlags(0x01);
    /// Send only: do not queue when the first attempt would block.
    pub const NORETRY: SubmitFlags = SubmitFlags(0x02);

    #[inline]
    pub const fn contains(self, other: SubmitFlags) -> bool {
        self.0 & other.0 == other.0 && other.0 != 0
    }
}

impl BitOr for SubmitFlags {
    type Output = SubmitFlags;
    fn bitor(self, rhs: Self) -> Self {
        SubmitFlags(self.0 | rhs.0)
    }
}
