// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Decoded frames as seen by the accelerator: a buffer descriptor and an
//! error mark shared between the task that decodes into the frame and every
//! later task that references it.

use std::cell::RefCell;
use std::rc::Rc;

#[derive(Debug, Default)]
struct FrameState {
    fd: Option<u32>,
    errored: bool,
}

/// Shared handle to a frame buffer owned by the surrounding decoder.
///
/// Clones refer to the same frame, so marking one clone errored is visible
/// through all of them.
#[derive(Clone, Debug, Default)]
pub struct FrameHandle(Rc<RefCell<FrameState>>);

impl FrameHandle {
    /// A frame backed by the buffer with descriptor `fd`.
    pub fn new(fd: u32) -> Self {
        Self(Rc::new(RefCell::new(FrameState {
            fd: Some(fd),
            errored: false,
        })))
    }

    /// A frame whose buffer has not been allocated (or was released).
    pub fn unbacked() -> Self {
        Default::default()
    }

    /// Descriptor of the backing buffer, if any.
    pub fn fd(&self) -> Option<u32> {
        self.0.borrow().fd
    }

    pub fn is_errored(&self) -> bool {
        self.0.borrow().errored
    }

    pub fn set_errored(&self) {
        let mut state = self.0.borrow_mut();
        if !state.errored {
            log::debug!("Marking frame {:?} as errored", state.fd);
        }
        state.errored = true;
    }

    /// Whether `self` and `other` refer to the same frame.
    pub fn same_frame(&self, other: &FrameHandle) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_mark_is_shared() {
        let frame = FrameHandle::new(7);
        let alias = frame.clone();
        assert!(!alias.is_errored());

        frame.set_errored();
        assert!(alias.is_errored());
        assert!(alias.same_frame(&frame));
        assert!(!FrameHandle::new(7).same_frame(&frame));
    }

    #[test]
    fn unbacked_frame() {
        assert_eq!(FrameHandle::unbacked().fd(), None);
        assert_eq!(FrameHandle::new(3).fd(), Some(3));
    }
}
