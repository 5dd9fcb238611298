// SPDX-License-Identifier: CEPL-1.0
use ash::vk::Handle;

/// Exclusive owner of one native handle. The null handle means "not created"
/// or "already destroyed"; `release` hands the handle to the destroyer at most once.
#[derive(Debug)]
pub(crate) struct HandleSlot<H: Handle + Copy> {
    raw: H,
}

impl<H: Handle + Copy> HandleSlot<H> {
    pub(crate) fn empty() -> Self {
        Self { raw: H::from_raw(0) }
    }

    pub(crate) fn is_valid(&self) -> bool {
        self.raw.as_raw() != 0
    }

    pub(crate) fn get(&self) -> H {
        self.raw
    }

    /// Stores a freshly created handle. The slot must be empty.
    pub(crate) fn set(&mut self, handle: H) {
        debug_assert!(!self.is_valid(), "handle slot overwritten while still owning a handle");
        self.raw = handle;
    }

    /// Takes the handle out, leaving the slot empty.
    pub(crate) fn take(&mut self) -> Option<H> {
        if self.is_valid() {
            let raw = self.raw;
            self.raw = H::from_raw(0);
            Some(raw)
        } else {
            None
        }
    }

    pub(crate) fn release(&mut self, destroy: impl FnOnce(H)) {
        if let Some(raw) = self.take() {
            destroy(raw);
        }
    }
}

impl<H: Handle + Copy> Default for HandleSlot<H> {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk;

    #[test]
    fn new_slot_is_invalid() {
        let slot = HandleSlot::<vk::Pipeline>::empty();
        assert!(!slot.is_valid());
        assert_eq!(slot.get(), vk::Pipeline::null());
    }

    #[test]
    fn release_runs_destroyer_exactly_once() {
        let mut slot = HandleSlot::empty();
        slot.set(vk::ShaderModule::from_raw(0x42));
        assert!(slot.is_valid());

        let mut destroyed = Vec::new();
        slot.release(|h| destroyed.push(h.as_raw()));
        slot.release(|h| destroyed.push(h.as_raw()));

        assert_eq!(destroyed, vec![0x42]);
        assert!(!slot.is_valid());
    }

    #[test]
    fn release_on_empty_slot_is_a_no_op() {
        let mut slot = HandleSlot::<vk::SwapchainKHR>::empty();
        let mut calls = 0;
        slot.release(|_| calls += 1);
        assert_eq!(calls, 0);
    }

    #[test]
    fn take_empties_the_slot() {
        let mut slot = HandleSlot::empty();
        slot.set(vk::SurfaceKHR::from_raw(7));
        assert_eq!(slot.take(), Some(vk::SurfaceKHR::from_raw(7)));
        assert_eq!(slot.take(), None);
    }
}
