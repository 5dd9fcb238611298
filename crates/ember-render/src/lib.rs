// SPDX-License-Identifier: CEPL-1.0
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RenderSize {
    pub width: u32,
    pub height: u32,
}

impl RenderSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Something a presentation surface can be bound to.
pub trait PresentTarget: HasWindowHandle + HasDisplayHandle {
    /// Size of the drawable area in pixels (not logical points).
    fn framebuffer_size(&self) -> RenderSize;
}

/// Explicit Create → (use) → Destroy lifecycle shared by every owning GPU object.
///
/// `destroy` must be idempotent: a second call is a no-op and leaves
/// `is_valid()` false. Implementors also call `destroy` from `Drop`.
pub trait GpuResource {
    type Error;

    fn create(&mut self) -> Result<(), Self::Error>;
    fn destroy(&mut self);
    fn is_valid(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_sized_render_is_empty() {
        assert!(RenderSize::new(0, 600).is_empty());
        assert!(RenderSize::new(800, 0).is_empty());
        assert!(!RenderSize::new(1, 1).is_empty());
    }
}
