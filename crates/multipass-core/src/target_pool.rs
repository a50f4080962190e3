use crate::backend::{BufferHandle, RenderBackend, TargetDesc, TargetHandles, TextureHandle};
use crate::error::TargetAllocationError;
use crate::Viewport;

/// One offscreen color buffer and the texture backing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderTarget {
    pub buffer: BufferHandle,
    pub texture: TextureHandle,
    pub width: u32,
    pub height: u32,
}

impl RenderTarget {
    fn handles(&self) -> TargetHandles {
        TargetHandles {
            buffer: self.buffer,
            texture: self.texture,
        }
    }
}

/// Fixed-size, index-addressed list of render targets that share one size.
///
/// Targets are created and destroyed as a batch. Target `i` keeps its pipeline
/// role across [`reallocate`](Self::reallocate); only its handles and
/// dimensions change.
#[derive(Debug, Default)]
pub struct RenderTargetPool {
    targets: Vec<RenderTarget>,
    width: u32,
    height: u32,
}

impl RenderTargetPool {
    /// A pool holding no GPU resources.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Creates `count` targets of `width`×`height`.
    ///
    /// On failure the targets built so far are destroyed again before the
    /// error is returned, so nothing is left half-constructed.
    pub fn allocate<B: RenderBackend + ?Sized>(
        backend: &mut B,
        count: usize,
        width: u32,
        height: u32,
    ) -> Result<Self, TargetAllocationError> {
        let desc = TargetDesc::color(width, height);
        let mut targets = Vec::with_capacity(count);

        for index in 0..count {
            match backend.create_target(&desc) {
                Ok(handles) => targets.push(RenderTarget {
                    buffer: handles.buffer,
                    texture: handles.texture,
                    width,
                    height,
                }),
                Err(source) => {
                    for target in targets.drain(..) {
                        backend.destroy_target(target.handles());
                    }
                    return Err(TargetAllocationError {
                        index,
                        width,
                        height,
                        source,
                    });
                }
            }
        }

        log::debug!("allocated {count} render targets ({width}x{height})");

        Ok(Self {
            targets,
            width,
            height,
        })
    }

    /// Destroys every target, then allocates `count` fresh ones at the new size.
    ///
    /// Takes `&mut self` so no pass can hold the old pool across the swap. On
    /// failure the pool is left empty.
    pub fn reallocate<B: RenderBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        count: usize,
        width: u32,
        height: u32,
    ) -> Result<(), TargetAllocationError> {
        self.release(backend);
        *self = Self::allocate(backend, count, width, height)?;
        Ok(())
    }

    /// Releases every target. A no-op on an empty pool.
    pub fn release<B: RenderBackend + ?Sized>(&mut self, backend: &mut B) {
        if self.targets.is_empty() {
            return;
        }
        log::debug!("releasing {} render targets", self.targets.len());
        for target in self.targets.drain(..) {
            backend.destroy_target(target.handles());
        }
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&RenderTarget> {
        self.targets.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &RenderTarget> {
        self.targets.iter()
    }

    /// Size shared by every target (the size last allocated at).
    pub fn dimensions(&self) -> Viewport {
        Viewport::new(self.width, self.height)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::software::{Command, SoftwareBackend};

    #[test]
    fn allocate_creates_requested_count_and_size() {
        let mut backend = SoftwareBackend::new();
        for (count, w, h) in [(1, 1, 1), (3, 960, 540), (5, 17, 3)] {
            let mut pool = RenderTargetPool::allocate(&mut backend, count, w, h).unwrap();
            assert_eq!(pool.len(), count);
            assert!(pool.iter().all(|t| t.width == w && t.height == h));
            for t in pool.iter() {
                assert_eq!(backend.target_size(t.buffer), Some((w, h)));
            }
            pool.release(&mut backend);
        }
        assert_eq!(backend.live_targets(), 0);
    }

    #[test]
    fn targets_have_distinct_handles() {
        let mut backend = SoftwareBackend::new();
        let pool = RenderTargetPool::allocate(&mut backend, 3, 4, 4).unwrap();
        let buffers: HashSet<_> = pool.iter().map(|t| t.buffer).collect();
        let textures: HashSet<_> = pool.iter().map(|t| t.texture).collect();
        assert_eq!(buffers.len(), 3);
        assert_eq!(textures.len(), 3);
    }

    #[test]
    fn release_is_idempotent() {
        let mut backend = SoftwareBackend::new();
        let mut pool = RenderTargetPool::allocate(&mut backend, 2, 8, 8).unwrap();
        pool.release(&mut backend);
        pool.release(&mut backend);
        RenderTargetPool::empty().release(&mut backend);

        let destroys = backend
            .commands()
            .iter()
            .filter(|c| matches!(c, Command::DestroyTarget(_)))
            .count();
        assert_eq!(destroys, 2);
        assert!(pool.is_empty());
    }

    #[test]
    fn reallocate_preserves_count_and_resizes_every_target() {
        let mut backend = SoftwareBackend::new();
        let mut pool = RenderTargetPool::allocate(&mut backend, 3, 960, 540).unwrap();
        pool.reallocate(&mut backend, 3, 1280, 720).unwrap();

        assert_eq!(pool.len(), 3);
        assert_eq!(pool.dimensions(), Viewport::new(1280, 720));
        for t in pool.iter() {
            assert_eq!((t.width, t.height), (1280, 720));
            assert_eq!(backend.target_size(t.buffer), Some((1280, 720)));
        }
        assert_eq!(backend.live_targets(), 3);
    }

    #[test]
    fn failed_allocation_reports_index_and_leaks_nothing() {
        let mut backend = SoftwareBackend::new().fail_target_allocation_at(2);
        let err = RenderTargetPool::allocate(&mut backend, 3, 16, 16).unwrap_err();
        assert_eq!(err.index, 2);
        assert_eq!((err.width, err.height), (16, 16));
        assert_eq!(backend.live_targets(), 0);
    }

    #[test]
    fn failed_reallocation_leaves_pool_empty() {
        let mut backend = SoftwareBackend::new().fail_target_allocation_at(4);
        let mut pool = RenderTargetPool::allocate(&mut backend, 3, 16, 16).unwrap();
        assert!(pool.reallocate(&mut backend, 3, 32, 32).is_err());
        assert!(pool.is_empty());
        assert_eq!(backend.live_targets(), 0);
    }
}
