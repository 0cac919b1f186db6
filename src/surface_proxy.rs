// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
Lazily instantiated surfaces.

A [`SurfaceProxy`] describes a texture before it exists.  It is backed by a cache resource the
first time a device operation needs it.  Proxies are shared (`Clone` is cheap), and the cache
reference they hold is given back through the context's message queue when the last clone is
dropped, so a proxy may outlive the borrow of its context.

A [`SurfaceProxyView`] pairs a proxy with the origin its contents are laid out in.
*/

use crate::coordinates::{IRect, ISize};
use crate::effects::SampledTexture;
use crate::gpu::{Origin, TextureDesc, TextureHandle};
use crate::mapped_buffer_manager::{MessageSender, ResourceRef};
use crate::pixel_formats::{BackendFormat, ColorType};
use crate::resource::{BackendObject, ResourceId};
use crate::resource_provider::{BackingFit, ResourceProvider};
use std::cell::RefCell;
use std::rc::Rc;

/// What may be done with a surface besides rendering to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SurfaceAccess {
    #[default]
    ReadWrite,
    /// Never written by pixel uploads or copies.
    ReadOnly,
    /// A render target without a sampleable texture.  It can still be read back and copied from.
    RenderTargetOnly,
    /// Can only be rendered to; reads and copies from it fail.
    FramebufferOnly,
}

#[derive(Debug)]
struct Target {
    resource: ResourceRef,
    texture: TextureHandle,
    backing: ISize,
}

#[derive(Debug)]
struct ProxyInner {
    desc: TextureDesc,
    fit: BackingFit,
    budgeted: bool,
    access: SurfaceAccess,
    wrapped: bool,
    target: RefCell<Option<Target>>,
}

#[derive(Debug, Clone)]
pub struct SurfaceProxy(Rc<ProxyInner>);

impl SurfaceProxy {
    pub(crate) fn new(desc: TextureDesc, fit: BackingFit, budgeted: bool, access: SurfaceAccess) -> Self {
        SurfaceProxy(Rc::new(ProxyInner {
            desc,
            fit,
            budgeted,
            access,
            wrapped: false,
            target: RefCell::new(None),
        }))
    }

    /// A proxy for an already existing texture, either just wrapped or found in the cache.
    /// `resource` carries the reference the cache handed out for it.
    pub(crate) fn instantiated(
        desc: TextureDesc,
        budgeted: bool,
        wrapped: bool,
        access: SurfaceAccess,
        resource: ResourceRef,
        texture: TextureHandle,
    ) -> Self {
        SurfaceProxy(Rc::new(ProxyInner {
            desc,
            fit: BackingFit::Exact,
            budgeted,
            access,
            wrapped,
            target: RefCell::new(Some(Target {
                resource,
                texture,
                backing: desc.dimensions,
            })),
        }))
    }

    /// Logical size.  An approximate-fit backing may be larger.
    pub fn dimensions(&self) -> ISize {
        self.0.desc.dimensions
    }

    pub fn width(&self) -> i32 {
        self.0.desc.dimensions.width
    }

    pub fn height(&self) -> i32 {
        self.0.desc.dimensions.height
    }

    pub fn backend_format(&self) -> BackendFormat {
        self.0.desc.format
    }

    pub fn fit(&self) -> BackingFit {
        self.0.fit
    }

    pub fn is_budgeted(&self) -> bool {
        self.0.budgeted
    }

    pub fn is_renderable(&self) -> bool {
        self.0.desc.renderable
    }

    pub fn is_mipmapped(&self) -> bool {
        self.0.desc.mipmapped
    }

    pub fn is_protected(&self) -> bool {
        self.0.desc.protected
    }

    pub fn is_wrapped(&self) -> bool {
        self.0.wrapped
    }

    pub fn read_only(&self) -> bool {
        self.0.access == SurfaceAccess::ReadOnly
    }

    pub fn framebuffer_only(&self) -> bool {
        self.0.access == SurfaceAccess::FramebufferOnly
    }

    /// Whether draws may sample this surface.
    pub fn is_texturable(&self) -> bool {
        !matches!(
            self.0.access,
            SurfaceAccess::RenderTargetOnly | SurfaceAccess::FramebufferOnly
        )
    }

    pub fn is_instantiated(&self) -> bool {
        self.0.target.borrow().is_some()
    }

    /// Size of the allocation.  Before instantiation this is what an exact fit would allocate.
    pub fn backing_dimensions(&self) -> ISize {
        self.0
            .target
            .borrow()
            .as_ref()
            .map_or(self.0.desc.dimensions, |t| t.backing)
    }

    /// Whether the allocation matches the logical size exactly.
    pub fn is_functionally_exact(&self) -> bool {
        self.0.fit == BackingFit::Exact || self.backing_dimensions() == self.dimensions()
    }

    pub(crate) fn texture(&self) -> Option<TextureHandle> {
        self.0.target.borrow().as_ref().map(|t| t.texture)
    }

    pub(crate) fn resource(&self) -> Option<ResourceId> {
        self.0.target.borrow().as_ref().map(|t| t.resource.id())
    }

    pub(crate) fn ptr_eq(&self, other: &SurfaceProxy) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Backs the proxy with a texture.  Already instantiated proxies succeed immediately.
    pub(crate) fn instantiate(&self, provider: &mut ResourceProvider, messages: &MessageSender) -> bool {
        if self.is_instantiated() {
            return true;
        }
        let desc = &self.0.desc;
        let created = match self.0.fit {
            BackingFit::Exact => provider.create_texture(desc, self.0.budgeted),
            BackingFit::Approx => provider.find_or_make_scratch_texture(desc, BackingFit::Approx),
        };
        let Some(id) = created else {
            logwise::warn_sync!(
                "instantiating a {dimensions} {format} surface failed",
                dimensions = logwise::privacy::LogIt(desc.dimensions),
                format = logwise::privacy::LogIt(desc.format)
            );
            return false;
        };
        let resource = ResourceRef::adopt(id, messages.clone());
        let texture_and_backing = provider.cache().get(id).and_then(|r| match r.object() {
            BackendObject::Texture { handle, desc } => Some((*handle, desc.dimensions)),
            _ => None,
        });
        let Some((texture, backing)) = texture_and_backing else {
            return false;
        };
        logwise::trace_sync!(
            "instantiated proxy with {id} ({backing})",
            id = logwise::privacy::LogIt(id),
            backing = logwise::privacy::LogIt(backing)
        );
        *self.0.target.borrow_mut() = Some(Target {
            resource,
            texture,
            backing,
        });
        true
    }
}

/// A proxy plus the origin of its contents.
#[derive(Debug, Clone)]
pub struct SurfaceProxyView {
    proxy: SurfaceProxy,
    origin: Origin,
}

impl SurfaceProxyView {
    pub fn new(proxy: SurfaceProxy, origin: Origin) -> Self {
        SurfaceProxyView { proxy, origin }
    }

    pub fn proxy(&self) -> &SurfaceProxy {
        &self.proxy
    }

    pub fn origin(&self) -> Origin {
        self.origin
    }

    pub fn dimensions(&self) -> ISize {
        self.proxy.dimensions()
    }

    /// How a processor samples this view, clamped to `subset`.  The proxy must be
    /// instantiated and texturable.
    pub(crate) fn sampled(&self, color_type: ColorType, subset: IRect) -> Option<SampledTexture> {
        if !self.proxy.is_texturable() {
            return None;
        }
        Some(SampledTexture {
            texture: self.proxy.texture()?,
            color_type,
            origin: self.origin,
            backing: self.proxy.backing_dimensions(),
            subset,
        })
    }
}

#[cfg(all(test, feature = "backend_soft"))]
mod tests {
    use super::*;
    use crate::caps::Caps;
    use crate::imp::SoftGpu;
    use crate::mapped_buffer_manager::MappedBufferManager;
    use std::sync::Arc;

    fn desc(w: i32, h: i32) -> TextureDesc {
        TextureDesc {
            dimensions: ISize::new(w, h),
            format: BackendFormat::Rgba8Unorm,
            renderable: true,
            mipmapped: false,
            protected: false,
        }
    }

    #[test]
    fn approx_proxies_report_backing_size() {
        let gpu = Arc::new(SoftGpu::new());
        let mut provider = ResourceProvider::new(gpu, Arc::new(Caps::soft()), 10, 1 << 20);
        let manager = MappedBufferManager::new();
        let proxy = SurfaceProxy::new(desc(10, 20), BackingFit::Approx, true, SurfaceAccess::ReadWrite);
        assert!(!proxy.is_instantiated());
        assert!(proxy.is_functionally_exact());
        assert!(proxy.instantiate(&mut provider, &manager.sender()));
        assert_eq!(proxy.dimensions(), ISize::new(10, 20));
        assert_eq!(proxy.backing_dimensions(), ISize::new(16, 32));
        assert!(!proxy.is_functionally_exact());
    }

    #[test]
    fn last_clone_gives_the_texture_back() {
        let gpu = Arc::new(SoftGpu::new());
        let mut provider = ResourceProvider::new(gpu, Arc::new(Caps::soft()), 10, 1 << 20);
        let manager = MappedBufferManager::new();
        let proxy = SurfaceProxy::new(desc(4, 4), BackingFit::Exact, true, SurfaceAccess::ReadWrite);
        assert!(proxy.instantiate(&mut provider, &manager.sender()));
        let id = proxy.resource().unwrap();
        let clone = proxy.clone();
        drop(proxy);
        manager.process(&mut provider, false);
        assert_eq!(provider.cache().get(id).map(|r| r.ref_count()), Some(1));
        drop(clone);
        manager.process(&mut provider, false);
        let r = provider.cache().get(id).unwrap();
        assert!(r.is_purgeable());
    }

    #[test]
    fn render_target_only_views_cannot_be_sampled() {
        let gpu = Arc::new(SoftGpu::new());
        let mut provider = ResourceProvider::new(gpu, Arc::new(Caps::soft()), 10, 1 << 20);
        let manager = MappedBufferManager::new();
        let proxy = SurfaceProxy::new(
            desc(4, 4),
            BackingFit::Exact,
            true,
            SurfaceAccess::RenderTargetOnly,
        );
        assert!(proxy.instantiate(&mut provider, &manager.sender()));
        let view = SurfaceProxyView::new(proxy, Origin::TopLeft);
        assert!(
            view.sampled(ColorType::Rgba8888, IRect::from_xywh(0, 0, 4, 4))
                .is_none()
        );
    }
}
