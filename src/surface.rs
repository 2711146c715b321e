//! Reuse of GPU surfaces across captured frames.
use log::debug;

/// Shape of a 2D surface. `format` is the raw DXGI format value.
#[derive(Eq, PartialEq, Clone, Copy, Debug)]
pub struct SurfaceDesc {
    pub width: u32,
    pub height: u32,
    pub format: i32,
}

/// A GPU surface bundled with every view derived from it.
pub trait Surface {
    fn desc(&self) -> SurfaceDesc;
}

/// Makes `slot` hold a surface shaped like `desc`, creating it with `create`
/// when the slot is empty or its size or format differs. Returns `true` when
/// the surface was replaced.
///
/// The surface and its views are replaced as one value, so a stale view can
/// never outlive the texture it was created for. On failure the slot keeps
/// its previous surface.
pub fn reuse_or_recreate<T: Surface, E>(
    slot: &mut Option<T>,
    desc: SurfaceDesc,
    create: impl FnOnce(SurfaceDesc) -> Result<T, E>,
) -> Result<bool, E> {
    if let Some(surface) = slot.as_ref() {
        let current = surface.desc();
        if current == desc {
            return Ok(false);
        }

        debug!(
            "Frame Changed From {}x{} ({}) To {}x{} ({}) -> Recreating Texture",
            current.width, current.height, current.format, desc.width, desc.height, desc.format
        );
    }

    *slot = Some(create(desc)?);

    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BGRA: i32 = 87;
    const RGBA: i32 = 28;

    /// Texture and view ids handed out by a counter, like fresh GPU objects.
    #[derive(Debug)]
    struct FakeTexture {
        desc: SurfaceDesc,
        texture: u32,
        view: u32,
    }

    impl Surface for FakeTexture {
        fn desc(&self) -> SurfaceDesc {
            self.desc
        }
    }

    fn creator(next_id: &mut u32) -> impl FnOnce(SurfaceDesc) -> Result<FakeTexture, ()> + '_ {
        move |desc| {
            *next_id += 1;
            Ok(FakeTexture { desc, texture: *next_id, view: *next_id })
        }
    }

    fn desc(width: u32, height: u32, format: i32) -> SurfaceDesc {
        SurfaceDesc { width, height, format }
    }

    #[test]
    fn same_shape_reuses_surface() {
        let mut slot = None;
        let mut next_id = 0;

        assert_eq!(reuse_or_recreate(&mut slot, desc(1920, 1080, BGRA), creator(&mut next_id)), Ok(true));
        assert_eq!(reuse_or_recreate(&mut slot, desc(1920, 1080, BGRA), creator(&mut next_id)), Ok(false));

        let surface = slot.unwrap();
        assert_eq!((surface.texture, surface.view), (1, 1));
    }

    #[test]
    fn size_or_format_change_replaces_texture_and_view_together() {
        let mut slot = None;
        let mut next_id = 0;

        let shapes = [desc(1920, 1080, BGRA), desc(1280, 720, BGRA), desc(1280, 720, RGBA)];
        for (i, shape) in shapes.into_iter().enumerate() {
            assert_eq!(reuse_or_recreate(&mut slot, shape, creator(&mut next_id)), Ok(true));

            let surface = slot.as_ref().unwrap();
            assert_eq!(surface.desc, shape);
            assert_eq!(surface.texture, i as u32 + 1);
            assert_eq!(surface.view, surface.texture, "view must belong to the current texture");
        }
    }

    #[test]
    fn failed_creation_keeps_previous_surface() {
        let mut slot = None;
        let mut next_id = 0;
        reuse_or_recreate(&mut slot, desc(800, 600, BGRA), creator(&mut next_id)).unwrap();

        let result = reuse_or_recreate(&mut slot, desc(1024, 768, BGRA), |_| Err::<FakeTexture, _>("out of memory"));
        assert_eq!(result, Err("out of memory"));
        assert_eq!(slot.unwrap().desc, desc(800, 600, BGRA));
    }
}
