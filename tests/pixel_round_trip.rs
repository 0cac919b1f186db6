// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
#![cfg(feature = "backend_soft")]

use ganesh::caps::Caps;
use ganesh::coordinates::{IPoint, IRect, ISize};
use ganesh::gpu::Origin;
use ganesh::pixel_formats::{AlphaType, ColorType, ImageInfo, Pixmap, PixmapMut};
use ganesh::resource_provider::BackingFit;
use ganesh::{ContextOptions, DirectContext, Error, SoftGpu, SurfaceContext};
use std::sync::Arc;

fn context() -> DirectContext {
    DirectContext::new(Arc::new(SoftGpu::new()), Caps::soft(), ContextOptions::default())
}

fn info(ct: ColorType, at: AlphaType, w: i32, h: i32) -> ImageInfo {
    ImageInfo::new(ISize::new(w, h), ct, at, None)
}

fn gradient(w: i32, h: i32) -> Vec<u8> {
    let mut out = Vec::new();
    for y in 0..h {
        for x in 0..w {
            out.extend_from_slice(&[(x * 60) as u8, (y * 60) as u8, ((x + y) * 30) as u8, 255]);
        }
    }
    out
}

fn write(ctx: &DirectContext, sc: &SurfaceContext, info: ImageInfo, pixels: &[u8], pt: IPoint) -> Result<(), Error> {
    sc.write_pixels(ctx, Pixmap::new(info, pixels, info.min_row_bytes())?, pt)
}

fn read(ctx: &DirectContext, sc: &SurfaceContext, info: ImageInfo) -> Vec<u8> {
    let row_bytes = info.min_row_bytes();
    let mut out = vec![0u8; info.compute_byte_size(row_bytes)];
    sc.read_pixels(ctx, PixmapMut::new(info, &mut out, row_bytes).unwrap(), IPoint::new(0, 0))
        .unwrap();
    out
}

#[test]
fn gradient_round_trips_exactly() {
    let ctx = context();
    let i = info(ColorType::Rgba8888, AlphaType::Premul, 4, 4);
    let sc = ctx.make_sc(i, Origin::TopLeft, false).unwrap();
    let pixels = gradient(4, 4);
    write(&ctx, &sc, i, &pixels, IPoint::new(0, 0)).unwrap();
    assert_eq!(read(&ctx, &sc, i), pixels);
}

#[test]
fn unpremul_data_survives_a_premul_surface() {
    let ctx = context();
    let upm = info(ColorType::Rgba8888, AlphaType::Unpremul, 4, 1);
    let pixels = [
        200, 100, 50, 255, //
        200, 100, 50, 200, //
        17, 230, 128, 160, //
        255, 255, 255, 128,
    ];
    for renderable in [false, true] {
        let pm = upm.make_alpha_type(AlphaType::Premul);
        let sc = if renderable {
            ctx.make_sfc(pm, BackingFit::Exact, Origin::TopLeft)
                .unwrap()
                .into_surface_context()
        } else {
            ctx.make_sc(pm, Origin::TopLeft, false).unwrap()
        };
        write(&ctx, &sc, upm, &pixels, IPoint::new(0, 0)).unwrap();
        let back = read(&ctx, &sc, upm);
        for (got, want) in back.iter().zip(pixels.iter()) {
            assert!(got.abs_diff(*want) <= 2, "renderable={renderable}: {back:?} vs {pixels:?}");
        }
    }
}

#[test]
fn bgra_clients_see_their_own_order() {
    let ctx = context();
    let rgba = info(ColorType::Rgba8888, AlphaType::Premul, 1, 1);
    let bgra = info(ColorType::Bgra8888, AlphaType::Premul, 1, 1);
    let sc = ctx.make_sc(rgba, Origin::TopLeft, false).unwrap();
    write(&ctx, &sc, bgra, &[1, 2, 3, 255], IPoint::new(0, 0)).unwrap();
    assert_eq!(read(&ctx, &sc, rgba), [3, 2, 1, 255]);
    assert_eq!(read(&ctx, &sc, bgra), [1, 2, 3, 255]);
}

#[test]
fn half_float_surfaces_hold_8_bit_data() {
    let ctx = context();
    let f16 = info(ColorType::RgbaF16, AlphaType::Premul, 4, 4);
    let rgba = info(ColorType::Rgba8888, AlphaType::Premul, 4, 4);
    let sc = ctx.make_sc(f16, Origin::TopLeft, false).unwrap();
    let pixels = gradient(4, 4);
    write(&ctx, &sc, rgba, &pixels, IPoint::new(0, 0)).unwrap();
    assert_eq!(read(&ctx, &sc, rgba), pixels);
}

#[test]
fn writes_entirely_outside_fail_and_change_nothing() {
    let ctx = context();
    let i = info(ColorType::Rgba8888, AlphaType::Premul, 10, 10);
    let sc = ctx.make_sc(i, Origin::TopLeft, false).unwrap();
    let pixels = vec![7u8; 400];
    write(&ctx, &sc, i, &pixels, IPoint::new(0, 0)).unwrap();

    let patch = info(ColorType::Rgba8888, AlphaType::Premul, 5, 5);
    assert_eq!(
        write(&ctx, &sc, patch, &[9u8; 100], IPoint::new(20, 20)),
        Err(Error::EmptyRect)
    );
    assert_eq!(read(&ctx, &sc, i), pixels);

    // a partial overlap only touches the overlapping corner
    write(&ctx, &sc, patch, &[9u8; 100], IPoint::new(8, 8)).unwrap();
    let back = read(&ctx, &sc, i);
    let px = |x: usize, y: usize| &back[(y * 10 + x) * 4..(y * 10 + x) * 4 + 4];
    assert_eq!(px(9, 9), [9; 4]);
    assert_eq!(px(8, 8), [9; 4]);
    assert_eq!(px(7, 9), [7; 4]);
}

#[test]
fn far_off_points_fail_without_overflowing() {
    let ctx = context();
    let i = info(ColorType::Rgba8888, AlphaType::Premul, 4, 4);
    let sc = ctx.make_sc(i, Origin::TopLeft, false).unwrap();
    let pixels = vec![5u8; 64];
    write(&ctx, &sc, i, &pixels, IPoint::new(0, 0)).unwrap();

    let far = IPoint::new(i32::MAX - 1, 0);
    assert_eq!(write(&ctx, &sc, i, &[9u8; 64], far), Err(Error::EmptyRect));
    let mut out = [0u8; 64];
    let result = sc.read_pixels(&ctx, PixmapMut::new(i, &mut out, 16).unwrap(), far);
    assert_eq!(result, Err(Error::EmptyRect));
    assert_eq!(out, [0u8; 64]);

    let below = IPoint::new(0, i32::MAX);
    assert_eq!(write(&ctx, &sc, i, &[9u8; 64], below), Err(Error::EmptyRect));
    assert_eq!(read(&ctx, &sc, i), pixels);
}

#[test]
fn bottom_left_surfaces_are_transparent_to_clients() {
    let ctx = context();
    let i = info(ColorType::Rgba8888, AlphaType::Premul, 3, 3);
    let src = ctx.make_sc(i, Origin::BottomLeft, false).unwrap();
    let dst = ctx.make_sc(i, Origin::BottomLeft, false).unwrap();
    let pixels = gradient(3, 3);
    write(&ctx, &src, i, &pixels, IPoint::new(0, 0)).unwrap();
    write(&ctx, &dst, i, &[0u8; 36], IPoint::new(0, 0)).unwrap();
    assert_eq!(read(&ctx, &src, i), pixels);

    // the top row of the source lands on the top row of the destination
    dst.copy(&ctx, &src, IRect::from_xywh(0, 0, 3, 1), IPoint::new(0, 0))
        .unwrap();
    let back = read(&ctx, &dst, i);
    assert_eq!(back[..12], pixels[..12]);
    assert_eq!(back[12..], [0u8; 24]);
}

#[test]
fn row_bytes_are_validated() {
    let ctx = context();
    let i = info(ColorType::Rgba8888, AlphaType::Premul, 2, 2);
    let pixels = [0u8; 32];
    assert!(matches!(
        Pixmap::new(i, &pixels, 6),
        Err(Error::InvalidRowBytes { row_bytes: 6, min_row_bytes: 8 })
    ));
    // padded rows are fine
    let sc = ctx.make_sc(i, Origin::TopLeft, false).unwrap();
    let mut padded = [0u8; 32];
    padded[..8].copy_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);
    padded[16..24].copy_from_slice(&[9, 10, 11, 12, 13, 14, 15, 16]);
    sc.write_pixels(&ctx, Pixmap::new(i, &padded, 16).unwrap(), IPoint::new(0, 0))
        .unwrap();
    assert_eq!(read(&ctx, &sc, i), (1..=16).collect::<Vec<u8>>());
}
