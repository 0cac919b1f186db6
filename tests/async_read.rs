// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
#![cfg(feature = "backend_soft")]

use ganesh::async_read_result::AsyncReadResult;
use ganesh::caps::Caps;
use ganesh::coordinates::{IPoint, IRect, ISize};
use ganesh::gpu::Origin;
use ganesh::pixel_formats::yuv::YuvColorSpace;
use ganesh::pixel_formats::{AlphaType, ColorType, ImageInfo, Pixmap};
use ganesh::surface_context::{ReadPixelsCallback, RescaleGamma, RescaleMode};
use ganesh::{ContextOptions, DirectContext, SoftGpu, SurfaceContext, SyncCpu};
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

type Results = Rc<RefCell<Vec<(&'static str, Option<AsyncReadResult>)>>>;

fn recorder(results: &Results, name: &'static str) -> ReadPixelsCallback {
    let results = results.clone();
    Box::new(move |result| results.borrow_mut().push((name, result)))
}

fn surface(ctx: &DirectContext, w: i32, h: i32, origin: Origin, px: impl Fn(i32, i32) -> [u8; 4]) -> (SurfaceContext, Vec<u8>) {
    let info = ImageInfo::new(ISize::new(w, h), ColorType::Rgba8888, AlphaType::Premul, None);
    let sc = ctx.make_sc(info, origin, false).unwrap();
    let mut pixels = Vec::new();
    for y in 0..h {
        for x in 0..w {
            pixels.extend_from_slice(&px(x, y));
        }
    }
    sc.write_pixels(ctx, Pixmap::new(info, &pixels, info.min_row_bytes()).unwrap(), IPoint::new(0, 0))
        .unwrap();
    (sc, pixels)
}

fn rows(result: &AsyncReadResult, plane: usize, width_bytes: usize, height: usize) -> Vec<u8> {
    let row_bytes = result.row_bytes(plane);
    (0..height)
        .flat_map(|y| result.data(plane)[y * row_bytes..y * row_bytes + width_bytes].to_vec())
        .collect()
}

#[test]
fn reads_complete_in_issue_order() {
    logwise::info_sync!("starting {test}", test = "reads_complete_in_issue_order");
    let gpu = Arc::new(SoftGpu::new());
    gpu.set_auto_complete(false);
    let ctx = DirectContext::new(gpu.clone(), Caps::soft(), ContextOptions::default());
    let (sc, pixels) = surface(&ctx, 3, 2, Origin::TopLeft, |x, y| [x as u8, y as u8, 9, 255]);
    let results: Results = Rc::new(RefCell::new(Vec::new()));

    sc.async_read_pixels(&ctx, IRect::from_xywh(0, 0, 3, 2), ColorType::Rgba8888, recorder(&results, "first"));
    sc.async_read_pixels(&ctx, IRect::from_xywh(1, 1, 2, 1), ColorType::Bgra8888, recorder(&results, "second"));
    ctx.submit(SyncCpu::No);
    ctx.check_async_work_completion();
    assert!(results.borrow().is_empty());

    gpu.complete_all();
    ctx.check_async_work_completion();
    let results = results.borrow();
    let names: Vec<_> = results.iter().map(|(name, _)| *name).collect();
    assert_eq!(names, ["first", "second"]);

    let first = results[0].1.as_ref().unwrap();
    assert_eq!(rows(first, 0, 12, 2), pixels);
    let second = results[1].1.as_ref().unwrap();
    assert!(!second.is_mapped(0));
    assert_eq!(rows(second, 0, 8, 1), [9, 1, 1, 255, 9, 1, 2, 255]);
}

#[test]
fn without_transfers_the_callback_runs_before_returning() {
    let gpu = Arc::new(SoftGpu::new());
    let caps = Caps {
        transfer_from_surface_to_buffer_support: false,
        ..Caps::soft()
    };
    let ctx = DirectContext::new(gpu.clone(), caps, ContextOptions::default());
    let (sc, pixels) = surface(&ctx, 2, 2, Origin::BottomLeft, |x, y| [x as u8 * 100, y as u8 * 100, 0, 255]);
    let results: Results = Rc::new(RefCell::new(Vec::new()));
    sc.async_read_pixels(&ctx, IRect::from_xywh(0, 0, 2, 2), ColorType::Rgba8888, recorder(&results, "sync"));

    let results = results.borrow();
    assert_eq!(results.len(), 1);
    let result = results[0].1.as_ref().unwrap();
    assert!(!result.is_mapped(0));
    assert_eq!(rows(result, 0, 8, 2), pixels);
    assert_eq!(gpu.stats().transfers_from, 0);
}

#[test]
fn rescaled_reads_deliver_the_requested_size() {
    let gpu = Arc::new(SoftGpu::new());
    let ctx = DirectContext::new(gpu, Caps::soft(), ContextOptions::default());
    let (sc, _) = surface(&ctx, 8, 8, Origin::TopLeft, |_, _| [30, 60, 90, 255]);
    let results: Results = Rc::new(RefCell::new(Vec::new()));
    let info = ImageInfo::new(ISize::new(2, 2), ColorType::Rgba8888, AlphaType::Premul, None);
    sc.async_rescale_and_read_pixels(
        &ctx,
        info,
        IRect::from_xywh(0, 0, 8, 8),
        RescaleGamma::Src,
        RescaleMode::RepeatedLinear,
        recorder(&results, "scaled"),
    );
    ctx.flush_and_submit(SyncCpu::Yes);
    let results = results.borrow();
    let result = results[0].1.as_ref().unwrap();
    for px in rows(result, 0, 8, 2).chunks_exact(4) {
        assert_eq!(px, [30, 60, 90, 255]);
    }
}

#[test]
fn yuv420_planes_follow_the_matrix() {
    let gpu = Arc::new(SoftGpu::new());
    let ctx = DirectContext::new(gpu, Caps::soft(), ContextOptions::default());
    // white on the left half, black on the right
    let (sc, _) = surface(&ctx, 4, 4, Origin::TopLeft, |x, _| {
        if x < 2 { [255, 255, 255, 255] } else { [0, 0, 0, 255] }
    });
    let results: Results = Rc::new(RefCell::new(Vec::new()));
    sc.async_rescale_and_read_pixels_yuv420(
        &ctx,
        YuvColorSpace::Jpeg,
        false,
        None,
        IRect::from_xywh(0, 0, 4, 4),
        ISize::new(4, 4),
        RescaleGamma::Src,
        RescaleMode::Nearest,
        recorder(&results, "yuv"),
    );
    ctx.flush_and_submit(SyncCpu::Yes);
    let results = results.borrow();
    let result = results[0].1.as_ref().unwrap();
    assert_eq!(result.count(), 3);

    let y = rows(result, 0, 4, 4);
    for row in y.chunks_exact(4) {
        assert_eq!(row, [255, 255, 0, 0]);
    }
    // neutral chroma everywhere
    for plane in 1..3 {
        for v in rows(result, plane, 2, 2) {
            assert!(v.abs_diff(128) <= 1, "plane {plane}: {v}");
        }
    }
}

#[test]
fn yuv420_fails_as_a_whole() {
    let gpu = Arc::new(SoftGpu::new());
    let ctx = DirectContext::new(gpu, Caps::soft(), ContextOptions::default());
    let (sc, _) = surface(&ctx, 4, 4, Origin::TopLeft, |_, _| [0, 0, 0, 255]);
    let results: Results = Rc::new(RefCell::new(Vec::new()));
    sc.async_rescale_and_read_pixels_yuv420(
        &ctx,
        YuvColorSpace::Rec601,
        true,
        None,
        IRect::from_xywh(2, 2, 4, 4),
        ISize::new(2, 2),
        RescaleGamma::Src,
        RescaleMode::Linear,
        recorder(&results, "outside"),
    );
    let results = results.borrow();
    assert_eq!(results.len(), 1);
    assert!(results[0].1.is_none());
}

#[test]
fn abandoning_delivers_failures() {
    let gpu = Arc::new(SoftGpu::new());
    gpu.set_auto_complete(false);
    let ctx = DirectContext::new(gpu, Caps::soft(), ContextOptions::default());
    let (sc, _) = surface(&ctx, 2, 2, Origin::TopLeft, |_, _| [1, 2, 3, 255]);
    let results: Results = Rc::new(RefCell::new(Vec::new()));
    sc.async_read_pixels(&ctx, IRect::from_xywh(0, 0, 2, 2), ColorType::Rgba8888, recorder(&results, "lost"));
    ctx.abandon();
    let results = results.borrow();
    assert_eq!(results.len(), 1);
    assert!(results[0].1.is_none());
}
