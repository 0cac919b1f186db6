// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
Results of asynchronous readback.

A [`PixelTransferResult`] is a transfer that has been recorded but not yet completed: the
buffer the device will write into, plus an optional converter to run on the mapped bytes.
Once the device signals, transfers become planes of an [`AsyncReadResult`].

A plane either owns converted bytes on the heap, or is still a mapped view of the transfer
buffer.  Mapped planes keep their buffer alive and unmap it through the context's message
queue when the result is dropped.
*/

use crate::coordinates::ISize;
use crate::gpu::{BufferHandle, Gpu};
use crate::mapped_buffer_manager::ResourceRef;

/// Converts mapped transfer bytes (`src`) into client bytes (`dst`).
pub(crate) type PixelConverter = Box<dyn Fn(&mut [u8], &[u8]) -> bool>;

/// A recorded device-to-buffer transfer.
pub struct PixelTransferResult {
    buffer: ResourceRef,
    handle: BufferHandle,
    row_bytes: usize,
    converter: Option<PixelConverter>,
}

impl std::fmt::Debug for PixelTransferResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PixelTransferResult")
            .field("buffer", &self.handle)
            .field("row_bytes", &self.row_bytes)
            .field("converts", &self.converter.is_some())
            .finish()
    }
}

impl PixelTransferResult {
    pub(crate) fn new(
        buffer: ResourceRef,
        handle: BufferHandle,
        row_bytes: usize,
        converter: Option<PixelConverter>,
    ) -> Self {
        PixelTransferResult {
            buffer,
            handle,
            row_bytes,
            converter,
        }
    }

    /// Row bytes of the plane this transfer produces.
    pub fn row_bytes(&self) -> usize {
        self.row_bytes
    }

    /// Whether mapped bytes need converting before the client sees them.
    pub fn converts(&self) -> bool {
        self.converter.is_some()
    }
}

enum PlaneData {
    Owned(Box<[u8]>),
    Mapped {
        view: Box<[u8]>,
        _buffer: ResourceRef,
    },
}

struct Plane {
    data: PlaneData,
    row_bytes: usize,
}

/// Pixels delivered to an async read callback, one plane per channel group.
#[derive(Default)]
pub struct AsyncReadResult {
    planes: Vec<Plane>,
}

impl std::fmt::Debug for AsyncReadResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut list = f.debug_list();
        for plane in &self.planes {
            let kind = match plane.data {
                PlaneData::Owned(_) => "owned",
                PlaneData::Mapped { .. } => "mapped",
            };
            list.entry(&(kind, plane.row_bytes));
        }
        list.finish()
    }
}

impl AsyncReadResult {
    pub(crate) fn new() -> Self {
        AsyncReadResult::default()
    }

    pub fn count(&self) -> usize {
        self.planes.len()
    }

    /// Bytes of plane `i`.  Panics if `i >= count()`.
    pub fn data(&self, i: usize) -> &[u8] {
        match &self.planes[i].data {
            PlaneData::Owned(bytes) => bytes,
            PlaneData::Mapped { view, .. } => view,
        }
    }

    pub fn row_bytes(&self, i: usize) -> usize {
        self.planes[i].row_bytes
    }

    /// Whether plane `i` is still a mapping of device memory.
    pub fn is_mapped(&self, i: usize) -> bool {
        matches!(self.planes[i].data, PlaneData::Mapped { .. })
    }

    pub(crate) fn add_cpu_plane(&mut self, data: Box<[u8]>, row_bytes: usize) {
        self.planes.push(Plane {
            data: PlaneData::Owned(data),
            row_bytes,
        });
    }

    /// Maps the transfer buffer and appends it as a plane of `dimensions`.  Fails when the
    /// buffer cannot be mapped or the conversion is impossible.
    pub(crate) fn add_transfer_result(
        &mut self,
        result: PixelTransferResult,
        dimensions: ISize,
        gpu: &dyn Gpu,
    ) -> bool {
        let PixelTransferResult {
            mut buffer,
            handle,
            row_bytes,
            converter,
        } = result;
        let Some(view) = gpu.map_buffer(handle) else {
            logwise::warn_sync!(
                "mapping transfer buffer {handle} failed",
                handle = logwise::privacy::LogIt(handle)
            );
            return false;
        };
        match converter {
            Some(convert) => {
                let mut data = vec![0u8; row_bytes * dimensions.height.max(0) as usize];
                let ok = convert(&mut data, &view);
                gpu.unmap_buffer(handle, None);
                if !ok {
                    return false;
                }
                self.add_cpu_plane(data.into_boxed_slice(), row_bytes);
            }
            None => {
                buffer.set_mapped(handle);
                self.planes.push(Plane {
                    data: PlaneData::Mapped {
                        view,
                        _buffer: buffer,
                    },
                    row_bytes,
                });
            }
        }
        true
    }
}
