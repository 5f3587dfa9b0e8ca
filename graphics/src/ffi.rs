//! C ABI over the device.
//!
//! Every object crosses the boundary as an opaque pointer created and
//! destroyed by this module. Sync points are plain structs. Functions never
//! unwind into the caller: invalid arguments and unbalanced frame calls are
//! reported through [`KilnStatus`].

use std::ptr;
use std::slice;

use crate::command::CommandContext;
use crate::device::{Device, DeviceConfig};
use crate::pipeline::fingerprint_parts;
use crate::sync::SyncPoint;
use crate::types::QueueType;

/// Opaque device handle.
pub struct KilnDevice {
    device: Device,
}

/// Opaque command context handle.
pub struct KilnContext {
    context: CommandContext,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KilnStatus {
    Ok = 0,
    DeviceRemoved = 1,
    InvalidArgument = 2,
    Failed = 3,
}

/// A queue timeline point. `queue` is 0 graphics, 1 compute, 2 copy.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct KilnSyncPoint {
    pub queue: u32,
    pub value: u64,
}

impl From<SyncPoint> for KilnSyncPoint {
    fn from(sync_point: SyncPoint) -> Self {
        Self {
            queue: sync_point.queue as u32,
            value: sync_point.value,
        }
    }
}

fn queue_from_raw(queue: u32) -> Option<QueueType> {
    QueueType::ALL.get(queue as usize).copied()
}

/// Create a device over the simulated backend. Returns null on failure.
#[unsafe(no_mangle)]
pub extern "C" fn kiln_device_create_dummy() -> *mut KilnDevice {
    match Device::dummy(DeviceConfig::default().with_label("ffi")) {
        Ok(device) => Box::into_raw(Box::new(KilnDevice { device })),
        Err(err) => {
            log::error!("kiln_device_create_dummy: {err}");
            ptr::null_mut()
        }
    }
}

/// # Safety
///
/// `device` must be null or a pointer returned by
/// [`kiln_device_create_dummy`] that was not destroyed yet.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn kiln_device_destroy(device: *mut KilnDevice) {
    if !device.is_null() {
        // SAFETY: ownership came from Box::into_raw in kiln_device_create_dummy.
        drop(unsafe { Box::from_raw(device) });
    }
}

/// Open a frame. A second call before `kiln_device_end_frame` is rejected.
///
/// # Safety
///
/// `device` must be null or a live device pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn kiln_device_begin_frame(device: *mut KilnDevice) -> KilnStatus {
    // SAFETY: guaranteed by the caller.
    let Some(handle) = (unsafe { device.as_mut() }) else {
        return KilnStatus::InvalidArgument;
    };
    let device = &mut handle.device;
    if device.is_in_frame() {
        log::error!("kiln_device_begin_frame: frame {} is still open", device.frame_index());
        return KilnStatus::InvalidArgument;
    }
    device.begin_frame();
    frame_status(device)
}

/// Close the open frame. Without one the call is rejected.
///
/// # Safety
///
/// `device` must be null or a live device pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn kiln_device_end_frame(device: *mut KilnDevice) -> KilnStatus {
    // SAFETY: guaranteed by the caller.
    let Some(handle) = (unsafe { device.as_mut() }) else {
        return KilnStatus::InvalidArgument;
    };
    let device = &mut handle.device;
    if device.is_crashed() {
        return KilnStatus::DeviceRemoved;
    }
    if !device.is_in_frame() {
        log::error!("kiln_device_end_frame: no open frame");
        return KilnStatus::InvalidArgument;
    }
    device.end_frame();
    frame_status(device)
}

fn frame_status(device: &Device) -> KilnStatus {
    if device.is_crashed() {
        KilnStatus::DeviceRemoved
    } else {
        KilnStatus::Ok
    }
}

/// # Safety
///
/// `device` must be null or a live device pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn kiln_device_is_crashed(device: *const KilnDevice) -> bool {
    // SAFETY: guaranteed by the caller.
    unsafe { device.as_ref() }.is_some_and(|handle| handle.device.is_crashed())
}

/// Open a context on `queue`. Returns null when the device has crashed or
/// the queue is unknown.
///
/// # Safety
///
/// `device` must be null or a live device pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn kiln_device_request_context(device: *mut KilnDevice, queue: u32) -> *mut KilnContext {
    // SAFETY: guaranteed by the caller.
    let (Some(handle), Some(queue)) = (unsafe { device.as_mut() }, queue_from_raw(queue)) else {
        return ptr::null_mut();
    };
    match handle.device.request_context(queue) {
        Some(context) => Box::into_raw(Box::new(KilnContext { context })),
        None => ptr::null_mut(),
    }
}

/// # Safety
///
/// `context` must be null or a live context pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn kiln_context_draw_indexed(
    context: *mut KilnContext,
    index_count: u32,
    instance_count: u32,
    start_index: u32,
    base_vertex: i32,
    start_instance: u32,
) -> KilnStatus {
    // SAFETY: guaranteed by the caller.
    let Some(handle) = (unsafe { context.as_mut() }) else {
        return KilnStatus::InvalidArgument;
    };
    let ctx = &mut handle.context;
    if ctx.is_closed() || !ctx.queue_type().supports_graphics() {
        return KilnStatus::InvalidArgument;
    }
    ctx.draw_indexed(index_count, instance_count, start_index, base_vertex, start_instance);
    KilnStatus::Ok
}

/// # Safety
///
/// `context` must be null or a live context pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn kiln_context_dispatch(context: *mut KilnContext, x: u32, y: u32, z: u32) -> KilnStatus {
    // SAFETY: guaranteed by the caller.
    let Some(handle) = (unsafe { context.as_mut() }) else {
        return KilnStatus::InvalidArgument;
    };
    let ctx = &mut handle.context;
    if ctx.is_closed() || !ctx.queue_type().supports_compute() {
        return KilnStatus::InvalidArgument;
    }
    ctx.dispatch(x, y, z);
    KilnStatus::Ok
}

/// Submit and consume `context`. On success the sync point is written to
/// `out` when it is not null.
///
/// # Safety
///
/// `device` and `context` must be null or live pointers; `context` must not
/// be used afterwards. `out` must be null or valid for writes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn kiln_device_submit(
    device: *mut KilnDevice,
    context: *mut KilnContext,
    out: *mut KilnSyncPoint,
) -> KilnStatus {
    if context.is_null() {
        return KilnStatus::InvalidArgument;
    }
    // SAFETY: ownership came from Box::into_raw in kiln_device_request_context.
    let context = unsafe { Box::from_raw(context) }.context;
    // SAFETY: guaranteed by the caller.
    let Some(handle) = (unsafe { device.as_mut() }) else {
        return KilnStatus::InvalidArgument;
    };
    match handle.device.submit(context) {
        Ok(sync_point) => {
            // SAFETY: guaranteed by the caller.
            if let Some(out) = unsafe { out.as_mut() } {
                *out = sync_point.into();
            }
            KilnStatus::Ok
        }
        Err(err) if err.is_device_removed() => KilnStatus::DeviceRemoved,
        Err(err) => {
            log::error!("kiln_device_submit: {err}");
            KilnStatus::Failed
        }
    }
}

/// Whether the GPU has passed `sync_point`. False on any error.
///
/// # Safety
///
/// `device` must be null or a live device pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn kiln_device_is_complete(device: *mut KilnDevice, sync_point: KilnSyncPoint) -> bool {
    // SAFETY: guaranteed by the caller.
    let (Some(handle), Some(queue)) = (unsafe { device.as_mut() }, queue_from_raw(sync_point.queue)) else {
        return false;
    };
    handle
        .device
        .is_complete(SyncPoint::new(queue, sync_point.value))
        .unwrap_or(false)
}

/// Stable fingerprint of a pipeline from its root-signature, program and
/// output-description bytes.
///
/// # Safety
///
/// Each pointer must be valid for reads of its length, or null with a
/// length of zero.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn kiln_pipeline_fingerprint(
    root_signature: *const u8,
    root_signature_len: usize,
    program: *const u8,
    program_len: usize,
    output: *const u8,
    output_len: usize,
) -> u64 {
    // SAFETY: guaranteed by the caller.
    let parts = unsafe {
        [
            bytes(root_signature, root_signature_len),
            bytes(program, program_len),
            bytes(output, output_len),
        ]
    };
    fingerprint_parts(&parts).0
}

unsafe fn bytes<'a>(data: *const u8, len: usize) -> &'a [u8] {
    if data.is_null() || len == 0 {
        &[]
    } else {
        // SAFETY: the caller guarantees `data` is valid for `len` bytes.
        unsafe { slice::from_raw_parts(data, len) }
    }
}
