//! The boundary between this crate and the embedded viewer.
//!
//! [`ViewerVm`] lists every call the native side makes into the viewer.
//! Implementations resolve the remote class and method before marshaling any
//! argument, so a missing symbol surfaces as
//! [`ViewerError::SymbolResolution`] with nothing sent across.

use crate::config::ViewOptions;
use crate::error::{StartError, StopError, ViewerError};
use crate::types::{SessionHandle, Transform};

/// Remote class exposing the viewer entry points.
pub const VIEWER_CLASS: &str = "bdv/BigDataViewerJni";
/// Remote class of a rendered frame.
pub const IMAGE_CLASS: &str = "bdv/ARGBRenderImage";

/// A static or instance method looked up by name and JNI signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteMethod {
    pub name: &'static str,
    pub signature: &'static str,
}

const fn method(name: &'static str, signature: &'static str) -> RemoteMethod {
    RemoteMethod { name, signature }
}

/// Static entry points on [`VIEWER_CLASS`].
pub mod remote {
    use super::{RemoteMethod, method};

    pub const CONSTRUCT: RemoteMethod = method("construct", "(Ljava/lang/String;II[DI)I");
    pub const CONSTRUCT_SHARING_CACHE: RemoteMethod = method("construct", "(III[DI)I");
    pub const DESTRUCT: RemoteMethod = method("destruct", "(I)V");
    pub const SET_TRANSFORM: RemoteMethod = method("setTransform", "(I[D)V");
    pub const GET_TRANSFORM: RemoteMethod = method("getTransform", "(I[D)V");
    pub const GET_NUM_TIMEPOINTS: RemoteMethod = method("getNumTimepoints", "(I)I");
    pub const GET_NUM_SOURCES: RemoteMethod = method("getNumSources", "(I)I");
    pub const IS_SOURCE_VISIBLE: RemoteMethod = method("isSourceVisible", "(II)Z");
    pub const GET_SOURCE_PARAMS_MIN: RemoteMethod = method("getSourceParamsMin", "(II)I");
    pub const GET_SOURCE_PARAMS_MAX: RemoteMethod = method("getSourceParamsMax", "(II)I");
    pub const GET_SOURCE_PARAMS_COLOR: RemoteMethod = method("getSourceParamsColor", "(II)I");
    pub const SET_TIMEPOINT: RemoteMethod = method("setTimepoint", "(II)V");
    pub const SET_LINEAR_INTERPOLATION: RemoteMethod = method("setLinearInterpolation", "(IZ)V");
    pub const SET_SOURCE_VISIBLE: RemoteMethod = method("setSourceVisible", "(IIZ)V");
    pub const SET_SOURCE_PARAMS: RemoteMethod = method("setSourceParams", "(IIIII)V");
    pub const GET_RENDERED_BITMAP: RemoteMethod =
        method("getRenderedBitmap", "(I)Lbdv/ARGBRenderImage;");
}

/// Instance methods on [`IMAGE_CLASS`].
pub mod image {
    use super::{RemoteMethod, method};

    pub const GET_WIDTH: RemoteMethod = method("getWidth", "()I");
    pub const GET_HEIGHT: RemoteMethod = method("getHeight", "()I");
    pub const GET_DATA: RemoteMethod = method("getData", "()[I");
    pub const IS_COMPLETE: RemoteMethod = method("isComplete", "()Z");
}

/// Creates the embedded runtime.
pub trait Embedder {
    type Vm: ViewerVm;

    /// Launch a runtime with exactly these options. Returns
    /// [`StartError::AlreadyRunning`] if the process already hosts one.
    fn create_vm(&self, options: &[String]) -> Result<Self::Vm, StartError>;
}

/// A rendered frame whose pixel array is pinned in the runtime.
///
/// Only [`PinnedFrame::new`] builds one, and it is `unsafe`: the crate hands
/// out the pixels as a safe slice, so the pointer has to be good for as long
/// as the pin is held.
///
/// ```compile_fail
/// use bdv_runtime::PinnedFrame;
///
/// let frame = PinnedFrame {
///     width: 2,
///     height: 2,
///     complete: true,
///     pixels: 8 as *const u32,
///     len: 4,
///     pin: (),
/// };
/// ```
pub struct PinnedFrame<P> {
    pub(crate) width: i32,
    pub(crate) height: i32,
    pub(crate) complete: bool,
    pub(crate) pixels: *const u32,
    pub(crate) len: usize,
    pub(crate) pin: P,
}

impl<P> PinnedFrame<P> {
    /// # Safety
    ///
    /// Unless `len` is zero, `pixels` must be non-null, aligned for `u32`, and
    /// point to `len` initialized values that are neither moved, freed nor
    /// written to until `pin` is passed to [`ViewerVm::unpin_frame`] on the
    /// VM that produced it.
    pub unsafe fn new(
        width: i32,
        height: i32,
        complete: bool,
        pixels: *const u32,
        len: usize,
        pin: P,
    ) -> Self {
        Self {
            width,
            height,
            complete,
            pixels,
            len,
            pin,
        }
    }

    pub fn width(&self) -> i32 {
        self.width
    }

    pub fn height(&self) -> i32 {
        self.height
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// A running runtime with the viewer classes loaded.
///
/// Every call except attach/detach requires the calling thread to be
/// attached. [`crate::Runtime`] takes care of that.
pub trait ViewerVm: Send + Sync {
    /// Release capability for one pinned frame.
    type Pin;

    fn attach_current_thread(&self) -> Result<(), ViewerError>;
    fn detach_current_thread(&self);

    fn construct(&self, url: &str, view: &ViewOptions) -> Result<SessionHandle, ViewerError>;
    fn construct_sharing_cache(
        &self,
        share_with: SessionHandle,
        view: &ViewOptions,
    ) -> Result<SessionHandle, ViewerError>;
    fn destruct(&self, handle: SessionHandle) -> Result<(), ViewerError>;

    fn set_transform(&self, handle: SessionHandle, transform: &Transform) -> Result<(), ViewerError>;
    fn transform(&self, handle: SessionHandle) -> Result<Transform, ViewerError>;

    fn num_timepoints(&self, handle: SessionHandle) -> Result<i32, ViewerError>;
    fn num_sources(&self, handle: SessionHandle) -> Result<i32, ViewerError>;
    fn is_source_visible(&self, handle: SessionHandle, source: i32) -> Result<bool, ViewerError>;
    fn source_min(&self, handle: SessionHandle, source: i32) -> Result<i32, ViewerError>;
    fn source_max(&self, handle: SessionHandle, source: i32) -> Result<i32, ViewerError>;
    fn source_color(&self, handle: SessionHandle, source: i32) -> Result<i32, ViewerError>;

    fn set_timepoint(&self, handle: SessionHandle, timepoint: i32) -> Result<(), ViewerError>;
    fn set_linear_interpolation(&self, handle: SessionHandle, enabled: bool) -> Result<(), ViewerError>;
    fn set_source_visible(&self, handle: SessionHandle, source: i32, visible: bool) -> Result<(), ViewerError>;
    fn set_source_params(
        &self,
        handle: SessionHandle,
        source: i32,
        min: i32,
        max: i32,
        argb: i32,
    ) -> Result<(), ViewerError>;

    /// Poll for a frame rendered since the last poll and pin its pixels.
    /// `Ok(None)` means nothing changed.
    fn poll_frame(&self, handle: SessionHandle) -> Result<Option<PinnedFrame<Self::Pin>>, ViewerError>;

    /// Unpin without copying anything back.
    fn unpin_frame(&self, pin: Self::Pin);

    /// Tear the runtime down. The calling thread must already be detached
    /// from any per-call attachment.
    fn shutdown(self) -> Result<(), StopError>;
}
