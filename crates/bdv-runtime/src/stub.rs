//! In-process stand-in for the embedded viewer, for tests.
//!
//! [`StubEmbedder`] creates [`StubVm`]s that keep viewer state in plain Rust
//! structures, record every call that reaches them with its handle and
//! arguments, and count attaches, detaches and pins. Frames follow the
//! viewer's dirty tracking: construction and every state change schedule a
//! render, and a poll hands out at most one frame per render.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};

use crate::config::ViewOptions;
use crate::error::{StartError, StopError, Symbol, ViewerError};
use crate::types::{Argb, SessionHandle, SourceParams, Transform};
use crate::vm::{Embedder, PinnedFrame, RemoteMethod, VIEWER_CLASS, ViewerVm, remote};

/// A call that reached the stub viewer.
#[derive(Debug, Clone, PartialEq)]
pub enum StubCall {
    Construct {
        url: String,
        width: i32,
        height: i32,
        screen_scales: Vec<f64>,
        rendering_threads: i32,
    },
    ConstructSharingCache {
        share_with: SessionHandle,
        width: i32,
        height: i32,
        screen_scales: Vec<f64>,
        rendering_threads: i32,
    },
    Destruct { handle: SessionHandle },
    SetTransform { handle: SessionHandle, transform: Transform },
    GetTransform { handle: SessionHandle },
    GetNumTimepoints { handle: SessionHandle },
    GetNumSources { handle: SessionHandle },
    IsSourceVisible { handle: SessionHandle, source: i32 },
    GetSourceParamsMin { handle: SessionHandle, source: i32 },
    GetSourceParamsMax { handle: SessionHandle, source: i32 },
    GetSourceParamsColor { handle: SessionHandle, source: i32 },
    SetTimepoint { handle: SessionHandle, timepoint: i32 },
    SetLinearInterpolation { handle: SessionHandle, enabled: bool },
    SetSourceVisible { handle: SessionHandle, source: i32, visible: bool },
    SetSourceParams { handle: SessionHandle, source: i32, min: i32, max: i32, argb: i32 },
    GetRenderedBitmap { handle: SessionHandle },
}

struct StubViewer {
    width: i32,
    height: i32,
    transform: Transform,
    timepoint: i32,
    linear_interpolation: bool,
    sources: Vec<SourceParams>,
    /// Pending render and whether it will be the final refinement.
    pending: Option<bool>,
}

impl StubViewer {
    fn new(width: i32, height: i32, num_sources: usize) -> Self {
        let sources = (0..num_sources)
            .map(|i| SourceParams {
                min: 0,
                max: 65535,
                color: Argb::WHITE,
                visible: i == 0,
            })
            .collect();
        Self {
            width,
            height,
            transform: Transform::identity(),
            timepoint: 0,
            linear_interpolation: false,
            sources,
            pending: Some(true),
        }
    }

    fn source(&mut self, source: i32, call: &'static str) -> Result<&mut SourceParams, ViewerError> {
        usize::try_from(source)
            .ok()
            .and_then(|i| self.sources.get_mut(i))
            .ok_or_else(|| ViewerError::invocation(call, format!("source index {source} out of bounds")))
    }

    /// Solid fill with the first visible source's color.
    fn render(&self) -> Result<Arc<[u32]>, ViewerError> {
        let fill = self
            .sources
            .iter()
            .find(|s| s.visible)
            .map_or(0xff00_0000, |s| s.color.0);
        let len = self
            .width
            .checked_mul(self.height)
            .and_then(|n| usize::try_from(n).ok())
            .ok_or_else(|| {
                ViewerError::invocation(
                    remote::GET_RENDERED_BITMAP.name,
                    format!("{}x{} frame does not fit an int array", self.width, self.height),
                )
            })?;
        Ok(vec![fill; len].into())
    }
}

struct StubState {
    first_handle: i32,
    num_sources: usize,
    num_timepoints: i32,
    missing_methods: HashSet<&'static str>,
    missing_viewer_class: bool,
    init_failure: Option<String>,

    vm_live: bool,
    vms_created: usize,
    last_options: Vec<String>,
    shut_down: bool,

    attached: HashSet<ThreadId>,
    attaches: usize,
    detaches: usize,
    pinned: usize,
    unpins: usize,

    next_handle: Option<i32>,
    viewers: HashMap<SessionHandle, StubViewer>,
    calls: Vec<StubCall>,
}

/// Creates [`StubVm`]s sharing one inspectable state.
#[derive(Clone)]
pub struct StubEmbedder {
    state: Arc<Mutex<StubState>>,
}

impl Default for StubEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

impl StubEmbedder {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(StubState {
                first_handle: 1,
                num_sources: 1,
                num_timepoints: 1,
                missing_methods: HashSet::new(),
                missing_viewer_class: false,
                init_failure: None,
                vm_live: false,
                vms_created: 0,
                last_options: Vec::new(),
                shut_down: false,
                attached: HashSet::new(),
                attaches: 0,
                detaches: 0,
                pinned: 0,
                unpins: 0,
                next_handle: None,
                viewers: HashMap::new(),
                calls: Vec::new(),
            })),
        }
    }

    /// Handle returned by the first `construct`; later ones count up from it.
    /// A negative value makes every `construct` report failure.
    pub fn with_first_handle(self, handle: i32) -> Self {
        self.lock().first_handle = handle;
        self
    }

    pub fn with_sources(self, num_sources: usize) -> Self {
        self.lock().num_sources = num_sources;
        self
    }

    pub fn with_timepoints(self, num_timepoints: i32) -> Self {
        self.lock().num_timepoints = num_timepoints;
        self
    }

    /// Make lookups of the named viewer method fail.
    pub fn without_method(self, name: &'static str) -> Self {
        self.lock().missing_methods.insert(name);
        self
    }

    /// Make lookups of the viewer class fail.
    pub fn without_viewer_class(self) -> Self {
        self.lock().missing_viewer_class = true;
        self
    }

    /// Make runtime creation fail with the given status.
    pub fn failing_init(self, status: impl Into<String>) -> Self {
        self.lock().init_failure = Some(status.into());
        self
    }

    /// Have the renderer produce a new frame for `handle`.
    pub fn request_render(&self, handle: SessionHandle, complete: bool) {
        if let Some(viewer) = self.lock().viewers.get_mut(&handle) {
            viewer.pending = Some(complete);
        }
    }

    pub fn calls(&self) -> Vec<StubCall> {
        self.lock().calls.clone()
    }

    pub fn vms_created(&self) -> usize {
        self.lock().vms_created
    }

    pub fn last_options(&self) -> Vec<String> {
        self.lock().last_options.clone()
    }

    pub fn is_shut_down(&self) -> bool {
        self.lock().shut_down
    }

    pub fn attaches(&self) -> usize {
        self.lock().attaches
    }

    pub fn detaches(&self) -> usize {
        self.lock().detaches
    }

    /// Frames currently pinned.
    pub fn pinned(&self) -> usize {
        self.lock().pinned
    }

    pub fn unpins(&self) -> usize {
        self.lock().unpins
    }

    pub fn timepoint(&self, handle: SessionHandle) -> Option<i32> {
        self.lock().viewers.get(&handle).map(|v| v.timepoint)
    }

    pub fn linear_interpolation(&self, handle: SessionHandle) -> Option<bool> {
        self.lock().viewers.get(&handle).map(|v| v.linear_interpolation)
    }

    /// Handles of viewers still alive on the remote side.
    pub fn live_handles(&self) -> Vec<SessionHandle> {
        let mut handles: Vec<_> = self.lock().viewers.keys().copied().collect();
        handles.sort_by_key(|h| h.raw());
        handles
    }

    fn lock(&self) -> MutexGuard<'_, StubState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Embedder for StubEmbedder {
    type Vm = StubVm;

    fn create_vm(&self, options: &[String]) -> Result<StubVm, StartError> {
        let mut state = self.lock();
        if state.vm_live {
            return Err(StartError::AlreadyRunning);
        }
        if let Some(status) = &state.init_failure {
            return Err(StartError::RuntimeInitFailed(status.clone()));
        }
        state.vm_live = true;
        state.shut_down = false;
        state.vms_created += 1;
        state.last_options = options.to_vec();
        Ok(StubVm {
            embedder: self.clone(),
        })
    }
}

/// Keeps a stub frame's pixels alive while pinned.
pub struct StubPin {
    _pixels: Arc<[u32]>,
}

/// A stub runtime created by [`StubEmbedder`].
pub struct StubVm {
    embedder: StubEmbedder,
}

impl StubVm {
    /// Lock state, check the thread is attached and the method resolves, then
    /// record the call.
    fn enter(&self, method: RemoteMethod, call: StubCall) -> Result<MutexGuard<'_, StubState>, ViewerError> {
        let mut state = self.embedder.lock();
        if !state.attached.contains(&thread::current().id()) {
            return Err(ViewerError::AttachFailed(format!(
                "{} called from an unattached thread",
                method.name
            )));
        }
        if state.missing_viewer_class {
            return Err(ViewerError::SymbolResolution(Symbol::class(VIEWER_CLASS)));
        }
        if state.missing_methods.contains(method.name) {
            return Err(ViewerError::SymbolResolution(Symbol::method(
                VIEWER_CLASS,
                method.name,
                method.signature,
            )));
        }
        state.calls.push(call);
        Ok(state)
    }

    fn allocate_handle(state: &mut StubState) -> SessionHandle {
        if state.first_handle < 0 {
            return SessionHandle(-1);
        }
        let next = state.next_handle.unwrap_or(state.first_handle);
        state.next_handle = Some(next + 1);
        SessionHandle(next)
    }
}

impl ViewerVm for StubVm {
    type Pin = StubPin;

    fn attach_current_thread(&self) -> Result<(), ViewerError> {
        let mut state = self.embedder.lock();
        if state.shut_down {
            return Err(ViewerError::AttachFailed("runtime destroyed".into()));
        }
        state.attached.insert(thread::current().id());
        state.attaches += 1;
        Ok(())
    }

    fn detach_current_thread(&self) {
        let mut state = self.embedder.lock();
        state.attached.remove(&thread::current().id());
        state.detaches += 1;
    }

    fn construct(&self, url: &str, view: &ViewOptions) -> Result<SessionHandle, ViewerError> {
        let mut state = self.enter(
            remote::CONSTRUCT,
            StubCall::Construct {
                url: url.to_owned(),
                width: view.width,
                height: view.height,
                screen_scales: view.screen_scales.clone(),
                rendering_threads: view.rendering_threads,
            },
        )?;
        let handle = Self::allocate_handle(&mut state);
        if handle.raw() >= 0 {
            let viewer = StubViewer::new(view.width, view.height, state.num_sources);
            state.viewers.insert(handle, viewer);
        }
        Ok(handle)
    }

    fn construct_sharing_cache(
        &self,
        share_with: SessionHandle,
        view: &ViewOptions,
    ) -> Result<SessionHandle, ViewerError> {
        let mut state = self.enter(
            remote::CONSTRUCT_SHARING_CACHE,
            StubCall::ConstructSharingCache {
                share_with,
                width: view.width,
                height: view.height,
                screen_scales: view.screen_scales.clone(),
                rendering_threads: view.rendering_threads,
            },
        )?;
        let Some(shared) = state.viewers.get(&share_with) else {
            return Err(ViewerError::invocation(
                "construct",
                format!("no viewer {share_with} to share a cache with"),
            ));
        };
        let sources = shared.sources.len();
        let handle = Self::allocate_handle(&mut state);
        if handle.raw() >= 0 {
            state
                .viewers
                .insert(handle, StubViewer::new(view.width, view.height, sources));
        }
        Ok(handle)
    }

    fn destruct(&self, handle: SessionHandle) -> Result<(), ViewerError> {
        let mut state = self.enter(remote::DESTRUCT, StubCall::Destruct { handle })?;
        state.viewers.remove(&handle);
        Ok(())
    }

    fn set_transform(&self, handle: SessionHandle, transform: &Transform) -> Result<(), ViewerError> {
        let mut state = self.enter(
            remote::SET_TRANSFORM,
            StubCall::SetTransform {
                handle,
                transform: *transform,
            },
        )?;
        if let Some(viewer) = state.viewers.get_mut(&handle) {
            viewer.transform = *transform;
            viewer.pending = Some(true);
        }
        Ok(())
    }

    fn transform(&self, handle: SessionHandle) -> Result<Transform, ViewerError> {
        let state = self.enter(remote::GET_TRANSFORM, StubCall::GetTransform { handle })?;
        // An unknown viewer leaves the out-array untouched.
        Ok(state
            .viewers
            .get(&handle)
            .map_or(Transform([0.0; 12]), |v| v.transform))
    }

    fn num_timepoints(&self, handle: SessionHandle) -> Result<i32, ViewerError> {
        let state = self.enter(remote::GET_NUM_TIMEPOINTS, StubCall::GetNumTimepoints { handle })?;
        let known = state.viewers.contains_key(&handle);
        Ok(if known { state.num_timepoints } else { 0 })
    }

    fn num_sources(&self, handle: SessionHandle) -> Result<i32, ViewerError> {
        let state = self.enter(remote::GET_NUM_SOURCES, StubCall::GetNumSources { handle })?;
        Ok(state
            .viewers
            .get(&handle)
            .map_or(0, |v| i32::try_from(v.sources.len()).unwrap_or(i32::MAX)))
    }

    fn is_source_visible(&self, handle: SessionHandle, source: i32) -> Result<bool, ViewerError> {
        let mut state = self.enter(
            remote::IS_SOURCE_VISIBLE,
            StubCall::IsSourceVisible { handle, source },
        )?;
        match state.viewers.get_mut(&handle) {
            Some(viewer) => Ok(viewer.source(source, "isSourceVisible")?.visible),
            None => Ok(false),
        }
    }

    fn source_min(&self, handle: SessionHandle, source: i32) -> Result<i32, ViewerError> {
        let mut state = self.enter(
            remote::GET_SOURCE_PARAMS_MIN,
            StubCall::GetSourceParamsMin { handle, source },
        )?;
        match state.viewers.get_mut(&handle) {
            Some(viewer) => Ok(viewer.source(source, "getSourceParamsMin")?.min),
            None => Ok(0),
        }
    }

    fn source_max(&self, handle: SessionHandle, source: i32) -> Result<i32, ViewerError> {
        let mut state = self.enter(
            remote::GET_SOURCE_PARAMS_MAX,
            StubCall::GetSourceParamsMax { handle, source },
        )?;
        match state.viewers.get_mut(&handle) {
            Some(viewer) => Ok(viewer.source(source, "getSourceParamsMax")?.max),
            None => Ok(0),
        }
    }

    fn source_color(&self, handle: SessionHandle, source: i32) -> Result<i32, ViewerError> {
        let mut state = self.enter(
            remote::GET_SOURCE_PARAMS_COLOR,
            StubCall::GetSourceParamsColor { handle, source },
        )?;
        match state.viewers.get_mut(&handle) {
            Some(viewer) => Ok(viewer.source(source, "getSourceParamsColor")?.color.to_i32()),
            None => Ok(0),
        }
    }

    fn set_timepoint(&self, handle: SessionHandle, timepoint: i32) -> Result<(), ViewerError> {
        let mut state = self.enter(
            remote::SET_TIMEPOINT,
            StubCall::SetTimepoint { handle, timepoint },
        )?;
        if let Some(viewer) = state.viewers.get_mut(&handle) {
            viewer.timepoint = timepoint;
            viewer.pending = Some(true);
        }
        Ok(())
    }

    fn set_linear_interpolation(&self, handle: SessionHandle, enabled: bool) -> Result<(), ViewerError> {
        let mut state = self.enter(
            remote::SET_LINEAR_INTERPOLATION,
            StubCall::SetLinearInterpolation { handle, enabled },
        )?;
        if let Some(viewer) = state.viewers.get_mut(&handle) {
            viewer.linear_interpolation = enabled;
            viewer.pending = Some(true);
        }
        Ok(())
    }

    fn set_source_visible(&self, handle: SessionHandle, source: i32, visible: bool) -> Result<(), ViewerError> {
        let mut state = self.enter(
            remote::SET_SOURCE_VISIBLE,
            StubCall::SetSourceVisible {
                handle,
                source,
                visible,
            },
        )?;
        if let Some(viewer) = state.viewers.get_mut(&handle) {
            viewer.source(source, "setSourceVisible")?.visible = visible;
            viewer.pending = Some(true);
        }
        Ok(())
    }

    fn set_source_params(
        &self,
        handle: SessionHandle,
        source: i32,
        min: i32,
        max: i32,
        argb: i32,
    ) -> Result<(), ViewerError> {
        let mut state = self.enter(
            remote::SET_SOURCE_PARAMS,
            StubCall::SetSourceParams {
                handle,
                source,
                min,
                max,
                argb,
            },
        )?;
        if let Some(viewer) = state.viewers.get_mut(&handle) {
            let params = viewer.source(source, "setSourceParams")?;
            params.min = min;
            params.max = max;
            params.color = Argb::from_i32(argb);
            viewer.pending = Some(true);
        }
        Ok(())
    }

    fn poll_frame(&self, handle: SessionHandle) -> Result<Option<PinnedFrame<StubPin>>, ViewerError> {
        let mut state = self.enter(
            remote::GET_RENDERED_BITMAP,
            StubCall::GetRenderedBitmap { handle },
        )?;
        let Some(viewer) = state.viewers.get_mut(&handle) else {
            return Ok(None);
        };
        let Some(complete) = viewer.pending.take() else {
            return Ok(None);
        };
        let (width, height) = (viewer.width, viewer.height);
        let pixels = viewer.render()?;
        state.pinned += 1;
        let (ptr, len) = (pixels.as_ptr(), pixels.len());
        let pin = StubPin { _pixels: pixels };
        // SAFETY: the pin owns the `Arc`, so the buffer lives, unmoved and
        // unwritten, until the pin comes back through `unpin_frame`.
        let frame = unsafe { PinnedFrame::new(width, height, complete, ptr, len, pin) };
        Ok(Some(frame))
    }

    fn unpin_frame(&self, _pin: StubPin) {
        let mut state = self.embedder.lock();
        state.pinned = state.pinned.saturating_sub(1);
        state.unpins += 1;
    }

    fn shutdown(self) -> Result<(), StopError> {
        let mut state = self.embedder.lock();
        if !state.attached.is_empty() {
            return Err(StopError::TeardownFailed(format!(
                "{} thread(s) still attached",
                state.attached.len()
            )));
        }
        state.vm_live = false;
        state.shut_down = true;
        state.viewers.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_fills_with_first_visible_color() {
        let mut viewer = StubViewer::new(4, 3, 2);
        viewer.sources[0].visible = false;
        viewer.sources[1].visible = true;
        viewer.sources[1].color = Argb(0xff12_3456);

        let pixels = viewer.render().unwrap();
        assert_eq!(pixels.len(), 12);
        assert!(pixels.iter().all(|p| *p == 0xff12_3456));
    }

    #[test]
    fn render_refuses_sizes_beyond_an_int_array() {
        let viewer = StubViewer::new(50_000, 50_000, 1);
        assert!(matches!(
            viewer.render(),
            Err(ViewerError::InvocationFailed { call: "getRenderedBitmap", .. })
        ));
    }
}
