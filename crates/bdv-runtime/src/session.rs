use std::cell::Cell;
use std::marker::PhantomData;

use crate::config::ViewOptions;
use crate::error::ViewerError;
use crate::frame::FrameView;
use crate::host::Runtime;
use crate::types::{Argb, SessionHandle, SourceParams, Transform};
use crate::vm::ViewerVm;

/// One dataset opened in a viewer inside the embedded runtime.
///
/// Each call attaches the calling thread, performs the remote call and
/// detaches again. The session may move between threads but is not `Sync`,
/// so calls on one session are always serialized.
///
/// Dropping the session destructs the remote viewer; use [`Session::close`]
/// to observe errors from that call.
pub struct Session<'rt, V: ViewerVm> {
    runtime: &'rt Runtime<V>,
    handle: SessionHandle,
    closed: bool,
    _not_sync: PhantomData<Cell<()>>,
}

impl<'rt, V: ViewerVm> Session<'rt, V> {
    pub(crate) fn open(
        runtime: &'rt Runtime<V>,
        url: &str,
        view: &ViewOptions,
    ) -> Result<Self, ViewerError> {
        view.validate()?;
        let handle = runtime.call("construct", |vm| vm.construct(url, view))?;
        if handle.raw() < 0 {
            tracing::error!(url, "Viewer failed to open dataset");
            return Err(ViewerError::OpenFailed(url.to_owned()));
        }
        tracing::info!(%handle, url, width = view.width, height = view.height, "Session opened");
        Ok(Self::with_handle(runtime, handle))
    }

    fn with_handle(runtime: &'rt Runtime<V>, handle: SessionHandle) -> Self {
        Self {
            runtime,
            handle,
            closed: false,
            _not_sync: PhantomData,
        }
    }

    /// Open a second viewer over this session's dataset, sharing its cache.
    pub fn open_sharing_cache(&self, view: &ViewOptions) -> Result<Session<'rt, V>, ViewerError> {
        view.validate()?;
        let handle = self.runtime.call("construct", |vm| {
            vm.construct_sharing_cache(self.handle, view)
        })?;
        if handle.raw() < 0 {
            tracing::error!(shared_with = %self.handle, "Viewer failed to open shared-cache session");
            return Err(ViewerError::OpenFailed(format!("cache of session {}", self.handle)));
        }
        tracing::info!(%handle, shared_with = %self.handle, "Shared-cache session opened");
        Ok(Self::with_handle(self.runtime, handle))
    }

    pub fn handle(&self) -> SessionHandle {
        self.handle
    }

    /// Destruct the remote viewer.
    pub fn close(mut self) -> Result<(), ViewerError> {
        self.closed = true;
        self.destruct()
    }

    fn destruct(&self) -> Result<(), ViewerError> {
        self.runtime.call("destruct", |vm| vm.destruct(self.handle))?;
        tracing::info!(handle = %self.handle, "Session closed");
        Ok(())
    }

    pub fn set_transform(&self, transform: &Transform) -> Result<(), ViewerError> {
        tracing::debug!(handle = %self.handle, "setTransform");
        self.runtime
            .call("setTransform", |vm| vm.set_transform(self.handle, transform))
    }

    pub fn transform(&self) -> Result<Transform, ViewerError> {
        self.runtime
            .call("getTransform", |vm| vm.transform(self.handle))
    }

    pub fn num_timepoints(&self) -> Result<i32, ViewerError> {
        self.runtime
            .call("getNumTimepoints", |vm| vm.num_timepoints(self.handle))
    }

    pub fn num_sources(&self) -> Result<i32, ViewerError> {
        self.runtime
            .call("getNumSources", |vm| vm.num_sources(self.handle))
    }

    pub fn is_source_visible(&self, source: i32) -> Result<bool, ViewerError> {
        self.runtime
            .call("isSourceVisible", |vm| vm.is_source_visible(self.handle, source))
    }

    pub fn source_min(&self, source: i32) -> Result<i32, ViewerError> {
        self.runtime
            .call("getSourceParamsMin", |vm| vm.source_min(self.handle, source))
    }

    pub fn source_max(&self, source: i32) -> Result<i32, ViewerError> {
        self.runtime
            .call("getSourceParamsMax", |vm| vm.source_max(self.handle, source))
    }

    pub fn source_color(&self, source: i32) -> Result<Argb, ViewerError> {
        self.runtime
            .call("getSourceParamsColor", |vm| vm.source_color(self.handle, source))
            .map(Argb::from_i32)
    }

    /// Display range, color and visibility of one source.
    pub fn source_params(&self, source: i32) -> Result<SourceParams, ViewerError> {
        Ok(SourceParams {
            min: self.source_min(source)?,
            max: self.source_max(source)?,
            color: self.source_color(source)?,
            visible: self.is_source_visible(source)?,
        })
    }

    pub fn set_timepoint(&self, timepoint: i32) -> Result<(), ViewerError> {
        tracing::debug!(handle = %self.handle, timepoint, "setTimepoint");
        self.runtime
            .call("setTimepoint", |vm| vm.set_timepoint(self.handle, timepoint))
    }

    pub fn set_linear_interpolation(&self, enabled: bool) -> Result<(), ViewerError> {
        self.runtime.call("setLinearInterpolation", |vm| {
            vm.set_linear_interpolation(self.handle, enabled)
        })
    }

    pub fn set_source_visible(&self, source: i32, visible: bool) -> Result<(), ViewerError> {
        tracing::debug!(handle = %self.handle, source, visible, "setSourceVisible");
        self.runtime.call("setSourceVisible", |vm| {
            vm.set_source_visible(self.handle, source, visible)
        })
    }

    pub fn set_source_params(&self, source: i32, min: i32, max: i32, color: Argb) -> Result<(), ViewerError> {
        tracing::debug!(handle = %self.handle, source, min, max, %color, "setSourceParams");
        self.runtime.call("setSourceParams", |vm| {
            vm.set_source_params(self.handle, source, min, max, color.to_i32())
        })
    }

    pub fn apply_source_params(&self, source: i32, params: &SourceParams) -> Result<(), ViewerError> {
        self.set_source_params(source, params.min, params.max, params.color)?;
        self.set_source_visible(source, params.visible)
    }

    /// Poll the renderer for a frame produced since the last poll.
    ///
    /// A returned [`FrameView`] pins the frame's pixel array and keeps this
    /// session mutably borrowed until it is released, so the session cannot
    /// be used (or polled again) meanwhile:
    ///
    /// ```compile_fail
    /// use bdv_runtime::{RuntimeConfig, RuntimeHost, ViewOptions, stub::StubEmbedder};
    ///
    /// let mut host = RuntimeHost::new(StubEmbedder::new());
    /// host.start(&RuntimeConfig::default()).unwrap();
    /// let mut session = host.open("stub://dataset", &ViewOptions::default()).unwrap();
    /// let first = session.rendered_bitmap().unwrap();
    /// let second = session.rendered_bitmap().unwrap();
    /// drop(first);
    /// ```
    ///
    /// Calls into other sessions from the pinning thread fail with
    /// [`ViewerError::CriticalSectionHeld`] until the frame is released.
    pub fn rendered_bitmap(&mut self) -> Result<Option<FrameView<'_, V>>, ViewerError> {
        let attached = self.runtime.attach().inspect_err(|e| {
            tracing::warn!(op = "getRenderedBitmap", "Viewer call failed: {e}");
        })?;

        let frame = match self.runtime.vm().poll_frame(self.handle) {
            Ok(Some(frame)) => frame,
            Ok(None) => return Ok(None),
            Err(e) => {
                tracing::warn!(op = "getRenderedBitmap", "Viewer call failed: {e}");
                return Err(e);
            }
        };

        tracing::debug!(
            handle = %self.handle,
            width = frame.width,
            height = frame.height,
            complete = frame.complete,
            "Frame pinned"
        );
        Ok(Some(FrameView::new(attached, frame)))
    }
}

impl<V: ViewerVm> Drop for Session<'_, V> {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        if let Err(e) = self.destruct() {
            tracing::error!(handle = %self.handle, "Failed to destruct viewer: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;
    use crate::host::RuntimeHost;
    use crate::stub::{StubCall, StubEmbedder};
    use tempfile::TempDir;

    fn running_host(embedder: &StubEmbedder) -> (TempDir, RuntimeHost<StubEmbedder>) {
        let jars = TempDir::new().unwrap();
        let mut host = RuntimeHost::new(embedder.clone());
        host.start(&RuntimeConfig::new(None, Some(jars.path()))).unwrap();
        (jars, host)
    }

    #[test]
    fn transform_round_trips() {
        let embedder = StubEmbedder::new();
        let (_jars, host) = running_host(&embedder);
        let session = host.open("stub://dataset", &ViewOptions::default()).unwrap();

        let written = Transform([
            0.48179778451100014, -0.015139443968170565, 0.38703521637412, -49.847175227038235,
            0.01752952012083952, 0.6179334597195949, 0.0023498766862651197, -18.37203762649213,
            -0.38693433215697026, 0.009143480324372823, 0.4820298600739718, 326.2586860796611,
        ]);
        session.set_transform(&written).unwrap();
        assert_eq!(session.transform().unwrap(), written);
    }

    #[test]
    fn source_params_snapshot() {
        let embedder = StubEmbedder::new().with_sources(2);
        let (_jars, host) = running_host(&embedder);
        let session = host.open("stub://dataset", &ViewOptions::default()).unwrap();

        let params = SourceParams {
            min: 200,
            max: 1080,
            color: Argb(0xff00_ff00),
            visible: true,
        };
        session.apply_source_params(1, &params).unwrap();
        assert_eq!(session.source_params(1).unwrap(), params);
        assert_eq!(session.source_color(1).unwrap(), Argb(0xff00_ff00));
    }

    #[test]
    fn missing_method_fails_without_effect() {
        let embedder = StubEmbedder::new().without_method("setTimepoint");
        let (_jars, host) = running_host(&embedder);
        let session = host.open("stub://dataset", &ViewOptions::default()).unwrap();
        let calls_before = embedder.calls().len();

        let err = session.set_timepoint(5).unwrap_err();
        assert!(err.is_symbol_resolution());
        assert_eq!(embedder.calls().len(), calls_before);
        assert_eq!(embedder.attaches(), embedder.detaches());
    }

    #[test]
    fn missing_viewer_class_blocks_open() {
        let embedder = StubEmbedder::new().without_viewer_class();
        let (_jars, host) = running_host(&embedder);

        let err = host
            .open("stub://dataset", &ViewOptions::default())
            .err()
            .unwrap();
        assert!(err.is_symbol_resolution());
        assert!(embedder.calls().is_empty());
    }

    #[test]
    fn negative_handle_is_open_failure() {
        let embedder = StubEmbedder::new().with_first_handle(-1);
        let (_jars, host) = running_host(&embedder);

        let err = host
            .open("stub://missing.xml", &ViewOptions::default())
            .err()
            .unwrap();
        assert!(matches!(err, ViewerError::OpenFailed(url) if url == "stub://missing.xml"));
    }

    #[test]
    fn invalid_view_is_rejected_before_any_call() {
        let embedder = StubEmbedder::new();
        let (_jars, host) = running_host(&embedder);

        let view = ViewOptions::new(800, 600, vec![2.0]);
        assert!(matches!(
            host.open("stub://dataset", &view),
            Err(ViewerError::InvalidOptions(_))
        ));
        assert_eq!(embedder.attaches(), 0);
    }

    #[test]
    fn oversized_view_is_rejected_at_open() {
        let embedder = StubEmbedder::new();
        let (_jars, host) = running_host(&embedder);

        let view = ViewOptions::new(50_000, 50_000, vec![1.0]);
        assert!(matches!(
            host.open("stub://big", &view),
            Err(ViewerError::InvalidOptions(_))
        ));
        assert!(embedder.calls().is_empty());
    }

    #[test]
    fn drop_destructs_remote_viewer_once() {
        let embedder = StubEmbedder::new().with_first_handle(7);
        let (_jars, host) = running_host(&embedder);

        let session = host.open("stub://dataset", &ViewOptions::default()).unwrap();
        session.close().unwrap();
        let destructs = embedder
            .calls()
            .into_iter()
            .filter(|c| matches!(c, StubCall::Destruct { .. }))
            .count();
        assert_eq!(destructs, 1);

        {
            let _session = host.open("stub://dataset", &ViewOptions::default()).unwrap();
        }
        assert_eq!(
            embedder.calls().last(),
            Some(&StubCall::Destruct {
                handle: SessionHandle(8)
            })
        );
    }

    #[test]
    fn shared_cache_session_gets_own_handle() {
        let embedder = StubEmbedder::new().with_first_handle(10);
        let (_jars, host) = running_host(&embedder);
        let first = host.open("stub://dataset", &ViewOptions::default()).unwrap();

        let view = ViewOptions::new(400, 300, vec![1.0, 0.5]);
        let second = first.open_sharing_cache(&view).unwrap();

        assert_eq!(second.handle(), SessionHandle(11));
        assert!(embedder.calls().contains(&StubCall::ConstructSharingCache {
            share_with: SessionHandle(10),
            width: 400,
            height: 300,
            screen_scales: vec![1.0, 0.5],
            rendering_threads: 3,
        }));
    }

    #[test]
    fn every_call_attaches_and_detaches() {
        let embedder = StubEmbedder::new().with_sources(3);
        let (_jars, host) = running_host(&embedder);
        let session = host.open("stub://dataset", &ViewOptions::default()).unwrap();

        session.num_timepoints().unwrap();
        session.set_linear_interpolation(true).unwrap();
        session.source_params(2).unwrap();

        assert_eq!(embedder.attaches(), 1 + 2 + 4);
        assert_eq!(embedder.attaches(), embedder.detaches());
    }
}
