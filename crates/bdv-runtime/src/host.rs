use std::collections::HashSet;
use std::marker::PhantomData;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};

use crate::classpath::assemble_classpath;
use crate::config::{RuntimeConfig, ViewOptions};
use crate::error::{StartError, StopError, ViewerError};
use crate::session::Session;
use crate::vm::{Embedder, ViewerVm};

enum HostState<V> {
    NotStarted,
    Running(Runtime<V>),
    Stopped,
}

/// Owner of the embedded runtime.
///
/// The host is plain state threaded through the program rather than a global:
/// [`Session`]s borrow the [`Runtime`] it hands out, so the borrow checker
/// rejects `stop()` while any session (or pinned frame) is alive.
pub struct RuntimeHost<E: Embedder> {
    embedder: E,
    state: HostState<E::Vm>,
}

impl<E: Embedder> RuntimeHost<E> {
    pub fn new(embedder: E) -> Self {
        Self {
            embedder,
            state: HostState::NotStarted,
        }
    }

    pub fn embedder(&self) -> &E {
        &self.embedder
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state, HostState::Running(_))
    }

    pub fn is_stopped(&self) -> bool {
        matches!(self.state, HostState::Stopped)
    }

    /// Assemble the classpath and launch the runtime with the heap option and
    /// class path as its only two options.
    pub fn start(&mut self, config: &RuntimeConfig) -> Result<(), StartError> {
        if self.is_running() {
            tracing::error!("Runtime already running");
            return Err(StartError::AlreadyRunning);
        }

        let jar_dir = config.jar_dir();
        let classpath = assemble_classpath(jar_dir).inspect_err(|e| {
            tracing::error!("{e}");
        })?;

        let options = vec![config.heap_option().to_owned(), classpath.to_option()];
        tracing::info!(
            heap = config.heap_option(),
            jar_dir = %jar_dir.display(),
            archives = classpath.entries().len(),
            "Starting embedded runtime"
        );

        let vm = self.embedder.create_vm(&options).inspect_err(|e| {
            tracing::error!("{e}");
        })?;

        self.state = HostState::Running(Runtime::new(vm));
        tracing::info!("Embedded runtime running");
        Ok(())
    }

    /// Detach the calling thread and destroy the runtime.
    pub fn stop(&mut self) -> Result<(), StopError> {
        let runtime = match std::mem::replace(&mut self.state, HostState::Stopped) {
            HostState::Running(runtime) => runtime,
            other => {
                self.state = other;
                return Err(StopError::NotRunning);
            }
        };

        let vm = runtime.into_vm();
        vm.detach_current_thread();
        vm.shutdown()?;
        tracing::info!("Embedded runtime stopped");
        Ok(())
    }

    pub fn runtime(&self) -> Result<&Runtime<E::Vm>, ViewerError> {
        match &self.state {
            HostState::Running(runtime) => Ok(runtime),
            _ => Err(ViewerError::NotRunning),
        }
    }

    /// Shorthand for `self.runtime()?.open(url, view)`.
    pub fn open(&self, url: &str, view: &ViewOptions) -> Result<Session<'_, E::Vm>, ViewerError> {
        self.runtime()?.open(url, view)
    }
}

impl<E: Embedder> Drop for RuntimeHost<E> {
    fn drop(&mut self) {
        if self.is_running() {
            tracing::warn!("RuntimeHost dropped while running; stopping runtime");
            if let Err(e) = self.stop() {
                tracing::error!("Failed to stop runtime on drop: {e}");
            }
        }
    }
}

/// A running runtime plus the set of threads currently inside a pinned-frame
/// critical section.
pub struct Runtime<V> {
    vm: V,
    pinned_threads: Mutex<HashSet<ThreadId>>,
}

impl<V: ViewerVm> Runtime<V> {
    fn new(vm: V) -> Self {
        Self {
            vm,
            pinned_threads: Mutex::new(HashSet::new()),
        }
    }

    pub fn vm(&self) -> &V {
        &self.vm
    }

    fn into_vm(self) -> V {
        self.vm
    }

    /// Open a dataset in a new viewer.
    pub fn open(&self, url: &str, view: &ViewOptions) -> Result<Session<'_, V>, ViewerError> {
        Session::open(self, url, view)
    }

    /// True if the calling thread holds a pinned frame.
    pub fn in_critical_section(&self) -> bool {
        self.pinned().contains(&thread::current().id())
    }

    pub(crate) fn enter_critical_section(&self) {
        self.pinned().insert(thread::current().id());
    }

    pub(crate) fn leave_critical_section(&self) {
        self.pinned().remove(&thread::current().id());
    }

    fn pinned(&self) -> MutexGuard<'_, HashSet<ThreadId>> {
        self.pinned_threads
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Attach the calling thread for the lifetime of the returned guard.
    ///
    /// Refused while the thread holds a pinned frame: no runtime call may run
    /// inside the critical section.
    pub(crate) fn attach(&self) -> Result<Attachment<'_, V>, ViewerError> {
        if self.in_critical_section() {
            return Err(ViewerError::CriticalSectionHeld);
        }
        self.vm.attach_current_thread()?;
        Ok(Attachment {
            runtime: self,
            _thread: PhantomData,
        })
    }

    /// Run one remote call with the calling thread attached, detaching
    /// afterwards whatever the outcome.
    pub(crate) fn call<T>(
        &self,
        op: &'static str,
        f: impl FnOnce(&V) -> Result<T, ViewerError>,
    ) -> Result<T, ViewerError> {
        let result = self.attach().and_then(|_attached| f(&self.vm));
        if let Err(e) = &result {
            tracing::warn!(op, "Viewer call failed: {e}");
        }
        result
    }
}

/// The calling thread's attachment; detaches on drop.
///
/// Not `Send`: detaching must happen on the thread that attached.
pub(crate) struct Attachment<'rt, V: ViewerVm> {
    runtime: &'rt Runtime<V>,
    _thread: PhantomData<*const ()>,
}

impl<'rt, V: ViewerVm> Attachment<'rt, V> {
    /// Give up the guard without detaching; the new owner becomes
    /// responsible for the detach.
    pub(crate) fn hand_off(self) -> &'rt Runtime<V> {
        let runtime = self.runtime;
        std::mem::forget(self);
        runtime
    }
}

impl<V: ViewerVm> Drop for Attachment<'_, V> {
    fn drop(&mut self) {
        self.runtime.vm.detach_current_thread();
    }
}
