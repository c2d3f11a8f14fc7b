use std::sync::atomic::{AtomicBool, Ordering};

use bdv_runtime::{Embedder, StartError};
use jni::{InitArgsBuilder, JNIVersion, JavaVM};

use crate::jvm::JniVm;

/// JNI allows one VM per process; set while a [`JniVm`] exists.
static VM_LIVE: AtomicBool = AtomicBool::new(false);

pub(crate) fn release_vm_slot() {
    VM_LIVE.store(false, Ordering::SeqCst);
}

/// Launches the JVM through the JNI invocation API.
///
/// `libjvm` is located at runtime (`JAVA_HOME` or the usual install paths).
pub struct JniEmbedder {
    version: JNIVersion,
}

impl JniEmbedder {
    pub fn new() -> Self {
        Self {
            version: JNIVersion::V8,
        }
    }

    pub fn with_version(version: JNIVersion) -> Self {
        Self { version }
    }
}

impl Default for JniEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

impl Embedder for JniEmbedder {
    type Vm = JniVm;

    fn create_vm(&self, options: &[String]) -> Result<JniVm, StartError> {
        if VM_LIVE.swap(true, Ordering::SeqCst) {
            return Err(StartError::AlreadyRunning);
        }

        let vm = launch(self.version, options).inspect_err(|_| release_vm_slot())?;
        tracing::debug!(version = ?self.version, options = ?options, "JVM created");
        Ok(JniVm::new(vm))
    }
}

fn launch(version: JNIVersion, options: &[String]) -> Result<JavaVM, StartError> {
    let args = options
        .iter()
        .fold(
            InitArgsBuilder::new()
                .version(version)
                .ignore_unrecognized(false),
            |builder, option| builder.option(option.as_str()),
        )
        .build()
        .map_err(|e| StartError::RuntimeInitFailed(e.to_string()))?;

    JavaVM::new(args).map_err(|e| StartError::RuntimeInitFailed(e.to_string()))
}
