use bdv_runtime::ViewerError;
use thiserror::Error;

/// Error type used inside JNI local frames.
#[derive(Debug, Error)]
pub(crate) enum BridgeError {
    #[error(transparent)]
    Jni(#[from] jni::errors::Error),

    #[error(transparent)]
    Viewer(#[from] ViewerError),
}

impl BridgeError {
    pub(crate) fn into_viewer(self, call: &'static str) -> ViewerError {
        match self {
            BridgeError::Viewer(e) => e,
            BridgeError::Jni(e) => ViewerError::invocation(call, e),
        }
    }
}
