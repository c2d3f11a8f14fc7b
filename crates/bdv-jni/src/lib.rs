//! JVM backend for `bdv-runtime`.
//!
//! [`JniEmbedder`] starts a HotSpot (or compatible) JVM in-process through
//! the JNI invocation API and hands `bdv-runtime` a [`JniVm`] that forwards
//! every viewer call to the static entry points on `bdv.BigDataViewerJni`.
//!
//! ```no_run
//! use bdv_jni::JniEmbedder;
//! use bdv_runtime::{RuntimeConfig, RuntimeHost, ViewOptions};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut host = RuntimeHost::new(JniEmbedder::new());
//! host.start(&RuntimeConfig::default().with_env_overrides())?;
//! {
//!     let mut session = host.open("/data/drosophila.xml", &ViewOptions::default())?;
//!     session.set_timepoint(5)?;
//!     if let Some(frame) = session.rendered_bitmap()? {
//!         println!("{}x{} frame", frame.width(), frame.height());
//!     }
//! }
//! host.stop()?;
//! # Ok(())
//! # }
//! ```

mod calls;
mod embedder;
mod error;
mod jvm;

pub use embedder::JniEmbedder;
pub use jvm::{JniPin, JniVm};
