//! Native host for the headless BigDataViewer.
//!
//! The viewer itself runs inside an embedded managed runtime. This crate
//! assembles its classpath, owns the runtime's lifecycle, proxies viewer
//! operations through [`Session`], and hands out rendered frames as
//! zero-copy [`FrameView`]s pinned for the duration of one read.
//!
//! The runtime is reached through the [`ViewerVm`] trait; `bdv-jni` provides
//! the JVM implementation and [`stub`] an in-process one for tests.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use bdv_runtime::{RuntimeConfig, RuntimeHost, Transform, ViewOptions};
//! # fn run<E: bdv_runtime::Embedder>(embedder: E) -> Result<(), Box<dyn std::error::Error>> {
//! let mut host = RuntimeHost::new(embedder);
//! host.start(&RuntimeConfig::default())?;
//! {
//!     let mut session = host.open("http://example.org:8081/Drosophila", &ViewOptions::default())?;
//!     session.set_transform(&Transform::identity())?;
//!     session.set_source_visible(0, true)?;
//!
//!     if let Some(frame) = session.rendered_bitmap()? {
//!         // No runtime calls on this thread until the frame is released.
//!         let _pixels: &[u32] = frame.pixels();
//!         frame.release()?;
//!     }
//! }
//! host.stop()?;
//! # Ok(())
//! # }
//! ```

pub mod classpath;
pub mod config;
pub mod error;
pub mod frame;
pub mod host;
pub mod session;
pub mod stub;
pub mod types;
pub mod vm;

pub use classpath::{Classpath, assemble_classpath};
pub use config::{BdvConfig, RuntimeConfig, ViewOptions};
pub use error::{ConfigError, StartError, StopError, Symbol, ViewerError};
pub use frame::FrameView;
pub use host::{Runtime, RuntimeHost};
pub use session::Session;
pub use types::{Argb, SessionHandle, SourceParams, Transform};
pub use vm::{Embedder, PinnedFrame, RemoteMethod, ViewerVm};
