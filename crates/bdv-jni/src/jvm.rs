use std::ffi::c_void;

use bdv_runtime::vm::{IMAGE_CLASS, VIEWER_CLASS, image, remote};
use bdv_runtime::{PinnedFrame, SessionHandle, StopError, Transform, ViewOptions, ViewerError, ViewerVm};
use jni::objects::{GlobalRef, JIntArray, JValue};
use jni::signature::{Primitive, ReturnType};
use jni::sys::{JNI_ABORT, JNI_FALSE, jboolean, jsize};
use jni::{JNIEnv, JavaVM};

use crate::calls::{StaticCall, call_instance, clear_exception, find_class, instance_method};
use crate::embedder::release_vm_slot;
use crate::error::BridgeError;

/// Local references one call may create before its frame is popped.
const LOCAL_FRAME_CAPACITY: i32 = 16;

/// Length of a Java array to allocate for `len` elements.
fn array_len(len: usize) -> Result<jsize, ViewerError> {
    jsize::try_from(len).map_err(|_| ViewerError::InvalidOptions(format!("{len} elements do not fit a Java array")))
}

/// The pinned `int[]` behind a frame.
pub struct JniPin {
    array: GlobalRef,
    elements: *mut c_void,
}

struct FrameInfo {
    width: i32,
    height: i32,
    complete: bool,
    data: GlobalRef,
    len: jsize,
}

/// A running JVM with the viewer jars on its classpath.
pub struct JniVm {
    vm: JavaVM,
}

impl JniVm {
    pub(crate) fn new(vm: JavaVM) -> Self {
        Self { vm }
    }

    pub fn java_vm(&self) -> &JavaVM {
        &self.vm
    }

    /// Run `f` inside a fresh local frame on the attached thread's env.
    fn with_env<T>(
        &self,
        call: &'static str,
        f: impl FnOnce(&mut JNIEnv) -> Result<T, BridgeError>,
    ) -> Result<T, ViewerError> {
        let mut env = self
            .vm
            .get_env()
            .map_err(|e| ViewerError::AttachFailed(e.to_string()))?;
        let result = env.with_local_frame(LOCAL_FRAME_CAPACITY, f);
        if result.is_err() {
            clear_exception(&mut env);
        }
        result.map_err(|e| e.into_viewer(call))
    }

    /// Poll the viewer and, if a frame came back, take a global reference to
    /// its pixel array so it survives the local frame.
    fn fetch_frame(&self, handle: SessionHandle) -> Result<Option<FrameInfo>, ViewerError> {
        let call = remote::GET_RENDERED_BITMAP.name;
        self.with_env(call, |env| {
            let class = find_class(env, VIEWER_CLASS)?;
            let image_class = find_class(env, IMAGE_CLASS)?;
            let poll = StaticCall::resolve(env, &class, remote::GET_RENDERED_BITMAP)?;
            let get_width = instance_method(env, &image_class, IMAGE_CLASS, image::GET_WIDTH)?;
            let get_height = instance_method(env, &image_class, IMAGE_CLASS, image::GET_HEIGHT)?;
            let is_complete = instance_method(env, &image_class, IMAGE_CLASS, image::IS_COMPLETE)?;
            let get_data = instance_method(env, &image_class, IMAGE_CLASS, image::GET_DATA)?;

            let frame = poll.object(env, &[JValue::Int(handle.raw()).as_jni()])?;
            if frame.is_null() {
                return Ok(None);
            }

            let int = || ReturnType::Primitive(Primitive::Int);
            let width = call_instance(env, &frame, get_width, int(), image::GET_WIDTH.name)?.i()?;
            let height = call_instance(env, &frame, get_height, int(), image::GET_HEIGHT.name)?.i()?;
            let complete = call_instance(
                env,
                &frame,
                is_complete,
                ReturnType::Primitive(Primitive::Boolean),
                image::IS_COMPLETE.name,
            )?
            .z()?;
            let data = call_instance(env, &frame, get_data, ReturnType::Array, image::GET_DATA.name)?.l()?;
            if data.is_null() {
                return Err(ViewerError::invocation(call, "frame has no pixel array").into());
            }
            let data = JIntArray::from(data);
            let len = env.get_array_length(&data)?;
            let data = env.new_global_ref(&data)?;

            Ok(Some(FrameInfo {
                width,
                height,
                complete,
                data,
                len,
            }))
        })
    }

    /// `GetPrimitiveArrayCritical` on the frame's array. From here until
    /// `unpin_frame` no JNI call may be made on this thread.
    fn pin(&self, info: FrameInfo) -> Result<PinnedFrame<JniPin>, ViewerError> {
        let env = self
            .vm
            .get_env()
            .map_err(|e| ViewerError::AttachFailed(e.to_string()))?;
        let raw = env.get_raw();
        let mut is_copy: jboolean = JNI_FALSE;

        // SAFETY: `raw` is the calling thread's env and `info.data` a live
        // global reference to an `int[]`.
        let elements = unsafe {
            let get = (**raw)
                .GetPrimitiveArrayCritical
                .ok_or_else(|| ViewerError::PinFailed("GetPrimitiveArrayCritical unavailable".into()))?;
            get(raw, info.data.as_obj().as_raw(), &mut is_copy)
        };
        if elements.is_null() {
            return Err(ViewerError::PinFailed("runtime returned no array elements".into()));
        }
        if is_copy != JNI_FALSE {
            tracing::debug!("Runtime pinned a copy of the frame array");
        }

        let len = usize::try_from(info.len).unwrap_or(0);
        let expected = usize::try_from(info.width)
            .ok()
            .zip(usize::try_from(info.height).ok())
            .and_then(|(w, h)| w.checked_mul(h));
        if expected != Some(len) {
            tracing::warn!(
                width = info.width,
                height = info.height,
                len,
                "Frame array length does not match its dimensions"
            );
        }

        let pin = JniPin {
            array: info.data,
            elements,
        };
        // SAFETY: `elements` is the critical pointer to an `int[]` of `len`
        // elements, kept alive by the global reference in `pin` and not moved
        // by the collector until `unpin_frame` releases it.
        let frame = unsafe {
            PinnedFrame::new(
                info.width,
                info.height,
                info.complete,
                elements.cast::<u32>().cast_const(),
                len,
                pin,
            )
        };
        Ok(frame)
    }
}

impl ViewerVm for JniVm {
    type Pin = JniPin;

    fn attach_current_thread(&self) -> Result<(), ViewerError> {
        self.vm
            .attach_current_thread_permanently()
            .map(|_| ())
            .map_err(|e| ViewerError::AttachFailed(e.to_string()))
    }

    fn detach_current_thread(&self) {
        // SAFETY: callers hold no env or local reference across this point;
        // every call scopes its locals to a popped local frame.
        unsafe { self.vm.detach_current_thread() }
    }

    fn construct(&self, url: &str, view: &ViewOptions) -> Result<SessionHandle, ViewerError> {
        self.with_env(remote::CONSTRUCT.name, |env| {
            let class = find_class(env, VIEWER_CLASS)?;
            let construct = StaticCall::resolve(env, &class, remote::CONSTRUCT)?;

            let url = env.new_string(url)?;
            let scales = env.new_double_array(array_len(view.screen_scales.len())?)?;
            env.set_double_array_region(&scales, 0, &view.screen_scales)?;

            let id = construct.int(
                env,
                &[
                    JValue::Object(&url).as_jni(),
                    JValue::Int(view.width).as_jni(),
                    JValue::Int(view.height).as_jni(),
                    JValue::Object(&scales).as_jni(),
                    JValue::Int(view.rendering_threads).as_jni(),
                ],
            )?;
            Ok(SessionHandle(id))
        })
    }

    fn construct_sharing_cache(
        &self,
        share_with: SessionHandle,
        view: &ViewOptions,
    ) -> Result<SessionHandle, ViewerError> {
        self.with_env(remote::CONSTRUCT_SHARING_CACHE.name, |env| {
            let class = find_class(env, VIEWER_CLASS)?;
            let construct = StaticCall::resolve(env, &class, remote::CONSTRUCT_SHARING_CACHE)?;

            let scales = env.new_double_array(array_len(view.screen_scales.len())?)?;
            env.set_double_array_region(&scales, 0, &view.screen_scales)?;

            let id = construct.int(
                env,
                &[
                    JValue::Int(share_with.raw()).as_jni(),
                    JValue::Int(view.width).as_jni(),
                    JValue::Int(view.height).as_jni(),
                    JValue::Object(&scales).as_jni(),
                    JValue::Int(view.rendering_threads).as_jni(),
                ],
            )?;
            Ok(SessionHandle(id))
        })
    }

    fn destruct(&self, handle: SessionHandle) -> Result<(), ViewerError> {
        self.with_env(remote::DESTRUCT.name, |env| {
            let class = find_class(env, VIEWER_CLASS)?;
            let destruct = StaticCall::resolve(env, &class, remote::DESTRUCT)?;
            destruct.void(env, &[JValue::Int(handle.raw()).as_jni()])
        })
    }

    fn set_transform(&self, handle: SessionHandle, transform: &Transform) -> Result<(), ViewerError> {
        self.with_env(remote::SET_TRANSFORM.name, |env| {
            let class = find_class(env, VIEWER_CLASS)?;
            let set_transform = StaticCall::resolve(env, &class, remote::SET_TRANSFORM)?;

            let matrix = env.new_double_array(array_len(Transform::LEN)?)?;
            env.set_double_array_region(&matrix, 0, transform.as_slice())?;
            set_transform.void(
                env,
                &[
                    JValue::Int(handle.raw()).as_jni(),
                    JValue::Object(&matrix).as_jni(),
                ],
            )
        })
    }

    fn transform(&self, handle: SessionHandle) -> Result<Transform, ViewerError> {
        self.with_env(remote::GET_TRANSFORM.name, |env| {
            let class = find_class(env, VIEWER_CLASS)?;
            let get_transform = StaticCall::resolve(env, &class, remote::GET_TRANSFORM)?;

            let matrix = env.new_double_array(array_len(Transform::LEN)?)?;
            get_transform.void(
                env,
                &[
                    JValue::Int(handle.raw()).as_jni(),
                    JValue::Object(&matrix).as_jni(),
                ],
            )?;
            let mut m = [0.0; Transform::LEN];
            env.get_double_array_region(&matrix, 0, &mut m)?;
            Ok(Transform(m))
        })
    }

    fn num_timepoints(&self, handle: SessionHandle) -> Result<i32, ViewerError> {
        self.static_int(remote::GET_NUM_TIMEPOINTS, handle, None)
    }

    fn num_sources(&self, handle: SessionHandle) -> Result<i32, ViewerError> {
        self.static_int(remote::GET_NUM_SOURCES, handle, None)
    }

    fn is_source_visible(&self, handle: SessionHandle, source: i32) -> Result<bool, ViewerError> {
        self.with_env(remote::IS_SOURCE_VISIBLE.name, |env| {
            let class = find_class(env, VIEWER_CLASS)?;
            let is_visible = StaticCall::resolve(env, &class, remote::IS_SOURCE_VISIBLE)?;
            is_visible.boolean(
                env,
                &[
                    JValue::Int(handle.raw()).as_jni(),
                    JValue::Int(source).as_jni(),
                ],
            )
        })
    }

    fn source_min(&self, handle: SessionHandle, source: i32) -> Result<i32, ViewerError> {
        self.static_int(remote::GET_SOURCE_PARAMS_MIN, handle, Some(source))
    }

    fn source_max(&self, handle: SessionHandle, source: i32) -> Result<i32, ViewerError> {
        self.static_int(remote::GET_SOURCE_PARAMS_MAX, handle, Some(source))
    }

    fn source_color(&self, handle: SessionHandle, source: i32) -> Result<i32, ViewerError> {
        self.static_int(remote::GET_SOURCE_PARAMS_COLOR, handle, Some(source))
    }

    fn set_timepoint(&self, handle: SessionHandle, timepoint: i32) -> Result<(), ViewerError> {
        self.static_void(
            remote::SET_TIMEPOINT,
            &[JValue::Int(handle.raw()), JValue::Int(timepoint)],
        )
    }

    fn set_linear_interpolation(&self, handle: SessionHandle, enabled: bool) -> Result<(), ViewerError> {
        self.static_void(
            remote::SET_LINEAR_INTERPOLATION,
            &[JValue::Int(handle.raw()), JValue::Bool(jboolean::from(enabled))],
        )
    }

    fn set_source_visible(&self, handle: SessionHandle, source: i32, visible: bool) -> Result<(), ViewerError> {
        self.static_void(
            remote::SET_SOURCE_VISIBLE,
            &[
                JValue::Int(handle.raw()),
                JValue::Int(source),
                JValue::Bool(jboolean::from(visible)),
            ],
        )
    }

    fn set_source_params(
        &self,
        handle: SessionHandle,
        source: i32,
        min: i32,
        max: i32,
        argb: i32,
    ) -> Result<(), ViewerError> {
        self.static_void(
            remote::SET_SOURCE_PARAMS,
            &[
                JValue::Int(handle.raw()),
                JValue::Int(source),
                JValue::Int(min),
                JValue::Int(max),
                JValue::Int(argb),
            ],
        )
    }

    fn poll_frame(&self, handle: SessionHandle) -> Result<Option<PinnedFrame<JniPin>>, ViewerError> {
        match self.fetch_frame(handle)? {
            Some(info) => self.pin(info).map(Some),
            None => Ok(None),
        }
    }

    fn unpin_frame(&self, pin: JniPin) {
        match self.vm.get_env() {
            Ok(env) => {
                let raw = env.get_raw();
                // SAFETY: `elements` came from GetPrimitiveArrayCritical on
                // this array, on this thread, and has not been released yet.
                unsafe {
                    match (**raw).ReleasePrimitiveArrayCritical {
                        Some(release) => release(raw, pin.array.as_obj().as_raw(), pin.elements, JNI_ABORT),
                        None => tracing::error!("ReleasePrimitiveArrayCritical unavailable; frame stays pinned"),
                    }
                }
            }
            Err(e) => tracing::error!("Cannot unpin frame, thread has no env: {e}"),
        }
        // The global reference may only be deleted once the critical region
        // is closed.
        drop(pin.array);
    }

    fn shutdown(self) -> Result<(), StopError> {
        // SAFETY: the host only shuts down once no session (and so no env or
        // reference) is alive.
        let result = unsafe { self.vm.destroy() };
        release_vm_slot();
        result.map_err(|e| StopError::TeardownFailed(e.to_string()))
    }
}

impl JniVm {
    /// `int f(int handle)` or `int f(int handle, int source)`.
    fn static_int(
        &self,
        method: bdv_runtime::RemoteMethod,
        handle: SessionHandle,
        source: Option<i32>,
    ) -> Result<i32, ViewerError> {
        self.with_env(method.name, |env| {
            let class = find_class(env, VIEWER_CLASS)?;
            let call = StaticCall::resolve(env, &class, method)?;
            let mut args = vec![JValue::Int(handle.raw()).as_jni()];
            if let Some(source) = source {
                args.push(JValue::Int(source).as_jni());
            }
            call.int(env, &args)
        })
    }

    /// Static `void` method taking only primitives.
    fn static_void(&self, method: bdv_runtime::RemoteMethod, args: &[JValue]) -> Result<(), ViewerError> {
        self.with_env(method.name, |env| {
            let class = find_class(env, VIEWER_CLASS)?;
            let call = StaticCall::resolve(env, &class, method)?;
            let args: Vec<_> = args.iter().map(JValue::as_jni).collect();
            call.void(env, &args)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn array_len_accepts_java_sized_arrays() {
        assert_eq!(array_len(0).unwrap(), 0);
        assert_eq!(array_len(Transform::LEN).unwrap(), 12);
        assert_eq!(array_len(i32::MAX as usize).unwrap(), i32::MAX);
    }

    #[test]
    fn array_len_rejects_oversized_arrays() {
        let err = array_len(i32::MAX as usize + 1).unwrap_err();
        assert!(matches!(err, ViewerError::InvalidOptions(_)));
    }
}
