//! Name-and-signature lookups and typed invocations on top of `JNIEnv`.

use bdv_runtime::vm::VIEWER_CLASS;
use bdv_runtime::{RemoteMethod, Symbol, ViewerError};
use jni::JNIEnv;
use jni::objects::{JClass, JMethodID, JObject, JStaticMethodID, JValueOwned};
use jni::signature::{Primitive, ReturnType};
use jni::sys::jvalue;

use crate::error::BridgeError;

/// Describe and clear a pending Java exception, if any.
pub(crate) fn clear_exception(env: &mut JNIEnv) {
    if env.exception_check().unwrap_or(false) {
        let _ = env.exception_describe();
        let _ = env.exception_clear();
    }
}

pub(crate) fn find_class<'local>(
    env: &mut JNIEnv<'local>,
    name: &'static str,
) -> Result<JClass<'local>, BridgeError> {
    match env.find_class(name) {
        Ok(class) => Ok(class),
        Err(e) => {
            clear_exception(env);
            tracing::error!(class = name, "Unable to locate class: {e}");
            Err(ViewerError::SymbolResolution(Symbol::class(name)).into())
        }
    }
}

pub(crate) fn static_method<'local>(
    env: &mut JNIEnv<'local>,
    class: &JClass<'local>,
    class_name: &'static str,
    method: RemoteMethod,
) -> Result<JStaticMethodID, BridgeError> {
    match env.get_static_method_id(class, method.name, method.signature) {
        Ok(id) => Ok(id),
        Err(e) => {
            clear_exception(env);
            tracing::error!(method = method.name, signature = method.signature, "Unable to locate method: {e}");
            Err(method_missing(class_name, method))
        }
    }
}

pub(crate) fn instance_method<'local>(
    env: &mut JNIEnv<'local>,
    class: &JClass<'local>,
    class_name: &'static str,
    method: RemoteMethod,
) -> Result<JMethodID, BridgeError> {
    match env.get_method_id(class, method.name, method.signature) {
        Ok(id) => Ok(id),
        Err(e) => {
            clear_exception(env);
            tracing::error!(method = method.name, signature = method.signature, "Unable to locate method: {e}");
            Err(method_missing(class_name, method))
        }
    }
}

fn method_missing(class_name: &'static str, method: RemoteMethod) -> BridgeError {
    ViewerError::SymbolResolution(Symbol::method(class_name, method.name, method.signature)).into()
}

/// A resolved static method plus the class it lives on.
pub(crate) struct StaticCall<'c, 'local> {
    class: &'c JClass<'local>,
    id: JStaticMethodID,
    name: &'static str,
}

impl<'c, 'local> StaticCall<'c, 'local> {
    /// Look up one of the viewer entry points on `class`.
    pub(crate) fn resolve(
        env: &mut JNIEnv<'local>,
        class: &'c JClass<'local>,
        method: RemoteMethod,
    ) -> Result<Self, BridgeError> {
        let id = static_method(env, class, VIEWER_CLASS, method)?;
        Ok(Self {
            class,
            id,
            name: method.name,
        })
    }

    fn invoke(
        &self,
        env: &mut JNIEnv<'local>,
        ret: ReturnType,
        args: &[jvalue],
    ) -> Result<JValueOwned<'local>, BridgeError> {
        // SAFETY: `id` was looked up on `class` with the signature matching
        // `ret` and `args`, as listed in `bdv_runtime::vm::remote`.
        unsafe { env.call_static_method_unchecked(self.class, self.id, ret, args) }
            .map_err(|e| ViewerError::invocation(self.name, e).into())
    }

    pub(crate) fn void(&self, env: &mut JNIEnv<'local>, args: &[jvalue]) -> Result<(), BridgeError> {
        self.invoke(env, ReturnType::Primitive(Primitive::Void), args)?
            .v()
            .map_err(Into::into)
    }

    pub(crate) fn int(&self, env: &mut JNIEnv<'local>, args: &[jvalue]) -> Result<i32, BridgeError> {
        self.invoke(env, ReturnType::Primitive(Primitive::Int), args)?
            .i()
            .map_err(Into::into)
    }

    pub(crate) fn boolean(&self, env: &mut JNIEnv<'local>, args: &[jvalue]) -> Result<bool, BridgeError> {
        self.invoke(env, ReturnType::Primitive(Primitive::Boolean), args)?
            .z()
            .map_err(Into::into)
    }

    pub(crate) fn object(
        &self,
        env: &mut JNIEnv<'local>,
        args: &[jvalue],
    ) -> Result<JObject<'local>, BridgeError> {
        self.invoke(env, ReturnType::Object, args)?
            .l()
            .map_err(Into::into)
    }
}

/// Call a no-argument instance method.
pub(crate) fn call_instance<'local>(
    env: &mut JNIEnv<'local>,
    obj: &JObject<'local>,
    id: JMethodID,
    ret: ReturnType,
    name: &'static str,
) -> Result<JValueOwned<'local>, BridgeError> {
    // SAFETY: `id` was resolved on the object's class with a signature
    // returning `ret` and taking no arguments.
    unsafe { env.call_method_unchecked(obj, id, ret, &[]) }
        .map_err(|e| ViewerError::invocation(name, e).into())
}
