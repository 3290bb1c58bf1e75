//! Opaque native windowing handles
//!
//! The windowing backends (GLX, WGL, EGL) hand out pointers or integers for
//! displays, contexts, drawables and framebuffer configs. The interception
//! layer never dereferences them; it only compares, hashes and forwards them,
//! so each is a non-null `usize` newtype. A null native handle is modelled as
//! `None`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::NonZeroUsize;

use crate::types::call::Value;

macro_rules! native_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(NonZeroUsize);

        impl $name {
            /// Wrap a raw native value. Returns `None` for the null handle.
            pub fn from_raw(raw: usize) -> Option<Self> {
                NonZeroUsize::new(raw).map(Self)
            }

            /// The raw native value.
            pub fn as_raw(self) -> usize {
                self.0.get()
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({:#x})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{:#x}", self.0)
            }
        }

        impl From<$name> for Value {
            fn from(handle: $name) -> Value {
                Value::Pointer(handle.as_raw())
            }
        }

        impl From<Option<$name>> for Value {
            fn from(handle: Option<$name>) -> Value {
                Value::Pointer(handle.map_or(0, $name::as_raw))
            }
        }
    };
}

native_handle!(
    /// Connection to the display server (`Display *`, `EGLDisplay`).
    DisplayHandle
);
native_handle!(
    /// Rendering context (`GLXContext`, `HGLRC`, `EGLContext`).
    ContextHandle
);
native_handle!(
    /// Render target (`GLXDrawable`, `HDC`, `EGLSurface`).
    DrawableHandle
);
native_handle!(
    /// Pixel format / framebuffer configuration (`GLXFBConfig`, `XVisualInfo *`, `EGLConfig`).
    ConfigHandle
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_handle_is_none() {
        assert!(ContextHandle::from_raw(0).is_none());
        assert_eq!(DisplayHandle::from_raw(0x10).map(|d| d.as_raw()), Some(0x10));
    }

    #[test]
    fn test_handle_into_value() {
        let ctx = ContextHandle::from_raw(0xbeef).unwrap();
        assert_eq!(Value::from(ctx), Value::Pointer(0xbeef));
        assert_eq!(Value::from(None::<ContextHandle>), Value::Pointer(0));
    }
}
