//! EGL entry points

use glscope_shared::{ContextHandle, DisplayHandle, DrawableHandle, Value};

use super::native::NativeWindowSystem;
use super::{ContextCreateInfo, CreateLayout, MakeCurrentArgs, MakeCurrentLayout};

pub(crate) const CREATE: &[&str] = &["eglCreateContext"];
pub(crate) const MAKE_CURRENT: &[&str] = &["eglMakeCurrent"];
pub(crate) const DESTROY: &[&str] = &["eglDestroyContext"];
pub(crate) const SWAP: &[&str] = &["eglSwapBuffers"];

const EGL_CONFIG_ID: i32 = 0x3028;
const EGL_NONE: i32 = 0x3038;
const EGL_DRAW: i32 = 0x3059;
const EGL_READ: i32 = 0x305a;
const EGL_CONTEXT_CLIENT_VERSION: i32 = 0x3098;

pub(crate) fn create_layout(function: &str) -> Option<CreateLayout> {
    // (dpy, config, share, attribs)
    (function == "eglCreateContext").then_some(CreateLayout {
        display: Some(0),
        config: Some(1),
        share: Some(2),
        ..Default::default()
    })
}

pub(crate) fn make_current_layout(function: &str) -> Option<MakeCurrentLayout> {
    (function == "eglMakeCurrent").then_some(MakeCurrentLayout {
        display: Some(0),
        draw: 1,
        read: 2,
        context: 3,
    })
}

pub(crate) fn destroy_context_arg(function: &str) -> Option<usize> {
    (function == "eglDestroyContext").then_some(1)
}

pub(crate) fn current_display(ws: &NativeWindowSystem) -> Option<DisplayHandle> {
    ws.invoke_pointer("eglGetCurrentDisplay", vec![])
        .and_then(DisplayHandle::from_raw)
}

pub(crate) fn current_context(ws: &NativeWindowSystem) -> Option<ContextHandle> {
    ws.invoke_pointer("eglGetCurrentContext", vec![])
        .and_then(ContextHandle::from_raw)
}

fn current_surface(ws: &NativeWindowSystem, which: i32) -> Option<DrawableHandle> {
    ws.invoke_pointer("eglGetCurrentSurface", vec![Value::Int(which as i64)])
        .and_then(DrawableHandle::from_raw)
}

pub(crate) fn current_drawable(ws: &NativeWindowSystem) -> Option<DrawableHandle> {
    current_surface(ws, EGL_DRAW)
}

pub(crate) fn current_read_drawable(ws: &NativeWindowSystem) -> Option<DrawableHandle> {
    current_surface(ws, EGL_READ)
}

pub(crate) fn make_current(ws: &NativeWindowSystem, args: &MakeCurrentArgs) -> bool {
    ws.invoke(
        "eglMakeCurrent",
        vec![
            args.display.into(),
            args.draw.into(),
            args.read.into(),
            args.context.into(),
        ],
    )
    .is_some_and(|v| v.is_truthy())
}

fn query_context(ws: &NativeWindowSystem, template: &ContextCreateInfo, attribute: i32) -> Option<i32> {
    let mut value: i32 = 0;
    let ok = ws.invoke(
        "eglQueryContext",
        vec![
            template.display.into(),
            template.context.into(),
            Value::Int(attribute as i64),
            Value::Pointer(&mut value as *mut i32 as usize),
        ],
    )?;
    ok.is_truthy().then_some(value)
}

/// The recorded config, or the one matching the context's config id.
fn config_of(ws: &NativeWindowSystem, template: &ContextCreateInfo) -> Option<usize> {
    if let Some(config) = template.config {
        return Some(config.as_raw());
    }
    let id = query_context(ws, template, EGL_CONFIG_ID)?;
    let attribs = [EGL_CONFIG_ID, id, EGL_NONE];
    let mut config: usize = 0;
    let mut count: i32 = 0;
    let ok = ws.invoke(
        "eglChooseConfig",
        vec![
            template.display.into(),
            Value::Pointer(attribs.as_ptr() as usize),
            Value::Pointer(&mut config as *mut usize as usize),
            Value::Int(1),
            Value::Pointer(&mut count as *mut i32 as usize),
        ],
    )?;
    (ok.is_truthy() && count > 0 && config != 0).then_some(config)
}

pub(crate) fn create_context_like(
    ws: &NativeWindowSystem,
    template: &ContextCreateInfo,
    share: Option<ContextHandle>,
) -> Option<ContextHandle> {
    let config = config_of(ws, template)?;
    // The application's attribute list is not ours to keep; rebuild the part
    // that matters for compatibility.
    let attribs = match query_context(ws, template, EGL_CONTEXT_CLIENT_VERSION) {
        Some(version) => [EGL_CONTEXT_CLIENT_VERSION, version, EGL_NONE],
        None => [EGL_NONE, 0, 0],
    };
    ws.invoke_pointer(
        "eglCreateContext",
        vec![
            template.display.into(),
            Value::Pointer(config),
            share.into(),
            Value::Pointer(attribs.as_ptr() as usize),
        ],
    )
    .and_then(ContextHandle::from_raw)
}

pub(crate) fn destroy_context(
    ws: &NativeWindowSystem,
    display: Option<DisplayHandle>,
    context: ContextHandle,
) {
    ws.invoke("eglDestroyContext", vec![display.into(), context.into()]);
}
