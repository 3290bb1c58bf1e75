//! WGL entry points
//!
//! WGL has no display connection; the device context stands in for both the
//! display and the drawable.

use glscope_shared::{ContextHandle, DisplayHandle, DrawableHandle, Value};
use tracing::warn;

use super::native::NativeWindowSystem;
use super::{ContextCreateInfo, CreateLayout, MakeCurrentArgs, MakeCurrentLayout};

pub(crate) const CREATE: &[&str] = &["wglCreateContext", "wglCreateContextAttribsARB"];
pub(crate) const MAKE_CURRENT: &[&str] = &["wglMakeCurrent", "wglMakeContextCurrentARB"];
pub(crate) const DESTROY: &[&str] = &["wglDeleteContext"];
pub(crate) const SWAP: &[&str] = &["wglSwapBuffers", "SwapBuffers", "wglSwapLayerBuffers"];

pub(crate) fn create_layout(function: &str) -> Option<CreateLayout> {
    match function {
        // (hdc)
        "wglCreateContext" => Some(CreateLayout {
            display: Some(0),
            drawable: Some(0),
            ..Default::default()
        }),
        // (hdc, share, attribs)
        "wglCreateContextAttribsARB" => Some(CreateLayout {
            display: Some(0),
            drawable: Some(0),
            share: Some(1),
            ..Default::default()
        }),
        _ => None,
    }
}

pub(crate) fn make_current_layout(function: &str) -> Option<MakeCurrentLayout> {
    match function {
        "wglMakeCurrent" => Some(MakeCurrentLayout {
            display: Some(0),
            draw: 0,
            read: 0,
            context: 1,
        }),
        "wglMakeContextCurrentARB" => Some(MakeCurrentLayout {
            display: Some(0),
            draw: 0,
            read: 1,
            context: 2,
        }),
        _ => None,
    }
}

pub(crate) fn destroy_context_arg(function: &str) -> Option<usize> {
    (function == "wglDeleteContext").then_some(0)
}

pub(crate) fn current_display(ws: &NativeWindowSystem) -> Option<DisplayHandle> {
    ws.invoke_pointer("wglGetCurrentDC", vec![])
        .and_then(DisplayHandle::from_raw)
}

pub(crate) fn current_context(ws: &NativeWindowSystem) -> Option<ContextHandle> {
    ws.invoke_pointer("wglGetCurrentContext", vec![])
        .and_then(ContextHandle::from_raw)
}

pub(crate) fn current_drawable(ws: &NativeWindowSystem) -> Option<DrawableHandle> {
    ws.invoke_pointer("wglGetCurrentDC", vec![])
        .and_then(DrawableHandle::from_raw)
}

pub(crate) fn current_read_drawable(ws: &NativeWindowSystem) -> Option<DrawableHandle> {
    ws.invoke_pointer("wglGetCurrentReadDCARB", vec![])
        .and_then(DrawableHandle::from_raw)
        .or_else(|| current_drawable(ws))
}

pub(crate) fn make_current(ws: &NativeWindowSystem, args: &MakeCurrentArgs) -> bool {
    let ret = if args.draw == args.read {
        ws.invoke("wglMakeCurrent", vec![args.draw.into(), args.context.into()])
    } else {
        ws.invoke(
            "wglMakeContextCurrentARB",
            vec![args.draw.into(), args.read.into(), args.context.into()],
        )
    };
    ret.is_some_and(|v| v.is_truthy())
}

pub(crate) fn create_context_like(
    ws: &NativeWindowSystem,
    template: &ContextCreateInfo,
    share: Option<ContextHandle>,
) -> Option<ContextHandle> {
    let hdc = template.drawable?;
    let context = ws
        .invoke_pointer("wglCreateContext", vec![hdc.into()])
        .and_then(ContextHandle::from_raw)?;
    if let Some(share) = share {
        let shared = ws
            .invoke("wglShareLists", vec![share.into(), context.into()])
            .is_some_and(|v| v.is_truthy());
        if !shared {
            warn!(%share, %context, "wglShareLists failed");
            ws.invoke("wglDeleteContext", vec![context.into()]);
            return None;
        }
    }
    Some(context)
}

pub(crate) fn destroy_context(
    ws: &NativeWindowSystem,
    _display: Option<DisplayHandle>,
    context: ContextHandle,
) {
    ws.invoke("wglDeleteContext", vec![Value::from(context)]);
}
