//! GLX entry points

use glscope_shared::{ContextHandle, DisplayHandle, DrawableHandle, Value};
use tracing::warn;

use super::native::NativeWindowSystem;
use super::{ContextCreateInfo, CreateLayout, MakeCurrentArgs, MakeCurrentLayout};

pub(crate) const CREATE: &[&str] = &[
    "glXCreateContext",
    "glXCreateNewContext",
    "glXCreateContextAttribsARB",
    "glXCreateContextWithConfigSGIX",
];
pub(crate) const MAKE_CURRENT: &[&str] =
    &["glXMakeCurrent", "glXMakeContextCurrent", "glXMakeCurrentReadSGI"];
pub(crate) const DESTROY: &[&str] = &["glXDestroyContext"];
pub(crate) const SWAP: &[&str] = &["glXSwapBuffers"];

const GLX_SCREEN: i32 = 0x800c;
const GLX_RENDER_TYPE: i32 = 0x8011;
const GLX_FBCONFIG_ID: i32 = 0x8013;
const GLX_RGBA_TYPE: i32 = 0x8014;
const NONE: i32 = 0;

pub(crate) fn create_layout(function: &str) -> Option<CreateLayout> {
    let layout = match function {
        // (dpy, vis, share, direct)
        "glXCreateContext" => CreateLayout {
            display: Some(0),
            config: Some(1),
            share: Some(2),
            ..Default::default()
        },
        // (dpy, config, render_type, share, direct)
        "glXCreateNewContext" | "glXCreateContextWithConfigSGIX" => CreateLayout {
            display: Some(0),
            config: Some(1),
            share: Some(3),
            ..Default::default()
        },
        // (dpy, config, share, direct, attribs)
        "glXCreateContextAttribsARB" => CreateLayout {
            display: Some(0),
            config: Some(1),
            share: Some(2),
            ..Default::default()
        },
        _ => return None,
    };
    Some(layout)
}

pub(crate) fn make_current_layout(function: &str) -> Option<MakeCurrentLayout> {
    match function {
        "glXMakeCurrent" => Some(MakeCurrentLayout {
            display: Some(0),
            draw: 1,
            read: 1,
            context: 2,
        }),
        "glXMakeContextCurrent" | "glXMakeCurrentReadSGI" => Some(MakeCurrentLayout {
            display: Some(0),
            draw: 1,
            read: 2,
            context: 3,
        }),
        _ => None,
    }
}

pub(crate) fn destroy_context_arg(function: &str) -> Option<usize> {
    (function == "glXDestroyContext").then_some(1)
}

pub(crate) fn current_display(ws: &NativeWindowSystem) -> Option<DisplayHandle> {
    ws.invoke_pointer("glXGetCurrentDisplay", vec![])
        .and_then(DisplayHandle::from_raw)
}

pub(crate) fn current_context(ws: &NativeWindowSystem) -> Option<ContextHandle> {
    ws.invoke_pointer("glXGetCurrentContext", vec![])
        .and_then(ContextHandle::from_raw)
}

pub(crate) fn current_drawable(ws: &NativeWindowSystem) -> Option<DrawableHandle> {
    ws.invoke_pointer("glXGetCurrentDrawable", vec![])
        .and_then(DrawableHandle::from_raw)
}

pub(crate) fn current_read_drawable(ws: &NativeWindowSystem) -> Option<DrawableHandle> {
    ws.invoke_pointer("glXGetCurrentReadDrawable", vec![])
        .and_then(DrawableHandle::from_raw)
        .or_else(|| current_drawable(ws))
}

pub(crate) fn make_current(ws: &NativeWindowSystem, args: &MakeCurrentArgs) -> bool {
    let ret = if args.draw == args.read {
        ws.invoke(
            "glXMakeCurrent",
            vec![args.display.into(), args.draw.into(), args.context.into()],
        )
    } else {
        ws.invoke(
            "glXMakeContextCurrent",
            vec![
                args.display.into(),
                args.draw.into(),
                args.read.into(),
                args.context.into(),
            ],
        )
    };
    ret.is_some_and(|v| v.is_truthy())
}

pub(crate) fn create_context_like(
    ws: &NativeWindowSystem,
    template: &ContextCreateInfo,
    share: Option<ContextHandle>,
) -> Option<ContextHandle> {
    if template.function == "glXCreateContext" {
        // The visual the application passed may already be freed, so find
        // the context's FB config instead.
        return create_from_fbconfig(ws, template, share);
    }
    let share_arg = template.share_arg?;
    let mut args = template.args.clone();
    *args.get_mut(share_arg)? = share.into();
    if template.function == "glXCreateContextAttribsARB" {
        // The attribute list belonged to the application's call
        *args.get_mut(4)? = Value::Pointer(0);
    }
    ws.invoke_pointer(&template.function, args)
        .and_then(ContextHandle::from_raw)
}

fn query_context(ws: &NativeWindowSystem, template: &ContextCreateInfo, attribute: i32) -> Option<i32> {
    let mut value: i32 = 0;
    let status = ws.invoke(
        "glXQueryContext",
        vec![
            template.display.into(),
            template.context.into(),
            Value::Int(attribute as i64),
            Value::Pointer(&mut value as *mut i32 as usize),
        ],
    )?;
    // Success is 0
    (status.as_i64() == Some(0)).then_some(value)
}

fn create_from_fbconfig(
    ws: &NativeWindowSystem,
    template: &ContextCreateInfo,
    share: Option<ContextHandle>,
) -> Option<ContextHandle> {
    let screen = query_context(ws, template, GLX_SCREEN)?;
    let fbconfig_id = query_context(ws, template, GLX_FBCONFIG_ID)?;
    let render_type = query_context(ws, template, GLX_RENDER_TYPE).unwrap_or(GLX_RGBA_TYPE);

    let attribs = [GLX_FBCONFIG_ID, fbconfig_id, NONE];
    let mut count: i32 = 0;
    let configs = ws.invoke_pointer(
        "glXChooseFBConfig",
        vec![
            template.display.into(),
            Value::Int(screen as i64),
            Value::Pointer(attribs.as_ptr() as usize),
            Value::Pointer(&mut count as *mut i32 as usize),
        ],
    )?;
    if configs == 0 || count <= 0 {
        warn!(fbconfig_id, "no FB config matches the context");
        return None;
    }
    // SAFETY: glXChooseFBConfig returned a non-null array of `count` > 0
    // GLXFBConfig pointers, which stays valid until the XFree below.
    let config = unsafe { *(configs as *const usize) };
    let context = ws.invoke_pointer(
        "glXCreateNewContext",
        vec![
            template.display.into(),
            Value::Pointer(config),
            Value::Int(render_type as i64),
            share.into(),
            Value::Bool(true),
        ],
    );
    ws.invoke("XFree", vec![Value::Pointer(configs)]);
    context.and_then(ContextHandle::from_raw)
}

pub(crate) fn destroy_context(
    ws: &NativeWindowSystem,
    display: Option<DisplayHandle>,
    context: ContextHandle,
) {
    ws.invoke("glXDestroyContext", vec![display.into(), context.into()]);
}
