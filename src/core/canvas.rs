use std::cell::RefCell;
use std::rc::Rc;

use mlua::{Lua, Table};

use crate::core::assets::AssetCache;
use crate::core::surface::{Colour, Surface};

/// What the drawing bridge borrows from the session.
#[derive(Clone)]
pub struct CanvasContext {
    pub main: Rc<RefCell<Surface>>,
    pub images: Rc<AssetCache>,
    pub blank_colour: Colour,
    pub strict: bool,
}

/// Expose the `Canvas` global. `Canvas.newCanvas(transparent)` hands the
/// script an off-screen surface shaped like the main canvas. Handles are
/// plain tables of functions so scripts call them dot-style, the same shape
/// the host bridge objects have always had.
pub fn register(lua: &Lua, ctx: CanvasContext) -> mlua::Result<()> {
    let canvas = lua.create_table()?;
    let new_canvas = lua.create_function(move |lua, transparent: Option<bool>| {
        sub_canvas(lua, &ctx, transparent.unwrap_or(false))
    })?;
    canvas.set("newCanvas", new_canvas)?;
    lua.globals().set("Canvas", canvas)?;
    Ok(())
}

fn sub_canvas(lua: &Lua, ctx: &CanvasContext, transparent: bool) -> mlua::Result<Table> {
    let (width, height) = {
        let main = ctx.main.borrow();
        (main.width(), main.height())
    };
    let surface = Rc::new(RefCell::new(Surface::new(width, height)));

    // cleared once on creation; opaque surfaces start out blank-coloured
    if !transparent {
        surface.borrow_mut().fill(ctx.blank_colour);
    }

    let handle = lua.create_table()?;

    let images = Rc::clone(&ctx.images);
    let target = Rc::clone(&surface);
    let strict = ctx.strict;
    handle.set(
        "drawImage",
        lua.create_function(
            move |_,
                  (path, sx, sy, sw, sh, dx, dy, dw, dh): (
                String,
                f64,
                f64,
                f64,
                f64,
                f64,
                f64,
                f64,
                f64,
            )| {
                match images.get(&path) {
                    Some(image) => {
                        target
                            .borrow_mut()
                            .draw_image(image, sx, sy, sw, sh, dx, dy, dw, dh);
                        Ok(())
                    }
                    None if strict => Err(mlua::Error::RuntimeError(format!(
                        "image '{path}' was never prefetched"
                    ))),
                    None => Ok(()),
                }
            },
        )?,
    )?;

    let main = Rc::clone(&ctx.main);
    let layer = Rc::clone(&surface);
    handle.set(
        "draw",
        lua.create_function(move |_, (x, y): (f64, f64)| {
            main.borrow_mut().composite(&layer.borrow(), x, y);
            Ok(())
        })?,
    )?;

    let blank = ctx.blank_colour;
    let target = Rc::clone(&surface);
    handle.set(
        "clearCanvas",
        lua.create_function(move |_, ()| {
            let mut surface = target.borrow_mut();
            surface.clear();
            if !transparent {
                surface.fill(blank);
            }
            Ok(())
        })?,
    )?;

    Ok(handle)
}
