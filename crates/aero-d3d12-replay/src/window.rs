//! Window-factory collaborator used to back swap chains with a native surface.

use std::cell::Cell;
use std::rc::Rc;

use crate::handles::NativeWindowHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeHandleKind {
    Win32Hwnd,
    XlibWindow,
    WaylandSurface,
}

pub trait Window {
    fn native_handle(&self, kind: NativeHandleKind) -> Option<NativeWindowHandle>;
    fn set_size(&mut self, width: u32, height: u32);
    fn size(&self) -> (u32, u32);
}

pub trait WindowFactory {
    fn create(&mut self, x: i32, y: i32, width: u32, height: u32) -> Option<Box<dyn Window>>;
    fn destroy(&mut self, window: Box<dyn Window>);
}

/// In-memory window factory for headless replay and tests.
///
/// Windows report a `Win32Hwnd` handle only; other handle kinds are unavailable.
#[derive(Debug, Default)]
pub struct HeadlessWindowFactory {
    next_handle: u64,
    live: Rc<Cell<usize>>,
    created: usize,
    fail_creation: bool,
}

impl HeadlessWindowFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent `create` call fail.
    pub fn fail_creation(&mut self, fail: bool) {
        self.fail_creation = fail;
    }

    /// Number of windows created and not yet destroyed.
    pub fn live_windows(&self) -> usize {
        self.live.get()
    }

    pub fn created_windows(&self) -> usize {
        self.created
    }
}

impl WindowFactory for HeadlessWindowFactory {
    fn create(&mut self, _x: i32, _y: i32, width: u32, height: u32) -> Option<Box<dyn Window>> {
        if self.fail_creation {
            return None;
        }
        self.next_handle += 1;
        self.created += 1;
        self.live.set(self.live.get() + 1);
        Some(Box::new(HeadlessWindow {
            handle: NativeWindowHandle(0x1000 + self.next_handle),
            width,
            height,
            live: Rc::clone(&self.live),
        }))
    }

    fn destroy(&mut self, window: Box<dyn Window>) {
        drop(window);
    }
}

#[derive(Debug)]
struct HeadlessWindow {
    handle: NativeWindowHandle,
    width: u32,
    height: u32,
    live: Rc<Cell<usize>>,
}

impl Window for HeadlessWindow {
    fn native_handle(&self, kind: NativeHandleKind) -> Option<NativeWindowHandle> {
        (kind == NativeHandleKind::Win32Hwnd).then_some(self.handle)
    }

    fn set_size(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
    }

    fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

impl Drop for HeadlessWindow {
    fn drop(&mut self) {
        self.live.set(self.live.get().saturating_sub(1));
    }
}
