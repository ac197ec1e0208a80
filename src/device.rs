//! Host-facing capabilities the emulator consumes.
//!
//! The execution engine only talks to a [`Screen`], a [`Keypad`] and a [`Clock`]. Rendering,
//! capturing host keyboard events and sourcing time belong to whoever implements them.

use std::cell::Cell;
use std::io::{self, Write};
use std::time::Instant;

use fxhash::FxHashSet;

/// Width of the logical display in pixels.
pub const SCREEN_WIDTH: usize = 256;
/// Height of the logical display in pixels.
pub const SCREEN_HEIGHT: usize = 192;

/// 8-bit color packed as 3 bits red, 3 bits green, 2 bits blue.
#[derive(Clone, Copy, PartialEq, Eq, Default, Debug)]
pub struct Color(pub u8);

impl Color {
    /// Expand to 8 bits per channel.
    pub fn rgb(self) -> (u8, u8, u8) {
        let c = self.0;
        (c & 0xE0, (c & 0x1C) << 3, (c & 0x03) << 6)
    }
}

/// Receives pixel writes from `PIXEL`.
pub trait Screen {
    fn set_pixel(&mut self, x: u16, y: u16, color: Color);
}

/// Answers `INPUT` queries.
pub trait Keypad {
    fn is_input_active(&self, input_id: u16) -> bool;
}

/// Monotonic millisecond time source for `TIME`, `TIMERST` and batch budgets.
pub trait Clock {
    fn now_millis(&self) -> u64;
}

/// In-memory 256x192 display.
#[derive(Clone)]
pub struct Framebuffer {
    pixels: Box<[Color; SCREEN_WIDTH * SCREEN_HEIGHT]>,
    writes: u64,
}

impl Framebuffer {
    pub fn new() -> Self {
        Framebuffer {
            pixels: Box::new([Color(0); SCREEN_WIDTH * SCREEN_HEIGHT]),
            writes: 0,
        }
    }

    /// `None` outside the logical grid.
    pub fn pixel(&self, x: usize, y: usize) -> Option<Color> {
        (x < SCREEN_WIDTH && y < SCREEN_HEIGHT).then(|| self.pixels[y * SCREEN_WIDTH + x])
    }

    /// Number of `set_pixel` calls received, including ignored ones.
    pub fn writes(&self) -> u64 {
        self.writes
    }

    /// Write the buffer as a binary PPM (P6) image.
    pub fn write_ppm(&self, mut out: impl Write) -> io::Result<()> {
        write!(out, "P6\n{SCREEN_WIDTH} {SCREEN_HEIGHT}\n255\n")?;
        let mut row = Vec::with_capacity(SCREEN_WIDTH * 3);
        for line in self.pixels.chunks(SCREEN_WIDTH) {
            row.clear();
            for color in line {
                let (r, g, b) = color.rgb();
                row.extend_from_slice(&[r, g, b]);
            }
            out.write_all(&row)?;
        }
        out.flush()
    }
}

impl Default for Framebuffer {
    fn default() -> Self {
        Framebuffer::new()
    }
}

impl Screen for Framebuffer {
    fn set_pixel(&mut self, x: u16, y: u16, color: Color) {
        self.writes += 1;
        let (x, y) = (x as usize, y as usize);
        if x < SCREEN_WIDTH && y < SCREEN_HEIGHT {
            self.pixels[y * SCREEN_WIDTH + x] = color;
        }
    }
}

/// Binding of a host key code to an abstract input-id.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct KeyBinding {
    pub key_code: u32,
    pub input_id: u16,
}

/// Host key code -> input-id table. The first binding for a key code wins.
#[derive(Clone, Default, Debug)]
pub struct Keymap {
    bindings: Vec<KeyBinding>,
}

impl Keymap {
    pub fn new(bindings: impl IntoIterator<Item = KeyBinding>) -> Self {
        Keymap {
            bindings: bindings.into_iter().collect(),
        }
    }

    pub fn bind(&mut self, key_code: u32, input_id: u16) {
        self.bindings.push(KeyBinding { key_code, input_id });
    }

    pub fn lookup(&self, key_code: u32) -> Option<u16> {
        self.bindings
            .iter()
            .find(|binding| binding.key_code == key_code)
            .map(|binding| binding.input_id)
    }
}

/// Boolean table of active input-ids. Ids never set read as inactive.
#[derive(Clone, Default, Debug)]
pub struct KeyState {
    keymap: Keymap,
    active: FxHashSet<u16>,
}

impl KeyState {
    pub fn new() -> Self {
        KeyState::default()
    }

    pub fn with_keymap(keymap: Keymap) -> Self {
        KeyState {
            keymap,
            active: FxHashSet::default(),
        }
    }

    pub fn set(&mut self, input_id: u16, active: bool) {
        if active {
            self.active.insert(input_id);
        } else {
            self.active.remove(&input_id);
        }
    }

    /// Translate a host key press or release. Unbound key codes are ignored.
    pub fn send_key_event(&mut self, key_code: u32, pressed: bool) {
        if let Some(input_id) = self.keymap.lookup(key_code) {
            self.set(input_id, pressed);
        }
    }
}

impl Keypad for KeyState {
    fn is_input_active(&self, input_id: u16) -> bool {
        self.active.contains(&input_id)
    }
}

/// Wall clock, measured from construction.
#[derive(Clone, Copy, Debug)]
pub struct SystemClock {
    epoch: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        SystemClock {
            epoch: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        SystemClock::new()
    }
}

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }
}

/// Clock driven by hand. Every read advances it by `tick` milliseconds.
#[derive(Clone, Default, Debug)]
pub struct ManualClock {
    now: Cell<u64>,
    tick: u64,
}

impl ManualClock {
    pub fn new(start: u64) -> Self {
        ManualClock {
            now: Cell::new(start),
            tick: 0,
        }
    }

    /// Clock that moves forward by `tick` on every read.
    pub fn ticking(tick: u64) -> Self {
        ManualClock {
            now: Cell::new(0),
            tick,
        }
    }

    pub fn advance(&self, millis: u64) {
        self.now.set(self.now.get() + millis);
    }

    pub fn set(&self, millis: u64) {
        self.now.set(millis);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> u64 {
        let now = self.now.get();
        self.now.set(now + self.tick);
        now
    }
}
