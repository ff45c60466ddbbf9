//! Producer-side frame sources (capture + encode collaborators).

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::StreamError;

/// Produces encoded frame payloads on demand.
///
/// `Ok(None)` means nothing new is available this tick; the producer
/// skips the tick instead of sending a stale frame.
pub trait FrameSource: Send {
    fn capture(&mut self) -> Result<Option<Bytes>, StreamError>;
}

impl<F> FrameSource for F
where
    F: FnMut() -> Result<Option<Bytes>, StreamError> + Send,
{
    fn capture(&mut self) -> Result<Option<Bytes>, StreamError> {
        self()
    }
}

// ── TestPattern ──────────────────────────────────────────────────

/// Synthetic source emitting binary PPM (`P6`) images: a diagonal
/// gradient with a bright bar that moves one step per frame.
#[derive(Debug, Clone)]
pub struct TestPattern {
    width: u32,
    height: u32,
    tick: u32,
}

impl TestPattern {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width: width.max(1),
            height: height.max(1),
            tick: 0,
        }
    }

    fn render(&self) -> Bytes {
        let header = format!("P6\n{} {}\n255\n", self.width, self.height);
        let pixels = self.width as usize * self.height as usize * 3;
        let mut out = BytesMut::with_capacity(header.len() + pixels);
        out.put_slice(header.as_bytes());

        let bar = self.tick % self.width;
        for y in 0..self.height {
            for x in 0..self.width {
                if x == bar {
                    out.put_slice(&[255, 255, 255]);
                    continue;
                }
                let r = (x * 255 / self.width) as u8;
                let g = (y * 255 / self.height) as u8;
                let b = (self.tick.wrapping_mul(3) % 256) as u8;
                out.put_slice(&[r, g, b]);
            }
        }
        out.freeze()
    }
}

impl FrameSource for TestPattern {
    fn capture(&mut self) -> Result<Option<Bytes>, StreamError> {
        let frame = self.render();
        self.tick = self.tick.wrapping_add(1);
        Ok(Some(frame))
    }
}
