//! Input event PDUs (keyboard scancodes, pointer).

use bitflags::bitflags;
use bytes::{BufMut, Bytes, BytesMut};

const INPUT_EVENT_SCANCODE: u16 = 0x0004;
const INPUT_EVENT_MOUSE: u16 = 0x8001;

bitflags! {
    /// Keyboard event flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct KeyboardFlags: u16 {
        const EXTENDED = 0x0100;
        const DOWN = 0x4000;
        const RELEASE = 0x8000;
    }
}

bitflags! {
    /// Pointer event flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PointerFlags: u16 {
        const WHEEL_NEGATIVE = 0x0100;
        const WHEEL = 0x0200;
        const MOVE = 0x0800;
        const BUTTON1 = 0x1000;
        const BUTTON2 = 0x2000;
        const BUTTON3 = 0x4000;
        const DOWN = 0x8000;
    }
}

/// Low 9 bits of the pointer flags carry the wheel rotation amount.
pub const WHEEL_ROTATION_MASK: u16 = 0x01FF;

/// One input event as submitted by the caller-facing API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputEvent {
    /// Keyboard scancode. Extended (`0xE0`-prefixed) codes carry the
    /// prefix in the high byte and are split at encode time.
    Scancode { flags: KeyboardFlags, code: u16 },
    /// Pointer move/button/wheel at pixel coordinates.
    Pointer { flags: PointerFlags, x: u16, y: u16 },
}

/// Serialize events into the body of a `PDUTYPE2_INPUT` data PDU.
pub fn encode_input_events(events: &[InputEvent]) -> Bytes {
    let mut buf = BytesMut::with_capacity(4 + events.len() * 12);
    buf.put_u16_le(events.len() as u16);
    buf.put_u16_le(0); // pad
    for event in events {
        buf.put_u32_le(0); // event time
        match *event {
            InputEvent::Scancode { flags, code } => {
                let mut flags = flags;
                let mut code = code;
                if code & 0xFF00 == 0xE000 {
                    flags |= KeyboardFlags::EXTENDED;
                    code &= 0x00FF;
                }
                buf.put_u16_le(INPUT_EVENT_SCANCODE);
                buf.put_u16_le(flags.bits());
                buf.put_u16_le(code);
                buf.put_u16_le(0); // pad
            }
            InputEvent::Pointer { flags, x, y } => {
                buf.put_u16_le(INPUT_EVENT_MOUSE);
                buf.put_u16_le(flags.bits());
                buf.put_u16_le(x);
                buf.put_u16_le(y);
            }
        }
    }
    buf.freeze()
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scancode_event_layout() {
        let body = encode_input_events(&[InputEvent::Scancode {
            flags: KeyboardFlags::empty(),
            code: 0x1E, // 'A'
        }]);
        assert_eq!(u16::from_le_bytes([body[0], body[1]]), 1);
        assert_eq!(u16::from_le_bytes([body[8], body[9]]), INPUT_EVENT_SCANCODE);
        assert_eq!(u16::from_le_bytes([body[10], body[11]]), 0);
        assert_eq!(u16::from_le_bytes([body[12], body[13]]), 0x1E);
    }

    #[test]
    fn extended_scancode_splits_prefix() {
        let body = encode_input_events(&[InputEvent::Scancode {
            flags: KeyboardFlags::RELEASE,
            code: 0xE048, // Up arrow
        }]);
        let flags = u16::from_le_bytes([body[10], body[11]]);
        let code = u16::from_le_bytes([body[12], body[13]]);
        assert_eq!(
            flags,
            (KeyboardFlags::RELEASE | KeyboardFlags::EXTENDED).bits()
        );
        assert_eq!(code, 0x48);
    }

    #[test]
    fn pointer_event_layout() {
        let body = encode_input_events(&[InputEvent::Pointer {
            flags: PointerFlags::MOVE,
            x: 640,
            y: 480,
        }]);
        assert_eq!(u16::from_le_bytes([body[8], body[9]]), INPUT_EVENT_MOUSE);
        assert_eq!(u16::from_le_bytes([body[10], body[11]]), 0x0800);
        assert_eq!(u16::from_le_bytes([body[12], body[13]]), 640);
        assert_eq!(u16::from_le_bytes([body[14], body[15]]), 480);
    }

    #[test]
    fn multiple_events_share_one_pdu() {
        let body = encode_input_events(&[
            InputEvent::Pointer {
                flags: PointerFlags::MOVE,
                x: 1,
                y: 2,
            },
            InputEvent::Pointer {
                flags: PointerFlags::DOWN | PointerFlags::BUTTON1,
                x: 1,
                y: 2,
            },
        ]);
        assert_eq!(u16::from_le_bytes([body[0], body[1]]), 2);
        assert_eq!(body.len(), 4 + 2 * 12);
    }
}
