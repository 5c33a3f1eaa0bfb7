//! Abstract key identifiers and their PC/AT scancodes.
//!
//! The table is pure immutable data: a `const fn` match, not a runtime
//! map. Extended keys carry their `0xE0` prefix in the high byte; the
//! input encoder splits it into the EXTENDED keyboard flag on send.

/// Abstract key identifier exposed by the session input API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Key {
    Escape,
    Key1,
    Key2,
    Key3,
    Key4,
    Key5,
    Key6,
    Key7,
    Key8,
    Key9,
    Key0,
    Minus,
    Equal,
    Backspace,
    Tab,
    Q,
    W,
    E,
    R,
    T,
    Y,
    U,
    I,
    O,
    P,
    LeftBracket,
    RightBracket,
    Enter,
    LeftControl,
    A,
    S,
    D,
    F,
    G,
    H,
    J,
    K,
    L,
    Semicolon,
    Apostrophe,
    Grave,
    LeftShift,
    Backslash,
    Z,
    X,
    C,
    V,
    B,
    N,
    M,
    Comma,
    Period,
    Slash,
    RightShift,
    KpMultiply,
    LeftAlt,
    Space,
    CapsLock,
    F1,
    F2,
    F3,
    F4,
    F5,
    F6,
    F7,
    F8,
    F9,
    F10,
    F11,
    F12,
    ScrollLock,
    Kp0,
    Kp1,
    Kp2,
    Kp3,
    Kp4,
    Kp5,
    Kp6,
    Kp7,
    Kp8,
    Kp9,
    KpSubtract,
    KpAdd,
    KpDecimal,
    KpEqual,
    KpEnter,
    KpDivide,
    RightControl,
    RightAlt,
    PrintScreen,
    NumLock,
    Pause,
    Home,
    Up,
    PageUp,
    Left,
    Right,
    End,
    Down,
    PageDown,
    Insert,
    Delete,
    LeftMeta,
    RightMeta,
    Menu,
    Unknown,
}

impl Key {
    /// Every defined key, for exhaustiveness checks.
    pub const ALL: [Key; 106] = [
        Key::Escape,
        Key::Key1,
        Key::Key2,
        Key::Key3,
        Key::Key4,
        Key::Key5,
        Key::Key6,
        Key::Key7,
        Key::Key8,
        Key::Key9,
        Key::Key0,
        Key::Minus,
        Key::Equal,
        Key::Backspace,
        Key::Tab,
        Key::Q,
        Key::W,
        Key::E,
        Key::R,
        Key::T,
        Key::Y,
        Key::U,
        Key::I,
        Key::O,
        Key::P,
        Key::LeftBracket,
        Key::RightBracket,
        Key::Enter,
        Key::LeftControl,
        Key::A,
        Key::S,
        Key::D,
        Key::F,
        Key::G,
        Key::H,
        Key::J,
        Key::K,
        Key::L,
        Key::Semicolon,
        Key::Apostrophe,
        Key::Grave,
        Key::LeftShift,
        Key::Backslash,
        Key::Z,
        Key::X,
        Key::C,
        Key::V,
        Key::B,
        Key::N,
        Key::M,
        Key::Comma,
        Key::Period,
        Key::Slash,
        Key::RightShift,
        Key::KpMultiply,
        Key::LeftAlt,
        Key::Space,
        Key::CapsLock,
        Key::F1,
        Key::F2,
        Key::F3,
        Key::F4,
        Key::F5,
        Key::F6,
        Key::F7,
        Key::F8,
        Key::F9,
        Key::F10,
        Key::F11,
        Key::F12,
        Key::ScrollLock,
        Key::Kp0,
        Key::Kp1,
        Key::Kp2,
        Key::Kp3,
        Key::Kp4,
        Key::Kp5,
        Key::Kp6,
        Key::Kp7,
        Key::Kp8,
        Key::Kp9,
        Key::KpSubtract,
        Key::KpAdd,
        Key::KpDecimal,
        Key::KpEqual,
        Key::KpEnter,
        Key::KpDivide,
        Key::RightControl,
        Key::RightAlt,
        Key::PrintScreen,
        Key::NumLock,
        Key::Pause,
        Key::Home,
        Key::Up,
        Key::PageUp,
        Key::Left,
        Key::Right,
        Key::End,
        Key::Down,
        Key::PageDown,
        Key::Insert,
        Key::Delete,
        Key::LeftMeta,
        Key::RightMeta,
        Key::Menu,
        Key::Unknown,
    ];

    /// PC/AT scancode for this key; extended keys are `0xE0xx`.
    /// `Unknown` maps to 0.
    pub const fn scancode(self) -> u16 {
        match self {
            Key::Escape => 0x0001,
            Key::Key1 => 0x0002,
            Key::Key2 => 0x0003,
            Key::Key3 => 0x0004,
            Key::Key4 => 0x0005,
            Key::Key5 => 0x0006,
            Key::Key6 => 0x0007,
            Key::Key7 => 0x0008,
            Key::Key8 => 0x0009,
            Key::Key9 => 0x000A,
            Key::Key0 => 0x000B,
            Key::Minus => 0x000C,
            Key::Equal => 0x000D,
            Key::Backspace => 0x000E,
            Key::Tab => 0x000F,
            Key::Q => 0x0010,
            Key::W => 0x0011,
            Key::E => 0x0012,
            Key::R => 0x0013,
            Key::T => 0x0014,
            Key::Y => 0x0015,
            Key::U => 0x0016,
            Key::I => 0x0017,
            Key::O => 0x0018,
            Key::P => 0x0019,
            Key::LeftBracket => 0x001A,
            Key::RightBracket => 0x001B,
            Key::Enter => 0x001C,
            Key::LeftControl => 0x001D,
            Key::A => 0x001E,
            Key::S => 0x001F,
            Key::D => 0x0020,
            Key::F => 0x0021,
            Key::G => 0x0022,
            Key::H => 0x0023,
            Key::J => 0x0024,
            Key::K => 0x0025,
            Key::L => 0x0026,
            Key::Semicolon => 0x0027,
            Key::Apostrophe => 0x0028,
            Key::Grave => 0x0029,
            Key::LeftShift => 0x002A,
            Key::Backslash => 0x002B,
            Key::Z => 0x002C,
            Key::X => 0x002D,
            Key::C => 0x002E,
            Key::V => 0x002F,
            Key::B => 0x0030,
            Key::N => 0x0031,
            Key::M => 0x0032,
            Key::Comma => 0x0033,
            Key::Period => 0x0034,
            Key::Slash => 0x0035,
            Key::RightShift => 0x0036,
            Key::KpMultiply => 0x0037,
            Key::LeftAlt => 0x0038,
            Key::Space => 0x0039,
            Key::CapsLock => 0x003A,
            Key::F1 => 0x003B,
            Key::F2 => 0x003C,
            Key::F3 => 0x003D,
            Key::F4 => 0x003E,
            Key::F5 => 0x003F,
            Key::F6 => 0x0040,
            Key::F7 => 0x0041,
            Key::F8 => 0x0042,
            Key::F9 => 0x0043,
            Key::F10 => 0x0044,
            Key::ScrollLock => 0x0046,
            Key::Kp7 => 0x0047,
            Key::Kp8 => 0x0048,
            Key::Kp9 => 0x0049,
            Key::KpSubtract => 0x004A,
            Key::Kp4 => 0x004B,
            Key::Kp5 => 0x004C,
            Key::Kp6 => 0x004D,
            Key::KpAdd => 0x004E,
            Key::Kp1 => 0x004F,
            Key::Kp2 => 0x0050,
            Key::Kp3 => 0x0051,
            Key::Kp0 => 0x0052,
            Key::KpDecimal => 0x0053,
            Key::F11 => 0x0057,
            Key::F12 => 0x0058,
            Key::KpEqual => 0x0059,
            Key::KpEnter => 0xE01C,
            Key::RightControl => 0xE01D,
            Key::KpDivide => 0xE035,
            Key::PrintScreen => 0xE037,
            Key::RightAlt => 0xE038,
            Key::NumLock => 0xE045,
            Key::Pause => 0xE046,
            Key::Home => 0xE047,
            Key::Up => 0xE048,
            Key::PageUp => 0xE049,
            Key::Left => 0xE04B,
            Key::Right => 0xE04D,
            Key::End => 0xE04F,
            Key::Down => 0xE050,
            Key::PageDown => 0xE051,
            Key::Insert => 0xE052,
            Key::Delete => 0xE053,
            Key::LeftMeta => 0xE05B,
            Key::RightMeta => 0xE05C,
            Key::Menu => 0xE05D,
            Key::Unknown => 0x0000,
        }
    }

    /// Whether this scancode needs the extended (`0xE0`) prefix.
    pub const fn is_extended(self) -> bool {
        self.scancode() & 0xFF00 == 0xE000
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn every_key_has_a_scancode() {
        for key in Key::ALL {
            if key == Key::Unknown {
                assert_eq!(key.scancode(), 0);
            } else {
                assert_ne!(key.scancode(), 0, "{key:?} maps to zero");
            }
        }
    }

    #[test]
    fn scancodes_are_distinct() {
        let codes: HashSet<u16> = Key::ALL.iter().map(|k| k.scancode()).collect();
        assert_eq!(codes.len(), Key::ALL.len());
    }

    #[test]
    fn extended_keys_carry_prefix() {
        assert!(Key::Up.is_extended());
        assert!(Key::KpEnter.is_extended());
        assert!(!Key::Enter.is_extended());
        assert_eq!(Key::Up.scancode(), 0xE048);
    }

    #[test]
    fn letters_follow_qwerty_rows() {
        assert_eq!(Key::Q.scancode(), 0x0010);
        assert_eq!(Key::A.scancode(), 0x001E);
        assert_eq!(Key::Z.scancode(), 0x002C);
    }
}
