use serde::{Deserialize, Serialize};

/// Session state. Each active state admits only its own operation family.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionState {
    NotUsed,
    Idle,
    Digest,
    Encrypt,
    Decrypt,
    Sign,
    Verify,
    Search,
}

impl SessionState {
    /// Numeric state value as reported by `GetSessionInfo`.
    pub fn value(self) -> u32 {
        match self {
            Self::NotUsed => 0xFFFF_FFFF,
            Self::Idle => 0,
            Self::Digest => 1,
            Self::Encrypt => 2,
            Self::Decrypt => 3,
            Self::Sign => 4,
            Self::Verify => 5,
            Self::Search => 6,
        }
    }
}

/// Session flags (`CKF_*`).
pub struct SessionFlags;

impl SessionFlags {
    pub const RW_SESSION: u32 = 0x0000_0002;
    pub const SERIAL_SESSION: u32 = 0x0000_0004;
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub slot_id: u32,
    pub state: SessionState,
    pub flags: u32,
    pub device_error: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenInfo {
    pub label: String,
    pub manufacturer: String,
    pub model: String,
    pub serial_number: String,
    pub flags: u32,
    pub max_session_count: u32,
    pub session_count: u32,
}

impl TokenInfo {
    /// `CKF_WRITE_PROTECTED`.
    pub const WRITE_PROTECTED: u32 = 0x0000_0002;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_values() {
        assert_eq!(SessionState::NotUsed.value(), 0xFFFF_FFFF);
        assert_eq!(SessionState::Idle.value(), 0);
        assert_eq!(SessionState::Search.value(), 6);
    }
}
