//! rxperm-api: Shared permission vocabulary for rxperm
//!
//! This crate defines the types exchanged between the permission runtime and
//! the host platform: permission identifiers, per-permission grant results and
//! the integer request tokens that correlate a prompt with its callback.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// First token handed out by a fresh correlator
pub const BASE_REQUEST_TOKEN: RequestToken = RequestToken(1000);

/// Host result code for a granted permission
pub const PERMISSION_GRANTED: i32 = 0;

/// Host result code for a denied permission
pub const PERMISSION_DENIED: i32 = -1;

/// A single runtime permission recognised by the host platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionKind {
    FineLocation,
    CoarseLocation,
    Camera,
    Microphone,
    ReadContacts,
    WriteContacts,
    GetAccounts,
    ReadCalendar,
    WriteCalendar,
    ReadPhoneState,
    CallPhone,
    SendSms,
    ReceiveSms,
    ReadSms,
    ReadExternalStorage,
    WriteExternalStorage,
    BodySensors,
}

impl PermissionKind {
    /// Every known permission, in declaration order
    pub const ALL: [PermissionKind; 17] = [
        Self::FineLocation,
        Self::CoarseLocation,
        Self::Camera,
        Self::Microphone,
        Self::ReadContacts,
        Self::WriteContacts,
        Self::GetAccounts,
        Self::ReadCalendar,
        Self::WriteCalendar,
        Self::ReadPhoneState,
        Self::CallPhone,
        Self::SendSms,
        Self::ReceiveSms,
        Self::ReadSms,
        Self::ReadExternalStorage,
        Self::WriteExternalStorage,
        Self::BodySensors,
    ];

    /// The permission string the host platform uses for this capability
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FineLocation => "android.permission.ACCESS_FINE_LOCATION",
            Self::CoarseLocation => "android.permission.ACCESS_COARSE_LOCATION",
            Self::Camera => "android.permission.CAMERA",
            Self::Microphone => "android.permission.RECORD_AUDIO",
            Self::ReadContacts => "android.permission.READ_CONTACTS",
            Self::WriteContacts => "android.permission.WRITE_CONTACTS",
            Self::GetAccounts => "android.permission.GET_ACCOUNTS",
            Self::ReadCalendar => "android.permission.READ_CALENDAR",
            Self::WriteCalendar => "android.permission.WRITE_CALENDAR",
            Self::ReadPhoneState => "android.permission.READ_PHONE_STATE",
            Self::CallPhone => "android.permission.CALL_PHONE",
            Self::SendSms => "android.permission.SEND_SMS",
            Self::ReceiveSms => "android.permission.RECEIVE_SMS",
            Self::ReadSms => "android.permission.READ_SMS",
            Self::ReadExternalStorage => "android.permission.READ_EXTERNAL_STORAGE",
            Self::WriteExternalStorage => "android.permission.WRITE_EXTERNAL_STORAGE",
            Self::BodySensors => "android.permission.BODY_SENSORS",
        }
    }
}

impl fmt::Display for PermissionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a host permission string has no `PermissionKind`
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown permission: {0}")]
pub struct UnknownPermission(pub String);

impl FromStr for PermissionKind {
    type Err = UnknownPermission;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| UnknownPermission(s.to_string()))
    }
}

/// Outcome reported by the host for one requested permission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantResult {
    Granted,
    Denied,
}

impl GrantResult {
    /// Convert a host result code. Anything but `PERMISSION_GRANTED` is a denial.
    pub fn from_code(code: i32) -> Self {
        if code == PERMISSION_GRANTED {
            Self::Granted
        } else {
            Self::Denied
        }
    }

    /// The host result code for this outcome
    pub fn code(&self) -> i32 {
        match self {
            Self::Granted => PERMISSION_GRANTED,
            Self::Denied => PERMISSION_DENIED,
        }
    }

    pub fn is_granted(&self) -> bool {
        matches!(self, Self::Granted)
    }
}

impl From<bool> for GrantResult {
    fn from(granted: bool) -> Self {
        if granted {
            Self::Granted
        } else {
            Self::Denied
        }
    }
}

/// Integer tag correlating an outgoing host prompt with its callback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestToken(pub i32);

impl RequestToken {
    pub fn new(value: i32) -> Self {
        Self(value)
    }

    pub fn value(&self) -> i32 {
        self.0
    }

    /// The following token, or `None` on `i32` overflow
    pub fn checked_next(&self) -> Option<Self> {
        self.0.checked_add(1).map(Self)
    }
}

impl Default for RequestToken {
    fn default() -> Self {
        BASE_REQUEST_TOKEN
    }
}

impl fmt::Display for RequestToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i32> for RequestToken {
    fn from(value: i32) -> Self {
        Self(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permission_string_round_trip() {
        for kind in PermissionKind::ALL {
            let parsed: PermissionKind = kind.as_str().parse().unwrap();
            assert_eq!(parsed, kind);
        }
    }

    #[test]
    fn test_unknown_permission() {
        let err = "android.permission.TELEPORT"
            .parse::<PermissionKind>()
            .unwrap_err();
        assert_eq!(err.0, "android.permission.TELEPORT");
        assert!(err.to_string().contains("TELEPORT"));
    }

    #[test]
    fn test_display_uses_host_string() {
        assert_eq!(
            PermissionKind::Camera.to_string(),
            "android.permission.CAMERA"
        );
    }

    #[test]
    fn test_grant_result_codes() {
        assert_eq!(GrantResult::from_code(0), GrantResult::Granted);
        assert_eq!(GrantResult::from_code(-1), GrantResult::Denied);
        assert_eq!(GrantResult::from_code(42), GrantResult::Denied);
        assert_eq!(GrantResult::Denied.code(), PERMISSION_DENIED);
        assert!(GrantResult::from(true).is_granted());
    }

    #[test]
    fn test_token_next_and_overflow() {
        assert_eq!(BASE_REQUEST_TOKEN.checked_next(), Some(RequestToken(1001)));
        assert_eq!(RequestToken(i32::MAX).checked_next(), None);
        assert_eq!(RequestToken::default(), BASE_REQUEST_TOKEN);
    }

    #[test]
    fn test_serde_shapes() {
        let json = serde_json::to_string(&PermissionKind::FineLocation).unwrap();
        assert_eq!(json, "\"fine_location\"");

        let token: RequestToken = serde_json::from_str("1005").unwrap();
        assert_eq!(token, RequestToken(1005));
    }
}
