//! Capability permissions and the immutable permission set.
//!
//! Every privileged operation an app may attempt is gated by one of these
//! bits. A [`PermissionSet`] pairs a granted mask with a denied mask; denied
//! bits always win.

use serde::{Deserialize, Serialize};

bitflags::bitflags! {
    /// A set of named capabilities, encoded as bits in a u64.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct Permission: u64 {
        const FILE_READ       = 1 << 0;
        const FILE_WRITE      = 1 << 1;
        const FILE_DELETE     = 1 << 2;
        const NETWORK_ACCESS  = 1 << 3;
        const NETWORK_LISTEN  = 1 << 4;
        const NOTIFICATION    = 1 << 5;
        const CLIPBOARD       = 1 << 6;
        const DIALOG          = 1 << 7;
        const OVERLAY         = 1 << 8;
        const PROCESS_LAUNCH  = 1 << 9;
        const PROCESS_KILL    = 1 << 10;
        const SYSTEM_SETTINGS = 1 << 11;
        const SYSTEM_INFO     = 1 << 12;
        const IPC_SEND        = 1 << 13;
        const IPC_RECEIVE     = 1 << 14;
        const IPC_BROADCAST   = 1 << 15;
        const CAMERA          = 1 << 16;
        const MICROPHONE      = 1 << 17;
        const LOCATION        = 1 << 18;
        const ADMIN           = 1 << 19;
        const KERNEL          = 1 << 20;
    }
}

impl Permission {
    /// Baseline bundle granted to simple apps.
    pub const BASIC: Permission = Permission::FILE_READ
        .union(Permission::NOTIFICATION)
        .union(Permission::IPC_SEND)
        .union(Permission::IPC_RECEIVE);

    /// Bundle for ordinary interactive apps.
    pub const STANDARD: Permission = Permission::BASIC
        .union(Permission::FILE_WRITE)
        .union(Permission::FILE_DELETE)
        .union(Permission::NETWORK_ACCESS)
        .union(Permission::CLIPBOARD)
        .union(Permission::DIALOG);

    /// Everything an app can ever be granted. Admin and Kernel are reserved
    /// for the runtime itself and are never reachable through the public API.
    pub const FULL: Permission = Permission::all()
        .difference(Permission::ADMIN.union(Permission::KERNEL));

    /// Resolve a permission (or bundle) by name, case-insensitively.
    ///
    /// Returns `None` for unknown names; manifest parsing ignores those.
    pub fn from_name(name: &str) -> Option<Permission> {
        let normalized: String = name
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .collect::<String>()
            .to_ascii_lowercase();
        let flag = match normalized.as_str() {
            "fileread" => Permission::FILE_READ,
            "filewrite" => Permission::FILE_WRITE,
            "filedelete" => Permission::FILE_DELETE,
            "networkaccess" => Permission::NETWORK_ACCESS,
            "networklisten" => Permission::NETWORK_LISTEN,
            "notification" => Permission::NOTIFICATION,
            "clipboard" => Permission::CLIPBOARD,
            "dialog" => Permission::DIALOG,
            "overlay" => Permission::OVERLAY,
            "processlaunch" => Permission::PROCESS_LAUNCH,
            "processkill" => Permission::PROCESS_KILL,
            "systemsettings" => Permission::SYSTEM_SETTINGS,
            "systeminfo" => Permission::SYSTEM_INFO,
            "ipcsend" => Permission::IPC_SEND,
            "ipcreceive" => Permission::IPC_RECEIVE,
            "ipcbroadcast" => Permission::IPC_BROADCAST,
            "camera" => Permission::CAMERA,
            "microphone" => Permission::MICROPHONE,
            "location" => Permission::LOCATION,
            "admin" => Permission::ADMIN,
            "kernel" => Permission::KERNEL,
            "basic" => Permission::BASIC,
            "standard" => Permission::STANDARD,
            "full" => Permission::FULL,
            _ => return None,
        };
        Some(flag)
    }

    /// Names of the individual bits contained in this set.
    pub fn names(&self) -> Vec<&'static str> {
        self.iter_names().map(|(name, _)| name).collect()
    }
}

impl std::fmt::Display for Permission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_empty() {
            return write!(f, "(none)");
        }
        write!(f, "{}", self.names().join(" | "))
    }
}

/// Immutable pair of granted and denied permission masks.
///
/// All updates produce a new value; readers always observe a complete set.
/// `has(p)` holds only when every bit of `p` is granted and none is denied.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionSet {
    pub granted: Permission,
    pub denied: Permission,
}

impl PermissionSet {
    pub const fn empty() -> Self {
        Self {
            granted: Permission::empty(),
            denied: Permission::empty(),
        }
    }

    pub const fn with_granted(granted: Permission) -> Self {
        Self {
            granted,
            denied: Permission::empty(),
        }
    }

    /// True iff `p` is fully granted and no bit of `p` is denied.
    pub fn has(&self, p: Permission) -> bool {
        self.granted.contains(p) && !self.denied.intersects(p)
    }

    /// Add `p` to the granted mask and lift any standing denial of it.
    #[must_use]
    pub fn grant(&self, p: Permission) -> Self {
        Self {
            granted: self.granted | p,
            denied: self.denied - p,
        }
    }

    /// Remove `p` from both masks. Distinct from [`deny`](Self::deny): a
    /// revoked permission can be granted again without lifting a denial.
    #[must_use]
    pub fn revoke(&self, p: Permission) -> Self {
        Self {
            granted: self.granted - p,
            denied: self.denied - p,
        }
    }

    /// Record a denial of `p`. The granted mask is untouched; denied bits
    /// win during `has` checks.
    #[must_use]
    pub fn deny(&self, p: Permission) -> Self {
        Self {
            granted: self.granted,
            denied: self.denied | p,
        }
    }

    /// Bits of `required` this set does not satisfy.
    pub fn missing(&self, required: Permission) -> Permission {
        (required - self.granted) | (required & self.denied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bundles_exclude_reserved_bits() {
        assert!(!Permission::FULL.intersects(Permission::ADMIN | Permission::KERNEL));
        assert!(Permission::FULL.contains(Permission::BASIC));
        assert!(Permission::FULL.contains(Permission::STANDARD));
        assert_eq!(
            Permission::BASIC,
            Permission::FILE_READ
                | Permission::NOTIFICATION
                | Permission::IPC_SEND
                | Permission::IPC_RECEIVE
        );
    }

    #[test]
    fn test_from_name_case_insensitive() {
        assert_eq!(
            Permission::from_name("FileRead"),
            Some(Permission::FILE_READ)
        );
        assert_eq!(
            Permission::from_name("FILE_READ"),
            Some(Permission::FILE_READ)
        );
        assert_eq!(
            Permission::from_name("networkaccess"),
            Some(Permission::NETWORK_ACCESS)
        );
        assert_eq!(Permission::from_name("basic"), Some(Permission::BASIC));
        assert_eq!(Permission::from_name("no-such-cap"), None);
    }

    #[test]
    fn test_grant_monotonicity() {
        let set = PermissionSet::empty().grant(Permission::CAMERA);
        assert!(set.has(Permission::CAMERA));

        let set = set.revoke(Permission::CAMERA);
        assert!(!set.has(Permission::CAMERA));
    }

    #[test]
    fn test_grant_idempotent() {
        let once = PermissionSet::empty().grant(Permission::FILE_WRITE);
        let twice = once.grant(Permission::FILE_WRITE);
        assert_eq!(once, twice);

        let revoked = once.revoke(Permission::FILE_WRITE);
        assert_eq!(revoked, revoked.revoke(Permission::FILE_WRITE));
    }

    #[test]
    fn test_denial_wins() {
        let set = PermissionSet::empty()
            .grant(Permission::LOCATION)
            .deny(Permission::LOCATION);
        assert!(!set.has(Permission::LOCATION));

        // A later grant lifts the denial.
        assert!(set.grant(Permission::LOCATION).has(Permission::LOCATION));
    }

    #[test]
    fn test_deny_after_grant_sequences() {
        let mut set = PermissionSet::empty();
        for _ in 0..3 {
            set = set.grant(Permission::MICROPHONE);
            set = set.deny(Permission::MICROPHONE);
        }
        assert!(!set.has(Permission::MICROPHONE));
    }

    #[test]
    fn test_missing_bits() {
        let set = PermissionSet::with_granted(Permission::FILE_READ)
            .deny(Permission::CAMERA);
        let required = Permission::FILE_READ | Permission::FILE_WRITE;
        assert_eq!(set.missing(required), Permission::FILE_WRITE);

        // A granted-but-denied bit is still missing.
        let set = set.grant(Permission::CAMERA).deny(Permission::CAMERA);
        assert_eq!(set.missing(Permission::CAMERA), Permission::CAMERA);
    }

    #[test]
    fn test_display_names() {
        let p = Permission::FILE_READ | Permission::CAMERA;
        let shown = p.to_string();
        assert!(shown.contains("FILE_READ"));
        assert!(shown.contains("CAMERA"));
        assert_eq!(Permission::empty().to_string(), "(none)");
    }
}
