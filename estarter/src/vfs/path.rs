//! Virtual path model: `/{zone}/{appId}/{relative...}`.
//!
//! Parsing is the only way to obtain a [`VirtualPath`], and it rejects
//! every traversal shape up front: `..` segments, segments starting with a
//! dot, `./` sequences, and doubled slashes.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use estarter_shared::{EstarterError, EstarterResult};

/// Top-level VFS namespaces with distinct policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Zone {
    AppData,
    Cache,
    Temp,
    Shared,
    System,
}

impl Zone {
    pub const ALL: &'static [Zone] = &[
        Zone::AppData,
        Zone::Cache,
        Zone::Temp,
        Zone::Shared,
        Zone::System,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Zone::AppData => "appdata",
            Zone::Cache => "cache",
            Zone::Temp => "temp",
            Zone::Shared => "shared",
            Zone::System => "system",
        }
    }

    /// Writes, deletes, and directory creation are rejected here.
    pub fn is_read_only(&self) -> bool {
        matches!(self, Zone::System)
    }

    /// Zones owned by a single app (removed by `delete_app_data`).
    pub fn is_app_owned(&self) -> bool {
        matches!(self, Zone::AppData | Zone::Cache | Zone::Temp)
    }
}

impl std::str::FromStr for Zone {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "appdata" => Ok(Zone::AppData),
            "cache" => Ok(Zone::Cache),
            "temp" => Ok(Zone::Temp),
            "shared" => Ok(Zone::Shared),
            "system" => Ok(Zone::System),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for Zone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A parsed, validated virtual path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualPath {
    zone: Zone,
    app_id: String,
    relative: String,
}

impl VirtualPath {
    /// Parse a raw virtual path, rejecting traversal shapes.
    pub fn parse(raw: &str) -> EstarterResult<Self> {
        let invalid = |reason: &str| {
            Err(EstarterError::Vfs(format!(
                "invalid virtual path '{}': {}",
                raw, reason
            )))
        };

        if !raw.starts_with('/') {
            return invalid("must start with '/'");
        }
        if raw.contains("//") {
            return invalid("doubled slash");
        }
        if raw.contains("./") {
            return invalid("dot segment");
        }

        let trimmed = if raw.len() > 1 {
            raw.strip_suffix('/').unwrap_or(raw)
        } else {
            raw
        };
        let mut segments = trimmed[1..].split('/');

        let zone_str = match segments.next() {
            Some(z) if !z.is_empty() => z,
            _ => return invalid("missing zone"),
        };
        let zone: Zone = match zone_str.parse() {
            Ok(zone) => zone,
            Err(()) => return invalid("unknown zone"),
        };

        let app_id = match segments.next() {
            Some(a) if !a.is_empty() => a,
            _ => return invalid("missing app id"),
        };

        let rest: Vec<&str> = segments.collect();
        for segment in std::iter::once(app_id).chain(rest.iter().copied()) {
            if segment.is_empty() {
                return invalid("empty segment");
            }
            if segment == ".." {
                return invalid("parent traversal");
            }
            if segment.starts_with('.') {
                return invalid("dot-prefixed segment");
            }
        }

        Ok(Self {
            zone,
            app_id: app_id.to_string(),
            relative: rest.join("/"),
        })
    }

    pub fn zone(&self) -> Zone {
        self.zone
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    pub fn relative(&self) -> &str {
        &self.relative
    }

    /// `shared` belongs to everyone; other zones to their app only
    /// (case-insensitive).
    pub fn belongs_to(&self, caller_app_id: &str) -> bool {
        self.zone == Zone::Shared || self.app_id.eq_ignore_ascii_case(caller_app_id)
    }

    /// The physical location under a VFS root.
    pub fn physical(&self, root: &Path) -> PathBuf {
        let mut path = root.join(self.zone.as_str()).join(&self.app_id);
        if !self.relative.is_empty() {
            for segment in self.relative.split('/') {
                path.push(segment);
            }
        }
        path
    }

    /// Last path segment, or the app id for a zone root.
    pub fn file_name(&self) -> &str {
        self.relative
            .rsplit('/')
            .next()
            .filter(|s| !s.is_empty())
            .unwrap_or(&self.app_id)
    }
}

impl std::fmt::Display for VirtualPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.relative.is_empty() {
            write!(f, "/{}/{}", self.zone, self.app_id)
        } else {
            write!(f, "/{}/{}/{}", self.zone, self.app_id, self.relative)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_paths() {
        let path = VirtualPath::parse("/appdata/app.a/docs/notes.txt").unwrap();
        assert_eq!(path.zone(), Zone::AppData);
        assert_eq!(path.app_id(), "app.a");
        assert_eq!(path.relative(), "docs/notes.txt");
        assert_eq!(path.file_name(), "notes.txt");
        assert_eq!(path.to_string(), "/appdata/app.a/docs/notes.txt");

        let root = VirtualPath::parse("/cache/app.a").unwrap();
        assert_eq!(root.relative(), "");
        assert_eq!(root.file_name(), "app.a");
    }

    #[test]
    fn test_parse_tolerates_trailing_slash() {
        let path = VirtualPath::parse("/temp/app.a/scratch/").unwrap();
        assert_eq!(path.relative(), "scratch");
    }

    #[test]
    fn test_traversal_shapes_rejected() {
        for raw in [
            "/appdata/app.a/../app.b/x.txt",
            "/appdata/../secret",
            "/appdata/app.a/..",
            "/appdata/app.a/./x.txt",
            "/appdata/app.a//x.txt",
            "//appdata/app.a/x.txt",
            "/appdata/app.a/.hidden",
            "/appdata/.app/x.txt",
            "appdata/app.a/x.txt",
            "/nozone/app.a/x.txt",
            "/appdata",
            "/",
            "",
        ] {
            assert!(VirtualPath::parse(raw).is_err(), "should reject {:?}", raw);
        }
    }

    #[test]
    fn test_belongs_to() {
        let path = VirtualPath::parse("/appdata/App.A/x.txt").unwrap();
        assert!(path.belongs_to("app.a"));
        assert!(path.belongs_to("APP.A"));
        assert!(!path.belongs_to("app.b"));

        let shared = VirtualPath::parse("/shared/app.a/x.txt").unwrap();
        assert!(shared.belongs_to("app.b"));
    }

    #[test]
    fn test_physical_layout() {
        let path = VirtualPath::parse("/appdata/app.a/docs/n.txt").unwrap();
        let physical = path.physical(Path::new("/vfs"));
        assert_eq!(physical, PathBuf::from("/vfs/appdata/app.a/docs/n.txt"));
    }

    #[test]
    fn test_zone_properties() {
        assert!(Zone::System.is_read_only());
        assert!(!Zone::Shared.is_read_only());
        assert!(Zone::AppData.is_app_owned());
        assert!(Zone::Cache.is_app_owned());
        assert!(Zone::Temp.is_app_owned());
        assert!(!Zone::Shared.is_app_owned());
        assert!(!Zone::System.is_app_owned());
    }
}
