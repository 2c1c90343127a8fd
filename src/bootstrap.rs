//! Netlink-style TLV encoder for the bootstrap message sent to the init
//! stub over the init pipe (spec §4.4).
//!
//! No single teacher/pack file grounds a TLV encoder at this exact shape;
//! built directly from the spec's attribute list, following the explicit
//! "fallible appends, first error wins" redesign note (§9) instead of a
//! panic/recover encoder. Pure `std`.

use std::path::Path;

use crate::core::config::{Config, IdMap, NamespaceType};

/// Attribute type identifiers, in wire order of appearance (order within
/// the message is not significant to a correct decoder, but a stable order
/// keeps encoded output deterministic for tests).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub(crate) enum AttrType {
    CloneFlags = 1,
    NsPaths = 2,
    UidMap = 3,
    GidMap = 4,
    UidmapPath = 5,
    GidmapPath = 6,
    Setgroup = 7,
    OomScoreAdj = 8,
    RootlessEuid = 9,
    MountSources = 10,
}

/// Errors that can occur while encoding a bootstrap message.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum BootstrapError {
    #[error("namespace join path contains a comma: {0}")]
    PathContainsComma(String),
    #[error("namespace join path does not exist: {0}")]
    PathMissing(String),
    #[error("mount source contains a NUL byte: {0}")]
    SourceContainsNul(String),
    #[error("bootstrap message is truncated")]
    Truncated,
}

/// An in-progress bootstrap message. Each `add_*` call either appends an
/// attribute or returns an error immediately — no attribute is partially
/// written.
#[derive(Debug, Default)]
pub struct Encoder {
    buf: Vec<u8>,
}

impl Encoder {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    fn push_attr(&mut self, ty: AttrType, value: &[u8]) {
        self.buf.extend_from_slice(&(ty as u16).to_be_bytes());
        self.buf
            .extend_from_slice(&(value.len() as u32).to_be_bytes());
        self.buf.extend_from_slice(value);
    }

    fn add_clone_flags(&mut self, flags: u32) {
        self.push_attr(AttrType::CloneFlags, &flags.to_be_bytes());
    }

    fn add_ns_paths(&mut self, config: &Config) -> Result<(), BootstrapError> {
        let mut parts = Vec::new();
        for ty in NamespaceType::CANONICAL_ORDER {
            if let Some(path) = config.join_path(ty) {
                let path_str = path.to_string_lossy();
                if path_str.contains(',') {
                    return Err(BootstrapError::PathContainsComma(path_str.into_owned()));
                }
                if !Path::new(path).exists() {
                    return Err(BootstrapError::PathMissing(path_str.into_owned()));
                }
                parts.push(format!("{}:{}", ty.wire_name(), path_str));
            }
        }
        if !parts.is_empty() {
            self.push_attr(AttrType::NsPaths, parts.join(",").as_bytes());
        }
        Ok(())
    }

    fn add_id_maps(&mut self, ty: AttrType, maps: &[IdMap], joining_userns: bool) {
        if joining_userns || maps.is_empty() {
            return;
        }
        let lines: String = maps.iter().map(IdMap::to_line).collect();
        self.push_attr(ty, lines.as_bytes());
    }

    fn add_mapping_tool_paths(&mut self, config: &Config) {
        if !config.rootless {
            return;
        }
        self.push_attr(AttrType::UidmapPath, b"/usr/bin/newuidmap");
        self.push_attr(AttrType::GidmapPath, b"/usr/bin/newgidmap");
    }

    fn add_setgroup(&mut self, config: &Config) {
        // setgroups must be disabled (or routed through the mapping tool)
        // whenever a gid mapping is requested without a privileged caller.
        let requires_setgroup_handling = !config.gid_mappings.is_empty();
        self.push_attr(
            AttrType::Setgroup,
            &[requires_setgroup_handling as u8],
        );
    }

    fn add_oom_score_adj(&mut self, config: &Config) {
        if let Some(adj) = config.oom_score_adj {
            self.push_attr(AttrType::OomScoreAdj, adj.to_string().as_bytes());
        }
    }

    fn add_rootless_euid(&mut self, config: &Config) {
        self.push_attr(AttrType::RootlessEuid, &[config.rootless as u8]);
    }

    fn add_mount_sources(
        &mut self,
        config: &Config,
        sources: &[Option<String>],
    ) -> Result<(), BootstrapError> {
        if !config.needs_mount_source_fds() {
            return Ok(());
        }

        let mut buf = Vec::new();
        for src in sources {
            if let Some(s) = src {
                if s.contains('\0') {
                    return Err(BootstrapError::SourceContainsNul(s.clone()));
                }
                buf.extend_from_slice(s.as_bytes());
            }
            buf.push(0);
        }
        self.push_attr(AttrType::MountSources, &buf);
        Ok(())
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// Encode the full bootstrap message for a config, given the resolved
/// clone flags and the per-mount bind-source paths (aligned 1:1 with
/// `config.mounts`, `None` for non-bind entries).
pub fn encode(
    config: &Config,
    clone_flags: u32,
    mount_sources: &[Option<String>],
) -> Result<Vec<u8>, BootstrapError> {
    let mut enc = Encoder::new();
    enc.add_clone_flags(clone_flags);
    enc.add_ns_paths(config)?;

    let joining_userns = config.join_path(NamespaceType::User).is_some();
    enc.add_id_maps(AttrType::UidMap, &config.uid_mappings, joining_userns);
    enc.add_id_maps(AttrType::GidMap, &config.gid_mappings, joining_userns);
    enc.add_mapping_tool_paths(config);
    enc.add_setgroup(config);
    enc.add_oom_score_adj(config);
    enc.add_rootless_euid(config);
    enc.add_mount_sources(config, mount_sources)?;

    Ok(enc.into_bytes())
}

impl AttrType {
    fn from_u16(v: u16) -> Option<Self> {
        Some(match v {
            1 => AttrType::CloneFlags,
            2 => AttrType::NsPaths,
            3 => AttrType::UidMap,
            4 => AttrType::GidMap,
            5 => AttrType::UidmapPath,
            6 => AttrType::GidmapPath,
            7 => AttrType::Setgroup,
            8 => AttrType::OomScoreAdj,
            9 => AttrType::RootlessEuid,
            10 => AttrType::MountSources,
            _ => return None,
        })
    }
}

/// A single namespace join request decoded from the `NsPaths` attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NsJoin {
    pub ns_type: NamespaceType,
    pub path: std::path::PathBuf,
}

/// The init stub's view of a bootstrap message, decoded from the raw TLV
/// bytes read off the init pipe (the mirror image of [`encode`]).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BootstrapMessage {
    pub clone_flags: u32,
    pub ns_paths: Vec<NsJoin>,
    pub uid_map: Option<String>,
    pub gid_map: Option<String>,
    pub uidmap_path: Option<String>,
    pub gidmap_path: Option<String>,
    pub setgroup: bool,
    pub oom_score_adj: Option<i32>,
    pub rootless_euid: bool,
    pub mount_sources: Vec<Option<String>>,
}

/// Decode a bootstrap message produced by [`encode`]. Unknown attribute
/// types are skipped (forward compatibility); a truncated buffer fails.
pub fn decode(buf: &[u8]) -> Result<BootstrapMessage, BootstrapError> {
    let mut msg = BootstrapMessage::default();
    let mut pos = 0usize;

    while pos < buf.len() {
        if pos + 6 > buf.len() {
            return Err(BootstrapError::Truncated);
        }
        let ty = u16::from_be_bytes([buf[pos], buf[pos + 1]]);
        let len = u32::from_be_bytes(buf[pos + 2..pos + 6].try_into().unwrap()) as usize;
        pos += 6;
        if pos + len > buf.len() {
            return Err(BootstrapError::Truncated);
        }
        let value = &buf[pos..pos + len];
        pos += len;

        match AttrType::from_u16(ty) {
            Some(AttrType::CloneFlags) => {
                msg.clone_flags = u32::from_be_bytes(value.try_into().map_err(|_| BootstrapError::Truncated)?);
            }
            Some(AttrType::NsPaths) => {
                let text = String::from_utf8_lossy(value);
                for part in text.split(',').filter(|s| !s.is_empty()) {
                    if let Some((wire, path)) = part.split_once(':') {
                        if let Some(ns_type) = NamespaceType::from_wire_name(wire) {
                            msg.ns_paths.push(NsJoin {
                                ns_type,
                                path: std::path::PathBuf::from(path),
                            });
                        }
                    }
                }
            }
            Some(AttrType::UidMap) => msg.uid_map = Some(String::from_utf8_lossy(value).into_owned()),
            Some(AttrType::GidMap) => msg.gid_map = Some(String::from_utf8_lossy(value).into_owned()),
            Some(AttrType::UidmapPath) => {
                msg.uidmap_path = Some(String::from_utf8_lossy(value).into_owned())
            }
            Some(AttrType::GidmapPath) => {
                msg.gidmap_path = Some(String::from_utf8_lossy(value).into_owned())
            }
            Some(AttrType::Setgroup) => msg.setgroup = value.first().copied().unwrap_or(0) != 0,
            Some(AttrType::OomScoreAdj) => {
                msg.oom_score_adj = String::from_utf8_lossy(value).parse().ok();
            }
            Some(AttrType::RootlessEuid) => {
                msg.rootless_euid = value.first().copied().unwrap_or(0) != 0
            }
            Some(AttrType::MountSources) => {
                msg.mount_sources = value
                    .split(|b| *b == 0)
                    .map(|chunk| {
                        if chunk.is_empty() {
                            None
                        } else {
                            Some(String::from_utf8_lossy(chunk).into_owned())
                        }
                    })
                    .collect();
                // `split` on a trailing NUL yields one extra empty chunk.
                if matches!(msg.mount_sources.last(), Some(None)) {
                    msg.mount_sources.pop();
                }
            }
            None => {}
        }
    }

    Ok(msg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::NamespaceConfig;
    use std::path::PathBuf;

    fn base_config() -> Config {
        Config {
            rootfs: PathBuf::from("/tmp/rootfs"),
            readonly_rootfs: false,
            hostname: "craterun".to_string(),
            namespaces: vec![],
            mounts: vec![],
            cgroup: Default::default(),
            cgroups_path: None,
            uid_mappings: vec![],
            gid_mappings: vec![],
            hooks: Default::default(),
            labels: Default::default(),
            rlimits: vec![],
            devices: vec![],
            network: Default::default(),
            rootless: false,
            oom_score_adj: None,
            parent_death_signal: None,
        }
    }

    #[test]
    fn clone_flags_attribute_is_always_present() {
        let cfg = base_config();
        let msg = encode(&cfg, 0x20000000, &[]).unwrap();
        // type(2) + len(4) + value(4) for CloneFlags is always the first
        // ten bytes.
        assert_eq!(&msg[0..2], &(AttrType::CloneFlags as u16).to_be_bytes());
    }

    #[test]
    fn ns_path_with_comma_is_rejected() {
        let mut cfg = base_config();
        cfg.namespaces = vec![NamespaceConfig::join(
            NamespaceType::Network,
            PathBuf::from("/tmp/weird,path"),
        )];
        let err = encode(&cfg, 0, &[]).unwrap_err();
        assert!(matches!(err, BootstrapError::PathContainsComma(_)));
    }

    #[test]
    fn ns_path_missing_is_rejected() {
        let mut cfg = base_config();
        cfg.namespaces = vec![NamespaceConfig::join(
            NamespaceType::Network,
            PathBuf::from("/proc/999999999/ns/net"),
        )];
        let err = encode(&cfg, 0, &[]).unwrap_err();
        assert!(matches!(err, BootstrapError::PathMissing(_)));
    }

    #[test]
    fn mount_source_with_nul_is_rejected() {
        let mut cfg = base_config();
        cfg.namespaces = vec![
            NamespaceConfig::new(NamespaceType::User),
            NamespaceConfig::new(NamespaceType::Mount),
        ];
        cfg.mounts = vec![crate::core::config::MountConfig::bind("/src", "/dst")];
        let err = encode(&cfg, 0, &[Some("bad\0path".to_string())]).unwrap_err();
        assert!(matches!(err, BootstrapError::SourceContainsNul(_)));
    }

    #[test]
    fn decode_round_trips_clone_flags_and_oom_score() {
        let mut cfg = base_config();
        cfg.oom_score_adj = Some(-500);
        let msg = encode(&cfg, 0x4000_0000, &[]).unwrap();
        let decoded = decode(&msg).unwrap();
        assert_eq!(decoded.clone_flags, 0x4000_0000);
        assert_eq!(decoded.oom_score_adj, Some(-500));
    }

    #[test]
    fn decode_round_trips_ns_paths() {
        let mut cfg = base_config();
        cfg.namespaces = vec![NamespaceConfig::join(NamespaceType::Network, PathBuf::from("/proc/1/ns/net"))];
        let msg = encode(&cfg, 0, &[]).unwrap();
        let decoded = decode(&msg).unwrap();
        assert_eq!(decoded.ns_paths.len(), 1);
        assert_eq!(decoded.ns_paths[0].ns_type, NamespaceType::Network);
        assert_eq!(decoded.ns_paths[0].path, PathBuf::from("/proc/1/ns/net"));
    }

    #[test]
    fn id_maps_omitted_when_joining_userns() {
        let mut cfg = base_config();
        cfg.namespaces = vec![NamespaceConfig::join(
            NamespaceType::User,
            PathBuf::from("/proc/1/ns/user"),
        )];
        cfg.uid_mappings = vec![IdMap {
            container_id: 0,
            host_id: 1000,
            size: 1,
        }];
        let msg = encode(&cfg, 0, &[]).unwrap();
        // No UidMap attribute type bytes should appear anywhere in the buffer.
        let uid_map_type = (AttrType::UidMap as u16).to_be_bytes();
        assert!(!msg.windows(2).any(|w| w == uid_map_type));
    }
}
