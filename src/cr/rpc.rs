//! Wire types and length-framing for the C/R driver's RPC over a
//! `SOCK_SEQPACKET` socketpair (spec §4.6).
//!
//! Framing mirrors the length-prefixed idiom the teacher already uses for
//! its init pipe, generalized to `nix::sys::socket::socketpair` with
//! `SOCK_SEQPACKET`. The payload itself is `serde_json`, a documented
//! simplification of CRIU's real protobuf wire format — see DESIGN.md.

use std::collections::HashMap;
use std::os::fd::RawFd;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReqType {
    Dump,
    PreDump,
    Restore,
    FeatureCheck,
    Version,
    Notify,
}

/// The shared RPC option set (spec §4.6 "Shared RPC shape"). Fd-valued
/// options are raw fds transferred alongside the request via `SCM_RIGHTS`
/// by the caller; this struct only carries the fd numbers the helper
/// should expect, not ownership.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CriuOpts {
    pub images_dir_fd: Option<RawFd>,
    pub work_dir_fd: Option<RawFd>,
    pub log_file: Option<String>,
    pub log_level: Option<i32>,
    pub root: Option<String>,
    pub shell_job: bool,
    pub tcp_established: bool,
    pub file_locks: bool,
    pub empty_ns: u32,
    pub auto_dedup: bool,
    pub lazy_pages: bool,
    pub manage_cgroups: bool,
    pub notify_scripts: bool,
    pub ext_mnt: Vec<(String, String)>,
    pub external: Vec<String>,
    pub inherit_fd: Vec<(String, RawFd)>,
    pub cg_root: Vec<(String, String)>,
    pub page_server: Option<String>,
    pub parent_img: Option<String>,
    pub veths: Vec<(String, String)>,
    pub lsm_profile: Option<String>,
    pub freeze_cgroup: Option<String>,
    pub status_fd: Option<RawFd>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CriuRequest {
    pub req_type: ReqType,
    pub opts: CriuOpts,
    pub features: HashMap<String, bool>,
    pub notify_success: Option<bool>,
}

impl CriuRequest {
    pub fn new(req_type: ReqType, opts: CriuOpts) -> Self {
        Self {
            req_type,
            opts,
            features: HashMap::new(),
            notify_success: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CriuNotify {
    pub script: String,
    pub pid: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CriuResponse {
    pub req_type: ReqType,
    pub success: bool,
    pub version: Option<u32>,
    pub cr_errno: i32,
    pub features: HashMap<String, bool>,
    pub notify: Option<CriuNotify>,
    pub log: Option<String>,
}

/// Send one length-framed request datagram.
pub fn send_frame(fd: RawFd, req: &CriuRequest) -> Result<()> {
    let payload = serde_json::to_vec(req)?;
    let mut framed = Vec::with_capacity(4 + payload.len());
    framed.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    framed.extend_from_slice(&payload);
    nix::sys::socket::send(fd, &framed, nix::sys::socket::MsgFlags::empty())
        .map_err(|e| Error::syscall("send(cr request)", e))?;
    Ok(())
}

/// Receive one length-framed response datagram, plus any fds the helper
/// attached via `SCM_RIGHTS` (spec §4.6: the orphaned pty master fd on an
/// `orphan-pts-master` notify). `SOCK_SEQPACKET` already preserves message
/// boundaries; the length prefix is kept for fidelity with the real CRIU
/// framing this protocol mirrors.
pub fn recv_frame(fd: RawFd) -> Result<(CriuResponse, Vec<RawFd>)> {
    use nix::cmsg_space;
    use nix::sys::socket::{recvmsg, ControlMessageOwned, MsgFlags};
    use std::io::IoSliceMut;

    let mut buf = vec![0u8; 256 * 1024];
    let mut iov = [IoSliceMut::new(&mut buf)];
    let mut cmsg_buf = cmsg_space!([RawFd; 4]);

    let msg = recvmsg::<()>(fd, &mut iov, Some(&mut cmsg_buf), MsgFlags::MSG_CMSG_CLOEXEC)
        .map_err(|e| Error::syscall("recvmsg(cr response)", e))?;

    let mut fds = Vec::new();
    for cmsg in msg.cmsgs().map_err(|e| Error::syscall("cmsgs(cr response)", e))? {
        if let ControlMessageOwned::ScmRights(received) = cmsg {
            fds.extend(received);
        }
    }

    let n = msg.bytes;
    if n < 4 {
        return Err(Error::HelperFailure {
            request_type: "unknown".to_string(),
            errno: -1,
            log: "truncated response frame".to_string(),
        });
    }

    let len = u32::from_be_bytes(buf[0..4].try_into().unwrap()) as usize;
    let end = (4 + len).min(n);
    let resp: CriuResponse = serde_json::from_slice(&buf[4..end])?;
    Ok((resp, fds))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_round_trips_through_json() {
        let req = CriuRequest::new(ReqType::Version, CriuOpts::default());
        let json = serde_json::to_string(&req).unwrap();
        let back: CriuRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(back.req_type, ReqType::Version);
    }
}
