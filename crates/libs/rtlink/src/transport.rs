//! The Netlink Transport: two kernel channels (request, event) and
//! the narrow [`LinkSource`] trait the Coherence Engine talks to instead of
//! the kernel directly. This is what the design notes mean by "parametric
//! over kernel query": unit tests substitute a fake [`LinkSource`] (see
//! `tests/`) and never touch a real socket.

use std::io::IoSliceMut;
use std::num::NonZeroI32;
use std::os::fd::{AsRawFd, OwnedFd};

use async_trait::async_trait;
use futures::TryStreamExt;
use netlink_packet_route::link::{InfoKind, LinkAttribute, LinkFlag, LinkInfo, LinkMessage};
use nix::sys::socket::{
    bind, recvmsg, setsockopt, socket, sockopt, AddressFamily, ControlMessageOwned,
    MsgFlags, NetlinkAddr, SockFlag, SockProtocol, SockType,
};
use rtnetlink::Handle;

use crate::error::PlatformError;
use crate::object::{Link, LinkKind, RawLinkMessage, IFF_LOWER_UP, IFF_NOARP, IFF_UP};

const RTMGRP_LINK: u32 = 1; // bit 0 of the rtnetlink multicast group mask

/// The kernel-facing boundary the Coherence Engine drives every
/// reconciliation through. A real implementation ([`NetlinkTransport`])
/// talks to the kernel; a fake one drives the engine in tests.
#[async_trait]
pub trait LinkSource: Send {
    async fn query_by_index(&self, ifindex: u32) -> Result<Option<Link>, PlatformError>;
    async fn query_by_name(&self, name: &str) -> Result<Option<Link>, PlatformError>;
    async fn query_all(&self) -> Result<Vec<Link>, PlatformError>;

    /// Issues the creation request and returns `Ok(())` if the kernel
    /// accepted it or reported `EEXIST`. The caller is
    /// expected to follow up with a fresh [`LinkSource::query_by_name`] to
    /// reconcile, exactly like any other mutating command.
    async fn create(&self, name: &str, kind: LinkKind) -> Result<(), PlatformError>;

    async fn delete(&self, ifindex: u32) -> Result<(), PlatformError>;

    /// Read-modify-write on the administrative flags: `set_mask` bits are
    /// turned on, `clear_mask` bits are turned off, everything else is left
    /// untouched by the kernel.
    async fn set_flags(&self, ifindex: u32, set_mask: u32, clear_mask: u32) -> Result<(), PlatformError>;
}

fn link_message_to_raw(msg: &LinkMessage) -> RawLinkMessage {
    let mut name = String::new();
    let mut kind_str = None;

    for attr in &msg.attributes {
        match attr {
            LinkAttribute::IfName(ifname) => name = ifname.clone(),
            LinkAttribute::LinkInfo(infos) => {
                for info in infos {
                    if let LinkInfo::Kind(kind) = info {
                        kind_str = Some(info_kind_to_str(kind));
                    }
                }
            }
            _ => {}
        }
    }

    RawLinkMessage {
        ifindex: msg.header.index,
        name,
        kind_str,
        arp_hardware_type: msg.header.link_layer_type as u16,
        flags: link_flags_to_bits(&msg.header.flags),
    }
}

fn link_flags_to_bits(flags: &[LinkFlag]) -> u32 {
    flags.iter().fold(0u32, |acc, flag| acc | u32::from(*flag))
}

fn bits_to_link_flags(bits: u32) -> Vec<LinkFlag> {
    (0..32)
        .map(|bit| 1u32 << bit)
        .filter(|bit| bits & bit != 0)
        .map(LinkFlag::from)
        .collect()
}

fn info_kind_to_str(kind: &InfoKind) -> String {
    match kind {
        InfoKind::Dummy => "dummy".to_string(),
        InfoKind::Other(other) => other.clone(),
        other => format!("{other:?}").to_lowercase(),
    }
}

fn is_exist_error(err: &rtnetlink::Error) -> bool {
    matches!(
        err,
        rtnetlink::Error::NetlinkError(message)
            if message.code == NonZeroI32::new(-libc::EEXIST)
    )
}

/// The request-channel half of the transport: a synchronous (awaited)
/// send/reply relationship over a single rtnetlink connection.
pub struct NetlinkTransport {
    handle: Handle,
}

impl NetlinkTransport {
    /// Establishes the request channel and spawns its background connection
    /// task. Process-credential passing is enabled by `rtnetlink` itself
    /// (it binds with `NETLINK_ROUTE` and the kernel always attaches
    /// credentials on replies it originates).
    pub fn connect() -> Result<Self, PlatformError> {
        let (connection, handle, _messages) =
            rtnetlink::new_connection().map_err(|err| PlatformError::transport_failure(err.to_string()))?;
        tokio::spawn(connection);
        Ok(Self { handle })
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }
}

#[async_trait]
impl LinkSource for NetlinkTransport {
    async fn query_by_index(&self, ifindex: u32) -> Result<Option<Link>, PlatformError> {
        let mut stream = self.handle.link().get().match_index(ifindex).execute();
        match stream.try_next().await {
            Ok(Some(msg)) => Ok(Some(Link::from_raw(&link_message_to_raw(&msg)))),
            Ok(None) => Ok(None),
            Err(rtnetlink::Error::NetlinkError(message)) if message.code == NonZeroI32::new(-libc::ENODEV) => {
                Ok(None)
            }
            Err(err) => Err(PlatformError::transport_failure(err.to_string())),
        }
    }

    async fn query_by_name(&self, name: &str) -> Result<Option<Link>, PlatformError> {
        let mut stream = self.handle.link().get().match_name(name.to_string()).execute();
        match stream.try_next().await {
            Ok(Some(msg)) => Ok(Some(Link::from_raw(&link_message_to_raw(&msg)))),
            Ok(None) => Ok(None),
            Err(rtnetlink::Error::NetlinkError(message)) if message.code == NonZeroI32::new(-libc::ENODEV) => {
                Ok(None)
            }
            Err(err) => Err(PlatformError::transport_failure(err.to_string())),
        }
    }

    async fn query_all(&self) -> Result<Vec<Link>, PlatformError> {
        let mut stream = self.handle.link().get().execute();
        let mut links = Vec::new();
        while let Some(msg) =
            stream.try_next().await.map_err(|err| PlatformError::transport_failure(err.to_string()))?
        {
            links.push(Link::from_raw(&link_message_to_raw(&msg)));
        }
        Ok(links)
    }

    async fn create(&self, name: &str, kind: LinkKind) -> Result<(), PlatformError> {
        let type_str = kind
            .creation_type_str()
            .ok_or_else(|| PlatformError::invalid_argument(format!("unsupported creatable kind: {kind:?}")))?;
        let request = match type_str {
            "dummy" => self.handle.link().add().dummy(name.to_string()),
            other => return Err(PlatformError::invalid_argument(format!("no creation mapping for {other}"))),
        };
        match request.execute().await {
            Ok(()) => Ok(()),
            Err(err) if is_exist_error(&err) => Ok(()),
            Err(err) => Err(PlatformError::transport_failure(err.to_string())),
        }
    }

    async fn delete(&self, ifindex: u32) -> Result<(), PlatformError> {
        match self.handle.link().del(ifindex).execute().await {
            Ok(()) => Ok(()),
            Err(err) if is_exist_error(&err) => Ok(()),
            Err(err) => Err(PlatformError::transport_failure(err.to_string())),
        }
    }

    async fn set_flags(&self, ifindex: u32, set_mask: u32, clear_mask: u32) -> Result<(), PlatformError> {
        let mut request = self.handle.link().set(ifindex);
        let message = request.message_mut();
        let current = link_flags_to_bits(&message.header.flags);
        let updated = (current | set_mask) & !clear_mask;
        message.header.flags = bits_to_link_flags(updated);
        message.header.change_mask = bits_to_link_flags(set_mask | clear_mask);

        match request.execute().await {
            Ok(()) => Ok(()),
            Err(err) if is_exist_error(&err) => Ok(()),
            Err(err) => Err(PlatformError::transport_failure(err.to_string())),
        }
    }
}

/// Administrative-flag bit groups the command surface toggles. Kept next to
/// the transport because they are netlink `IFF_*` bits, not part of the
/// object model proper.
pub mod flags {
    use super::*;

    pub const UP: u32 = IFF_UP;
    pub const NOARP: u32 = IFF_NOARP;
    pub const LOWER_UP: u32 = IFF_LOWER_UP;
}

/// A single parsed, credential-verified event-channel message.
#[derive(Debug, Clone)]
pub enum LinkEvent {
    /// `RTM_NEWLINK`/`RTM_DELLINK` both carry an identity the engine treats
    /// identically — the event's own kind is advisory only.
    Touched { ifindex: u32, name: Option<String> },
}

/// The event-channel half of the transport: a non-blocking multicast
/// netlink socket, subscribed to `RTNLGRP_LINK`, with kernel-origin
/// credential verification on every inbound datagram.
pub struct EventChannel {
    fd: tokio::io::unix::AsyncFd<OwnedFd>,
    recv_buffer_bytes: usize,
}

impl EventChannel {
    pub fn bind(recv_buffer_bytes: usize) -> Result<Self, PlatformError> {
        let fd: OwnedFd = socket(
            AddressFamily::Netlink,
            SockType::Raw,
            SockFlag::SOCK_NONBLOCK | SockFlag::SOCK_CLOEXEC,
            SockProtocol::NetlinkRoute,
        )
        .map_err(|errno| PlatformError::transport_failure(format!("socket: {errno}")))?;

        setsockopt(&fd, sockopt::PassCred, &true)
            .map_err(|errno| PlatformError::transport_failure(format!("SO_PASSCRED: {errno}")))?;
        setsockopt(&fd, sockopt::RcvBuf, &recv_buffer_bytes)
            .map_err(|errno| PlatformError::transport_failure(format!("SO_RCVBUF: {errno}")))?;

        let addr = NetlinkAddr::new(0, RTMGRP_LINK);
        bind(fd.as_raw_fd(), &addr).map_err(|errno| PlatformError::transport_failure(format!("bind: {errno}")))?;

        let fd = tokio::io::unix::AsyncFd::new(fd)
            .map_err(|err| PlatformError::transport_failure(format!("register event fd: {err}")))?;

        Ok(Self { fd, recv_buffer_bytes })
    }

    /// Awaits the next datagram, verifies it carries kernel-origin
    /// credentials, and returns its parsed link events. Returns an empty
    /// `Vec` (without an error) for messages dropped by credential
    /// verification or transient parse failures — the failure is logged by
    /// the caller, not surfaced.
    pub async fn recv(&mut self) -> Result<Vec<LinkEvent>, PlatformError> {
        loop {
            let mut guard = self
                .fd
                .readable_mut()
                .await
                .map_err(|err| PlatformError::transport_failure(format!("event fd readiness: {err}")))?;

            let mut buf = vec![0u8; self.recv_buffer_bytes];
            let mut iov = [IoSliceMut::new(&mut buf)];
            let mut cmsg_space = nix::cmsg_space!(libc::ucred);

            let result = guard.try_io(|fd| {
                recvmsg::<NetlinkAddr>(fd.as_raw_fd(), &mut iov, Some(&mut cmsg_space), MsgFlags::empty())
                    .map_err(std::io::Error::from)
            });

            let msg = match result {
                Ok(Ok(msg)) => msg,
                Ok(Err(err)) => return Err(PlatformError::transport_failure(format!("recvmsg: {err}"))),
                Err(_would_block) => continue,
            };

            if !has_kernel_credentials(&msg) {
                log::warn!("netlink: dropping event message without kernel-origin credentials");
                continue;
            }

            let received = msg.bytes;
            return Ok(parse_link_events(&buf[..received]));
        }
    }
}

fn has_kernel_credentials(msg: &nix::sys::socket::RecvMsg<'_, '_, NetlinkAddr>) -> bool {
    for cmsg in msg.cmsgs() {
        if let ControlMessageOwned::ScmCredentials(creds) = cmsg {
            return creds.pid() == 0 && creds.uid() == 0 && creds.gid() == 0;
        }
    }
    false
}

fn parse_link_events(buf: &[u8]) -> Vec<LinkEvent> {
    use netlink_packet_core::{NetlinkMessage, NetlinkPayload};
    use netlink_packet_route::RouteNetlinkMessage;

    let mut events = Vec::new();
    let mut offset = 0;
    while offset < buf.len() {
        let parsed = match NetlinkMessage::<RouteNetlinkMessage>::deserialize(&buf[offset..]) {
            Ok(parsed) => parsed,
            Err(err) => {
                log::warn!("netlink: failed to parse event message: {err}");
                break;
            }
        };
        let consumed = parsed.header.length as usize;

        if let NetlinkPayload::InnerMessage(inner) = parsed.payload {
            match inner {
                RouteNetlinkMessage::NewLink(msg) | RouteNetlinkMessage::DelLink(msg) => {
                    let raw = link_message_to_raw(&msg);
                    events.push(LinkEvent::Touched {
                        ifindex: raw.ifindex,
                        name: if raw.name.is_empty() { None } else { Some(raw.name) },
                    });
                }
                _ => {}
            }
        }

        if consumed == 0 {
            break;
        }
        offset += consumed;
    }
    events
}
