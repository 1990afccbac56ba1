//! The link object model: the six observable attributes the rest of the
//! crate reasons about, and their derivation from a raw netlink link
//! message.

use libc::{ARPHRD_ETHER, ARPHRD_LOOPBACK};

/// A minimal, already-flattened view of a kernel `RTM_NEWLINK`/`RTM_GETLINK`
/// reply. The transport layer is responsible for pulling these fields out of
/// the wire format; everything downstream of this point never looks at a
/// raw netlink message again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLinkMessage {
    pub ifindex: u32,
    pub name: String,
    /// Explicit kernel type string (`IFLA_INFO_KIND`), when present.
    pub kind_str: Option<String>,
    /// `ARPHRD_*` value from the link header.
    pub arp_hardware_type: u16,
    pub flags: u32,
}

/// The kind of a network interface, as far as this adapter cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkKind {
    Loopback,
    Ethernet,
    Dummy,
    Generic,
    Unknown,
    /// No kernel object was available to classify (`RawLinkMessage` absent).
    None,
}

impl LinkKind {
    /// The kernel type string used to create a link of this kind, if any.
    /// Only `Dummy` has a reverse mapping today.
    pub fn creation_type_str(self) -> Option<&'static str> {
        match self {
            LinkKind::Dummy => Some("dummy"),
            _ => None,
        }
    }

    fn from_type_str(type_str: &str) -> LinkKind {
        match type_str {
            "dummy" => LinkKind::Dummy,
            _ => LinkKind::Unknown,
        }
    }

    fn from_arp_hardware_type(arphrd: u16) -> LinkKind {
        match arphrd {
            ARPHRD_LOOPBACK => LinkKind::Loopback,
            ARPHRD_ETHER => LinkKind::Ethernet,
            _ => LinkKind::Generic,
        }
    }
}

/// `IFF_UP`, `IFF_LOWER_UP`, `IFF_NOARP` — the flag bits the adapter derives
/// boolean attributes from. Kept alongside the object model because the
/// command surface needs the same constants to build change requests.
pub const IFF_UP: u32 = libc::IFF_UP as u32;
pub const IFF_LOWER_UP: u32 = libc::IFF_LOWER_UP as u32;
pub const IFF_NOARP: u32 = libc::IFF_NOARP as u32;

/// A network interface as observed through the adapter.
///
/// `raw_flags` is deliberately excluded from [`Link::observably_equal`]: it
/// is bookkeeping the command surface uses to preserve unrelated flag bits
/// across a read-modify-write, not one of the six attributes upstream
/// consumers are notified about.
#[derive(Debug, Clone)]
pub struct Link {
    pub ifindex: u32,
    pub name: String,
    pub kind: LinkKind,
    pub up: bool,
    pub connected: bool,
    pub arp: bool,
    pub raw_flags: u32,
}

impl Link {
    /// Derive a [`Link`] from a raw kernel message. Total and pure: the same
    /// input always produces the same output.
    pub fn from_raw(raw: &RawLinkMessage) -> Link {
        let kind = match raw.kind_str.as_deref() {
            Some(type_str) => LinkKind::from_type_str(type_str),
            None => LinkKind::from_arp_hardware_type(raw.arp_hardware_type),
        };

        Link {
            ifindex: raw.ifindex,
            name: raw.name.clone(),
            kind,
            up: raw.flags & IFF_UP != 0,
            connected: raw.flags & IFF_LOWER_UP != 0,
            arp: raw.flags & IFF_NOARP == 0,
            raw_flags: raw.flags,
        }
    }

    /// Attribute-level equality used by the Coherence Engine. Two
    /// links are the same observation iff the six observable attributes
    /// match; `raw_flags` is not one of them.
    pub fn observably_equal(&self, other: &Link) -> bool {
        self.ifindex == other.ifindex
            && self.name == other.name
            && self.kind == other.kind
            && self.up == other.up
            && self.connected == other.connected
            && self.arp == other.arp
    }
}
