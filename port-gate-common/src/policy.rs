// Policy cells shared by both enforcement points.
//
// Ports are kept in host byte order everywhere a policy value lives. Anything
// read off the wire or out of a socket hook goes through
// `network_to_host_port` before it is compared.

/// Which of the two single-slot policy cells a gate consults.
#[repr(u32)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum PolicyRole {
    /// The only port a scoped process may connect to or bind.
    Allowed = 0,
    /// The port whose TCP traffic is dropped at ingress.
    Blocked = 1,
}

impl PolicyRole {
    pub const fn map_name(self) -> &'static str {
        match self {
            PolicyRole::Allowed => crate::maps::ALLOWED_PORT,
            PolicyRole::Blocked => crate::maps::BLOCKED_PORT,
        }
    }
}

/// Key of the single entry in each policy map.
pub const POLICY_KEY: u32 = 0;

/// Read side of the policy store.
///
/// `None` means the control plane never configured the role. Port 0 is a
/// regular value and comes back as `Some(0)`.
pub trait PolicyStore {
    fn lookup(&self, role: PolicyRole) -> Option<u16>;
}

impl<P: PolicyStore + ?Sized> PolicyStore for &P {
    #[inline(always)]
    fn lookup(&self, role: PolicyRole) -> Option<u16> {
        (**self).lookup(role)
    }
}

/// Converts a port taken verbatim from network memory into host order.
///
/// This is the only byte-order conversion applied to ports in the system;
/// both the TCP header accessors and the socket hooks call it.
#[inline(always)]
pub const fn network_to_host_port(raw: u16) -> u16 {
    u16::from_be(raw)
}

/// Fixed in-memory policy, used by the dry-run classifier and by tests.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct StaticPolicy {
    pub allowed: Option<u16>,
    pub blocked: Option<u16>,
}

impl StaticPolicy {
    pub const fn unconfigured() -> Self {
        Self {
            allowed: None,
            blocked: None,
        }
    }

    pub const fn allowing(port: u16) -> Self {
        Self {
            allowed: Some(port),
            blocked: None,
        }
    }

    pub const fn blocking(port: u16) -> Self {
        Self {
            allowed: None,
            blocked: Some(port),
        }
    }
}

impl PolicyStore for StaticPolicy {
    fn lookup(&self, role: PolicyRole) -> Option<u16> {
        match role {
            PolicyRole::Allowed => self.allowed,
            PolicyRole::Blocked => self.blocked,
        }
    }
}
