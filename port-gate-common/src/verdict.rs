// Binary outcomes of the two gates and the codes the kernel expects back.

/// Return code of a `cgroup_sock_addr` program that lets the call proceed.
pub const SOCK_ADDR_ALLOW: i32 = 1;
/// Return code of a `cgroup_sock_addr` program that rejects the call (EPERM).
pub const SOCK_ADDR_DENY: i32 = 0;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SocketVerdict {
    Allow,
    Deny,
}

impl SocketVerdict {
    #[inline(always)]
    pub const fn code(self) -> i32 {
        match self {
            SocketVerdict::Allow => SOCK_ADDR_ALLOW,
            SocketVerdict::Deny => SOCK_ADDR_DENY,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PacketVerdict {
    Pass,
    Drop,
}
