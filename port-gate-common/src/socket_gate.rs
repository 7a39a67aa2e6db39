use crate::error::GateError;
use crate::headers::IPPROTO_TCP;
use crate::maps::{SocketGateConfig, SCOPE_TCP_ONLY};
use crate::matcher::matches;
use crate::policy::{network_to_host_port, PolicyRole, PolicyStore};
use crate::verdict::SocketVerdict;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SocketHook {
    /// Observed port is the remote port being connected to.
    Connect,
    /// Observed port is the local port being bound.
    Bind,
}

impl SocketHook {
    pub const fn name(self) -> &'static str {
        match self {
            SocketHook::Connect => "connect",
            SocketHook::Bind => "bind",
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ProtocolScope {
    AllProtocols,
    TcpOnly,
}

impl From<SocketGateConfig> for ProtocolScope {
    fn from(cfg: SocketGateConfig) -> Self {
        if cfg.scope == SCOPE_TCP_ONLY {
            ProtocolScope::TcpOnly
        } else {
            ProtocolScope::AllProtocols
        }
    }
}

/// One connect or bind attempt as seen by the hook.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SocketRequest {
    pub hook: SocketHook,
    pub protocol: u32,
    /// Host byte order.
    pub port: u16,
}

impl SocketRequest {
    /// Builds a request from the raw `protocol`/`user_port` fields of
    /// `bpf_sock_addr`. `user_port` holds the port in network byte order in
    /// its low 16 bits.
    #[inline(always)]
    pub fn from_sock_addr(hook: SocketHook, protocol: u32, user_port: u32) -> Self {
        Self {
            hook,
            protocol,
            port: network_to_host_port(user_port as u16),
        }
    }
}

/// Allow-list enforcement for connect and bind.
///
/// An unconfigured allowed port denies everything.
pub struct SocketGate<P> {
    policy: P,
    scope: ProtocolScope,
}

impl<P: PolicyStore> SocketGate<P> {
    pub fn new(policy: P, scope: ProtocolScope) -> Self {
        Self { policy, scope }
    }

    #[inline(always)]
    pub fn evaluate(&self, req: &SocketRequest) -> SocketVerdict {
        // Fail closed.
        self.decide(req).unwrap_or(SocketVerdict::Deny)
    }

    #[inline(always)]
    pub fn decide(&self, req: &SocketRequest) -> Result<SocketVerdict, GateError> {
        if self.scope == ProtocolScope::TcpOnly && req.protocol != IPPROTO_TCP as u32 {
            return Ok(SocketVerdict::Allow);
        }
        let allowed = self
            .policy
            .lookup(PolicyRole::Allowed)
            .ok_or(GateError::PolicyUnconfigured)?;
        if matches(req.port, allowed) {
            Ok(SocketVerdict::Allow)
        } else {
            Ok(SocketVerdict::Deny)
        }
    }
}
