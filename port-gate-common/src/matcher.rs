/// Ports of one TCP segment, host byte order.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TcpPorts {
    pub source: u16,
    pub dest: u16,
}

/// Exact equality. Both sides must already be in host byte order.
#[inline(always)]
pub fn matches(observed: u16, policy: u16) -> bool {
    observed == policy
}

/// A segment matches when either of its ports is the policy port.
#[inline(always)]
pub fn segment_matches(ports: TcpPorts, policy: u16) -> bool {
    matches(ports.source, policy) || matches(ports.dest, policy)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_only() {
        assert!(matches(443, 443));
        assert!(!matches(443, 444));
        assert!(matches(0, 0));
    }

    #[test]
    fn either_port_matches() {
        let ports = TcpPorts {
            source: 51000,
            dest: 443,
        };
        assert!(segment_matches(ports, 443));
        assert!(segment_matches(ports, 51000));
        assert!(!segment_matches(ports, 80));
    }
}
