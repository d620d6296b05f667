//! Decides which ports are probed on every address.

/// Minecraft Java Edition well-known port.
pub const DEFAULT_PORT: u16 = 25565;

/// Candidates checked in aggressive mode, well-known port first.
pub const AGGRESSIVE_PORTS: [u16; 4] = [25565, 25566, 25567, 25575];

/// Per-address port selection policy.
///
/// The prober walks the policy's ports in order and stops at the first
/// conforming server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortPolicy {
    /// Only the well-known port.
    Default,
    /// The fixed set of common alternative ports.
    Aggressive,
    /// A user-supplied list, probed as given.
    Manual(Vec<u16>),
}

impl PortPolicy {
    /// Picks the policy from configuration. An explicit port list always
    /// wins over the aggressive flag.
    pub fn pick(ports: Option<Vec<u16>>, aggressive: bool) -> Self {
        match ports {
            Some(ports) if !ports.is_empty() => PortPolicy::Manual(ports),
            _ if aggressive => PortPolicy::Aggressive,
            _ => PortPolicy::Default,
        }
    }

    /// Candidate ports in probing order.
    pub fn order(&self) -> Vec<u16> {
        match self {
            PortPolicy::Default => vec![DEFAULT_PORT],
            PortPolicy::Aggressive => AGGRESSIVE_PORTS.to_vec(),
            PortPolicy::Manual(ports) => ports.clone(),
        }
    }
}
