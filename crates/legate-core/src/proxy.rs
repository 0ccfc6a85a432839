//! Proxy-side contract.
//!
//! The proxy handler is the stand-in object's backing state: it owns the
//! target [`Locator`], a shared [`Attachments`] map, and the weak-affinity
//! routing hint that steers subsequent invocations made through the same
//! proxy. Proxy generation itself lives outside this crate; the core only
//! needs this seam.

use core::fmt;

use crate::attachment::Attachments;
use crate::ident::Locator;

/// Routing hint for invocations made through a proxy.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Affinity {
    /// No preference; any node may serve the next invocation.
    #[default]
    None,
    /// Prefer a single named node.
    Node(String),
    /// Prefer any member of a named cluster.
    Cluster(String),
}

impl fmt::Display for Affinity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("none"),
            Self::Node(node) => write!(f, "node:{node}"),
            Self::Cluster(cluster) => write!(f, "cluster:{cluster}"),
        }
    }
}

/// Backing state of one local stand-in object.
///
/// Implementations must tolerate concurrent calls: a result-pass thread may
/// update the weak affinity while the caller thread starts the next
/// invocation through the same proxy.
pub trait ProxyHandler: Send + Sync {
    /// The target this proxy points at.
    fn locator(&self) -> &Locator;

    /// Attachments shared by every invocation made through this proxy.
    fn attachments(&self) -> &Attachments;

    /// The current routing hint.
    fn weak_affinity(&self) -> Affinity;

    /// Replace the routing hint.
    ///
    /// The core calls this once per successful invocation, after the
    /// outermost result-pass interceptor has returned, when a
    /// [`WEAK_AFFINITY`](crate::attachment::WEAK_AFFINITY) attachment was
    /// deposited during the invocation.
    fn set_weak_affinity(&self, affinity: Affinity);
}
