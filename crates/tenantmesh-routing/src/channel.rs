//! Channel abstractions
//!
//! A channel is a reusable handle for issuing calls to one host. The demux
//! never talks to hosts itself; it asks a `ChannelFactory` to construct
//! channels and closes them when their host goes away.

use tenantmesh_core::Result;

/// A host-bound communication channel
pub trait ApiChannel: Send + Sync + 'static {
    /// Host this channel is bound to
    fn host(&self) -> &str;

    /// Release the channel. Calls made after closing fail.
    ///
    /// The demux calls this while holding its cache lock, so it must not
    /// block or call back into the demux.
    fn close(&self);
}

/// Constructs channels for hosts
///
/// Construction must not perform a handshake; it only binds a channel to a
/// host. Closures of the form `Fn(&str) -> Result<C>` implement this trait.
pub trait ChannelFactory<C>: Send + Sync {
    fn create_channel(&self, host: &str) -> Result<C>;
}

impl<C, F> ChannelFactory<C> for F
where
    F: Fn(&str) -> Result<C> + Send + Sync,
{
    fn create_channel(&self, host: &str) -> Result<C> {
        self(host)
    }
}
