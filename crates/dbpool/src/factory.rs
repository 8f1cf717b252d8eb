//! Raw connection creation and per-session setup.

use crate::Result;
use crate::connection::{Connection, ConnectionId};

/// Creates physical connections for one database endpoint.
pub trait ConnectionFactory: Send + Sync + 'static {
    type Connection: Connection + Send + 'static;

    /// Endpoint key this factory connects to.
    fn endpoint(&self) -> &str;

    /// Open a new physical connection carrying `id`.
    fn connect(&self, id: ConnectionId) -> Result<Self::Connection>;
}

/// Hook applied to every freshly created raw connection before first use.
///
/// Any closure `Fn(&mut C) -> Result<()>` works as a hook.
pub trait SessionSetup<C>: Send + Sync + 'static {
    fn on_connect(&self, conn: &mut C) -> Result<()>;
}

impl<C, F> SessionSetup<C> for F
where
    F: Fn(&mut C) -> Result<()> + Send + Sync + 'static,
{
    fn on_connect(&self, conn: &mut C) -> Result<()> {
        self(conn)
    }
}

/// Setup hook that leaves connections untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSetup;

impl<C> SessionSetup<C> for NoSetup {
    fn on_connect(&self, _conn: &mut C) -> Result<()> {
        Ok(())
    }
}
