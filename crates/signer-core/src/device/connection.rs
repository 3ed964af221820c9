//! Exclusive access to the signing device.
//!
//! A [`ConnectionGuard`] owns a token lock and a slot for the one open
//! [`DeviceClient`]. [`ConnectionGuard::acquire`] takes the token and opens a
//! client; the returned [`ConnectionSession`] keeps the token until it is
//! released or dropped, so the whole open → use → close sequence of one
//! caller never interleaves with another's.
//!
//! ```text
//!          acquire()                    release() / drop
//! Closed ─────────────▶ Open(session) ─────────────────────▶ Closed
//!   ▲                                                          │
//!   └──────────────────────────────────────────────────────────┘
//! ```
//!
//! One guard serializes one device. Two guards over two factories do not
//! contend with each other.

use std::fmt;

use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, warn};

use super::{DeviceClient, DeviceClientFactory};
use crate::error::{Error, Result};

/// Serializes device sessions and guarantees their teardown.
pub struct ConnectionGuard {
    factory: Box<dyn DeviceClientFactory>,
    token: Mutex<()>,
    handle: Mutex<Option<Box<dyn DeviceClient>>>,
}

impl fmt::Debug for ConnectionGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionGuard")
            .field("open", &self.is_open())
            .finish_non_exhaustive()
    }
}

impl ConnectionGuard {
    /// Creates a closed guard that opens clients with `factory`.
    #[must_use]
    pub fn new(factory: impl DeviceClientFactory + 'static) -> Self {
        Self {
            factory: Box::new(factory),
            token: Mutex::new(()),
            handle: Mutex::new(None),
        }
    }

    /// Returns `true` while a client is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.handle.lock().is_some()
    }

    /// Waits for the token, then opens a client.
    ///
    /// Blocks while another session is active. Callers are served in the
    /// order they obtain the token.
    ///
    /// # Errors
    ///
    /// - [`Error::MultipleOpenConnectionsDisallowed`] if a client is still
    ///   open when the token is obtained. The token is released first.
    /// - Any error raised by the factory. The token is released and the
    ///   guard stays closed.
    pub fn acquire(&self) -> Result<ConnectionSession<'_>> {
        let token = self.token.lock();

        let mut handle = self.handle.lock();
        if handle.is_some() {
            drop(handle);
            drop(token);
            warn!("device session requested while another one is still open");
            return Err(Error::MultipleOpenConnectionsDisallowed);
        }

        *handle = Some(self.factory.open()?);
        drop(handle);
        debug!("device session opened");

        Ok(ConnectionSession {
            guard: self,
            _token: token,
            released: false,
        })
    }

    /// Closes the open client, if any. A no-op when closed.
    ///
    /// Never blocks. While a session is active, including one held by the
    /// calling thread, this does nothing: the session closes the client
    /// when it ends.
    ///
    /// # Errors
    ///
    /// Returns the client's close error. The slot is cleared regardless.
    pub fn release(&self) -> Result<()> {
        let Some(_token) = self.token.try_lock() else {
            debug!("release skipped while a session is active");
            return Ok(());
        };
        self.close_handle()
    }

    /// Runs `f` inside a session and closes the session before handing back
    /// the result.
    ///
    /// An error from `f` takes precedence over a close error.
    ///
    /// # Errors
    ///
    /// Any [`acquire`](Self::acquire) error, any error from `f`, or the close
    /// error if `f` succeeded.
    pub fn with_session<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut dyn DeviceClient) -> Result<T>,
    {
        let mut session = self.acquire()?;
        let result = session.with_client(f);
        let closed = session.release();

        match (result, closed) {
            (Err(e), closed) => {
                if let Err(close_err) = closed {
                    warn!(error = %close_err, "device close failed after request error");
                }
                Err(e)
            }
            (Ok(_), Err(e)) => Err(e),
            (Ok(value), Ok(())) => Ok(value),
        }
    }

    /// Takes the client out of the slot and closes it.
    fn close_handle(&self) -> Result<()> {
        let Some(mut client) = self.handle.lock().take() else {
            return Ok(());
        };

        let result = client.close();
        match &result {
            Ok(()) => debug!("device session closed"),
            Err(e) => warn!(error = %e, "device session close failed"),
        }
        result
    }
}

/// An open device session holding the guard's token.
///
/// Dropping the session closes the client. Use
/// [`release`](Self::release) to observe close errors.
#[must_use = "dropping the session closes the device connection"]
pub struct ConnectionSession<'a> {
    guard: &'a ConnectionGuard,
    _token: MutexGuard<'a, ()>,
    released: bool,
}

impl fmt::Debug for ConnectionSession<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionSession")
            .field("released", &self.released)
            .finish_non_exhaustive()
    }
}

impl ConnectionSession<'_> {
    /// Runs `f` against the open client.
    ///
    /// # Errors
    ///
    /// [`Error::DeviceDisconnected`] if the client is gone, otherwise
    /// whatever `f` returns.
    pub fn with_client<T, F>(&mut self, f: F) -> Result<T>
    where
        F: FnOnce(&mut dyn DeviceClient) -> Result<T>,
    {
        let mut handle = self.guard.handle.lock();
        let client = handle.as_deref_mut().ok_or(Error::DeviceDisconnected)?;
        f(client)
    }

    /// Closes the client and gives the token back.
    ///
    /// # Errors
    ///
    /// Returns the client's close error. The session is closed regardless.
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        self.guard.close_handle()
    }
}

impl Drop for ConnectionSession<'_> {
    fn drop(&mut self) {
        if !self.released {
            // Errors are already logged by `close_handle`.
            let _ = self.guard.close_handle();
        }
    }
}
