use super::Conn;
use super::stream::Transport;
use crate::error::{Error, Result};

impl<S: Transport> Conn<S> {
    /// Run `f` between BEGIN and COMMIT.
    ///
    /// When `f` fails the transaction is rolled back and the error of `f` is
    /// returned. A failed rollback is only logged.
    pub fn run_transaction<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        if self.session().in_transaction() {
            return Err(Error::BadUsageError(
                "a transaction is already open on this connection".to_string(),
            ));
        }
        self.query_drop("BEGIN")?;
        match f(self) {
            Ok(value) => {
                self.query_drop("COMMIT")?;
                Ok(value)
            }
            Err(e) => {
                if !self.is_closed() {
                    let rollback = self
                        .close_stream()
                        .and_then(|()| self.query_drop("ROLLBACK"));
                    if let Err(rollback) = rollback {
                        tracing::warn!(error = %rollback, "rollback failed");
                    }
                }
                Err(e)
            }
        }
    }
}
