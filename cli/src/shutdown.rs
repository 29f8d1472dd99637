//! Process stop signals for long-running commands.

use std::io;

/// Listens for SIGINT, and SIGTERM on Unix.
///
/// Handlers are installed by [`Shutdown::install`], so a signal that arrives
/// before [`Shutdown::recv`] is polled is not lost.
pub struct Shutdown {
    #[cfg(unix)]
    terminate: tokio::signal::unix::Signal,
}

impl Shutdown {
    pub fn install() -> io::Result<Self> {
        Ok(Self {
            #[cfg(unix)]
            terminate: tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?,
        })
    }

    /// Wait for the next stop signal and return its name.
    pub async fn recv(&mut self) -> io::Result<&'static str> {
        #[cfg(unix)]
        {
            tokio::select! {
                interrupt = tokio::signal::ctrl_c() => interrupt.map(|_| "SIGINT"),
                _ = self.terminate.recv() => Ok("SIGTERM"),
            }
        }
        #[cfg(not(unix))]
        {
            tokio::signal::ctrl_c().await.map(|_| "ctrl-c")
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn sigterm_is_reported() {
        let mut shutdown = Shutdown::install().unwrap();
        let status = std::process::Command::new("kill")
            .args(["-TERM", &std::process::id().to_string()])
            .status()
            .unwrap();
        assert!(status.success());

        let signal = tokio::time::timeout(Duration::from_secs(5), shutdown.recv())
            .await
            .expect("no signal within 5s")
            .unwrap();
        assert_eq!(signal, "SIGTERM");
    }
}
