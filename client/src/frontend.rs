//! Wiring for the graphical front end, which runs as a child process. Its
//! stdout carries direction bytes to the client and its stdin receives the
//! server's broadcasts.

use log::info;
use std::io;
use std::path::Path;
use std::process::Stdio;
use tokio::process::{Child, ChildStdin, ChildStdout, Command};

pub struct Frontend {
    pub child: Child,
    /// Moves produced by the front end.
    pub moves: ChildStdout,
    /// Updates consumed by the front end.
    pub updates: ChildStdin,
}

impl Frontend {
    pub fn spawn(program: &Path) -> io::Result<Self> {
        let mut child = Command::new(program)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let moves = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "front end stdout not piped"))?;
        let updates = child
            .stdin
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "front end stdin not piped"))?;

        info!("Front end {} started", program.display());
        Ok(Self {
            child,
            moves,
            updates,
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_pipes_are_connected() {
        let mut frontend = Frontend::spawn(Path::new("cat")).unwrap();

        frontend.updates.write_all(&[1, 2, 3]).await.unwrap();
        drop(frontend.updates);

        let mut echoed = Vec::new();
        frontend.moves.read_to_end(&mut echoed).await.unwrap();
        assert_eq!(echoed, vec![1, 2, 3]);
        assert!(frontend.child.wait().await.unwrap().success());
    }

    #[test]
    fn test_missing_program() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let _guard = runtime.enter();
        assert!(Frontend::spawn(Path::new("/nonexistent/front-end")).is_err());
    }
}
