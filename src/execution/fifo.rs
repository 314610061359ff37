//! Named pipe helpers.
//!
//! Opening a FIFO blocks until the other end is opened too. The release
//! functions here supply the missing end so that a task stuck in `open`
//! returns, which is how the pipe transport avoids hanging when the engine
//! skips some of its pipes.

use std::{
    ffi::CString,
    fs::{File, OpenOptions},
    io::{self, ErrorKind, Read},
    os::unix::{ffi::OsStrExt, fs::OpenOptionsExt},
    path::Path,
    sync::atomic::{AtomicBool, Ordering},
    thread,
    time::Duration,
};

use tracing::debug;

const RELEASE_POLL: Duration = Duration::from_millis(5);

pub fn create(path: &Path) -> io::Result<()> {
    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|e| io::Error::new(ErrorKind::InvalidInput, e))?;
    // SAFETY: c_path is a valid NUL-terminated string for the duration of the call.
    let rc = unsafe { libc::mkfifo(c_path.as_ptr(), 0o600) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Blocking open of the read end.
pub fn open_reader(path: &Path) -> io::Result<File> {
    File::open(path)
}

/// Blocking open of the write end.
pub fn open_writer(path: &Path) -> io::Result<File> {
    OpenOptions::new().write(true).open(path)
}

/// Unblock a reader waiting in `open` on `path` by briefly opening the write
/// end. Returns once the write end was opened or `finished` is set.
pub fn release_reader(path: &Path, finished: &AtomicBool) {
    while !finished.load(Ordering::Acquire) {
        match OpenOptions::new()
            .write(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(path)
        {
            Ok(_) => {
                debug!("released reader of {}", path.display());
                return;
            }
            // no reader yet
            Err(e) if e.raw_os_error() == Some(libc::ENXIO) => thread::sleep(RELEASE_POLL),
            Err(e) => {
                debug!("giving up on {}: {}", path.display(), e);
                return;
            }
        }
    }
}

/// Unblock a writer waiting on `path` by holding the read end open and
/// discarding everything until `finished` is set.
pub fn release_writer(path: &Path, finished: &AtomicBool) {
    // Never blocks for a FIFO.
    let mut file = match OpenOptions::new()
        .read(true)
        .custom_flags(libc::O_NONBLOCK)
        .open(path)
    {
        Ok(f) => f,
        Err(e) => {
            debug!("giving up on {}: {}", path.display(), e);
            return;
        }
    };
    let mut sink = [0u8; 8192];
    while !finished.load(Ordering::Acquire) {
        match file.read(&mut sink) {
            Ok(n) if n > 0 => continue,
            Ok(_) => thread::sleep(RELEASE_POLL),
            Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::Interrupted => {
                thread::sleep(RELEASE_POLL)
            }
            Err(e) => {
                debug!("stopped draining {}: {}", path.display(), e);
                return;
            }
        }
    }
    debug!("released writer of {}", path.display());
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{io::Write, sync::Arc, time::Instant};

    #[test]
    fn test_create_makes_a_fifo() {
        use std::os::unix::fs::FileTypeExt;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("p");
        create(&path).unwrap();
        assert!(std::fs::metadata(&path).unwrap().file_type().is_fifo());
        assert!(create(&path).is_err());
    }

    #[test]
    fn test_release_reader_unblocks_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out");
        create(&path).unwrap();

        let finished = Arc::new(AtomicBool::new(false));
        let reader = {
            let (path, finished) = (path.clone(), finished.clone());
            thread::spawn(move || {
                let mut buf = String::new();
                let n = open_reader(&path).unwrap().read_to_string(&mut buf).unwrap();
                finished.store(true, Ordering::Release);
                n
            })
        };

        release_reader(&path, &finished);
        assert_eq!(reader.join().unwrap(), 0);
    }

    #[test]
    fn test_release_reader_returns_when_finished() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out");
        create(&path).unwrap();
        let start = Instant::now();
        release_reader(&path, &AtomicBool::new(true));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_release_writer_accepts_large_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("param");
        create(&path).unwrap();

        let finished = Arc::new(AtomicBool::new(false));
        let writer = {
            let (path, finished) = (path.clone(), finished.clone());
            thread::spawn(move || {
                let payload = vec![b'x'; 256 * 1024];
                let r = open_writer(&path).and_then(|mut f| f.write_all(&payload));
                finished.store(true, Ordering::Release);
                r
            })
        };

        release_writer(&path, &finished);
        assert!(writer.join().unwrap().is_ok());
    }
}
