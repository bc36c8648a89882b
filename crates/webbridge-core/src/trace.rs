//! Wire trace files.
//!
//! Optional append-only record of every message crossing the bridge, one
//! timestamped line per message. Separate from the `log` facade so protocol
//! traffic can be captured without turning on debug logging globally.

use std::{
    fs::{File, OpenOptions},
    io::Write,
    path::Path,
    sync::{Arc, Mutex},
};

use chrono::{SecondsFormat, Utc};

/// Thread-safe handle to an append-only trace file. `None` disables tracing.
pub type TraceHandle = Arc<Mutex<Option<File>>>;

/// A handle that records nothing.
pub fn disabled() -> TraceHandle {
    Arc::new(Mutex::new(None))
}

/// Current UTC time as RFC 3339 with milliseconds (e.g. 2026-02-04T10:15:30.123Z).
fn utc_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Write a timestamped line to the trace file (if present).
pub fn trace_line(handle: &TraceHandle, direction: &str, data: &str) {
    if let Ok(mut guard) = handle.lock() {
        if let Some(ref mut file) = *guard {
            let ts = utc_timestamp();
            let _ = writeln!(file, "[{}] {}: {}", ts, direction, data);
            let _ = file.flush();
        }
    }
}

/// Open (or create) a trace file at `{trace_dir}/{bridge_id}.log`.
///
/// Any failure to create the directory or file yields a disabled handle.
pub fn open_trace_file(trace_dir: Option<&Path>, bridge_id: &str) -> TraceHandle {
    let file = trace_dir.and_then(|dir| {
        std::fs::create_dir_all(dir).ok()?;
        let path = dir.join(format!("{}.log", bridge_id));
        match OpenOptions::new().create(true).append(true).open(&path) {
            Ok(file) => Some(file),
            Err(e) => {
                log::warn!("failed to open trace file {}: {}", path.display(), e);
                None
            }
        }
    });
    Arc::new(Mutex::new(file))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use tempfile::tempdir;

    #[test]
    fn utc_timestamp_format() {
        let ts = utc_timestamp();
        assert!(ts.ends_with('Z'));
        assert_eq!(ts.len(), 24);
        assert_eq!(&ts[10..11], "T");
        assert_eq!(&ts[19..20], ".");
    }

    #[test]
    fn open_trace_file_creates_file() {
        let dir = tempdir().unwrap();

        let handle = open_trace_file(Some(dir.path()), "bridge-1");
        assert!(handle.lock().unwrap().is_some());
        assert!(dir.path().join("bridge-1.log").exists());
    }

    #[test]
    fn open_trace_file_creates_missing_dir() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("traces").join("today");

        let handle = open_trace_file(Some(&nested), "bridge-1");
        assert!(handle.lock().unwrap().is_some());
        assert!(nested.join("bridge-1.log").exists());
    }

    #[test]
    fn open_trace_file_none_dir() {
        let handle = open_trace_file(None, "bridge-1");
        assert!(handle.lock().unwrap().is_none());
    }

    #[test]
    fn trace_line_appends() {
        let dir = tempdir().unwrap();
        let handle = open_trace_file(Some(dir.path()), "bridge-1");
        trace_line(&handle, "HOST->SURFACE", r#"{"kind":"SESSION_CLEARED","payload":{}}"#);
        trace_line(&handle, "SURFACE->HOST", r#"{"kind":"SURFACE_READY","payload":{}}"#);

        let mut contents = String::new();
        File::open(dir.path().join("bridge-1.log"))
            .unwrap()
            .read_to_string(&mut contents)
            .unwrap();

        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("HOST->SURFACE: {\"kind\":\"SESSION_CLEARED\""));
        assert!(lines[1].contains("SURFACE->HOST: {\"kind\":\"SURFACE_READY\""));
    }

    #[test]
    fn trace_line_handles_disabled() {
        let handle = disabled();
        trace_line(&handle, "HOST->SURFACE", "ignored");
    }
}
