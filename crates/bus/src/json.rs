use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use tracing::{info, warn};

use crate::adapter::BusAdapter;
use crate::protocol::ProtocolEvent;

/// Streams protocol events to a JSON file.
///
/// In the default newline-delimited mode each event is one compact JSON
/// object per line, so consumers can tail the file. With `global_array` set
/// the output is wrapped in a top-level array, producing a single valid JSON
/// document on disconnect.
pub struct JsonAdapter {
    path: PathBuf,
    file: Option<BufWriter<File>>,
    global_array: bool,
    events_written: u64,
    warned_unconnected: bool,
}

impl JsonAdapter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file: None,
            global_array: false,
            events_written: 0,
            warned_unconnected: false,
        }
    }

    /// Wrap the emitted events in a top-level JSON array. Must be set before
    /// `connect`.
    pub fn global_array(mut self, enabled: bool) -> Self {
        self.global_array = enabled;
        self
    }

    pub fn events_written(&self) -> u64 {
        self.events_written
    }
}

impl BusAdapter for JsonAdapter {
    fn connect(&mut self) -> bool {
        match File::create(&self.path) {
            Ok(file) => {
                let mut writer = BufWriter::new(file);
                self.events_written = 0;
                self.warned_unconnected = false;
                if self.global_array {
                    if writer.write_all(b"[\n").is_err() {
                        return false;
                    }
                }
                info!(path = %self.path.display(), "recording protocol events to JSON file");
                self.file = Some(writer);
                true
            }
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "failed to open JSON event file");
                false
            }
        }
    }

    fn disconnect(&mut self) {
        if let Some(mut writer) = self.file.take() {
            if self.global_array {
                let tail: &[u8] = if self.events_written > 0 { b"\n]\n" } else { b"]\n" };
                let _ = writer.write_all(tail);
            }
            let _ = writer.flush();
            info!(
                path = %self.path.display(),
                events = self.events_written,
                "closed JSON event file"
            );
        }
    }

    fn send_event(&mut self, event: &ProtocolEvent) -> bool {
        let Some(writer) = self.file.as_mut() else {
            if !self.warned_unconnected {
                warn!("JSON adapter received an event before connect; events will be dropped");
                self.warned_unconnected = true;
            }
            return false;
        };

        let line = match serde_json::to_string(event) {
            Ok(line) => line,
            Err(err) => {
                warn!(error = %err, "failed to serialise protocol event");
                return false;
            }
        };

        let mut ok = true;
        if self.events_written > 0 {
            let separator: &[u8] = if self.global_array { b",\n" } else { b"\n" };
            ok &= writer.write_all(separator).is_ok();
        }
        ok &= writer.write_all(line.as_bytes()).is_ok();
        if ok {
            self.events_written += 1;
        }
        ok
    }

    fn poll(&mut self, _max: usize) -> Vec<ProtocolEvent> {
        Vec::new()
    }
}

impl Drop for JsonAdapter {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use volition_core::UniqueId;

    use super::*;
    use crate::protocol::ProtocolBody;

    fn event(goal: &str) -> ProtocolEvent {
        ProtocolEvent::new(
            UniqueId::random(),
            1,
            ProtocolBody::Pursue {
                agent: "a".into(),
                goal: goal.into(),
                message: None,
                persistent: false,
            },
        )
    }

    fn temp_path(name: &str) -> PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!("volition-json-{}-{}", name, std::process::id()));
        path
    }

    #[test]
    fn test_ndjson_one_compact_line_per_event() {
        let path = temp_path("ndjson");
        let mut adapter = JsonAdapter::new(&path);
        assert!(adapter.connect());
        assert!(adapter.send_event(&event("G1")));
        assert!(adapter.send_event(&event("G2")));
        adapter.disconnect();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        for line in lines {
            assert!(!line.contains('\n'));
            let parsed: ProtocolEvent = serde_json::from_str(line).unwrap();
            assert_eq!(parsed.timestamp, 1);
        }
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_global_array_is_valid_json() {
        let path = temp_path("array");
        let mut adapter = JsonAdapter::new(&path).global_array(true);
        assert!(adapter.connect());
        adapter.send_event(&event("G1"));
        adapter.send_event(&event("G2"));
        adapter.disconnect();

        let text = std::fs::read_to_string(&path).unwrap();
        let parsed: Vec<ProtocolEvent> = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed.len(), 2);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_empty_global_array_is_valid_json() {
        let path = temp_path("empty");
        let mut adapter = JsonAdapter::new(&path).global_array(true);
        adapter.connect();
        adapter.disconnect();
        let text = std::fs::read_to_string(&path).unwrap();
        let parsed: Vec<ProtocolEvent> = serde_json::from_str(&text).unwrap();
        assert!(parsed.is_empty());
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_send_before_connect_is_dropped() {
        let path = temp_path("unconnected");
        let mut adapter = JsonAdapter::new(&path);
        assert!(!adapter.send_event(&event("G1")));
        assert_eq!(adapter.events_written(), 0);
    }
}
