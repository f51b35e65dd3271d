//! Incremental decoder for `text/event-stream` bodies.
//!
//! Chunks arrive from the network at arbitrary boundaries, so the decoder
//! buffers partial lines and only yields events once their terminating blank
//! line has been seen.

use crate::error::HueResult;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SseEvent {
    pub id: Option<String>,
    pub event: Option<String>,
    pub data: String,
}

#[derive(Debug, Default)]
pub struct SseDecoder {
    buf: Vec<u8>,
    current: SseEvent,
    has_data: bool,
}

impl SseDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk of the body, returning every event it completes.
    pub fn feed(&mut self, chunk: &[u8]) -> HueResult<Vec<SseEvent>> {
        self.buf.extend_from_slice(chunk);

        let mut events = vec![];
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.buf.drain(..=pos).collect();
            let line = std::str::from_utf8(&raw[..pos])?;
            let line = line.strip_suffix('\r').unwrap_or(line);
            if let Some(event) = self.process_line(line) {
                events.push(event);
            }
        }

        Ok(events)
    }

    fn process_line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            if !self.has_data {
                self.current = SseEvent::default();
                return None;
            }
            self.has_data = false;
            return Some(std::mem::take(&mut self.current));
        }

        // comment, used by the bridge as keep-alive
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = line.split_once(':').unwrap_or((line, ""));
        let value = value.strip_prefix(' ').unwrap_or(value);

        match field {
            "data" => {
                if self.has_data {
                    self.current.data.push('\n');
                }
                self.current.data.push_str(value);
                self.has_data = true;
            }
            "id" => self.current.id = Some(value.to_string()),
            "event" => self.current.event = Some(value.to_string()),
            _ => {}
        }

        None
    }
}
