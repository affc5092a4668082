/// Incremental `text/event-stream` decoder. Yields the `data:` payload of
/// each complete event, multi-line data joined with `\n`. Comments and
/// non-data fields are dropped.
#[derive(Debug, Default)]
pub(crate) struct EventStreamDecoder {
    pending: Vec<u8>,
    event_data: Option<String>,
}

impl EventStreamDecoder {
    pub(crate) fn feed(&mut self, bytes: &[u8]) -> Result<Vec<String>, String> {
        self.pending.extend_from_slice(bytes);
        let mut events = Vec::new();
        let mut consumed = 0;
        while let Some(offset) = self.pending[consumed..].iter().position(|b| *b == b'\n') {
            let end = consumed + offset;
            let line = self.pending[consumed..end].to_vec();
            consumed = end + 1;
            if let Some(event) = self.line(&line)? {
                events.push(event);
            }
        }
        self.pending.drain(..consumed);
        Ok(events)
    }

    /// Emits whatever event is still open when the body ends without a
    /// trailing blank line.
    pub(crate) fn flush(mut self) -> Result<Vec<String>, String> {
        let tail = std::mem::take(&mut self.pending);
        let mut events = Vec::new();
        if !tail.is_empty()
            && let Some(event) = self.line(&tail)?
        {
            events.push(event);
        }
        events.extend(self.event_data.take());
        Ok(events)
    }

    fn line(&mut self, raw: &[u8]) -> Result<Option<String>, String> {
        let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
        if raw.is_empty() {
            return Ok(self.event_data.take());
        }
        let Some(value) = raw.strip_prefix(b"data:") else {
            return Ok(None);
        };
        let value = value.strip_prefix(b" ").unwrap_or(value);
        let value = std::str::from_utf8(value)
            .map_err(|error| format!("invalid UTF-8 in SSE data line: {error}"))?;
        match &mut self.event_data {
            Some(data) => {
                data.push('\n');
                data.push_str(value);
            }
            None => self.event_data = Some(value.to_owned()),
        }
        Ok(None)
    }
}
