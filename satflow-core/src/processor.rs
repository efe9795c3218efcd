//! Turns a raw payload into a [ProcessedRecord]. Pure and deterministic, no I/O, so every retry
//! decision stays with the [crate::delivery::DeliveryController].

use crate::message::ProcessedRecord;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ProcessingError {
    #[error("payload is not valid UTF-8 (invalid byte at offset {offset})")]
    InvalidUtf8 { offset: usize },
}

/// Decodes the payload as UTF-8 text and labels it with a fixed prefix.
#[derive(Debug, Clone, PartialEq)]
pub struct Processor {
    prefix: String,
}

impl Processor {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn process(
        &self,
        message_id: &str,
        payload: &[u8],
    ) -> Result<ProcessedRecord, ProcessingError> {
        let text = std::str::from_utf8(payload).map_err(|e| ProcessingError::InvalidUtf8 {
            offset: e.valid_up_to(),
        })?;

        Ok(ProcessedRecord {
            message_id: message_id.to_string(),
            content: format!("{}{}", self.prefix, text),
        })
    }
}
