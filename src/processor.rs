//! The processing step a worker applies to each queued message.
//!
//! What "processing" means (HL7 parsing, clinical writes) lives outside this crate. A
//! [`Processor`] only reports success or a [`ProcessingFailure`]; the worker turns that
//! into a move to the archive or error partition.
//!
//! Processors are selected by name from a [`ProcessorRegistry`] populated at startup.

use std::{collections::HashMap, future::Future, pin::Pin, sync::Arc};

use serde::Serialize;

use crate::{error::Error, message::Message};

/// Why a processor rejected a message. Recorded on the error partition row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessingFailure {
    pub error_type: String,
    pub details: String,
}

impl ProcessingFailure {
    pub fn new(error_type: impl Into<String>, details: impl Into<String>) -> Self {
        let error_type = error_type.into();
        let mut details = details.into();
        if details.is_empty() {
            details = error_type.clone();
        }
        Self {
            error_type,
            details,
        }
    }
}

impl std::fmt::Display for ProcessingFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.error_type, self.details)
    }
}

pub type ProcessFuture<'a> =
    Pin<Box<dyn Future<Output = Result<(), ProcessingFailure>> + Send + 'a>>;

pub trait Processor: Send + Sync + 'static {
    fn process<'a>(&'a self, message: &'a Message) -> ProcessFuture<'a>;
}

/// Adapts a synchronous closure into a [`Processor`].
pub struct FnProcessor<F>(pub F);

impl<F> Processor for FnProcessor<F>
where
    F: Fn(&Message) -> Result<(), ProcessingFailure> + Send + Sync + 'static,
{
    fn process<'a>(&'a self, message: &'a Message) -> ProcessFuture<'a> {
        let result = (self.0)(message);
        Box::pin(std::future::ready(result))
    }
}

/// Archives every message unchanged.
pub struct AcceptProcessor;

impl Processor for AcceptProcessor {
    fn process<'a>(&'a self, _message: &'a Message) -> ProcessFuture<'a> {
        Box::pin(std::future::ready(Ok(())))
    }
}

/// Rejects payloads that do not open with an `MSH` segment header.
///
/// This is a framing check only: `MSH` followed by a field separator.
pub struct MshHeaderProcessor;

impl Processor for MshHeaderProcessor {
    fn process<'a>(&'a self, message: &'a Message) -> ProcessFuture<'a> {
        let payload = message.payload.as_ref();
        let result = match payload {
            [b'M', b'S', b'H', sep, ..] if !sep.is_ascii_alphanumeric() => Ok(()),
            _ => {
                let head = String::from_utf8_lossy(&payload[..payload.len().min(16)]);
                Err(ProcessingFailure::new(
                    "InvalidHeader",
                    format!("payload does not start with an MSH segment: {head:?}"),
                ))
            }
        };
        Box::pin(std::future::ready(result))
    }
}

pub type ProcessorFactory = Box<dyn Fn() -> Arc<dyn Processor> + Send + Sync>;

/// Name → factory table consulted once at startup.
pub struct ProcessorRegistry {
    factories: HashMap<String, ProcessorFactory>,
}

impl ProcessorRegistry {
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// A registry holding `accept` and `msh-header`.
    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        registry.register("accept", || Arc::new(AcceptProcessor));
        registry.register("msh-header", || Arc::new(MshHeaderProcessor));
        registry
    }

    /// Adds or replaces the factory registered under `name`.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn() -> Arc<dyn Processor> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Box::new(factory));
        self
    }

    pub fn build(&self, name: &str) -> Result<Arc<dyn Processor>, Error> {
        self.factories
            .get(name)
            .map(|factory| factory())
            .ok_or_else(|| {
                Error::invalid_parameter(format!(
                    "no processor registered as {name:?} (known: {})",
                    self.names().join(", ")
                ))
            })
    }

    fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl Default for ProcessorRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use chrono::Utc;
    use uuid::Uuid;

    use super::*;
    use crate::message::MessageState;

    fn message(payload: &'static [u8]) -> Message {
        Message {
            id: 1,
            uuid: Uuid::new_v4(),
            source: "LAB1".to_owned(),
            payload: Bytes::from_static(payload),
            date_created: Utc::now(),
            state: MessageState::pending(),
        }
    }

    #[tokio::test]
    async fn msh_header_checks_framing() {
        let processor = MshHeaderProcessor;
        assert!(processor.process(&message(b"MSH|^~\\&|LAB")).await.is_ok());

        let failure = processor.process(&message(b"PID|1")).await.unwrap_err();
        assert_eq!(failure.error_type, "InvalidHeader");
        assert!(!failure.details.is_empty());
    }

    #[test]
    fn unknown_processor_names_are_rejected() {
        let registry = ProcessorRegistry::with_builtins();
        assert_eq!(registry.names(), vec!["accept", "msh-header"]);
        assert!(registry.build("accept").is_ok());
        assert!(registry.build("com.example.Reflective").is_err());
    }
}
