//! CodeOps loop - generate, execute, verify.
//!
//! This library asks a language model for code, runs it inside an ephemeral
//! resource-capped container, and feeds failures back into a new generation
//! attempt until the code passes or the attempt budget runs out.

pub mod attachments;
pub mod audit;
pub mod backoff;
pub mod config;
pub mod controller;
pub mod error;
pub mod generator;
pub mod prompt;
pub mod provider;
pub mod sandbox;
pub mod state;

pub use error::{Error, Result};

pub use attachments::{assemble, Attachment};
pub use audit::{record_run, AuditRecord, AuditSink, JsonlAuditSink, NullAuditSink};
pub use backoff::Backoff;
pub use config::{Config, Validate, ValidationResult};
pub use controller::{next_phase, Controller, Phase};
pub use generator::{extract_code, GenerationOutcome, Generator};
pub use provider::{
    GeminiProvider, Modality, ModelProvider, ModelRequest, OllamaProvider, ProviderChain,
    ProviderDescriptor, ProviderError, ProviderResponse,
};
pub use sandbox::{
    DockerSandbox, ExecutionOutput, Provisioning, SandboxProvider, SandboxSession, SandboxSpec,
    SessionState,
};
pub use state::{ImageAttachment, Mode, Status, TaskRequest, TaskResult, TaskState};
