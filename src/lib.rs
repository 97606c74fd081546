//! Forwards radiograph uploads to a multimodal model and returns its analysis
//! with a non-diagnostic disclaimer.
//!
//! The flow is: [`UploadBatch::collect`] decodes raw uploads, then
//! [`AnalysisRequester::analyze`] sends the batch through an
//! [`InferenceProvider`] under a [`RetryPolicy`] and yields an
//! [`AnalysisOutcome`].

pub mod analyzer;
pub mod config;
pub mod error;
pub mod gemini;
pub mod provider;
pub mod request;
pub mod retry;
pub mod session;
pub mod upload;
pub mod worker;

pub use analyzer::{AnalysisOutcome, AnalysisRequester, DISCLAIMER_SUFFIX, NO_IMAGES_MESSAGE};
pub use config::{AnalysisConfig, BlockThreshold, GenerationParams, HarmCategory, SafetySetting};
pub use error::{ConfigError, DecodeError, ProviderError, ProviderErrorKind};
pub use gemini::GeminiProvider;
pub use provider::{InferenceProvider, ProviderResponse};
pub use request::{AnalysisRequest, ContentPart, GenerateRequest};
pub use retry::{ErrorClass, RetryPolicy, Sleeper, ThreadSleeper, classify_provider_error};
pub use session::{AnalysisSession, SessionEcho};
pub use upload::{BatchIdentity, ImageItem, RawUpload, SkippedUpload, UploadBatch, collect_uploads};
pub use worker::{AnalysisWorker, CompletedAnalysis, WorkerPoll, WorkerState};
