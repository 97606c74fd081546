use crate::{error::ProviderError, request::GenerateRequest};

/// What the remote model answered when the call itself went through.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProviderResponse {
    /// Generated text. May be blank, which the requester treats as empty.
    Text(String),
    /// The content-safety filter refused the request, with its reason.
    Blocked(String),
    /// Neither text nor a block reason.
    Empty,
}

/// Trait for the multimodal text-generation capability behind the analysis.
///
/// Implementors turn one [`GenerateRequest`] into one remote call. They do not
/// retry; the requester owns the retry policy.
pub trait InferenceProvider {
    /// Runs a single generation call.
    fn generate(&mut self, request: &GenerateRequest<'_>) -> Result<ProviderResponse, ProviderError>;
}

impl<P: InferenceProvider + ?Sized> InferenceProvider for Box<P> {
    fn generate(&mut self, request: &GenerateRequest<'_>) -> Result<ProviderResponse, ProviderError> {
        (**self).generate(request)
    }
}

impl<P: InferenceProvider + ?Sized> InferenceProvider for &mut P {
    fn generate(&mut self, request: &GenerateRequest<'_>) -> Result<ProviderResponse, ProviderError> {
        (**self).generate(request)
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use std::collections::VecDeque;

    use super::*;
    use crate::upload::BatchIdentity;

    /// Replays a fixed script of results and records every call.
    #[derive(Debug, Default)]
    pub(crate) struct ScriptedProvider {
        script: VecDeque<Result<ProviderResponse, ProviderError>>,
        fallback: Option<fn() -> Result<ProviderResponse, ProviderError>>,
        pub(crate) calls: usize,
        pub(crate) seen: Vec<(usize, BatchIdentity)>,
    }

    impl ScriptedProvider {
        pub(crate) fn new(
            script: impl IntoIterator<Item = Result<ProviderResponse, ProviderError>>,
        ) -> Self {
            Self {
                script: script.into_iter().collect(),
                ..Self::default()
            }
        }

        /// Answers with `f` once the script runs out.
        pub(crate) fn always(f: fn() -> Result<ProviderResponse, ProviderError>) -> Self {
            Self {
                fallback: Some(f),
                ..Self::default()
            }
        }
    }

    impl InferenceProvider for ScriptedProvider {
        fn generate(
            &mut self,
            request: &GenerateRequest<'_>,
        ) -> Result<ProviderResponse, ProviderError> {
            self.calls += 1;
            self.seen
                .push((request.content.parts().count(), request.content.metadata()));
            match self.script.pop_front() {
                Some(result) => result,
                None => match self.fallback {
                    Some(f) => f(),
                    None => Ok(ProviderResponse::Empty),
                },
            }
        }
    }
}
