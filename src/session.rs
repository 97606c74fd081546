use crate::{analyzer::AnalysisOutcome, upload::BatchIdentity};

/// Last shown outcome and the batch that produced it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionEcho {
    pub identity: BatchIdentity,
    pub outcome: AnalysisOutcome,
}

/// Display state owned by a UI session.
///
/// The requester never sees this; the UI feeds it the current upload set on
/// every refresh and the outcome after every analysis.
#[derive(Debug, Default)]
pub struct AnalysisSession {
    echo: Option<SessionEcho>,
}

impl AnalysisSession {
    /// A session with nothing shown yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops the shown outcome when the uploads differ from the batch that
    /// produced it. Returns `true` if something was cleared.
    pub fn observe_uploads(&mut self, current: &BatchIdentity) -> bool {
        match &self.echo {
            Some(echo) if &echo.identity != current => {
                log::debug!("Upload set changed, clearing the previous analysis");
                self.echo = None;
                true
            }
            _ => false,
        }
    }

    /// Stores the latest outcome, replacing any previous one.
    pub fn record(&mut self, identity: BatchIdentity, outcome: AnalysisOutcome) {
        self.echo = Some(SessionEcho { identity, outcome });
    }

    /// The outcome to display, if any.
    pub fn last_outcome(&self) -> Option<&AnalysisOutcome> {
        self.echo.as_ref().map(|echo| &echo.outcome)
    }

    /// The outcome together with the batch it belongs to.
    pub fn echo(&self) -> Option<&SessionEcho> {
        self.echo.as_ref()
    }

    /// Forgets the shown outcome.
    pub fn clear(&mut self) {
        self.echo = None;
    }
}
