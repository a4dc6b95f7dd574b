use crate::domain::ports::{PaymentProcessor, SubmitRequest};
use crate::domain::transaction::TransactionType;
use crate::error::{ProcessorError, ProcessorFailure};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

const INSTRUMENT_KINDS: [&str; 2] = ["cards", "bank_accounts"];

/// An outcome queued on a [`DummyProcessor`] for the next submission.
#[derive(Debug, Clone)]
pub enum ScriptedOutcome {
    Succeed,
    Fail(ProcessorError),
    /// Sleeps before succeeding; used to exercise submission deadlines.
    Delay(Duration),
}

#[derive(Default)]
struct Inner {
    script: VecDeque<ScriptedOutcome>,
    submitted: Vec<SubmitRequest>,
    next_reference: u64,
}

/// A deterministic stand-in for the payment processor.
///
/// Funding instruments must look like `/v1/cards/<id>` or
/// `/v1/bank_accounts/<id>`. Submissions against an id containing
/// `declined` fail permanently, ones containing `flaky` fail recoverably,
/// everything else succeeds unless an outcome was queued with
/// [`DummyProcessor::push_outcome`].
#[derive(Default, Clone)]
pub struct DummyProcessor {
    inner: Arc<Mutex<Inner>>,
}

impl DummyProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_outcome(&self, outcome: ScriptedOutcome) {
        self.lock().script.push_back(outcome);
    }

    /// Every request received by `submit`, in order.
    pub fn submitted(&self) -> Vec<SubmitRequest> {
        self.lock().submitted.clone()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn parse_instrument(uri: &str) -> Result<&str, ProcessorError> {
        let mut parts = uri.trim_start_matches('/').split('/');
        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some("v1"), Some(kind), Some(id), None)
                if INSTRUMENT_KINDS.contains(&kind) && !id.is_empty() =>
            {
                Ok(id)
            }
            _ => Err(ProcessorError::InvalidInstrument(format!(
                "{} is not a card or bank account URI",
                uri
            ))),
        }
    }
}

#[async_trait]
impl PaymentProcessor for DummyProcessor {
    async fn validate_funding_instrument(&self, uri: &str) -> Result<(), ProcessorError> {
        Self::parse_instrument(uri).map(|_| ())
    }

    async fn submit(&self, request: &SubmitRequest) -> Result<String, ProcessorError> {
        let (scripted, reference) = {
            let mut inner = self.lock();
            inner.submitted.push(request.clone());
            inner.next_reference += 1;
            (inner.script.pop_front(), inner.next_reference)
        };

        match scripted {
            Some(ScriptedOutcome::Fail(error)) => return Err(error),
            Some(ScriptedOutcome::Delay(delay)) => tokio::time::sleep(delay).await,
            Some(ScriptedOutcome::Succeed) => {}
            None => {
                let id = Self::parse_instrument(&request.funding_instrument_uri)?;
                if id.contains("declined") {
                    return Err(ProcessorError::Permanent(
                        ProcessorFailure::new("Card declined")
                            .with_code("card-declined")
                            .with_number(402),
                    ));
                }
                if id.contains("flaky") {
                    return Err(ProcessorError::Recoverable(
                        ProcessorFailure::new("Service temporarily unavailable")
                            .with_code("service-unavailable")
                            .with_number(503),
                    ));
                }
            }
        }

        let collection = match request.transaction_type {
            TransactionType::Debit => "debits",
            TransactionType::Credit => "credits",
            TransactionType::Refund => "refunds",
            TransactionType::Reverse => "reversals",
        };
        Ok(format!("/v1/{}/WD{:06}", collection, reference))
    }
}
