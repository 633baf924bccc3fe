use crate::domain::ItemId;
use crate::error::HarvestError;
use crate::table::AbundanceTable;

/// Result of retrieving one run.
#[derive(Debug)]
pub enum FetchOutcome {
    /// At least one abundance row.
    Data(AbundanceTable),
    /// The service confirmed there is nothing to download for this run.
    Empty,
    /// Anything that might succeed on a later attempt.
    TransientError(HarvestError),
}

impl FetchOutcome {
    pub fn kind(&self) -> &'static str {
        match self {
            FetchOutcome::Data(_) => "data",
            FetchOutcome::Empty => "empty",
            FetchOutcome::TransientError(_) => "transient-error",
        }
    }
}

impl From<Result<FetchOutcome, HarvestError>> for FetchOutcome {
    fn from(value: Result<FetchOutcome, HarvestError>) -> Self {
        value.unwrap_or_else(FetchOutcome::TransientError)
    }
}

/// Retrieves the species-level abundance table for one run. Implementations
/// are called from many worker threads at once.
pub trait ItemFetcher: Send + Sync {
    fn fetch(&self, id: &ItemId) -> FetchOutcome;
}

impl<F: ItemFetcher + ?Sized> ItemFetcher for Box<F> {
    fn fetch(&self, id: &ItemId) -> FetchOutcome {
        (**self).fetch(id)
    }
}

impl<F: ItemFetcher + ?Sized> ItemFetcher for &F {
    fn fetch(&self, id: &ItemId) -> FetchOutcome {
        (**self).fetch(id)
    }
}
