pub mod aggregate;
pub mod checkpoint;
pub mod context;
pub mod dispatcher;
pub mod fetcher;
pub mod scanner;
pub mod sink;

pub use crate::aggregate::{aggregate, Aggregate, LanguageCodeLines, Largest};
pub use crate::checkpoint::Checkpoint;
pub use crate::context::RunContext;
pub use crate::checkpoint::JobKey;
pub use crate::dispatcher::{Dispatcher, RetryPolicy, RunOutcome, RunReport};
pub use crate::fetcher::{GitFetcher, SourceFetcher, WorkTree};
pub use crate::scanner::{CodeScanner, CommandScanner};
pub use crate::sink::ResultSink;
